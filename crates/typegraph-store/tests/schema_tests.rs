use typegraph_pattern::{Label, ValueType};
use typegraph_store::{Schema, StoreError, TypeHierarchy, TypeKind};

#[test]
fn builder_rejects_bad_definitions() {
    let mut b = Schema::builder();
    b.entity("person", None).unwrap();
    b.attribute("age", None, ValueType::Long).unwrap();

    assert_eq!(
        b.entity("person", None).err(),
        Some(StoreError::DuplicateType(Label::new("person")))
    );
    assert!(matches!(b.entity("bad\0label", None), Err(StoreError::InvalidLabel(_))));
    assert!(matches!(b.entity("", None), Err(StoreError::InvalidLabel(_))));
    assert!(matches!(
        b.relation("friendship", None, &["ghost"]),
        Err(StoreError::UnknownType(_))
    ));
    assert!(matches!(
        b.owns("person", "person"),
        Err(StoreError::KindMismatch { .. })
    ));
    assert!(matches!(
        b.attribute("years", Some("age"), ValueType::String),
        Err(StoreError::KindMismatch { .. })
    ));
    assert!(matches!(
        b.relation("lonely", None, &[]),
        Err(StoreError::NoSuchPosition { .. })
    ));
}

#[test]
fn plays_widens_player_types() {
    let mut b = Schema::builder();
    b.entity("person", None).unwrap();
    b.entity("company", None).unwrap();
    b.relation("employment", None, &["person", "company"]).unwrap();
    b.plays("employment", 1, "person").unwrap();
    let schema = b.build();

    let employers = schema.player_types(&Label::new("employment"), 1).unwrap();
    assert_eq!(employers.len(), 2);
    assert_eq!(schema.kind(&Label::new("employment")), Some(TypeKind::Relation));
    assert_eq!(schema.arity(&Label::new("person")), None);
}

#[test]
fn value_type_lookup_covers_subtypes() {
    let mut b = Schema::builder();
    b.attribute("name", None, ValueType::String).unwrap();
    b.attribute("nickname", Some("name"), ValueType::String).unwrap();
    b.attribute("age", None, ValueType::Long).unwrap();
    let schema = b.build();

    let strings = schema.attributes_with_value_type(ValueType::String);
    assert_eq!(strings.len(), 2);
    assert!(schema.is_subtype_of(&Label::new("nickname"), &Label::new("name")));
    assert!(!schema.is_subtype_of(&Label::new("name"), &Label::new("nickname")));
}
