use std::collections::BTreeSet;
use std::sync::Arc;

use typegraph_pattern::{
    Atom, Comparator, Concept, ConceptMap, Conclusion, Conjunction, Label, RuleDefinition, Term,
    Value, ValueType,
};
use typegraph_reasoner::{Database, ReasonerConfig, Transaction, TransactionMode};
use typegraph_store::Schema;

fn labels(names: &[&str]) -> BTreeSet<Label> {
    names.iter().map(|n| Label::new(*n)).collect()
}

fn database() -> Arc<Database> {
    let mut b = Schema::builder();
    b.entity("animal", None).unwrap();
    b.entity("dog", Some("animal")).unwrap();
    b.entity("cat", Some("animal")).unwrap();
    b.entity("person", None).unwrap();
    b.relation("ownership", None, &["person", "animal"]).unwrap();
    b.relation("friendship", None, &["person", "person"]).unwrap();
    b.attribute("name", None, ValueType::String).unwrap();
    b.attribute("weight", None, ValueType::Long).unwrap();
    b.owns("animal", "name").unwrap();
    b.owns("person", "name").unwrap();
    b.owns("dog", "weight").unwrap();
    Arc::new(Database::new(b.build()))
}

#[test]
fn isa_widens_to_inhabited_subtypes() {
    let db = database();
    db.insert_thing("dog").unwrap();
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());

    let types = txn
        .types()
        .infer_possible_types(&Atom::isa("x", "animal"), &ConceptMap::new())
        .unwrap();
    // `animal` and `cat` have no instances of their own.
    assert_eq!(types, labels(&["dog"]));
}

#[test]
fn bound_things_narrow_to_their_own_type() {
    let db = database();
    let rex = db.insert_thing("dog").unwrap();
    db.insert_thing("cat").unwrap();
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());

    let bound = ConceptMap::new().with("x", Concept::Thing(rex));
    let typed = txn.types().infer_types(&Atom::isa("x", "animal"), &bound).unwrap();
    assert!(typed.is_satisfiable());
    assert_eq!(typed.types, labels(&["dog"]));

    let wrong = txn.types().infer_types(&Atom::isa("x", "person"), &bound).unwrap();
    assert!(!wrong.is_satisfiable());
}

#[test]
fn relation_players_must_fit_their_positions() {
    let db = database();
    let alice = db.insert_thing("person").unwrap();
    let rex = db.insert_thing("dog").unwrap();
    db.insert_relation("ownership", &[alice.into(), rex.into()]).unwrap();
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());

    let atom = Atom::relation("ownership", [Term::var("o"), Term::var("pet")]);
    let good = ConceptMap::new().with("o", Concept::Thing(alice));
    let swapped = ConceptMap::new().with("o", Concept::Thing(rex));
    assert_eq!(
        txn.types().infer_possible_types(&atom, &good).unwrap(),
        labels(&["ownership"])
    );
    assert!(txn.types().infer_possible_types(&atom, &swapped).unwrap().is_empty());

    let wrong_arity = Atom::relation("ownership", [Term::var("o")]);
    assert!(txn
        .types()
        .infer_possible_types(&wrong_arity, &ConceptMap::new())
        .unwrap()
        .is_empty());
}

#[test]
fn ownership_respects_owner_and_value_types() {
    let db = database();
    let rex = db.insert_thing("dog").unwrap();
    let alice = db.insert_thing("person").unwrap();
    db.insert_has(rex, "weight", Value::Long(30)).unwrap();
    db.insert_has(rex, "name", Value::String("Rex".into())).unwrap();
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());

    let atom = Atom::has(Term::var("x"), "weight", Term::var("w"));
    let dog = ConceptMap::new().with("x", Concept::Thing(rex));
    let person = ConceptMap::new().with("x", Concept::Thing(alice));
    assert_eq!(txn.types().infer_possible_types(&atom, &dog).unwrap(), labels(&["weight"]));
    assert!(txn.types().infer_possible_types(&atom, &person).unwrap().is_empty());

    let text = ConceptMap::new().with("w", Concept::Value(Value::String("heavy".into())));
    assert!(txn.types().infer_possible_types(&atom, &text).unwrap().is_empty());

    let cmp = Atom::compare("w", Comparator::Lt, Value::Long(3));
    assert_eq!(
        txn.types().infer_possible_types(&cmp, &ConceptMap::new()).unwrap(),
        labels(&["weight"])
    );
}

#[test]
fn concluded_types_count_as_fruitful_only_with_inference() {
    let db = database();
    db.insert_thing("person").unwrap();
    let when = Conjunction::new([Atom::relation(
        "friendship",
        [Term::var("a"), Term::var("b")],
    )]);
    let then = Conclusion::relation("friendship", [Term::var("b"), Term::var("a")]);
    let atom = Atom::relation("friendship", [Term::var("x"), Term::var("y")]);

    for (inference, expected) in [(true, labels(&["friendship"])), (false, BTreeSet::new())] {
        let txn = Transaction::open(
            &db,
            TransactionMode::Write,
            ReasonerConfig::default().with_inference(inference),
        );
        assert!(txn
            .types()
            .infer_possible_types(&atom, &ConceptMap::new())
            .unwrap()
            .is_empty());
        txn.declare_rule(RuleDefinition::new("symmetric", when.clone(), then.clone()))
            .unwrap();
        assert_eq!(
            txn.types().infer_possible_types(&atom, &ConceptMap::new()).unwrap(),
            expected
        );
    }
}

#[test]
fn results_are_recomputed_after_new_facts() {
    let db = database();
    let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());
    let atom = Atom::isa("x", "cat");
    assert!(txn.types().infer_possible_types(&atom, &ConceptMap::new()).unwrap().is_empty());
    db.insert_thing("cat").unwrap();
    assert_eq!(
        txn.types().infer_possible_types(&atom, &ConceptMap::new()).unwrap(),
        labels(&["cat"])
    );
}
