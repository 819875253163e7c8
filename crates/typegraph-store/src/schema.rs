//! Schema type hierarchy.
//!
//! The reasoner only consumes the hierarchy through [`TypeHierarchy`]:
//! sub/supertype walks, which types may play which relation position, which
//! types may own which attribute, and version stamps for optimistic
//! conflict detection. [`Schema`] is the in-memory implementation.
//!
//! Every mutation made through a [`SchemaBuilder`] produces a schema whose
//! version is one higher than its source, and stamps every label it touched
//! with that version. A writer that opened against version `v` can therefore
//! ask "did anything I depend on change after `v`?" per label.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use typegraph_pattern::{Label, ValueType};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Entity,
    Relation,
    Attribute,
}

impl TypeKind {
    fn article(self) -> &'static str {
        match self {
            TypeKind::Entity => "an entity type",
            TypeKind::Relation => "a relation type",
            TypeKind::Attribute => "an attribute type",
        }
    }
}

pub trait TypeHierarchy: Send + Sync {
    fn contains(&self, label: &Label) -> bool;

    fn kind(&self, label: &Label) -> Option<TypeKind>;

    fn supertype(&self, label: &Label) -> Option<&Label>;

    /// Direct subtypes, label-ordered.
    fn subtypes(&self, label: &Label) -> Vec<Label>;

    /// Number of player positions of a relation type (inherited if the
    /// relation declares none itself).
    fn arity(&self, relation: &Label) -> Option<usize>;

    /// Types that may play `position` of `relation`, including subtypes of
    /// the declared players.
    fn player_types(&self, relation: &Label, position: usize) -> Result<BTreeSet<Label>, StoreError>;

    /// Types that may own `attribute`, including subtypes of declared owners.
    fn owner_types(&self, attribute: &Label) -> BTreeSet<Label>;

    fn value_type(&self, attribute: &Label) -> Option<ValueType>;

    /// Every attribute type with the given value type.
    fn attributes_with_value_type(&self, value_type: ValueType) -> BTreeSet<Label>;

    fn version(&self) -> u64;

    /// Version at which `label` was last defined or modified.
    fn label_version(&self, label: &Label) -> Option<u64>;

    /// `label` and all of its transitive subtypes.
    fn subtypes_transitive(&self, label: &Label) -> BTreeSet<Label> {
        let mut out = BTreeSet::new();
        if !self.contains(label) {
            return out;
        }
        let mut queue = VecDeque::from([label.clone()]);
        while let Some(next) = queue.pop_front() {
            if out.insert(next.clone()) {
                queue.extend(self.subtypes(&next));
            }
        }
        out
    }

    /// `label` followed by its supertypes, nearest first.
    fn supertypes_transitive(&self, label: &Label) -> Vec<Label> {
        let mut out = Vec::new();
        let mut cursor = self.contains(label).then(|| label.clone());
        while let Some(current) = cursor {
            cursor = self.supertype(&current).cloned();
            out.push(current);
        }
        out
    }

    fn is_subtype_of(&self, sub: &Label, sup: &Label) -> bool {
        self.supertypes_transitive(sub).iter().any(|l| l == sup)
    }
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone)]
struct TypeDef {
    kind: TypeKind,
    supertype: Option<Label>,
    subtypes: BTreeSet<Label>,
    /// Declared player types per position (relations only).
    players: Vec<BTreeSet<Label>>,
    /// Attribute types this type owns directly.
    owns: BTreeSet<Label>,
    value_type: Option<ValueType>,
    version: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<Label, TypeDef>,
    version: u64,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        Schema::default().to_builder()
    }

    /// Start a new schema version derived from this one.
    pub fn to_builder(&self) -> SchemaBuilder {
        SchemaBuilder {
            schema: self.clone(),
            version: self.version + 1,
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.types.keys()
    }

    fn def(&self, label: &Label) -> Option<&TypeDef> {
        self.types.get(label)
    }

    /// Nearest relation (self first) that declares its players.
    fn declared_players(&self, relation: &Label) -> Option<&Vec<BTreeSet<Label>>> {
        self.supertypes_transitive(relation)
            .iter()
            .filter_map(|l| self.def(l))
            .map(|d| &d.players)
            .find(|p| !p.is_empty())
    }
}

impl TypeHierarchy for Schema {
    fn contains(&self, label: &Label) -> bool {
        self.types.contains_key(label)
    }

    fn kind(&self, label: &Label) -> Option<TypeKind> {
        self.def(label).map(|d| d.kind)
    }

    fn supertype(&self, label: &Label) -> Option<&Label> {
        self.def(label)?.supertype.as_ref()
    }

    fn subtypes(&self, label: &Label) -> Vec<Label> {
        self.def(label)
            .map(|d| d.subtypes.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn arity(&self, relation: &Label) -> Option<usize> {
        if self.kind(relation)? != TypeKind::Relation {
            return None;
        }
        self.declared_players(relation).map(Vec::len)
    }

    fn player_types(&self, relation: &Label, position: usize) -> Result<BTreeSet<Label>, StoreError> {
        match self.kind(relation) {
            Some(TypeKind::Relation) => {}
            Some(_) => {
                return Err(StoreError::KindMismatch {
                    label: relation.clone(),
                    expected: TypeKind::Relation.article(),
                })
            }
            None => return Err(StoreError::UnknownType(relation.clone())),
        }
        let declared = self
            .declared_players(relation)
            .and_then(|p| p.get(position))
            .ok_or_else(|| StoreError::NoSuchPosition {
                relation: relation.clone(),
                position,
            })?;
        Ok(declared
            .iter()
            .flat_map(|l| self.subtypes_transitive(l))
            .collect())
    }

    fn owner_types(&self, attribute: &Label) -> BTreeSet<Label> {
        self.types
            .iter()
            .filter(|(_, d)| d.owns.contains(attribute))
            .flat_map(|(l, _)| self.subtypes_transitive(l))
            .collect()
    }

    fn value_type(&self, attribute: &Label) -> Option<ValueType> {
        self.def(attribute)?.value_type
    }

    fn attributes_with_value_type(&self, value_type: ValueType) -> BTreeSet<Label> {
        self.types
            .iter()
            .filter(|(_, d)| d.value_type == Some(value_type))
            .map(|(l, _)| l.clone())
            .collect()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn label_version(&self, label: &Label) -> Option<u64> {
        self.def(label).map(|d| d.version)
    }
}

// ============================================================================
// SchemaBuilder
// ============================================================================

pub struct SchemaBuilder {
    schema: Schema,
    version: u64,
}

impl SchemaBuilder {
    pub fn entity(&mut self, label: &str, sup: Option<&str>) -> Result<&mut Self, StoreError> {
        self.define(label, TypeKind::Entity, sup, Vec::new(), None)
    }

    /// Define a relation type with one declared player type per position.
    /// A subtype may pass no players to inherit its supertype's.
    pub fn relation(
        &mut self,
        label: &str,
        sup: Option<&str>,
        players: &[&str],
    ) -> Result<&mut Self, StoreError> {
        let mut declared = Vec::with_capacity(players.len());
        for player in players {
            let player = Label::new(*player);
            self.require(&player, None)?;
            declared.push(BTreeSet::from([player]));
        }
        if declared.is_empty() && sup.is_none() {
            return Err(StoreError::NoSuchPosition {
                relation: Label::new(label),
                position: 0,
            });
        }
        self.define(label, TypeKind::Relation, sup, declared, None)
    }

    pub fn attribute(
        &mut self,
        label: &str,
        sup: Option<&str>,
        value_type: ValueType,
    ) -> Result<&mut Self, StoreError> {
        if let Some(sup) = sup {
            let sup = Label::new(sup);
            if self.schema.value_type(&sup).is_some_and(|vt| vt != value_type) {
                return Err(StoreError::KindMismatch {
                    label: sup,
                    expected: "an attribute type of the same value type",
                });
            }
        }
        self.define(label, TypeKind::Attribute, sup, Vec::new(), Some(value_type))
    }

    /// Allow `player` (and its subtypes) to play `position` of `relation`.
    pub fn plays(
        &mut self,
        relation: &str,
        position: usize,
        player: &str,
    ) -> Result<&mut Self, StoreError> {
        let relation = Label::new(relation);
        let player = Label::new(player);
        self.require(&relation, Some(TypeKind::Relation))?;
        self.require(&player, None)?;
        let version = self.version;
        let def = self.def_mut(&relation)?;
        let slot = def
            .players
            .get_mut(position)
            .ok_or_else(|| StoreError::NoSuchPosition {
                relation: relation.clone(),
                position,
            })?;
        slot.insert(player.clone());
        def.version = version;
        self.def_mut(&player)?.version = version;
        Ok(self)
    }

    pub fn owns(&mut self, owner: &str, attribute: &str) -> Result<&mut Self, StoreError> {
        let owner = Label::new(owner);
        let attribute = Label::new(attribute);
        self.require(&owner, None)?;
        self.require(&attribute, Some(TypeKind::Attribute))?;
        let version = self.version;
        let def = self.def_mut(&owner)?;
        def.owns.insert(attribute.clone());
        def.version = version;
        self.def_mut(&attribute)?.version = version;
        Ok(self)
    }

    /// Remove a type that has no subtypes, along with every reference to it.
    pub fn undefine(&mut self, label: &str) -> Result<&mut Self, StoreError> {
        let label = Label::new(label);
        let def = self
            .schema
            .types
            .remove(&label)
            .ok_or_else(|| StoreError::UnknownType(label.clone()))?;
        if !def.subtypes.is_empty() {
            self.schema.types.insert(label.clone(), def);
            return Err(StoreError::KindMismatch {
                label,
                expected: "a type without subtypes",
            });
        }
        let version = self.version;
        if let Some(sup) = &def.supertype {
            let sup_def = self.def_mut(sup)?;
            sup_def.subtypes.remove(&label);
            sup_def.version = version;
        }
        for other in self.schema.types.values_mut() {
            let mut touched = other.owns.remove(&label);
            for slot in other.players.iter_mut() {
                touched |= slot.remove(&label);
            }
            if touched {
                other.version = version;
            }
        }
        Ok(self)
    }

    pub fn build(mut self) -> Schema {
        self.schema.version = self.version;
        self.schema
    }

    fn define(
        &mut self,
        label: &str,
        kind: TypeKind,
        sup: Option<&str>,
        players: Vec<BTreeSet<Label>>,
        value_type: Option<ValueType>,
    ) -> Result<&mut Self, StoreError> {
        if label.is_empty() || label.contains('\0') {
            return Err(StoreError::InvalidLabel(label.to_string()));
        }
        let label = Label::new(label);
        if self.schema.contains(&label) {
            return Err(StoreError::DuplicateType(label));
        }
        let supertype = match sup {
            Some(sup) => {
                let sup = Label::new(sup);
                self.require(&sup, Some(kind))?;
                Some(sup)
            }
            None => None,
        };
        let version = self.version;
        if let Some(sup) = &supertype {
            let sup_def = self.def_mut(sup)?;
            sup_def.subtypes.insert(label.clone());
            sup_def.version = version;
        }
        self.schema.types.insert(
            label,
            TypeDef {
                kind,
                supertype,
                subtypes: BTreeSet::new(),
                players,
                owns: BTreeSet::new(),
                value_type,
                version,
            },
        );
        Ok(self)
    }

    fn require(&self, label: &Label, kind: Option<TypeKind>) -> Result<(), StoreError> {
        let actual = self
            .schema
            .kind(label)
            .ok_or_else(|| StoreError::UnknownType(label.clone()))?;
        match kind {
            Some(expected) if expected != actual => Err(StoreError::KindMismatch {
                label: label.clone(),
                expected: expected.article(),
            }),
            _ => Ok(()),
        }
    }

    fn def_mut(&mut self, label: &Label) -> Result<&mut TypeDef, StoreError> {
        self.schema
            .types
            .get_mut(label)
            .ok_or_else(|| StoreError::UnknownType(label.clone()))
    }
}
