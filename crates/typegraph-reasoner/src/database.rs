//! The committed state transactions open over.
//!
//! A [`Database`] owns three things:
//!
//! - the current schema snapshot, replaced wholesale by [`Database::update_schema`];
//! - the committed rule catalog, with a per-label version used to detect
//!   concurrent rule writes;
//! - the fact store. Facts are written straight through and are not
//!   transaction-scoped; readers see them through the store generation.
//!
//! Rule writes reach the catalog only via [`crate::Transaction::commit`].

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use typegraph_pattern::{Atom, Concept, ConceptId, Conjunction, Label, RuleDefinition, Value};
use typegraph_store::{FactStore, MemoryStore, Schema, SchemaBuilder, StoreError, TypeHierarchy, TypeKind};

use crate::error::{Error, Result};
use crate::rule::RuleChanges;

#[derive(Debug, Default)]
struct Catalog {
    rules: BTreeMap<String, (u64, RuleDefinition)>,
    /// Catalog version at which each label was last written or removed.
    versions: BTreeMap<String, u64>,
    version: u64,
    next_iid: u64,
}

/// What a transaction saw when it opened.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub schema: Arc<Schema>,
    pub rules: Vec<(u64, RuleDefinition)>,
    pub rule_versions: BTreeMap<String, u64>,
}

pub struct Database {
    schema: RwLock<Arc<Schema>>,
    catalog: RwLock<Catalog>,
    store: MemoryStore,
}

impl Database {
    pub fn new(schema: Schema) -> Self {
        Self::with_store(schema, MemoryStore::new())
    }

    pub fn with_store(schema: Schema, store: MemoryStore) -> Self {
        Self {
            schema: RwLock::new(Arc::new(schema)),
            catalog: RwLock::new(Catalog {
                next_iid: 1,
                ..Catalog::default()
            }),
            store,
        }
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.schema.read().clone()
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Apply one schema edit session; every label it touches is stamped
    /// with the next schema version.
    pub fn update_schema(
        &self,
        edit: impl FnOnce(&mut SchemaBuilder) -> std::result::Result<(), StoreError>,
    ) -> Result<u64> {
        let mut current = self.schema.write();
        let mut builder = current.to_builder();
        edit(&mut builder)?;
        let next = builder.build();
        let version = next.version();
        *current = Arc::new(next);
        tracing::debug!(version, "schema updated");
        Ok(version)
    }

    /// Committed rules, label-ordered.
    pub fn committed_rules(&self) -> Vec<(u64, RuleDefinition)> {
        self.catalog.read().rules.values().cloned().collect()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let schema = self.schema();
        let catalog = self.catalog.read();
        Snapshot {
            schema,
            rules: catalog.rules.values().cloned().collect(),
            rule_versions: catalog.versions.clone(),
        }
    }

    /// Check `pending` against what changed since `snapshot`, then run
    /// `finish` and publish its changes. The catalog stays locked throughout
    /// so two commits can never both pass the check.
    pub(crate) fn publish(
        &self,
        snapshot: &Snapshot,
        pending: &RuleChanges,
        finish: impl FnOnce() -> Result<RuleChanges>,
    ) -> Result<RuleChanges> {
        let mut catalog = self.catalog.write();
        let schema = self.schema();

        for label in pending.labels() {
            let now = catalog.versions.get(label);
            if now != snapshot.rule_versions.get(label) {
                tracing::warn!(rule = %label, "rule was committed concurrently");
                return Err(Error::StaleWrite(format!(
                    "rule `{label}` was changed by another transaction"
                )));
            }
        }
        if schema.version() != snapshot.schema.version() {
            for (_, definition) in &pending.upserts {
                for label in definition_labels(definition) {
                    let changed = schema
                        .label_version(&label)
                        .map_or(true, |v| v > snapshot.schema.version());
                    if changed {
                        tracing::warn!(rule = %definition.label, %label, "schema changed under rule");
                        return Err(Error::StaleWrite(format!(
                            "type `{label}` used by rule `{}` changed since the transaction opened",
                            definition.label
                        )));
                    }
                }
            }
        }

        let changes = finish()?;
        if changes.is_empty() {
            return Ok(changes);
        }
        catalog.version += 1;
        let version = catalog.version;
        for label in &changes.deletes {
            catalog.rules.remove(label);
            catalog.versions.insert(label.clone(), version);
        }
        for (_, definition) in &changes.upserts {
            // Transactions number rules independently; the catalog owns iids.
            let iid = catalog.next_iid;
            catalog.next_iid += 1;
            catalog.versions.insert(definition.label.clone(), version);
            catalog
                .rules
                .insert(definition.label.clone(), (iid, definition.clone()));
        }
        tracing::debug!(
            version,
            upserts = changes.upserts.len(),
            deletes = changes.deletes.len(),
            "published rule changes"
        );
        Ok(changes)
    }

    // ========================================================================
    // Facts
    // ========================================================================

    pub fn insert_thing(&self, label: &str) -> Result<ConceptId> {
        let label = Label::new(label);
        self.require_kind(&label, TypeKind::Entity)?;
        Ok(self.store.insert_thing(&label))
    }

    /// Store a relation; each player must be a thing whose type may play its
    /// position.
    pub fn insert_relation(&self, label: &str, players: &[Concept]) -> Result<()> {
        let label = Label::new(label);
        let schema = self.schema();
        self.require_kind(&label, TypeKind::Relation)?;
        if schema.arity(&label) != Some(players.len()) {
            return Err(StoreError::NoSuchPosition {
                relation: label,
                position: players.len(),
            }
            .into());
        }
        for (position, player) in players.iter().enumerate() {
            let allowed = schema.player_types(&label, position)?;
            let player_type = match player.as_thing() {
                Some(id) => self.store.type_of(id)?,
                None => None,
            };
            if !player_type.is_some_and(|t| allowed.contains(&t)) {
                return Err(StoreError::KindMismatch {
                    label,
                    expected: "a player type permitted at this position",
                }
                .into());
            }
        }
        Ok(self.store.insert_relation(&label, players)?)
    }

    pub fn insert_has(&self, owner: ConceptId, attribute: &str, value: Value) -> Result<()> {
        let attribute = Label::new(attribute);
        let schema = self.schema();
        self.require_kind(&attribute, TypeKind::Attribute)?;
        if schema.value_type(&attribute) != Some(value.value_type()) {
            return Err(StoreError::KindMismatch {
                label: attribute,
                expected: "a value of the attribute's value type",
            }
            .into());
        }
        let owner_type = self.store.type_of(owner)?;
        if !owner_type.is_some_and(|t| schema.owner_types(&attribute).contains(&t)) {
            return Err(StoreError::KindMismatch {
                label: attribute,
                expected: "an owner type that owns this attribute",
            }
            .into());
        }
        self.store.insert_has(owner, &attribute, value);
        Ok(())
    }

    fn require_kind(&self, label: &Label, kind: TypeKind) -> Result<()> {
        match self.schema().kind(label) {
            Some(k) if k == kind => Ok(()),
            Some(_) => Err(StoreError::KindMismatch {
                label: label.clone(),
                expected: match kind {
                    TypeKind::Entity => "an entity type",
                    TypeKind::Relation => "a relation type",
                    TypeKind::Attribute => "an attribute type",
                },
            }
            .into()),
            None => Err(Error::UnknownType(label.clone())),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("schema_version", &self.schema.read().version())
            .field("rules", &self.catalog.read().rules.len())
            .field("facts", &self.store.key_count())
            .finish()
    }
}

/// Every type label a rule definition names.
fn definition_labels(definition: &RuleDefinition) -> BTreeSet<Label> {
    fn walk(when: &Conjunction, out: &mut BTreeSet<Label>) {
        out.extend(when.atoms.iter().filter_map(Atom::type_label).cloned());
        for negated in &when.negations {
            walk(negated, out);
        }
    }
    let mut out = BTreeSet::new();
    walk(&definition.when, &mut out);
    out.insert(definition.then.label().clone());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use typegraph_pattern::ValueType;

    fn database() -> Database {
        let mut b = Schema::builder();
        b.entity("person", None).unwrap();
        b.entity("company", None).unwrap();
        b.relation("employment", None, &["person", "company"]).unwrap();
        b.attribute("name", None, ValueType::String).unwrap();
        b.owns("person", "name").unwrap();
        Database::new(b.build())
    }

    #[test]
    fn inserts_are_checked_against_the_schema() {
        let db = database();
        let alice = db.insert_thing("person").unwrap();
        let acme = db.insert_thing("company").unwrap();

        assert!(matches!(db.insert_thing("employment"), Err(Error::Storage(_))));
        assert_eq!(
            db.insert_thing("ghost"),
            Err(Error::UnknownType(Label::new("ghost")))
        );
        db.insert_relation("employment", &[alice.into(), acme.into()]).unwrap();
        assert!(db.insert_relation("employment", &[acme.into(), alice.into()]).is_err());
        assert!(db.insert_relation("employment", &[alice.into()]).is_err());

        db.insert_has(alice, "name", Value::String("Alice".into())).unwrap();
        assert!(db.insert_has(acme, "name", Value::String("Acme".into())).is_err());
        assert!(db.insert_has(alice, "name", Value::Long(1)).is_err());
    }

    #[test]
    fn schema_updates_bump_the_version() {
        let db = database();
        let before = db.schema().version();
        let after = db
            .update_schema(|b| {
                b.entity("dog", None)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(after, before + 1);
        assert!(db.schema().contains(&Label::new("dog")));

        let failed = db.update_schema(|b| {
            b.entity("", None)?;
            Ok(())
        });
        assert!(failed.is_err());
        assert_eq!(db.schema().version(), after);
    }
}
