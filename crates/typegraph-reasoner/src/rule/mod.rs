//! Rule store: declared rules and the reverse indices from a type to the
//! rules that can conclude facts of it.
//!
//! - `structure`: `RuleStructure`, the persisted rule with its modification
//!   flags, and the `RuleIndex` buckets it maintains
//! - `validate`: declaration checks and stratification
//!
//! All index mutation happens under named locks: `rule:<label>` for the rule
//! itself and `type:<label>` for each touched index bucket.

pub mod structure;
mod validate;

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use typegraph_pattern::{Atom, Conclusion, Conjunction, Label, RuleDefinition};
use typegraph_store::TypeHierarchy;

use crate::cache::CommonCache;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::lock::{rule_lock_name, type_lock_name, LockManager};

pub use structure::{RuleIndex, RuleStructure};

// ============================================================================
// Rule
// ============================================================================

/// A declared rule as seen by resolution. Cheap to clone.
#[derive(Clone)]
pub struct Rule {
    structure: Arc<RuleStructure>,
    positive_types: Arc<BTreeSet<Label>>,
    negative_types: Arc<BTreeSet<Label>>,
}

impl Rule {
    fn new(structure: RuleStructure) -> Self {
        let when = &structure.definition().when;
        let positive_types = when.atoms.iter().filter_map(Atom::type_label).cloned().collect();
        let mut negative_types = BTreeSet::new();
        collect_negated_types(when, &mut negative_types);
        Self {
            structure: Arc::new(structure),
            positive_types: Arc::new(positive_types),
            negative_types: Arc::new(negative_types),
        }
    }

    pub fn label(&self) -> &str {
        self.structure.label()
    }

    pub fn when(&self) -> &Conjunction {
        &self.structure.definition().when
    }

    pub fn then(&self) -> &Conclusion {
        &self.structure.definition().then
    }

    pub fn definition(&self) -> &RuleDefinition {
        self.structure.definition()
    }

    pub fn structure(&self) -> &RuleStructure {
        &self.structure
    }

    pub fn is_deleted(&self) -> bool {
        self.structure.is_deleted()
    }

    /// Types named by the positive atoms of the condition.
    pub fn positive_types(&self) -> &BTreeSet<Label> {
        &self.positive_types
    }

    /// Types named anywhere under negation in the condition.
    pub fn negative_types(&self) -> &BTreeSet<Label> {
        &self.negative_types
    }

    pub fn conclusion_type(&self) -> &Label {
        self.then().label()
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.structure, &other.structure)
    }
}

impl Eq for Rule {}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.definition())
    }
}

fn collect_negated_types(when: &Conjunction, out: &mut BTreeSet<Label>) {
    for negated in &when.negations {
        out.extend(negated.atoms.iter().filter_map(Atom::type_label).cloned());
        collect_negated_types(negated, out);
    }
}

/// Rule catalog changes produced by a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleChanges {
    pub upserts: Vec<(u64, RuleDefinition)>,
    pub deletes: Vec<String>,
}

impl RuleChanges {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }

    /// Every rule label written or removed.
    pub fn labels(&self) -> BTreeSet<&str> {
        self.upserts
            .iter()
            .map(|(_, d)| d.label.as_str())
            .chain(self.deletes.iter().map(String::as_str))
            .collect()
    }
}

// ============================================================================
// RuleStore
// ============================================================================

pub struct RuleStore {
    schema: Arc<dyn TypeHierarchy>,
    locks: Arc<LockManager>,
    index: Arc<RuleIndex>,
    /// Includes soft-deleted rules until commit.
    rules: RwLock<BTreeMap<String, Rule>>,
    /// Labels present when the store was opened.
    loaded: BTreeSet<String>,
    next_iid: AtomicU64,
    /// Bumped whenever the set of live rules changes.
    revision: AtomicU64,
    concluding: CommonCache<Label, Vec<Rule>>,
}

impl RuleStore {
    pub fn new(schema: Arc<dyn TypeHierarchy>, locks: Arc<LockManager>, cache: &CacheConfig) -> Self {
        Self::load(schema, locks, cache, std::iter::empty())
    }

    /// Open over already-committed rules.
    pub fn load(
        schema: Arc<dyn TypeHierarchy>,
        locks: Arc<LockManager>,
        cache: &CacheConfig,
        committed: impl IntoIterator<Item = (u64, RuleDefinition)>,
    ) -> Self {
        let index = Arc::new(RuleIndex::default());
        let mut rules = BTreeMap::new();
        let mut max_iid = 0;
        for (iid, definition) in committed {
            max_iid = max_iid.max(iid);
            let structure = RuleStructure::new(iid, definition, index.clone(), locks.clone());
            structure.index();
            rules.insert(structure.label().to_string(), Rule::new(structure));
        }
        Self {
            schema,
            locks,
            index,
            loaded: rules.keys().cloned().collect(),
            rules: RwLock::new(rules),
            next_iid: AtomicU64::new(max_iid + 1),
            revision: AtomicU64::new(0),
            concluding: CommonCache::new(cache),
        }
    }

    pub fn declare(&self, definition: RuleDefinition) -> Result<Rule> {
        let label = definition.label.clone();
        let names = [
            rule_lock_name(&label),
            type_lock_name(definition.then.label().as_str()),
        ];
        self.locks.with_locks(names, || {
            if self.get(&label).is_some() {
                return Err(Error::DuplicateLabel(label.clone()));
            }
            validate::validate(&definition, self.schema.as_ref())?;
            {
                let rules = self.rules.read();
                let live = rules
                    .values()
                    .filter(|r| !r.is_deleted() && r.label() != label)
                    .map(Rule::definition);
                validate::check_stratified(live.chain([&definition]), self.schema.as_ref())?;
            }

            let iid = self.next_iid.fetch_add(1, Ordering::SeqCst);
            let structure = RuleStructure::new(iid, definition, self.index.clone(), self.locks.clone());
            structure.set_modified();
            structure.index();
            let rule = Rule::new(structure);
            self.rules.write().insert(label.clone(), rule.clone());
            self.invalidate_concluding(rule.conclusion_type());
            self.revision.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(rule = %label, iid, "declared rule");
            Ok(rule)
        })
    }

    /// A live rule by label.
    pub fn get(&self, label: &str) -> Option<Rule> {
        self.rules
            .read()
            .get(label)
            .filter(|r| !r.is_deleted())
            .cloned()
    }

    pub fn delete(&self, rule: &Rule) -> Result<()> {
        let label = rule.label().to_string();
        let names = [
            rule_lock_name(&label),
            type_lock_name(rule.conclusion_type().as_str()),
        ];
        self.locks.with_locks(names, || {
            let current = self.get(&label).ok_or_else(|| Error::UnknownRule(label.clone()))?;
            current.structure().delete();
            self.invalidate_concluding(current.conclusion_type());
            self.revision.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(rule = %label, "deleted rule");
            Ok(())
        })
    }

    /// Live rules whose conclusion can produce a fact of `label` or of any
    /// of its subtypes, label-ordered.
    pub fn rules_concluding_type(&self, label: &Label) -> Result<Vec<Rule>> {
        self.concluding.get(label.clone(), |label| {
            let mut names = BTreeSet::new();
            for sub in self.schema.subtypes_transitive(label) {
                let lock = self.locks.get_lock(&type_lock_name(sub.as_str()));
                let _guard = lock.lock();
                names.extend(self.index.vertex_rules(&sub));
                names.extend(self.index.edge_rules(&sub));
            }
            let rules = self.rules.read();
            Ok(names
                .iter()
                .filter_map(|name| rules.get(name))
                .filter(|r| !r.is_deleted())
                .cloned()
                .collect())
        })
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Whether any live rule concludes `label` or one of its subtypes.
    pub fn concludes(&self, label: &Label) -> Result<bool> {
        Ok(!self.rules_concluding_type(label)?.is_empty())
    }

    /// A fresh snapshot of every live rule, label-ordered.
    pub fn rules(&self) -> impl Iterator<Item = Rule> {
        let snapshot: Vec<Rule> = self
            .rules
            .read()
            .values()
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect();
        snapshot.into_iter()
    }

    /// Changes that a commit would publish.
    pub fn pending(&self) -> RuleChanges {
        let rules = self.rules.read();
        let mut changes = RuleChanges::default();
        for (label, rule) in rules.iter() {
            if rule.is_deleted() {
                if self.loaded.contains(label) {
                    changes.deletes.push(label.clone());
                }
            } else if rule.structure().is_modified() {
                changes.upserts.push((rule.structure().iid(), rule.definition().clone()));
            }
        }
        changes
    }

    /// Finalise every pending rule and drop deleted ones. Valid once.
    pub fn commit(&self) -> Result<RuleChanges> {
        let changes = self.pending();
        let mut rules = self.rules.write();
        for rule in rules.values() {
            let lock = self.locks.get_lock(&rule_lock_name(rule.label()));
            let _guard = lock.lock();
            rule.structure().commit()?;
        }
        rules.retain(|_, r| !r.is_deleted());
        drop(rules);
        self.concluding.clear();
        tracing::debug!(
            upserts = changes.upserts.len(),
            deletes = changes.deletes.len(),
            "committed rules"
        );
        Ok(changes)
    }

    fn invalidate_concluding(&self, concluded: &Label) {
        let affected: BTreeSet<Label> = self.schema.supertypes_transitive(concluded).into_iter().collect();
        self.concluding.invalidate_where(|k| affected.contains(k));
    }
}
