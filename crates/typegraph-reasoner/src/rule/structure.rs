//! Persisted form of a rule and the reverse concludes-indices it maintains.

use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use typegraph_pattern::{Conclusion, Label, RuleDefinition};

use crate::error::{Error, Result};
use crate::lock::{type_lock_name, LockManager};

// ============================================================================
// RuleIndex
// ============================================================================

/// Type label -> labels of the rules concluding facts of exactly that type.
///
/// Buckets are mutated only while holding the bucket's `type:<label>` named
/// lock; readers take the same lock so they never see a half-applied
/// index/unindex pair.
#[derive(Default)]
pub struct RuleIndex {
    vertex: RwLock<AHashMap<Label, BTreeSet<String>>>,
    edge: RwLock<AHashMap<Label, BTreeSet<String>>>,
}

impl RuleIndex {
    /// Rules concluding a relation (vertex) of exactly `label`.
    pub fn vertex_rules(&self, label: &Label) -> BTreeSet<String> {
        self.vertex.read().get(label).cloned().unwrap_or_default()
    }

    /// Rules concluding an ownership edge to exactly the attribute `label`.
    pub fn edge_rules(&self, label: &Label) -> BTreeSet<String> {
        self.edge.read().get(label).cloned().unwrap_or_default()
    }

    fn insert(map: &RwLock<AHashMap<Label, BTreeSet<String>>>, label: &Label, rule: &str) {
        map.write()
            .entry(label.clone())
            .or_default()
            .insert(rule.to_string());
    }

    fn remove(map: &RwLock<AHashMap<Label, BTreeSet<String>>>, label: &Label, rule: &str) {
        let mut map = map.write();
        if let Some(bucket) = map.get_mut(label) {
            bucket.remove(rule);
            if bucket.is_empty() {
                map.remove(label);
            }
        }
    }
}

// ============================================================================
// RuleStructure
// ============================================================================

pub struct RuleStructure {
    iid: u64,
    definition: RuleDefinition,
    modified: AtomicBool,
    deleted: AtomicBool,
    committed: AtomicBool,
    index: Arc<RuleIndex>,
    locks: Arc<LockManager>,
}

impl RuleStructure {
    pub(crate) fn new(
        iid: u64,
        definition: RuleDefinition,
        index: Arc<RuleIndex>,
        locks: Arc<LockManager>,
    ) -> Self {
        Self {
            iid,
            definition,
            modified: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            committed: AtomicBool::new(false),
            index,
            locks,
        }
    }

    pub fn iid(&self) -> u64 {
        self.iid
    }

    pub fn label(&self) -> &str {
        &self.definition.label
    }

    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    pub fn set_modified(&self) {
        self.modified.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Enter this rule into the index bucket of its conclusion.
    pub fn index(&self) {
        match &self.definition.then {
            Conclusion::Relation { label, .. } => self.index_concludes_vertex(label),
            Conclusion::Has { attribute, .. } => self.index_concludes_edge(attribute),
        }
    }

    pub fn unindex(&self) {
        match &self.definition.then {
            Conclusion::Relation { label, .. } => self.unindex_concludes_vertex(label),
            Conclusion::Has { attribute, .. } => self.unindex_concludes_edge(attribute),
        }
    }

    pub fn index_concludes_vertex(&self, label: &Label) {
        let lock = self.locks.get_lock(&type_lock_name(label.as_str()));
        let _guard = lock.lock();
        RuleIndex::insert(&self.index.vertex, label, self.label());
    }

    pub fn unindex_concludes_vertex(&self, label: &Label) {
        let lock = self.locks.get_lock(&type_lock_name(label.as_str()));
        let _guard = lock.lock();
        RuleIndex::remove(&self.index.vertex, label, self.label());
    }

    pub fn index_concludes_edge(&self, label: &Label) {
        let lock = self.locks.get_lock(&type_lock_name(label.as_str()));
        let _guard = lock.lock();
        RuleIndex::insert(&self.index.edge, label, self.label());
    }

    pub fn unindex_concludes_edge(&self, label: &Label) {
        let lock = self.locks.get_lock(&type_lock_name(label.as_str()));
        let _guard = lock.lock();
        RuleIndex::remove(&self.index.edge, label, self.label());
    }

    /// Soft-delete: resolution stops consulting the rule immediately.
    pub fn delete(&self) {
        self.deleted.store(true, Ordering::SeqCst);
        self.set_modified();
        self.unindex();
    }

    /// Finalise this rule's pending state. Valid once; a deleted rule is
    /// unindexed again so a delete racing the commit still leaves the index
    /// consistent.
    pub fn commit(&self) -> Result<()> {
        if self.committed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyCommitted);
        }
        if self.is_deleted() {
            self.unindex();
        }
        self.modified.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for RuleStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStructure")
            .field("iid", &self.iid)
            .field("label", &self.definition.label)
            .field("modified", &self.is_modified())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use typegraph_pattern::{Atom, Conjunction, Term};

    fn structure(index: &Arc<RuleIndex>) -> RuleStructure {
        let definition = RuleDefinition::new(
            "sibling-of-self",
            Conjunction::new([Atom::isa("x", "person")]),
            Conclusion::relation("sibling", [Term::var("x"), Term::var("x")]),
        );
        RuleStructure::new(1, definition, index.clone(), Arc::new(LockManager::new()))
    }

    #[test]
    fn index_and_unindex_are_inverse() {
        let index = Arc::new(RuleIndex::default());
        let rule = structure(&index);
        let sibling = Label::new("sibling");
        rule.index();
        assert!(index.vertex_rules(&sibling).contains("sibling-of-self"));
        assert!(index.edge_rules(&sibling).is_empty());
        rule.unindex();
        assert!(index.vertex_rules(&sibling).is_empty());
        rule.unindex();
        assert!(index.vertex_rules(&sibling).is_empty());
    }

    #[test]
    fn commit_is_valid_once() {
        let index = Arc::new(RuleIndex::default());
        let rule = structure(&index);
        rule.index();
        rule.set_modified();
        rule.delete();
        assert!(rule.is_deleted());
        rule.commit().unwrap();
        assert!(!rule.is_modified());
        assert_eq!(rule.commit(), Err(Error::AlreadyCommitted));
        assert!(index.vertex_rules(&Label::new("sibling")).is_empty());
    }
}
