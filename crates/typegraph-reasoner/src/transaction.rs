//! Transaction-scoped reasoning state.
//!
//! A transaction snapshots the database's schema and rule catalog when it
//! opens and owns everything derived from them: its lock manager, rule
//! store, type reasoner and caches. Nothing here is shared between
//! transactions. Closing (or dropping) a transaction cancels every answer
//! stream it produced.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use typegraph_pattern::{ConceptMap, Conjunction, RuleDefinition};
use typegraph_store::{FactStore, Schema, TypeHierarchy};

use crate::config::ReasonerConfig;
use crate::database::{Database, Snapshot};
use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::resolver::{AnswerStream, Resolver};
use crate::rule::{Rule, RuleChanges, RuleStore};
use crate::type_reasoner::TypeReasoner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    Read,
    Write,
}

pub struct Transaction {
    id: Uuid,
    mode: TransactionMode,
    db: Arc<Database>,
    snapshot: Snapshot,
    locks: Arc<LockManager>,
    rules: Arc<RuleStore>,
    types: Arc<TypeReasoner>,
    resolver: Resolver,
    cancel: Arc<AtomicBool>,
    committed: AtomicBool,
}

impl Transaction {
    pub fn open(db: &Arc<Database>, mode: TransactionMode, config: ReasonerConfig) -> Self {
        let id = Uuid::new_v4();
        let snapshot = db.snapshot();
        let schema: Arc<dyn TypeHierarchy> = snapshot.schema.clone();
        let store: Arc<dyn FactStore> = Arc::new(db.store().clone());
        let locks = Arc::new(LockManager::new());
        let rules = Arc::new(RuleStore::load(
            schema.clone(),
            locks.clone(),
            &config.cache,
            snapshot.rules.iter().cloned(),
        ));
        let types = Arc::new(TypeReasoner::new(
            schema.clone(),
            store.clone(),
            rules.clone(),
            &config,
        ));
        let cancel = Arc::new(AtomicBool::new(false));
        let resolver = Resolver::new(schema, store, rules.clone(), types.clone(), config, cancel.clone());
        tracing::debug!(
            txn = %id,
            ?mode,
            schema_version = snapshot.schema.version(),
            rules = snapshot.rules.len(),
            "opened transaction"
        );
        Self {
            id,
            mode,
            db: db.clone(),
            snapshot,
            locks,
            rules,
            types,
            resolver,
            cancel,
            committed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// The schema as of opening.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.snapshot.schema
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn types(&self) -> &TypeReasoner {
        &self.types
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn is_open(&self) -> bool {
        !self.cancel.load(Ordering::SeqCst)
    }

    pub fn get_rule(&self, label: &str) -> Option<Rule> {
        self.rules.get(label)
    }

    pub fn declare_rule(&self, definition: RuleDefinition) -> Result<Rule> {
        self.writable()?;
        self.rules.declare(definition)
    }

    pub fn delete_rule(&self, label: &str) -> Result<()> {
        self.writable()?;
        let rule = self
            .rules
            .get(label)
            .ok_or_else(|| Error::UnknownRule(label.to_string()))?;
        self.rules.delete(&rule)
    }

    /// Answers to `conjunction` extending `seed`. On a closed transaction
    /// the stream reports `Cancelled` straight away.
    pub fn resolve(&self, conjunction: Conjunction, seed: ConceptMap) -> AnswerStream {
        self.resolver.resolve(conjunction, seed)
    }

    /// Publish the rule changes made in this transaction.
    ///
    /// Fails with `StaleWrite`, leaving the transaction uncommitted, when
    /// another transaction committed one of the same rule labels, or the
    /// schema changed a type one of the written rules uses.
    pub fn commit(&self) -> Result<RuleChanges> {
        self.writable()?;
        if self.committed.load(Ordering::SeqCst) {
            return Err(Error::AlreadyCommitted);
        }
        let pending = self.rules.pending();
        let changes = self
            .db
            .publish(&self.snapshot, &pending, || self.rules.commit())?;
        self.committed.store(true, Ordering::SeqCst);
        tracing::debug!(
            txn = %self.id,
            rules = ?changes.labels(),
            "committed transaction"
        );
        Ok(changes)
    }

    /// Stop every in-flight resolution. Idempotent.
    pub fn close(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            tracing::debug!(txn = %self.id, committed = self.committed.load(Ordering::SeqCst), "closed transaction");
        }
    }

    fn writable(&self) -> Result<()> {
        match self.mode {
            TransactionMode::Read => Err(Error::ReadOnlyTransaction),
            TransactionMode::Write if self.committed.load(Ordering::SeqCst) => Err(Error::AlreadyCommitted),
            TransactionMode::Write => Ok(()),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("committed", &self.committed.load(Ordering::SeqCst))
            .finish()
    }
}
