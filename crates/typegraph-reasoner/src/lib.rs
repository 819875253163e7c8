//! Typegraph reasoning core
//!
//! Answers conjunctive pattern queries over a schema-typed graph, applying
//! declared rules recursively on top of stored facts.
//!
//! - `cache`: bounded, idle-expiring memoization with at-most-once compute
//! - `lock`: the named, reentrant lock registry owned by a transaction
//! - `rule`: rule structures, their reverse indices and the rule store
//! - `type_reasoner`: per-atom candidate type inference
//! - `resolver`: planning, tabled recursive resolution and the answer stream
//! - `database` / `transaction`: committed state and the scope that owns
//!   all of the above
//!
//! ```no_run
//! use std::sync::Arc;
//! use typegraph_pattern::{Atom, ConceptMap, Conjunction, Term};
//! use typegraph_reasoner::{Database, ReasonerConfig, Transaction, TransactionMode};
//! use typegraph_store::Schema;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut schema = Schema::builder();
//! schema.entity("person", None)?;
//! schema.relation("parent", None, &["person", "person"])?;
//! let db = Arc::new(Database::new(schema.build()));
//!
//! let txn = Transaction::open(&db, TransactionMode::Read, ReasonerConfig::default());
//! let query = Conjunction::new([Atom::relation("parent", [Term::var("x"), Term::var("y")])]);
//! for answer in txn.resolve(query, ConceptMap::new()) {
//!     println!("{}", answer?.map);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod lock;
pub mod resolver;
pub mod rule;
pub mod transaction;
pub mod type_reasoner;

pub use cache::{Clock, CommonCache, ManualClock, SystemClock};
pub use config::{CacheConfig, ReasonerConfig};
pub use database::Database;
pub use error::{Error, Result};
pub use lock::{LockManager, NamedLock};
pub use resolver::{Answer, AnswerStream, CancelHandle, Explanation, Resolver, ResolverState};
pub use rule::{Rule, RuleChanges, RuleStore, RuleStructure};
pub use transaction::{Transaction, TransactionMode};
pub use type_reasoner::{TypeReasoner, TypedAtom};
