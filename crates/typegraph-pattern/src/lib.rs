//! Typegraph pattern AST
//!
//! This crate defines the already-parsed query surface consumed by the
//! reasoner: conjunctions of atoms over schema-typed concepts, rule
//! definitions, and the concept maps (substitutions) produced as answers.
//!
//! The AST is a closed set of tagged variants so every consumer (type
//! inference, planning, resolution) can match on it exhaustively. There is no
//! parser here; query syntax is owned by the query language front-end.

pub mod answer;
pub mod atom;
pub mod concept;
pub mod rule;

pub use answer::ConceptMap;
pub use atom::{Atom, Comparator, Conjunction};
pub use concept::{Concept, ConceptId, Label, Term, Value, ValueType, Variable};
pub use rule::{Conclusion, RuleDefinition};
