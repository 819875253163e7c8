use thiserror::Error;
use typegraph_pattern::{Label, Variable};
use typegraph_store::StoreError;

/// Failures that cross the reasoner's boundary.
///
/// Branch pruning (an atom with no possible types) and recursion cycle cuts
/// are internal control flow and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("a rule labelled `{0}` already exists")]
    DuplicateLabel(String),

    #[error("no rule labelled `{0}`")]
    UnknownRule(String),

    #[error("stale write: {0}")]
    StaleWrite(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("resolution was cancelled")]
    Cancelled,

    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    #[error("transaction was already committed")]
    AlreadyCommitted,

    #[error("type `{0}` is not defined in the schema")]
    UnknownType(Label),

    #[error("rule `{rule}` has an invalid conclusion: {reason}")]
    InvalidConclusion { rule: String, reason: String },

    #[error("rule `{rule}` has an invalid condition: {reason}")]
    InvalidCondition { rule: String, reason: String },

    #[error("rule `{rule}` concludes variable {variable} which its condition never binds")]
    UnboundConclusionVariable { rule: String, variable: Variable },

    #[error("rules {0:?} form a cycle through negation")]
    NegationCycle(Vec<String>),

    #[error("variable {0} is only constrained by value comparisons")]
    UnboundVariable(Variable),
}

pub type Result<T> = std::result::Result<T, Error>;
