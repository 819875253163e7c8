use thiserror::Error;
use typegraph_pattern::Label;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("iterator is exhausted")]
    ExhaustedIterator,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt key at byte {offset}: {message}")]
    CorruptKey { offset: usize, message: String },

    #[error("type `{0}` is not defined")]
    UnknownType(Label),

    #[error("type `{0}` is already defined")]
    DuplicateType(Label),

    #[error("invalid type label {0:?}")]
    InvalidLabel(String),

    #[error("type `{label}` is not {expected}")]
    KindMismatch { label: Label, expected: &'static str },

    #[error("relation `{relation}` has no player position {position}")]
    NoSuchPosition { relation: Label, position: usize },
}
