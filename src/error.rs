use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("failed to allocate a list node ({size} bytes, align {align})")]
    Alloc { size: usize, align: usize },

    #[error("list is out of order at position {index}")]
    Unsorted { index: usize },

    #[error("key {key}: expected {expected} occurrences, found {actual}")]
    CountMismatch {
        key: u64,
        /// signed: a negative net means more successful removes than inserts
        expected: i64,
        actual: usize,
    },

    #[error("list holds {actual} nodes, expected {expected}")]
    LengthMismatch { expected: i64, actual: usize },

    #[error("invalid workload: {reason}")]
    InvalidWorkload { reason: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
