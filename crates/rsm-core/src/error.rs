//! Error types for the reducer layer.

use thiserror::Error;

/// Errors raised when a mutation cannot be applied to a state slot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    #[error("Undeclared state key: {0}")]
    UndeclaredKey(String),

    #[error("State key '{0}' does not hold an array")]
    NotAnArray(String),

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },
}

pub type Result<T> = std::result::Result<T, ReduceError>;
