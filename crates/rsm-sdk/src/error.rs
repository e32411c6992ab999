//! Error types for the RSM SDK.

use thiserror::Error;

/// Failures delivered by a remote source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Remote error: {0}")]
    Other(String),
}

/// Error type for binding operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The source is neither a document nor a query.
    #[error("Invalid binding source for key '{0}'")]
    InvalidSource(String),

    /// The key was not declared on the state before binding.
    #[error("Cannot bind undeclared key '{0}'. Declare it on the state first.")]
    UndeclaredKey(String),

    /// The remote source reported a failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The binding was torn down before it became ready.
    #[error("Binding for '{0}' was removed before it became ready")]
    Unbound(String),
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, BindError>;
