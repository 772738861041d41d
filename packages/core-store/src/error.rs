//! Error types shared by every devstore layer.

use thiserror::Error;

use crate::path::{Path, PathError};

/// Errors surfaced by paths, transactions, diffs and composite reads.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed path text, or a path operation that is invalid at the root.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// A read matched more than one node.
    #[error("ambiguous read at {path}: {matches} nodes matched")]
    AmbiguousRead { path: Path, matches: usize },

    /// The transaction was already committed or aborted.
    #[error("transaction already finalized")]
    TransactionFinalized,

    /// Another transaction is already open on this datastore.
    #[error("a transaction is already open")]
    TransactionConflict,

    /// The working tree of a module failed schema validation.
    #[error("validation failed for module '{module}': {message}")]
    ValidationFailure { module: String, message: String },

    /// There is nothing to diff against.
    #[error("diff unavailable: no committed baseline and no pending changes")]
    DiffUnavailable,

    /// A device reader failed or timed out.
    #[error("read failed at {path}: {message}")]
    ReadFailure { path: Path, message: String },

    /// A payload cannot be placed at the addressed path.
    #[error("invalid value at {path}: {message}")]
    InvalidValue { path: Path, message: String },

    /// A reader registry could not be built.
    #[error("invalid reader registry: {message}")]
    InvalidRegistry { message: String },
}

impl Error {
    /// Create a read failure.
    pub fn read_failure(path: &Path, message: impl Into<String>) -> Self {
        Error::ReadFailure {
            path: path.clone(),
            message: message.into(),
        }
    }

    /// Create an invalid value error.
    pub fn invalid_value(path: &Path, message: impl Into<String>) -> Self {
        Error::InvalidValue {
            path: path.clone(),
            message: message.into(),
        }
    }
}

/// Result type alias for devstore operations.
pub type Result<T> = std::result::Result<T, Error>;
