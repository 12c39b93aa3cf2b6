//! Error types for the diff crate.

use treecmp_walk::WalkError;

use crate::category::Category;
use crate::matcher::Side;

/// Errors that abort a comparison. No partial result accompanies them.
///
/// Per-entry problems (unreadable files, type mismatches) are not errors:
/// they are recorded in the funny category of the result.
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    /// A root could not be walked.
    #[error("walk error: {0}")]
    Walk(#[from] WalkError),

    /// The run was cancelled.
    #[error("comparison cancelled")]
    Cancelled,

    /// A path was classified twice. Indicates a matcher bug.
    #[error("path {path} already recorded as {existing}, refused {attempted}")]
    DuplicatePath {
        path: String,
        existing: Category,
        attempted: Category,
    },

    /// A walker reported the same relative path twice.
    #[error("{side} walker emitted {path} twice")]
    DuplicateEntry { side: Side, path: String },

    /// A comparison worker failed outside of normal I/O.
    #[error("worker failure: {0}")]
    Worker(String),

    /// Options or a config file are unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error outside of any single entry, e.g. reading a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompareError {
    /// Internal faults are bugs, not environmental failures.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CompareError::DuplicatePath { .. }
                | CompareError::DuplicateEntry { .. }
                | CompareError::Worker(_)
        )
    }
}

/// Convenience alias for diff results.
pub type Result<T> = std::result::Result<T, CompareError>;
