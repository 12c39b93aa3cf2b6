//! Error types for the walk crate.

use std::io;
use std::path::PathBuf;

/// Fatal errors that abort a walk before it produces any entries.
///
/// Failures below the root are never reported here; they travel on the
/// affected [`Entry`](crate::Entry) as an [`EntryError`](crate::EntryError).
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// The root path does not exist.
    #[error("root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    /// The root path exists but is not a directory.
    #[error("root is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),

    /// The root could not be stat'd or listed.
    #[error("cannot read root {}: {source}", path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The walk options are unusable.
    #[error("invalid walk options: {0}")]
    InvalidOptions(String),

    /// The walk was cancelled before it started.
    #[error("walk cancelled")]
    Cancelled,
}

/// Convenience alias for walk results.
pub type Result<T> = std::result::Result<T, WalkError>;
