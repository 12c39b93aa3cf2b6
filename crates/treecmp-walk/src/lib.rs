//! Concurrent directory walker for treecmp.
//!
//! Enumerates one directory tree with a bounded pool of tokio tasks and
//! produces an unordered stream of [`Entry`] values. Each entry carries its
//! path relative to the walk root, so two walks over different roots can be
//! matched path-for-path.
//!
//! # Key Types
//!
//! - [`Walker`] / [`EntryStream`] -- Start a walk and consume its entries
//! - [`Entry`] / [`EntryKind`] -- One filesystem object with its metadata
//! - [`EntryError`] -- A per-entry failure captured instead of aborting
//! - [`WalkOptions`] / [`EntryTypes`] -- Concurrency and type filter
//! - [`CancelFlag`] -- Cooperative cancellation shared across workers

pub mod cancel;
pub mod entry;
pub mod error;
pub mod options;
pub mod walker;

pub use cancel::CancelFlag;
pub use entry::{
    decode_rel, encode_name, join_rel, Entry, EntryError, EntryErrorKind, EntryKind, FileId,
};
pub use error::{Result, WalkError};
pub use options::{EntryTypes, WalkOptions};
pub use walker::{EntryStream, Walker};
