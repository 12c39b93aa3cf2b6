//! Directory tree comparison for treecmp.
//!
//! Walks two roots concurrently, pairs their entries by relative path and
//! sorts every path into exactly one of eight categories: left-only dirs and
//! files, right-only dirs and files, common dirs, common files, different
//! files, and "funny" paths that cannot be compared (type mismatches,
//! unreadable entries).
//!
//! ```no_run
//! # async fn demo() -> treecmp_diff::Result<()> {
//! use treecmp_diff::{compare, Category, CompareOptions};
//!
//! let diff = compare("/srv/a", "/srv/b", CompareOptions::default()).await?;
//! for path in diff.paths(Category::Different) {
//!     println!("changed: {path}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Key Types
//!
//! - [`TreeComparator`] / [`compare`] -- Run a comparison
//! - [`DiffResult`] / [`CategoryMap`] -- Concurrent per-category results
//! - [`Category`] -- The eight outcome categories
//! - [`CompareOptions`] -- Walk, chunking and attribute settings
//! - [`ContentComparator`] / [`FileChunks`] -- Streamed file comparison
//! - [`Expectation`] -- Exact-match assertions for test harnesses

pub mod aggregator;
pub mod category;
pub mod classify;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod expect;
pub mod matcher;

pub use aggregator::{CategoryMap, DiffReport, DiffResult};
pub use category::Category;
pub use classify::{Changed, Classification, EntryPair, Funny, FunnyReason};
pub use config::{AttrChecks, CompareOptions, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use content::{ContentComparator, ContentError, DiffCause, FileChunks, Verdict};
pub use engine::{compare, TreeComparator};
pub use error::{CompareError, Result};
pub use expect::{ExpectError, Expectation};
pub use matcher::{PathMatcher, Side};

pub use treecmp_walk::{CancelFlag, Entry, EntryKind, EntryTypes, WalkOptions};
