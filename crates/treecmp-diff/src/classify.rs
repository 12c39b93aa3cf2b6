//! Classifier: decides the category of a path once both sides are known.
//!
//! | left        | right       | outcome                        |
//! |-------------|-------------|--------------------------------|
//! | absent      | dir / other | right-only dirs / files        |
//! | dir / other | absent      | left-only dirs / files         |
//! | dir         | dir         | common dirs                    |
//! | file        | file        | content comparison             |
//! | symlink     | symlink     | link target comparison         |
//! | mismatch or error         || funny                         |
//! | socket / device / other   || funny (unsupported)           |

use std::fmt;

use serde::{Deserialize, Serialize};
use treecmp_walk::{Entry, EntryError, EntryKind};

use crate::category::Category;
use crate::content::DiffCause;
use crate::matcher::Side;

/// Both sides of a matched path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPair {
    pub left: Entry,
    pub right: Entry,
}

impl EntryPair {
    pub fn path(&self) -> &str {
        &self.left.path
    }
}

/// A matched file pair whose contents or checked attributes differ.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changed {
    pub left: Entry,
    pub right: Entry,
    pub cause: DiffCause,
}

/// Why a path could not be meaningfully compared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FunnyReason {
    /// The two sides have different types.
    TypeMismatch { left: EntryKind, right: EntryKind },
    /// A side could not be stat'd, listed or resolved during the walk.
    EntryError { side: Side, error: EntryError },
    /// Both sides share a type with no content model.
    Unsupported { kind: EntryKind },
    /// Reading contents failed during comparison.
    ReadError { side: Side, message: String },
}

impl fmt::Display for FunnyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunnyReason::TypeMismatch { left, right } => {
                write!(f, "type mismatch: {left} vs {right}")
            }
            FunnyReason::EntryError { side, error } => write!(f, "{side}: {error}"),
            FunnyReason::Unsupported { kind } => write!(f, "unsupported type: {kind}"),
            FunnyReason::ReadError { side, message } => {
                write!(f, "{side}: read failed: {message}")
            }
        }
    }
}

/// A path that landed in the funny category, with whatever metadata exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Funny {
    pub path: String,
    pub left: Option<Entry>,
    pub right: Option<Entry>,
    pub reason: FunnyReason,
}

/// Final decision for one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    LeftOnly(Entry),
    RightOnly(Entry),
    CommonDir(EntryPair),
    CommonFile(EntryPair),
    Different(Changed),
    Funny(Funny),
}

impl Classification {
    pub fn category(&self) -> Category {
        match self {
            Classification::LeftOnly(e) if e.is_dir() => Category::LeftDirs,
            Classification::LeftOnly(_) => Category::LeftFiles,
            Classification::RightOnly(e) if e.is_dir() => Category::RightDirs,
            Classification::RightOnly(_) => Category::RightFiles,
            Classification::CommonDir(_) => Category::CommonDirs,
            Classification::CommonFile(_) => Category::CommonFiles,
            Classification::Different(_) => Category::Different,
            Classification::Funny(_) => Category::Funny,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Classification::LeftOnly(e) | Classification::RightOnly(e) => &e.path,
            Classification::CommonDir(p) | Classification::CommonFile(p) => p.path(),
            Classification::Different(c) => &c.left.path,
            Classification::Funny(f) => &f.path,
        }
    }
}

/// What to do with a matched pair.
#[derive(Debug)]
pub enum Decision {
    /// Classified without touching contents.
    Done(Classification),
    /// Regular files: compare contents.
    CompareFiles(EntryPair),
    /// Unfollowed symlinks: compare targets.
    CompareLinks(EntryPair),
}

/// Classify a path seen on both sides.
pub fn classify_pair(left: Entry, right: Entry) -> Decision {
    let reason = if let Some(error) = left.error.clone() {
        Some(FunnyReason::EntryError {
            side: Side::Left,
            error,
        })
    } else if let Some(error) = right.error.clone() {
        Some(FunnyReason::EntryError {
            side: Side::Right,
            error,
        })
    } else if left.kind != right.kind {
        Some(FunnyReason::TypeMismatch {
            left: left.kind,
            right: right.kind,
        })
    } else {
        match left.kind {
            EntryKind::Dir | EntryKind::File | EntryKind::Symlink => None,
            kind => Some(FunnyReason::Unsupported { kind }),
        }
    };

    if let Some(reason) = reason {
        return Decision::Done(funny(Some(left), Some(right), reason));
    }

    let pair = EntryPair { left, right };
    match pair.left.kind {
        EntryKind::Dir => Decision::Done(Classification::CommonDir(pair)),
        EntryKind::Symlink => Decision::CompareLinks(pair),
        _ => Decision::CompareFiles(pair),
    }
}

/// Classify a path seen on only one side.
///
/// An entry that carries an error has an untrustworthy type, so it is funny
/// rather than one-sided.
pub fn classify_unmatched(side: Side, entry: Entry) -> Classification {
    if let Some(error) = entry.error.clone() {
        let reason = FunnyReason::EntryError { side, error };
        return match side {
            Side::Left => funny(Some(entry), None, reason),
            Side::Right => funny(None, Some(entry), reason),
        };
    }
    match side {
        Side::Left => Classification::LeftOnly(entry),
        Side::Right => Classification::RightOnly(entry),
    }
}

/// Build a funny classification; the path is taken from whichever side exists.
pub fn funny(left: Option<Entry>, right: Option<Entry>, reason: FunnyReason) -> Classification {
    let path = left
        .as_ref()
        .or(right.as_ref())
        .map(|e| e.path.clone())
        .unwrap_or_default();
    Classification::Funny(Funny {
        path,
        left,
        right,
        reason,
    })
}
