//! Path matcher: pairs entries from the two walks by relative path.
//!
//! Entries arrive in any order from either side. An entry whose counterpart
//! has not been seen yet waits in a pending table. Once a side finishes,
//! anything still pending from the *other* side can never be matched and is
//! released as one-sided; later arrivals from the other side skip the
//! table entirely.
//!
//! The matcher is owned by the single task that receives both walk streams,
//! so the pending table needs no locking.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use treecmp_walk::Entry;

use crate::error::{CompareError, Result};

/// Which tree an entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Outcome of offering one entry to the matcher.
#[derive(Debug)]
pub enum Matched {
    /// Both sides are now known for this path.
    Pair { left: Entry, right: Entry },
    /// The other side has finished without this path.
    Unmatched(Side, Entry),
    /// Waiting for the other side.
    Pending,
}

/// Pending-match table keyed by relative path.
#[derive(Debug, Default)]
pub struct PathMatcher {
    pending: HashMap<String, (Side, Entry)>,
    finished: [bool; 2],
}

impl PathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an entry from `side`.
    pub fn offer(&mut self, side: Side, entry: Entry) -> Result<Matched> {
        match self.pending.remove(&entry.path) {
            Some((held_side, held)) if held_side == side => {
                let path = entry.path.clone();
                self.pending.insert(path.clone(), (held_side, held));
                Err(CompareError::DuplicateEntry { side, path })
            }
            Some((_, held)) => Ok(match side {
                Side::Left => Matched::Pair {
                    left: entry,
                    right: held,
                },
                Side::Right => Matched::Pair {
                    left: held,
                    right: entry,
                },
            }),
            None if self.is_finished(side.other()) => Ok(Matched::Unmatched(side, entry)),
            None => {
                self.pending.insert(entry.path.clone(), (side, entry));
                Ok(Matched::Pending)
            }
        }
    }

    /// Record that `side` has finished walking. Returns the entries of the
    /// other side that are still waiting, now known to be one-sided.
    pub fn finish(&mut self, side: Side) -> Vec<(Side, Entry)> {
        self.finished[side.index()] = true;
        let orphan_side = side.other();

        let orphaned: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (s, _))| *s == orphan_side)
            .map(|(path, _)| path.clone())
            .collect();

        orphaned
            .into_iter()
            .filter_map(|path| self.pending.remove(&path))
            .collect()
    }

    pub fn is_finished(&self, side: Side) -> bool {
        self.finished[side.index()]
    }

    /// Number of entries waiting for a counterpart.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Both sides finished and nothing left waiting.
    pub fn is_drained(&self) -> bool {
        self.finished.iter().all(|f| *f) && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treecmp_walk::{EntryError, EntryErrorKind, EntryKind};

    fn entry(path: &str) -> Entry {
        Entry::unreadable(
            path,
            EntryKind::Other,
            EntryError::new(EntryErrorKind::Stat, "fixture"),
        )
    }

    #[test]
    fn pairs_regardless_of_arrival_order() {
        let mut m = PathMatcher::new();
        assert!(matches!(m.offer(Side::Right, entry("a")).unwrap(), Matched::Pending));
        match m.offer(Side::Left, entry("a")).unwrap() {
            Matched::Pair { left, right } => {
                assert_eq!(left.path, "a");
                assert_eq!(right.path, "a");
            }
            other => panic!("expected pair, got {other:?}"),
        }
        assert_eq!(m.pending_len(), 0);
    }

    #[test]
    fn finish_releases_other_sides_pending() {
        let mut m = PathMatcher::new();
        m.offer(Side::Left, entry("l1")).unwrap();
        m.offer(Side::Right, entry("r1")).unwrap();
        m.offer(Side::Right, entry("r2")).unwrap();

        let mut released = m.finish(Side::Left);
        released.sort_by(|a, b| a.1.path.cmp(&b.1.path));
        let paths: Vec<_> = released.iter().map(|(s, e)| (*s, e.path.as_str())).collect();
        assert_eq!(paths, vec![(Side::Right, "r1"), (Side::Right, "r2")]);

        // l1 may still find its partner on the right.
        assert_eq!(m.pending_len(), 1);
        assert!(matches!(
            m.offer(Side::Right, entry("l1")).unwrap(),
            Matched::Pair { .. }
        ));
    }

    #[test]
    fn arrivals_after_other_side_finished_are_unmatched() {
        let mut m = PathMatcher::new();
        m.finish(Side::Left);
        match m.offer(Side::Right, entry("late")).unwrap() {
            Matched::Unmatched(Side::Right, e) => assert_eq!(e.path, "late"),
            other => panic!("expected unmatched, got {other:?}"),
        }
        assert_eq!(m.pending_len(), 0);
    }

    #[test]
    fn duplicate_from_same_side_is_an_error() {
        let mut m = PathMatcher::new();
        m.offer(Side::Left, entry("a")).unwrap();
        let err = m.offer(Side::Left, entry("a")).unwrap_err();
        assert!(matches!(err, CompareError::DuplicateEntry { side: Side::Left, .. }));
        assert_eq!(m.pending_len(), 1);
    }

    #[test]
    fn drained_after_both_finish() {
        let mut m = PathMatcher::new();
        m.offer(Side::Left, entry("a")).unwrap();
        assert!(m.finish(Side::Left).is_empty());
        assert!(!m.is_drained());
        let released = m.finish(Side::Right);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, Side::Left);
        assert!(m.is_drained());
    }

    #[test]
    fn side_other_and_display() {
        assert_eq!(Side::Left.other(), Side::Right);
        assert_eq!(Side::Right.to_string(), "right");
    }
}
