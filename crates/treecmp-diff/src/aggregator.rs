//! Diff aggregator: the eight concurrent category containers.
//!
//! Each category is a [`CategoryMap`], a hash map split into independently
//! locked shards so that writers touching different paths rarely contend.
//! A ninth sharded map records which category claimed each path; claiming
//! happens first, so a path can never land in two categories.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use treecmp_walk::Entry;

use crate::category::Category;
use crate::classify::{Changed, Classification, EntryPair, Funny};
use crate::error::{CompareError, Result};

const SHARDS: usize = 16;

/// Concurrent map from relative path to per-category metadata.
pub struct CategoryMap<V> {
    shards: Box<[RwLock<HashMap<String, V>>]>,
    hasher: RandomState,
}

impl<V> CategoryMap<V> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, path: &str) -> &RwLock<HashMap<String, V>> {
        let idx = (self.hasher.hash_one(path) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Insert unless the path is already present. Returns whether the value
    /// was inserted.
    pub(crate) fn insert_if_absent(&self, path: String, value: V) -> bool {
        let mut shard = self
            .shard(&path)
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if shard.contains_key(&path) {
            return false;
        }
        shard.insert(path, value);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.shard(path)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|path, _| out.push(path.to_string()));
        out.sort();
        out
    }

    /// Visit every entry. Order is unspecified.
    pub fn for_each(&self, mut f: impl FnMut(&str, &V)) {
        for shard in self.shards.iter() {
            let shard = shard.read().unwrap_or_else(|e| e.into_inner());
            for (path, value) in shard.iter() {
                f(path, value);
            }
        }
    }
}

impl<V: Clone> CategoryMap<V> {
    pub fn get(&self, path: &str) -> Option<V> {
        self.shard(path)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Sorted snapshot of the whole map.
    pub fn snapshot(&self) -> BTreeMap<String, V> {
        let mut out = BTreeMap::new();
        self.for_each(|path, value| {
            out.insert(path.to_string(), value.clone());
        });
        out
    }
}

impl<V> Default for CategoryMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for CategoryMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategoryMap")
            .field("len", &self.len())
            .finish()
    }
}

/// The categorized difference between two trees.
///
/// Written concurrently while a comparison runs; read-only once handed to
/// the caller.
///
/// Only the engine records classifications:
///
/// ```compile_fail
/// use treecmp_diff::{Classification, DiffResult, EntryPair};
///
/// fn tamper(result: &DiffResult, pair: EntryPair) {
///     let _ = result.record(Classification::CommonDir(pair));
/// }
/// ```
#[derive(Debug, Default)]
pub struct DiffResult {
    left_dirs: CategoryMap<Entry>,
    left_files: CategoryMap<Entry>,
    right_dirs: CategoryMap<Entry>,
    right_files: CategoryMap<Entry>,
    common_dirs: CategoryMap<EntryPair>,
    common_files: CategoryMap<EntryPair>,
    different: CategoryMap<Changed>,
    funny: CategoryMap<Funny>,
    claims: CategoryMap<Category>,
}

impl DiffResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a classification. Fails if the path was already recorded in
    /// any category.
    pub(crate) fn record(&self, classification: Classification) -> Result<Category> {
        let category = classification.category();
        let path = classification.path().to_string();

        if !self.claims.insert_if_absent(path.clone(), category) {
            let existing = self.claims.get(&path).unwrap_or(category);
            return Err(CompareError::DuplicatePath {
                path,
                existing,
                attempted: category,
            });
        }

        let key = path.clone();
        let inserted = match classification {
            Classification::LeftOnly(e) if e.is_dir() => self.left_dirs.insert_if_absent(key, e),
            Classification::LeftOnly(e) => self.left_files.insert_if_absent(key, e),
            Classification::RightOnly(e) if e.is_dir() => self.right_dirs.insert_if_absent(key, e),
            Classification::RightOnly(e) => self.right_files.insert_if_absent(key, e),
            Classification::CommonDir(p) => self.common_dirs.insert_if_absent(key, p),
            Classification::CommonFile(p) => self.common_files.insert_if_absent(key, p),
            Classification::Different(c) => self.different.insert_if_absent(key, c),
            Classification::Funny(f) => self.funny.insert_if_absent(key, f),
        };
        if !inserted {
            return Err(CompareError::DuplicatePath {
                path,
                existing: category,
                attempted: category,
            });
        }
        Ok(category)
    }

    pub fn left_dirs(&self) -> &CategoryMap<Entry> {
        &self.left_dirs
    }

    pub fn left_files(&self) -> &CategoryMap<Entry> {
        &self.left_files
    }

    pub fn right_dirs(&self) -> &CategoryMap<Entry> {
        &self.right_dirs
    }

    pub fn right_files(&self) -> &CategoryMap<Entry> {
        &self.right_files
    }

    pub fn common_dirs(&self) -> &CategoryMap<EntryPair> {
        &self.common_dirs
    }

    pub fn common_files(&self) -> &CategoryMap<EntryPair> {
        &self.common_files
    }

    pub fn different(&self) -> &CategoryMap<Changed> {
        &self.different
    }

    pub fn funny(&self) -> &CategoryMap<Funny> {
        &self.funny
    }

    /// Sorted paths of one category.
    pub fn paths(&self, category: Category) -> Vec<String> {
        match category {
            Category::LeftDirs => self.left_dirs.paths(),
            Category::LeftFiles => self.left_files.paths(),
            Category::RightDirs => self.right_dirs.paths(),
            Category::RightFiles => self.right_files.paths(),
            Category::CommonDirs => self.common_dirs.paths(),
            Category::CommonFiles => self.common_files.paths(),
            Category::Different => self.different.paths(),
            Category::Funny => self.funny.paths(),
        }
    }

    /// The category a path was recorded in.
    pub fn category_of(&self, path: &str) -> Option<Category> {
        self.claims.get(path)
    }

    /// Total number of classified paths.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn counts(&self) -> BTreeMap<Category, usize> {
        Category::ALL
            .into_iter()
            .map(|c| (c, self.count(c)))
            .collect()
    }

    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::LeftDirs => self.left_dirs.len(),
            Category::LeftFiles => self.left_files.len(),
            Category::RightDirs => self.right_dirs.len(),
            Category::RightFiles => self.right_files.len(),
            Category::CommonDirs => self.common_dirs.len(),
            Category::CommonFiles => self.common_files.len(),
            Category::Different => self.different.len(),
            Category::Funny => self.funny.len(),
        }
    }

    /// True when the trees hold the same paths with the same contents.
    pub fn is_identical(&self) -> bool {
        Category::ALL
            .into_iter()
            .filter(|c| !matches!(c, Category::CommonDirs | Category::CommonFiles))
            .all(|c| self.count(c) == 0)
    }

    /// Sorted, serializable snapshot.
    pub fn report(&self) -> DiffReport {
        DiffReport {
            left_dirs: self.left_dirs.snapshot(),
            left_files: self.left_files.snapshot(),
            right_dirs: self.right_dirs.snapshot(),
            right_files: self.right_files.snapshot(),
            common_dirs: self.common_dirs.snapshot(),
            common_files: self.common_files.snapshot(),
            different: self.different.snapshot(),
            funny: self.funny.snapshot(),
        }
    }
}

/// Diagnostic rendering, sorted by category then path.
impl fmt::Display for DiffResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for category in Category::ALL {
            let paths = self.paths(category);
            writeln!(f, "{}: {}", category.label(), paths.len())?;
            for path in paths {
                let note = match category {
                    Category::Different => self.different.get(&path).map(|c| c.cause.to_string()),
                    Category::Funny => self.funny.get(&path).map(|x| x.reason.to_string()),
                    _ => None,
                };
                match note {
                    Some(note) => writeln!(f, "    {path} ({note})")?,
                    None => writeln!(f, "    {path}")?,
                }
            }
        }
        Ok(())
    }
}

/// Point-in-time copy of a [`DiffResult`] with deterministic ordering.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub left_dirs: BTreeMap<String, Entry>,
    pub left_files: BTreeMap<String, Entry>,
    pub right_dirs: BTreeMap<String, Entry>,
    pub right_files: BTreeMap<String, Entry>,
    pub common_dirs: BTreeMap<String, EntryPair>,
    pub common_files: BTreeMap<String, EntryPair>,
    pub different: BTreeMap<String, Changed>,
    pub funny: BTreeMap<String, Funny>,
}
