//! Exact-match expectations over a [`DiffResult`].
//!
//! Expectations are written as `key=path1,path2` tokens where `key` is one
//! of the short category names (`ld lf rd rf cd cf diff funny`). A bare
//! `key` or `key=` states that the category must be empty, which is also the
//! default for every category not mentioned. Repeated keys accumulate.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregator::DiffResult;
use crate::category::Category;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpectError {
    #[error("malformed expectation token {0:?}")]
    Malformed(String),

    #[error("unknown category keyword {0:?}")]
    UnknownCategory(String),

    #[error("{category}: unexpected {path}")]
    Unexpected { category: &'static str, path: String },

    #[error("{category}: expected to see {path}")]
    Missing { category: &'static str, path: String },
}

/// Expected path sets for all eight categories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectation {
    paths: BTreeMap<Category, BTreeSet<String>>,
}

impl Expectation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=v1,v2` tokens.
    pub fn parse<I, S>(tokens: I) -> Result<Self, ExpectError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exp = Self::new();
        for token in tokens {
            let token = token.as_ref().trim();
            let (key, values) = match token.split_once('=') {
                Some((k, v)) => (k.trim(), v),
                None => (token, ""),
            };
            if key.is_empty() {
                return Err(ExpectError::Malformed(token.to_string()));
            }
            let category = Category::from_name(key)
                .ok_or_else(|| ExpectError::UnknownCategory(key.to_string()))?;
            let paths = values
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string);
            exp.paths.entry(category).or_default().extend(paths);
        }
        Ok(exp)
    }

    /// Add expected paths to one category.
    pub fn expect<I, S>(mut self, category: Category, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths
            .entry(category)
            .or_default()
            .extend(paths.into_iter().map(Into::into));
        self
    }

    /// Expected paths of one category, sorted.
    pub fn paths(&self, category: Category) -> Vec<&str> {
        self.paths
            .get(&category)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Check every category for an exact match. Categories are checked in
    /// their canonical order and paths in sorted order, so the reported
    /// mismatch is always the same for the same inputs.
    pub fn verify(&self, result: &DiffResult) -> Result<(), ExpectError> {
        let empty = BTreeSet::new();
        for category in Category::ALL {
            let expected = self.paths.get(&category).unwrap_or(&empty);
            let observed: BTreeSet<String> = result.paths(category).into_iter().collect();

            if let Some(path) = observed.difference(expected).next() {
                return Err(ExpectError::Unexpected {
                    category: category.name(),
                    path: path.clone(),
                });
            }
            if let Some(path) = expected.difference(&observed).next() {
                return Err(ExpectError::Missing {
                    category: category.name(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}
