//! Comparison options and their TOML form.

use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use treecmp_walk::{Entry, EntryTypes, WalkOptions};

use crate::error::{CompareError, Result};

/// Default chunk size for streamed content comparison.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest chunk size accepted by [`CompareOptions::validate`].
pub const MIN_CHUNK_SIZE: usize = 512;

bitflags! {
    /// Metadata that must also match for two files to count as common.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AttrChecks: u8 {
        const PERMS = 1 << 0;
        const OWNER = 1 << 1;
        const MTIME = 1 << 2;
    }
}

impl AttrChecks {
    /// The subset of checked attributes that differ between two entries.
    pub fn differing(self, left: &Entry, right: &Entry) -> AttrChecks {
        let mut out = AttrChecks::empty();
        if self.contains(AttrChecks::PERMS) && left.mode != right.mode {
            out |= AttrChecks::PERMS;
        }
        if self.contains(AttrChecks::OWNER) && (left.uid != right.uid || left.gid != right.gid) {
            out |= AttrChecks::OWNER;
        }
        if self.contains(AttrChecks::MTIME) && left.mtime != right.mtime {
            out |= AttrChecks::MTIME;
        }
        out
    }
}

impl Default for AttrChecks {
    fn default() -> Self {
        AttrChecks::empty()
    }
}

/// Options for a whole tree comparison. Passed by value into the engine
/// and immutable for the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Walker configuration. `walk.concurrency` also bounds the number of
    /// file pairs compared at once.
    pub walk: WalkOptions,
    /// Bytes read per chunk when streaming file contents.
    pub chunk_size: usize,
    /// Treat equal size and equal mtime as identical without reading.
    pub trust_mtime: bool,
    /// Hash the last chunk of both files before streaming from the start.
    pub tail_digest: bool,
    /// Extra metadata that must match.
    pub attrs: AttrChecks,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            walk: WalkOptions::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            trust_mtime: false,
            tail_digest: true,
            attrs: AttrChecks::empty(),
        }
    }
}

impl CompareOptions {
    pub fn with_walk_options(mut self, walk: WalkOptions) -> Self {
        self.walk = walk;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.walk = self.walk.with_concurrency(n);
        self
    }

    pub fn with_types(mut self, types: EntryTypes) -> Self {
        self.walk = self.walk.with_types(types);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_attrs(mut self, attrs: AttrChecks) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.walk.validate()?;
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(CompareError::Config(format!(
                "chunk_size {} is below the minimum of {MIN_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Parse options from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let opts: Self = toml::from_str(s).map_err(|e| CompareError::Config(e.to_string()))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
