//! Walk configuration.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalkError};

bitflags! {
    /// Entry types a walk emits. Directories are traversed regardless.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EntryTypes: u8 {
        const FILE = 1 << 0;
        const DIR = 1 << 1;
        const SYMLINK = 1 << 2;
        const DEVICE = 1 << 3;
        /// Sockets, fifos and unknown types.
        const SPECIAL = 1 << 4;
        const ALL = Self::FILE.bits()
            | Self::DIR.bits()
            | Self::SYMLINK.bits()
            | Self::DEVICE.bits()
            | Self::SPECIAL.bits();
    }
}

impl EntryTypes {
    /// Parse a comma separated list such as `file,dir`.
    pub fn from_names(list: &str) -> Result<Self> {
        let mut types = EntryTypes::empty();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            types |= match name.to_ascii_lowercase().as_str() {
                "file" | "files" => EntryTypes::FILE,
                "dir" | "dirs" => EntryTypes::DIR,
                "symlink" | "link" => EntryTypes::SYMLINK,
                "device" => EntryTypes::DEVICE,
                "special" => EntryTypes::SPECIAL,
                "all" => EntryTypes::ALL,
                other => {
                    return Err(WalkError::InvalidOptions(format!(
                        "unknown entry type '{other}'"
                    )))
                }
            };
        }
        if types.is_empty() {
            return Err(WalkError::InvalidOptions("empty entry type list".into()));
        }
        Ok(types)
    }
}

impl Default for EntryTypes {
    fn default() -> Self {
        EntryTypes::ALL
    }
}

/// Configuration for a single walk. Immutable for the walk's duration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkOptions {
    /// Maximum number of directories listed at once. Also bounds the
    /// number of open directory handles.
    pub concurrency: usize,
    /// Entry types to emit.
    pub types: EntryTypes,
    /// Resolve symlinks instead of reporting them as links.
    pub follow_symlinks: bool,
    /// Capacity of the entry channel between walker and consumer.
    pub channel_capacity: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            types: EntryTypes::ALL,
            follow_symlinks: false,
            channel_capacity: 1024,
        }
    }
}

impl WalkOptions {
    /// Set the worker count. Zero is clamped to one.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_types(mut self, types: EntryTypes) -> Self {
        self.types = types;
        self
    }

    pub fn following_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Reject values that would stall or misconfigure a walk.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(WalkError::InvalidOptions(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(WalkError::InvalidOptions(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.types.is_empty() {
            return Err(WalkError::InvalidOptions("no entry types selected".into()));
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let o = WalkOptions::default();
        assert!(o.concurrency >= 1);
        assert_eq!(o.types, EntryTypes::ALL);
        assert!(!o.follow_symlinks);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_clamped_or_rejected() {
        assert_eq!(WalkOptions::default().with_concurrency(0).concurrency, 1);

        let o = WalkOptions {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(o.validate(), Err(WalkError::InvalidOptions(_))));
    }

    #[test]
    fn parse_type_names() {
        let t = EntryTypes::from_names("file, dir").unwrap();
        assert_eq!(t, EntryTypes::FILE | EntryTypes::DIR);
        assert_eq!(EntryTypes::from_names("all").unwrap(), EntryTypes::ALL);
        assert!(EntryTypes::from_names("file,bogus").is_err());
        assert!(EntryTypes::from_names("").is_err());
    }

    #[test]
    fn empty_filter_is_invalid() {
        let o = WalkOptions::default().with_types(EntryTypes::empty());
        assert!(o.validate().is_err());
    }

    #[test]
    fn options_roundtrip_through_json() {
        let o = WalkOptions::default()
            .with_concurrency(3)
            .with_types(EntryTypes::FILE | EntryTypes::DIR);
        let json = serde_json::to_string(&o).unwrap();
        let back: WalkOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(o, back);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let o: WalkOptions = serde_json::from_str(r#"{"concurrency": 2}"#).unwrap();
        assert_eq!(o.concurrency, 2);
        assert_eq!(o.types, EntryTypes::ALL);
        assert_eq!(o.channel_capacity, 1024);
    }
}
