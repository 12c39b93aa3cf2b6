//! Entry types describing filesystem objects found during a walk.

use std::ffi::OsStr;
use std::fmt;
use std::fmt::Write as _;
use std::fs::{FileType, Metadata};
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::options::EntryTypes;

/// The type of a filesystem object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Socket,
    Device,
    /// Fifos and anything the platform cannot name.
    Other,
}

impl EntryKind {
    /// Classify a file type without following symlinks.
    pub fn from_file_type(ft: &FileType) -> Self {
        if ft.is_file() {
            EntryKind::File
        } else if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_symlink() {
            EntryKind::Symlink
        } else {
            special_kind(ft)
        }
    }

    /// The filter flag that admits this kind.
    pub fn type_flag(self) -> EntryTypes {
        match self {
            EntryKind::File => EntryTypes::FILE,
            EntryKind::Dir => EntryTypes::DIR,
            EntryKind::Symlink => EntryTypes::SYMLINK,
            EntryKind::Device => EntryTypes::DEVICE,
            EntryKind::Socket | EntryKind::Other => EntryTypes::SPECIAL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::Socket => "socket",
            EntryKind::Device => "device",
            EntryKind::Other => "other",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(unix)]
fn special_kind(ft: &FileType) -> EntryKind {
    use std::os::unix::fs::FileTypeExt;

    if ft.is_socket() {
        EntryKind::Socket
    } else if ft.is_block_device() || ft.is_char_device() {
        EntryKind::Device
    } else {
        EntryKind::Other
    }
}

#[cfg(not(unix))]
fn special_kind(_ft: &FileType) -> EntryKind {
    EntryKind::Other
}

/// Device and inode pair identifying a file on its filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn of(_meta: &Metadata) -> Option<Self> {
        None
    }
}

/// Why an entry could not be fully described.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryErrorKind {
    /// `lstat` failed.
    Stat,
    /// The entry is a directory that could not be listed.
    ReadDir,
    /// A followed symlink leads back to one of its ancestors.
    Loop,
    /// A followed symlink points at nothing.
    BrokenLink,
}

impl fmt::Display for EntryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryErrorKind::Stat => "stat failed",
            EntryErrorKind::ReadDir => "read dir failed",
            EntryErrorKind::Loop => "filesystem loop",
            EntryErrorKind::BrokenLink => "broken symlink",
        };
        f.write_str(s)
    }
}

/// A per-entry failure, kept on the entry instead of aborting the walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EntryError {
    pub kind: EntryErrorKind,
    pub message: String,
}

impl EntryError {
    pub fn new(kind: EntryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_io(kind: EntryErrorKind, err: &io::Error) -> Self {
        Self::new(kind, err.to_string())
    }
}

/// One filesystem object discovered by a walk.
///
/// Entries are immutable once emitted. `path` is relative to the walk root,
/// uses `/` as separator and is unique within a single walk. Names that are
/// not valid UTF-8 are escaped by [`encode_name`]; [`decode_rel`] recovers
/// the filesystem path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: Option<SystemTime>,
    /// Permission bits (zero where the platform has none).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
}

impl Entry {
    /// Describe an entry from its metadata.
    pub fn from_metadata(path: impl Into<String>, meta: &Metadata) -> Self {
        let (mode, uid, gid) = ownership(meta);
        Self {
            path: path.into(),
            kind: EntryKind::from_file_type(&meta.file_type()),
            size: meta.len(),
            mtime: meta.modified().ok(),
            mode,
            uid,
            gid,
            file_id: FileId::of(meta),
            error: None,
        }
    }

    /// An entry whose metadata could not be read at all.
    pub fn unreadable(path: impl Into<String>, kind: EntryKind, error: EntryError) -> Self {
        Self {
            path: path.into(),
            kind,
            size: 0,
            mtime: None,
            mode: 0,
            uid: 0,
            gid: 0,
            file_id: None,
            error: Some(error),
        }
    }

    /// Attach an error to an otherwise described entry.
    pub fn failed(mut self, error: EntryError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(unix)]
fn ownership(meta: &Metadata) -> (u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (meta.mode() & 0o7777, meta.uid(), meta.gid())
}

#[cfg(not(unix))]
fn ownership(_meta: &Metadata) -> (u32, u32, u32) {
    (0, 0, 0)
}

/// Join a relative parent path and a child name with `/`.
pub fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Encode one file name as a printable path component.
///
/// Valid UTF-8 passes through, except that `\` becomes `\\`. Bytes that are
/// not valid UTF-8 become `\xNN`. The mapping is injective, so distinct
/// names never share a path.
pub fn encode_name(name: &OsStr) -> String {
    let mut out = String::with_capacity(name.len());
    for chunk in name_bytes(name).utf8_chunks() {
        for c in chunk.valid().chars() {
            if c == '\\' {
                out.push_str("\\\\");
            } else {
                out.push(c);
            }
        }
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{b:02x}");
        }
    }
    out
}

/// Turn a relative path produced by a walk back into a filesystem path.
pub fn decode_rel(path: &str) -> PathBuf {
    let raw = path.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            if raw.get(i + 1) == Some(&b'\\') {
                out.push(b'\\');
                i += 2;
                continue;
            }
            if raw.get(i + 1) == Some(&b'x') {
                let byte = path
                    .get(i + 2..i + 4)
                    .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = byte {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    path_from_bytes(out)
}

#[cfg(unix)]
fn name_bytes(name: &OsStr) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes()
}

#[cfg(not(unix))]
fn name_bytes(name: &OsStr) -> &[u8] {
    name.as_encoded_bytes()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_rel_at_root_has_no_separator() {
        assert_eq!(join_rel("", "a"), "a");
        assert_eq!(join_rel("a", "b"), "a/b");
        assert_eq!(join_rel("a/b", "c.txt"), "a/b/c.txt");
    }

    #[test]
    fn plain_names_encode_unchanged() {
        assert_eq!(encode_name(OsStr::new("café.txt")), "café.txt");
        assert_eq!(decode_rel("a/café.txt"), PathBuf::from("a/café.txt"));
    }

    #[test]
    fn backslash_is_escaped_and_restored() {
        let encoded = encode_name(OsStr::new(r"a\xff"));
        assert_eq!(encoded, r"a\\xff");
        assert_eq!(decode_rel(&encoded), PathBuf::from(r"a\xff"));
    }

    #[test]
    fn malformed_escapes_are_kept_literally() {
        assert_eq!(decode_rel(r"a\q"), PathBuf::from(r"a\q"));
        assert_eq!(decode_rel(r"a\x+f"), PathBuf::from(r"a\x+f"));
        assert_eq!(decode_rel(r"a\x"), PathBuf::from(r"a\x"));
    }

    #[cfg(unix)]
    #[test]
    fn invalid_utf8_names_stay_distinct_and_round_trip() {
        use std::os::unix::ffi::OsStrExt;

        let names: Vec<&OsStr> = vec![
            OsStr::from_bytes(b"\xff"),
            OsStr::from_bytes(b"\xfe"),
            OsStr::from_bytes(b"caf\xe9.txt"),
            OsStr::new(r"\xff"),
        ];
        let encoded: Vec<String> = names.iter().map(|n| encode_name(n)).collect();
        assert_eq!(encoded, vec![r"\xff", r"\xfe", r"caf\xe9.txt", r"\\xff"]);

        for (name, enc) in names.iter().zip(&encoded) {
            assert_eq!(decode_rel(enc).as_os_str(), *name);
        }
        let nested = join_rel("dir", &encoded[2]);
        assert_eq!(
            decode_rel(&nested),
            PathBuf::from("dir").join(names[2])
        );
    }

    #[test]
    fn from_metadata_describes_file_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, b"hello").unwrap();

        let e = Entry::from_metadata("f.txt", &std::fs::symlink_metadata(&file).unwrap());
        assert_eq!(e.kind, EntryKind::File);
        assert_eq!(e.size, 5);
        assert!(e.mtime.is_some());
        assert!(e.is_ok());

        let d = Entry::from_metadata("", &std::fs::metadata(dir.path()).unwrap());
        assert!(d.is_dir());
    }

    #[test]
    fn unreadable_entry_carries_error() {
        let err = EntryError::new(EntryErrorKind::Stat, "permission denied");
        let e = Entry::unreadable("x", EntryKind::Other, err.clone());
        assert!(!e.is_ok());
        assert_eq!(e.error, Some(err));
        assert_eq!(e.size, 0);
    }

    #[test]
    fn entry_error_display_names_kind() {
        let err = EntryError::new(EntryErrorKind::BrokenLink, "No such file or directory");
        assert_eq!(err.to_string(), "broken symlink: No such file or directory");
    }

    #[test]
    fn kinds_map_to_filter_flags() {
        assert_eq!(EntryKind::File.type_flag(), EntryTypes::FILE);
        assert_eq!(EntryKind::Dir.type_flag(), EntryTypes::DIR);
        assert_eq!(EntryKind::Socket.type_flag(), EntryTypes::SPECIAL);
        assert_eq!(EntryKind::Other.type_flag(), EntryTypes::SPECIAL);
    }

    #[test]
    fn entry_serializes_kind_lowercase() {
        let e = Entry::unreadable(
            "a",
            EntryKind::Symlink,
            EntryError::new(EntryErrorKind::Loop, "loop"),
        );
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "symlink");
        assert_eq!(json["error"]["kind"], "loop");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_its_own_kind() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("l");
        std::os::unix::fs::symlink("nowhere", &link).unwrap();
        let e = Entry::from_metadata("l", &std::fs::symlink_metadata(&link).unwrap());
        assert_eq!(e.kind, EntryKind::Symlink);
    }
}
