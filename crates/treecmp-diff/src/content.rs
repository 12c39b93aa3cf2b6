//! Content comparator for matched file pairs.
//!
//! Staged from cheap to expensive: size, checked attributes, file identity,
//! optional mtime quick check, a BLAKE3 digest of the last chunk, and
//! finally a streamed chunk-by-chunk comparison that stops at the first
//! difference. Files are never read whole; memory use is two chunks.
//!
//! All functions here block and are meant for the blocking pool.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use treecmp_walk::{decode_rel, CancelFlag, Entry};

use crate::config::{AttrChecks, CompareOptions};
use crate::matcher::Side;

/// Restartable iterator over a file in fixed-size chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes, so two iterators
/// with the same chunk size stay aligned byte-for-byte.
#[derive(Debug)]
pub struct FileChunks {
    file: File,
    chunk_size: usize,
    done: bool,
}

impl FileChunks {
    pub fn open(path: impl AsRef<Path>, chunk_size: usize) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }

    /// Restart from the first byte.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.done = false;
        Ok(())
    }

    /// BLAKE3 digest of the last `len` bytes. Leaves the position at the end;
    /// call [`rewind`](Self::rewind) before iterating.
    pub fn tail_digest(&mut self, len: u64) -> io::Result<blake3::Hash> {
        let size = self.file.metadata()?.len();
        self.file.seek(SeekFrom::Start(size.saturating_sub(len)))?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut (&mut self.file).take(len), &mut hasher)?;
        Ok(hasher.finalize())
    }
}

impl Iterator for FileChunks {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if filled == 0 {
            return None;
        }
        buf.truncate(filled);
        Some(Ok(buf.freeze()))
    }
}

/// Why two files were judged different.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum DiffCause {
    Size { left: u64, right: u64 },
    Attributes { differing: AttrChecks },
    /// Byte offset of the first difference (the start of the tail region
    /// when the tail digest caught it).
    Content { offset: u64 },
    LinkTarget { left: String, right: String },
}

impl std::fmt::Display for DiffCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffCause::Size { left, right } => write!(f, "size {left} vs {right}"),
            DiffCause::Attributes { differing } => write!(f, "attributes differ: {differing:?}"),
            DiffCause::Content { offset } => write!(f, "content differs at byte {offset}"),
            DiffCause::LinkTarget { left, right } => write!(f, "link target {left} vs {right}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Same,
    Differs(DiffCause),
}

/// Failure while comparing one pair.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("{side}: {source}")]
    Read {
        side: Side,
        #[source]
        source: io::Error,
    },

    #[error("comparison cancelled")]
    Cancelled,
}

fn on(side: Side) -> impl FnOnce(io::Error) -> ContentError {
    move |source| ContentError::Read { side, source }
}

/// Compares matched pairs under one set of options.
#[derive(Clone, Debug)]
pub struct ContentComparator {
    left_root: PathBuf,
    right_root: PathBuf,
    chunk_size: usize,
    trust_mtime: bool,
    tail_digest: bool,
    attrs: AttrChecks,
    cancel: CancelFlag,
}

impl ContentComparator {
    pub fn new(
        left_root: impl Into<PathBuf>,
        right_root: impl Into<PathBuf>,
        opts: &CompareOptions,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            left_root: left_root.into(),
            right_root: right_root.into(),
            chunk_size: opts.chunk_size,
            trust_mtime: opts.trust_mtime,
            tail_digest: opts.tail_digest,
            attrs: opts.attrs,
            cancel,
        }
    }

    fn abs(&self, side: Side, rel: &str) -> PathBuf {
        let rel = decode_rel(rel);
        match side {
            Side::Left => self.left_root.join(rel),
            Side::Right => self.right_root.join(rel),
        }
    }

    /// Compare two regular files described by their walk entries.
    pub fn compare_files(&self, left: &Entry, right: &Entry) -> Result<Verdict, ContentError> {
        if left.size != right.size {
            return Ok(Verdict::Differs(DiffCause::Size {
                left: left.size,
                right: right.size,
            }));
        }

        let differing = self.attrs.differing(left, right);
        if !differing.is_empty() {
            return Ok(Verdict::Differs(DiffCause::Attributes { differing }));
        }

        if let (Some(a), Some(b)) = (left.file_id, right.file_id) {
            if a == b {
                return Ok(Verdict::Same);
            }
        }
        if left.size == 0 {
            return Ok(Verdict::Same);
        }
        if self.trust_mtime && left.mtime.is_some() && left.mtime == right.mtime {
            return Ok(Verdict::Same);
        }

        let mut l = FileChunks::open(self.abs(Side::Left, &left.path), self.chunk_size)
            .map_err(on(Side::Left))?;
        let mut r = FileChunks::open(self.abs(Side::Right, &right.path), self.chunk_size)
            .map_err(on(Side::Right))?;

        let chunk = self.chunk_size as u64;
        if self.tail_digest && left.size > 2 * chunk {
            let tail_start = left.size - chunk;
            let lh = l.tail_digest(chunk).map_err(on(Side::Left))?;
            let rh = r.tail_digest(chunk).map_err(on(Side::Right))?;
            if lh != rh {
                return Ok(Verdict::Differs(DiffCause::Content { offset: tail_start }));
            }
            l.rewind().map_err(on(Side::Left))?;
            r.rewind().map_err(on(Side::Right))?;
        }

        stream_compare(l, r, &self.cancel)
    }

    /// Compare the targets of two unfollowed symlinks.
    pub fn compare_links(&self, left: &Entry, right: &Entry) -> Result<Verdict, ContentError> {
        let lt = std::fs::read_link(self.abs(Side::Left, &left.path)).map_err(on(Side::Left))?;
        let rt = std::fs::read_link(self.abs(Side::Right, &right.path)).map_err(on(Side::Right))?;
        if lt == rt {
            Ok(Verdict::Same)
        } else {
            Ok(Verdict::Differs(DiffCause::LinkTarget {
                left: lt.to_string_lossy().into_owned(),
                right: rt.to_string_lossy().into_owned(),
            }))
        }
    }
}

/// Walk both chunk streams in lockstep, stopping at the first difference.
pub fn stream_compare(
    left: FileChunks,
    right: FileChunks,
    cancel: &CancelFlag,
) -> Result<Verdict, ContentError> {
    let mut offset = 0u64;
    let mut left = left;
    let mut right = right;

    loop {
        if cancel.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        match (left.next(), right.next()) {
            (None, None) => return Ok(Verdict::Same),
            (Some(a), Some(b)) => {
                let a = a.map_err(on(Side::Left))?;
                let b = b.map_err(on(Side::Right))?;
                if a != b {
                    let at = a
                        .iter()
                        .zip(b.iter())
                        .position(|(x, y)| x != y)
                        .unwrap_or_else(|| a.len().min(b.len()));
                    return Ok(Verdict::Differs(DiffCause::Content {
                        offset: offset + at as u64,
                    }));
                }
                offset += a.len() as u64;
            }
            (Some(Err(source)), None) => {
                return Err(ContentError::Read {
                    side: Side::Left,
                    source,
                })
            }
            (None, Some(Err(source))) => {
                return Err(ContentError::Read {
                    side: Side::Right,
                    source,
                })
            }
            // One side ran out early: the file changed under us.
            _ => return Ok(Verdict::Differs(DiffCause::Content { offset })),
        }
    }
}
