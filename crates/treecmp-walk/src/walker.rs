//! Concurrent directory walker.
//!
//! Each directory is listed by its own tokio task. A semaphore with
//! `concurrency` permits gates listing: a task holds its permit only while
//! its directory handle is open, so the number of open handles never
//! exceeds the configured worker count. Subdirectories discovered by a
//! listing are handed to fresh tasks once the parent handle is closed.
//!
//! ```text
//!   Walker::start ──► open root ──► list task ──► entries ──► mpsc ──► EntryStream
//!                                      │
//!                                      └─ subdirs ─► list task ─► ...
//! ```
//!
//! Every task owns a clone of the channel sender, so the stream ends when
//! the last task finishes: channel closure is the completion signal.
//!
//! A directory is emitted only after its listing ends. If the listing is
//! cut short the directory carries a `ReadDir` error, so children that were
//! never read are accounted for. A root listing cut short is reported as a
//! `"."` entry with that error.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

use crate::cancel::CancelFlag;
use crate::entry::{encode_name, join_rel, Entry, EntryError, EntryErrorKind, EntryKind, FileId};
use crate::error::{Result, WalkError};
use crate::options::WalkOptions;

/// A walk over one directory tree.
#[derive(Debug)]
pub struct Walker {
    root: PathBuf,
    opts: WalkOptions,
    cancel: CancelFlag,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>, opts: WalkOptions) -> Self {
        Self {
            root: root.into(),
            opts,
            cancel: CancelFlag::new(),
        }
    }

    /// Share a cancellation flag with other parts of a run.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the root and start walking.
    ///
    /// Fails only when the root itself is unusable; everything below the
    /// root is reported through the returned stream.
    pub async fn start(self) -> Result<EntryStream> {
        self.opts.validate()?;
        if self.cancel.is_cancelled() {
            return Err(WalkError::Cancelled);
        }

        let meta = match fs::metadata(&self.root).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WalkError::RootNotFound(self.root));
            }
            Err(source) => {
                return Err(WalkError::RootUnreadable {
                    path: self.root,
                    source,
                });
            }
        };
        if !meta.is_dir() {
            return Err(WalkError::RootNotDirectory(self.root));
        }

        let permits = Arc::new(Semaphore::new(self.opts.concurrency));
        let permit = acquire(&permits)
            .await
            .ok_or(WalkError::Cancelled)?;
        let dir = fs::read_dir(&self.root)
            .await
            .map_err(|source| WalkError::RootUnreadable {
                path: self.root.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(self.opts.channel_capacity);
        let ancestors: Arc<Vec<FileId>> = Arc::new(FileId::of(&meta).into_iter().collect());

        debug!(
            root = %self.root.display(),
            concurrency = self.opts.concurrency,
            types = ?self.opts.types,
            "walk started"
        );

        let shared = Arc::new(WalkShared {
            root: self.root,
            opts: self.opts,
            cancel: self.cancel,
            permits,
            emitted: AtomicU64::new(0),
            dirs: AtomicU64::new(1),
        });
        tokio::spawn(list_dir(
            shared,
            tx,
            None,
            String::new(),
            Listing::Dir(dir),
            permit,
            ancestors,
        ));

        Ok(EntryStream { rx })
    }
}

/// Lazy, unordered stream of entries from one walk.
///
/// Ends when every directory has been listed, or early on cancellation.
#[derive(Debug)]
pub struct EntryStream {
    rx: mpsc::Receiver<Entry>,
}

impl EntryStream {
    /// Next entry, or `None` once the walk is complete.
    pub async fn next(&mut self) -> Option<Entry> {
        self.rx.recv().await
    }

    /// Drain the whole walk into a vector.
    pub async fn collect(mut self) -> Vec<Entry> {
        let mut out = Vec::new();
        while let Some(entry) = self.rx.recv().await {
            out.push(entry);
        }
        out
    }
}

/// State shared by every task of one walk.
struct WalkShared {
    root: PathBuf,
    opts: WalkOptions,
    cancel: CancelFlag,
    permits: Arc<Semaphore>,
    emitted: AtomicU64,
    dirs: AtomicU64,
}

impl WalkShared {
    fn wants(&self, entry: &Entry) -> bool {
        // Broken entries are always reported so they can't vanish behind
        // the filter.
        entry.error.is_some() || self.opts.types.contains(entry.kind.type_flag())
    }

    /// Send an entry if the filter admits it. Returns `false` once the
    /// consumer has gone away.
    async fn emit(&self, tx: &mpsc::Sender<Entry>, entry: Entry) -> bool {
        if !self.wants(&entry) {
            return true;
        }
        if let Some(err) = &entry.error {
            warn!(path = %entry.path, error = %err, "entry not fully readable");
        }
        trace!(path = %entry.path, kind = %entry.kind, "emit");
        self.emitted.fetch_add(1, Ordering::Relaxed);
        tx.send(entry).await.is_ok()
    }

    /// Stat one child, following symlinks when configured.
    async fn describe(&self, rel: String, abs: &Path) -> Entry {
        let meta = match fs::symlink_metadata(abs).await {
            Ok(meta) => meta,
            Err(err) => {
                return Entry::unreadable(
                    rel,
                    EntryKind::Other,
                    EntryError::from_io(EntryErrorKind::Stat, &err),
                );
            }
        };

        if meta.file_type().is_symlink() && self.opts.follow_symlinks {
            return match fs::metadata(abs).await {
                Ok(target) => Entry::from_metadata(rel, &target),
                Err(err) => Entry::from_metadata(rel, &meta)
                    .failed(EntryError::from_io(EntryErrorKind::BrokenLink, &err)),
            };
        }
        Entry::from_metadata(rel, &meta)
    }
}

impl Drop for WalkShared {
    fn drop(&mut self) {
        debug!(
            root = %self.root.display(),
            entries = self.emitted.load(Ordering::Relaxed),
            dirs = self.dirs.load(Ordering::Relaxed),
            cancelled = self.cancel.is_cancelled(),
            "walk finished"
        );
    }
}

async fn acquire(permits: &Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
    Arc::clone(permits).acquire_owned().await.ok()
}

/// Path used for the root when it must be reported as an entry.
const ROOT_PATH: &str = ".";

/// Children of one directory, yielded as absolute paths.
enum Listing {
    Dir(fs::ReadDir),
    #[cfg(test)]
    Scripted(std::vec::IntoIter<io::Result<PathBuf>>),
}

impl Listing {
    async fn next(&mut self) -> io::Result<Option<PathBuf>> {
        match self {
            Listing::Dir(dir) => Ok(dir.next_entry().await?.map(|child| child.path())),
            #[cfg(test)]
            Listing::Scripted(items) => items.next().transpose(),
        }
    }
}

/// List an open directory. Files are emitted straight away; `this` (the
/// directory itself, `None` for the root) once the listing ends; child
/// directories after this handle and its permit are released.
async fn list_dir(
    shared: Arc<WalkShared>,
    tx: mpsc::Sender<Entry>,
    this: Option<Entry>,
    rel: String,
    mut listing: Listing,
    permit: OwnedSemaphorePermit,
    ancestors: Arc<Vec<FileId>>,
) {
    let mut subdirs = Vec::new();
    let mut cut_short = None;

    loop {
        if shared.cancel.is_cancelled() {
            return;
        }
        let abs = match listing.next().await {
            Ok(Some(abs)) => abs,
            Ok(None) => break,
            Err(err) => {
                warn!(dir = %rel, error = %err, "directory listing cut short");
                cut_short = Some(EntryError::from_io(EntryErrorKind::ReadDir, &err));
                break;
            }
        };
        let Some(name) = abs.file_name().map(encode_name) else {
            continue;
        };
        let entry = shared.describe(join_rel(&rel, &name), &abs).await;

        if entry.is_dir() && entry.is_ok() {
            subdirs.push((entry, abs));
        } else if !shared.emit(&tx, entry).await {
            return;
        }
    }

    drop(listing);
    drop(permit);

    let this = match (this, cut_short) {
        (Some(entry), None) => Some(entry),
        (Some(entry), Some(err)) => Some(entry.failed(err)),
        (None, Some(err)) => Some(Entry::unreadable(ROOT_PATH, EntryKind::Dir, err)),
        (None, None) => None,
    };
    if let Some(entry) = this {
        if !shared.emit(&tx, entry).await {
            return;
        }
    }

    for (entry, abs) in subdirs {
        spawn_dir(Arc::clone(&shared), tx.clone(), entry, abs, Arc::clone(&ancestors));
    }
}

// A plain fn keeps the list_dir -> open_dir -> list_dir task cycle out of
// the async type graph.
fn spawn_dir(
    shared: Arc<WalkShared>,
    tx: mpsc::Sender<Entry>,
    entry: Entry,
    abs: PathBuf,
    ancestors: Arc<Vec<FileId>>,
) {
    tokio::spawn(open_dir(shared, tx, entry, abs, ancestors));
}

/// Open a subdirectory and list it. A directory that cannot be opened or
/// would loop is emitted with an error and not descended.
async fn open_dir(
    shared: Arc<WalkShared>,
    tx: mpsc::Sender<Entry>,
    entry: Entry,
    abs: PathBuf,
    ancestors: Arc<Vec<FileId>>,
) {
    let Some(permit) = acquire(&shared.permits).await else {
        return;
    };
    if shared.cancel.is_cancelled() {
        return;
    }

    if let Some(id) = entry.file_id {
        if ancestors.contains(&id) {
            let entry = entry.failed(EntryError::new(
                EntryErrorKind::Loop,
                "directory is its own ancestor",
            ));
            shared.emit(&tx, entry).await;
            return;
        }
    }

    match fs::read_dir(&abs).await {
        Ok(dir) => {
            shared.dirs.fetch_add(1, Ordering::Relaxed);
            let rel = entry.path.clone();
            let ancestors = match entry.file_id {
                Some(id) if shared.opts.follow_symlinks => {
                    let mut chain = Vec::with_capacity(ancestors.len() + 1);
                    chain.extend_from_slice(&ancestors);
                    chain.push(id);
                    Arc::new(chain)
                }
                _ => ancestors,
            };
            list_dir(shared, tx, Some(entry), rel, Listing::Dir(dir), permit, ancestors).await;
        }
        Err(err) => {
            drop(permit);
            let entry = entry.failed(EntryError::from_io(EntryErrorKind::ReadDir, &err));
            shared.emit(&tx, entry).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::EntryTypes;
    use std::collections::BTreeSet;
    use std::fs as stdfs;

    fn build_tree(root: &Path) {
        stdfs::create_dir_all(root.join("a/b/c")).unwrap();
        stdfs::create_dir_all(root.join("d")).unwrap();
        stdfs::write(root.join("top.txt"), b"top").unwrap();
        stdfs::write(root.join("a/one.txt"), b"1").unwrap();
        stdfs::write(root.join("a/b/two.txt"), b"22").unwrap();
        stdfs::write(root.join("a/b/c/three.txt"), b"333").unwrap();
    }

    async fn walk_paths(root: &Path, opts: WalkOptions) -> BTreeSet<String> {
        let stream = Walker::new(root, opts).start().await.unwrap();
        stream.collect().await.into_iter().map(|e| e.path).collect()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn walks_every_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let stream = Walker::new(dir.path(), WalkOptions::default().with_concurrency(3))
            .start()
            .await
            .unwrap();
        let entries = stream.collect().await;
        let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        let unique: BTreeSet<_> = paths.iter().cloned().collect();

        assert_eq!(paths.len(), unique.len(), "no duplicate emissions");
        assert_eq!(
            unique,
            set(&[
                "a",
                "a/b",
                "a/b/c",
                "a/b/c/three.txt",
                "a/b/two.txt",
                "a/one.txt",
                "d",
                "top.txt",
            ])
        );
        let three = entries.iter().find(|e| e.path == "a/b/c/three.txt").unwrap();
        assert_eq!(three.kind, EntryKind::File);
        assert_eq!(three.size, 3);
    }

    #[tokio::test]
    async fn single_worker_sees_same_entries() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let one = walk_paths(dir.path(), WalkOptions::default().with_concurrency(1)).await;
        let many = walk_paths(dir.path(), WalkOptions::default().with_concurrency(16)).await;
        assert_eq!(one, many);
    }

    #[tokio::test]
    async fn type_filter_limits_emission_not_traversal() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());

        let files = walk_paths(
            dir.path(),
            WalkOptions::default().with_types(EntryTypes::FILE),
        )
        .await;
        assert_eq!(
            files,
            set(&["a/b/c/three.txt", "a/b/two.txt", "a/one.txt", "top.txt"])
        );

        let dirs = walk_paths(dir.path(), WalkOptions::default().with_types(EntryTypes::DIR)).await;
        assert_eq!(dirs, set(&["a", "a/b", "a/b/c", "d"]));
    }

    #[tokio::test]
    async fn empty_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(walk_paths(dir.path(), WalkOptions::default()).await.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Walker::new(dir.path().join("nope"), WalkOptions::default())
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::RootNotFound(_)));
    }

    #[tokio::test]
    async fn file_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        stdfs::write(&file, b"x").unwrap();
        let err = Walker::new(&file, WalkOptions::default())
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::RootNotDirectory(_)));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = Walker::new(dir.path(), WalkOptions::default())
            .with_cancel(cancel)
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, WalkError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_mid_walk_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..50 {
            let sub = dir.path().join(format!("d{i}"));
            stdfs::create_dir(&sub).unwrap();
            for j in 0..20 {
                stdfs::write(sub.join(format!("f{j}")), b"x").unwrap();
            }
        }

        let cancel = CancelFlag::new();
        let mut opts = WalkOptions::default().with_concurrency(2);
        opts.channel_capacity = 1;
        let mut stream = Walker::new(dir.path(), opts)
            .with_cancel(cancel.clone())
            .start()
            .await
            .unwrap();

        assert!(stream.next().await.is_some());
        cancel.cancel();

        let rest = tokio::time::timeout(std::time::Duration::from_secs(10), stream.collect())
            .await
            .expect("stream should end after cancel");
        assert!(rest.len() < 50 * 21);
    }

    fn shared_for(root: &Path) -> Arc<WalkShared> {
        Arc::new(WalkShared {
            root: root.to_path_buf(),
            opts: WalkOptions::default(),
            cancel: CancelFlag::new(),
            permits: Arc::new(Semaphore::new(1)),
            emitted: AtomicU64::new(0),
            dirs: AtomicU64::new(1),
        })
    }

    async fn list_scripted(
        root: &Path,
        this: Option<Entry>,
        rel: &str,
        items: Vec<io::Result<PathBuf>>,
    ) -> Vec<Entry> {
        let shared = shared_for(root);
        let permit = acquire(&shared.permits).await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        list_dir(
            shared,
            tx,
            this,
            rel.to_string(),
            Listing::Scripted(items.into_iter()),
            permit,
            Arc::new(Vec::new()),
        )
        .await;
        EntryStream { rx }.collect().await
    }

    #[tokio::test]
    async fn listing_cut_short_marks_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        stdfs::create_dir(&sub).unwrap();
        stdfs::write(sub.join("a"), b"a").unwrap();
        stdfs::write(sub.join("b"), b"b").unwrap();
        let this = Entry::from_metadata("sub", &stdfs::metadata(&sub).unwrap());

        let entries = list_scripted(
            dir.path(),
            Some(this),
            "sub",
            vec![
                Ok(sub.join("a")),
                Err(io::Error::other("device went away")),
                Ok(sub.join("b")),
            ],
        )
        .await;
        let find = |p: &str| entries.iter().find(|e| e.path == p);

        assert!(find("sub/a").unwrap().is_ok());
        assert!(find("sub/b").is_none());
        let sub = find("sub").unwrap();
        assert_eq!(sub.kind, EntryKind::Dir);
        assert_eq!(sub.error.as_ref().map(|e| e.kind), Some(EntryErrorKind::ReadDir));
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn complete_listing_emits_directory_clean() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        stdfs::create_dir(&sub).unwrap();
        stdfs::write(sub.join("a"), b"a").unwrap();
        let this = Entry::from_metadata("sub", &stdfs::metadata(&sub).unwrap());

        let entries = list_scripted(dir.path(), Some(this), "sub", vec![Ok(sub.join("a"))]).await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_ok()));
    }

    #[tokio::test]
    async fn root_listing_cut_short_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        stdfs::write(dir.path().join("a"), b"a").unwrap();

        let entries = list_scripted(
            dir.path(),
            None,
            "",
            vec![Ok(dir.path().join("a")), Err(io::Error::other("stale handle"))],
        )
        .await;
        let root = entries.iter().find(|e| e.path == ROOT_PATH).unwrap();
        assert_eq!(root.kind, EntryKind::Dir);
        assert_eq!(root.error.as_ref().map(|e| e.kind), Some(EntryErrorKind::ReadDir));
        assert!(entries.iter().any(|e| e.path == "a"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn non_utf8_names_are_distinct_entries() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        stdfs::write(dir.path().join(OsStr::from_bytes(b"\xff")), b"1").unwrap();
        stdfs::write(dir.path().join(OsStr::from_bytes(b"\xfe")), b"2").unwrap();

        let paths = walk_paths(dir.path(), WalkOptions::default()).await;
        assert_eq!(paths, set(&[r"\xfe", r"\xff"]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_reported_not_followed_by_default() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        std::os::unix::fs::symlink("a", dir.path().join("link")).unwrap();

        let entries = Walker::new(dir.path(), WalkOptions::default())
            .start()
            .await
            .unwrap()
            .collect()
            .await;
        let link = entries.iter().find(|e| e.path == "link").unwrap();
        assert_eq!(link.kind, EntryKind::Symlink);
        assert!(!entries.iter().any(|e| e.path.starts_with("link/")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn followed_symlinks_resolve_and_detect_problems() {
        let dir = tempfile::tempdir().unwrap();
        build_tree(dir.path());
        std::os::unix::fs::symlink("a/b", dir.path().join("via")).unwrap();
        std::os::unix::fs::symlink("missing", dir.path().join("dangling")).unwrap();
        std::os::unix::fs::symlink("..", dir.path().join("a/up")).unwrap();

        let entries = Walker::new(dir.path(), WalkOptions::default().following_symlinks(true))
            .start()
            .await
            .unwrap()
            .collect()
            .await;
        let find = |p: &str| entries.iter().find(|e| e.path == p).unwrap();

        assert_eq!(find("via").kind, EntryKind::Dir);
        assert_eq!(find("via/two.txt").size, 2);

        let dangling = find("dangling");
        assert_eq!(dangling.kind, EntryKind::Symlink);
        assert_eq!(
            dangling.error.as_ref().map(|e| e.kind),
            Some(EntryErrorKind::BrokenLink)
        );

        let up = find("a/up");
        assert_eq!(up.error.as_ref().map(|e| e.kind), Some(EntryErrorKind::Loop));
        assert!(!entries.iter().any(|e| e.path.starts_with("a/up/")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_dir_is_emitted_with_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        stdfs::create_dir(&locked).unwrap();
        stdfs::write(locked.join("secret"), b"s").unwrap();
        stdfs::set_permissions(&locked, stdfs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users read through mode bits; nothing to observe then.
        let readable = stdfs::read_dir(&locked).is_ok();

        let entries = Walker::new(dir.path(), WalkOptions::default())
            .start()
            .await
            .unwrap()
            .collect()
            .await;
        stdfs::set_permissions(&locked, stdfs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            return;
        }
        let e = entries.iter().find(|e| e.path == "locked").unwrap();
        assert_eq!(e.kind, EntryKind::Dir);
        assert_eq!(e.error.as_ref().map(|e| e.kind), Some(EntryErrorKind::ReadDir));
        assert!(!entries.iter().any(|e| e.path == "locked/secret"));
    }
}
