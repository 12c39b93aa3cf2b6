//! The comparison engine: wires two walks, the matcher, classification and
//! content comparison into one pipeline.
//!
//! ```text
//!   left Walker ──┐                      ┌─► record (one-sided, dirs, funny)
//!                 ├─► select loop ─► PathMatcher ─┤
//!   right Walker ─┘                      └─► JoinSet ─► spawn_blocking compare ─► record
//! ```
//!
//! The select loop is the only owner of the matcher. Content comparisons run
//! on the blocking pool, at most `concurrency` at a time. The loop ends once
//! both entry streams are closed and every comparison task has joined.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};
use treecmp_walk::{CancelFlag, Entry, EntryStream, WalkError, Walker};

use crate::aggregator::DiffResult;
use crate::classify::{
    classify_pair, classify_unmatched, funny, Changed, Classification, Decision, FunnyReason,
};
use crate::config::CompareOptions;
use crate::content::{ContentComparator, ContentError, Verdict};
use crate::error::{CompareError, Result};
use crate::matcher::{Matched, PathMatcher, Side};

/// Compare two directory trees with the given options.
pub async fn compare(
    left: impl Into<PathBuf>,
    right: impl Into<PathBuf>,
    opts: CompareOptions,
) -> Result<DiffResult> {
    TreeComparator::new(left, right, opts).run().await
}

/// One comparison run between a left and a right root.
#[derive(Debug)]
pub struct TreeComparator {
    left: PathBuf,
    right: PathBuf,
    opts: CompareOptions,
    cancel: CancelFlag,
}

impl TreeComparator {
    pub fn new(left: impl Into<PathBuf>, right: impl Into<PathBuf>, opts: CompareOptions) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            opts,
            cancel: CancelFlag::new(),
        }
    }

    /// Use an externally owned cancellation flag.
    ///
    /// The engine also raises this flag itself when the run fails, so every
    /// worker sharing it stops.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn left(&self) -> &Path {
        &self.left
    }

    pub fn right(&self) -> &Path {
        &self.right
    }

    /// Run to completion. On any fatal error all workers are stopped and no
    /// partial result is returned.
    pub async fn run(self) -> Result<DiffResult> {
        self.opts.validate()?;
        if self.cancel.is_cancelled() {
            return Err(CompareError::Cancelled);
        }

        let left_walk =
            Walker::new(&self.left, self.opts.walk.clone()).with_cancel(self.cancel.clone());
        let right_walk =
            Walker::new(&self.right, self.opts.walk.clone()).with_cancel(self.cancel.clone());
        let (left, right) = match tokio::try_join!(left_walk.start(), right_walk.start()) {
            Ok(streams) => streams,
            Err(WalkError::Cancelled) => return Err(CompareError::Cancelled),
            Err(err) => {
                self.cancel.cancel();
                return Err(err.into());
            }
        };

        debug!(
            left = %self.left.display(),
            right = %self.right.display(),
            concurrency = self.opts.walk.concurrency,
            "comparison started"
        );

        let mut pipeline = Pipeline {
            matcher: PathMatcher::new(),
            result: Arc::new(DiffResult::new()),
            comparator: Arc::new(ContentComparator::new(
                &self.left,
                &self.right,
                &self.opts,
                self.cancel.clone(),
            )),
            permits: Arc::new(Semaphore::new(self.opts.walk.concurrency)),
            tasks: JoinSet::new(),
        };

        match pipeline.drive(left, right, &self.cancel).await {
            Ok(()) => {}
            Err(err) => {
                self.cancel.cancel();
                pipeline.tasks.abort_all();
                if !matches!(err, CompareError::Cancelled) {
                    warn!(error = %err, "comparison aborted");
                }
                return Err(err);
            }
        }

        let result = pipeline.finish()?;
        info!(
            left = %self.left.display(),
            right = %self.right.display(),
            paths = result.len(),
            identical = result.is_identical(),
            counts = ?result.counts(),
            "comparison finished"
        );
        Ok(result)
    }
}

struct Pipeline {
    matcher: PathMatcher,
    result: Arc<DiffResult>,
    comparator: Arc<ContentComparator>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<Result<()>>,
}

async fn next_entry(stream: &mut Option<EntryStream>) -> Option<Entry> {
    match stream {
        Some(s) => s.next().await,
        None => None,
    }
}

impl Pipeline {
    async fn drive(
        &mut self,
        left: EntryStream,
        right: EntryStream,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let mut left = Some(left);
        let mut right = Some(right);

        while left.is_some() || right.is_some() || !self.tasks.is_empty() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(CompareError::Cancelled),

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    joined.map_err(|e| CompareError::Worker(e.to_string()))??;
                }

                entry = next_entry(&mut left), if left.is_some() => match entry {
                    Some(entry) => self.offer(Side::Left, entry)?,
                    None => {
                        left = None;
                        self.side_done(Side::Left)?;
                    }
                },

                entry = next_entry(&mut right), if right.is_some() => match entry {
                    Some(entry) => self.offer(Side::Right, entry)?,
                    None => {
                        right = None;
                        self.side_done(Side::Right)?;
                    }
                },
            }
        }

        // A cancelled walk closes its stream early; that is not completion.
        if cancel.is_cancelled() {
            return Err(CompareError::Cancelled);
        }
        Ok(())
    }

    fn offer(&mut self, side: Side, entry: Entry) -> Result<()> {
        match self.matcher.offer(side, entry)? {
            Matched::Pair { left, right } => self.dispatch(classify_pair(left, right)),
            Matched::Unmatched(side, entry) => self.record(classify_unmatched(side, entry)),
            Matched::Pending => Ok(()),
        }
    }

    fn side_done(&mut self, side: Side) -> Result<()> {
        let released = self.matcher.finish(side);
        debug!(%side, released = released.len(), "walk side complete");
        for (side, entry) in released {
            self.record(classify_unmatched(side, entry))?;
        }
        Ok(())
    }

    fn dispatch(&mut self, decision: Decision) -> Result<()> {
        if let Decision::Done(classification) = decision {
            return self.record(classification);
        }

        let permits = Arc::clone(&self.permits);
        let comparator = Arc::clone(&self.comparator);
        let result = Arc::clone(&self.result);
        self.tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| CompareError::Cancelled)?;
            let classification = tokio::task::spawn_blocking(move || settle(&comparator, decision))
                .await
                .map_err(|e| CompareError::Worker(e.to_string()))??;
            trace!(
                path = classification.path(),
                category = %classification.category(),
                "classified"
            );
            result.record(classification)?;
            Ok(())
        });
        Ok(())
    }

    fn record(&self, classification: Classification) -> Result<()> {
        trace!(path = classification.path(), category = %classification.category(), "classified");
        if let Classification::Funny(f) = &classification {
            debug!(path = %f.path, reason = %f.reason, "funny");
        }
        self.result.record(classification).map(|_| ())
    }

    fn finish(self) -> Result<DiffResult> {
        if !self.matcher.is_drained() {
            return Err(CompareError::Worker(format!(
                "{} entries never resolved",
                self.matcher.pending_len()
            )));
        }
        Arc::try_unwrap(self.result)
            .map_err(|_| CompareError::Worker("result still shared after drain".into()))
    }
}

/// Turn a comparison decision into a final classification. Runs on the
/// blocking pool.
fn settle(comparator: &ContentComparator, decision: Decision) -> Result<Classification> {
    let (pair, verdict) = match decision {
        Decision::Done(classification) => return Ok(classification),
        Decision::CompareFiles(pair) => {
            let v = comparator.compare_files(&pair.left, &pair.right);
            (pair, v)
        }
        Decision::CompareLinks(pair) => {
            let v = comparator.compare_links(&pair.left, &pair.right);
            (pair, v)
        }
    };

    match verdict {
        Ok(Verdict::Same) => Ok(Classification::CommonFile(pair)),
        Ok(Verdict::Differs(cause)) => Ok(Classification::Different(Changed {
            left: pair.left,
            right: pair.right,
            cause,
        })),
        Err(ContentError::Read { side, source }) => {
            warn!(path = %pair.path(), %side, error = %source, "content read failed");
            Ok(funny(
                Some(pair.left),
                Some(pair.right),
                FunnyReason::ReadError {
                    side,
                    message: source.to_string(),
                },
            ))
        }
        Err(ContentError::Cancelled) => Err(CompareError::Cancelled),
    }
}
