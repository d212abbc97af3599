//! Bounded-concurrency recursive traversal of a directory tree.
//!
//! The walker lists a directory, folds every leaf into a running
//! [`TraversalSummary`] through the [`Visitor`], and expands every
//! subdirectory either on a new worker task or inline:
//!
//! - A subdirectory takes a worker slot from a [`Bulkhead`] if one is free and
//!   is expanded on its own task. Otherwise the current worker expands it
//!   itself, so the walk always makes progress.
//! - The root expansion holds a slot too. At most `max_concurrency`
//!   expansions are ever in flight.
//! - A parent waits for the workers it spawned before running the visitor's
//!   `leave_dir`, so `leave_dir` sees a directory only after its whole
//!   subtree is done. Recursive delete removes the directory there.
//!
//! The first error wins. It is stored once, a cancel flag is raised, and
//! workers check both before each child. An RPC already in flight finishes
//! (or times out) on its own. After every worker has joined the caller gets
//! either the summary or the first error with the partial summary.

use crate::error::{CmdError, Result};
use crate::resilience::Bulkhead;
use crate::types::{Dentry, InodeId};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Contribution of one visited entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryDelta {
    pub length: u64,
    pub entries: u64,
}

impl SummaryDelta {
    pub fn new(length: u64, entries: u64) -> Self {
        Self { length, entries }
    }
}

/// Totals of a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraversalSummary {
    pub length: u64,
    pub entries: u64,
}

/// Lifecycle of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Idle,
    Running,
    /// An error was recorded; workers are unwinding.
    Cancelled,
    CompletedSuccess,
    CompletedError,
}

/// First error of a failed walk, with what was counted before it.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct WalkError {
    pub error: CmdError,
    pub partial: TraversalSummary,
}

impl From<WalkError> for CmdError {
    fn from(e: WalkError) -> Self {
        e.error
    }
}

/// Supplies the children of a directory.
#[async_trait]
pub trait DirectorySource: Send + Sync + 'static {
    async fn list_children(&self, dir: &Dentry) -> Result<Vec<Dentry>>;
}

/// Per-entry work done during a walk.
#[async_trait]
pub trait Visitor: Send + Sync + 'static {
    async fn visit_leaf(&self, entry: &Dentry) -> Result<SummaryDelta>;

    /// Called once a directory's whole subtree has been visited.
    async fn leave_dir(&self, _dir: &Dentry) -> Result<SummaryDelta> {
        Ok(SummaryDelta::default())
    }
}

/// Walk configuration and the state of the latest walk.
///
/// `walk` borrows the walker mutably, so one walker runs one walk at a time
/// and [`TreeWalker::state`] always describes that walk. Use one walker per
/// concurrent traversal.
#[derive(Debug)]
pub struct TreeWalker {
    max_concurrency: usize,
    dedup_hard_links: bool,
    state: Arc<Mutex<WalkState>>,
}

impl TreeWalker {
    /// A walker with at most `max_concurrency` concurrent expansions (at least 1).
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            dedup_hard_links: false,
            state: Arc::new(Mutex::new(WalkState::Idle)),
        }
    }

    /// Count each leaf inode once even when several dentries link to it.
    pub fn dedup_hard_links(mut self, enabled: bool) -> Self {
        self.dedup_hard_links = enabled;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn state(&self) -> WalkState {
        *self.state.lock()
    }

    /// Walk the tree under `root`.
    pub async fn walk<S, V>(
        &mut self,
        source: Arc<S>,
        visitor: Arc<V>,
        root: Dentry,
    ) -> std::result::Result<TraversalSummary, WalkError>
    where
        S: DirectorySource,
        V: Visitor,
    {
        let shared = Arc::new(WalkShared {
            source,
            visitor,
            slots: Bulkhead::new("tree-walk", self.max_concurrency),
            length: AtomicU64::new(0),
            entries: AtomicU64::new(0),
            first_error: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            seen: self.dedup_hard_links.then(|| Mutex::new(HashSet::new())),
            state: Arc::clone(&self.state),
        });
        *self.state.lock() = WalkState::Running;
        debug!(root = root.inode, max_concurrency = self.max_concurrency, "Starting walk");

        let root_slot = shared.slots.try_acquire();
        expand(Arc::clone(&shared), root).await;
        drop(root_slot);

        let summary = shared.summary();
        match shared.first_error.get() {
            Some(error) => {
                *self.state.lock() = WalkState::CompletedError;
                Err(WalkError {
                    error: error.clone(),
                    partial: summary,
                })
            }
            None => {
                *self.state.lock() = WalkState::CompletedSuccess;
                debug!(length = summary.length, entries = summary.entries, "Walk complete");
                Ok(summary)
            }
        }
    }
}

struct WalkShared<S, V> {
    source: Arc<S>,
    visitor: Arc<V>,
    slots: Arc<Bulkhead>,
    length: AtomicU64,
    entries: AtomicU64,
    first_error: OnceLock<CmdError>,
    cancelled: AtomicBool,
    seen: Option<Mutex<HashSet<InodeId>>>,
    state: Arc<Mutex<WalkState>>,
}

impl<S, V> WalkShared<S, V> {
    fn stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.first_error.get().is_some()
    }

    fn fail(&self, error: CmdError) {
        match self.first_error.set(error) {
            Ok(()) => {
                self.cancelled.store(true, Ordering::Release);
                *self.state.lock() = WalkState::Cancelled;
                if let Some(e) = self.first_error.get() {
                    warn!(code = e.code(), error = %e, "Walk cancelled");
                }
            }
            Err(later) => debug!(error = %later, "Dropping error after the first"),
        }
    }

    fn add(&self, delta: SummaryDelta) {
        self.length.fetch_add(delta.length, Ordering::Relaxed);
        self.entries.fetch_add(delta.entries, Ordering::Relaxed);
    }

    /// Check-and-set: true the first time an inode is seen.
    fn first_sighting(&self, inode: InodeId) -> bool {
        match &self.seen {
            Some(seen) => seen.lock().insert(inode),
            None => true,
        }
    }

    fn summary(&self) -> TraversalSummary {
        TraversalSummary {
            length: self.length.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
        }
    }
}

fn expand<S, V>(shared: Arc<WalkShared<S, V>>, dir: Dentry) -> BoxFuture<'static, ()>
where
    S: DirectorySource,
    V: Visitor,
{
    async move {
        if shared.stopped() {
            return;
        }
        let children = match shared.source.list_children(&dir).await {
            Ok(children) => children,
            Err(e) => {
                shared.fail(e);
                return;
            }
        };

        let mut workers = Vec::new();
        for child in children {
            if shared.stopped() {
                break;
            }
            if child.is_dir() {
                match shared.slots.try_acquire() {
                    Some(permit) => {
                        let worker = Arc::clone(&shared);
                        workers.push(tokio::spawn(async move {
                            let _permit = permit;
                            expand(worker, child).await;
                        }));
                    }
                    None => expand(Arc::clone(&shared), child).await,
                }
                continue;
            }

            if !shared.first_sighting(child.inode) {
                continue;
            }
            match shared.visitor.visit_leaf(&child).await {
                Ok(delta) => shared.add(delta),
                Err(e) => shared.fail(e),
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                shared.fail(CmdError::internal(format!("walk worker failed: {}", e)));
            }
        }

        if shared.stopped() {
            return;
        }
        match shared.visitor.leave_dir(&dir).await {
            Ok(delta) => shared.add(delta),
            Err(e) => shared.fail(e),
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileType;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Directory tree held in memory. File length equals its inode number.
    #[derive(Default)]
    struct MemoryTree {
        children: HashMap<InodeId, Vec<Dentry>>,
        failing: Option<InodeId>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MemoryTree {
        fn add(&mut self, parent: InodeId, inode: InodeId, name: &str, file_type: FileType) {
            self.children.entry(parent).or_default().push(Dentry {
                parent,
                name: name.to_string(),
                inode,
                file_type,
            });
        }

        fn dir(&mut self, parent: InodeId, inode: InodeId) {
            self.add(parent, inode, &format!("d{}", inode), FileType::Directory);
            self.children.entry(inode).or_default();
        }

        fn file(&mut self, parent: InodeId, inode: InodeId) {
            self.add(parent, inode, &format!("f{}", inode), FileType::File);
        }

        /// `width` subdirectories of root, each with `files` files.
        fn wide(width: u64, files: u64) -> Self {
            let mut tree = Self::default();
            tree.children.entry(1).or_default();
            let mut next = 100;
            for d in 0..width {
                let dir = 10 + d;
                tree.dir(1, dir);
                for _ in 0..files {
                    tree.file(dir, next);
                    next += 1;
                }
            }
            tree
        }
    }

    #[async_trait]
    impl DirectorySource for MemoryTree {
        async fn list_children(&self, dir: &Dentry) -> Result<Vec<Dentry>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing == Some(dir.inode) {
                return Err(CmdError::rpc_transport("10.0.0.1:6700", "listing failed"));
            }
            Ok(self.children.get(&dir.inode).cloned().unwrap_or_default())
        }
    }

    struct SizeVisitor;

    #[async_trait]
    impl Visitor for SizeVisitor {
        async fn visit_leaf(&self, entry: &Dentry) -> Result<SummaryDelta> {
            Ok(SummaryDelta::new(entry.inode, 1))
        }
    }

    fn root() -> Dentry {
        Dentry::directory(0, 1)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_high_water_mark() {
        let mut tree = MemoryTree::wide(20, 5);
        tree.delay = Duration::from_millis(5);
        let tree = Arc::new(tree);

        let mut walker = TreeWalker::new(3);
        let summary = walker
            .walk(Arc::clone(&tree), Arc::new(SizeVisitor), root())
            .await
            .unwrap();

        assert_eq!(summary.entries, 100);
        assert_eq!(summary.length, (100..200).sum::<u64>());
        let peak = tree.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {} over limit", peak);
        assert_eq!(walker.state(), WalkState::CompletedSuccess);
    }

    #[tokio::test]
    async fn test_single_slot_walks_inline() {
        let tree = Arc::new(MemoryTree::wide(4, 3));
        let mut walker = TreeWalker::new(1);
        let summary = walker
            .walk(Arc::clone(&tree), Arc::new(SizeVisitor), root())
            .await
            .unwrap();
        assert_eq!(summary.entries, 12);
        assert_eq!(tree.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_partial_summary() {
        let mut tree = MemoryTree::default();
        tree.file(1, 2);
        tree.file(1, 3);
        tree.dir(1, 4);
        tree.file(4, 40);
        tree.file(1, 5);
        tree.dir(1, 6);
        for i in 60..70 {
            tree.file(6, i);
        }
        tree.failing = Some(4);

        let mut walker = TreeWalker::new(1);
        let err = walker
            .walk(Arc::new(tree), Arc::new(SizeVisitor), root())
            .await
            .unwrap_err();

        assert_eq!(err.error.code(), crate::error::CODE_RPC);
        assert!(err.error.message().contains("listing failed"));
        assert_eq!(err.partial, TraversalSummary { length: 5, entries: 2 });
        assert_eq!(walker.state(), WalkState::CompletedError);
    }

    #[tokio::test]
    async fn test_reused_walker_reports_latest_walk() {
        let mut failing = MemoryTree::wide(2, 2);
        failing.failing = Some(11);
        let mut walker = TreeWalker::new(2);

        assert_eq!(walker.state(), WalkState::Idle);
        walker
            .walk(Arc::new(failing), Arc::new(SizeVisitor), root())
            .await
            .unwrap_err();
        assert_eq!(walker.state(), WalkState::CompletedError);

        let summary = walker
            .walk(Arc::new(MemoryTree::wide(2, 2)), Arc::new(SizeVisitor), root())
            .await
            .unwrap();
        assert_eq!(summary.entries, 4);
        assert_eq!(walker.state(), WalkState::CompletedSuccess);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_first_error_wins_under_concurrency() {
        let mut tree = MemoryTree::wide(10, 2);
        tree.failing = Some(13);
        let mut walker = TreeWalker::new(4);
        let err = walker
            .walk(Arc::new(tree), Arc::new(SizeVisitor), root())
            .await
            .unwrap_err();
        assert!(err.error.message().contains("listing failed"));
        assert!(err.partial.entries < 20);
    }

    #[tokio::test]
    async fn test_hard_link_dedup() {
        let mut tree = MemoryTree::default();
        tree.file(1, 7);
        tree.dir(1, 2);
        tree.add(2, 7, "link", FileType::File);
        let tree = Arc::new(tree);

        let counted = TreeWalker::new(2)
            .walk(Arc::clone(&tree), Arc::new(SizeVisitor), root())
            .await
            .unwrap();
        assert_eq!(counted.entries, 2);

        let deduped = TreeWalker::new(2)
            .dedup_hard_links(true)
            .walk(tree, Arc::new(SizeVisitor), root())
            .await
            .unwrap();
        assert_eq!(deduped.entries, 1);
        assert_eq!(deduped.length, 7);
    }

    struct RecordingVisitor {
        events: Mutex<Vec<(InodeId, InodeId)>>,
    }

    #[async_trait]
    impl Visitor for RecordingVisitor {
        async fn visit_leaf(&self, entry: &Dentry) -> Result<SummaryDelta> {
            self.events.lock().push((entry.parent, entry.inode));
            Ok(SummaryDelta::new(0, 1))
        }

        async fn leave_dir(&self, dir: &Dentry) -> Result<SummaryDelta> {
            self.events.lock().push((dir.parent, dir.inode));
            Ok(SummaryDelta::new(0, 1))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_leave_dir_after_children() {
        let mut tree = MemoryTree::wide(6, 4);
        tree.dir(10, 50);
        tree.file(50, 500);
        let visitor = Arc::new(RecordingVisitor {
            events: Mutex::new(Vec::new()),
        });

        let summary = TreeWalker::new(3)
            .walk(Arc::new(tree), Arc::clone(&visitor), root())
            .await
            .unwrap();
        // 25 files, 7 subdirectories and the root.
        assert_eq!(summary.entries, 33);

        let events = visitor.events.lock().clone();
        let position: HashMap<InodeId, usize> =
            events.iter().enumerate().map(|(i, (_, inode))| (*inode, i)).collect();
        for (parent, inode) in &events {
            if let Some(parent_pos) = position.get(parent) {
                assert!(
                    position[inode] < *parent_pos,
                    "{} left after its parent {}",
                    inode,
                    parent
                );
            }
        }
        assert_eq!(events.last().unwrap().1, 1);
    }
}
