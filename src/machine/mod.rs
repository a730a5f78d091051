//! The machine - concurrent scan/delete pipeline
//!
//! One scheduling thread (the loop thread) drives N workers through three
//! phases per folder:
//!
//! 1. scan - enumerate the folder, growing the tree
//! 2. delete-files - unlink the folder's files in batches
//! 3. delete-self - remove the emptied folder
//!
//! The phase graph is a DAG on folders: an ancestor's phase 3 depends on
//! every descendant's phase 3, which depends on that folder's phase 2
//! batches. No ordering exists across unrelated folders - the only
//! cross-phase enforcement is each folder's pending-children counter, which
//! reaches zero exactly once and schedules the self-deletion at that
//! moment.
//!
//! All enqueue/complete bookkeeping runs on the loop thread; workers only
//! execute tasks and bump shared atomic counters. The loop thread blocks
//! only in `collect`, workers only inside filesystem calls.

pub mod queue;

mod pool;
mod task;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::EraseConfig;
use crate::error::{MachineError, OpError};
use crate::machine::pool::TaskPool;
use crate::machine::queue::WorkQueue;
use crate::machine::task::{Phase, Shared, Task};
use crate::tree::Folder;

/// How long one collect round blocks waiting for a completion
const COLLECT_TIMEOUT: Duration = Duration::from_millis(50);

/// Progress snapshot delivered to the tick callback
///
/// The error slices borrow the just-completed task's buffer and are valid
/// only for the duration of the call.
#[derive(Debug)]
pub struct TickInfo<'a> {
    pub folders_found: u64,
    pub folders_deleted: u64,
    pub files_found: u64,
    pub files_deleted: u64,
    pub bytes_found: u64,
    pub bytes_deleted: u64,

    /// Folders discovered but not yet scanned (phase-1 backlog)
    pub folders_togo: u64,

    /// Set on the single final tick of a non-cancelled run
    pub done: bool,

    pub scanner_errors: &'a [OpError],
    pub deleter_errors: &'a [OpError],
}

/// Enumerate a tree without deleting anything
///
/// Populates `root`'s subtree and reports found counters through the
/// callback. Returns `Err(Cancelled)` if the callback asked to stop.
pub fn scan<C>(root: &Arc<Folder>, conf: &EraseConfig, cb: C) -> Result<(), MachineError>
where
    C: FnMut(&TickInfo<'_>) -> bool,
{
    let mut mach = Machine::new(conf, true, cb)?;

    info!(path = %root.path().display(), threads = conf.worker_count(), "scan starting");

    // The root itself counts as found before any task runs.
    mach.shared.folders_found.store(1, Ordering::Relaxed);
    mach.enqueue_ph1(root);

    mach.run();
    mach.term();
    mach.outcome()
}

/// Delete a tree, including the root unless configured otherwise
///
/// With `prescanned` the caller supplies a fully populated tree (from a
/// previous [`scan`]) and no enumeration happens; otherwise scanning and
/// deletion are interleaved in a single pass.
pub fn delete<C>(
    root: &Arc<Folder>,
    prescanned: bool,
    conf: &EraseConfig,
    cb: C,
) -> Result<(), MachineError>
where
    C: FnMut(&TickInfo<'_>) -> bool,
{
    if prescanned {
        delete_prescanned(root, conf, cb)
    } else {
        scan_and_delete(root, conf, cb)
    }
}

fn scan_and_delete<C>(root: &Arc<Folder>, conf: &EraseConfig, cb: C) -> Result<(), MachineError>
where
    C: FnMut(&TickInfo<'_>) -> bool,
{
    let mut mach = Machine::new(conf, false, cb)?;

    info!(path = %root.path().display(), threads = conf.worker_count(), "scan-and-delete starting");

    mach.shared.folders_found.store(1, Ordering::Relaxed);
    mach.enqueue_ph1(root);

    mach.run();
    mach.term();
    mach.outcome()
}

fn delete_prescanned<C>(root: &Arc<Folder>, conf: &EraseConfig, cb: C) -> Result<(), MachineError>
where
    C: FnMut(&TickInfo<'_>) -> bool,
{
    let mut mach = Machine::new(conf, false, cb)?;

    let mut list = Vec::new();
    root.census(&mut list);

    info!(path = %root.path().display(), folders = list.len(), "prescanned delete starting");

    // Seed the found counters from the census so found/deleted stay
    // consistent within this run and final counters match the single-pass
    // path.
    let files: u64 = list.iter().map(|f| f.file_count() as u64).sum();
    let bytes: u64 = list.iter().map(|f| f.file_bytes()).sum();
    mach.shared
        .folders_found
        .store(list.len() as u64, Ordering::Relaxed);
    mach.shared.files_found.store(files, Ordering::Relaxed);
    mach.shared.bytes_found.store(bytes, Ordering::Relaxed);

    for folder in &list {
        if folder.file_count() > 0 {
            mach.enqueue_ph2(folder);
        } else if folder.subdirs().is_empty() {
            mach.enqueue_ph3(folder);
        }
        // Folders with subfolders wait for the upward deletion wave.
    }

    mach.run();
    mach.term();
    mach.outcome()
}

struct Machine<C>
where
    C: FnMut(&TickInfo<'_>) -> bool,
{
    cb: C,
    shared: Arc<Shared>,
    queue: WorkQueue<Task>,
    pool: TaskPool,

    ph1_only: bool,
    keep_root: bool,
    delete_batch: usize,

    enough: bool,
    folders_togo: u64,

    ph1_work: u64,
    ph1_done: u64,
    ph2_work: u64,
    ph2_done: u64,
    ph3_work: u64,
    ph3_done: u64,

    scanner_log: Vec<OpError>,
    deleter_log: Vec<OpError>,
}

impl<C> Machine<C>
where
    C: FnMut(&TickInfo<'_>) -> bool,
{
    fn new(conf: &EraseConfig, ph1_only: bool, cb: C) -> Result<Self, MachineError> {
        let shared = Arc::new(Shared::new(conf.scan_buffer(), conf.unlink_syscall));
        let queue = WorkQueue::start(conf.worker_count()).map_err(MachineError::Spawn)?;
        let pool = TaskPool::new(Arc::clone(&shared));

        Ok(Self {
            cb,
            shared,
            queue,
            pool,
            ph1_only,
            keep_root: conf.keep_root,
            delete_batch: conf.batch_limit(),
            enough: false,
            folders_togo: 0,
            ph1_work: 0,
            ph1_done: 0,
            ph2_work: 0,
            ph2_done: 0,
            ph3_work: 0,
            ph3_done: 0,
            scanner_log: Vec::new(),
            deleter_log: Vec::new(),
        })
    }

    fn keep_going(&self) -> bool {
        if self.enough {
            return false;
        }
        self.ph1_done < self.ph1_work
            || self.ph2_done < self.ph2_work
            || self.ph3_done < self.ph3_work
    }

    fn enqueue_ph1(&mut self, folder: &Arc<Folder>) {
        let task = self.pool.get(Arc::clone(folder), Phase::Scan);
        self.queue.enqueue(task);
        self.ph1_work += 1;
    }

    fn enqueue_ph2(&mut self, folder: &Arc<Folder>) {
        let total = folder.file_count();
        let mut start = 0;
        while start < total {
            let chunk = (total - start).min(self.delete_batch);
            let task = self
                .pool
                .get(Arc::clone(folder), Phase::DeleteFiles { first: start, count: chunk });
            self.queue.enqueue(task);
            self.ph2_work += 1;
            start += chunk;
        }
    }

    /// Schedule a folder's self-deletion; every scheduling site funnels
    /// through here so the keep-root policy and the single-enqueue
    /// invariant hold everywhere
    fn enqueue_ph3(&mut self, folder: &Arc<Folder>) {
        if self.keep_root && folder.is_root() {
            return;
        }

        let prev = folder.mark_deleting();
        assert_eq!(prev, 0, "folder scheduled for deletion with children pending");

        let task = self.pool.get(Arc::clone(folder), Phase::DeleteFolder);
        self.queue.enqueue(task);
        self.ph3_work += 1;
    }

    fn complete_ph1(&mut self, task: Task) {
        assert!(!self.enough);
        self.ph1_done += 1;

        let folder = Arc::clone(task.folder());
        let subdirs = folder.subdirs();

        for sub in &subdirs {
            if sub.attrs().is_reparse() {
                // Never entered. In delete mode the link entry itself still
                // has to go; it was never scanned, so it is deletable now.
                if !self.ph1_only {
                    self.enqueue_ph3(sub);
                }
                continue;
            }
            self.enqueue_ph1(sub);
        }

        if !self.ph1_only {
            if folder.file_count() > 0 {
                self.enqueue_ph2(&folder);
            } else if subdirs.is_empty() {
                self.enqueue_ph3(&folder);
            }
            // With files, the last batch completion trips the zero-pending
            // rule; with subfolders, the upward wave does.
        }

        self.folders_togo = self.ph1_work - self.ph1_done;

        self.tick(task.errors(), &[]);
        self.scanner_log.extend_from_slice(task.errors());
        self.pool.put(task);
    }

    fn complete_ph2(&mut self, task: Task) {
        assert!(!self.enough);
        self.ph2_done += 1;

        let folder = Arc::clone(task.folder());

        if folder.ready_for_delete() {
            // Free the file storage before scheduling the removal.
            folder.clear_files();
            self.enqueue_ph3(&folder);
        }

        self.tick(&[], task.errors());
        self.deleter_log.extend_from_slice(task.errors());
        self.pool.put(task);
    }

    fn complete_ph3(&mut self, task: Task) {
        assert!(!self.enough);
        self.ph3_done += 1;

        // Walk the deletion wave upward.
        if let Some(parent) = task.folder().parent() {
            if parent.ready_for_delete() {
                self.enqueue_ph3(&parent);
            }
        }

        self.pool.put(task);
    }

    fn run(&mut self) {
        let mut out = Vec::new();

        while self.keep_going() {
            self.queue.collect(&mut out, COLLECT_TIMEOUT);

            for task in out.drain(..) {
                if self.enough {
                    self.pool.put(task);
                    continue;
                }

                match task.phase() {
                    Phase::Scan => self.complete_ph1(task),
                    Phase::DeleteFiles { .. } => self.complete_ph2(task),
                    Phase::DeleteFolder => self.complete_ph3(task),
                }
            }
        }

        if !self.enough {
            self.final_tick();
        }

        debug!(
            folders = self.shared.folders_deleted.load(Ordering::Relaxed),
            files = self.shared.files_deleted.load(Ordering::Relaxed),
            scanner_errors = self.scanner_log.len(),
            deleter_errors = self.deleter_log.len(),
            cancelled = self.enough,
            "machine loop finished"
        );
    }

    /// Deliver one tick; a false return from the callback flips `enough`
    fn tick(&mut self, scanner_errors: &[OpError], deleter_errors: &[OpError]) {
        let info = self.snapshot(false, scanner_errors, deleter_errors);
        if !(self.cb)(&info) {
            self.enough = true;
            self.shared.enough.store(true, Ordering::Release);
        }
    }

    /// The single `done` tick of a non-cancelled run
    fn final_tick(&mut self) {
        let info = self.snapshot(true, &[], &[]);
        (self.cb)(&info);
    }

    fn snapshot<'a>(
        &self,
        done: bool,
        scanner_errors: &'a [OpError],
        deleter_errors: &'a [OpError],
    ) -> TickInfo<'a> {
        TickInfo {
            folders_found: self.shared.folders_found.load(Ordering::Relaxed),
            folders_deleted: self.shared.folders_deleted.load(Ordering::Relaxed),
            files_found: self.shared.files_found.load(Ordering::Relaxed),
            files_deleted: self.shared.files_deleted.load(Ordering::Relaxed),
            bytes_found: self.shared.bytes_found.load(Ordering::Relaxed),
            bytes_deleted: self.shared.bytes_deleted.load(Ordering::Relaxed),
            folders_togo: self.folders_togo,
            done,
            scanner_errors,
            deleter_errors,
        }
    }

    /// Drain the queue and return every task to the pool
    fn term(&mut self) {
        let mut out = Vec::new();
        self.queue.cancel(&mut out);
        for task in out {
            self.pool.put(task);
        }
        assert!(self.pool.unused(), "task pool leak at teardown");
    }

    fn outcome(&self) -> Result<(), MachineError> {
        if self.enough {
            Err(MachineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsops;
    use std::fs;
    use tempfile::tempdir;

    fn make_root(path: &std::path::Path) -> Arc<Folder> {
        Folder::root(path.to_path_buf(), fsops::probe_attrs(path).unwrap())
    }

    fn conf() -> EraseConfig {
        EraseConfig { threads: 2, ..EraseConfig::default() }
    }

    #[test]
    fn test_scan_only_leaves_tree_on_disk() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("f1"), b"1234").unwrap();
        fs::create_dir(target.join("sub")).unwrap();
        fs::write(target.join("sub/f2"), b"56").unwrap();

        let root = make_root(&target);
        let mut last = (0, 0, 0);
        scan(&root, &conf(), |info| {
            last = (info.folders_found, info.files_found, info.bytes_found);
            true
        })
        .unwrap();

        assert_eq!(last, (2, 2, 6));
        assert!(target.join("f1").exists());
        assert_eq!(root.file_count(), 1);
        assert_eq!(root.subdirs().len(), 1);
    }

    #[test]
    fn test_scan_and_delete_removes_root() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("f"), b"abc").unwrap();

        let root = make_root(&target);
        let mut done_ticks = 0;
        delete(&root, false, &conf(), |info| {
            if info.done {
                done_ticks += 1;
                assert_eq!(info.folders_deleted, 1);
                assert_eq!(info.files_deleted, 1);
            }
            true
        })
        .unwrap();

        assert_eq!(done_ticks, 1);
        assert!(!target.exists());
    }

    #[test]
    fn test_keep_root_spares_the_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("f"), b"abc").unwrap();
        fs::create_dir(target.join("sub")).unwrap();

        let root = make_root(&target);
        let mut conf = conf();
        conf.keep_root = true;

        delete(&root, false, &conf, |_| true).unwrap();

        assert!(target.exists());
        assert!(!target.join("f").exists());
        assert!(!target.join("sub").exists());
    }

    #[test]
    fn test_cancellation_skips_done_tick() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("f"), b"abc").unwrap();

        let mut saw_done = false;
        let result = delete(&make_root(&target), false, &conf(), |info| {
            saw_done |= info.done;
            false
        });

        assert!(matches!(result, Err(MachineError::Cancelled)));
        assert!(!saw_done);
    }

    #[test]
    fn test_small_batches_split_phase2() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("t");
        fs::create_dir(&target).unwrap();
        for i in 0..10 {
            fs::write(target.join(format!("f{i}")), b"x").unwrap();
        }

        let mut conf = conf();
        conf.delete_batch = 3;

        let mut deleted = 0u64;
        delete(&make_root(&target), false, &conf, |info| {
            assert!(info.files_deleted >= deleted);
            deleted = info.files_deleted;
            true
        })
        .unwrap();

        assert!(!target.exists());
        assert_eq!(deleted, 10);
    }
}
