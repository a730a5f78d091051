//! Tasks - the unit of work the queue executes
//!
//! One task type with a phase tag rather than three task types: the work
//! queue only cares that a task is executable, and the pool can recycle
//! one allocation across phases.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::OpError;
use crate::fsops::{self, Attrs, ScanSink};
use crate::machine::queue::WorkItem;
use crate::tree::{FileEntry, Folder};

/// The stage a task runs for its folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Enumerate the folder, populating its subdir and file lists
    Scan,
    /// Unlink `files[first .. first + count]`
    DeleteFiles { first: usize, count: usize },
    /// Remove the now-empty folder itself
    DeleteFolder,
}

/// Counters and flags shared between the loop thread and the workers
///
/// The found/deleted counters are bumped by workers as they go and read by
/// the loop thread when building ticks; `enough` is the cancellation flag
/// workers probe between file deletions.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub folders_found: AtomicU64,
    pub folders_deleted: AtomicU64,
    pub files_found: AtomicU64,
    pub files_deleted: AtomicU64,
    pub bytes_found: AtomicU64,
    pub bytes_deleted: AtomicU64,

    pub enough: AtomicBool,

    pub scan_buf_size: usize,
    pub unlink_syscall: bool,
}

impl Shared {
    pub fn new(scan_buf_size: usize, unlink_syscall: bool) -> Self {
        Self {
            scan_buf_size,
            unlink_syscall,
            ..Self::default()
        }
    }
}

/// A recyclable unit of work
///
/// Carries its target folder and phase while assigned, and a local error
/// buffer that travels with the task through the queue: only the executing
/// worker touches it, then only the loop thread after collection.
pub(crate) struct Task {
    job: Option<(Arc<Folder>, Phase)>,
    errors: Vec<OpError>,
    shared: Arc<Shared>,
}

impl Task {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            job: None,
            errors: Vec::new(),
            shared,
        }
    }

    pub fn assign(&mut self, folder: Arc<Folder>, phase: Phase) {
        assert!(
            self.job.is_none() && self.errors.is_empty(),
            "task assigned while still in use"
        );
        self.job = Some((folder, phase));
    }

    /// Clear transient state ahead of returning to the pool
    pub fn reset(&mut self) {
        self.job = None;
        self.errors.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.job.is_none()
    }

    pub fn folder(&self) -> &Arc<Folder> {
        &self.job.as_ref().expect("task has no folder assigned").0
    }

    pub fn phase(&self) -> Phase {
        self.job.as_ref().expect("task has no phase assigned").1
    }

    pub fn errors(&self) -> &[OpError] {
        &self.errors
    }

    fn delete_files(&mut self, folder: &Arc<Folder>, path: &Path, first: usize, count: usize) {
        let files = folder.files();
        assert!(first + count <= files.len(), "deletion batch out of range");

        for entry in &files[first..first + count] {
            // Cooperative cancellation: abandon the rest of the batch so a
            // cancel does not wait out thousands of unlinks.
            if self.shared.enough.load(Ordering::Acquire) {
                break;
            }

            let file_path = path.join(&entry.name);
            if fsops::delete_file(
                &file_path,
                entry.attrs,
                self.shared.unlink_syscall,
                &mut self.errors,
            ) {
                self.shared.files_deleted.fetch_add(1, Ordering::Relaxed);
                self.shared
                    .bytes_deleted
                    .fetch_add(entry.bytes, Ordering::Relaxed);
            }

            // Exactly one decrement per file, success or failure.
            folder.child_done();
        }
    }

    fn delete_folder(&mut self, folder: &Arc<Folder>, path: &Path) {
        if fsops::delete_folder(path, folder.attrs(), &mut self.errors) {
            self.shared.folders_deleted.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(parent) = folder.parent() {
            parent.child_done();
        }
    }
}

impl WorkItem for Task {
    fn execute(&mut self) {
        let (folder, phase) = self
            .job
            .clone()
            .expect("task executed without an assignment");

        let path = folder.path();

        match phase {
            Phase::Scan => {
                let mut sink = ScanRecorder {
                    folder: &folder,
                    shared: &self.shared,
                    errors: &mut self.errors,
                };
                fsops::scan_folder(&path, self.shared.scan_buf_size, &mut sink);
            }
            Phase::DeleteFiles { first, count } => {
                self.delete_files(&folder, &path, first, count);
            }
            Phase::DeleteFolder => {
                self.delete_folder(&folder, &path);
            }
        }
    }
}

/// Scan sink that grows the tree and bumps the found counters
struct ScanRecorder<'a> {
    folder: &'a Arc<Folder>,
    shared: &'a Shared,
    errors: &'a mut Vec<OpError>,
}

impl ScanSink for ScanRecorder<'_> {
    fn on_file(&mut self, name: &OsStr, attrs: Attrs, bytes: u64) {
        self.folder.add_file(FileEntry {
            name: name.to_os_string(),
            attrs,
            bytes,
        });
        self.shared.files_found.fetch_add(1, Ordering::Relaxed);
        self.shared.bytes_found.fetch_add(bytes, Ordering::Relaxed);
    }

    fn on_folder(&mut self, name: &OsStr, attrs: Attrs) {
        self.folder.add_subdir(name, attrs);
        self.shared.folders_found.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error(&mut self, err: OpError) {
        // Zero-code records mean "entry plus warning slot, no warning".
        if err.code != 0 {
            self.errors.push(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new(8 * 1024, false))
    }

    #[test]
    fn test_scan_task_populates_folder() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"12345").unwrap();
        fs::write(dir.path().join("b"), b"1234567").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let shared = shared();
        let root = Folder::root(dir.path().to_path_buf(), Attrs::default());

        let mut task = Task::new(Arc::clone(&shared));
        task.assign(Arc::clone(&root), Phase::Scan);
        task.execute();

        assert_eq!(root.file_count(), 2);
        assert_eq!(root.subdirs().len(), 1);
        assert_eq!(root.pending(), 3);
        assert_eq!(shared.files_found.load(Ordering::Relaxed), 2);
        assert_eq!(shared.folders_found.load(Ordering::Relaxed), 1);
        assert_eq!(shared.bytes_found.load(Ordering::Relaxed), 12);
        assert!(task.errors().is_empty());
    }

    #[test]
    fn test_delete_files_batch_decrements_pending() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("x"), b"12").unwrap();
        fs::write(dir.path().join("y"), b"345").unwrap();

        let shared = shared();
        let root = Folder::root(dir.path().to_path_buf(), Attrs::default());

        let mut task = Task::new(Arc::clone(&shared));
        task.assign(Arc::clone(&root), Phase::Scan);
        task.execute();
        task.reset();

        let count = root.file_count();
        task.assign(Arc::clone(&root), Phase::DeleteFiles { first: 0, count });
        task.execute();

        assert_eq!(shared.files_deleted.load(Ordering::Relaxed), 2);
        assert_eq!(shared.bytes_deleted.load(Ordering::Relaxed), 5);
        assert!(root.ready_for_delete());
        assert!(!dir.path().join("x").exists());
    }

    #[test]
    fn test_delete_files_honors_cancellation() {
        let dir = tempdir().unwrap();
        for i in 0..8 {
            fs::write(dir.path().join(format!("f{i}")), b"x").unwrap();
        }

        let shared = shared();
        let root = Folder::root(dir.path().to_path_buf(), Attrs::default());

        let mut task = Task::new(Arc::clone(&shared));
        task.assign(Arc::clone(&root), Phase::Scan);
        task.execute();
        task.reset();

        shared.enough.store(true, Ordering::Release);

        let count = root.file_count();
        task.assign(Arc::clone(&root), Phase::DeleteFiles { first: 0, count });
        task.execute();

        assert_eq!(shared.files_deleted.load(Ordering::Relaxed), 0);
        assert_eq!(root.pending(), count as u64);
    }

    #[test]
    fn test_delete_folder_task_updates_parent() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let shared = shared();
        let root = Folder::root(dir.path().to_path_buf(), Attrs::default());

        let mut task = Task::new(Arc::clone(&shared));
        task.assign(Arc::clone(&root), Phase::Scan);
        task.execute();
        task.reset();

        let sub = root.subdirs().pop().unwrap();
        task.assign(Arc::clone(&sub), Phase::DeleteFolder);
        task.execute();

        assert_eq!(shared.folders_deleted.load(Ordering::Relaxed), 1);
        assert!(root.ready_for_delete());
        assert!(!dir.path().join("sub").exists());
    }

    #[test]
    fn test_scan_missing_folder_records_error() {
        let shared = shared();
        let root = Folder::root(PathBuf::from("/definitely/not/here"), Attrs::default());

        let mut task = Task::new(shared);
        task.assign(root, Phase::Scan);
        task.execute();

        assert_eq!(task.errors().len(), 1);
    }
}
