//! In-memory folder tree
//!
//! The tree is a partial model of what enumeration has discovered so far:
//! each `Folder` owns its child folders and file entries, and carries a
//! `pending` counter of children still standing in the way of deleting it.
//! Every file and subfolder contributes exactly one increment at discovery
//! and exactly one decrement at completion, so the counter reaches zero
//! exactly once - the moment the folder itself becomes deletable.
//!
//! Mutation discipline: a folder's lists are populated only by the worker
//! scanning that folder and are read-only afterwards, except for the single
//! `clear_files` call that releases memory before the folder's own removal.
//! `pending` is atomic because workers finishing deletions on different
//! folders decrement their parents' counters concurrently.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::fsops::Attrs;

/// Sentinel installed in `pending` once a folder's own deletion has been
/// scheduled; guarantees the deletion is enqueued at most once.
pub const BEING_DELETED: u64 = u64::MAX;

/// One file discovered inside a folder
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: OsString,
    pub attrs: Attrs,
    pub bytes: u64,
}

/// A discovered directory
///
/// The root's `name` is the absolute target path; every other node holds
/// its leaf component, and the full path is recovered by walking parent
/// links. Parent links are weak: the caller's `Arc` owns the root, the
/// root owns its subtree, and dropping the root frees everything.
pub struct Folder {
    name: OsString,
    attrs: Attrs,
    parent: Option<Weak<Folder>>,
    subdirs: RwLock<Vec<Arc<Folder>>>,
    files: RwLock<Vec<FileEntry>>,
    pending: AtomicU64,
}

impl Folder {
    /// Create a root node; `path` must be the absolute target path
    pub fn root(path: PathBuf, attrs: Attrs) -> Arc<Self> {
        Arc::new(Self {
            name: path.into_os_string(),
            attrs,
            parent: None,
            subdirs: RwLock::new(Vec::new()),
            files: RwLock::new(Vec::new()),
            pending: AtomicU64::new(0),
        })
    }

    /// Append a child folder and count it as pending
    pub fn add_subdir(self: &Arc<Self>, name: &OsStr, attrs: Attrs) -> Arc<Folder> {
        let child = Arc::new(Folder {
            name: name.to_os_string(),
            attrs,
            parent: Some(Arc::downgrade(self)),
            subdirs: RwLock::new(Vec::new()),
            files: RwLock::new(Vec::new()),
            pending: AtomicU64::new(0),
        });
        self.subdirs.write().push(Arc::clone(&child));
        self.pending.fetch_add(1, Ordering::AcqRel);
        child
    }

    /// Append a file entry and count it as pending
    pub fn add_file(&self, entry: FileEntry) {
        self.files.write().push(entry);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn attrs(&self) -> Attrs {
        self.attrs
    }

    /// The parent node, if any; `None` at the root
    pub fn parent(&self) -> Option<Arc<Folder>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Compose the full path by walking parent links
    pub fn path(&self) -> PathBuf {
        let mut names = vec![self.name.clone()];
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            names.push(node.name.clone());
            cursor = node.parent();
        }

        let mut path = PathBuf::new();
        for name in names.iter().rev() {
            path.push(name);
        }
        path
    }

    /// Snapshot of the child folders
    pub fn subdirs(&self) -> Vec<Arc<Folder>> {
        self.subdirs.read().clone()
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Total bytes of the files recorded in this folder
    pub fn file_bytes(&self) -> u64 {
        self.files.read().iter().map(|f| f.bytes).sum()
    }

    /// Read access to the file list; held across a deletion batch
    pub fn files(&self) -> RwLockReadGuard<'_, Vec<FileEntry>> {
        self.files.read()
    }

    /// Release the file storage ahead of the folder's own removal
    pub fn clear_files(&self) {
        *self.files.write() = Vec::new();
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }

    /// One child (file or folder) finished; called by worker threads
    pub fn child_done(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Install the being-deleted sentinel, returning the previous count
    ///
    /// The caller must have observed `pending == 0`; any other previous
    /// value is an internal defect.
    pub fn mark_deleting(&self) -> u64 {
        self.pending.swap(BEING_DELETED, Ordering::AcqRel)
    }

    /// True iff every child has been confirmed deleted and the folder has
    /// not already been scheduled
    pub fn ready_for_delete(&self) -> bool {
        self.pending() == 0
    }

    /// Append every folder of the subtree, children before self
    pub fn census(self: &Arc<Self>, out: &mut Vec<Arc<Folder>>) {
        for sub in self.subdirs.read().iter() {
            sub.census(out);
        }
        out.push(Arc::clone(self));
    }
}
