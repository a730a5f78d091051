//! zapdir - Multithreaded Recursive Directory Eraser
//!
//! Deletes very large folder trees fast by running enumeration and unlink
//! operations on a pool of worker threads. Serial removal of a big tree is
//! dominated by per-entry syscall latency; issuing those calls in parallel
//! cuts wall-clock time dramatically, especially on network filesystems
//! where every call pays a round trip.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Loop Thread                          │
//! │   enqueue scan / delete-batch / delete-folder tasks,        │
//! │   collect completions, account phases, deliver ticks        │
//! └───────────────┬─────────────────────────────▲───────────────┘
//! │               │ task channel                │ completion channel
//! │               ▼                             │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐      │
//! │  │Worker 1 │  │Worker 2 │  │Worker N │  ────┘
//! │  │ scan /  │  │ scan /  │  │ scan /  │
//! │  │ unlink  │  │ unlink  │  │ unlink  │
//! │  └────┬────┘  └────┬────┘  └────┬────┘
//! │       ▼            ▼            ▼
//! │            Folder tree (pending-children counters)
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every folder moves through three phases: scan, delete-files,
//! delete-self. The only cross-phase ordering is per-folder: a folder's
//! self-deletion is enqueued exactly when its pending-children counter
//! reaches zero, which makes directory removal strictly bottom-up without
//! any global coordination.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zapdir::config::EraseConfig;
//! use zapdir::fsops;
//! use zapdir::machine;
//! use zapdir::tree::Folder;
//!
//! let path = std::path::PathBuf::from("/data/old-build");
//! let attrs = fsops::probe_attrs(&path).unwrap();
//! let root = Folder::root(path, attrs);
//!
//! let conf = EraseConfig::default();
//! machine::delete(&root, false, &conf, |info| {
//!     eprintln!("{} files deleted", info.files_deleted);
//!     true // keep going
//! })
//! .unwrap();
//! ```

pub mod config;
pub mod error;
pub mod fsops;
pub mod machine;
pub mod progress;
pub mod tree;

pub use config::EraseConfig;
pub use error::{ConfigError, Error, MachineError, OpError, Result};
pub use machine::{delete, scan, TickInfo};
pub use tree::{FileEntry, Folder};
