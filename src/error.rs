//! Error types for zapdir
//!
//! Two kinds of failure live here and they are deliberately kept apart:
//!
//! - Typed errors (`ConfigError`, `MachineError`) for things that stop an
//!   operation from starting or finishing: bad arguments, unusable paths,
//!   a worker pool that would not spawn, a cancelled run.
//! - Per-entry operation records (`OpError`) for the thousands of small
//!   failures a large deletion can produce (an unlinkable file, an
//!   unreadable subdirectory). These never abort the run; they accumulate
//!   and are reported through progress ticks.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level error type for the zapdir library
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or path vetting errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Machine-level errors (init failure, cancellation)
    #[error("machine error: {0}")]
    Machine(#[from] MachineError),

    /// I/O errors outside the machine (path probing, prompts)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration and path vetting errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Target path does not exist
    #[error("path not found: '{path}'")]
    PathNotFound { path: PathBuf },

    /// Target path points at a file, not a directory
    #[error("path points at a file: '{path}'")]
    NotADirectory { path: PathBuf },

    /// Refusing to operate on the root of the filesystem
    #[error("the filesystem root is not supported as a target")]
    FilesystemRoot,

    /// Refusing to operate on a protected system path
    #[error("restricted path: '{path}'")]
    RestrictedPath { path: PathBuf },

    /// Could not check the target path
    #[error("cannot check path '{path}': {source}")]
    CannotCheck {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid worker thread count
    #[error("invalid thread count {count}: must be between 1 and {max}")]
    InvalidThreadCount { count: usize, max: usize },

    /// Invalid enumeration buffer size
    #[error("invalid scan buffer size {kb} KiB: maximum is {max_kb} KiB")]
    InvalidScanBuffer { kb: usize, max_kb: usize },
}

/// Machine-level errors
///
/// `Spawn` is the fatal-init case: the worker pool could not start and no
/// tick was ever delivered. `Cancelled` means the tick callback returned
/// false; pending tasks were discarded and the tree may be partially
/// deleted.
#[derive(Error, Debug)]
pub enum MachineError {
    /// Worker pool failed to start
    #[error("failed to start worker pool: {0}")]
    Spawn(#[source] io::Error),

    /// The tick callback requested cancellation
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias for the zapdir library
pub type Result<T> = std::result::Result<T, Error>;

/// A single failed filesystem operation
///
/// `code` is the OS error code, `func` names the primitive that failed and
/// `args` describes its input (the path). Records with code 0 mean
/// "no error" and are dropped at the point of collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    pub code: i32,
    pub func: &'static str,
    pub args: String,
}

impl OpError {
    /// Build a record from an `io::Error`, capturing the raw OS code
    pub fn new(func: &'static str, path: &Path, err: &io::Error) -> Self {
        Self {
            code: err.raw_os_error().unwrap_or(-1),
            func,
            args: path.display().to_string(),
        }
    }
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed with code {} - {}", self.func, self.code, self.args)
    }
}

// Ordered by code first so reports can group records under one code line.
impl Ord for OpError {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.code
            .cmp(&other.code)
            .then_with(|| self.args.cmp(&other.args))
            .then_with(|| self.func.cmp(other.func))
    }
}

impl PartialOrd for OpError {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_error_from_io() {
        let io_err = io::Error::from_raw_os_error(13); // EACCES
        let err = OpError::new("unlink", Path::new("/tmp/x"), &io_err);
        assert_eq!(err.code, 13);
        assert_eq!(err.func, "unlink");
        assert_eq!(err.args, "/tmp/x");
    }

    #[test]
    fn test_op_error_ordering_groups_by_code() {
        let a = OpError { code: 2, func: "unlink", args: "/b".into() };
        let b = OpError { code: 13, func: "unlink", args: "/a".into() };
        let c = OpError { code: 2, func: "rmdir", args: "/a".into() };

        let mut all = vec![a.clone(), b.clone(), c.clone()];
        all.sort();
        assert_eq!(all, vec![c, a, b]);
    }

    #[test]
    fn test_error_conversion() {
        let cfg = ConfigError::FilesystemRoot;
        let err: Error = cfg.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
