//! Configuration for zapdir
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The machine's runtime configuration with defaults resolution
//! - Target path vetting (canonicalization and safety checks)

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::error::ConfigError;
use crate::fsops::{self, Attrs};

/// Maximum reasonable worker count
const MAX_THREADS: usize = 512;

/// Maximum enumeration buffer, in KiB (64 MiB)
const MAX_SCAN_BUF_KB: usize = 64 * 1024;

/// Default enumeration buffer in bytes
pub const DEFAULT_SCAN_BUF: usize = 8 * 1024;

/// Paths never accepted as deletion targets, checked by prefix against the
/// canonicalized target: the OS itself and the user home trees
const RESTRICTED_PREFIXES: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/lib64", "/proc", "/sbin", "/sys", "/usr",
    "/home", "/root", "/Users",
];

/// Multithreaded recursive folder deleter
#[derive(Parser, Debug, Clone)]
#[command(
    name = "zapdir",
    version,
    about = "Deletes a folder tree with a pool of worker threads",
    long_about = "Deletes a folder and all its contents. Similar to 'rm -rf', but \
                  multi-threaded: enumeration and unlinking run on a pool of workers, \
                  which pays off on very large trees and on network filesystems with \
                  high per-call latency.",
    after_help = "EXAMPLES:\n    \
        zapdir /data/old-build\n    \
        zapdir -p /data/old-build          # enumerate only, delete nothing\n    \
        zapdir -s -e /mnt/share/scratch    # scan first, then delete; list errors\n    \
        zapdir -t 64 -y nfs-mount/tmp      # more threads help on high latency\n\n    \
        By default the thread count equals the number of CPU cores. For local\n    \
        folders going above that rarely helps, but for folders on network\n    \
        shares raising it can be a good thing to try."
)]
pub struct CliArgs {
    /// Folder to delete
    #[arg(value_name = "FOLDER")]
    pub path: PathBuf,

    /// Enumerate contents, but don't delete anything
    #[arg(short = 'p', long)]
    pub preview: bool,

    /// Enumerate contents first, then delete them
    #[arg(short = 's', long)]
    pub staged: bool,

    /// Don't ask to confirm the deletion
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Show progress as a compact single line
    #[arg(short = '1', long)]
    pub one_liner: bool,

    /// List all errors upon completion
    #[arg(short = 'e', long)]
    pub list_errors: bool,

    /// Delete the contents but keep the folder itself
    #[arg(long)]
    pub keep_root: bool,

    /// Number of worker threads (0 = CPU count)
    #[arg(short = 't', long, default_value = "0", value_name = "COUNT")]
    pub threads: usize,

    /// Enumeration buffer size in KiB (0 = 8 KiB)
    #[arg(long, default_value = "0", value_name = "KB")]
    pub scan_buf_kb: usize,

    /// Unlink files with the raw syscall instead of the standard library
    #[arg(short = 'n', long)]
    pub unlink_syscall: bool,

    /// Max files per deletion task (0 = one task per folder)
    #[arg(long, default_value = "128", value_name = "COUNT")]
    pub delete_batch: usize,

    /// Suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Runtime configuration of the machine
///
/// Zero means "use the default" for `threads`, `scan_buf_size` and
/// `delete_batch`; the accessor methods perform the resolution.
#[derive(Debug, Clone)]
pub struct EraseConfig {
    /// Worker count; 0 = CPU count
    pub threads: usize,

    /// Enumeration buffer bytes; 0 = 8 KiB
    pub scan_buf_size: usize,

    /// Use the raw-syscall unlink primitive
    pub unlink_syscall: bool,

    /// Max files per phase-2 task; 0 = unbounded per folder
    pub delete_batch: usize,

    /// Suppress the root folder's own deletion
    pub keep_root: bool,
}

impl Default for EraseConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            scan_buf_size: 0,
            unlink_syscall: false,
            delete_batch: 128,
            keep_root: false,
        }
    }
}

impl EraseConfig {
    /// Validate CLI arguments into a machine configuration
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if args.threads > MAX_THREADS {
            return Err(ConfigError::InvalidThreadCount {
                count: args.threads,
                max: MAX_THREADS,
            });
        }

        if args.scan_buf_kb > MAX_SCAN_BUF_KB {
            return Err(ConfigError::InvalidScanBuffer {
                kb: args.scan_buf_kb,
                max_kb: MAX_SCAN_BUF_KB,
            });
        }

        Ok(Self {
            threads: args.threads,
            scan_buf_size: args.scan_buf_kb * 1024,
            unlink_syscall: args.unlink_syscall,
            delete_batch: args.delete_batch,
            keep_root: args.keep_root,
        })
    }

    /// Resolved worker count; 0 and "all bits set" both mean the default
    pub fn worker_count(&self) -> usize {
        if self.threads == 0 || self.threads == usize::MAX {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Resolved enumeration buffer size in bytes
    pub fn scan_buffer(&self) -> usize {
        if self.scan_buf_size == 0 {
            DEFAULT_SCAN_BUF
        } else {
            self.scan_buf_size
        }
    }

    /// Resolved phase-2 batch limit; unbounded becomes one whole-folder slice
    pub fn batch_limit(&self) -> usize {
        if self.delete_batch == 0 {
            usize::MAX
        } else {
            self.delete_batch
        }
    }
}

/// Canonicalize and vet a deletion target
///
/// Rejects missing paths, plain files, the filesystem root and restricted
/// system prefixes. Returns the canonical path and its attributes, ready
/// for [`crate::tree::Folder::root`].
pub fn vet_path(path: &Path) -> Result<(PathBuf, Attrs), ConfigError> {
    let canonical = path.canonicalize().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::PathNotFound { path: path.to_path_buf() }
        } else {
            ConfigError::CannotCheck { path: path.to_path_buf(), source: e }
        }
    })?;

    if canonical.parent().is_none() {
        return Err(ConfigError::FilesystemRoot);
    }

    for prefix in RESTRICTED_PREFIXES {
        if canonical.starts_with(prefix) {
            return Err(ConfigError::RestrictedPath { path: canonical });
        }
    }

    let attrs = fsops::probe_attrs(&canonical)
        .map_err(|e| ConfigError::CannotCheck { path: canonical.clone(), source: e })?;

    if !attrs.is_dir() {
        return Err(ConfigError::NotADirectory { path: canonical });
    }

    Ok((canonical, attrs))
}
