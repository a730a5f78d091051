//! Filesystem primitives
//!
//! The machine core treats these as opaque: enumerate one directory, unlink
//! one file, remove one empty directory. Everything here is synchronous and
//! blocking; parallelism comes from calling these on many worker threads.
//!
//! On Linux, enumeration reads raw `getdents64` records through a
//! caller-sized buffer, which is what makes the `scan_buf_size` knob real:
//! a bigger buffer means fewer syscalls per large directory. Other
//! platforms fall back to `std::fs::read_dir`.
//!
//! "Not found" is success for both deleters - if somebody else removed the
//! entry first, our job there is done.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::Path;

use crate::error::OpError;

/// Entry is a directory
pub const ATTR_DIRECTORY: u32 = 1 << 0;
/// Entry redirects elsewhere (symbolic link / junction); never followed
pub const ATTR_REPARSE: u32 = 1 << 1;
/// Entry is hidden (dot-name)
pub const ATTR_HIDDEN: u32 = 1 << 2;
/// Entry is read-only (no owner write permission)
pub const ATTR_READONLY: u32 = 1 << 3;

/// Attribute bitset of a filesystem entry, immutable once observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attrs(u32);

impl Attrs {
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_dir(self) -> bool {
        self.0 & ATTR_DIRECTORY != 0
    }

    pub fn is_reparse(self) -> bool {
        self.0 & ATTR_REPARSE != 0
    }

    pub fn is_hidden(self) -> bool {
        self.0 & ATTR_HIDDEN != 0
    }

    pub fn is_readonly(self) -> bool {
        self.0 & ATTR_READONLY != 0
    }

    /// True when deletion must clear attributes first
    pub fn is_restrictive(self) -> bool {
        self.is_readonly()
    }

    /// Derive attributes from a name and its (non-following) metadata
    pub fn from_metadata(name: &OsStr, md: &fs::Metadata) -> Self {
        let mut bits = 0;
        if md.is_dir() {
            bits |= ATTR_DIRECTORY;
        }
        if md.file_type().is_symlink() {
            bits |= ATTR_REPARSE;
        }
        if name.to_string_lossy().starts_with('.') {
            bits |= ATTR_HIDDEN;
        }
        if md.permissions().readonly() {
            bits |= ATTR_READONLY;
        }
        Self(bits)
    }
}

/// Probe a path for its attributes without following a final symlink
pub fn probe_attrs(path: &Path) -> io::Result<Attrs> {
    let md = fs::symlink_metadata(path)?;
    let name = path.file_name().unwrap_or_else(|| path.as_os_str());
    Ok(Attrs::from_metadata(name, &md))
}

/// Receives the entries and errors of one directory enumeration
pub trait ScanSink {
    /// A file (or non-directory link) was found
    fn on_file(&mut self, name: &OsStr, attrs: Attrs, bytes: u64);

    /// A subdirectory (or directory link) was found
    fn on_folder(&mut self, name: &OsStr, attrs: Attrs);

    /// A per-entry or terminal enumeration error occurred
    fn on_error(&mut self, err: OpError);
}

#[cfg(target_os = "linux")]
const SCAN_PRIMITIVE: &str = "getdents64";
#[cfg(not(target_os = "linux"))]
const SCAN_PRIMITIVE: &str = "read_dir";

// getdents64 refuses buffers smaller than one record; a single entry can
// approach 280 bytes on disk formats with long names.
const MIN_SCAN_BUF: usize = 1024;

/// Enumerate one directory, feeding entries through the sink
///
/// Returns false on terminal failure (the directory could not be opened or
/// read at all); per-entry failures are reported through the sink and do
/// not stop the enumeration.
///
/// A symbolic link whose target is a directory is reported as a folder
/// carrying the reparse attribute - the caller is expected to delete the
/// link itself and never descend into it. Links to files and broken links
/// are reported as zero-byte file entries.
pub fn scan_folder(path: &Path, buf_size: usize, sink: &mut dyn ScanSink) -> bool {
    let names = match list_names(path, buf_size) {
        Ok(names) => names,
        Err(e) => {
            sink.on_error(OpError::new(SCAN_PRIMITIVE, path, &e));
            return false;
        }
    };

    for name in names {
        let child = path.join(&name);
        let md = match fs::symlink_metadata(&child) {
            Ok(md) => md,
            Err(e) => {
                sink.on_error(OpError::new("lstat", &child, &e));
                continue;
            }
        };

        let attrs = Attrs::from_metadata(&name, &md);

        if md.file_type().is_symlink() {
            if let Ok(target) = fs::metadata(&child) {
                if target.is_dir() {
                    sink.on_folder(&name, Attrs::new(attrs.bits() | ATTR_DIRECTORY));
                    continue;
                }
            }
            sink.on_file(&name, attrs, 0);
        } else if md.is_dir() {
            sink.on_folder(&name, attrs);
        } else {
            sink.on_file(&name, attrs, md.len());
        }
    }

    true
}

/// Unlink one file
///
/// Restrictive attributes are cleared first (best effort; failures are
/// recorded but deletion is still attempted). With `unlink_syscall` the
/// raw `unlink(2)` syscall is used instead of `std::fs`.
pub fn delete_file(
    path: &Path,
    attrs: Attrs,
    unlink_syscall: bool,
    errors: &mut Vec<OpError>,
) -> bool {
    if attrs.is_restrictive() && !attrs.is_reparse() {
        clear_restrictive(path, errors);
    }

    let (func, result): (&'static str, io::Result<()>) = if unlink_syscall {
        ("unlink", unlink_raw(path))
    } else {
        ("remove_file", fs::remove_file(path))
    };

    match result {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            errors.push(OpError::new(func, path, &e));
            false
        }
    }
}

/// Remove one empty directory
///
/// For a reparse point the link itself is unlinked; the target is never
/// touched. Restrictive attributes are cleared first, "not found" counts
/// as success.
pub fn delete_folder(path: &Path, attrs: Attrs, errors: &mut Vec<OpError>) -> bool {
    if attrs.is_restrictive() && !attrs.is_reparse() {
        clear_restrictive(path, errors);
    }

    let (func, result): (&'static str, io::Result<()>) = if attrs.is_reparse() {
        ("remove_file", fs::remove_file(path))
    } else {
        ("remove_dir", fs::remove_dir(path))
    };

    match result {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            errors.push(OpError::new(func, path, &e));
            false
        }
    }
}

/// Restore the owner write bit so the entry can be deleted
fn clear_restrictive(path: &Path, errors: &mut Vec<OpError>) {
    let md = match fs::symlink_metadata(path) {
        Ok(md) => md,
        Err(e) => {
            errors.push(OpError::new("lstat", path, &e));
            return;
        }
    };

    let mut perms = md.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(perms.mode() | 0o200);
    }
    #[cfg(not(unix))]
    {
        perms.set_readonly(false);
    }

    if let Err(e) = fs::set_permissions(path, perms) {
        errors.push(OpError::new("set_permissions", path, &e));
    }
}

#[cfg(unix)]
fn unlink_raw(path: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

    let rc = unsafe { libc::unlink(cpath.as_ptr()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn unlink_raw(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Collect the child names of a directory via getdents64
///
/// The buffer size is the caller's knob: each syscall fills at most
/// `buf_size` bytes of records, so large directories on high-latency
/// filesystems benefit from large buffers.
#[cfg(target_os = "linux")]
fn list_names(path: &Path, buf_size: usize) -> io::Result<Vec<OsString>> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;

    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut buf = vec![0u8; buf_size.max(MIN_SCAN_BUF)];
    let mut names = Vec::new();

    loop {
        let n = unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        if n == 0 {
            break;
        }

        // linux_dirent64: u64 d_ino, i64 d_off, u16 d_reclen, u8 d_type,
        // then the NUL-terminated name at offset 19.
        let mut off = 0usize;
        let end = n as usize;
        while off + 19 <= end {
            let reclen = u16::from_ne_bytes([buf[off + 16], buf[off + 17]]) as usize;
            if reclen == 0 || off + reclen > end {
                break;
            }
            let name_bytes = &buf[off + 19..off + reclen];
            let name_len = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(name_bytes.len());
            let name = OsStr::from_bytes(&name_bytes[..name_len]);
            if name != "." && name != ".." {
                names.push(name.to_os_string());
            }
            off += reclen;
        }
    }

    unsafe { libc::close(fd) };
    Ok(names)
}

#[cfg(not(target_os = "linux"))]
fn list_names(path: &Path, _buf_size: usize) -> io::Result<Vec<OsString>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path)? {
        names.push(entry?.file_name());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        files: HashMap<OsString, (Attrs, u64)>,
        folders: HashMap<OsString, Attrs>,
        errors: Vec<OpError>,
    }

    impl ScanSink for Recorder {
        fn on_file(&mut self, name: &OsStr, attrs: Attrs, bytes: u64) {
            self.files.insert(name.to_os_string(), (attrs, bytes));
        }

        fn on_folder(&mut self, name: &OsStr, attrs: Attrs) {
            self.folders.insert(name.to_os_string(), attrs);
        }

        fn on_error(&mut self, err: OpError) {
            if err.code != 0 {
                self.errors.push(err);
            }
        }
    }

    #[test]
    fn test_scan_classifies_entries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let mut rec = Recorder::default();
        assert!(scan_folder(dir.path(), 8192, &mut rec));

        assert_eq!(rec.files.len(), 2);
        assert_eq!(rec.folders.len(), 1);
        assert!(rec.errors.is_empty());

        let (attrs, bytes) = rec.files[OsStr::new("a.txt")];
        assert_eq!(bytes, 5);
        assert!(!attrs.is_hidden());

        let (attrs, _) = rec.files[OsStr::new(".hidden")];
        assert!(attrs.is_hidden());

        let attrs = rec.folders[OsStr::new("sub")];
        assert!(attrs.is_dir());
        assert!(!attrs.is_reparse());
    }

    #[test]
    fn test_scan_missing_dir_is_terminal() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");

        let mut rec = Recorder::default();
        assert!(!scan_folder(&gone, 8192, &mut rec));
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.errors[0].func, SCAN_PRIMITIVE);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_reports_dir_symlink_as_reparse_folder() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("link")).unwrap();

        let mut rec = Recorder::default();
        assert!(scan_folder(dir.path(), 8192, &mut rec));

        let attrs = rec.folders[OsStr::new("link")];
        assert!(attrs.is_dir());
        assert!(attrs.is_reparse());
    }

    #[test]
    fn test_delete_file_not_found_is_success() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("nope");

        let mut errors = Vec::new();
        assert!(delete_file(&gone, Attrs::default(), false, &mut errors));
        assert!(errors.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_readonly_file_clears_attrs() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let file = dir.path().join("locked");
        fs::write(&file, b"x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        let attrs = probe_attrs(&file).unwrap();
        assert!(attrs.is_readonly());

        let mut errors = Vec::new();
        assert!(delete_file(&file, attrs, false, &mut errors));
        assert!(errors.is_empty());
        assert!(!file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_file_via_raw_syscall() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("raw");
        fs::write(&file, b"x").unwrap();

        let mut errors = Vec::new();
        assert!(delete_file(&file, Attrs::default(), true, &mut errors));
        assert!(errors.is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_delete_folder_removes_empty_dir() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        let attrs = probe_attrs(&sub).unwrap();
        let mut errors = Vec::new();
        assert!(delete_folder(&sub, attrs, &mut errors));
        assert!(errors.is_empty());
        assert!(!sub.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_folder_unlinks_symlink_not_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), b"data").unwrap();

        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let attrs = Attrs::new(ATTR_DIRECTORY | ATTR_REPARSE);
        let mut errors = Vec::new();
        assert!(delete_folder(&link, attrs, &mut errors));
        assert!(errors.is_empty());

        assert!(fs::symlink_metadata(&link).is_err());
        assert!(target.join("keep.txt").exists());
    }

    #[test]
    fn test_scan_with_tiny_buffer() {
        let dir = tempdir().unwrap();
        for i in 0..100 {
            fs::write(dir.path().join(format!("file-{i:03}")), b"x").unwrap();
        }

        // Buffer well below a record's size gets clamped to the minimum
        // and the enumeration still sees everything.
        let mut rec = Recorder::default();
        assert!(scan_folder(dir.path(), 1, &mut rec));
        assert_eq!(rec.files.len(), 100);
    }
}
