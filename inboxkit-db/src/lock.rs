//! Single-holder leases on a store directory.
//!
//! A lease combines two exclusions:
//!
//! * a process-wide registry of claimed store directories, so two handles in
//!   one process never share a store regardless of platform lock semantics;
//! * an exclusive OS lock on `store.lock` (`flock` on Unix, `LockFileEx` on
//!   Windows) that keeps other processes out.
//!
//! Acquisition never blocks. A held store yields [`DbError::AlreadyOpen`].

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::error::{DbError, DbResult};

fn open_stores() -> &'static Mutex<HashSet<PathBuf>> {
    static OPEN_STORES: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    OPEN_STORES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive hold on one store directory. Released on drop.
#[derive(Debug)]
pub(crate) struct StoreLease {
    // Field order matters: the OS lock is released before the registry claim.
    _file_lock: FileLock,
    claim: RegistryClaim,
}

impl StoreLease {
    /// Claims the store at `dir`, using `lock_path` for the OS lock.
    ///
    /// `dir` must already exist.
    pub(crate) fn acquire(dir: &Path, lock_path: &Path) -> DbResult<Self> {
        let canonical = dir
            .canonicalize()
            .map_err(|err| DbError::io("resolve store directory", err))?;
        let claim = RegistryClaim::claim(canonical)?;
        let file_lock = FileLock::try_acquire(lock_path)?.ok_or_else(|| DbError::AlreadyOpen {
            path: claim.path.clone(),
        })?;
        Ok(Self {
            _file_lock: file_lock,
            claim,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.claim.path
    }
}

#[derive(Debug)]
struct RegistryClaim {
    path: PathBuf,
}

impl RegistryClaim {
    fn claim(path: PathBuf) -> DbResult<Self> {
        let mut open = open_stores()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !open.insert(path.clone()) {
            return Err(DbError::AlreadyOpen { path });
        }
        Ok(Self { path })
    }
}

impl Drop for RegistryClaim {
    fn drop(&mut self) {
        open_stores()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

#[derive(Debug)]
struct FileLock {
    file: File,
}

impl FileLock {
    fn try_acquire(path: &Path) -> DbResult<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| DbError::io("open lock file", err))?;
        if !os::try_lock_exclusive(&file).map_err(|err| DbError::io("lock store", err))? {
            return Ok(None);
        }
        let lock = Self { file };
        // A deletion may have unlinked the file between our open and lock.
        if !is_current(&lock.file, path).map_err(|err| DbError::io("check lock file", err))? {
            return Ok(None);
        }
        Ok(Some(lock))
    }
}

/// Returns `true` if `path` still names the file behind `file`.
#[cfg(unix)]
fn is_current(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

// Elsewhere a file being deleted cannot be opened again, so an open handle is
// always current.
#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn is_current(_file: &File, _path: &Path) -> std::io::Result<bool> {
    Ok(true)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = os::unlock(&self.file) {
            log::warn!("failed to release store lock: {err}");
        }
    }
}

#[cfg(unix)]
mod os {
    use std::fs::File;
    use std::os::raw::c_int;
    use std::os::unix::io::AsRawFd;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    pub(super) fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub(super) fn unlock(file: &File) -> std::io::Result<()> {
        // SAFETY: as above.
        let result = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod os {
    use std::fs::File;
    use std::os::windows::io::AsRawHandle;

    type Handle = *mut std::ffi::c_void;

    #[repr(C)]
    #[allow(dead_code)]
    struct Overlapped {
        internal: usize,
        internal_high: usize,
        offset: u32,
        offset_high: u32,
        h_event: Handle,
    }

    impl Overlapped {
        const fn zeroed() -> Self {
            Self {
                internal: 0,
                internal_high: 0,
                offset: 0,
                offset_high: 0,
                h_event: std::ptr::null_mut(),
            }
        }
    }

    const LOCKFILE_FAIL_IMMEDIATELY: u32 = 0x1;
    const LOCKFILE_EXCLUSIVE_LOCK: u32 = 0x2;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    extern "system" {
        fn LockFileEx(
            h_file: Handle,
            flags: u32,
            reserved: u32,
            bytes_low: u32,
            bytes_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
        fn UnlockFileEx(
            h_file: Handle,
            reserved: u32,
            bytes_low: u32,
            bytes_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
    }

    pub(super) fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
        let mut overlapped = Overlapped::zeroed();
        // SAFETY: the handle is owned by `file`; `overlapped` outlives the call.
        let result = unsafe {
            LockFileEx(
                file.as_raw_handle().cast(),
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if result != 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub(super) fn unlock(file: &File) -> std::io::Result<()> {
        let mut overlapped = Overlapped::zeroed();
        // SAFETY: as above.
        let result =
            unsafe { UnlockFileEx(file.as_raw_handle().cast(), 0, 1, 0, &mut overlapped) };
        if result != 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

// Single-threaded targets without file locking rely on the registry alone.
#[cfg(not(any(unix, windows)))]
mod os {
    use std::fs::File;

    pub(super) fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
        Ok(true)
    }

    pub(super) fn unlock(_file: &File) -> std::io::Result<()> {
        Ok(())
    }
}
