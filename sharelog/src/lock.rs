// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Advisory locking of the live file.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use crate::Error;
use crate::ErrorKind;
use crate::error::merge;

/// An advisory lock capability on an open file.
///
/// All methods block until the request is granted. Implementations must lock the whole file so
/// that an in-progress rotation excludes every writer.
pub trait FileLock: fmt::Debug + Send + Sync + 'static {
    /// Acquire a shared lock. Many holders may share it.
    fn lock_shared(&self, file: &File) -> io::Result<()>;

    /// Acquire an exclusive lock.
    fn lock_exclusive(&self, file: &File) -> io::Result<()>;

    /// Release whatever lock this handle holds.
    fn unlock(&self, file: &File) -> io::Result<()>;
}

impl<T: FileLock> From<T> for Box<dyn FileLock> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

/// The lock adapter used by [`file_locking`](crate::SharedFileWriterBuilder::file_locking).
///
/// [`Flock`] on unix and [`WindowsLock`] on windows.
pub(crate) fn default_file_lock() -> Option<Box<dyn FileLock>> {
    #[cfg(unix)]
    {
        Some(Box::new(Flock))
    }

    #[cfg(windows)]
    {
        Some(Box::new(WindowsLock))
    }

    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

/// Whole-file locks with `flock(2)`.
///
/// Locks belong to the open file description, so two writers in the same process exclude each
/// other as long as they opened the file separately. Some network filesystems do not honour
/// `flock`; use [`RecordLock`] there.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Flock;

#[cfg(unix)]
impl Flock {
    fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        loop {
            // SAFETY: `fd` is a valid descriptor owned by `file` for the duration of the call.
            let result = unsafe { libc::flock(fd, operation) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

#[cfg(unix)]
impl FileLock for Flock {
    fn lock_shared(&self, file: &File) -> io::Result<()> {
        Self::flock(file, libc::LOCK_SH)
    }

    fn lock_exclusive(&self, file: &File) -> io::Result<()> {
        Self::flock(file, libc::LOCK_EX)
    }

    fn unlock(&self, file: &File) -> io::Result<()> {
        Self::flock(file, libc::LOCK_UN)
    }
}

/// Whole-file POSIX record locks with `fcntl(2)` (`F_SETLKW`).
///
/// These are the locks NFS forwards to the server. Record locks are owned by the process, not
/// by the descriptor: two writers inside one process do not exclude each other.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordLock;

#[cfg(unix)]
impl RecordLock {
    fn fcntl(file: &File, lock_type: libc::c_int) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        // SAFETY: `libc::flock` is a plain C struct for which all-zero is a valid value.
        let mut lock: libc::flock = unsafe { std::mem::zeroed() };
        lock.l_type = lock_type as _;
        lock.l_whence = libc::SEEK_SET as _;
        // l_start = 0 and l_len = 0 cover the whole file, however large it grows.
        lock.l_start = 0;
        lock.l_len = 0;

        let command = if lock_type == libc::F_UNLCK as libc::c_int {
            libc::F_SETLK
        } else {
            libc::F_SETLKW
        };

        let fd = file.as_raw_fd();
        loop {
            // SAFETY: `fd` is valid for the duration of the call and `lock` outlives it.
            let result = unsafe { libc::fcntl(fd, command, &lock as *const libc::flock) };
            if result != -1 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

#[cfg(unix)]
impl FileLock for RecordLock {
    fn lock_shared(&self, file: &File) -> io::Result<()> {
        Self::fcntl(file, libc::F_RDLCK as libc::c_int)
    }

    fn lock_exclusive(&self, file: &File) -> io::Result<()> {
        Self::fcntl(file, libc::F_WRLCK as libc::c_int)
    }

    fn unlock(&self, file: &File) -> io::Result<()> {
        Self::fcntl(file, libc::F_UNLCK as libc::c_int)
    }
}

/// Whole-file locks with `LockFileEx`.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsLock;

#[cfg(windows)]
impl WindowsLock {
    fn lock(file: &File, flags: u32) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;

        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::LockFileEx;
        use windows_sys::Win32::System::IO::OVERLAPPED;

        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: OVERLAPPED is a plain C struct for which all-zero is a valid value.
        let mut overlapped = unsafe { std::mem::zeroed::<OVERLAPPED>() };
        // SAFETY: `handle` is valid for the duration of the call and `overlapped` outlives it.
        let result = unsafe { LockFileEx(handle, flags, 0, u32::MAX, u32::MAX, &mut overlapped) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
impl FileLock for WindowsLock {
    fn lock_shared(&self, file: &File) -> io::Result<()> {
        Self::lock(file, 0)
    }

    fn lock_exclusive(&self, file: &File) -> io::Result<()> {
        use windows_sys::Win32::Storage::FileSystem::LOCKFILE_EXCLUSIVE_LOCK;
        Self::lock(file, LOCKFILE_EXCLUSIVE_LOCK)
    }

    fn unlock(&self, file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;

        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::UnlockFileEx;
        use windows_sys::Win32::System::IO::OVERLAPPED;

        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: OVERLAPPED is a plain C struct for which all-zero is a valid value.
        let mut overlapped = unsafe { std::mem::zeroed::<OVERLAPPED>() };
        // SAFETY: `handle` is valid for the duration of the call and `overlapped` outlives it.
        let result = unsafe { UnlockFileEx(handle, 0, u32::MAX, u32::MAX, &mut overlapped) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

/// Lock mode for a single line write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockMode {
    /// Small lines rely on the atomicity of a single append; the shared lock only keeps them
    /// out of an in-progress rotation.
    Shared,
    /// Large lines and rotations.
    Exclusive,
}

/// A held advisory lock.
///
/// Call [`release`](LockGuard::release) to observe sync and unlock failures. Dropping the guard
/// without releasing it (on unwinding) still unlocks the file.
#[derive(Debug)]
pub(crate) struct LockGuard<'a> {
    file: &'a File,
    path: &'a Path,
    lock: &'a dyn FileLock,
    mode: LockMode,
    released: bool,
}

impl<'a> LockGuard<'a> {
    pub(crate) fn acquire(
        file: &'a File,
        path: &'a Path,
        lock: &'a dyn FileLock,
        mode: LockMode,
    ) -> Result<Self, Error> {
        let (result, name) = match mode {
            LockMode::Shared => (lock.lock_shared(file), "shared"),
            LockMode::Exclusive => (lock.lock_exclusive(file), "exclusive"),
        };
        result.map_err(|err| {
            Error::new(
                ErrorKind::LockFailure,
                format!("failed to acquire {name} lock"),
            )
            .with_context("path", path.display())
            .with_source(err)
        })?;
        log::trace!("acquired {name} lock on {}", path.display());

        Ok(Self {
            file,
            path,
            lock,
            mode,
            released: false,
        })
    }

    pub(crate) fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release the lock.
    ///
    /// An exclusive holder syncs the file first so the next holder observes everything written
    /// under the lock. The unlock is attempted even if the sync failed; both failures are
    /// reported.
    pub(crate) fn release(mut self) -> Result<(), Error> {
        self.released = true;

        let synced = match self.mode {
            LockMode::Shared => Ok(()),
            LockMode::Exclusive => self.file.sync_all().map_err(|err| {
                Error::new(ErrorKind::IoFailure, "failed to sync")
                    .with_context("path", self.path.display())
                    .with_source(err)
            }),
        };

        let unlocked = self.lock.unlock(self.file).map_err(|err| {
            Error::new(ErrorKind::LockFailure, "failed to unlock")
                .with_context("path", self.path.display())
                .with_source(err)
        });
        if unlocked.is_ok() {
            log::trace!("released lock on {}", self.path.display());
        }

        merge(synced, unlocked)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.lock.unlock(self.file);
        }
    }
}
