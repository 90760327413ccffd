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

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::mem;
use std::num::NonZeroU64;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::Config;
use crate::Error;
use crate::ErrorKind;
use crate::FileLock;
use crate::Trap;
use crate::assembler::LineBuffer;
use crate::clock::Clock;
use crate::engine::Engine;
use crate::error::merge;
use crate::lock::default_file_lock;
use crate::trap::DefaultTrap;

/// An append-only writer that many processes can share.
///
/// Bytes are buffered until a newline completes a line; every line is then written with a
/// single append, prefixed with the configured prefix. Before a line would make the live file
/// reach the max file size, the file is copied into a backup named
/// `<path>.<YYYYMMDD-HHMMSS>.<seq>[.gz]` and truncated, and old backups are removed according to
/// the retention limits.
///
/// With file locking enabled, every write holds an advisory lock on the live file: a shared one
/// for lines up to the atomic line size, an exclusive one for larger lines and rotations. No two
/// lines of different writers interleave then.
///
/// A writer is not synchronized internally; share it between threads behind a mutex, or give
/// every thread its own writer.
#[derive(Debug)]
pub struct SharedFileWriter {
    line: LineBuffer,
    engine: Engine,
}

impl SharedFileWriter {
    /// Create a new [`SharedFileWriterBuilder`] for the log file at `path`.
    pub fn builder(path: impl Into<PathBuf>) -> SharedFileWriterBuilder {
        SharedFileWriterBuilder::new(path)
    }

    /// Buffer `bytes`, writing every line a newline completes.
    ///
    /// Returns the number of bytes accepted, which is always `bytes.len()` on success.
    ///
    /// # Errors
    ///
    /// Return the error of the first line that cannot be written; that line is discarded. Lines
    /// completed earlier in the same call have already been written, so a failed call is not
    /// atomic.
    ///
    /// An [`ErrorKind::RetentionFailure`] does not stop the call: every line of `bytes` is
    /// written and the failures of the cleanups after rotations are returned at the end.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let engine = &self.engine;
        let mut retention = Ok(());
        let fed = self.line.feed(bytes, |line| match engine.write_line(line) {
            Err(err) if err.kind() == ErrorKind::RetentionFailure => {
                retention = merge(mem::replace(&mut retention, Ok(())), Err(err));
                Ok(())
            }
            written => written,
        });
        merge(fed, retention)
    }

    /// Write `line` as one entry, bypassing the line buffer.
    ///
    /// The line should end with a newline; it is written as given, after the prefix. A pending
    /// partial line from [`append`](Self::append) is neither written nor cleared; it stays
    /// buffered until a later newline, [`sync`](Self::sync) or [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * The line and prefix are larger than the max file size ([`ErrorKind::SizeExceeded`]).
    /// * The lock cannot be acquired or released.
    /// * The rotation or the write fails.
    /// * Old backups cannot be removed after a rotation ([`ErrorKind::RetentionFailure`]). The
    ///   line has been written in that case.
    pub fn write_line(&mut self, line: &[u8]) -> Result<(), Error> {
        self.engine.write_line(line)
    }

    /// Write the pending partial line, if any, and sync the live file to disk.
    ///
    /// The partial line is written as it is, without appending a newline.
    pub fn sync(&mut self) -> Result<(), Error> {
        let engine = &self.engine;
        match self.line.flush(|line| engine.write_line(line)) {
            Err(err) if err.kind() != ErrorKind::RetentionFailure => Err(err),
            flushed => merge(flushed, engine.sync()),
        }
    }

    /// Remove the backups beyond the retention limits now.
    ///
    /// Rotations run this themselves; their failures are returned by the write that rotated.
    ///
    /// # Errors
    ///
    /// Return an [`ErrorKind::RetentionFailure`] listing every backup that could not be removed.
    pub fn cleanup(&self) -> Result<(), Error> {
        self.engine.cleanup()
    }

    /// Flush the pending partial line and close the file.
    pub fn close(mut self) -> Result<(), Error> {
        self.sync()
    }

    /// The path of the live file.
    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    /// The configuration of this writer.
    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    /// The pending partial line.
    pub fn buffered(&self) -> &[u8] {
        self.line.as_bytes()
    }
}

/// [`Write::flush`] writes the pending partial line as an entry; see [`SharedFileWriter::sync`].
impl Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sync().map_err(io::Error::from)
    }
}

impl Drop for SharedFileWriter {
    fn drop(&mut self) {
        if self.line.is_empty() {
            return;
        }

        if let Err(err) = self.sync() {
            let err = Error::new(ErrorKind::IoFailure, "failed to flush pending line on drop")
                .with_source(err);
            self.engine.trap().trap(&err);
        }
    }
}

/// A builder for configuring [`SharedFileWriter`].
#[derive(Debug)]
pub struct SharedFileWriterBuilder {
    // required
    path: PathBuf,

    // has default
    config: Config,
    lock: Option<Box<dyn FileLock>>,
    clock: Clock,
    trap: Box<dyn Trap>,
}

impl SharedFileWriterBuilder {
    /// Creates a new [`SharedFileWriterBuilder`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Config::default(),
            lock: None,
            clock: Clock::System,
            trap: Box::new(DefaultTrap::default()),
        }
    }

    /// Set the size the live file may reach before it is rotated.
    ///
    /// A line is rotated into a fresh file when it would make the current one reach this size.
    /// Lines larger than this size are rejected. Without it, the file never rotates.
    #[must_use]
    pub fn max_file_size(mut self, n: NonZeroU64) -> Self {
        self.config.max_file_size = Some(n);
        self
    }

    /// Set the maximum number of backups to keep.
    #[must_use]
    pub fn max_backups(mut self, n: NonZeroUsize) -> Self {
        self.config.max_backups = Some(n);
        self
    }

    /// Set the age after which backups are removed, judged by the timestamp in their names.
    ///
    /// A zero duration keeps backups forever.
    #[must_use]
    pub fn max_backup_age(mut self, age: Duration) -> Self {
        self.config.max_backup_age = (!age.is_zero()).then_some(age);
        self
    }

    /// Set the bytes prepended to every line.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Take an advisory lock on the live file for every write, with the platform's default
    /// whole-file lock.
    #[must_use]
    pub fn file_locking(mut self) -> Self {
        self.config.locking = true;
        self
    }

    /// Take an advisory lock on the live file for every write, with the given lock.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[cfg(unix)] {
    /// use sharelog::SharedFileWriter;
    /// use sharelog::lock::RecordLock;
    ///
    /// // fcntl locks, as honoured by NFS
    /// let builder = SharedFileWriter::builder("logs/app.log").file_lock(RecordLock);
    /// # }
    /// ```
    #[must_use]
    pub fn file_lock(mut self, lock: impl Into<Box<dyn FileLock>>) -> Self {
        self.config.locking = true;
        self.lock = Some(lock.into());
        self
    }

    /// Compress backups with gzip.
    #[must_use]
    pub fn compression(mut self) -> Self {
        self.config.compression = true;
        self
    }

    /// Set the size up to which a single append is assumed atomic.
    ///
    /// With file locking, lines (prefix included) up to this size take a shared lock, larger
    /// ones an exclusive lock. Default to 4096.
    #[must_use]
    pub fn atomic_line_size(mut self, n: NonZeroUsize) -> Self {
        self.config.atomic_line_size = n;
        self
    }

    /// Set the trap for errors that cannot be returned to the caller.
    ///
    /// Default to [`DefaultTrap`].
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = trap.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Open (or create) the log file and build the [`SharedFileWriter`].
    ///
    /// The parent directory is created if needed. A new file is created with mode `0644`; an
    /// existing file keeps its permissions.
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * The configuration is invalid.
    /// * The log directory cannot be created.
    /// * The log file cannot be opened.
    pub fn build(self) -> Result<SharedFileWriter, Error> {
        // validate before touching the filesystem
        self.config.validate()?;

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|err| {
                Error::new(ErrorKind::IoFailure, "failed to create log directory")
                    .with_context("dir", dir.display())
                    .with_source(err)
            })?;
        }

        let mut options = OpenOptions::new();
        options.create(true).read(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(&self.path).map_err(|err| {
            Error::new(ErrorKind::IoFailure, "failed to open log file")
                .with_context("path", self.path.display())
                .with_source(err)
        })?;

        self.open_with(file)
    }

    /// Build the [`SharedFileWriter`] on an already open handle of the log file.
    ///
    /// The handle must be readable and opened in append mode; backups are copied through it.
    ///
    /// # Errors
    ///
    /// Return an error if the configuration is invalid.
    pub fn open_with(self, file: File) -> Result<SharedFileWriter, Error> {
        let Self {
            path,
            config,
            lock,
            clock,
            trap,
        } = self;

        config.validate()?;

        let lock = match (config.locking, lock) {
            (false, _) => None,
            (true, Some(lock)) => Some(lock),
            (true, None) => Some(default_file_lock().ok_or_else(|| {
                Error::new(
                    ErrorKind::ConfigInvalid,
                    "file locking is not supported on this platform",
                )
            })?),
        };

        let engine = Engine::new(file, path, config, lock, clock, trap);
        Ok(SharedFileWriter {
            line: LineBuffer::default(),
            engine,
        })
    }
}
