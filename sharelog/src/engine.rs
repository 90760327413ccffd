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
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::Config;
use crate::Error;
use crate::ErrorKind;
use crate::Trap;
use crate::clock::Clock;
use crate::error::merge;
use crate::lock::FileLock;
use crate::lock::LockGuard;
use crate::lock::LockMode;
use crate::retention;
use crate::retention::RetentionPolicy;
use crate::rotate;

/// The per-line write path: size check, rotation decision, locking, and the append itself.
#[derive(Debug)]
pub(crate) struct Engine {
    file: File,
    path: PathBuf,
    config: Config,
    retention: RetentionPolicy,
    lock: Option<Box<dyn FileLock>>,
    pub(crate) clock: Clock,
    pub(crate) remove_backup: fn(&Path) -> io::Result<()>,
    trap: Box<dyn Trap>,
}

impl Engine {
    pub(crate) fn new(
        file: File,
        path: PathBuf,
        config: Config,
        lock: Option<Box<dyn FileLock>>,
        clock: Clock,
        trap: Box<dyn Trap>,
    ) -> Self {
        let retention = config.retention_policy();
        Self {
            file,
            path,
            config,
            retention,
            lock,
            clock,
            remove_backup: remove_file,
            trap,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn trap(&self) -> &dyn Trap {
        self.trap.as_ref()
    }

    /// Write one line, newline included, prepending the prefix.
    pub(crate) fn write_line(&self, line: &[u8]) -> Result<(), Error> {
        if line.is_empty() {
            return Ok(());
        }

        let n = line.len() + self.config.prefix.len();
        if let Some(max) = self.config.max_file_size
            && n as u64 > max.get()
        {
            return Err(
                Error::new(ErrorKind::SizeExceeded, "line exceeds max file size")
                    .with_context("path", self.path.display())
                    .with_context("line_size", n)
                    .with_context("max_file_size", max),
            );
        }

        let rotate = self.should_rotate(n)?;

        let Some(lock) = self.lock.as_deref() else {
            return self.rotate_and_append(line, rotate);
        };

        // A single append up to the atomic line size never interleaves with other appends, so
        // the shared lock only keeps the line out of a concurrent rotation.
        let mode = if n > self.config.atomic_line_size.get() || rotate {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };

        let guard = LockGuard::acquire(&self.file, &self.path, lock, mode)?;
        let outcome = match guard.mode() {
            // the file may have been rotated or grown while waiting for the lock
            LockMode::Exclusive => self.should_rotate(n),
            LockMode::Shared => Ok(false),
        }
        .and_then(|rotate| self.rotate_and_append(line, rotate));

        merge(outcome, guard.release())
    }

    /// Whether appending `n` more bytes reaches the max file size.
    fn should_rotate(&self, n: usize) -> Result<bool, Error> {
        let Some(max) = self.config.max_file_size else {
            return Ok(false);
        };

        let metadata = self.file.metadata().map_err(|err| {
            Error::new(ErrorKind::IoFailure, "failed to stat log file")
                .with_context("path", self.path.display())
                .with_source(err)
        })?;
        Ok(metadata.len() + n as u64 >= max.get())
    }

    /// Rotate if asked, then write the line.
    ///
    /// A [`ErrorKind::RetentionFailure`] of the rotation is returned only after the line is
    /// written, so that error kind means the line is in the file.
    fn rotate_and_append(&self, line: &[u8], rotate: bool) -> Result<(), Error> {
        let retention = if rotate { self.rotate()? } else { Ok(()) };

        let prefix = &self.config.prefix;
        let mut entry = Vec::with_capacity(prefix.len() + line.len());
        entry.extend_from_slice(prefix);
        entry.extend_from_slice(line);

        // one write call for the whole entry; appends of this size do not interleave
        (&self.file).write_all(&entry).map_err(|err| {
            Error::new(ErrorKind::IoFailure, "failed to write line")
                .with_context("path", self.path.display())
                .with_source(err)
        })?;

        retention
    }

    /// Rotate the live file, returning the outcome of the retention cleanup that follows.
    fn rotate(&self) -> Result<Result<(), Error>, Error> {
        let now = self.clock.now();
        let backup = rotate::rotate(&self.file, &self.path, &now, self.config.compression)?;
        log::debug!("rotated {} into {}", self.path.display(), backup.display());

        Ok(retention::cleanup(
            &self.path,
            &self.retention,
            &now,
            self.remove_backup,
        ))
    }

    pub(crate) fn cleanup(&self) -> Result<(), Error> {
        retention::cleanup(
            &self.path,
            &self.retention,
            &self.clock.now(),
            self.remove_backup,
        )
    }

    pub(crate) fn sync(&self) -> Result<(), Error> {
        self.file.sync_all().map_err(|err| {
            Error::new(ErrorKind::IoFailure, "failed to sync log file")
                .with_context("path", self.path.display())
                .with_source(err)
        })
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}
