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

//! Copy-and-truncate rotation of the live file.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;
use jiff::Zoned;

use crate::Error;
use crate::ErrorKind;
use crate::retention::TIMESTAMP_FORMAT;
use crate::retention::split_live_path;

/// Join the backup name for `now` and the sequence number `seq`.
pub(crate) fn backup_path(live: &Path, now: &Zoned, seq: u64, compress: bool) -> PathBuf {
    let date = now.strftime(TIMESTAMP_FORMAT);
    let mut path = live.as_os_str().to_owned();
    path.push(format!(".{date}.{seq}"));
    if compress {
        path.push(".gz");
    }
    PathBuf::from(path)
}

/// Create the first unused backup file for `now`.
///
/// Both the plain and the compressed variant of a candidate count as used, so sequence numbers
/// stay unique when the compression setting differs between writers.
fn create_backup(live: &Path, now: &Zoned, compress: bool) -> io::Result<(PathBuf, File)> {
    let mut seq = 0;
    loop {
        let path = backup_path(live, now, seq, compress);
        let twin = backup_path(live, now, seq, !compress);
        seq += 1;

        if fs::exists(&twin)? {
            continue;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Stream the whole content of `live` into `backup`, compressing on the fly if asked to.
fn copy_into(mut live: &File, backup: File, compress: bool) -> io::Result<u64> {
    live.seek(SeekFrom::Start(0))?;

    let (copied, backup) = if compress {
        let mut encoder = GzEncoder::new(backup, Compression::default());
        let copied = io::copy(&mut live, &mut encoder)?;
        (copied, encoder.finish()?)
    } else {
        let mut backup = backup;
        let copied = io::copy(&mut live, &mut backup)?;
        (copied, backup)
    };

    backup.sync_all()?;
    Ok(copied)
}

/// Rotate the live file: copy its content into a fresh backup, then truncate it.
///
/// The caller must hold the exclusive lock, if locking is enabled. `file` stays the live handle
/// and keeps appending after the truncation. Retention is left to the caller.
///
/// Returns the path of the backup.
pub(crate) fn rotate(
    file: &File,
    live: &Path,
    now: &Zoned,
    compress: bool,
) -> Result<PathBuf, Error> {
    let rotation_error = |message: &str, backup: Option<&Path>, err: io::Error| {
        let mut err = Error::new(ErrorKind::RotationFailure, message)
            .with_context("path", live.display())
            .with_source(err);
        if let Some(backup) = backup {
            err = err.with_context("backup", backup.display());
        }
        err
    };

    // backups are only found again under a UTF-8 file name
    split_live_path(live)?;

    let (backup_path, backup) = create_backup(live, now, compress)
        .map_err(|err| rotation_error("failed to create backup", None, err))?;

    match copy_into(file, backup, compress) {
        Ok(copied) => log::debug!(
            "copied {copied} bytes of {} into {}",
            live.display(),
            backup_path.display()
        ),
        Err(err) => {
            // an incomplete backup must not be mistaken for a good one
            let err = rotation_error("failed to copy into backup", Some(&backup_path), err);
            return Err(discard_backup(err, &backup_path, fs::remove_file(&backup_path)));
        }
    }

    file.sync_all()
        .map_err(|err| rotation_error("failed to sync live file", Some(&backup_path), err))?;
    file.set_len(0)
        .map_err(|err| rotation_error("failed to truncate live file", Some(&backup_path), err))?;

    Ok(backup_path)
}

/// Attach the failure to remove an incomplete backup to the error that left it behind.
fn discard_backup(err: Error, backup: &Path, removed: io::Result<()>) -> Error {
    match removed {
        Ok(()) => err,
        Err(removal) => err.with_source(
            Error::new(ErrorKind::IoFailure, "failed to remove incomplete backup")
                .with_context("backup", backup.display())
                .with_source(removal),
        ),
    }
}
