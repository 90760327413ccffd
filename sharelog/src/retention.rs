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

//! Enumeration and expiry of backups.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;

use jiff::SignedDuration;
use jiff::Timestamp;
use jiff::Zoned;
use jiff::civil::DateTime;

use crate::Error;
use crate::ErrorKind;

/// `strftime` format of the timestamp embedded in backup names.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Which backups survive a cleanup.
///
/// A backup is removed if it is beyond the newest `max_backups`, *or* if it is older than
/// `max_age`. If all fields are `None`, backups are never deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetentionPolicy {
    pub(crate) max_backups: Option<NonZeroUsize>,
    pub(crate) max_age: Option<SignedDuration>,
}

impl RetentionPolicy {
    pub(crate) fn is_unlimited(&self) -> bool {
        self.max_backups.is_none() && self.max_age.is_none()
    }
}

/// A backup of the live file: `<live>.<YYYYMMDD-HHMMSS>.<seq>[.gz]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Backup {
    pub(crate) filepath: PathBuf,
    /// The name without the `<live>.` part.
    suffix: String,
    datetime: Option<DateTime>,
    seq: Option<u64>,
}

impl Backup {
    fn new(filepath: PathBuf, suffix: String) -> Self {
        let mut parts = suffix.splitn(2, '.');
        let datetime = parts.next().and_then(parse_timestamp);
        let seq = parts.next().and_then(|rest| {
            let seq = rest.strip_suffix(".gz").unwrap_or(rest);
            seq.parse::<u64>().ok()
        });

        Self {
            filepath,
            suffix,
            datetime,
            seq,
        }
    }

    /// Whether the embedded timestamp is before `cutoff`. Backups without one never expire.
    fn is_older_than(&self, cutoff: Timestamp, now: &Zoned) -> bool {
        self.datetime
            .and_then(|datetime| datetime.to_zoned(now.time_zone().clone()).ok())
            .is_some_and(|created| created.timestamp() < cutoff)
    }
}

// oldest is the least; names without a timestamp are older than every stamped name
fn compare_backup(a: &Backup, b: &Backup) -> std::cmp::Ordering {
    (a.datetime, a.seq, &a.suffix).cmp(&(b.datetime, b.seq, &b.suffix))
}

/// Parse a `YYYYMMDD-HHMMSS` timestamp.
///
/// `strptime` alone accepts signs and shorter fields, so the shape is checked first.
fn parse_timestamp(s: &str) -> Option<DateTime> {
    let bytes = s.as_bytes();
    let well_formed = bytes.len() == 15
        && bytes[8] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 8 || b.is_ascii_digit());
    if !well_formed {
        return None;
    }
    DateTime::strptime(TIMESTAMP_FORMAT, s).ok()
}

/// Split the live path into its directory and file name.
pub(crate) fn split_live_path(live: &Path) -> Result<(&Path, &str), Error> {
    let dir = match live.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = live.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
        Error::new(ErrorKind::ConfigInvalid, "log file name must be valid UTF-8")
            .with_context("path", live.display())
    })?;
    Ok((dir, name))
}

/// List the backups of `live`, oldest first.
pub(crate) fn list_backups(live: &Path) -> Result<Vec<Backup>, Error> {
    let (dir, name) = split_live_path(live)?;
    let read_dir = fs::read_dir(dir).map_err(|err| {
        Error::new(ErrorKind::IoFailure, "failed to read log dir")
            .with_context("dir", dir.display())
            .with_source(err)
    })?;

    let mut backups = read_dir
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let metadata = entry.metadata().ok()?;
            // the writer only creates files, not directories or symlinks
            if !metadata.is_file() {
                return None;
            }

            let filename = entry.file_name();
            // if the filename is not a UTF-8 string, skip it.
            let filename = filename.to_str()?;
            let suffix = filename.strip_prefix(name)?.strip_prefix('.')?;
            if suffix.is_empty() {
                return None;
            }

            Some(Backup::new(dir.join(filename), suffix.to_string()))
        })
        .collect::<Vec<_>>();

    backups.sort_by(compare_backup);
    Ok(backups)
}

/// Remove the backups of `live` that `policy` no longer retains.
///
/// Every candidate is passed to `remove`; failures are collected into one
/// [`ErrorKind::RetentionFailure`].
pub(crate) fn cleanup(
    live: &Path,
    policy: &RetentionPolicy,
    now: &Zoned,
    remove: fn(&Path) -> io::Result<()>,
) -> Result<(), Error> {
    if policy.is_unlimited() {
        return Ok(());
    }

    let backups = list_backups(live)?;
    let cutoff = policy
        .max_age
        .and_then(|age| now.timestamp().checked_sub(age).ok());

    let total = backups.len();
    let mut failures = vec![];
    for (i, backup) in backups.iter().enumerate() {
        let beyond_count = policy.max_backups.is_some_and(|n| total - i > n.get());
        let expired = cutoff.is_some_and(|cutoff| backup.is_older_than(cutoff, now));
        if !beyond_count && !expired {
            continue;
        }

        match remove(&backup.filepath) {
            Ok(()) => log::debug!("removed backup {}", backup.filepath.display()),
            Err(err) => failures.push((backup.filepath.clone(), err)),
        }
    }

    if failures.is_empty() {
        return Ok(());
    }

    let mut err = Error::new(
        ErrorKind::RetentionFailure,
        format!("failed to remove {} of {} backups", failures.len(), total),
    )
    .with_context("path", live.display());
    for (filepath, source) in failures {
        err = err.with_source(
            Error::new(ErrorKind::IoFailure, "failed to remove backup")
                .with_context("backup", filepath.display())
                .with_source(source),
        );
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::num::NonZeroUsize;
    use std::str::FromStr;

    use jiff::SignedDuration;
    use jiff::Zoned;
    use tempfile::TempDir;

    use super::*;

    fn remove(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn touch(dir: &TempDir, name: &str) {
        fs::write(dir.path().join(name), b"x\n").unwrap();
    }

    fn remaining(dir: &TempDir) -> Vec<String> {
        let mut names = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn test_parse_timestamp() {
        let datetime = parse_timestamp("20240810-171252").unwrap();
        assert_eq!(datetime.to_string(), "2024-08-10T17:12:52");

        assert_eq!(parse_timestamp("20240810171252"), None);
        assert_eq!(parse_timestamp("20241310-171252"), None);
        assert_eq!(parse_timestamp("2024081a-171252"), None);
        assert_eq!(parse_timestamp("+2024081-171252"), None);
        assert_eq!(parse_timestamp("2024 810-171252"), None);
        assert_eq!(parse_timestamp("20240810-17125"), None);
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let now = Zoned::from_str("2024-08-10T07:02:05+08[+08]").unwrap();
        let formatted = now.strftime(TIMESTAMP_FORMAT).to_string();
        assert_eq!(formatted, "20240810-070205");
        assert_eq!(parse_timestamp(&formatted), Some(now.datetime()));
    }

    #[test]
    fn test_list_backups_orders_chronologically() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        touch(&dir, "app.log.20240810-000001.10");
        touch(&dir, "app.log.20240810-000001.2.gz");
        touch(&dir, "app.log.20240809-235959.0");
        touch(&dir, "app.log.old");
        touch(&dir, "app.log.");
        touch(&dir, "app.logger");
        touch(&dir, "other.log.20240810-000001.0");
        fs::create_dir(dir.path().join("app.log.d")).unwrap();

        let backups = list_backups(&dir.path().join("app.log")).unwrap();
        let suffixes = backups
            .iter()
            .map(|backup| backup.suffix.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            suffixes,
            vec![
                "old",
                "20240809-235959.0",
                "20240810-000001.2.gz",
                "20240810-000001.10"
            ]
        );
    }

    #[test]
    fn test_cleanup_keeps_most_recent() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        for seq in 0..5 {
            touch(&dir, &format!("app.log.20240810-000000.{seq}"));
        }

        let policy = RetentionPolicy {
            max_backups: NonZeroUsize::new(2),
            max_age: None,
        };
        let now = Zoned::from_str("2024-08-10T00:00:00[UTC]").unwrap();
        cleanup(&dir.path().join("app.log"), &policy, &now, remove).unwrap();

        assert_eq!(
            remaining(&dir),
            vec![
                "app.log",
                "app.log.20240810-000000.3",
                "app.log.20240810-000000.4"
            ]
        );
    }

    #[test]
    fn test_cleanup_expires_by_age() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        touch(&dir, "app.log.20240801-120000.0.gz");
        touch(&dir, "app.log.20240809-115959.0");
        touch(&dir, "app.log.20240809-120001.0");
        touch(&dir, "app.log.20240810-000000.0");
        touch(&dir, "app.log.manual-copy");

        let policy = RetentionPolicy {
            max_backups: None,
            max_age: Some(SignedDuration::from_hours(24)),
        };
        let now = Zoned::from_str("2024-08-10T12:00:00[UTC]").unwrap();
        cleanup(&dir.path().join("app.log"), &policy, &now, remove).unwrap();

        // names without a timestamp never expire by age
        assert_eq!(
            remaining(&dir),
            vec![
                "app.log",
                "app.log.20240809-120001.0",
                "app.log.20240810-000000.0",
                "app.log.manual-copy"
            ]
        );
    }

    #[test]
    fn test_cleanup_applies_either_policy() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        touch(&dir, "app.log.20240101-000000.0");
        touch(&dir, "app.log.20240810-100000.0");
        touch(&dir, "app.log.20240810-110000.0");
        touch(&dir, "app.log.20240810-113000.0");

        let policy = RetentionPolicy {
            max_backups: NonZeroUsize::new(3),
            max_age: Some(SignedDuration::from_hours(1)),
        };
        let now = Zoned::from_str("2024-08-10T12:00:00[UTC]").unwrap();
        cleanup(&dir.path().join("app.log"), &policy, &now, remove).unwrap();

        // the oldest is beyond the count, the second oldest is beyond the age
        assert_eq!(
            remaining(&dir),
            vec![
                "app.log",
                "app.log.20240810-110000.0",
                "app.log.20240810-113000.0"
            ]
        );
    }

    #[test]
    fn test_unlimited_policy_removes_nothing() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        touch(&dir, "app.log.19700101-000000.0");

        let now = Zoned::from_str("2024-08-10T12:00:00[UTC]").unwrap();
        cleanup(
            &dir.path().join("app.log"),
            &RetentionPolicy::default(),
            &now,
            remove,
        )
        .unwrap();
        assert_eq!(remaining(&dir).len(), 2);
    }

    #[test]
    fn test_cleanup_reports_every_failed_removal() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log");
        for seq in 0..4 {
            touch(&dir, &format!("app.log.20240810-000000.{seq}"));
        }

        let policy = RetentionPolicy {
            max_backups: NonZeroUsize::new(1),
            max_age: None,
        };
        let now = Zoned::from_str("2024-08-10T00:00:00[UTC]").unwrap();
        // only the first candidate resists removal
        let err = cleanup(&dir.path().join("app.log"), &policy, &now, |path| {
            if path.to_string_lossy().ends_with(".0") {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                fs::remove_file(path)
            }
        })
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RetentionFailure);
        assert_eq!(err.message(), "failed to remove 1 of 4 backups");
        assert_eq!(err.sources().len(), 1);
        assert_eq!(
            remaining(&dir),
            vec![
                "app.log",
                "app.log.20240810-000000.0",
                "app.log.20240810-000000.3"
            ]
        );
    }
}
