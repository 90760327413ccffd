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

use std::num::NonZeroU64;
use std::num::NonZeroUsize;
use std::time::Duration;

use jiff::SignedDuration;

use crate::Error;
use crate::ErrorKind;
use crate::retention::RetentionPolicy;

/// Size in bytes up to which a single append is assumed atomic on most unix systems.
pub const DEFAULT_ATOMIC_LINE_SIZE: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

/// The immutable configuration of a [`SharedFileWriter`](crate::SharedFileWriter).
///
/// Created by [`SharedFileWriterBuilder`](crate::SharedFileWriterBuilder) and validated before
/// any file is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub(crate) max_file_size: Option<NonZeroU64>,
    pub(crate) max_backups: Option<NonZeroUsize>,
    pub(crate) max_backup_age: Option<Duration>,
    pub(crate) prefix: Vec<u8>,
    pub(crate) locking: bool,
    pub(crate) compression: bool,
    pub(crate) atomic_line_size: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: None,
            max_backups: None,
            max_backup_age: None,
            prefix: vec![],
            locking: false,
            compression: false,
            atomic_line_size: DEFAULT_ATOMIC_LINE_SIZE,
        }
    }
}

impl Config {
    /// The size the live file may reach before it is rotated. `None` never rotates.
    pub fn max_file_size(&self) -> Option<NonZeroU64> {
        self.max_file_size
    }

    /// The number of backups to keep. `None` keeps all of them.
    pub fn max_backups(&self) -> Option<NonZeroUsize> {
        self.max_backups
    }

    /// The age after which backups are deleted. `None` keeps them forever.
    pub fn max_backup_age(&self) -> Option<Duration> {
        self.max_backup_age
    }

    /// The bytes prepended to every line.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Whether writes take an advisory lock on the live file.
    pub fn locking(&self) -> bool {
        self.locking
    }

    /// Whether backups are gzip-compressed.
    pub fn compression(&self) -> bool {
        self.compression
    }

    /// Lines (prefix included) up to this size are written under a shared lock only.
    pub fn atomic_line_size(&self) -> NonZeroUsize {
        self.atomic_line_size
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(max) = self.max_file_size {
            // the shortest possible line is the prefix and a single byte
            let shortest = self.prefix.len() as u64 + 1;
            if shortest > max.get() {
                return Err(Error::new(
                    ErrorKind::ConfigInvalid,
                    "prefix leaves no room for a line within the max file size",
                )
                .with_context("prefix_len", self.prefix.len())
                .with_context("max_file_size", max));
            }
        }

        if let Some(age) = self.max_backup_age {
            SignedDuration::try_from(age).map_err(|err| {
                Error::new(ErrorKind::ConfigInvalid, "max backup age is out of range")
                    .with_context("max_backup_age", format!("{age:?}"))
                    .with_source(err)
            })?;
        }

        Ok(())
    }

    pub(crate) fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_backups: self.max_backups,
            // checked by `validate`
            max_age: self
                .max_backup_age
                .and_then(|age| SignedDuration::try_from(age).ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.atomic_line_size().get(), 4096);
        assert!(!config.locking());
        assert!(config.retention_policy().is_unlimited());
    }

    #[test]
    fn test_prefix_must_fit_max_file_size() {
        let config = Config {
            max_file_size: NonZeroU64::new(4),
            prefix: b"[ABCD]".to_vec(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let config = Config {
            max_file_size: NonZeroU64::new(7),
            prefix: b"[ABCD]".to_vec(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_backup_age_must_fit_signed_duration() {
        let config = Config {
            max_backup_age: Some(Duration::MAX),
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let config = Config {
            max_backup_age: Some(Duration::from_secs(3600)),
            ..Config::default()
        };
        assert_eq!(
            config.retention_policy().max_age,
            Some(SignedDuration::from_hours(1))
        );
    }
}
