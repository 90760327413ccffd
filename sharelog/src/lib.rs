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

//! An append-only log file writer that many processes can share.
//!
//! Writers in different processes, possibly on different machines over a network filesystem,
//! append to the same file. Each complete line is written with one append; with file locking
//! enabled, lines of different writers never interleave. When the file would reach its max size,
//! its content is moved into a timestamped backup, optionally gzip-compressed, and backups are
//! pruned by count and age.
//!
//! # Example
//!
//! ```
//! use std::io::Write;
//! use std::num::NonZeroU64;
//! use std::num::NonZeroUsize;
//!
//! use sharelog::SharedFileWriter;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut writer = SharedFileWriter::builder(dir.path().join("app.log"))
//!     .max_file_size(NonZeroU64::new(10 * 1024 * 1024).unwrap())
//!     .max_backups(NonZeroUsize::new(5).unwrap())
//!     .prefix("[worker-1] ")
//!     .file_locking()
//!     .compression()
//!     .build()
//!     .unwrap();
//!
//! writeln!(writer, "This line will be written to a shared file.").unwrap();
//! writer.close().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use self::config::Config;
pub use self::config::DEFAULT_ATOMIC_LINE_SIZE;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::lock::FileLock;
pub use self::trap::DefaultTrap;
pub use self::trap::Trap;
pub use self::writer::SharedFileWriter;
pub use self::writer::SharedFileWriterBuilder;

pub mod lock;
pub mod trap;

mod assembler;
mod clock;
mod config;
mod engine;
mod error;
mod retention;
mod rotate;
mod writer;
