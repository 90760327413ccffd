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

//! Append stdin, or a generated load of fixed-size lines, to a log file shared by many
//! processes.

use std::io;
use std::num::NonZeroU64;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use jiff::SignedDuration;
use sharelog::DEFAULT_ATOMIC_LINE_SIZE;
use sharelog::Error;
use sharelog::SharedFileWriter;

#[derive(Debug, Parser)]
#[command(name = "sharelog", version, about)]
struct Args {
    /// Path of the live log file.
    #[arg(long)]
    log: PathBuf,

    /// Bytes prepended to every line.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Write this many generated lines instead of copying stdin.
    #[arg(long)]
    lines: Option<usize>,

    /// Size of a generated line, prefix and newline included.
    #[arg(long, default_value_t = 80)]
    line_size: usize,

    /// Rotate before the file reaches this many bytes. 0 never rotates.
    #[arg(long, default_value_t = 0)]
    max_size: u64,

    /// Number of backups to keep. 0 keeps all of them.
    #[arg(long, default_value_t = 10000)]
    max_backups: usize,

    /// Remove backups older than this, e.g. "7d" or "12h 30m".
    #[arg(long, value_parser = parse_age)]
    max_age: Option<Duration>,

    /// Lock the file for every write.
    #[arg(long)]
    lock: bool,

    /// Compress backups with gzip.
    #[arg(long)]
    compress: bool,

    /// Lines up to this size are written under a shared lock only.
    #[arg(long, default_value_t = DEFAULT_ATOMIC_LINE_SIZE)]
    atomic_line_size: NonZeroUsize,
}

fn parse_age(s: &str) -> Result<Duration, String> {
    let age = s.parse::<SignedDuration>().map_err(|err| err.to_string())?;
    Duration::try_from(age).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    logforth::starter_log::stderr().apply();

    let args = Args::parse();
    let log = args.log.clone();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("failed to write {}: {err}", log.display());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Error> {
    let mut builder = SharedFileWriter::builder(&args.log)
        .prefix(args.prefix.as_bytes())
        .atomic_line_size(args.atomic_line_size);
    if let Some(n) = NonZeroU64::new(args.max_size) {
        builder = builder.max_file_size(n);
    }
    if let Some(n) = NonZeroUsize::new(args.max_backups) {
        builder = builder.max_backups(n);
    }
    if let Some(age) = args.max_age {
        builder = builder.max_backup_age(age);
    }
    if args.lock {
        builder = builder.file_locking();
    }
    if args.compress {
        builder = builder.compression();
    }
    let mut writer = builder.build()?;

    match args.lines {
        Some(lines) => {
            let body = args.line_size.saturating_sub(args.prefix.len() + 1);
            let message = "x".repeat(body) + "\n";
            for _ in 0..lines {
                writer.append(message.as_bytes())?;
            }
            log::debug!("wrote {lines} lines to {}", args.log.display());
        }
        None => {
            let copied = io::copy(&mut io::stdin().lock(), &mut writer)
                .map_err(Error::from_io_error)?;
            log::debug!("copied {copied} bytes to {}", args.log.display());
        }
    }

    writer.close()
}
