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

//! Writers in separate processes share one file through the advisory lock.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use tempfile::TempDir;

const BIN: &str = env!("CARGO_BIN_EXE_sharelog");

fn log_files(live: &Path) -> Vec<PathBuf> {
    let name = live.file_name().unwrap().to_str().unwrap().to_string();
    fs::read_dir(live.parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|filename| filename.starts_with(&name))
        })
        .collect()
}

#[test]
fn test_concurrent_processes_and_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("app.log");
    fs::write(&path, b"").unwrap();

    const WRITERS: usize = 5;
    const LINES_PER_WRITER: usize = 20;
    const LINE_SIZE: usize = 10;
    const ROTATION_SIZE: usize = 100;

    let children = (0..WRITERS)
        .map(|id| {
            Command::new(BIN)
                .arg(format!("--log={}", path.display()))
                .arg(format!("--prefix={id}"))
                .arg(format!("--lines={LINES_PER_WRITER}"))
                .arg(format!("--line-size={LINE_SIZE}"))
                .arg(format!("--max-size={ROTATION_SIZE}"))
                .arg("--lock")
                .spawn()
                .unwrap()
        })
        .collect::<Vec<_>>();
    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let files = log_files(&path);
    assert!(files.len() >= WRITERS * LINES_PER_WRITER * LINE_SIZE / ROTATION_SIZE);

    let mut total = 0;
    for file in &files {
        let content = fs::read(file).unwrap();
        for line in content.split(|&b| b == b'\n').filter(|line| !line.is_empty()) {
            assert_eq!(line.len(), LINE_SIZE - 1, "corrupted line in {}", file.display());
            total += 1;
        }
    }
    assert_eq!(total, WRITERS * LINES_PER_WRITER);
}

#[test]
fn test_copies_stdin() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("logs").join("stdin.log");

    let mut child = Command::new(BIN)
        .arg("--log")
        .arg(&path)
        .arg("--prefix=[stdin] ")
        .arg("--lock")
        .stdin(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"first\nsecond\ntrailing")
        .unwrap();
    assert!(child.wait().unwrap().success());

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "[stdin] first\n[stdin] second\n[stdin] trailing"
    );
}

#[test]
fn test_rejects_oversized_lines() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("small.log");

    let status = Command::new(BIN)
        .arg(format!("--log={}", path.display()))
        .arg("--lines=1")
        .arg("--line-size=64")
        .arg("--max-size=32")
        .stderr(Stdio::null())
        .status()
        .unwrap();

    assert!(!status.success());
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
}
