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

use crate::Error;

/// Accumulates arbitrary chunks and hands out complete lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append `bytes`, passing every completed line (newline included) to `write_line` in order.
    ///
    /// On the first failure the rejected line is discarded and the error is returned; lines
    /// before it in the same chunk stay written and the bytes after it are not consumed.
    pub(crate) fn feed<F>(&mut self, bytes: &[u8], mut write_line: F) -> Result<usize, Error>
    where
        F: FnMut(&[u8]) -> Result<(), Error>,
    {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(pos + 1);
            self.buf.extend_from_slice(line);
            let written = write_line(&self.buf);
            self.buf.clear();
            written?;
            rest = tail;
        }

        self.buf.extend_from_slice(rest);
        Ok(bytes.len())
    }

    /// Pass the pending partial line, if any, to `write_line` as it is.
    pub(crate) fn flush<F>(&mut self, write_line: F) -> Result<(), Error>
    where
        F: FnOnce(&[u8]) -> Result<(), Error>,
    {
        if self.buf.is_empty() {
            return Ok(());
        }

        let written = write_line(&self.buf);
        self.buf.clear();
        written
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::ErrorKind;

    fn collect(buffer: &mut LineBuffer, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut lines = vec![];
        for chunk in chunks {
            let n = buffer
                .feed(chunk, |line| {
                    lines.push(line.to_vec());
                    Ok(())
                })
                .unwrap();
            assert_eq!(n, chunk.len());
        }
        lines
    }

    #[test]
    fn test_lines_are_emitted_on_newline() {
        let mut buffer = LineBuffer::default();
        let lines = collect(&mut buffer, &[b"foo ", b"bar\nbaz\n\nqu", b"x"]);
        assert_eq!(lines, vec![b"foo bar\n".to_vec(), b"baz\n".to_vec(), b"\n".to_vec()]);
        assert_eq!(buffer.as_bytes(), b"qux");
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let mut rng = rand::rng();
        let input = (0..2000)
            .map(|_| {
                if rng.random_ratio(1, 12) {
                    b'\n'
                } else {
                    rng.random_range(b'a'..=b'z')
                }
            })
            .collect::<Vec<_>>();

        let mut whole = LineBuffer::default();
        let expected = collect(&mut whole, &[&input]);

        for _ in 0..20 {
            let mut chunks = vec![];
            let mut rest = input.as_slice();
            while !rest.is_empty() {
                let at = rng.random_range(0..=rest.len().min(64));
                let (chunk, tail) = rest.split_at(at);
                chunks.push(chunk);
                rest = tail;
            }

            let mut split = LineBuffer::default();
            assert_eq!(collect(&mut split, &chunks), expected);
            assert_eq!(split.as_bytes(), whole.as_bytes());
        }
    }

    #[test]
    fn test_failure_aborts_and_discards_rejected_line() {
        let mut buffer = LineBuffer::default();
        let mut written = vec![];
        let err = buffer
            .feed(b"ok\nbad\nlater\n", |line| {
                if line == b"bad\n" {
                    return Err(Error::new(ErrorKind::SizeExceeded, "too large"));
                }
                written.push(line.to_vec());
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SizeExceeded);
        assert_eq!(written, vec![b"ok\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_writes_partial_line() {
        let mut buffer = LineBuffer::default();
        assert!(collect(&mut buffer, &[b"partial"]).is_empty());

        let mut flushed = vec![];
        buffer
            .flush(|line| {
                flushed.extend_from_slice(line);
                Ok(())
            })
            .unwrap();
        assert_eq!(flushed, b"partial");
        assert!(buffer.is_empty());

        // nothing pending, nothing written
        buffer.flush(|_| unreachable!()).unwrap();
    }
}
