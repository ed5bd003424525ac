// SPDX-License-Identifier: Apache-2.0

//! Blocking line reader for a single file, resuming from a byte offset.
//!
//! Only complete (newline terminated) lines are consumed. A trailing fragment
//! is left in place so the next read picks it up once the writer finishes it.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One physical line read from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Line content without the line terminator
    pub text: String,
    /// Byte offset of the first byte of the line
    pub offset: u64,
    /// Bytes consumed including the terminator
    pub len: u64,
    /// 1-based line number
    pub line_number: u64,
}

/// Outcome of one read pass
#[derive(Debug, Default)]
pub struct ReadChunk {
    pub lines: Vec<RawLine>,
    /// Offset just past the last consumed line
    pub end_offset: u64,
    /// Line count through `end_offset`
    pub end_line: u64,
    /// False when the pass stopped at the byte budget with more data pending
    pub reached_eof: bool,
}

impl ReadChunk {
    pub fn bytes_read(&self, start_offset: u64) -> u64 {
        self.end_offset.saturating_sub(start_offset)
    }
}

/// LineReader reads complete lines from a file path
#[derive(Debug, Clone)]
pub struct LineReader {
    path: PathBuf,
    /// Lines longer than this are truncated
    max_line_bytes: usize,
    /// Upper bound of bytes consumed per pass
    max_read_bytes: u64,
}

impl LineReader {
    pub fn new(path: impl AsRef<Path>, max_line_bytes: usize, max_read_bytes: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_line_bytes: max_line_bytes.max(1),
            max_read_bytes: max_read_bytes.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read complete lines starting at `offset`. `line_number` is the count of
    /// lines already consumed before `offset`.
    pub fn read_from(&self, offset: u64, line_number: u64) -> io::Result<ReadChunk> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let mut chunk = ReadChunk {
            lines: Vec::new(),
            end_offset: offset,
            end_line: line_number,
            reached_eof: false,
        };
        let mut buf = Vec::with_capacity(256);

        loop {
            if chunk.end_offset - offset >= self.max_read_bytes {
                break;
            }

            buf.clear();
            // a single unterminated line may not grow past the read budget
            let limit = self.max_read_bytes.max(self.max_line_bytes as u64) + 1;
            let n = (&mut reader).take(limit).read_until(b'\n', &mut buf)?;
            if n == 0 {
                chunk.reached_eof = true;
                break;
            }

            let terminated = buf.last() == Some(&b'\n');
            if !terminated && (n as u64) < limit {
                // partial line at the end of the file, leave it for the next pass
                chunk.reached_eof = true;
                break;
            }

            let line_offset = chunk.end_offset;
            chunk.end_offset += n as u64;
            chunk.end_line += 1;

            let mut content: &[u8] = &buf;
            if let Some(stripped) = content.strip_suffix(b"\n") {
                content = stripped;
            }
            if let Some(stripped) = content.strip_suffix(b"\r") {
                content = stripped;
            }

            chunk.lines.push(RawLine {
                text: self.decode(content),
                offset: line_offset,
                len: n as u64,
                line_number: chunk.end_line,
            });
        }

        Ok(chunk)
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        if text.len() <= self.max_line_bytes {
            return text.into_owned();
        }
        let mut cut = self.max_line_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text[..cut].to_string()
    }
}
