//! Incremental newline splitting over byte chunks
//!
//! HTTP chunk boundaries land anywhere, including mid-line. The splitter
//! carries the unterminated tail between `push` calls so every emitted line
//! is complete. Memory use is bounded by the longest single line.

use bytes::{Bytes, BytesMut};

#[cfg(test)]
#[path = "lines_test.rs"]
mod tests;

/// Splits an incoming byte stream into newline-delimited lines.
///
/// Lines are emitted with the trailing newline (and any `\r`) stripped.
/// Empty and whitespace-only lines are filtered out. Call [`finish`] at
/// end-of-input to flush a trailing line that was never terminated.
///
/// [`finish`]: LineSplitter::finish
#[derive(Debug, Default)]
pub struct LineSplitter {
    carry: BytesMut,
}

impl LineSplitter {
    /// Create a new splitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every complete line it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let mut line = self.carry.split_to(pos + 1);
            line.truncate(pos);
            if let Some(line) = trim_line(line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush the trailing unterminated line, if any.
    ///
    /// Emits at most once per stream; the splitter is empty afterwards.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.carry.is_empty() {
            return None;
        }
        trim_line(self.carry.split())
    }

    /// Bytes currently carried while waiting for a newline
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }
}

/// Strip a trailing `\r` and drop whitespace-only lines
fn trim_line(mut line: BytesMut) -> Option<Bytes> {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    Some(line.freeze())
}
