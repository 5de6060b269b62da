//! Bounded capture of a worker's combined output.

use crate::core::CapturedOutput;

/// Keeps the most recent `limit` bytes written to it.
///
/// Workers can be arbitrarily chatty; only the tail is useful for a
/// diagnostic, so earlier bytes are dropped and counted.
#[derive(Debug)]
pub struct BoundedOutput {
    limit: usize,
    buf: Vec<u8>,
    dropped: u64,
}

impl BoundedOutput {
    /// Creates a buffer retaining at most `limit` bytes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::with_capacity(limit.min(8 * 1024)),
            dropped: 0,
        }
    }

    /// Appends a chunk, dropping the oldest bytes beyond the bound.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        // Compact lazily so a stream of small writes stays linear.
        if self.buf.len() > self.limit.saturating_mul(2).max(1024) {
            self.compact();
        }
    }

    fn compact(&mut self) {
        if self.buf.len() > self.limit {
            let excess = self.buf.len() - self.limit;
            self.buf.drain(..excess);
            self.dropped += excess as u64;
        }
    }

    /// Total bytes seen so far.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.dropped + self.buf.len() as u64
    }

    /// Returns the retained tail.
    #[must_use]
    pub fn snapshot(&self) -> CapturedOutput {
        let start = self.buf.len().saturating_sub(self.limit);
        CapturedOutput {
            text: String::from_utf8_lossy(&self.buf[start..]).into_owned(),
            truncated_bytes: self.dropped + start as u64,
        }
    }

    /// Consumes the buffer and returns the retained tail.
    #[must_use]
    pub fn finish(mut self) -> CapturedOutput {
        self.compact();
        CapturedOutput {
            text: String::from_utf8_lossy(&self.buf).into_owned(),
            truncated_bytes: self.dropped,
        }
    }
}
