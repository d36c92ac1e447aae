//! Line framing over arbitrary chunk boundaries.
//!
//! Splitting happens on raw bytes. `\n` never occurs inside a multi-byte
//! UTF-8 sequence, so a character cut across two chunks is reassembled in the
//! carry buffer before anything tries to decode it.

use bytes::{Bytes, BytesMut};

/// Accumulates chunks and hands back complete lines without their terminator.
#[derive(Debug, Default)]
pub struct LineSplitter {
    carry: BytesMut,
    // Bytes of `carry` already known to contain no terminator.
    scanned: usize,
}

impl LineSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = self.carry.split_to(end + 1);
            line.truncate(end);
            lines.push(line.freeze());
            self.scanned = 0;
        }
        self.scanned = self.carry.len();
        lines
    }

    /// Takes whatever unterminated text is left, if any of it is non-blank.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        let rest = self.carry.split().freeze();
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }

    /// The incomplete trailing fragment held so far.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }
}
