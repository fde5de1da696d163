use crate::error::{HwError, Result};

/// Longest line accepted from a device before the buffer is considered corrupt.
pub const MAX_LINE_BYTES: usize = 4096;

/// Splits a raw byte stream into `\n`-terminated lines.
///
/// Partial lines stay buffered until their terminator arrives. `\r` is
/// stripped along with surrounding whitespace; blank lines are skipped.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes. Fails when an unterminated line grows past
    /// [`MAX_LINE_BYTES`]; the buffer is cleared in that case.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        let unterminated = self
            .pending
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(self.pending.len(), |i| self.pending.len() - i - 1);
        if unterminated > MAX_LINE_BYTES {
            self.pending.clear();
            return Err(HwError::LineTooLong(MAX_LINE_BYTES));
        }
        Ok(())
    }

    /// Next complete, non-blank line.
    pub fn pop_line(&mut self) -> Option<String> {
        loop {
            let end = self.pending.iter().position(|b| *b == b'\n')?;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
