//! Receive buffer for accumulating incoming bytes.
//!
//! Bytes are appended at the tail and consumed from the head by advancing a
//! read cursor. Already-consumed bytes are only reclaimed (by moving the
//! unread bytes to the front) when the tail runs out of room, so parsing a
//! frame never shifts the whole buffer.

use heapless::Vec;

use crate::frame::MAX_FRAME_SIZE;

/// Receive buffer capacity: room for two maximum-size frames
pub const RX_BUFFER_SIZE: usize = 2 * MAX_FRAME_SIZE;

/// Fixed-capacity byte arena with consume-from-head semantics
#[derive(Debug, Clone)]
pub struct ReceiveBuffer {
    data: Vec<u8, RX_BUFFER_SIZE>,
    /// Index of the first unread byte in `data`
    cursor: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveBuffer {
    /// Create an empty receive buffer
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
        }
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Check if there are no unread bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes that can still be appended
    pub fn free(&self) -> usize {
        RX_BUFFER_SIZE - self.len()
    }

    /// Check if at least `count` unread bytes are available
    pub fn has(&self, count: usize) -> bool {
        self.len() >= count
    }

    /// Append as many bytes as fit, returning how many were accepted
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(self.free());
        if accepted == 0 {
            return 0;
        }

        if self.data.capacity() - self.data.len() < accepted {
            self.compact();
        }

        // Cannot fail: room was made above
        let _ = self.data.extend_from_slice(&bytes[..accepted]);
        accepted
    }

    /// First unread byte
    pub fn head(&self) -> Option<u8> {
        self.data.get(self.cursor).copied()
    }

    /// The first `count` unread bytes, if that many are buffered
    pub fn peek(&self, count: usize) -> Option<&[u8]> {
        if self.has(count) {
            Some(&self.data[self.cursor..self.cursor + count])
        } else {
            None
        }
    }

    /// All unread bytes
    pub fn unread(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    /// Drop up to `count` bytes from the head
    pub fn consume(&mut self, count: usize) {
        self.cursor += count.min(self.len());
        if self.cursor == self.data.len() {
            self.clear();
        }
    }

    /// Drop the first unread byte, returning it
    pub fn discard_head(&mut self) -> Option<u8> {
        let byte = self.head()?;
        self.consume(1);
        Some(byte)
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.data.clear();
        self.cursor = 0;
    }

    /// Move unread bytes to the front of the arena
    fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let unread = self.len();
        self.data.copy_within(self.cursor.., 0);
        self.data.truncate(unread);
        self.cursor = 0;
    }
}
