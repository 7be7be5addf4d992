// ABOUTME: Fixed-capacity append-only byte buffer shared by the RX and TX sides of the framing layer
// ABOUTME: Tracks an overflow flag rather than failing outright, matching the slave's truncate-and-flag behavior

use bytes::{BufMut, BytesMut};

/// Fixed-capacity, append-only byte buffer used identically for receive and
/// transmit staging.
///
/// A `PacketBuffer` never reallocates past its configured capacity. Appending
/// past capacity sets `overflow` and drops the offending bytes instead of
/// panicking or growing, so a misbehaving peer can only ever truncate a
/// frame, never exhaust memory.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    buf: BytesMut,
    capacity: usize,
    overflow: bool,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            overflow: false,
        }
    }

    /// Appends a single byte, or sets `overflow` if the buffer is full.
    pub fn push(&mut self, byte: u8) {
        if self.buf.len() >= self.capacity {
            self.overflow = true;
            return;
        }
        self.buf.put_u8(byte);
    }

    /// Appends a whole slice, stopping (and flagging overflow) at capacity.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    /// Returns a writable suffix of `n` bytes if `len + n <= capacity`, else `None`.
    ///
    /// The caller fills the returned slice and calls [`commit`](Self::commit)
    /// to advance `len`.
    pub fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.buf.len() + n > self.capacity {
            return None;
        }
        let start = self.buf.len();
        self.buf.resize(start + n, 0);
        Some(&mut self.buf[start..start + n])
    }

    /// Advances `len` by `n` bytes previously written via `reserve`.
    ///
    /// No-op beyond what `reserve` already accounted for; kept as a distinct
    /// step so callers can partially fill a reservation.
    pub fn commit(&mut self, _n: usize) {}

    /// The filled region of the buffer.
    pub fn view(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// Resets `len` to 0 and clears the overflow flag.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflow = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_accumulates_until_capacity() {
        let mut pb = PacketBuffer::new(4);
        pb.push(b'a');
        pb.push(b'b');
        pb.push(b'c');
        pb.push(b'd');
        assert_eq!(pb.view(), b"abcd");
        assert!(!pb.overflow());
    }

    #[test]
    fn push_past_capacity_sets_overflow_and_drops_byte() {
        let mut pb = PacketBuffer::new(2);
        pb.push(b'a');
        pb.push(b'b');
        pb.push(b'c');
        assert_eq!(pb.view(), b"ab");
        assert!(pb.overflow());
    }

    #[test]
    fn clear_resets_len_and_overflow() {
        let mut pb = PacketBuffer::new(2);
        pb.push(b'a');
        pb.push(b'b');
        pb.push(b'c');
        pb.clear();
        assert!(pb.is_empty());
        assert!(!pb.overflow());
    }

    #[test]
    fn reserve_none_when_would_exceed_capacity() {
        let mut pb = PacketBuffer::new(4);
        pb.extend_from_slice(b"ab");
        assert!(pb.reserve(3).is_none());
        assert!(pb.reserve(2).is_some());
    }
}
