//! Append-only byte buffer with an explicit consumption cursor.
//!
//! The producer appends, the consumer looks at everything not yet
//! acknowledged and acknowledges what it has used. Until then the same bytes
//! are offered again on every look, which lets a line parser wait for a
//! terminator without copying.

use crate::error::AckError;

/// Compact once this many acknowledged bytes have piled up at the front.
const COMPACT_THRESHOLD: usize = 8 * 1024;

#[derive(Debug, Default)]
pub struct AckBuffer {
    bytes: Vec<u8>,
    /// Offset of the first unacknowledged byte in `bytes`.
    consumed: usize,
    closed: bool,
}

impl AckBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes. Writes after [`close`](Self::close) are ignored.
    pub fn write(&mut self, data: &[u8]) {
        if self.closed {
            return;
        }
        self.compact();
        self.bytes.extend_from_slice(data);
    }

    /// Mark end-of-stream.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Everything written and not yet acknowledged.
    pub fn unread(&self) -> &[u8] {
        &self.bytes[self.consumed..]
    }

    pub fn available(&self) -> usize {
        self.bytes.len() - self.consumed
    }

    /// Closed and fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.closed && self.available() == 0
    }

    /// Mark the first `n` unread bytes as consumed.
    pub fn ack(&mut self, n: usize) -> Result<(), AckError> {
        let available = self.available();
        if n > available {
            return Err(AckError::OutOfRange {
                requested: n,
                available,
            });
        }
        self.consumed += n;
        Ok(())
    }

    fn compact(&mut self) {
        if self.consumed == self.bytes.len() {
            self.bytes.clear();
            self.consumed = 0;
        } else if self.consumed >= COMPACT_THRESHOLD {
            self.bytes.drain(..self.consumed);
            self.consumed = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unread_until_acked() {
        let mut buf = AckBuffer::new();
        buf.write(b"hello ");
        buf.write(b"world");
        assert_eq!(buf.unread(), b"hello world");
        assert_eq!(buf.unread(), b"hello world");

        buf.ack(6).unwrap();
        assert_eq!(buf.unread(), b"world");
        assert_eq!(buf.available(), 5);
    }

    #[test]
    fn test_ack_everything_available() {
        let mut buf = AckBuffer::new();
        buf.write(b"abc");
        buf.ack(3).unwrap();
        assert_eq!(buf.available(), 0);
        assert!(buf.unread().is_empty());
        buf.ack(0).unwrap();
    }

    #[test]
    fn test_ack_out_of_range_leaves_state_untouched() {
        let mut buf = AckBuffer::new();
        buf.write(b"abc");
        let err = buf.ack(4).unwrap_err();
        assert_eq!(
            err,
            AckError::OutOfRange {
                requested: 4,
                available: 3
            }
        );
        assert_eq!(buf.unread(), b"abc");
    }

    #[test]
    fn test_close_and_exhaust() {
        let mut buf = AckBuffer::new();
        buf.write(b"x");
        buf.close();
        assert!(buf.is_closed());
        assert!(!buf.is_exhausted());
        buf.write(b"ignored");
        assert_eq!(buf.unread(), b"x");
        buf.ack(1).unwrap();
        assert!(buf.is_exhausted());
    }

    #[test]
    fn test_compaction_keeps_unread_bytes() {
        let mut buf = AckBuffer::new();
        let chunk = vec![b'a'; COMPACT_THRESHOLD];
        buf.write(&chunk);
        buf.write(b"tail");
        buf.ack(COMPACT_THRESHOLD).unwrap();
        buf.write(b"!");
        assert_eq!(buf.unread(), b"tail!");
    }
}
