//! Line framing on top of an [`AckBuffer`].
//!
//! Consoles end lines with `\n`, `\r\n` or a bare `\r`, and prompts never end
//! a line at all. The cursor hands out complete lines once and otherwise
//! reports the partial line seen so far, so that a prompt like `login: ` can
//! be acted on while the cursor sits right after it.

use std::sync::Arc;

use super::AckBuffer;

/// Result of asking the cursor for the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A terminated line, without its terminator. Returned exactly once.
    Complete(String),
    /// The unterminated text after the last complete line, possibly empty.
    ///
    /// Calls that see no new bytes return the same allocation, so
    /// `Arc::ptr_eq` tells whether anything changed.
    Partial(Arc<str>),
    /// The buffer is closed and fully consumed.
    Ended,
}

#[derive(Debug, Default)]
pub struct LineCursor {
    /// The previous line ended in `\r` at the end of the buffer; a `\n`
    /// arriving next belongs to it.
    swallow_lf: bool,
    /// Last partial handed out, keyed by the number of bytes it covers.
    partial: Option<(usize, Arc<str>)>,
}

impl LineCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_line(&mut self, buf: &mut AckBuffer) -> LineRead {
        if self.swallow_lf {
            match buf.unread().first() {
                Some(b'\n') => {
                    self.swallow_lf = false;
                    self.partial = None;
                    consume(buf, 1);
                }
                Some(_) => self.swallow_lf = false,
                None => {}
            }
        }

        let unread = buf.unread();
        if let Some(end) = unread.iter().position(|&b| b == b'\n' || b == b'\r') {
            let line = String::from_utf8_lossy(&unread[..end]).into_owned();
            let mut consumed = end + 1;
            if unread[end] == b'\r' {
                match unread.get(end + 1) {
                    Some(b'\n') => consumed += 1,
                    Some(_) => {}
                    None => self.swallow_lf = true,
                }
            }
            consume(buf, consumed);
            self.partial = None;
            return LineRead::Complete(line);
        }

        if buf.is_closed() {
            if unread.is_empty() {
                return LineRead::Ended;
            }
            let line = String::from_utf8_lossy(unread).into_owned();
            let len = unread.len();
            consume(buf, len);
            self.partial = None;
            return LineRead::Complete(line);
        }

        let cut = complete_utf8_prefix(unread);
        if let Some((len, text)) = &self.partial {
            if *len == cut {
                return LineRead::Partial(Arc::clone(text));
            }
        }
        let text: Arc<str> = Arc::from(String::from_utf8_lossy(&unread[..cut]));
        self.partial = Some((cut, Arc::clone(&text)));
        LineRead::Partial(text)
    }

    /// The current unterminated tail of `buf`, without consuming anything.
    ///
    /// When `next_line` already handed out this tail as a partial line, the
    /// same allocation is returned, so repeated peeks without new bytes give
    /// identical values.
    pub fn peek_partial_line(&self, buf: &AckBuffer) -> Arc<str> {
        let unread = buf.unread();
        let start = unread
            .iter()
            .rposition(|&b| b == b'\n' || b == b'\r')
            .map_or(0, |i| i + 1);
        let tail = &unread[start..];
        let cut = complete_utf8_prefix(tail);
        match &self.partial {
            Some((len, text)) if start == 0 && *len == cut => Arc::clone(text),
            _ => Arc::from(String::from_utf8_lossy(&tail[..cut])),
        }
    }
}

/// Acknowledge `n` bytes the cursor has just scanned in `buf.unread()`.
fn consume(buf: &mut AckBuffer, n: usize) {
    let acked = buf.ack(n);
    debug_assert!(acked.is_ok(), "line cursor acknowledged unscanned bytes: {:?}", acked);
}

/// Length of `bytes` minus a trailing multi-byte character that has not been
/// fully received yet.
pub(crate) fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    // A UTF-8 character is at most 4 bytes, so only the last 3 can start an
    // incomplete one.
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b & 0xc0 == 0x80 {
            // continuation byte, keep looking for the lead byte
            continue;
        }
        let needed = match b {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}
