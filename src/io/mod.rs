//! Console I/O: from raw bytes to line events.
//!
//! - [`AckBuffer`] - bytes received but not yet consumed
//! - [`LineCursor`] - line framing over an `AckBuffer`
//! - [`BoundedReader`] - deadline-bounded reads over a blocking stream
//! - [`Transport`] - the pipes to and from the console
//! - [`IoEvent`] - one line of console traffic, raw and stripped

pub mod ack_buffer;
pub mod bounded_reader;
pub mod event;
pub mod line_cursor;
pub mod transport;

pub use ack_buffer::AckBuffer;
pub use bounded_reader::{BoundedReader, Chunk, EmptyLinePolicy, LineEvent, ReaderOptions};
pub use event::{Channel, IoEvent};
pub use line_cursor::{LineCursor, LineRead};
pub use transport::Transport;
