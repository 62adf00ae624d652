//! Reading a blocking byte stream with a deadline.
//!
//! The console's output pipe only offers blocking reads. A dedicated reader
//! thread does those and forwards whatever it gets over a channel; the
//! consumer side then waits on the channel with `recv_timeout`, which is what
//! makes every call here return within its timeout.

use anyhow::{Context, Result};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::line_cursor::{complete_utf8_prefix, LineCursor, LineRead};
use super::AckBuffer;
use crate::ansi;

const READ_BUFFER_SIZE: usize = 4096;
const CHANNEL_CAPACITY: usize = 64;
/// How long `stop` waits for the reader thread before detaching it.
const STOP_GRACE: Duration = Duration::from_millis(100);

/// What [`BoundedReader::read_line`] does with an empty partial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyLinePolicy {
    /// Report it as soon as a poll slice passes without data.
    Surface,
    /// Keep waiting; report `TimedOut` if nothing arrives.
    #[default]
    Suppress,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub empty_lines: EmptyLinePolicy,
    /// Longest unterminated escape sequence held back by [`BoundedReader::read`]
    /// and [`BoundedReader::read_line`] before it is passed through as text.
    pub max_hold_back: usize,
    /// Name of the reader thread.
    pub thread_name: String,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            empty_lines: EmptyLinePolicy::default(),
            max_hold_back: 512,
            thread_name: "console-reader".to_string(),
        }
    }
}

/// Result of [`BoundedReader::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    TimedOut,
    Ended,
}

/// Result of [`BoundedReader::read_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Complete(String),
    Partial(Arc<str>),
    TimedOut,
    Ended,
}

enum Message {
    Data(Vec<u8>),
    Eof,
    Failed(String),
}

enum Received {
    Data(Vec<u8>),
    TimedOut,
    Ended,
}

/// Deadline-bounded reads over a blocking source.
///
/// Use either [`read`](Self::read) or [`read_line`](Self::read_line) on one
/// reader; they keep separate buffers.
pub struct BoundedReader {
    rx: Option<Receiver<Message>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    options: ReaderOptions,
    source_ended: bool,
    /// Bytes `read` is holding back.
    pending: Vec<u8>,
    lines: AckBuffer,
    cursor: LineCursor,
    /// Last partial line cut before an unfinished escape sequence, keyed by
    /// the cursor's partial it was cut from.
    cut_partial: Option<(Arc<str>, Arc<str>)>,
}

impl BoundedReader {
    /// Start the reader thread for `source`.
    pub fn spawn(source: impl Read + Send + 'static, options: ReaderOptions) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || Self::reader_thread(source, tx, worker_stop))
            .context("Failed to spawn console reader thread")?;

        Ok(Self {
            rx: Some(rx),
            stop,
            handle: Some(handle),
            options,
            source_ended: false,
            pending: Vec::new(),
            lines: AckBuffer::new(),
            cursor: LineCursor::new(),
            cut_partial: None,
        })
    }

    fn reader_thread(mut source: impl Read, tx: SyncSender<Message>, stop: Arc<AtomicBool>) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        while !stop.load(Ordering::Acquire) {
            let message = match source.read(&mut buf) {
                Ok(0) => Message::Eof,
                Ok(n) => Message::Data(buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("console read failed: {}", e);
                    Message::Failed(e.to_string())
                }
            };
            let last = !matches!(message, Message::Data(_));
            if tx.send(message).is_err() || last {
                break;
            }
        }
        debug!("console reader thread exiting");
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Whether the source reported end-of-stream (or failed, or was stopped).
    pub fn is_source_ended(&self) -> bool {
        self.source_ended
    }

    fn receive(&mut self, deadline: Instant) -> Received {
        if self.source_ended {
            return Received::Ended;
        }
        let Some(rx) = &self.rx else {
            self.source_ended = true;
            return Received::Ended;
        };
        let wait = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(Message::Data(bytes)) => Received::Data(bytes),
            Ok(Message::Eof) | Err(RecvTimeoutError::Disconnected) => {
                self.source_ended = true;
                Received::Ended
            }
            Ok(Message::Failed(reason)) => {
                debug!("treating read failure as end of stream: {}", reason);
                self.source_ended = true;
                Received::Ended
            }
            Err(RecvTimeoutError::Timeout) => Received::TimedOut,
        }
    }

    /// Next piece of decoded text, returning within `timeout`.
    ///
    /// Never splits a UTF-8 character or an escape sequence across two
    /// chunks, except that an escape sequence longer than `max_hold_back`
    /// bytes is passed through as it is. End-of-stream flushes whatever is
    /// held back; invalid bytes become U+FFFD.
    pub fn read(&mut self, timeout: Duration) -> Chunk {
        let deadline = Instant::now() + timeout;
        loop {
            if self.source_ended {
                if self.pending.is_empty() {
                    return Chunk::Ended;
                }
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                return Chunk::Text(text);
            }

            match self.receive(deadline) {
                Received::Data(bytes) => {
                    self.pending.extend_from_slice(&bytes);
                    if let Some(text) = self.take_complete_text() {
                        return Chunk::Text(text);
                    }
                }
                Received::Ended => {}
                Received::TimedOut => return Chunk::TimedOut,
            }
        }
    }

    /// Split off the longest prefix of `pending` that ends outside any
    /// character or escape sequence.
    fn take_complete_text(&mut self) -> Option<String> {
        let cut = complete_utf8_prefix(&self.pending);
        let mut text = String::from_utf8_lossy(&self.pending[..cut]).into_owned();
        let mut held: Vec<u8> = self.pending[cut..].to_vec();

        if let Some(start) = ansi::incomplete_escape_start(&text) {
            if text.len() - start + held.len() <= self.options.max_hold_back {
                let mut tail = text.split_off(start).into_bytes();
                tail.extend_from_slice(&held);
                held = tail;
            }
        }

        self.pending = held;
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Next line event, returning within `timeout`.
    ///
    /// Complete lines are returned as soon as they are available. Otherwise
    /// the partial line is returned when the timeout elapses, or, with
    /// [`EmptyLinePolicy::Surface`], as soon as a poll slice (a third of the
    /// timeout) passes with an empty partial line.
    pub fn read_line(&mut self, timeout: Duration) -> LineEvent {
        let deadline = Instant::now() + timeout;
        let slice = timeout / 3;
        let surface_empty = self.options.empty_lines == EmptyLinePolicy::Surface;

        loop {
            let partial = match self.cursor.next_line(&mut self.lines) {
                LineRead::Complete(line) => return LineEvent::Complete(line),
                LineRead::Ended => return LineEvent::Ended,
                LineRead::Partial(partial) => self.without_unfinished_escape(partial),
            };

            let now = Instant::now();
            if now >= deadline {
                return if !partial.is_empty() || surface_empty {
                    LineEvent::Partial(partial)
                } else {
                    LineEvent::TimedOut
                };
            }

            let early_return = partial.is_empty() && surface_empty;
            let wait_until = if early_return {
                deadline.min(now + slice)
            } else {
                deadline
            };
            match self.receive(wait_until) {
                Received::Data(bytes) => self.lines.write(&bytes),
                Received::Ended => self.lines.close(),
                Received::TimedOut if early_return => return LineEvent::Partial(partial),
                Received::TimedOut => {}
            }
        }
    }

    /// `partial` up to an escape sequence still being received, unless that
    /// sequence is already longer than `max_hold_back`. Unchanged input
    /// yields the same allocation.
    fn without_unfinished_escape(&mut self, partial: Arc<str>) -> Arc<str> {
        let Some(start) = ansi::incomplete_escape_start(&partial) else {
            return partial;
        };
        if partial.len() - start > self.options.max_hold_back {
            return partial;
        }
        if let Some((source, cut)) = &self.cut_partial {
            if Arc::ptr_eq(source, &partial) {
                return Arc::clone(cut);
            }
        }
        let cut: Arc<str> = Arc::from(&partial[..start]);
        self.cut_partial = Some((partial, Arc::clone(&cut)));
        cut
    }

    /// Stop reading.
    ///
    /// The reader thread is told to stop and the channel is closed, so it
    /// exits at its next read or send. A thread stuck in a blocking read
    /// that does not finish within a short grace period is detached; this
    /// never waits for the source to end.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.rx = None;
        self.source_ended = true;
        if let Some(handle) = self.handle.take() {
            let started = Instant::now();
            while !handle.is_finished() && started.elapsed() < STOP_GRACE {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!("console reader thread still blocked, detaching it");
            }
        }
    }
}

impl Drop for BoundedReader {
    fn drop(&mut self) {
        self.stop();
    }
}
