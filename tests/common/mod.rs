//! Scripted fake consoles for driving the boot loop in tests.

#![allow(dead_code)]

use boot_console::Transport;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub type SpyBuffer = Arc<Mutex<Vec<u8>>>;

/// How long a scripted console waits for expected input before giving up.
const INPUT_WAIT: Duration = Duration::from_secs(10);

/// One step of a console script.
pub enum Beat {
    /// Emit these bytes.
    Output(Vec<u8>),
    /// Block until this text has been written to the console.
    AwaitInput(String),
    /// Block without output, longer than any test runs.
    Hang,
}

pub fn out(s: &str) -> Beat {
    Beat::Output(s.as_bytes().to_vec())
}

pub fn awaiting(s: &str) -> Beat {
    Beat::AwaitInput(s.to_string())
}

/// Console output that plays a script, reacting to what was typed.
/// Ends the stream when the script runs out.
pub struct ScriptedConsole {
    beats: VecDeque<Beat>,
    pending: Vec<u8>,
    input: SpyBuffer,
    /// How much of `input` earlier `AwaitInput` beats matched.
    matched: usize,
}

impl Read for ScriptedConsole {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pending.is_empty() {
            match self.beats.pop_front() {
                None => return Ok(0),
                Some(Beat::Output(bytes)) => self.pending = bytes,
                Some(Beat::AwaitInput(expected)) => {
                    if !self.wait_for_input(&expected) {
                        return Ok(0);
                    }
                }
                Some(Beat::Hang) => {
                    std::thread::sleep(Duration::from_secs(120));
                    return Ok(0);
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl ScriptedConsole {
    fn wait_for_input(&mut self, expected: &str) -> bool {
        let started = Instant::now();
        while started.elapsed() < INPUT_WAIT {
            {
                let input = self.input.lock().unwrap();
                let unseen = String::from_utf8_lossy(&input[self.matched..]).into_owned();
                if let Some(at) = unseen.find(expected) {
                    self.matched += at + expected.len();
                    return true;
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

/// Console input that records everything written.
pub struct SpyWriter(pub SpyBuffer);

impl Write for SpyWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A transport playing `beats`, plus the buffer collecting what was typed.
pub fn scripted_transport(beats: Vec<Beat>) -> (Transport, SpyBuffer) {
    let input: SpyBuffer = Arc::new(Mutex::new(Vec::new()));
    let console = ScriptedConsole {
        beats: beats.into(),
        pending: Vec::new(),
        input: Arc::clone(&input),
        matched: 0,
    };
    let transport = Transport::new(console, SpyWriter(Arc::clone(&input)));
    (transport, input)
}

pub fn typed(input: &SpyBuffer) -> String {
    String::from_utf8_lossy(&input.lock().unwrap()).into_owned()
}
