//! Line events flowing between the console and a program.

use serde::Serialize;
use std::fmt;

use crate::ansi;

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Engine bookkeeping (state transitions, timeouts).
    Meta,
    /// Text written to the console.
    Input,
    /// Text read from the console.
    Output,
    /// Diagnostics about the console itself.
    Error,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Meta => "meta",
            Self::Input => "in",
            Self::Output => "out",
            Self::Error => "err",
        };
        f.write_str(name)
    }
}

/// One line (or partial line) of console traffic.
///
/// `raw` keeps the escape sequences exactly as received; `plain` is what
/// pattern matching sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IoEvent {
    pub channel: Channel,
    pub raw: String,
    pub plain: String,
}

impl IoEvent {
    pub fn new(channel: Channel, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let plain = ansi::strip(&raw);
        Self {
            channel,
            raw,
            plain,
        }
    }

    pub fn output(raw: impl Into<String>) -> Self {
        Self::new(Channel::Output, raw)
    }

    pub fn input(raw: impl Into<String>) -> Self {
        Self::new(Channel::Input, raw)
    }

    pub fn meta(raw: impl Into<String>) -> Self {
        Self::new(Channel::Meta, raw)
    }

    pub fn error(raw: impl Into<String>) -> Self {
        Self::new(Channel::Error, raw)
    }
}

impl fmt::Display for IoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.channel, self.plain)
    }
}
