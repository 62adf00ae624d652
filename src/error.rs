//! Error types.
//!
//! Library operations that can fail for a caller-visible reason return one of
//! these. Glue code (process spawning, config files, the CLI) uses `anyhow`.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::boot::stage::BootStage;

/// Acknowledging more bytes than the buffer holds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckError {
    #[error("cannot acknowledge {requested} bytes, only {available} unread")]
    OutOfRange { requested: usize, available: usize },
}

/// A program could not continue.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to write to console: {0}")]
    Io(#[from] std::io::Error),

    #[error("login rejected for user '{username}'")]
    LoginRejected { username: String },

    #[error("command '{command}' was not accepted: {line}")]
    CommandRejected { command: String, line: String },
}

/// Why a boot session ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFailure {
    #[error("no new output for {} during {stage}", millis_text(.timeout_ms))]
    WatchdogTimeout {
        timeout_ms: u64,
        stage: BootStage,
        last_line: Option<String>,
    },

    #[error("console output ended before {program} finished")]
    TransportExhausted {
        program: String,
        last_line: Option<String>,
    },

    #[error("{program} failed: {reason}")]
    Program { program: String, reason: String },

    #[error("console transport failed: {reason}")]
    Transport { reason: String },
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} pattern '{pattern}': {source}")]
    InvalidPattern {
        name: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

/// `300ms`, `30s`, `1.5s`.
fn millis_text(ms: &u64) -> String {
    format!("{:?}", Duration::from_millis(*ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_error_message() {
        let err = AckError::OutOfRange {
            requested: 10,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "cannot acknowledge 10 bytes, only 3 unread"
        );
    }

    #[test]
    fn test_session_failure_serializes_with_kind_tag() {
        let failure = SessionFailure::TransportExhausted {
            program: "login".to_string(),
            last_line: None,
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "transport_exhausted");
        assert_eq!(json["program"], "login");
    }

    #[test]
    fn test_watchdog_timeout_message_names_stage() {
        let failure = SessionFailure::WatchdogTimeout {
            timeout_ms: 30_000,
            stage: BootStage::Kernel,
            last_line: Some("[    1.0] random: crng init done".to_string()),
        };
        assert_eq!(failure.to_string(), "no new output for 30s during kernel");
    }

    #[test]
    fn test_sub_second_watchdog_timeout_message() {
        let failure = SessionFailure::WatchdogTimeout {
            timeout_ms: 300,
            stage: BootStage::Firmware,
            last_line: None,
        };
        assert_eq!(failure.to_string(), "no new output for 300ms during firmware");
    }
}
