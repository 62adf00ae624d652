//! How a boot session ended.

use serde::Serialize;
use std::fmt;

use crate::error::SessionFailure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// Every program halted.
    Succeeded,
    /// A dead-end line was seen; the boot will not recover.
    StuckAborted { last_line: String },
    /// Flattened in JSON: the failure's `kind` sits next to `outcome`.
    Failed(SessionFailure),
}

impl TerminalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::StuckAborted { last_line } => write!(f, "stuck: {}", last_line),
            Self::Failed(failure) => write!(f, "failed: {}", failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let stuck = TerminalOutcome::StuckAborted {
            last_line: "You are in emergency mode.".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&stuck).unwrap(),
            r#"{"outcome":"stuck_aborted","last_line":"You are in emergency mode."}"#
        );

        let failed = TerminalOutcome::Failed(SessionFailure::Program {
            program: "login".to_string(),
            reason: "login rejected for user 'pi'".to_string(),
        });
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["kind"], "program");
        assert_eq!(json["program"], "login");
        assert!(!failed.is_success());
        assert!(TerminalOutcome::Succeeded.is_success());
    }
}
