//! Programs driving a console.
//!
//! A [`Program`] is a small state machine. The boot loop hands it every new
//! line of console output; the program answers by entering text (a user
//! name, a command) through its [`ProgramContext`] and moving to its next
//! state, until it halts.
//!
//! - [`LoginProgram`] - log in with user name and password
//! - [`ScriptProgram`] - run shell commands one after another
//! - [`ShutdownProgram`] - power the machine off

pub mod login;
pub mod script;
pub mod shutdown;

pub use login::LoginProgram;
pub use script::ScriptProgram;
pub use shutdown::ShutdownProgram;

use std::fmt::Debug;
use std::io::Write;
use tracing::debug;

use crate::error::ProgramError;
use crate::io::IoEvent;
use crate::prompt::PromptClassifier;

/// Line terminator appended to everything entered.
pub const DEFAULT_LINE_TERMINATOR: &str = "\n";

/// Shown in logs instead of secrets.
const REDACTED: &str = "********";

/// What the boot loop should do after a program handled an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep feeding events.
    Continue,
    /// The program has halted.
    Done,
}

/// A state machine reacting to console lines.
pub trait Program {
    fn name(&self) -> &str;

    /// Human-readable description of the current state.
    fn state(&self) -> String;

    /// React to one line event.
    fn compute(
        &mut self,
        ctx: &mut ProgramContext<'_>,
        event: &IoEvent,
    ) -> Result<Step, ProgramError>;

    fn halted(&self) -> bool;

    /// The console output ended. Programs for which that means success
    /// (a shutdown) halt here.
    fn on_end_of_stream(&mut self) -> Step {
        Step::Continue
    }

    /// A read timed out without new output. Programs that act on a quiet
    /// console (see [`ShutdownProgram::idle_fallback`]) do so here.
    fn on_idle(&mut self, _ctx: &mut ProgramContext<'_>) -> Result<Step, ProgramError> {
        Ok(Step::Continue)
    }
}

/// What a program may touch while handling an event.
pub struct ProgramContext<'a> {
    input: &'a mut dyn Write,
    classifier: &'a PromptClassifier,
    terminator: String,
    /// Everything entered since the last [`take_entered`](Self::take_entered).
    entered: Vec<IoEvent>,
}

impl<'a> ProgramContext<'a> {
    pub fn new(input: &'a mut dyn Write, classifier: &'a PromptClassifier) -> Self {
        Self {
            input,
            classifier,
            terminator: DEFAULT_LINE_TERMINATOR.to_string(),
            entered: Vec::new(),
        }
    }

    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    pub fn classifier(&self) -> &PromptClassifier {
        self.classifier
    }

    /// Type `text` followed by the line terminator.
    pub fn enter(&mut self, text: &str) -> Result<(), ProgramError> {
        self.write_line(text)?;
        debug!("entered: {}", text);
        self.entered.push(IoEvent::input(text));
        Ok(())
    }

    /// Like [`enter`](Self::enter), but never logs `text`.
    pub fn enter_secret(&mut self, text: &str) -> Result<(), ProgramError> {
        self.write_line(text)?;
        debug!("entered: {}", REDACTED);
        self.entered.push(IoEvent::input(REDACTED));
        Ok(())
    }

    fn write_line(&mut self, text: &str) -> Result<(), ProgramError> {
        self.input.write_all(text.as_bytes())?;
        self.input.write_all(self.terminator.as_bytes())?;
        self.input.flush()?;
        Ok(())
    }

    /// Drain the record of entered text (secrets redacted).
    pub fn take_entered(&mut self) -> Vec<IoEvent> {
        std::mem::take(&mut self.entered)
    }
}

/// Log a state change of `program`.
pub(crate) fn log_transition<S: Debug + PartialEq>(program: &str, from: S, to: S) {
    if from != to {
        debug!(program, "{:?} -> {:?}", from, to);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for driving programs line by line in tests.

    use super::*;

    pub struct Harness {
        pub written: Vec<u8>,
        pub classifier: PromptClassifier,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                written: Vec::new(),
                classifier: PromptClassifier::default(),
            }
        }

        pub fn feed(&mut self, program: &mut dyn Program, line: &str) -> Result<Step, ProgramError> {
            let mut ctx = ProgramContext::new(&mut self.written, &self.classifier);
            program.compute(&mut ctx, &IoEvent::output(line))
        }

        pub fn idle(&mut self, program: &mut dyn Program) -> Result<Step, ProgramError> {
            let mut ctx = ProgramContext::new(&mut self.written, &self.classifier);
            program.on_idle(&mut ctx)
        }

        pub fn written(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }
}
