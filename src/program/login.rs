//! Password login on a getty console.

use std::time::{Duration, Instant};
use tracing::debug;

use super::{log_transition, Program, ProgramContext, Step};
use crate::error::ProgramError;
use crate::io::IoEvent;
use crate::prompt::LineClass;

/// Minimum time between entering the same credential twice.
pub const DEFAULT_REENTRY_INTERVAL: Duration = Duration::from_secs(10);

/// Non-blank lines without a password prompt after which the password is
/// entered anyway. Some consoles print the prompt without a line of its own.
pub const DEFAULT_PASSWORD_AFTER_UNMATCHED: usize = 3;

/// State machine for password-based login. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoginState {
    /// Waiting for "login:" prompt from getty.
    AwaitingLogin,
    /// Username sent, waiting for "Password:" prompt.
    AwaitingPassword,
    /// Password sent, waiting for shell prompt.
    AwaitingShell,
    /// Shell prompt seen.
    Halted,
}

impl LoginState {
    /// Human-readable description of the state.
    pub fn description(&self) -> &'static str {
        match self {
            Self::AwaitingLogin => "waiting for login prompt",
            Self::AwaitingPassword => "waiting for password prompt",
            Self::AwaitingShell => "waiting for shell prompt",
            Self::Halted => "logged in",
        }
    }
}

pub struct LoginProgram {
    username: String,
    password: String,
    state: LoginState,
    reentry_interval: Duration,
    username_entered: Option<Instant>,
    password_entered: Option<Instant>,
    password_after_unmatched: Option<usize>,
    unmatched_lines: usize,
}

impl LoginProgram {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            state: LoginState::AwaitingLogin,
            reentry_interval: DEFAULT_REENTRY_INTERVAL,
            username_entered: None,
            password_entered: None,
            password_after_unmatched: Some(DEFAULT_PASSWORD_AFTER_UNMATCHED),
            unmatched_lines: 0,
        }
    }

    /// Enter the password after this many lines without a password prompt
    /// once the username was sent. `None` waits for the prompt forever.
    pub fn password_after_unmatched(mut self, lines: Option<usize>) -> Self {
        self.password_after_unmatched = lines;
        self
    }

    /// Prompts repeated within this interval are not answered again.
    pub fn reentry_interval(mut self, interval: Duration) -> Self {
        self.reentry_interval = interval;
        self
    }

    pub fn login_state(&self) -> LoginState {
        self.state
    }

    fn may_enter(&self, last: Option<Instant>) -> bool {
        last.map_or(true, |at| at.elapsed() >= self.reentry_interval)
    }

    fn enter_username(&mut self, ctx: &mut ProgramContext<'_>) -> Result<(), ProgramError> {
        if self.may_enter(self.username_entered) {
            ctx.enter(&self.username)?;
            self.username_entered = Some(Instant::now());
        }
        Ok(())
    }

    fn enter_password(&mut self, ctx: &mut ProgramContext<'_>) -> Result<(), ProgramError> {
        if self.may_enter(self.password_entered) {
            ctx.enter_secret(&self.password)?;
            self.password_entered = Some(Instant::now());
        }
        Ok(())
    }

    fn next_state(
        &mut self,
        ctx: &mut ProgramContext<'_>,
        event: &IoEvent,
    ) -> Result<LoginState, ProgramError> {
        let line = event.plain.as_str();
        let class = ctx.classifier().classify(line);

        // A shell prompt means we are in, whatever we were waiting for.
        // Covers autologin consoles that never show a login prompt.
        if class == LineClass::Ready {
            return Ok(LoginState::Halted);
        }

        let next = match self.state {
            LoginState::AwaitingLogin if class == LineClass::Login => {
                self.enter_username(ctx)?;
                LoginState::AwaitingPassword
            }
            LoginState::AwaitingPassword if class == LineClass::Login => {
                self.enter_username(ctx)?;
                LoginState::AwaitingPassword
            }
            LoginState::AwaitingPassword if ctx.classifier().is_password_prompt(line) => {
                self.enter_password(ctx)?;
                LoginState::AwaitingShell
            }
            LoginState::AwaitingPassword if !line.trim().is_empty() => {
                self.unmatched_lines += 1;
                if Some(self.unmatched_lines) == self.password_after_unmatched {
                    debug!(
                        "no password prompt after {} lines, entering password",
                        self.unmatched_lines
                    );
                    self.enter_password(ctx)?;
                    LoginState::AwaitingShell
                } else {
                    LoginState::AwaitingPassword
                }
            }
            LoginState::AwaitingShell if ctx.classifier().is_login_rejected(line) => {
                return Err(ProgramError::LoginRejected {
                    username: self.username.clone(),
                });
            }
            // Asked again: the terminal swallowed our input or login timed
            // out. Answer from here, the password prompt follows.
            LoginState::AwaitingShell if class == LineClass::Login => {
                self.enter_username(ctx)?;
                LoginState::AwaitingShell
            }
            LoginState::AwaitingShell if ctx.classifier().is_password_prompt(line) => {
                self.enter_password(ctx)?;
                LoginState::AwaitingShell
            }
            state => state,
        };
        Ok(next)
    }
}

impl Program for LoginProgram {
    fn name(&self) -> &str {
        "login"
    }

    fn state(&self) -> String {
        self.state.description().to_string()
    }

    fn compute(
        &mut self,
        ctx: &mut ProgramContext<'_>,
        event: &IoEvent,
    ) -> Result<Step, ProgramError> {
        if self.state == LoginState::Halted {
            return Ok(Step::Done);
        }
        let next = self.next_state(ctx, event)?;
        log_transition(self.name(), self.state, next);
        self.state = next;
        Ok(if next == LoginState::Halted {
            Step::Done
        } else {
            Step::Continue
        })
    }

    fn halted(&self) -> bool {
        self.state == LoginState::Halted
    }
}
