//! Powering the machine off from a shell prompt.

use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use super::{log_transition, Program, ProgramContext, Step};
use crate::error::ProgramError;
use crate::io::IoEvent;
use crate::prompt::LineClass;
use crate::watchdog::Watchdog;

pub const DEFAULT_SHUTDOWN_COMMAND: &str = "sudo shutdown -h now";

/// A ready prompt showing up this long after the command was entered means
/// it was lost, so it is entered again.
pub const DEFAULT_REISSUE_AFTER: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    AwaitingReadiness,
    ShutdownIssued { at: Instant },
    /// Console output ended after the command was entered.
    Halted,
}

impl ShutdownState {
    pub fn description(&self) -> &'static str {
        match self {
            Self::AwaitingReadiness => "waiting for a shell prompt",
            Self::ShutdownIssued { .. } => "shutting down",
            Self::Halted => "powered off",
        }
    }
}

pub struct ShutdownProgram {
    command: String,
    reissue_after: Duration,
    /// Treated like a ready prompt, for consoles whose prompt the classifier
    /// does not know.
    fallback: Option<Regex>,
    /// Console quiet for this long counts as ready.
    idle_fallback: Option<Duration>,
    idle_switch: Option<IdleSwitch>,
    state: ShutdownState,
}

/// Watchdog reset by every new line, flagging a quiet console.
struct IdleSwitch {
    watchdog: Watchdog,
    fired: Arc<AtomicBool>,
}

impl IdleSwitch {
    fn arm(timeout: Duration) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let watchdog = Watchdog::start(timeout, false, move || {
            flag.store(true, Ordering::Release);
        });
        Self { watchdog, fired }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl ShutdownProgram {
    pub fn new() -> Self {
        Self {
            command: DEFAULT_SHUTDOWN_COMMAND.to_string(),
            reissue_after: DEFAULT_REISSUE_AFTER,
            fallback: None,
            idle_fallback: None,
            idle_switch: None,
            state: ShutdownState::AwaitingReadiness,
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn reissue_after(mut self, delay: Duration) -> Self {
        self.reissue_after = delay;
        self
    }

    pub fn fallback_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.fallback = pattern;
        self
    }

    /// Enter the command once the console has been quiet for `quiet` while
    /// waiting for a prompt, for consoles whose prompt is not recognized.
    pub fn idle_fallback(mut self, quiet: Option<Duration>) -> Self {
        self.idle_fallback = quiet;
        self
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.state
    }

    fn is_ready(&self, ctx: &ProgramContext<'_>, line: &str) -> bool {
        ctx.classifier().classify(line) == LineClass::Ready
            || self
                .fallback
                .as_ref()
                .is_some_and(|re| re.is_match(line.trim_end()))
    }

    /// Start the idle switch on first use, reset it on every new line.
    fn touch_idle_switch(&mut self, new_line: bool) {
        if self.state != ShutdownState::AwaitingReadiness {
            return;
        }
        if let Some(switch) = &self.idle_switch {
            if new_line {
                switch.watchdog.reset();
            }
        } else if let Some(quiet) = self.idle_fallback {
            self.idle_switch = Some(IdleSwitch::arm(quiet));
        }
    }

    fn issue(&mut self, ctx: &mut ProgramContext<'_>) -> Result<(), ProgramError> {
        ctx.enter(&self.command)?;
        if let Some(mut switch) = self.idle_switch.take() {
            switch.watchdog.stop();
        }
        self.transition(ShutdownState::ShutdownIssued { at: Instant::now() });
        Ok(())
    }

    fn transition(&mut self, next: ShutdownState) {
        log_transition(
            "shutdown",
            self.state.description(),
            next.description(),
        );
        self.state = next;
    }
}

impl Default for ShutdownProgram {
    fn default() -> Self {
        Self::new()
    }
}

impl Program for ShutdownProgram {
    fn name(&self) -> &str {
        "shutdown"
    }

    fn state(&self) -> String {
        self.state.description().to_string()
    }

    fn compute(
        &mut self,
        ctx: &mut ProgramContext<'_>,
        event: &IoEvent,
    ) -> Result<Step, ProgramError> {
        let ready = self.is_ready(ctx, &event.plain);
        self.touch_idle_switch(true);
        match self.state {
            ShutdownState::AwaitingReadiness if ready => self.issue(ctx)?,
            ShutdownState::ShutdownIssued { at } if ready && at.elapsed() >= self.reissue_after => {
                info!("shell prompt is back, entering '{}' again", self.command);
                ctx.enter(&self.command)?;
                self.state = ShutdownState::ShutdownIssued { at: Instant::now() };
            }
            ShutdownState::Halted => return Ok(Step::Done),
            _ => {}
        }
        Ok(Step::Continue)
    }

    fn halted(&self) -> bool {
        self.state == ShutdownState::Halted
    }

    fn on_idle(&mut self, ctx: &mut ProgramContext<'_>) -> Result<Step, ProgramError> {
        self.touch_idle_switch(false);
        if self.idle_switch.as_ref().is_some_and(IdleSwitch::fired) {
            info!(
                "no output for {:?} and no prompt recognized, entering '{}'",
                self.idle_fallback.unwrap_or_default(),
                self.command
            );
            self.issue(ctx)?;
        }
        Ok(Step::Continue)
    }

    fn on_end_of_stream(&mut self) -> Step {
        match self.state {
            ShutdownState::ShutdownIssued { .. } | ShutdownState::Halted => {
                self.transition(ShutdownState::Halted);
                Step::Done
            }
            ShutdownState::AwaitingReadiness => Step::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::testing::Harness;

    #[test]
    fn test_shutdown_on_ready_prompt() {
        let mut harness = Harness::new();
        let mut shutdown = ShutdownProgram::new();
        harness.feed(&mut shutdown, "[  OK  ] Started Getty on tty1.").unwrap();
        assert_eq!(harness.written(), "");
        harness.feed(&mut shutdown, "pi@raspberrypi:~$ ").unwrap();
        assert_eq!(harness.written(), "sudo shutdown -h now\n");
        assert!(!shutdown.halted());

        assert_eq!(shutdown.on_end_of_stream(), Step::Done);
        assert!(shutdown.halted());
    }

    #[test]
    fn test_end_of_stream_before_command_is_not_success() {
        let mut shutdown = ShutdownProgram::new();
        assert_eq!(shutdown.on_end_of_stream(), Step::Continue);
        assert!(!shutdown.halted());
    }

    #[test]
    fn test_command_reissued_when_prompt_returns() {
        let mut harness = Harness::new();
        let mut shutdown = ShutdownProgram::new().reissue_after(Duration::ZERO);
        harness.feed(&mut shutdown, "pi@raspberrypi:~$ ").unwrap();
        harness.feed(&mut shutdown, "pi@raspberrypi:~$ ").unwrap();
        assert_eq!(harness.written(), "sudo shutdown -h now\nsudo shutdown -h now\n");
    }

    #[test]
    fn test_command_not_reissued_too_early() {
        let mut harness = Harness::new();
        let mut shutdown = ShutdownProgram::new().command("poweroff");
        harness.feed(&mut shutdown, "root@host:~# ").unwrap();
        harness.feed(&mut shutdown, "root@host:~# ").unwrap();
        assert_eq!(harness.written(), "poweroff\n");
    }

    #[test]
    fn test_fallback_pattern_counts_as_ready() {
        let mut harness = Harness::new();
        let fallback = Regex::new(r"^/ #$").unwrap();
        let mut shutdown = ShutdownProgram::new()
            .command("poweroff -f")
            .fallback_pattern(Some(fallback));
        harness.feed(&mut shutdown, "/ # ").unwrap();
        assert_eq!(harness.written(), "poweroff -f\n");
        assert!(matches!(
            shutdown.shutdown_state(),
            ShutdownState::ShutdownIssued { .. }
        ));
    }

    #[test]
    fn test_idle_console_gets_command() {
        let mut harness = Harness::new();
        let mut shutdown = ShutdownProgram::new()
            .command("poweroff -f")
            .idle_fallback(Some(Duration::from_millis(200)));
        harness.feed(&mut shutdown, "/ # ").unwrap();

        std::thread::sleep(Duration::from_millis(100));
        harness.feed(&mut shutdown, "/ # ").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        harness.idle(&mut shutdown).unwrap();
        assert_eq!(harness.written(), "");

        std::thread::sleep(Duration::from_millis(250));
        harness.idle(&mut shutdown).unwrap();
        assert_eq!(harness.written(), "poweroff -f\n");
        assert!(matches!(
            shutdown.shutdown_state(),
            ShutdownState::ShutdownIssued { .. }
        ));

        // Issued once; the switch is gone.
        std::thread::sleep(Duration::from_millis(250));
        harness.idle(&mut shutdown).unwrap();
        assert_eq!(harness.written(), "poweroff -f\n");
    }

    #[test]
    fn test_idle_without_fallback_does_nothing() {
        let mut harness = Harness::new();
        let mut shutdown = ShutdownProgram::new();
        harness.feed(&mut shutdown, "/ # ").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        harness.idle(&mut shutdown).unwrap();
        assert_eq!(harness.written(), "");
        assert_eq!(shutdown.shutdown_state(), ShutdownState::AwaitingReadiness);
    }
}
