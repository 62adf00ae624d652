//! Driving programs against a booting machine's console.
//!
//! The orchestrator reads console output line by line, hands every new line
//! to the current program, and decides how the session ends:
//!
//! - a dead-end line (emergency mode, kernel panic) aborts immediately
//! - no new output for `timeout` is a stall
//! - the console output ending is a failure unless the program is fine with it
//! - all programs halting is success
//!
//! A poll that brings no new line gives the current program an idle tick
//! ([`Program::on_idle`]).
//!
//! STALL DETECTION: the timeout is an inactivity timeout, not an overall one.
//! A boot may take as long as it needs while it keeps producing output.

pub mod outcome;
pub mod stage;

pub use outcome::TerminalOutcome;
pub use stage::BootStage;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ansi;
use crate::error::SessionFailure;
use crate::io::{BoundedReader, EmptyLinePolicy, IoEvent, LineEvent, ReaderOptions, Transport};
use crate::program::{Program, ProgramContext, Step, DEFAULT_LINE_TERMINATOR};
use crate::prompt::PromptClassifier;
use crate::watchdog::Watchdog;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lines of console output kept for failure diagnostics.
const TAIL_LINES: usize = 30;

/// Runs programs against a console until they halt or the boot fails.
#[derive(Debug, Clone)]
pub struct BootOrchestrator {
    classifier: PromptClassifier,
    timeout: Duration,
    poll_interval: Duration,
    empty_lines: EmptyLinePolicy,
    line_terminator: String,
}

impl BootOrchestrator {
    /// Orchestrator with the default prompt patterns, aborting on any of
    /// `dead_end_patterns` and failing after `timeout` without new output.
    pub fn new<I, S>(dead_end_patterns: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            classifier: PromptClassifier::new(dead_end_patterns),
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            empty_lines: EmptyLinePolicy::default(),
            line_terminator: DEFAULT_LINE_TERMINATOR.to_string(),
        }
    }

    /// How long a single read waits before the loop checks the watchdog again.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn empty_lines(mut self, policy: EmptyLinePolicy) -> Self {
        self.empty_lines = policy;
        self
    }

    /// Replace the classifier, including its dead-end patterns.
    pub fn classifier(mut self, classifier: PromptClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one program to completion.
    pub fn run(&self, transport: Transport, program: &mut dyn Program) -> TerminalOutcome {
        self.run_sequence(transport, &mut [program])
    }

    /// Run programs one after another on the same console.
    ///
    /// The line that halts a program is also handed to the next one, so a
    /// shell prompt ending a login starts the following script right away.
    /// The caller keeps ownership of whatever process backs `transport`.
    pub fn run_sequence(
        &self,
        transport: Transport,
        programs: &mut [&mut dyn Program],
    ) -> TerminalOutcome {
        let Transport { output, mut input } = transport;

        let options = ReaderOptions {
            empty_lines: self.empty_lines,
            ..ReaderOptions::default()
        };
        let mut reader = match BoundedReader::spawn(output, options) {
            Ok(reader) => reader,
            Err(e) => {
                return TerminalOutcome::Failed(SessionFailure::Transport {
                    reason: format!("{:#}", e),
                })
            }
        };

        let fired = Arc::new(AtomicBool::new(false));
        let watchdog_fired = Arc::clone(&fired);
        let mut watchdog = Watchdog::start(self.timeout, false, move || {
            watchdog_fired.store(true, Ordering::Release);
        });

        let mut session = Session::default();
        let outcome = {
            let mut ctx = ProgramContext::new(&mut *input, &self.classifier)
                .with_terminator(self.line_terminator.clone());
            self.drive(&mut reader, &watchdog, &fired, &mut ctx, programs, &mut session)
        };

        watchdog.stop();
        reader.stop();

        match &outcome {
            TerminalOutcome::Succeeded => info!("boot session succeeded"),
            other => {
                warn!("boot session ended: {}", other);
                warn!(
                    "last {} lines of console output:\n{}",
                    session.tail.len(),
                    session.context()
                );
            }
        }
        outcome
    }

    fn drive(
        &self,
        reader: &mut BoundedReader,
        watchdog: &Watchdog,
        fired: &AtomicBool,
        ctx: &mut ProgramContext<'_>,
        programs: &mut [&mut dyn Program],
        session: &mut Session,
    ) -> TerminalOutcome {
        let mut current = skip_halted(programs, 0);

        loop {
            if current == programs.len() {
                return TerminalOutcome::Succeeded;
            }

            if fired.load(Ordering::Acquire) {
                warn!(
                    "no console output for {:?}, {}",
                    self.timeout,
                    session.stage.description()
                );
                return TerminalOutcome::Failed(SessionFailure::WatchdogTimeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    stage: session.stage,
                    last_line: session.last_line.clone(),
                });
            }

            let line = match reader.read_line(self.poll_interval) {
                LineEvent::Complete(line) => {
                    // Already delivered while it was still a partial line,
                    // possibly without a trailing escape sequence.
                    let repeat = session
                        .last_partial
                        .as_deref()
                        .is_some_and(|last| last == line || ansi::strip(last) == ansi::strip(&line));
                    session.last_partial = None;
                    (!repeat).then_some(line)
                }
                LineEvent::Partial(partial) => {
                    let unchanged = session
                        .last_partial
                        .as_ref()
                        .is_some_and(|last| Arc::ptr_eq(last, &partial) || **last == *partial);
                    if partial.is_empty() || unchanged {
                        None
                    } else {
                        session.last_partial = Some(Arc::clone(&partial));
                        Some(partial.to_string())
                    }
                }
                LineEvent::TimedOut => None,
                LineEvent::Ended => return self.end_of_stream(programs, current, session),
            };

            // Nothing new: an idle tick for the current program.
            let Some(line) = line else {
                let program = &mut *programs[current];
                let step = program.on_idle(ctx);
                for entered in ctx.take_entered() {
                    session.record(&entered);
                }
                match step {
                    Ok(Step::Continue) if !program.halted() => {}
                    Ok(_) => {
                        info!(program = program.name(), "halted while idle: {}", program.state());
                        current = skip_halted(programs, current + 1);
                    }
                    Err(e) => {
                        return TerminalOutcome::Failed(SessionFailure::Program {
                            program: program.name().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                continue;
            };

            watchdog.reset();
            let event = IoEvent::output(line);
            session.record(&event);

            if let Some(pattern) = self.classifier.dead_end_match(&event.plain) {
                warn!("dead end detected ({}): {}", pattern, event.plain);
                return TerminalOutcome::StuckAborted {
                    last_line: event.plain,
                };
            }

            // The halting line also goes to the next program.
            while current < programs.len() {
                let program = &mut *programs[current];
                let step = program.compute(ctx, &event);
                for entered in ctx.take_entered() {
                    session.record(&entered);
                }
                match step {
                    Ok(Step::Done) => {}
                    Ok(Step::Continue) if program.halted() => {}
                    Ok(Step::Continue) => break,
                    Err(e) => {
                        return TerminalOutcome::Failed(SessionFailure::Program {
                            program: program.name().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                info!(program = program.name(), "halted: {}", program.state());
                current = skip_halted(programs, current + 1);
                if let Some(next) = programs.get(current) {
                    info!(program = next.name(), "starting: {}", next.state());
                }
            }
        }
    }

    /// Console output ended: success only if every remaining program
    /// accepts that.
    fn end_of_stream(
        &self,
        programs: &mut [&mut dyn Program],
        current: usize,
        session: &Session,
    ) -> TerminalOutcome {
        for program in programs[current..].iter_mut() {
            if program.halted() || program.on_end_of_stream() == Step::Done {
                info!(program = program.name(), "halted at end of console output");
                continue;
            }
            warn!(
                program = program.name(),
                "console output ended while {}",
                program.state()
            );
            return TerminalOutcome::Failed(SessionFailure::TransportExhausted {
                program: program.name().to_string(),
                last_line: session.last_line.clone(),
            });
        }
        TerminalOutcome::Succeeded
    }
}

/// Run `program` on `transport` with default settings.
pub fn run<I, S>(
    transport: Transport,
    program: &mut dyn Program,
    dead_end_patterns: I,
    timeout: Duration,
) -> TerminalOutcome
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    BootOrchestrator::new(dead_end_patterns, timeout).run(transport, program)
}

fn skip_halted(programs: &[&mut dyn Program], mut index: usize) -> usize {
    while index < programs.len() && programs[index].halted() {
        debug!(program = programs[index].name(), "already halted, skipping");
        index += 1;
    }
    index
}

/// What the loop remembers about the console output so far.
#[derive(Default)]
struct Session {
    tail: VecDeque<String>,
    last_line: Option<String>,
    last_partial: Option<Arc<str>>,
    stage: BootStage,
}

impl Session {
    fn record(&mut self, event: &IoEvent) {
        if event.channel == crate::io::Channel::Output {
            self.stage.advance(&event.plain);
            self.last_line = Some(event.plain.clone());
        }
        if self.tail.len() == TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(event.to_string());
    }

    fn context(&self) -> String {
        self.tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_session_keeps_bounded_tail() {
        let mut session = Session::default();
        for i in 0..40 {
            session.record(&IoEvent::output(format!("line {}", i)));
        }
        assert_eq!(session.tail.len(), TAIL_LINES);
        assert_eq!(session.tail.front().map(String::as_str), Some("[out] line 10"));
        assert_eq!(session.last_line.as_deref(), Some("line 39"));
    }

    #[test]
    fn test_session_tracks_stage() {
        let mut session = Session::default();
        session.record(&IoEvent::output("[    0.000000] Booting Linux on physical CPU 0x0"));
        session.record(&IoEvent::input("Kernel panic"));
        assert_eq!(session.stage, BootStage::Kernel);
        assert_eq!(session.last_line.as_deref(), Some("[    0.000000] Booting Linux on physical CPU 0x0"));
    }

    #[test]
    fn test_no_programs_is_immediate_success() {
        let transport = Transport::new(Cursor::new(Vec::new()), Vec::new());
        let orchestrator = BootOrchestrator::new(["Kernel panic"], Duration::from_secs(5));
        assert_eq!(
            orchestrator.run_sequence(transport, &mut []),
            TerminalOutcome::Succeeded
        );
    }
}
