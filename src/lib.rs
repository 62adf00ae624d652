//! Console automation for booting machines.
//!
//! Turns the raw, ANSI-formatted output of a booting machine's serial console
//! (QEMU, an emulator in a container, any child process) into line events,
//! recognizes prompts in them, and drives login, scripts and shutdown against
//! the console with stall detection:
//! - `io` - bytes to lines, with deadlines
//! - `ansi` - measuring, stripping and slicing formatted text
//! - `prompt` - what a line means (login prompt, shell prompt, dead end)
//! - `program` - state machines answering prompts
//! - `boot` - the loop tying it together and deciding the outcome
//!
//! ```no_run
//! use boot_console::{boot, LoginProgram, Transport, DEFAULT_DEAD_END_PATTERNS};
//! use std::process::Command;
//! use std::time::Duration;
//!
//! let (mut child, transport) = Transport::spawn(Command::new("./start-vm.sh"))?;
//! let mut login = LoginProgram::new("pi", "raspberry");
//! let outcome = boot::run(transport, &mut login, DEFAULT_DEAD_END_PATTERNS, Duration::from_secs(300));
//! println!("{}", outcome);
//! child.kill()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod ansi;
pub mod boot;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod program;
pub mod prompt;
pub mod watchdog;

// Re-export commonly used items
pub use boot::{BootOrchestrator, BootStage, TerminalOutcome};
pub use config::BootConfig;
pub use error::{AckError, ConfigError, ProgramError, SessionFailure};
pub use io::{BoundedReader, Channel, IoEvent, Transport};
pub use program::{LoginProgram, Program, ProgramContext, ScriptProgram, ShutdownProgram, Step};
pub use prompt::patterns::DEFAULT_DEAD_END_PATTERNS;
pub use prompt::{LineClass, PromptClassifier};
pub use watchdog::{Watchdog, WatchdogStatus};
