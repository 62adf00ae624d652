//! Running shell commands one after another.
//!
//! Each command is entered at a ready prompt and counts as finished when the
//! next ready prompt appears.

use super::{log_transition, Program, ProgramContext, Step};
use crate::error::ProgramError;
use crate::io::IoEvent;
use crate::prompt::LineClass;

/// Printed by the shell when a command does not exist.
const COMMAND_NOT_FOUND: &str = ": command not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Waiting for the prompt to enter command `n`.
    AwaitingPrompt(usize),
    /// Command `n` entered, waiting for it to finish.
    Running(usize),
    Finished,
}

pub struct ScriptProgram {
    name: String,
    commands: Vec<String>,
    state: ScriptState,
}

impl ScriptProgram {
    pub fn new<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands: Vec<String> = commands
            .into_iter()
            .map(Into::into)
            .filter(|c: &String| !c.trim().is_empty())
            .collect();
        let state = if commands.is_empty() {
            ScriptState::Finished
        } else {
            ScriptState::AwaitingPrompt(0)
        };
        Self {
            name: name.into(),
            commands,
            state,
        }
    }

    /// Split a labelled setup script into one program per block.
    ///
    /// A line starting with `:` starts a block and names it; the following
    /// non-empty lines are its commands. Commands before the first label form
    /// a block named after `name` and its first command.
    ///
    /// ```text
    /// :enable ssh
    /// sudo systemctl enable ssh
    /// :hostname
    /// sudo hostnamectl set-hostname pi-lab
    /// ```
    pub fn from_setup_script(name: &str, script: &str) -> Vec<Self> {
        let mut blocks: Vec<(Option<String>, Vec<String>)> = Vec::new();
        for line in script.lines().map(str::trim) {
            if let Some(label) = line.strip_prefix(':') {
                blocks.push((Some(label.trim().to_string()), Vec::new()));
            } else if !line.is_empty() {
                match blocks.last_mut() {
                    Some((_, commands)) => commands.push(line.to_string()),
                    None => blocks.push((None, vec![line.to_string()])),
                }
            }
        }

        blocks
            .into_iter()
            .filter(|(_, commands)| !commands.is_empty())
            .map(|(label, commands)| {
                let label = label
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| format!("{} - {}", name, commands[0]));
                Self::new(label, commands)
            })
            .collect()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn script_state(&self) -> ScriptState {
        self.state
    }
}

impl Program for ScriptProgram {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> String {
        let total = self.commands.len();
        match self.state {
            ScriptState::AwaitingPrompt(n) => format!("{}/{}: waiting for prompt", n + 1, total),
            ScriptState::Running(n) => format!("{}/{}: {}", n + 1, total, self.commands[n]),
            ScriptState::Finished => "finished".to_string(),
        }
    }

    fn compute(
        &mut self,
        ctx: &mut ProgramContext<'_>,
        event: &IoEvent,
    ) -> Result<Step, ProgramError> {
        let ready = ctx.classifier().classify(&event.plain) == LineClass::Ready;

        let next = match self.state {
            ScriptState::Finished => return Ok(Step::Done),
            ScriptState::Running(n) if event.plain.contains(COMMAND_NOT_FOUND) => {
                return Err(ProgramError::CommandRejected {
                    command: self.commands[n].clone(),
                    line: event.plain.clone(),
                });
            }
            ScriptState::AwaitingPrompt(n) if ready => {
                ctx.enter(&self.commands[n])?;
                ScriptState::Running(n)
            }
            ScriptState::Running(n) if ready => {
                if n + 1 < self.commands.len() {
                    ctx.enter(&self.commands[n + 1])?;
                    ScriptState::Running(n + 1)
                } else {
                    ScriptState::Finished
                }
            }
            state => state,
        };

        log_transition(&self.name, self.state, next);
        self.state = next;
        Ok(if next == ScriptState::Finished {
            Step::Done
        } else {
            Step::Continue
        })
    }

    fn halted(&self) -> bool {
        self.state == ScriptState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::testing::Harness;
    use pretty_assertions::assert_eq;

    const PROMPT: &str = "pi@raspberrypi:~$ ";

    #[test]
    fn test_commands_run_in_order() {
        let mut harness = Harness::new();
        let mut script = ScriptProgram::new("setup", ["uname -a", "id"]);

        assert_eq!(harness.feed(&mut script, PROMPT).unwrap(), Step::Continue);
        assert_eq!(script.script_state(), ScriptState::Running(0));
        harness.feed(&mut script, "pi@raspberrypi:~$ uname -a").unwrap();
        harness.feed(&mut script, "Linux raspberrypi 6.1.21-v8+ aarch64 GNU/Linux").unwrap();
        assert_eq!(harness.feed(&mut script, PROMPT).unwrap(), Step::Continue);
        assert_eq!(script.state(), "2/2: id");
        assert_eq!(harness.feed(&mut script, PROMPT).unwrap(), Step::Done);

        assert!(script.halted());
        assert_eq!(harness.written(), "uname -a\nid\n");
    }

    #[test]
    fn test_empty_script_is_already_finished() {
        let script = ScriptProgram::new("nothing", Vec::<String>::new());
        assert!(script.halted());
    }

    #[test]
    fn test_unknown_command_fails() {
        let mut harness = Harness::new();
        let mut script = ScriptProgram::new("setup", ["frobnicate"]);
        harness.feed(&mut script, PROMPT).unwrap();
        let err = harness
            .feed(&mut script, "-bash: frobnicate: command not found")
            .unwrap_err();
        assert!(matches!(err, ProgramError::CommandRejected { ref command, .. } if command == "frobnicate"));
    }

    #[test]
    fn test_setup_script_blocks() {
        let scripts = ScriptProgram::from_setup_script(
            "provision",
            "echo before\n\
             :enable ssh\n\
             sudo systemctl enable ssh\n\
             sudo systemctl start ssh\n\
             :empty\n\
             :\n\
             sudo hostnamectl set-hostname pi-lab\n",
        );
        let summary: Vec<(String, Vec<String>)> = scripts
            .iter()
            .map(|s| (s.name().to_string(), s.commands().to_vec()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (
                    "provision - echo before".to_string(),
                    vec!["echo before".to_string()]
                ),
                (
                    "enable ssh".to_string(),
                    vec![
                        "sudo systemctl enable ssh".to_string(),
                        "sudo systemctl start ssh".to_string()
                    ]
                ),
                (
                    "provision - sudo hostnamectl set-hostname pi-lab".to_string(),
                    vec!["sudo hostnamectl set-hostname pi-lab".to_string()]
                ),
            ]
        );
    }
}
