//! The byte pipes connecting the engine to a console.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};

/// Console output to read from and console input to write to.
///
/// Usually the stdout/stdin of a child process (QEMU, a container running an
/// emulator, ...), but any pair of streams works.
pub struct Transport {
    pub output: Box<dyn Read + Send>,
    pub input: Box<dyn Write + Send>,
}

impl Transport {
    pub fn new(output: impl Read + Send + 'static, input: impl Write + Send + 'static) -> Self {
        Self {
            output: Box::new(output),
            input: Box::new(input),
        }
    }

    /// Take the piped stdout and stdin of a spawned process.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let input = child.stdin.take().context("Failed to get child stdin")?;
        let output = child.stdout.take().context("Failed to get child stdout")?;
        Ok(Self::new(output, input))
    }

    /// Spawn `command` with stdin and stdout piped and stderr inherited.
    ///
    /// The caller keeps the [`Child`] and is responsible for killing and
    /// reaping it.
    pub fn spawn(mut command: Command) -> Result<(Child, Self)> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("Failed to spawn {:?}", command.get_program()))?;
        let transport = Self::from_child(&mut child)?;
        Ok((child, transport))
    }
}
