//! boot-console - drive a booting machine's serial console.
//!
//! Spawns a command whose stdin/stdout is a serial console (a QEMU
//! invocation, a container running an emulator, ...), logs in, runs the
//! configured script and optionally shuts the machine down.
//!
//! Usage:
//!   boot-console run --config pi.toml -- ./start-vm.sh disk.img
//!   boot-console run --shutdown --json -- docker run -i lukechilds/dockerpi:vm
//!   boot-console classify console.log
//!   boot-console -vv run -- qemu-system-aarch64 ...

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::Command;
use tracing::info;

use boot_console::{
    logging, BootConfig, LineClass, Program, PromptClassifier, TerminalOutcome, Transport,
};

#[derive(Parser)]
#[command(name = "boot-console")]
#[command(about = "Log in to, script and shut down a machine over its serial console")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn a console command and drive it: login, script, shutdown
    Run {
        /// TOML config (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Shut the machine down after the script
        #[arg(long)]
        shutdown: bool,

        /// Print the outcome as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Command whose stdin/stdout is the console
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Classify console lines (stdin when no file is given)
    Classify {
        /// TOML config with pattern overrides
        #[arg(long)]
        config: Option<PathBuf>,

        file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            shutdown,
            json,
            command,
        } => {
            let config = load_config(config)?;
            let outcome = run(&config, shutdown, &command)?;
            print_outcome(&outcome, json)?;
            std::process::exit(if outcome.is_success() { 0 } else { 1 });
        }
        Commands::Classify { config, file } => {
            let config = load_config(config)?;
            classify(&config.classifier()?, file)
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<BootConfig> {
    match path {
        Some(path) => BootConfig::load(&path),
        None => Ok(BootConfig::default()),
    }
}

fn run(config: &BootConfig, shutdown: bool, command: &[String]) -> Result<TerminalOutcome> {
    let Some((program, args)) = command.split_first() else {
        bail!("No console command given");
    };
    let orchestrator = config.orchestrator()?;

    let mut login = config.login_program();
    let mut scripts = config.script_programs();
    let mut shutdown_program = if shutdown {
        Some(config.shutdown_program()?)
    } else {
        None
    };

    let mut programs: Vec<&mut dyn Program> = vec![&mut login];
    for script in scripts.iter_mut() {
        programs.push(script);
    }
    if let Some(shutdown_program) = shutdown_program.as_mut() {
        programs.push(shutdown_program);
    }

    let mut cmd = Command::new(program);
    cmd.args(args);
    let (mut child, transport) = Transport::spawn(cmd)
        .with_context(|| format!("Failed to start console command '{}'", command.join(" ")))?;
    info!(pid = child.id(), "console command started");

    let outcome = orchestrator.run_sequence(transport, &mut programs);

    // The console command may still be running (no shutdown, or a failure).
    match child.try_wait() {
        Ok(Some(status)) => info!("console command exited: {}", status),
        _ => {
            info!("killing console command");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
    Ok(outcome)
}

fn print_outcome(outcome: &TerminalOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    match outcome {
        TerminalOutcome::Succeeded => {
            println!("{} {}", "✓".green().bold(), "Session succeeded".green())
        }
        TerminalOutcome::StuckAborted { last_line } => {
            println!("{} Boot reached a dead end", "STUCK".red().bold());
            println!("    {}", last_line.trim());
        }
        TerminalOutcome::Failed(failure) => {
            println!("{} {}", "FAIL".red().bold(), failure);
        }
    }
    Ok(())
}

fn classify(classifier: &PromptClassifier, file: Option<PathBuf>) -> Result<()> {
    let reader: Box<dyn BufRead> = match &file {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("Opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    for line in reader.lines() {
        let line = line.context("Failed to read input")?;
        let class = classifier.classify(&line);
        let label = format!("{:>8}", class.to_string());
        let label = match class {
            LineClass::Login | LineClass::Ready => label.green(),
            LineClass::DeadEnd => label.red().bold(),
            LineClass::Unclassified => label.dimmed(),
        };
        println!("{} {}", label, boot_console::ansi::strip(&line));
    }
    Ok(())
}
