//! Session configuration.
//!
//! Loaded from a TOML file; every field has a default, so an empty file is a
//! valid configuration:
//!
//! ```toml
//! timeout_secs = 300
//! empty_lines = "suppress"
//! script = ["sudo systemctl enable ssh"]
//!
//! [credentials]
//! username = "pi"
//! password = "raspberry"
//!
//! [shutdown]
//! command = "sudo shutdown -h now"
//! idle_fallback_secs = 5
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::boot::BootOrchestrator;
use crate::error::ConfigError;
use crate::io::EmptyLinePolicy;
use crate::program::{
    shutdown::{DEFAULT_REISSUE_AFTER, DEFAULT_SHUTDOWN_COMMAND},
    LoginProgram, ScriptProgram, ShutdownProgram, DEFAULT_LINE_TERMINATOR,
};
use crate::prompt::patterns::DEFAULT_DEAD_END_PATTERNS;
use crate::prompt::{PromptClassifier, PromptPatterns};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    /// Seconds without new console output before the boot counts as stalled.
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub empty_lines: EmptyLinePolicy,
    /// Appended to everything entered on the console.
    pub line_terminator: String,
    pub credentials: Credentials,
    /// Case-insensitive phrases that abort the session.
    pub dead_end_patterns: Vec<String>,
    pub patterns: PatternOverrides,
    pub shutdown: ShutdownConfig,
    /// Commands run after login, one per ready prompt.
    pub script: Vec<String>,
    /// Labelled command blocks (`:label` lines), run after `script`.
    pub setup_script: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Regexes replacing the built-in prompt patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternOverrides {
    pub login: Option<String>,
    pub ready: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub command: String,
    /// Regex treated as a ready prompt when the shell prompt is unusual.
    pub fallback_pattern: Option<String>,
    /// Enter the command after this many quiet seconds without a prompt.
    pub idle_fallback_secs: Option<u64>,
    pub reissue_after_secs: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_ms: 250,
            empty_lines: EmptyLinePolicy::Suppress,
            line_terminator: DEFAULT_LINE_TERMINATOR.to_string(),
            credentials: Credentials::default(),
            dead_end_patterns: DEFAULT_DEAD_END_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            patterns: PatternOverrides::default(),
            shutdown: ShutdownConfig::default(),
            script: Vec::new(),
            setup_script: None,
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "pi".to_string(),
            password: "raspberry".to_string(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SHUTDOWN_COMMAND.to_string(),
            fallback_pattern: None,
            idle_fallback_secs: None,
            reissue_after_secs: DEFAULT_REISSUE_AFTER.as_secs(),
        }
    }
}

impl BootConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Invalid config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "timeout_secs",
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "poll_interval_ms",
            });
        }
        if self.shutdown.idle_fallback_secs == Some(0) {
            return Err(ConfigError::ZeroDuration {
                field: "shutdown.idle_fallback_secs",
            });
        }
        self.classifier()?;
        self.fallback_regex()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn prompt_patterns(&self) -> PromptPatterns {
        let defaults = PromptPatterns::default();
        PromptPatterns {
            login: self.patterns.login.clone().unwrap_or(defaults.login),
            ready: self.patterns.ready.clone().unwrap_or(defaults.ready),
            password: self.patterns.password.clone().unwrap_or(defaults.password),
            dead_ends: self.dead_end_patterns.clone(),
        }
    }

    pub fn classifier(&self) -> Result<PromptClassifier, ConfigError> {
        PromptClassifier::from_patterns(&self.prompt_patterns())
    }

    pub fn orchestrator(&self) -> Result<BootOrchestrator, ConfigError> {
        Ok(BootOrchestrator::new(&self.dead_end_patterns, self.timeout())
            .classifier(self.classifier()?)
            .poll_interval(self.poll_interval())
            .empty_lines(self.empty_lines)
            .line_terminator(self.line_terminator.clone()))
    }

    pub fn login_program(&self) -> LoginProgram {
        LoginProgram::new(&self.credentials.username, &self.credentials.password)
    }

    /// `script` first (if any), then one program per setup script block.
    pub fn script_programs(&self) -> Vec<ScriptProgram> {
        let mut programs = Vec::new();
        if !self.script.is_empty() {
            programs.push(ScriptProgram::new("script", self.script.iter().cloned()));
        }
        if let Some(setup) = &self.setup_script {
            programs.extend(ScriptProgram::from_setup_script("setup", setup));
        }
        programs
    }

    pub fn shutdown_program(&self) -> Result<ShutdownProgram, ConfigError> {
        Ok(ShutdownProgram::new()
            .command(&self.shutdown.command)
            .reissue_after(Duration::from_secs(self.shutdown.reissue_after_secs))
            .fallback_pattern(self.fallback_regex()?)
            .idle_fallback(self.shutdown.idle_fallback_secs.map(Duration::from_secs)))
    }

    fn fallback_regex(&self) -> Result<Option<Regex>, ConfigError> {
        self.shutdown
            .fallback_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    name: "shutdown fallback",
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()
    }
}
