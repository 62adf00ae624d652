//! Line classification.
//!
//! Decides whether a console line is a login prompt, a ready shell prompt, a
//! dead end (emergency mode, kernel panic, ...) or nothing of interest.
//! Every check runs on the ANSI-stripped line.

pub mod patterns;

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

use crate::ansi;
use crate::error::ConfigError;
use patterns::{
    DEFAULT_DEAD_END_PATTERNS, LOGIN_BANNER_PREFIX, LOGIN_PATTERN, LOGIN_REJECTED_PATTERNS,
    PASSWORD_PATTERN, READY_PATTERN,
};

static LOGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LOGIN_PATTERN).expect("Invalid login prompt regex"));
static READY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(READY_PATTERN).expect("Invalid ready prompt regex"));
static PASSWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PASSWORD_PATTERN).expect("Invalid password prompt regex"));

/// What a console line means to a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineClass {
    /// Getty is asking for a user name.
    Login,
    /// A shell is waiting for a command.
    Ready,
    /// The boot will not recover.
    DeadEnd,
    Unclassified,
}

impl fmt::Display for LineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Login => "login",
            Self::Ready => "ready",
            Self::DeadEnd => "dead-end",
            Self::Unclassified => "-",
        };
        f.write_str(name)
    }
}

/// Parts of a ready shell prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyPrompt {
    pub user: String,
    pub host: String,
    pub path: String,
    /// `#` for root shells, `$` otherwise.
    pub root: bool,
}

/// Regex sources and dead-end phrases a classifier is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPatterns {
    pub login: String,
    pub ready: String,
    pub password: String,
    pub dead_ends: Vec<String>,
}

impl Default for PromptPatterns {
    fn default() -> Self {
        Self {
            login: LOGIN_PATTERN.to_string(),
            ready: READY_PATTERN.to_string(),
            password: PASSWORD_PATTERN.to_string(),
            dead_ends: DEFAULT_DEAD_END_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptClassifier {
    login: Regex,
    ready: Regex,
    password: Regex,
    /// Lowercased, for case-insensitive matching.
    dead_ends: Vec<String>,
}

impl PromptClassifier {
    /// Default prompt patterns with the given dead-end phrases.
    pub fn new<I, S>(dead_end_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            login: LOGIN_RE.clone(),
            ready: READY_RE.clone(),
            password: PASSWORD_RE.clone(),
            dead_ends: lowercase_all(dead_end_patterns),
        }
    }

    /// Build from (possibly user-supplied) pattern sources.
    pub fn from_patterns(patterns: &PromptPatterns) -> Result<Self, ConfigError> {
        Ok(Self {
            login: compile("login", &patterns.login)?,
            ready: compile("ready", &patterns.ready)?,
            password: compile("password", &patterns.password)?,
            dead_ends: lowercase_all(&patterns.dead_ends),
        })
    }

    /// Classify one line (escape sequences allowed).
    ///
    /// Dead ends win over prompts, and a ready prompt wins over a login
    /// prompt.
    pub fn classify(&self, line: &str) -> LineClass {
        let plain = ansi::strip(line);
        if self.dead_end_match(&plain).is_some() {
            LineClass::DeadEnd
        } else if self.is_ready(&plain) {
            LineClass::Ready
        } else if self.is_login(&plain) {
            LineClass::Login
        } else {
            LineClass::Unclassified
        }
    }

    /// The dead-end phrase `line` contains, if any.
    pub fn dead_end_match(&self, line: &str) -> Option<&str> {
        let lower = ansi::strip(line).to_lowercase();
        self.dead_ends
            .iter()
            .find(|pattern| lower.contains(pattern.as_str()))
            .map(String::as_str)
    }

    fn is_ready(&self, plain: &str) -> bool {
        self.ready.is_match(plain.trim_start())
    }

    fn is_login(&self, plain: &str) -> bool {
        // "Last login: Tue Mar 12 ..." follows a successful login.
        let banner = plain
            .trim_start()
            .to_lowercase()
            .starts_with(LOGIN_BANNER_PREFIX);
        !banner && self.login.is_match(plain)
    }

    /// Split a ready prompt into its parts.
    ///
    /// Only meaningful with a ready pattern that has `user`, `host` and `path`
    /// groups (the default one does); missing groups come back empty.
    pub fn ready_prompt(&self, line: &str) -> Option<ReadyPrompt> {
        let plain = ansi::strip(line);
        let trimmed = plain.trim();
        let caps = self.ready.captures(trimmed)?;
        let group = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        Some(ReadyPrompt {
            user: group("user"),
            host: group("host"),
            path: group("path"),
            root: trimmed.ends_with('#'),
        })
    }

    pub fn is_password_prompt(&self, line: &str) -> bool {
        self.password.is_match(&ansi::strip(line))
    }

    pub fn is_login_rejected(&self, line: &str) -> bool {
        let lower = ansi::strip(line).to_lowercase();
        LOGIN_REJECTED_PATTERNS.iter().any(|p| lower.contains(p))
    }
}

impl Default for PromptClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_DEAD_END_PATTERNS)
    }
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        name,
        pattern: pattern.to_string(),
        source,
    })
}

fn lowercase_all<I, S>(patterns: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| p.as_ref().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}
