//! SGR (Select Graphic Rendition) bookkeeping.
//!
//! Every styling code we know how to undo maps to exactly one canonical close
//! code. [`OpenCodeSet`] tracks which codes are active at a given text offset
//! so that a fragment can be re-opened and closed in isolation.

/// SGR code that cancels every open style.
pub const RESET: u16 = 0;

const EXTENDED_FOREGROUND: u16 = 38;
const EXTENDED_BACKGROUND: u16 = 48;
const DEFAULT_FOREGROUND: u16 = 39;
const DEFAULT_BACKGROUND: u16 = 49;

/// Canonical close code for an opening SGR code, or `None` if the code is not
/// an opening code we track.
pub const fn close_code_for(code: u16) -> Option<u16> {
    match code {
        1 | 2 => Some(22),
        3 => Some(23),
        4 | 21 => Some(24),
        5 | 6 => Some(25),
        7 => Some(27),
        8 => Some(28),
        9 => Some(29),
        30..=38 | 90..=97 => Some(DEFAULT_FOREGROUND),
        40..=48 | 100..=107 => Some(DEFAULT_BACKGROUND),
        53 => Some(55),
        _ => None,
    }
}

/// Whether `code` closes (part of) the open styles.
pub const fn is_close_code(code: u16) -> bool {
    matches!(code, RESET | 22..=25 | 27..=29 | 39 | 49 | 55)
}

/// A single open style: the parameters that opened it plus its close code.
///
/// Extended colours keep all their parameters, e.g. `[38, 5, 196]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenCode {
    pub params: Vec<u16>,
    pub close: u16,
}

/// Ordered list of SGR codes open at some text offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenCodeSet {
    codes: Vec<OpenCode>,
}

impl OpenCodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpenCode> {
        self.codes.iter()
    }

    /// Apply the parameters of one SGR sequence (`ESC [ params m`).
    pub fn apply(&mut self, params: &[u16]) {
        let mut i = 0;
        while i < params.len() {
            let code = params[i];
            if code == RESET {
                self.codes.clear();
                i += 1;
            } else if is_close_code(code) {
                self.codes.retain(|open| open.close != code);
                i += 1;
            } else if let Some(close) = close_code_for(code) {
                let width = if code == EXTENDED_FOREGROUND || code == EXTENDED_BACKGROUND {
                    extended_colour_width(&params[i..])
                } else {
                    1
                };
                let opened = OpenCode {
                    params: params[i..i + width].to_vec(),
                    close,
                };
                if close == DEFAULT_FOREGROUND || close == DEFAULT_BACKGROUND {
                    // A colour replaces the previous colour of the same kind.
                    self.codes.retain(|open| open.close != close);
                } else {
                    self.codes.retain(|open| open.params != opened.params);
                }
                self.codes.push(opened);
                i += width;
            } else {
                i += 1;
            }
        }
    }

    /// Sequence that re-opens every tracked code, or `""` if none are open.
    pub fn open_sequence(&self) -> String {
        if self.codes.is_empty() {
            return String::new();
        }
        let params: Vec<String> = self
            .codes
            .iter()
            .flat_map(|open| open.params.iter().map(u16::to_string))
            .collect();
        format!("\x1b[{}m", params.join(";"))
    }

    /// Sequence that closes every tracked code, most recently opened first.
    pub fn close_sequence(&self) -> String {
        let mut closes: Vec<u16> = Vec::new();
        for open in self.codes.iter().rev() {
            if !closes.contains(&open.close) {
                closes.push(open.close);
            }
        }
        if closes.is_empty() {
            return String::new();
        }
        let params: Vec<String> = closes.iter().map(u16::to_string).collect();
        format!("\x1b[{}m", params.join(";"))
    }
}

/// Number of parameters consumed by `38;5;n` / `38;2;r;g;b` (and the 48 forms).
/// Truncated forms consume whatever is left.
fn extended_colour_width(params: &[u16]) -> usize {
    let wanted = match params.get(1) {
        Some(5) => 3,
        Some(2) => 5,
        _ => 1,
    };
    wanted.min(params.len())
}
