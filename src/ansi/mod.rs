//! ANSI escape code handling for console output.
//!
//! Serial console output contains escape sequences for colours, cursor
//! movement, window titles, etc. This module tokenizes such text so it can be
//! measured, stripped for pattern matching, sliced, and split into lines
//! without corrupting the formatting.
//!
//! All functions are pure. Sequences the scanner cannot make sense of are
//! kept as opaque zero-width tokens; nothing here ever fails.

pub mod codes;

pub use codes::{OpenCode, OpenCodeSet};

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// One piece of formatted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    /// Visible characters.
    Text(&'a str),
    /// A styling sequence (`ESC [ params m`) with its parsed parameters.
    Sgr { raw: &'a str, params: Vec<u16> },
    /// Any other zero-width sequence: cursor movement, OSC, control
    /// characters, or a malformed escape passed through verbatim.
    Opaque(&'a str),
}

/// Result of scanning for the end of an escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// The sequence is complete and spans this many bytes.
    Complete(usize),
    /// The input ends before the sequence does.
    Incomplete,
    /// Not a sequence we recognize.
    Malformed,
}

/// Scan the escape sequence starting at `bytes[at]` (which must be ESC).
///
/// Handles:
/// - CSI sequences: `ESC [` params intermediates final-byte
/// - OSC sequences: `ESC ]` ... terminated by BEL or ST (`ESC \`)
/// - DCS/SOS/PM/APC strings: `ESC P`, `ESC X`, `ESC ^`, `ESC _` ... ST
/// - nF sequences like charset selection: `ESC (` B
/// - two-byte sequences: `ESC` followed by a single final character
pub(crate) fn scan_escape(bytes: &[u8], at: usize) -> Scan {
    let Some(&kind) = bytes.get(at + 1) else {
        return Scan::Incomplete;
    };
    match kind {
        b'[' => scan_csi(bytes, at),
        b']' => scan_string(bytes, at, true),
        b'P' | b'X' | b'^' | b'_' => scan_string(bytes, at, false),
        0x20..=0x2f => match bytes.get(at + 2) {
            None => Scan::Incomplete,
            Some(0x30..=0x7e) => Scan::Complete(3),
            Some(_) => Scan::Malformed,
        },
        0x30..=0x7e => Scan::Complete(2),
        _ => Scan::Malformed,
    }
}

fn scan_csi(bytes: &[u8], at: usize) -> Scan {
    let mut i = at + 2;
    while let Some(&b) = bytes.get(i) {
        match b {
            // parameter and intermediate bytes
            0x20..=0x3f => i += 1,
            // final byte
            0x40..=0x7e => return Scan::Complete(i + 1 - at),
            _ => return Scan::Malformed,
        }
    }
    Scan::Incomplete
}

fn scan_string(bytes: &[u8], at: usize, bel_terminates: bool) -> Scan {
    let mut i = at + 2;
    while let Some(&b) = bytes.get(i) {
        if b == BEL && bel_terminates {
            return Scan::Complete(i + 1 - at);
        }
        if b == ESC {
            return match bytes.get(i + 1) {
                None => Scan::Incomplete,
                Some(b'\\') => Scan::Complete(i + 2 - at),
                Some(_) => Scan::Malformed,
            };
        }
        i += 1;
    }
    Scan::Incomplete
}

/// BEL, NUL, SO and SI carry no visible content.
fn is_invisible_control(b: u8) -> bool {
    matches!(b, BEL | 0x00 | 0x0e | 0x0f)
}

/// Split `s` into text, styling and opaque tokens.
pub(crate) fn tokenize(s: &str) -> Vec<Token<'_>> {
    let bytes = s.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != ESC && !is_invisible_control(b) {
            i += 1;
            continue;
        }
        if text_start < i {
            tokens.push(Token::Text(&s[text_start..i]));
        }
        // All sequence boundaries fall on ASCII bytes, so slicing stays on
        // char boundaries.
        let len = if b == ESC {
            match scan_escape(bytes, i) {
                Scan::Complete(len) => len,
                Scan::Incomplete => bytes.len() - i,
                Scan::Malformed => 1,
            }
        } else {
            1
        };
        tokens.push(sequence_token(&s[i..i + len]));
        i += len;
        text_start = i;
    }
    if text_start < bytes.len() {
        tokens.push(Token::Text(&s[text_start..]));
    }
    tokens
}

fn sequence_token(raw: &str) -> Token<'_> {
    match sgr_params(raw) {
        Some(params) => Token::Sgr { raw, params },
        None => Token::Opaque(raw),
    }
}

/// Parameters of an SGR sequence, `None` for anything else.
fn sgr_params(raw: &str) -> Option<Vec<u16>> {
    let body = raw.strip_prefix("\x1b[")?.strip_suffix('m')?;
    if !body.bytes().all(|b| b.is_ascii_digit() || b == b';') {
        return None;
    }
    if body.is_empty() {
        return Some(vec![codes::RESET]);
    }
    body.split(';')
        .map(|p| if p.is_empty() { Some(0) } else { p.parse().ok() })
        .collect()
}

/// Byte offset of an escape sequence at the end of `s` that has not been
/// terminated yet.
pub(crate) fn incomplete_escape_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != ESC {
            i += 1;
            continue;
        }
        match scan_escape(bytes, i) {
            Scan::Complete(len) => i += len,
            Scan::Incomplete => return Some(i),
            Scan::Malformed => i += 1,
        }
    }
    None
}

/// Strip ANSI escape codes from a string.
///
/// Also removes BEL, NUL, SI and SO, malformed escapes, and a trailing
/// escape sequence that was never terminated.
pub fn strip(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for token in tokenize(s) {
        if let Token::Text(text) = token {
            result.push_str(text);
        }
    }
    result
}

/// Number of characters in `s`, not counting escape sequences.
pub fn visual_length(s: &str) -> usize {
    tokenize(s)
        .iter()
        .map(|token| match token {
            Token::Text(text) => text.chars().count(),
            _ => 0,
        })
        .sum()
}

/// Formatted fragment whose plain text is `strip(s)` restricted to the
/// character range `start..end`.
///
/// Styles active at `start` are re-opened at the beginning of the fragment and
/// styles still open at `end` are closed at its end, so the fragment renders
/// correctly on its own and consecutive fragments concatenate cleanly.
/// Offsets past the visual length are clamped.
pub fn slice(s: &str, start: usize, end: usize) -> String {
    let tokens = tokenize(s);
    let total: usize = tokens
        .iter()
        .map(|token| match token {
            Token::Text(text) => text.chars().count(),
            _ => 0,
        })
        .sum();
    let end = end.min(total);
    let start = start.min(end);
    if start == end {
        return String::new();
    }

    let mut open = OpenCodeSet::new();
    let mut out = String::with_capacity(s.len());
    let mut started = false;
    let mut pos = 0;

    for token in &tokens {
        if pos >= end {
            break;
        }
        match token {
            Token::Text(text) => {
                let len = text.chars().count();
                if pos + len <= start {
                    pos += len;
                    continue;
                }
                if !started {
                    out.push_str(&open.open_sequence());
                    started = true;
                }
                let from = start.saturating_sub(pos);
                let to = (end - pos).min(len);
                out.push_str(char_range(text, from, to));
                pos += len;
            }
            Token::Sgr { raw, params } => {
                if pos >= start {
                    if !started {
                        out.push_str(&open.open_sequence());
                        started = true;
                    }
                    out.push_str(raw);
                }
                open.apply(params);
            }
            Token::Opaque(raw) => {
                if pos >= start {
                    if !started {
                        out.push_str(&open.open_sequence());
                        started = true;
                    }
                    out.push_str(raw);
                }
            }
        }
    }
    out.push_str(&open.close_sequence());
    out
}

/// Split `s` into lines (on `\r\n`, `\n` or `\r`), each independently
/// well-formed: styles spanning a line break are closed at the end of the
/// line and re-opened on the next one.
///
/// Separators are not included. A trailing separator does not produce an
/// extra empty line.
pub fn split_lines(s: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut open = OpenCodeSet::new();
    let mut line = String::new();
    let mut touched = false;

    for token in tokenize(s) {
        match token {
            Token::Text(text) => {
                let mut rest = text;
                while let Some(idx) = rest.find(['\r', '\n']) {
                    line.push_str(&rest[..idx]);
                    line.push_str(&open.close_sequence());
                    lines.push(std::mem::replace(&mut line, open.open_sequence()));
                    let separator = if rest[idx..].starts_with("\r\n") { 2 } else { 1 };
                    rest = &rest[idx + separator..];
                    touched = false;
                }
                if !rest.is_empty() {
                    line.push_str(rest);
                    touched = true;
                }
            }
            Token::Sgr { raw, params } => {
                line.push_str(raw);
                open.apply(&params);
                touched = true;
            }
            Token::Opaque(raw) => {
                line.push_str(raw);
                touched = true;
            }
        }
    }
    if touched {
        line.push_str(&open.close_sequence());
        lines.push(line);
    }
    lines
}

fn char_range(text: &str, from: usize, to: usize) -> &str {
    let byte_at = |n: usize| {
        text.char_indices()
            .nth(n)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    };
    &text[byte_at(from)..byte_at(to)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RED_BOLD: &str = "plain \x1b[31mred \x1b[1mbold\x1b[22m red\x1b[39m plain";

    #[test]
    fn test_strip_removes_sequences_and_controls() {
        assert_eq!(strip("\x1b[1;32mOK\x1b[0m"), "OK");
        assert_eq!(strip("\x1b]0;title\x07prompt"), "prompt");
        assert_eq!(strip("\x1b]8;;http://x\x1b\\link"), "link");
        assert_eq!(strip("a\x07b\x00c\x0ed\x0fe"), "abcde");
        assert_eq!(strip("\x1b(Bcharset"), "charset");
        assert_eq!(strip("\x1b[?2004hroot@host:~# "), "root@host:~# ");
    }

    #[test]
    fn test_strip_drops_unterminated_tail() {
        assert_eq!(strip("text\x1b[3"), "text");
        assert_eq!(strip("text\x1b"), "text");
    }

    #[test]
    fn test_malformed_escape_is_passed_through_without_failing() {
        // ESC followed by a control character is not a sequence.
        let s = "a\x1b\x01b";
        assert_eq!(strip(s), "a\x01b");
        assert_eq!(visual_length(s), 3);
        assert_eq!(slice(s, 0, 3), s);
    }

    #[test]
    fn test_visual_length_of_plain_text_is_char_count() {
        for s in ["", "login:", "Grüße, 世界", "pi@raspberrypi:~$ "] {
            assert_eq!(visual_length(s), s.chars().count());
        }
    }

    #[test]
    fn test_visual_length_ignores_escapes() {
        assert_eq!(visual_length(RED_BOLD), strip(RED_BOLD).chars().count());
        assert_eq!(visual_length("\x1b[38;5;196mx\x1b[0m"), 1);
    }

    #[test]
    fn test_slice_closes_open_codes() {
        assert_eq!(slice("\x1b[31mred\x1b[0m", 0, 2), "\x1b[31mre\x1b[39m");
    }

    #[test]
    fn test_slice_reopens_codes_active_at_start() {
        assert_eq!(slice("\x1b[31mred\x1b[0m", 1, 3), "\x1b[31med\x1b[39m");
        assert_eq!(slice(RED_BOLD, 11, 13), "\x1b[31;1mol\x1b[22;39m");
    }

    #[test]
    fn test_slice_plain_text_matches_stripped_range() {
        let plain: Vec<char> = strip(RED_BOLD).chars().collect();
        let len = visual_length(RED_BOLD);
        for i in 0..=len {
            for j in i..=len {
                let expected: String = plain[i..j].iter().collect();
                assert_eq!(strip(&slice(RED_BOLD, i, j)), expected, "{}..{}", i, j);
            }
        }
    }

    #[test]
    fn test_slice_never_bleeds_formatting() {
        let len = visual_length(RED_BOLD);
        for i in 0..=len {
            let fragment = slice(RED_BOLD, 0, i);
            let mut open = OpenCodeSet::new();
            for token in tokenize(&fragment) {
                if let Token::Sgr { params, .. } = token {
                    open.apply(&params);
                }
            }
            assert!(open.is_empty(), "bleed after {}: {:?}", i, fragment);
        }
    }

    #[test]
    fn test_consecutive_slices_concatenate_to_same_plain_text() {
        let len = visual_length(RED_BOLD);
        for i in 0..=len {
            let joined = slice(RED_BOLD, 0, i) + &slice(RED_BOLD, i, len);
            assert_eq!(strip(&joined), strip(RED_BOLD));
        }
    }

    #[test]
    fn test_slice_clamps_out_of_range() {
        assert_eq!(slice("abc", 1, 99), "bc");
        assert_eq!(slice("abc", 5, 9), "");
        assert_eq!(slice("abc", 2, 1), "");
    }

    #[test]
    fn test_slice_handles_multibyte_text() {
        assert_eq!(slice("\x1b[1mgrüße\x1b[0m", 2, 4), "\x1b[1müß\x1b[22m");
    }

    #[test]
    fn test_split_lines_carries_style_across_breaks() {
        let lines = split_lines("\x1b[32mgreen\nstill green\x1b[0m\nplain");
        assert_eq!(
            lines,
            vec![
                "\x1b[32mgreen\x1b[39m".to_string(),
                "\x1b[32mstill green\x1b[0m".to_string(),
                "plain".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_lines_handles_all_separators() {
        assert_eq!(split_lines("a\r\nb\rc\nd\n"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_incomplete_escape_start() {
        assert_eq!(incomplete_escape_start("abc"), None);
        assert_eq!(incomplete_escape_start("abc\x1b[31m"), None);
        assert_eq!(incomplete_escape_start("abc\x1b[31"), Some(3));
        assert_eq!(incomplete_escape_start("ab\x1b"), Some(2));
        assert_eq!(incomplete_escape_start("x\x1b]0;title"), Some(1));
        assert_eq!(incomplete_escape_start("x\x1b]0;title\x07"), None);
    }
}
