//! Prompt and failure patterns for console monitoring.
//!
//! Matched against ANSI-stripped lines. Dead-end phrases are plain
//! case-insensitive substrings; everything else is a regex.

/// Getty login prompt: `raspberrypi login: `.
pub const LOGIN_PATTERN: &str = r"(?i)login:\s*$";

/// Shell prompt of a logged-in user: `pi@raspberrypi:~$ `, `root@host:/etc# `.
pub const READY_PATTERN: &str = r"^(?P<user>[\w-]+)@(?P<host>[\w-]+):(?P<path>[^#$]+?)[#$]\s*$";

pub const PASSWORD_PATTERN: &str = r"(?i)password:\s*$";

/// Post-login banner that would otherwise look like a login prompt.
pub const LOGIN_BANNER_PREFIX: &str = "last login";

/// Login failed after the password was entered.
pub const LOGIN_REJECTED_PATTERNS: &[&str] = &["login incorrect", "authentication failure"];

/// Phrases meaning the boot will never reach a usable shell.
/// When ANY of these appears, stop waiting and abort.
pub const DEFAULT_DEAD_END_PATTERNS: &[&str] = &[
    // === INIT STAGE ===
    "in emergency mode",                 // systemd emergency.target
    "emergency shell",                   // initramfs / dracut emergency shell
    "Give root password for maintenance", // sulogin
    // === KERNEL STAGE ===
    "Kernel panic",                      // Kernel panic
    "not syncing",                       // Panic continuation
    "VFS: Cannot open root device",      // Root not found
    "No init found",                     // init missing
    "Attempted to kill init",            // init crashed
];
