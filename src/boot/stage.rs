//! Boot stage tracking for stall diagnostics.
//!
//! A watchdog timeout says little on its own. Knowing how far the machine got
//! (firmware, bootloader, kernel, userspace) tells the operator where to look.

use serde::Serialize;
use std::fmt;

/// How far a boot has visibly progressed. Ordered: a later stage never goes
/// back to an earlier one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStage {
    /// Nothing recognizable yet, or only firmware output.
    #[default]
    Firmware,
    Bootloader,
    Kernel,
    Userspace,
}

const BOOTLOADER_MARKERS: &[&str] = &[
    "systemd-boot",
    "Loading Linux",
    "loader",
    "GRUB",
    "U-Boot",
    "Starting kernel",
];

const KERNEL_MARKERS: &[&str] = &["Linux version", "Booting Linux", "KASLR", "Kernel command line"];

const USERSPACE_MARKERS: &[&str] = &[
    "systemd[1]",
    "Welcome to",
    "Reached target",
    "Started ",
    "login:",
    "Run /sbin/init",
    "Run /init",
];

impl BootStage {
    /// The stage a single line proves was reached, if any.
    pub fn detect(line: &str) -> Option<Self> {
        let contains_any = |markers: &[&str]| markers.iter().any(|m| line.contains(m));
        if contains_any(USERSPACE_MARKERS) {
            Some(Self::Userspace)
        } else if contains_any(KERNEL_MARKERS) {
            Some(Self::Kernel)
        } else if contains_any(BOOTLOADER_MARKERS) {
            Some(Self::Bootloader)
        } else {
            None
        }
    }

    /// Advance to the stage proven by `line`, never moving backwards.
    pub fn advance(&mut self, line: &str) {
        if let Some(seen) = Self::detect(line) {
            if seen > *self {
                *self = seen;
            }
        }
    }

    /// Operator-facing explanation of a stall at this stage.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Firmware => "no kernel output seen, firmware or serial console may be broken",
            Self::Bootloader => "bootloader ran but kernel stalled",
            Self::Kernel => "kernel started but init stalled",
            Self::Userspace => "userspace started but stopped producing output",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Firmware => "firmware",
            Self::Bootloader => "bootloader",
            Self::Kernel => "kernel",
            Self::Userspace => "userspace",
        };
        f.write_str(name)
    }
}
