//! Resident memory of the bot process.

use sysinfo::System;

/// One resident-memory sample compared against a warning threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    pub resident_mb: u64,
    pub high: bool,
}

impl MemoryReading {
    pub fn new(resident_mb: u64, threshold_mb: u64) -> Self {
        Self {
            resident_mb,
            high: resident_mb > threshold_mb,
        }
    }
}

/// Resident set size of the current process in MB, or `None` where the
/// platform does not report it.
pub fn resident_mb() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return None;
    }
    system.process(pid).map(|process| process.memory() / (1024 * 1024))
}
