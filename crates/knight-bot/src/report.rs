//! Runtime counters, status snapshots and on-disk reports.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use knight_shared::constants::{ERROR_LOG_FILE, VERSION};
use knight_store::StoreSizes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::BotError;

#[derive(Debug, Default)]
struct Counters {
    errors_handled: AtomicU64,
    memory_optimizations: AtomicU64,
    connections_stabilized: AtomicU64,
    messages_optimized: AtomicU64,
    messages_blocked: AtomicU64,
}

/// Shared runtime counters. Clones update the same values.
#[derive(Debug, Clone, Default)]
pub struct EnhancerStats {
    counters: Arc<Counters>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub errors_handled: u64,
    pub memory_optimizations: u64,
    pub connections_stabilized: u64,
    pub messages_optimized: u64,
    pub messages_blocked: u64,
}

impl EnhancerStats {
    pub fn error_handled(&self) -> u64 {
        self.counters.errors_handled.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn memory_optimized(&self) -> u64 {
        self.counters.memory_optimizations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn connection_stabilized(&self) -> u64 {
        self.counters.connections_stabilized.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn message_optimized(&self) -> u64 {
        self.counters.messages_optimized.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn message_blocked(&self) -> u64 {
        self.counters.messages_blocked.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            errors_handled: self.counters.errors_handled.load(Ordering::Relaxed),
            memory_optimizations: self.counters.memory_optimizations.load(Ordering::Relaxed),
            connections_stabilized: self.counters.connections_stabilized.load(Ordering::Relaxed),
            messages_optimized: self.counters.messages_optimized.load(Ordering::Relaxed),
            messages_blocked: self.counters.messages_blocked.load(Ordering::Relaxed),
        }
    }
}

/// Which enhancement layers are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub send_retry: bool,
    pub send_spacing: bool,
    pub input_guard: bool,
    pub housekeeping: bool,
    pub snapshots: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub version: String,
    pub initialized: bool,
    pub stats: StatsSnapshot,
    pub features: Features,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// `healthy` while the session is open.
    pub connection: String,
    pub uptime_secs: u64,
    /// Resident memory in MB, when the platform reports it.
    pub memory_mb: Option<u64>,
    pub errors: u64,
    pub optimizations: u64,
    pub store: StoreSizes,
}

/// Full report written to the logs directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub timestamp: String,
    pub version: String,
    pub uptime_secs: u64,
    pub status: Status,
    pub health: HealthCheck,
}

impl Report {
    pub fn new(status: Status, health: HealthCheck) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: VERSION.to_string(),
            uptime_secs: health.uptime_secs,
            status,
            health,
        }
    }

    /// Write the report as `knight-report-<millis>.json` under `logs_dir`.
    pub fn write_to(&self, logs_dir: &Path) -> Result<PathBuf, BotError> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!(
            "knight-report-{}.json",
            Utc::now().timestamp_millis()
        ));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// Save `report`, logging the outcome. A failed write never propagates.
pub fn generate_report(logs_dir: &Path, report: &Report) -> Option<PathBuf> {
    match report.write_to(logs_dir) {
        Ok(path) => {
            info!(path = %path.display(), "Performance report saved");
            Some(path)
        }
        Err(e) => {
            warn!(error = %e, "Failed to save report");
            None
        }
    }
}

/// Append one entry to the error log under `logs_dir`. Failures are logged
/// and swallowed.
pub fn log_error(logs_dir: &Path, kind: &str, message: &str) {
    if let Err(e) = append_error(logs_dir, kind, message) {
        warn!(error = %e, kind, "Failed to write error log");
    }
}

fn append_error(logs_dir: &Path, kind: &str, message: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(logs_dir)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(ERROR_LOG_FILE))?;
    writeln!(file, "[{}] {}: {}\n", Utc::now().to_rfc3339(), kind, message)
}
