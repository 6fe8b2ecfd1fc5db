//! Session supervisor.
//!
//! The transport side reports what happened to the session as
//! [`SessionReport`]s over a channel; the supervisor owns the restart policy
//! and answers with a [`Decision`].

use std::path::PathBuf;
use std::time::Duration;

use knight_shared::Record;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::report::{log_error, EnhancerStats};

/// Status code the transport uses for a logged-out session.
pub const LOGGED_OUT_STATUS: i64 = 401;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReport {
    ConnectionOpened,
    ConnectionClosed { logged_out: bool, reason: Option<String> },
    Failure(String),
}

impl SessionReport {
    /// Interpret a `connection.update` record. Intermediate states
    /// (`connecting`, QR refreshes) yield `None`.
    pub fn from_connection_update(update: &Record) -> Option<Self> {
        match update.get("connection").and_then(Value::as_str)? {
            "open" => Some(Self::ConnectionOpened),
            "close" => {
                let error = update.get("lastDisconnect").and_then(|d| d.get("error"));
                let status = error
                    .and_then(|e| e.pointer("/output/statusCode"))
                    .and_then(Value::as_i64);
                let reason = error
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(Self::ConnectionClosed {
                    logged_out: status == Some(LOGGED_OUT_STATUS),
                    reason,
                })
            }
            _ => None,
        }
    }

    /// Interpret an `error` event record.
    pub fn from_error(record: &Record) -> Self {
        let message = record
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(record.clone()).to_string());
        Self::Failure(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do.
    Continue,
    /// The session is open.
    Connected,
    /// Restart the session after the delay.
    Reconnect(Duration),
    /// Stop for good.
    Shutdown(String),
}

pub struct Supervisor {
    max_crashes: u32,
    reconnect_delay: Duration,
    crash_count: u32,
    stats: EnhancerStats,
    logs_dir: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(max_crashes: u32, reconnect_delay: Duration, stats: EnhancerStats) -> Self {
        Self {
            max_crashes,
            reconnect_delay,
            crash_count: 0,
            stats,
            logs_dir: None,
        }
    }

    pub fn from_config(config: &BotConfig, stats: EnhancerStats) -> Self {
        Self::new(config.max_crashes, config.reconnect_delay, stats)
            .with_error_log(config.logs_dir.clone())
    }

    /// Append failures to the error log in `logs_dir` while running.
    pub fn with_error_log(mut self, logs_dir: PathBuf) -> Self {
        self.logs_dir = Some(logs_dir);
        self
    }

    pub fn crash_count(&self) -> u32 {
        self.crash_count
    }

    pub fn decide(&mut self, report: &SessionReport) -> Decision {
        match report {
            SessionReport::ConnectionOpened => {
                info!("Connection restored and stabilized");
                Decision::Connected
            }
            SessionReport::ConnectionClosed { logged_out: true, reason } => {
                warn!(reason = reason.as_deref().unwrap_or("-"), "Session logged out");
                Decision::Shutdown("logged out".to_string())
            }
            SessionReport::ConnectionClosed { logged_out: false, reason } => {
                self.stats.connection_stabilized();
                warn!(
                    reason = reason.as_deref().unwrap_or("-"),
                    delay_ms = self.reconnect_delay.as_millis() as u64,
                    "Connection lost, preparing for reconnection"
                );
                Decision::Reconnect(self.reconnect_delay)
            }
            SessionReport::Failure(message) => {
                self.crash_count += 1;
                self.stats.error_handled();
                error!(crash = self.crash_count, error = %message, "Caught session failure");

                if self.crash_count > self.max_crashes {
                    error!(crashes = self.crash_count, "Too many failures, shutting down");
                    Decision::Shutdown(format!("{} failures", self.crash_count))
                } else {
                    Decision::Continue
                }
            }
        }
    }

    /// Consume reports until the channel closes or a shutdown is decided.
    /// Every non-`Continue` decision is forwarded on `decisions`.
    pub async fn run(
        mut self,
        mut reports: mpsc::UnboundedReceiver<SessionReport>,
        decisions: mpsc::UnboundedSender<Decision>,
    ) -> u32 {
        while let Some(report) = reports.recv().await {
            let decision = self.decide(&report);

            if let (SessionReport::Failure(message), Some(dir)) = (&report, &self.logs_dir) {
                let (dir, message) = (dir.clone(), message.clone());
                let logged =
                    tokio::task::spawn_blocking(move || log_error(&dir, "failure", &message)).await;
                if let Err(e) = logged {
                    warn!(error = %e, "Error log task failed");
                }
            }

            let shutdown = matches!(decision, Decision::Shutdown(_));

            if decision != Decision::Continue && decisions.send(decision).is_err() {
                warn!("Decision receiver dropped, supervisor stopping");
                break;
            }
            if shutdown {
                break;
            }
        }
        self.crash_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_connection_update_parsing() {
        assert_eq!(
            SessionReport::from_connection_update(&record(json!({"connection": "open"}))),
            Some(SessionReport::ConnectionOpened)
        );
        assert_eq!(
            SessionReport::from_connection_update(&record(json!({
                "connection": "close",
                "lastDisconnect": {"error": {"message": "bye", "output": {"statusCode": 401}}}
            }))),
            Some(SessionReport::ConnectionClosed { logged_out: true, reason: Some("bye".into()) })
        );
        assert_eq!(
            SessionReport::from_connection_update(&record(json!({"connection": "close"}))),
            Some(SessionReport::ConnectionClosed { logged_out: false, reason: None })
        );
        assert_eq!(
            SessionReport::from_connection_update(&record(json!({"qr": "abc"}))),
            None
        );
    }

    #[test]
    fn test_error_record() {
        assert_eq!(
            SessionReport::from_error(&record(json!({"message": "stream errored"}))),
            SessionReport::Failure("stream errored".into())
        );
        assert_eq!(
            SessionReport::from_error(&record(json!({"code": 5}))),
            SessionReport::Failure(r#"{"code":5}"#.into())
        );
    }

    #[test]
    fn test_close_reconnects_unless_logged_out() {
        let stats = EnhancerStats::default();
        let mut supervisor = Supervisor::new(5, Duration::from_secs(3), stats.clone());

        assert_eq!(
            supervisor.decide(&SessionReport::ConnectionClosed { logged_out: false, reason: None }),
            Decision::Reconnect(Duration::from_secs(3))
        );
        assert_eq!(stats.snapshot().connections_stabilized, 1);
        assert!(matches!(
            supervisor.decide(&SessionReport::ConnectionClosed { logged_out: true, reason: None }),
            Decision::Shutdown(_)
        ));
    }

    #[test]
    fn test_shutdown_after_too_many_failures() {
        let mut supervisor = Supervisor::new(2, Duration::from_secs(1), EnhancerStats::default());
        let failure = SessionReport::Failure("boom".into());

        assert_eq!(supervisor.decide(&failure), Decision::Continue);
        assert_eq!(supervisor.decide(&failure), Decision::Continue);
        assert!(matches!(supervisor.decide(&failure), Decision::Shutdown(_)));
        assert_eq!(supervisor.crash_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_logged_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(5, Duration::from_secs(1), EnhancerStats::default())
            .with_error_log(dir.path().to_path_buf());
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (decision_tx, _decision_rx) = mpsc::unbounded_channel();

        report_tx.send(SessionReport::Failure("disk on fire".into())).unwrap();
        drop(report_tx);
        assert_eq!(supervisor.run(report_rx, decision_tx).await, 1);

        let log = std::fs::read_to_string(
            dir.path().join(knight_shared::constants::ERROR_LOG_FILE),
        )
        .unwrap();
        assert!(log.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_run_forwards_decisions_until_shutdown() {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (decision_tx, mut decision_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(0, Duration::from_secs(1), EnhancerStats::default());

        report_tx.send(SessionReport::ConnectionOpened).unwrap();
        report_tx.send(SessionReport::Failure("boom".into())).unwrap();
        report_tx.send(SessionReport::ConnectionOpened).unwrap();

        let crashes = supervisor.run(report_rx, decision_tx).await;

        assert_eq!(crashes, 1);
        assert_eq!(decision_rx.recv().await, Some(Decision::Connected));
        assert!(matches!(decision_rx.recv().await, Some(Decision::Shutdown(_))));
        assert_eq!(decision_rx.recv().await, None);
    }
}
