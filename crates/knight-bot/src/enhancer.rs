//! Composition root for the bot runtime.
//!
//! The [`Enhancer`] owns the shared handles (store, stats, caches, limiters)
//! and wires them to an event source once. Housekeeping tasks and the send
//! decorator stack are built from the same handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use knight_shared::constants::{
    LIMITER_PURGE_SECS, RETRY_CACHE_LOG_THRESHOLD, SLOW_PROCESSING_MS, TEMP_MAX_AGE_SECS, VERSION,
};
use knight_shared::{EventKind, EventSource, MessageSender, Record};
use knight_store::{InMemoryStore, StoreMode};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::guard::{InputGuard, Verdict};
use crate::housekeeping;
use crate::memory::{self, MemoryReading};
use crate::rate_limit::SendSpacer;
use crate::report::{EnhancerStats, Features, HealthCheck, Report, Status};
use crate::send::{EnhancedSender, RateLimitedSender, RetryCounterCache, RetryingSender};
use crate::supervisor::SessionReport;

/// Outcome of draining the inbound queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InboundStats {
    pub accepted: usize,
    pub blocked: usize,
}

/// What [`Enhancer::emergency_cleanup`] released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSummary {
    pub retry_entries: usize,
    pub limiter_entries: usize,
    pub temp_files: usize,
}

pub struct Enhancer {
    config: BotConfig,
    store: InMemoryStore,
    stats: EnhancerStats,
    retry_cache: RetryCounterCache,
    spacer: SendSpacer,
    guard: InputGuard,
    reports: mpsc::UnboundedSender<SessionReport>,
    connected: Arc<AtomicBool>,
    initialized: AtomicBool,
    started_at: Instant,
}

impl Enhancer {
    pub fn new(
        config: BotConfig,
        store: InMemoryStore,
        stats: EnhancerStats,
        reports: mpsc::UnboundedSender<SessionReport>,
    ) -> Self {
        Self {
            config,
            store,
            stats,
            retry_cache: RetryCounterCache::new(),
            spacer: SendSpacer::default(),
            guard: InputGuard::default(),
            reports,
            connected: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn stats(&self) -> &EnhancerStats {
        &self.stats
    }

    pub fn retry_cache(&self) -> &RetryCounterCache {
        &self.retry_cache
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Bind the store and the session handlers to `source`.
    ///
    /// Only the first call registers anything; it returns the receiving end
    /// of the inbound message queue, to be drained with
    /// [`Enhancer::process_inbound`]. Later calls log and return `None`.
    pub fn init<S: EventSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Option<mpsc::UnboundedReceiver<Vec<Record>>> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            info!("Enhancer already initialized");
            return None;
        }

        self.store.bind(source);

        let reports = self.reports.clone();
        let connected = self.connected.clone();
        source.on(
            EventKind::ConnectionUpdate,
            Box::new(move |batch| {
                for update in batch {
                    let Some(report) = SessionReport::from_connection_update(update) else {
                        continue;
                    };
                    connected.store(
                        report == SessionReport::ConnectionOpened,
                        Ordering::Relaxed,
                    );
                    if reports.send(report).is_err() {
                        warn!("Supervisor gone, dropping connection update");
                    }
                }
            }),
        );

        let reports = self.reports.clone();
        source.on(
            EventKind::Error,
            Box::new(move |batch| {
                for record in batch {
                    if reports.send(SessionReport::from_error(record)).is_err() {
                        warn!("Supervisor gone, dropping error event");
                    }
                }
            }),
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        if self.config.enable_enhancements {
            source.on(
                EventKind::MessagesUpsert,
                Box::new(move |batch| {
                    let messages = upserted_messages(batch);
                    if !messages.is_empty() && inbound_tx.send(messages).is_err() {
                        debug!("Inbound queue closed");
                    }
                }),
            );
        }

        info!(
            enhancements = self.config.enable_enhancements,
            mode = ?self.store.mode(),
            "Enhancer initialized"
        );
        Some(inbound_rx)
    }

    /// Run every queued inbound message through the input guard until the
    /// queue closes. `on_accept` sees each message that passed.
    pub async fn process_inbound<F>(
        &self,
        mut inbound: mpsc::UnboundedReceiver<Vec<Record>>,
        mut on_accept: F,
    ) -> InboundStats
    where
        F: FnMut(Record),
    {
        let slow = Duration::from_millis(SLOW_PROCESSING_MS);
        let mut stats = InboundStats::default();

        while let Some(batch) = inbound.recv().await {
            for message in batch {
                let started = Instant::now();
                match self.guard.check(&message).await {
                    Verdict::Accept => {
                        stats.accepted += 1;
                        on_accept(message);
                    }
                    Verdict::Malformed => {
                        stats.blocked += 1;
                        debug!("Dropped inbound message without a key");
                    }
                    Verdict::Oversized { .. } | Verdict::RateLimited { .. } => {
                        stats.blocked += 1;
                        self.stats.message_blocked();
                    }
                }

                let elapsed = started.elapsed();
                if elapsed > slow {
                    warn!(elapsed_ms = elapsed.as_millis() as u64, "Slow message processing");
                }
            }
        }
        stats
    }

    /// Wrap `inner` in the retry and spacing decorators. With enhancements
    /// off the stack degrades to a single attempt and no spacing.
    pub fn compose_sender<S: MessageSender>(&self, inner: S) -> EnhancedSender<S> {
        let retrying = RetryingSender::new(inner, self.retry_cache.clone(), self.stats.clone());
        if self.config.enable_enhancements {
            RateLimitedSender::new(retrying, self.spacer.clone())
        } else {
            RateLimitedSender::new(
                retrying.with_policy(1, Duration::ZERO),
                SendSpacer::new(Duration::ZERO),
            )
        }
    }

    pub fn status(&self) -> Status {
        let enhanced = self.config.enable_enhancements;
        Status {
            version: VERSION.to_string(),
            initialized: self.is_initialized(),
            stats: self.stats.snapshot(),
            features: Features {
                send_retry: enhanced,
                send_spacing: enhanced,
                input_guard: enhanced,
                housekeeping: enhanced,
                snapshots: self.store.mode() == StoreMode::Snapshot,
            },
        }
    }

    pub fn health_check(&self) -> HealthCheck {
        let stats = self.stats.snapshot();
        HealthCheck {
            connection: if self.is_connected() { "healthy" } else { "disconnected" }.to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            memory_mb: memory::resident_mb(),
            errors: stats.errors_handled,
            optimizations: stats.memory_optimizations + stats.messages_optimized,
            store: self.store.sizes(),
        }
    }

    pub fn report(&self) -> Report {
        Report::new(self.status(), self.health_check())
    }

    /// Sample resident memory and warn when it is above the configured
    /// threshold. `None` where the platform reports nothing.
    pub fn check_memory(&self) -> Option<MemoryReading> {
        let reading = MemoryReading::new(memory::resident_mb()?, self.config.memory_warn_mb);
        if reading.high {
            warn!(
                resident_mb = reading.resident_mb,
                threshold_mb = self.config.memory_warn_mb,
                "High memory usage detected"
            );
        }
        Some(reading)
    }

    /// Empty the retry-counter cache. Returns the number of entries dropped.
    pub async fn clear_retry_cache(&self) -> usize {
        let cleared = self.retry_cache.clear().await;
        if cleared > RETRY_CACHE_LOG_THRESHOLD {
            info!(entries = cleared, "Cleared retry counter cache");
        }
        if cleared > 0 {
            self.stats.memory_optimized();
        }
        cleared
    }

    /// Forget idle send slots and expired inbound windows.
    pub async fn purge_limiters(&self) -> usize {
        let purged = self
            .spacer
            .purge_stale(Duration::from_secs(LIMITER_PURGE_SECS))
            .await
            + self.guard.limiter().purge_stale().await;
        if purged > 0 {
            debug!(entries = purged, "Purged limiter state");
        }
        purged
    }

    /// Delete temp files older than the configured maximum age.
    pub async fn sweep_temp(&self) -> usize {
        let max_age = Duration::from_secs(TEMP_MAX_AGE_SECS);
        match housekeeping::sweep_temp_dir(&self.config.temp_dir, max_age).await {
            Ok(0) => 0,
            Ok(removed) => {
                info!(files = removed, "Cleaned old temp files");
                self.stats.memory_optimized();
                removed
            }
            Err(e) => {
                warn!(dir = %self.config.temp_dir.display(), error = %e, "Temp sweep failed");
                0
            }
        }
    }

    /// Drop every cache, limiter entry and temp file at once.
    pub async fn emergency_cleanup(&self) -> CleanupSummary {
        let temp_files = match housekeeping::clear_dir(&self.config.temp_dir).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(dir = %self.config.temp_dir.display(), error = %e, "Temp clear failed");
                0
            }
        };
        let summary = CleanupSummary {
            retry_entries: self.retry_cache.clear().await,
            limiter_entries: self.spacer.clear().await + self.guard.limiter().clear().await,
            temp_files,
        };
        self.stats.memory_optimized();
        warn!(?summary, "Emergency cleanup performed");
        summary
    }

    /// Log a one-line summary of counters and store sizes.
    pub fn log_stats(&self) {
        let stats = self.stats.snapshot();
        let sizes = self.store.sizes();
        info!(
            uptime_secs = self.started_at.elapsed().as_secs(),
            memory_mb = ?memory::resident_mb(),
            errors = stats.errors_handled,
            memory_optimizations = stats.memory_optimizations,
            connections = stats.connections_stabilized,
            messages_optimized = stats.messages_optimized,
            messages_blocked = stats.messages_blocked,
            chats = sizes.chats,
            messages = sizes.messages,
            contacts = sizes.contacts,
            "Enhancer stats"
        );
    }
}

/// Flatten a `messages.upsert` batch. Entries may be messages themselves or
/// envelopes carrying a `messages` array.
fn upserted_messages(batch: &[Record]) -> Vec<Record> {
    let mut messages = Vec::with_capacity(batch.len());
    for entry in batch {
        match entry.get("messages").and_then(Value::as_array) {
            Some(inner) => messages.extend(inner.iter().filter_map(Value::as_object).cloned()),
            None => messages.push(entry.clone()),
        }
    }
    messages
}
