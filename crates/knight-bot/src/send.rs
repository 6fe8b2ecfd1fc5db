//! Send decorators composed around a transport's [`MessageSender`].
//!
//! `RateLimitedSender<RetryingSender<S>>` spaces sends per destination and
//! retries transient failures with a progressive delay. Both wrap the inner
//! sender at construction time; nothing is patched afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use knight_shared::constants::{SEND_MAX_ATTEMPTS, SEND_RETRY_BASE_MS};
use knight_shared::{Jid, MessageSender, SendContent, SendError, SendOptions, SendReceipt};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::rate_limit::SendSpacer;
use crate::report::EnhancerStats;

// ---------------------------------------------------------------------------
// Retry counter cache
// ---------------------------------------------------------------------------

/// Failed attempts per destination since the last clear. Housekeeping clears
/// it periodically.
#[derive(Clone, Default)]
pub struct RetryCounterCache {
    counters: Arc<Mutex<HashMap<Jid, u32>>>,
}

impl RetryCounterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_failure(&self, jid: &Jid) -> u32 {
        let mut counters = self.counters.lock().await;
        let count = counters.entry(jid.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn failures(&self, jid: &Jid) -> u32 {
        self.counters.lock().await.get(jid).copied().unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove every entry, returning how many there were.
    pub async fn clear(&self) -> usize {
        let mut counters = self.counters.lock().await;
        let count = counters.len();
        counters.clear();
        count
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

pub struct RetryingSender<S> {
    inner: S,
    max_attempts: u32,
    base_delay: Duration,
    failures: RetryCounterCache,
    stats: EnhancerStats,
}

impl<S: MessageSender> RetryingSender<S> {
    pub fn new(inner: S, failures: RetryCounterCache, stats: EnhancerStats) -> Self {
        Self {
            inner,
            max_attempts: SEND_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(SEND_RETRY_BASE_MS),
            failures,
            stats,
        }
    }

    pub fn with_policy(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl<S: MessageSender> MessageSender for RetryingSender<S> {
    async fn send(
        &self,
        jid: &Jid,
        content: &SendContent,
        options: &SendOptions,
    ) -> Result<SendReceipt, SendError> {
        let mut attempt = 0;
        loop {
            match self.inner.send(jid, content, options).await {
                Ok(receipt) => {
                    if attempt > 0 {
                        info!(jid = %jid, attempt = attempt + 1, "Message sent after retry");
                        self.stats.message_optimized();
                    }
                    return Ok(receipt);
                }
                Err(e) => {
                    attempt += 1;
                    self.failures.record_failure(jid).await;
                    warn!(jid = %jid, attempt, error = %e, "Message send attempt failed");

                    if attempt >= self.max_attempts {
                        error!(jid = %jid, attempts = attempt, "All message send attempts failed");
                        return Err(e);
                    }
                    tokio::time::sleep(self.base_delay * attempt).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limit
// ---------------------------------------------------------------------------

pub struct RateLimitedSender<S> {
    inner: S,
    spacer: SendSpacer,
}

impl<S: MessageSender> RateLimitedSender<S> {
    pub fn new(inner: S, spacer: SendSpacer) -> Self {
        Self { inner, spacer }
    }
}

#[async_trait]
impl<S: MessageSender> MessageSender for RateLimitedSender<S> {
    async fn send(
        &self,
        jid: &Jid,
        content: &SendContent,
        options: &SendOptions,
    ) -> Result<SendReceipt, SendError> {
        self.spacer.wait_turn(jid).await;
        self.inner.send(jid, content, options).await
    }
}

/// The full decorator stack: spacing outside, retries inside.
pub type EnhancedSender<S> = RateLimitedSender<RetryingSender<S>>;

// ---------------------------------------------------------------------------
// Logging transport
// ---------------------------------------------------------------------------

/// Stand-in transport for offline runs: logs every send and acknowledges it.
#[derive(Debug, Default, Clone)]
pub struct LoggingSender;

#[async_trait]
impl MessageSender for LoggingSender {
    async fn send(
        &self,
        jid: &Jid,
        content: &SendContent,
        _options: &SendOptions,
    ) -> Result<SendReceipt, SendError> {
        let receipt = SendReceipt::new_outgoing(jid);
        info!(jid = %jid, id = %receipt.key.id, content = %content.0, "Outgoing message");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` sends, then succeeds.
    struct FlakySender {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakySender {
        fn new(failures: u32) -> Self {
            Self { failures, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl MessageSender for FlakySender {
        async fn send(
            &self,
            jid: &Jid,
            _content: &SendContent,
            _options: &SendOptions,
        ) -> Result<SendReceipt, SendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(SendError::Transport(format!("boom #{call}")))
            } else {
                Ok(SendReceipt::new_outgoing(jid))
            }
        }
    }

    fn retrying(inner: FlakySender) -> RetryingSender<FlakySender> {
        RetryingSender::new(inner, RetryCounterCache::new(), EnhancerStats::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_with_progressive_delay() {
        let sender = retrying(FlakySender::new(2));
        let jid = Jid::from("a");
        let start = Instant::now();

        let receipt = sender
            .send(&jid, &SendContent::text("hi"), &SendOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.key.remote_jid, jid);
        assert_eq!(sender.inner.calls.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second.
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(sender.failures.failures(&jid).await, 2);
        assert_eq!(sender.stats.snapshot().messages_optimized, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_with_last_error() {
        let sender = retrying(FlakySender::new(10));
        let result = sender
            .send(&Jid::from("a"), &SendContent::text("hi"), &SendOptions::default())
            .await;

        assert_eq!(result, Err(SendError::Transport("boom #2".into())));
        assert_eq!(sender.inner.calls.load(Ordering::SeqCst), SEND_MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success_does_not_touch_cache() {
        let sender = retrying(FlakySender::new(0));
        sender
            .send(&Jid::from("a"), &SendContent::text("hi"), &SendOptions::default())
            .await
            .unwrap();
        assert!(sender.failures.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_policy() {
        let sender = retrying(FlakySender::new(10)).with_policy(1, Duration::from_secs(5));
        let start = Instant::now();
        assert!(sender
            .send(&Jid::from("a"), &SendContent::text("hi"), &SendOptions::default())
            .await
            .is_err());
        assert_eq!(sender.inner.calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_sender_spaces_sends() {
        let sender = RateLimitedSender::new(LoggingSender, SendSpacer::new(Duration::from_secs(1)));
        let jid = Jid::from("a");
        let start = Instant::now();

        for _ in 0..3 {
            sender
                .send(&jid, &SendContent::text("hi"), &SendOptions::default())
                .await
                .unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_cache_clear() {
        let cache = RetryCounterCache::new();
        cache.record_failure(&Jid::from("a")).await;
        cache.record_failure(&Jid::from("a")).await;
        cache.record_failure(&Jid::from("b")).await;

        assert_eq!(cache.failures(&Jid::from("a")).await, 2);
        assert_eq!(cache.clear().await, 2);
        assert!(cache.is_empty().await);
    }
}
