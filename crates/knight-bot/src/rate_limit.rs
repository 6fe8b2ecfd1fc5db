use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use knight_shared::constants::{
    INBOUND_LIMIT_PER_WINDOW, INBOUND_WINDOW_SECS, SEND_MIN_INTERVAL_MS,
};
use knight_shared::Jid;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Keeps outbound sends to one destination at least `min_interval` apart.
#[derive(Clone)]
pub struct SendSpacer {
    next_slot: Arc<Mutex<HashMap<Jid, Instant>>>,
    min_interval: Duration,
}

impl SendSpacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            next_slot: Arc::new(Mutex::new(HashMap::new())),
            min_interval,
        }
    }

    /// Wait until `jid` may be sent to again and claim that slot.
    ///
    /// The slot is reserved before sleeping, so concurrent callers for the
    /// same destination queue up behind each other. Returns the time waited.
    pub async fn wait_turn(&self, jid: &Jid) -> Duration {
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(jid) {
                Some(last) => (*last + self.min_interval).max(now),
                None => now,
            };
            slots.insert(jid.clone(), slot);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!(jid = %jid, wait_ms = wait.as_millis() as u64, "Spacing send");
            tokio::time::sleep_until(slot).await;
        }
        wait
    }

    /// Forget destinations whose last send is older than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let mut slots = self.next_slot.lock().await;
        let now = Instant::now();
        let before = slots.len();
        slots.retain(|_, slot| now.saturating_duration_since(*slot) < max_idle);
        before - slots.len()
    }

    pub async fn clear(&self) -> usize {
        let mut slots = self.next_slot.lock().await;
        let count = slots.len();
        slots.clear();
        count
    }
}

impl Default for SendSpacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(SEND_MIN_INTERVAL_MS))
    }
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window counter per sender.
#[derive(Clone)]
pub struct WindowLimiter {
    windows: Arc<Mutex<HashMap<Jid, Window>>>,
    limit: u32,
    window: Duration,
}

impl WindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    /// Count one message from `jid`; `true` once it is over the limit for the
    /// current window.
    pub async fn is_limited(&self, jid: &Jid) -> bool {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let entry = windows.entry(jid.clone()).or_insert_with(|| Window {
            count: 0,
            reset_at: now + self.window,
        });

        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + self.window;
        }

        entry.count += 1;
        let limited = entry.count > self.limit;
        if limited {
            warn!(jid = %jid, count = entry.count, "Inbound rate limit exceeded");
        }
        limited
    }

    /// Drop windows that have already expired.
    pub async fn purge_stale(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let before = windows.len();
        windows.retain(|_, w| now <= w.reset_at);
        before - windows.len()
    }

    pub async fn clear(&self) -> usize {
        let mut windows = self.windows.lock().await;
        let count = windows.len();
        windows.clear();
        count
    }
}

impl Default for WindowLimiter {
    fn default() -> Self {
        Self::new(
            INBOUND_LIMIT_PER_WINDOW,
            Duration::from_secs(INBOUND_WINDOW_SECS),
        )
    }
}
