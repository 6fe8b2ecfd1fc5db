//! Periodic maintenance tasks and the temp-directory sweeps they use.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use knight_shared::constants::{
    LIMITER_PURGE_SECS, MEMORY_CHECK_SECS, RETRY_CACHE_CLEAR_SECS, STATS_LOG_SECS,
    TEMP_SWEEP_SECS,
};
use knight_store::StoreMode;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::enhancer::Enhancer;

/// Remove regular files in `dir` last modified more than `max_age` ago.
/// A missing directory counts as empty.
pub async fn sweep_temp_dir(dir: &Path, max_age: Duration) -> io::Result<usize> {
    remove_files(dir, |modified| {
        SystemTime::now()
            .duration_since(modified)
            .map(|age| age > max_age)
            .unwrap_or(false)
    })
    .await
}

/// Remove every regular file in `dir`.
pub async fn clear_dir(dir: &Path) -> io::Result<usize> {
    remove_files(dir, |_| true).await
}

async fn remove_files<F>(dir: &Path, should_remove: F) -> io::Result<usize>
where
    F: Fn(SystemTime) -> bool,
{
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() || !should_remove(metadata.modified()?) {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            // Raced with another cleaner.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// Spawn one interval task per maintenance job. The first tick of each job
/// fires one full period after start.
///
/// Nothing is spawned when enhancements are off, except the snapshot writer
/// in snapshot mode.
pub fn spawn(enhancer: Arc<Enhancer>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let config = enhancer.config().clone();

    if config.store_mode == StoreMode::Snapshot {
        let store = enhancer.store().clone();
        let path = config.store_path.clone();
        handles.push(every(config.store_write_interval, move || {
            let store = store.clone();
            let path = path.clone();
            async move {
                let target = path.clone();
                match tokio::task::spawn_blocking(move || store.write_to_file(&target)).await {
                    Ok(()) => debug!(path = %path.display(), "Periodic snapshot written"),
                    Err(e) => warn!(error = %e, "Snapshot write task failed"),
                }
            }
        }));
    }

    if !config.enable_enhancements {
        return handles;
    }

    let e = enhancer.clone();
    handles.push(every(Duration::from_secs(RETRY_CACHE_CLEAR_SECS), move || {
        let e = e.clone();
        async move {
            e.clear_retry_cache().await;
        }
    }));

    let e = enhancer.clone();
    handles.push(every(Duration::from_secs(TEMP_SWEEP_SECS), move || {
        let e = e.clone();
        async move {
            e.sweep_temp().await;
        }
    }));

    let e = enhancer.clone();
    handles.push(every(Duration::from_secs(LIMITER_PURGE_SECS), move || {
        let e = e.clone();
        async move {
            e.purge_limiters().await;
        }
    }));

    let e = enhancer.clone();
    handles.push(every(Duration::from_secs(MEMORY_CHECK_SECS), move || {
        let e = e.clone();
        async move {
            e.check_memory();
        }
    }));

    let e = enhancer;
    handles.push(every(Duration::from_secs(STATS_LOG_SECS), move || {
        let e = e.clone();
        async move { e.log_stats() }
    }));

    info!(tasks = handles.len(), "Housekeeping started");
    handles
}

fn every<F, Fut>(period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            job().await;
        }
    })
}
