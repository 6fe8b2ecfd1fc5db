/// Application name
pub const APP_NAME: &str = "Knight Bot";

/// Version reported in status and health reports
pub const VERSION: &str = "2.1.0";

/// Send attempts made by the retrying sender before giving up
pub const SEND_MAX_ATTEMPTS: u32 = 3;

/// Base delay between send attempts; attempt `n` waits `n` times this
pub const SEND_RETRY_BASE_MS: u64 = 1_000;

/// Minimum spacing between two sends to the same destination
pub const SEND_MIN_INTERVAL_MS: u64 = 1_000;

/// Messages accepted per sender inside one limiter window
pub const INBOUND_LIMIT_PER_WINDOW: u32 = 30;

/// Inbound limiter window length
pub const INBOUND_WINDOW_SECS: u64 = 60;

/// Longest message text accepted by the input guard (in chars)
pub const MAX_INBOUND_TEXT_CHARS: usize = 10_000;

/// Retry-counter cache clear interval (3 minutes)
pub const RETRY_CACHE_CLEAR_SECS: u64 = 180;

/// Cleared retry-counter entries above this count are logged
pub const RETRY_CACHE_LOG_THRESHOLD: usize = 100;

/// Temp directory sweep interval (30 minutes)
pub const TEMP_SWEEP_SECS: u64 = 1_800;

/// Temp files older than this are removed (1 hour)
pub const TEMP_MAX_AGE_SECS: u64 = 3_600;

/// Limiter purge interval (5 minutes)
pub const LIMITER_PURGE_SECS: u64 = 300;

/// Stats log interval (30 minutes)
pub const STATS_LOG_SECS: u64 = 1_800;

/// Resident memory check interval (1 minute)
pub const MEMORY_CHECK_SECS: u64 = 60;

/// Resident memory above this is logged as high (in MB)
pub const MEMORY_WARN_MB: u64 = 500;

/// Slow inbound processing threshold
pub const SLOW_PROCESSING_MS: u64 = 5_000;

/// File name of the appended error log inside the logs directory
pub const ERROR_LOG_FILE: &str = "knight-errors.log";
