//! Runtime settings for the Knight bot, taken from the process environment.
//! Unset or unparsable variables keep the built-in default.

use std::path::PathBuf;
use std::time::Duration;

use knight_shared::constants::MEMORY_WARN_MB;
use knight_shared::Jid;
use knight_store::StoreMode;

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Display name used in status messages.
    /// Env: `BOT_NAME`
    /// Default: `"KNIGHT BOT"`
    pub bot_name: String,

    /// Owner phone number (digits only); greeted when the session opens.
    /// Env: `OWNER_NUMBER`
    /// Default: `911234567890`
    pub owner_number: String,

    /// Directory holding the transport's authentication state. The bot
    /// only makes sure it exists.
    /// Env: `SESSION_DIR`
    /// Default: `./session`
    pub session_dir: PathBuf,

    /// Store persistence mode.
    /// Env: `STORE_MODE` (`memory` / `snapshot`)
    /// Default: `memory`
    pub store_mode: StoreMode,

    /// Snapshot file used in snapshot mode.
    /// Env: `STORE_PATH`
    /// Default: platform data dir (`store.json`), else `./data/store.json`
    pub store_path: PathBuf,

    /// How often the snapshot is written in snapshot mode.
    /// Env: `STORE_WRITE_INTERVAL_MS`
    /// Default: 10 000 ms
    pub store_write_interval: Duration,

    /// Whether the send decorators, input guard and housekeeping run.
    /// Env: `ENABLE_ENHANCEMENTS` (true/false)
    /// Default: `true`
    pub enable_enhancements: bool,

    /// Scratch directory swept by housekeeping.
    /// Env: `TEMP_DIR`
    /// Default: `./temp`
    pub temp_dir: PathBuf,

    /// Directory for the error log and generated reports.
    /// Env: `LOGS_DIR`
    /// Default: `./logs`
    pub logs_dir: PathBuf,

    /// Failures tolerated before the supervisor shuts the session down.
    /// Env: `MAX_CRASHES`
    /// Default: `5`
    pub max_crashes: u32,

    /// Wait before reconnecting after a non-logout close.
    /// Env: `RECONNECT_DELAY_MS`
    /// Default: 3 000 ms
    pub reconnect_delay: Duration,

    /// Resident memory (MB) above which the periodic check warns.
    /// Env: `MEMORY_WARN_MB`
    /// Default: `500`
    pub memory_warn_mb: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: "KNIGHT BOT".to_string(),
            owner_number: "911234567890".to_string(),
            session_dir: PathBuf::from("./session"),
            store_mode: StoreMode::Memory,
            store_path: knight_store::default_snapshot_path()
                .unwrap_or_else(|_| PathBuf::from("./data/store.json")),
            store_write_interval: Duration::from_millis(10_000),
            enable_enhancements: true,
            temp_dir: PathBuf::from("./temp"),
            logs_dir: PathBuf::from("./logs"),
            max_crashes: 5,
            reconnect_delay: Duration::from_millis(3_000),
            memory_warn_mb: MEMORY_WARN_MB,
        }
    }
}

impl BotConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("BOT_NAME") {
            config.bot_name = name;
        }

        if let Some(number) = lookup("OWNER_NUMBER") {
            let digits: String = number.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                tracing::warn!(value = %number, "Invalid OWNER_NUMBER, using default");
            } else {
                config.owner_number = digits;
            }
        }

        if let Some(path) = lookup("SESSION_DIR") {
            config.session_dir = PathBuf::from(path);
        }

        if let Some(mode) = lookup("STORE_MODE") {
            match mode.parse::<StoreMode>() {
                Ok(parsed) => config.store_mode = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid STORE_MODE, using default"),
            }
        }

        if let Some(path) = lookup("STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }

        if let Some(ms) = parse_millis(&lookup, "STORE_WRITE_INTERVAL_MS") {
            config.store_write_interval = ms;
        }

        if let Some(val) = lookup("ENABLE_ENHANCEMENTS") {
            config.enable_enhancements = parse_flag(&val);
        }

        if let Some(path) = lookup("TEMP_DIR") {
            config.temp_dir = PathBuf::from(path);
        }

        if let Some(path) = lookup("LOGS_DIR") {
            config.logs_dir = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_CRASHES") {
            match val.parse::<u32>() {
                Ok(n) => config.max_crashes = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_CRASHES, using default"),
            }
        }

        if let Some(ms) = parse_millis(&lookup, "RECONNECT_DELAY_MS") {
            config.reconnect_delay = ms;
        }

        if let Some(val) = lookup("MEMORY_WARN_MB") {
            match val.parse::<u64>() {
                Ok(mb) if mb > 0 => config.memory_warn_mb = mb,
                _ => tracing::warn!(value = %val, "Invalid MEMORY_WARN_MB, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// The owner's personal chat.
    pub fn owner_jid(&self) -> Jid {
        Jid::new(format!("{}@s.whatsapp.net", self.owner_number))
    }
}

/// Anything other than `false` / `0` enables the flag.
fn parse_flag(val: &str) -> bool {
    val != "false" && val != "0"
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(key)?;
    match val.parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!(key, value = %val, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> BotConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = BotConfig::default();
        assert!(config.enable_enhancements);
        assert_eq!(config.store_mode, StoreMode::Memory);
        assert_eq!(config.store_write_interval, Duration::from_secs(10));
        assert_eq!(config.max_crashes, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("BOT_NAME", "Test Bot"),
            ("OWNER_NUMBER", "+44 7700 900123"),
            ("ENABLE_ENHANCEMENTS", "0"),
            ("STORE_MODE", "snapshot"),
            ("STORE_PATH", "/tmp/knight.json"),
            ("STORE_WRITE_INTERVAL_MS", "2500"),
            ("MAX_CRASHES", "2"),
            ("MEMORY_WARN_MB", "256"),
        ]);

        assert_eq!(config.bot_name, "Test Bot");
        assert_eq!(config.owner_jid(), Jid::from("447700900123@s.whatsapp.net"));
        assert!(!config.enable_enhancements);
        assert_eq!(config.store_mode, StoreMode::Snapshot);
        assert_eq!(config.store_path, PathBuf::from("/tmp/knight.json"));
        assert_eq!(config.store_write_interval, Duration::from_millis(2500));
        assert_eq!(config.max_crashes, 2);
        assert_eq!(config.memory_warn_mb, 256);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("OWNER_NUMBER", "nobody"),
            ("STORE_MODE", "sqlite"),
            ("STORE_WRITE_INTERVAL_MS", "soon"),
            ("RECONNECT_DELAY_MS", "0"),
            ("MAX_CRASHES", "-1"),
            ("ENABLE_ENHANCEMENTS", "yes"),
            ("MEMORY_WARN_MB", "lots"),
        ]);
        let defaults = BotConfig::default();

        assert_eq!(config.owner_number, defaults.owner_number);
        assert_eq!(config.store_mode, StoreMode::Memory);
        assert_eq!(config.store_write_interval, defaults.store_write_interval);
        assert_eq!(config.reconnect_delay, defaults.reconnect_delay);
        assert_eq!(config.max_crashes, 5);
        assert!(config.enable_enhancements);
        assert_eq!(config.memory_warn_mb, MEMORY_WARN_MB);
    }
}
