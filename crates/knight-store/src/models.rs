//! Collections projected from the event feed.
//!
//! Records stay as raw JSON objects: the transport owns their schema and the
//! store only relies on the identifying key fields.

use std::collections::HashMap;
use std::str::FromStr;

use knight_shared::Record;
use serde::{Deserialize, Serialize};

/// Conversation id → chat record.
pub type ChatMap = HashMap<String, Record>;

/// Conversation id → (message id → message record).
pub type MessageMap = HashMap<String, HashMap<String, Record>>;

/// Contact id → contact record.
pub type ContactMap = HashMap<String, Record>;

/// The three collections owned by the store.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Collections {
    pub chats: ChatMap,
    pub messages: MessageMap,
    pub contacts: ContactMap,
}

impl Collections {
    pub fn message_count(&self) -> usize {
        self.messages.values().map(HashMap::len).sum()
    }
}

/// Outcome of applying one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    /// Records inserted, overwritten or merged.
    pub applied: usize,
    /// Updates whose target did not exist (silent no-ops).
    pub ignored: usize,
    /// Records missing their key fields.
    pub skipped: usize,
}

impl ApplyStats {
    pub fn total(&self) -> usize {
        self.applied + self.ignored + self.skipped
    }
}

impl std::ops::AddAssign for ApplyStats {
    fn add_assign(&mut self, rhs: Self) {
        self.applied += rhs.applied;
        self.ignored += rhs.ignored;
        self.skipped += rhs.skipped;
    }
}

/// Entry counts, for health reports and housekeeping logs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSizes {
    pub chats: usize,
    pub conversations: usize,
    pub messages: usize,
    pub contacts: usize,
}

/// How the persistence hooks behave.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// `write_to_file` / `read_from_file` only log their invocation.
    #[default]
    Memory,
    /// `write_to_file` / `read_from_file` save and restore a JSON snapshot.
    Snapshot,
}

impl FromStr for StoreMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "snapshot" => Ok(Self::Snapshot),
            other => Err(format!("unknown store mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_mode_parse() {
        assert_eq!("memory".parse::<StoreMode>().unwrap(), StoreMode::Memory);
        assert_eq!(" Snapshot ".parse::<StoreMode>().unwrap(), StoreMode::Snapshot);
        assert!("sqlite".parse::<StoreMode>().is_err());
    }

    #[test]
    fn test_apply_stats_accumulate() {
        let mut stats = ApplyStats { applied: 1, ignored: 0, skipped: 2 };
        stats += ApplyStats { applied: 3, ignored: 1, skipped: 0 };
        assert_eq!(stats, ApplyStats { applied: 4, ignored: 1, skipped: 2 });
        assert_eq!(stats.total(), 7);
    }
}
