//! `messages.set` / `messages.update` handling and message lookups.

use knight_shared::types::shallow_merge;
use knight_shared::{MessageKey, Record};
use tracing::{debug, warn};

use crate::models::ApplyStats;
use crate::store::InMemoryStore;

impl InMemoryStore {
    /// Insert or overwrite each message under its conversation, creating the
    /// conversation entry on first sight.
    pub fn set_messages(&self, batch: &[Record]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        let mut guard = self.write();

        for message in batch {
            let Some(key) = MessageKey::from_record(message) else {
                warn!("Skipping message without key.remoteJid / key.id");
                stats.skipped += 1;
                continue;
            };
            guard
                .messages
                .entry(key.remote_jid.0)
                .or_default()
                .insert(key.id, message.clone());
            stats.applied += 1;
        }
        stats
    }

    /// Shallow-merge each partial message into the stored one. Updates for an
    /// unknown conversation or message are dropped.
    pub fn update_messages(&self, batch: &[Record]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        let mut guard = self.write();

        for patch in batch {
            let Some(key) = MessageKey::from_record(patch) else {
                warn!("Skipping message update without key.remoteJid / key.id");
                stats.skipped += 1;
                continue;
            };
            let target = guard
                .messages
                .get_mut(key.remote_jid.as_str())
                .and_then(|conversation| conversation.get_mut(&key.id));

            match target {
                Some(message) => {
                    shallow_merge(message, patch);
                    stats.applied += 1;
                }
                None => {
                    debug!(
                        chat = %key.remote_jid,
                        message = %key.id,
                        "Update for unknown message ignored"
                    );
                    stats.ignored += 1;
                }
            }
        }
        stats
    }

    /// Look up one message. A miss is `None`, never an error.
    pub fn load_message(&self, conversation_id: &str, message_id: &str) -> Option<Record> {
        self.read()
            .messages
            .get(conversation_id)?
            .get(message_id)
            .cloned()
    }

    /// Copies of every message stored for a conversation (empty when the
    /// conversation was never seen).
    pub fn messages_in(&self, conversation_id: &str) -> Vec<Record> {
        self.read()
            .messages
            .get(conversation_id)
            .map(|conversation| conversation.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids of every conversation that has at least one stored message.
    pub fn conversations(&self) -> Vec<String> {
        self.read().messages.keys().cloned().collect()
    }
}
