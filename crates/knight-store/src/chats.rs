//! `chats.set` / `chats.update` handling and chat reads.

use knight_shared::types::{record_id, shallow_merge};
use knight_shared::Record;
use tracing::{debug, warn};

use crate::models::ApplyStats;
use crate::store::InMemoryStore;

impl InMemoryStore {
    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Insert or overwrite each chat by id. Chats absent from the batch are
    /// kept.
    pub fn set_chats(&self, batch: &[Record]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        let mut guard = self.write();

        for chat in batch {
            let Some(id) = record_id(chat) else {
                warn!("Skipping chat without a string id");
                stats.skipped += 1;
                continue;
            };
            guard.chats.insert(id.to_string(), chat.clone());
            stats.applied += 1;
        }
        stats
    }

    /// Shallow-merge each partial chat into the stored one. Unknown ids are
    /// dropped.
    pub fn update_chats(&self, batch: &[Record]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        let mut guard = self.write();

        for patch in batch {
            let Some(id) = record_id(patch) else {
                warn!("Skipping chat update without a string id");
                stats.skipped += 1;
                continue;
            };
            match guard.chats.get_mut(id) {
                Some(chat) => {
                    shallow_merge(chat, patch);
                    stats.applied += 1;
                }
                None => {
                    debug!(chat = id, "Update for unknown chat ignored");
                    stats.ignored += 1;
                }
            }
        }
        stats
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn chat(&self, id: &str) -> Option<Record> {
        self.read().chats.get(id).cloned()
    }

    /// Copies of every stored chat, in no particular order.
    pub fn chats(&self) -> Vec<Record> {
        self.read().chats.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn batch(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn set_keeps_every_field() {
        let store = InMemoryStore::new();
        let chats = batch(json!([
            {"id": "1@g.us", "name": "One", "unreadCount": 2, "archived": false},
            {"id": "2@s.whatsapp.net", "conversationTimestamp": 1700000000}
        ]));
        store.set_chats(&chats);

        for chat in &chats {
            let id = chat["id"].as_str().unwrap();
            assert_eq!(store.chat(id).as_ref(), Some(chat));
        }
    }

    #[test]
    fn set_is_additive() {
        let store = InMemoryStore::new();
        store.set_chats(&batch(json!([{"id": "old"}])));
        store.set_chats(&batch(json!([{"id": "new"}])));

        assert!(store.chat("old").is_some());
        assert!(store.chat("new").is_some());
    }

    #[test]
    fn set_overwrites_whole_record() {
        let store = InMemoryStore::new();
        store.set_chats(&batch(json!([{"id": "x", "name": "A", "pinned": true}])));
        store.set_chats(&batch(json!([{"id": "x", "name": "B"}])));

        assert_eq!(Value::Object(store.chat("x").unwrap()), json!({"id": "x", "name": "B"}));
    }

    #[test]
    fn set_twice_is_idempotent() {
        let once = InMemoryStore::new();
        let twice = InMemoryStore::new();
        let chats = batch(json!([{"id": "a", "n": 1}, {"id": "b", "n": 2}]));

        once.set_chats(&chats);
        twice.set_chats(&chats);
        twice.set_chats(&chats);

        assert_eq!(once.collections(), twice.collections());
    }

    #[test]
    fn update_merges_shallowly() {
        let store = InMemoryStore::new();
        store.set_chats(&batch(json!([{"id": "k", "a": 1, "b": 2}])));
        let stats = store.update_chats(&batch(json!([{"id": "k", "b": 3, "c": 4}])));

        assert_eq!(stats.applied, 1);
        assert_eq!(
            Value::Object(store.chat("k").unwrap()),
            json!({"id": "k", "a": 1, "b": 3, "c": 4})
        );
    }

    #[test]
    fn update_team_chat_scenario() {
        let store = InMemoryStore::new();
        store.set_chats(&batch(json!([{"id": "123@g.us", "name": "Team"}])));
        store.update_chats(&batch(json!([{"id": "123@g.us", "unread": 5}])));

        assert_eq!(
            Value::Object(store.chat("123@g.us").unwrap()),
            json!({"id": "123@g.us", "name": "Team", "unread": 5})
        );
    }

    #[test]
    fn update_for_unknown_chat_creates_nothing() {
        let store = InMemoryStore::new();
        store.set_chats(&batch(json!([{"id": "known"}])));
        let before = store.collections();

        let stats = store.update_chats(&batch(json!([{"id": "unknown", "name": "X"}])));

        assert_eq!(stats.ignored, 1);
        assert!(store.chat("unknown").is_none());
        assert_eq!(store.collections(), before);
    }

    #[test]
    fn malformed_records_do_not_abort_batch() {
        let store = InMemoryStore::new();
        let stats = store.set_chats(&batch(json!([
            {"name": "no id"},
            {"id": 42},
            {"id": "ok"}
        ])));

        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.applied, 1);
        assert!(store.chat("ok").is_some());
    }

    #[test]
    fn reads_are_copies() {
        let store = InMemoryStore::new();
        store.set_chats(&batch(json!([{"id": "x", "name": "A"}])));

        let mut copy = store.chat("x").unwrap();
        copy.insert("name".into(), json!("mutated"));
        for mut chat in store.chats() {
            chat.clear();
        }

        assert_eq!(store.chat("x").unwrap()["name"], "A");
    }
}
