//! `contacts.set` handling. Contacts have no incremental update path.

use knight_shared::types::record_id;
use knight_shared::Record;
use tracing::warn;

use crate::models::ApplyStats;
use crate::store::InMemoryStore;

impl InMemoryStore {
    pub fn set_contacts(&self, batch: &[Record]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        let mut guard = self.write();

        for contact in batch {
            let Some(id) = record_id(contact) else {
                warn!("Skipping contact without a string id");
                stats.skipped += 1;
                continue;
            };
            guard.contacts.insert(id.to_string(), contact.clone());
            stats.applied += 1;
        }
        stats
    }

    pub fn contact(&self, id: &str) -> Option<Record> {
        self.read().contacts.get(id).cloned()
    }

    pub fn contacts(&self) -> Vec<Record> {
        self.read().contacts.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knight_shared::EventKind;
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
    fn set_inserts_and_overwrites() {
        let store = InMemoryStore::new();
        store.set_contacts(&batch(json!([{"id": "c1", "name": "Ann", "notify": "A"}])));
        store.set_contacts(&batch(json!([{"id": "c1", "name": "Anna"}])));

        assert_eq!(
            Value::Object(store.contact("c1").unwrap()),
            json!({"id": "c1", "name": "Anna"})
        );
        assert_eq!(store.contacts().len(), 1);
    }

    #[test]
    fn skips_contacts_without_id() {
        let store = InMemoryStore::new();
        let stats = store.set_contacts(&batch(json!([{"name": "ghost"}, {"id": "c2"}])));
        assert_eq!(stats.skipped, 1);
        assert!(store.contact("c2").is_some());
    }

    #[test]
    fn chat_update_kind_does_not_touch_contacts() {
        let store = InMemoryStore::new();
        store.set_contacts(&batch(json!([{"id": "c1", "name": "Ann"}])));
        store.apply(EventKind::ChatsUpdate, &batch(json!([{"id": "c1", "name": "Changed"}])));

        assert_eq!(store.contact("c1").unwrap()["name"], "Ann");
    }
}
