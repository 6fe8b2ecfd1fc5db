use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A protocol record: a JSON object mapping field names to values.
pub type Record = Map<String, Value>;

/// Suffix carried by group conversation identifiers.
pub const GROUP_SUFFIX: &str = "@g.us";

// Conversation / contact identifier, e.g. `911234567890@s.whatsapp.net`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(GROUP_SUFFIX)
    }

    /// The user part: everything before the first `:` (device) or `@` (server).
    pub fn user(&self) -> &str {
        let end = self.0.find([':', '@']).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Jid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Jid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The composite identity of a message: conversation plus message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub id: String,
    pub from_me: bool,
}

impl MessageKey {
    /// Extract the key from a message record's `key` object.
    ///
    /// Returns `None` when `key`, `key.remoteJid` or `key.id` is missing or
    /// not a string.
    pub fn from_record(record: &Record) -> Option<Self> {
        let key = record.get("key")?.as_object()?;
        let remote_jid = key.get("remoteJid")?.as_str()?;
        let id = key.get("id")?.as_str()?;
        let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);

        Some(Self {
            remote_jid: Jid::new(remote_jid),
            id: id.to_string(),
            from_me,
        })
    }
}

/// Read the string `id` field shared by chat and contact records.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get("id")?.as_str()
}

/// Overwrite the fields of `target` with those present in `patch`.
///
/// Fields absent from `patch` are left untouched; nested objects are
/// replaced wholesale, not merged.
pub fn shallow_merge(target: &mut Record, patch: &Record) {
    for (field, value) in patch {
        target.insert(field.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_jid_group_and_user() {
        let group = Jid::from("123@g.us");
        assert!(group.is_group());
        assert_eq!(group.user(), "123");

        let device = Jid::from("911234567890:12@s.whatsapp.net");
        assert!(!device.is_group());
        assert_eq!(device.user(), "911234567890");

        assert_eq!(Jid::from("bare").user(), "bare");
    }

    #[test]
    fn test_message_key_from_record() {
        let msg = record(json!({"key": {"remoteJid": "A", "id": "m1", "fromMe": true}}));
        let key = MessageKey::from_record(&msg).unwrap();
        assert_eq!(key.remote_jid, Jid::from("A"));
        assert_eq!(key.id, "m1");
        assert!(key.from_me);
    }

    #[test]
    fn test_message_key_missing_fields() {
        assert!(MessageKey::from_record(&record(json!({"text": "hi"}))).is_none());
        assert!(MessageKey::from_record(&record(json!({"key": {"remoteJid": "A"}}))).is_none());
        assert!(MessageKey::from_record(&record(json!({"key": {"remoteJid": 7, "id": "m1"}}))).is_none());
    }

    #[test]
    fn test_shallow_merge_keeps_absent_fields() {
        let mut target = record(json!({"a": 1, "b": 2}));
        shallow_merge(&mut target, &record(json!({"b": 3, "c": 4})));
        assert_eq!(Value::Object(target), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_shallow_merge_replaces_nested_objects() {
        let mut target = record(json!({"meta": {"x": 1, "y": 2}}));
        shallow_merge(&mut target, &record(json!({"meta": {"x": 5}})));
        assert_eq!(target["meta"], json!({"x": 5}));
    }
}
