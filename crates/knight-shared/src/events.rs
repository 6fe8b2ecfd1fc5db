//! Event feed contract between the transport and its consumers.
//!
//! A transport announces state changes as batches of [`Record`]s tagged with
//! an [`EventKind`]. Consumers register handlers through [`EventSource::on`];
//! [`EventEmitter`] is the in-process implementation used by the bot runtime
//! and by tests.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;
use crate::types::Record;

/// Every event kind carried by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "chats.set")]
    ChatsSet,
    #[serde(rename = "chats.update")]
    ChatsUpdate,
    #[serde(rename = "messages.set")]
    MessagesSet,
    #[serde(rename = "messages.update")]
    MessagesUpdate,
    #[serde(rename = "messages.upsert")]
    MessagesUpsert,
    #[serde(rename = "contacts.set")]
    ContactsSet,
    #[serde(rename = "connection.update")]
    ConnectionUpdate,
    #[serde(rename = "error")]
    Error,
}

impl EventKind {
    /// The kinds an event-sourced store projects into its collections.
    pub const STORE_KINDS: [EventKind; 5] = [
        EventKind::ChatsSet,
        EventKind::ChatsUpdate,
        EventKind::MessagesSet,
        EventKind::MessagesUpdate,
        EventKind::ContactsSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatsSet => "chats.set",
            Self::ChatsUpdate => "chats.update",
            Self::MessagesSet => "messages.set",
            Self::MessagesUpdate => "messages.update",
            Self::MessagesUpsert => "messages.upsert",
            Self::ContactsSet => "contacts.set",
            Self::ConnectionUpdate => "connection.update",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chats.set" => Ok(Self::ChatsSet),
            "chats.update" => Ok(Self::ChatsUpdate),
            "messages.set" => Ok(Self::MessagesSet),
            "messages.update" => Ok(Self::MessagesUpdate),
            "messages.upsert" => Ok(Self::MessagesUpsert),
            "contacts.set" => Ok(Self::ContactsSet),
            "connection.update" => Ok(Self::ConnectionUpdate),
            "error" => Ok(Self::Error),
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }
}

/// Callback invoked with each batch of a given kind.
pub type Handler = Box<dyn FnMut(&[Record]) + Send + 'static>;

/// A publish/subscribe source of event batches.
pub trait EventSource {
    /// Register `handler` for every future batch of `kind`.
    fn on(&mut self, kind: EventKind, handler: Handler);
}

/// In-process event source. Handlers run synchronously, in registration
/// order, on the thread that calls [`EventEmitter::emit`].
#[derive(Default)]
pub struct EventEmitter {
    handlers: HashMap<EventKind, Vec<Handler>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `batch` to every handler registered for `kind`.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&mut self, kind: EventKind, batch: &[Record]) -> usize {
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            tracing::trace!(%kind, "No handlers registered");
            return 0;
        };

        for handler in handlers.iter_mut() {
            handler(batch);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl EventSource for EventEmitter {
    fn on(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.entry(kind).or_default().push(handler);
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (kind.as_str(), handlers.len()))
            .collect();
        f.debug_struct("EventEmitter").field("handlers", &counts).finish()
    }
}

/// One line of a serialized event feed:
/// `{"event": "chats.set", "data": [{...}, ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl FeedEvent {
    /// Parse one JSON line of a feed.
    pub fn from_line(line: &str) -> Result<Self, EventError> {
        serde_json::from_str(line).map_err(|e| EventError::Malformed(e.to_string()))
    }

    pub fn kind(&self) -> Result<EventKind, EventError> {
        self.event.parse()
    }

    /// The batch carried by this event.
    ///
    /// An array yields its object entries (other entries are dropped and
    /// counted in the second tuple field); a single object yields a batch of
    /// one; `null` yields an empty batch.
    pub fn records(&self) -> Result<(Vec<Record>, usize), EventError> {
        match &self.data {
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                let mut skipped = 0;
                for item in items {
                    match item {
                        Value::Object(record) => records.push(record.clone()),
                        _ => skipped += 1,
                    }
                }
                Ok((records, skipped))
            }
            Value::Object(record) => Ok((vec![record.clone()], 0)),
            Value::Null => Ok((Vec::new(), 0)),
            other => Err(EventError::Malformed(format!(
                "expected array or object payload, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_kind_names_round_trip() {
        for kind in EventKind::STORE_KINDS {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!(matches!(
            "chats.delete".parse::<EventKind>(),
            Err(EventError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_emit_runs_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut emitter = EventEmitter::new();

        for tag in ["first", "second"] {
            let seen = seen.clone();
            emitter.on(
                EventKind::ChatsSet,
                Box::new(move |batch| seen.lock().unwrap().push((tag, batch.len()))),
            );
        }

        let invoked = emitter.emit(EventKind::ChatsSet, &[Record::new(), Record::new()]);
        assert_eq!(invoked, 2);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 2), ("second", 2)]);
    }

    #[test]
    fn test_emit_without_handlers() {
        let mut emitter = EventEmitter::new();
        assert_eq!(emitter.emit(EventKind::ContactsSet, &[]), 0);
        assert_eq!(emitter.handler_count(EventKind::ContactsSet), 0);
    }

    #[test]
    fn test_feed_line_records() {
        let event = FeedEvent::from_line(
            r#"{"event":"chats.set","data":[{"id":"1@g.us"},42,{"id":"2@g.us"}]}"#,
        )
        .unwrap();
        assert_eq!(event.kind().unwrap(), EventKind::ChatsSet);

        let (records, skipped) = event.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_feed_line_single_object_and_bad_payload() {
        let event =
            FeedEvent::from_line(r#"{"event":"connection.update","data":{"connection":"open"}}"#)
                .unwrap();
        assert_eq!(event.records().unwrap().0.len(), 1);

        let bad = FeedEvent::from_line(r#"{"event":"chats.set","data":"nope"}"#).unwrap();
        assert!(bad.records().is_err());

        assert!(FeedEvent::from_line("not json").is_err());
    }
}
