//! Inbound message guard: drops oversized texts and flooding senders before
//! anything downstream sees them.

use knight_shared::constants::MAX_INBOUND_TEXT_CHARS;
use knight_shared::{Jid, MessageKey, Record};
use serde_json::Value;
use tracing::warn;

use crate::rate_limit::WindowLimiter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Oversized { chars: usize },
    RateLimited { sender: Jid },
    /// The record has no usable message key.
    Malformed,
}

#[derive(Clone)]
pub struct InputGuard {
    limiter: WindowLimiter,
    max_chars: usize,
}

impl InputGuard {
    pub fn new(limiter: WindowLimiter, max_chars: usize) -> Self {
        Self { limiter, max_chars }
    }

    pub fn limiter(&self) -> &WindowLimiter {
        &self.limiter
    }

    pub async fn check(&self, message: &Record) -> Verdict {
        let Some(key) = MessageKey::from_record(message) else {
            return Verdict::Malformed;
        };

        if let Some(text) = message_text(message) {
            let chars = text.chars().count();
            if chars > self.max_chars {
                warn!(chat = %key.remote_jid, chars, "Blocked oversized message");
                return Verdict::Oversized { chars };
            }
        }

        // Our own messages are never throttled.
        if key.from_me {
            return Verdict::Accept;
        }

        let sender = message_sender(message, &key);
        if self.limiter.is_limited(&sender).await {
            return Verdict::RateLimited { sender };
        }
        Verdict::Accept
    }
}

impl Default for InputGuard {
    fn default() -> Self {
        Self::new(WindowLimiter::default(), MAX_INBOUND_TEXT_CHARS)
    }
}

/// Text carried by a message record, looked up in the usual content slots.
pub fn message_text(message: &Record) -> Option<&str> {
    let content = message.get("message").and_then(Value::as_object);

    let from_content = content.and_then(|c| {
        c.get("conversation")
            .and_then(Value::as_str)
            .or_else(|| pointer_str(c, &["extendedTextMessage", "text"]))
            .or_else(|| pointer_str(c, &["imageMessage", "caption"]))
            .or_else(|| pointer_str(c, &["videoMessage", "caption"]))
    });

    from_content.or_else(|| message.get("text").and_then(Value::as_str))
}

/// The participant in a group, otherwise the chat itself.
pub fn message_sender(message: &Record, key: &MessageKey) -> Jid {
    message
        .get("key")
        .and_then(|k| k.get("participant"))
        .or_else(|| message.get("participant"))
        .and_then(Value::as_str)
        .map(Jid::from)
        .unwrap_or_else(|| key.remote_jid.clone())
}

fn pointer_str<'a>(object: &'a Record, path: &[&str]) -> Option<&'a str> {
    let (first, rest) = path.split_first()?;
    let mut value = object.get(*first)?;
    for segment in rest {
        value = value.get(*segment)?;
    }
    value.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_message_text_slots() {
        let cases = [
            (json!({"message": {"conversation": "plain"}}), Some("plain")),
            (json!({"message": {"extendedTextMessage": {"text": "ext"}}}), Some("ext")),
            (json!({"message": {"imageMessage": {"caption": "img"}}}), Some("img")),
            (json!({"message": {"videoMessage": {"caption": "vid"}}}), Some("vid")),
            (json!({"text": "top"}), Some("top")),
            (json!({"message": {"stickerMessage": {}}}), None),
        ];
        for (value, expected) in cases {
            assert_eq!(message_text(&record(value)), expected);
        }
    }

    #[test]
    fn test_message_sender_prefers_participant() {
        let group = record(json!({"key": {"remoteJid": "1@g.us", "id": "m", "participant": "p@s"}}));
        let key = MessageKey::from_record(&group).unwrap();
        assert_eq!(message_sender(&group, &key), Jid::from("p@s"));

        let direct = record(json!({"key": {"remoteJid": "d@s", "id": "m"}}));
        let key = MessageKey::from_record(&direct).unwrap();
        assert_eq!(message_sender(&direct, &key), Jid::from("d@s"));
    }

    #[tokio::test]
    async fn test_guard_blocks_oversized() {
        let guard = InputGuard::new(WindowLimiter::default(), 5);
        let message = record(json!({"key": {"remoteJid": "a", "id": "m"}, "text": "toolong"}));
        assert_eq!(guard.check(&message).await, Verdict::Oversized { chars: 7 });
    }

    #[tokio::test]
    async fn test_guard_rate_limits_sender() {
        let guard = InputGuard::new(WindowLimiter::new(2, Duration::from_secs(60)), 100);
        let message = record(json!({"key": {"remoteJid": "a", "id": "m"}, "text": "hi"}));

        assert_eq!(guard.check(&message).await, Verdict::Accept);
        assert_eq!(guard.check(&message).await, Verdict::Accept);
        assert_eq!(
            guard.check(&message).await,
            Verdict::RateLimited { sender: Jid::from("a") }
        );
    }

    #[tokio::test]
    async fn test_guard_never_limits_own_messages() {
        let guard = InputGuard::new(WindowLimiter::new(0, Duration::from_secs(60)), 100);
        let mine = record(json!({"key": {"remoteJid": "a", "id": "m", "fromMe": true}}));
        assert_eq!(guard.check(&mine).await, Verdict::Accept);
    }

    #[tokio::test]
    async fn test_guard_malformed() {
        let guard = InputGuard::default();
        assert_eq!(guard.check(&record(json!({"text": "hi"}))).await, Verdict::Malformed);
    }
}
