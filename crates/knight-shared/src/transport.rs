use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SendError;
use crate::types::{Jid, MessageKey};

/// Outbound message content. The shape is owned by the transport, so it is
/// carried as an opaque JSON value (`{"text": "..."}` for plain text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendContent(pub Value);

impl SendContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self(serde_json::json!({ "text": text.into() }))
    }
}

/// Per-send options forwarded untouched to the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Message being replied to, if any.
    pub quoted: Option<MessageKey>,
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

/// Delivery acknowledgment returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub key: MessageKey,
    pub sent_at: DateTime<Utc>,
}

impl SendReceipt {
    /// Receipt for a message we just sent to `jid`, with a fresh message id.
    pub fn new_outgoing(jid: &Jid) -> Self {
        Self {
            key: MessageKey {
                remote_jid: jid.clone(),
                id: generate_message_id(),
                from_me: true,
            },
            sent_at: Utc::now(),
        }
    }
}

/// Random upper-case message id, 16 hex chars.
pub fn generate_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_uppercase()
}

/// The transport's "send" operation.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(
        &self,
        jid: &Jid,
        content: &SendContent,
        options: &SendOptions,
    ) -> Result<SendReceipt, SendError>;
}

#[async_trait]
impl<S: MessageSender + ?Sized> MessageSender for std::sync::Arc<S> {
    async fn send(
        &self,
        jid: &Jid,
        content: &SendContent,
        options: &SendOptions,
    ) -> Result<SendReceipt, SendError> {
        (**self).send(jid, content, options).await
    }
}
