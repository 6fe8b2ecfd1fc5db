//! # knight-shared
//!
//! Types shared by the Knight bot crates: identifiers and JSON records, the
//! event feed contract, the transport send contract, errors and constants.

pub mod constants;
pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{EventError, SendError};
pub use events::{EventEmitter, EventKind, EventSource, FeedEvent, Handler};
pub use transport::{MessageSender, SendContent, SendOptions, SendReceipt};
pub use types::{Jid, MessageKey, Record};
