//! # knight-store
//!
//! In-memory event-sourced store for the Knight bot.
//!
//! The store binds to an [`EventSource`](knight_shared::EventSource) and
//! projects five event kinds into three keyed collections: chats, messages
//! per conversation, and contacts. Snapshots (`*.set`) insert or overwrite,
//! updates (`*.update`) shallow-merge into existing entries only, and lookups
//! hand out copies. Optional JSON snapshots back the `write_to_file` /
//! `read_from_file` hooks.

pub mod chats;
pub mod contacts;
pub mod messages;
pub mod models;
pub mod snapshot;
pub mod store;

mod error;

pub use error::{Result, StoreError};
pub use models::*;
pub use snapshot::{default_snapshot_path, RestoreStats, SnapshotPayload};
pub use store::InMemoryStore;
