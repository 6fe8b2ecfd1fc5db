//! The store handle and its event binding.
//!
//! [`InMemoryStore`] is a cheap, cloneable handle around the shared
//! [`Collections`]. Clones registered as event handlers and clones held by
//! query callers all see the same state. Collection-specific operations live
//! in `chats.rs`, `messages.rs` and `contacts.rs`.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use knight_shared::{EventKind, EventSource, Record};
use tracing::{debug, info};

use crate::models::{ApplyStats, Collections, StoreMode, StoreSizes};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Collections>>,
    mode: StoreMode,
}

impl InMemoryStore {
    /// Create an empty store whose persistence hooks are no-ops.
    pub fn new() -> Self {
        Self::with_mode(StoreMode::Memory)
    }

    pub fn with_mode(mode: StoreMode) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Collections::default())),
            mode,
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Register handlers for the five store event kinds on `source`.
    ///
    /// Binding twice (to the same or another source) registers the handlers
    /// twice.
    pub fn bind<S: EventSource + ?Sized>(&self, source: &mut S) {
        for kind in EventKind::STORE_KINDS {
            let store = self.clone();
            source.on(
                kind,
                Box::new(move |batch| {
                    store.apply(kind, batch);
                }),
            );
        }
        debug!("Store bound to event source");
    }

    /// Apply one batch of `kind`. Kinds the store does not project are
    /// ignored and yield empty stats.
    pub fn apply(&self, kind: EventKind, batch: &[Record]) -> ApplyStats {
        let stats = match kind {
            EventKind::ChatsSet => self.set_chats(batch),
            EventKind::ChatsUpdate => self.update_chats(batch),
            EventKind::MessagesSet => self.set_messages(batch),
            EventKind::MessagesUpdate => self.update_messages(batch),
            EventKind::ContactsSet => self.set_contacts(batch),
            _ => return ApplyStats::default(),
        };

        debug!(
            %kind,
            applied = stats.applied,
            ignored = stats.ignored,
            skipped = stats.skipped,
            "Applied batch"
        );
        stats
    }

    pub fn sizes(&self) -> StoreSizes {
        let guard = self.read();
        StoreSizes {
            chats: guard.chats.len(),
            conversations: guard.messages.len(),
            messages: guard.message_count(),
            contacts: guard.contacts.len(),
        }
    }

    /// Owned copy of all three collections.
    pub fn collections(&self) -> Collections {
        self.read().clone()
    }

    /// Drop every entry. Event handling never calls this.
    pub fn clear(&self) -> StoreSizes {
        let before = self.sizes();
        *self.write() = Collections::default();
        info!(
            chats = before.chats,
            messages = before.messages,
            contacts = before.contacts,
            "Store cleared"
        );
        before
    }

    // Every mutation is a single map operation; a poisoned lock still holds
    // consistent collections.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
