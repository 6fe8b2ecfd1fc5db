//! Full-snapshot persistence and the `write_to_file` / `read_from_file`
//! hooks.
//!
//! A snapshot is one JSON document holding every chat, message and contact
//! record. Restoring replays it through the `*.set` paths, so it is additive
//! and skips malformed records exactly like live events.

use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use knight_shared::Record;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::models::{ApplyStats, StoreMode};
use crate::store::InMemoryStore;

/// Snapshot format version written by this crate.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Serialized store contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub format: u32,
    /// ISO 8601 timestamp of when the snapshot was taken
    pub created_at: String,
    /// App version that produced the snapshot
    pub version: String,
    pub chats: Vec<Record>,
    /// Flat list; each message carries its own `key`.
    pub messages: Vec<Record>,
    pub contacts: Vec<Record>,
}

/// Records restored per collection by [`InMemoryStore::load_snapshot`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreStats {
    pub chats: ApplyStats,
    pub messages: ApplyStats,
    pub contacts: ApplyStats,
}

/// Default snapshot location in the platform data directory:
/// - Linux:   `~/.local/share/knight-bot/store.json`
/// - macOS:   `~/Library/Application Support/com.knight.knight-bot/store.json`
/// - Windows: `{FOLDERID_RoamingAppData}\knight\knight-bot\data\store.json`
pub fn default_snapshot_path() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("com", "knight", "knight-bot").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join("store.json"))
}

impl InMemoryStore {
    /// Capture every collection into a serializable payload.
    pub fn export_snapshot(&self) -> SnapshotPayload {
        let guard = self.read();

        SnapshotPayload {
            format: SNAPSHOT_FORMAT,
            created_at: chrono::Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            chats: guard.chats.values().cloned().collect(),
            messages: guard
                .messages
                .values()
                .flat_map(|conversation| conversation.values().cloned())
                .collect(),
            contacts: guard.contacts.values().cloned().collect(),
        }
    }

    /// Merge a payload into the store through the `*.set` paths.
    pub fn import_snapshot(&self, payload: &SnapshotPayload) -> Result<RestoreStats> {
        if payload.format > SNAPSHOT_FORMAT {
            return Err(StoreError::InvalidSnapshot(format!(
                "format {} is newer than supported format {}",
                payload.format, SNAPSHOT_FORMAT
            )));
        }

        Ok(RestoreStats {
            chats: self.set_chats(&payload.chats),
            messages: self.set_messages(&payload.messages),
            contacts: self.set_contacts(&payload.contacts),
        })
    }

    /// Write a snapshot to `path`, creating parent directories. Each call
    /// writes its own uniquely named file beside the target and renames it
    /// into place, so concurrent writers never share a partial file.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let payload = self.export_snapshot();
        let bytes = serde_json::to_vec(&payload)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

        info!(
            path = %path.display(),
            chats = payload.chats.len(),
            messages = payload.messages.len(),
            contacts = payload.contacts.len(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Read a snapshot from `path` and merge it into the store.
    pub fn load_snapshot(&self, path: &Path) -> Result<RestoreStats> {
        let bytes = std::fs::read(path)?;
        let payload: SnapshotPayload = serde_json::from_slice(&bytes)?;
        let stats = self.import_snapshot(&payload)?;

        info!(
            path = %path.display(),
            chats = stats.chats.applied,
            messages = stats.messages.applied,
            contacts = stats.contacts.applied,
            "Snapshot restored"
        );
        Ok(stats)
    }

    /// Persistence hook. In [`StoreMode::Memory`] it only logs; in
    /// [`StoreMode::Snapshot`] it saves, logging any failure.
    pub fn write_to_file(&self, path: &Path) {
        match self.mode() {
            StoreMode::Memory => {
                info!(path = %path.display(), "In-memory store: write_to_file called");
            }
            StoreMode::Snapshot => {
                if let Err(e) = self.save_snapshot(path) {
                    warn!(path = %path.display(), error = %e, "Failed to write store snapshot");
                }
            }
        }
    }

    /// Persistence hook. In [`StoreMode::Memory`] it only logs; in
    /// [`StoreMode::Snapshot`] it restores, logging any failure. A missing
    /// file is normal on first start.
    pub fn read_from_file(&self, path: &Path) {
        match self.mode() {
            StoreMode::Memory => {
                info!(path = %path.display(), "In-memory store: read_from_file called");
            }
            StoreMode::Snapshot => match self.load_snapshot(path) {
                Ok(_) => {}
                Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(path = %path.display(), "No store snapshot yet");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read store snapshot");
                }
            },
        }
    }
}
