//! Timestamped session captures with read-time expiry.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tabletop_protocol::Snapshot;

use crate::{KeyValueStore, LifecycleConfig, PersistError};

/// A capture as stored: the snapshot plus who and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub session_id: String,
    /// Capture time, unix millis.
    pub timestamp: u64,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Borrowed twin of [`PersistedSnapshot`] so saving never clones rasters.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRef<'a> {
    session_id: &'a str,
    timestamp: u64,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

/// Reads and writes captures in a [`KeyValueStore`].
pub struct SnapshotArchive<S> {
    store: S,
    key_prefix: String,
    ttl: Duration,
}

impl<S: KeyValueStore> SnapshotArchive<S> {
    pub fn new(store: S, config: &LifecycleConfig) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            ttl: config.snapshot_ttl,
        }
    }

    /// Storage key of a session's capture.
    pub fn key(&self, session_id: &str) -> String {
        format!("{}{session_id}", self.key_prefix)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Writes a capture, overwriting any previous one for the session.
    pub fn save(&self, session_id: &str, snapshot: &Snapshot, now_ms: u64) -> Result<(), PersistError> {
        let doc = PersistedRef {
            session_id,
            timestamp: now_ms,
            snapshot,
        };
        let json = serde_json::to_string(&doc).map_err(PersistError::Encode)?;
        self.store.set(&self.key(session_id), &json)?;
        tracing::debug!(%session_id, bytes = json.len(), "snapshot saved");
        Ok(())
    }

    /// Reads a capture.
    ///
    /// Returns `Ok(None)` when there is none, and also when it is at least
    /// `ttl` old, in which case it is deleted as well. A capture that does
    /// not parse is an error, not an absence.
    pub fn load(&self, session_id: &str, now_ms: u64) -> Result<Option<PersistedSnapshot>, PersistError> {
        let key = self.key(session_id);
        let Some(json) = self.store.get(&key)? else {
            return Ok(None);
        };
        let persisted: PersistedSnapshot =
            serde_json::from_str(&json).map_err(PersistError::Corrupt)?;

        let age = Duration::from_millis(now_ms.saturating_sub(persisted.timestamp));
        if age >= self.ttl {
            tracing::info!(%session_id, age_secs = age.as_secs(), "snapshot expired");
            self.store.delete(&key)?;
            return Ok(None);
        }
        Ok(Some(persisted))
    }

    pub fn delete(&self, session_id: &str) -> Result<(), PersistError> {
        self.store.delete(&self.key(session_id))?;
        tracing::debug!(%session_id, "snapshot deleted");
        Ok(())
    }
}
