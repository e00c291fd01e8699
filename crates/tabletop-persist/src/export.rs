//! The standalone session file.
//!
//! An export is the snapshot layout plus a `timestamp`, pretty-printed so
//! it can be inspected or hand-edited. Import accepts that shape, with the
//! timestamp optional.

use serde::{Deserialize, Serialize};
use tabletop_protocol::Snapshot;

use crate::PersistError;

/// A parsed session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

#[derive(Serialize)]
struct ExportRef<'a> {
    timestamp: u64,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

/// Renders a snapshot as a session file.
pub fn export_session(snapshot: &Snapshot, now_ms: u64) -> Result<String, PersistError> {
    let doc = ExportRef {
        timestamp: now_ms,
        snapshot,
    };
    serde_json::to_string_pretty(&doc).map_err(PersistError::Encode)
}

/// Parses a session file. The caller restores the snapshot.
pub fn import_session(document: &str) -> Result<SessionExport, PersistError> {
    serde_json::from_str(document).map_err(PersistError::Corrupt)
}

/// Suggested file name for an export taken at `now_ms`.
pub fn export_file_name(now_ms: u64) -> String {
    format!("tabletop-session-{now_ms}.json")
}
