//! Durable captures of the session document and the timers around them.
//!
//! - [`KeyValueStore`]: synchronous string storage ([`MemoryStore`],
//!   [`FileStore`]).
//! - [`SnapshotArchive`]: timestamped captures keyed by session id,
//!   treated as absent (and deleted) once older than the TTL.
//! - [`export_session`] / [`import_session`]: the standalone session file.
//! - [`AutosaveTimer`] / [`IdleTimer`]: futures that sit in the
//!   authority's `tokio::select!` loop and pend forever while disarmed.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = commands.recv() => { /* mutate, broadcast, save */ }
//!         _ = autosave.tick() => archive.save(&id, &state.snapshot(), unix_millis())?,
//!         _ = idle.expired() => archive.delete(&id)?,
//!     }
//! }
//! ```

mod archive;
mod config;
mod error;
mod export;
mod store;
mod timers;

pub use archive::{PersistedSnapshot, SnapshotArchive};
pub use config::LifecycleConfig;
pub use error::PersistError;
pub use export::{SessionExport, export_file_name, export_session, import_session};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use timers::{AutosaveTimer, IdleTimer, unix_millis};
