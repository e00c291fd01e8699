//! Lifecycle timing.

use std::time::Duration;

/// Timing of captures and their expiry.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Period between automatic captures. Zero disables autosave.
    pub autosave_interval: Duration,
    /// Age at which a stored capture counts as absent.
    pub snapshot_ttl: Duration,
    /// How long the authority may sit with zero connections before its
    /// capture is deleted.
    pub idle_eviction: Duration,
    /// Prefix of storage keys; the session id is appended.
    pub key_prefix: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(30),
            snapshot_ttl: Duration::from_secs(30 * 60),
            idle_eviction: Duration::from_secs(5 * 60),
            key_prefix: "tabletop_session_".to_owned(),
        }
    }
}

impl LifecycleConfig {
    /// Fixes values that would make the lifecycle misbehave.
    ///
    /// - A zero TTL would expire every capture on read; it falls back to
    ///   the default.
    /// - A zero idle window would evict the instant the last guest
    ///   leaves; it is raised to one second.
    pub fn validated(mut self) -> Self {
        if self.snapshot_ttl.is_zero() {
            tracing::warn!("snapshot_ttl of zero, using default");
            self.snapshot_ttl = Self::default().snapshot_ttl;
        }
        if self.idle_eviction.is_zero() {
            self.idle_eviction = Duration::from_secs(1);
        }
        self
    }
}
