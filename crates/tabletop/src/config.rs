//! Session-wide configuration.

use tabletop_persist::LifecycleConfig;
use tabletop_state::GridConfig;

/// Everything a session needs to know up front.
///
/// Guests must use the same [`GridConfig`] as the authority they join,
/// since raster shapes are checked against it.
#[derive(Debug, Clone, Default)]
pub struct TabletopConfig {
    pub grid: GridConfig,
    pub lifecycle: LifecycleConfig,
}

impl TabletopConfig {
    /// Clamps both halves into safe ranges.
    pub fn validated(self) -> Self {
        Self {
            grid: self.grid.validated(),
            lifecycle: self.lifecycle.validated(),
        }
    }
}
