//! Grid geometry and view limits.

use tabletop_protocol::CellKey;

/// Smallest allowed zoom factor.
pub const MIN_ZOOM: f64 = 0.1;
/// Largest allowed zoom factor.
pub const MAX_ZOOM: f64 = 3.0;
/// Zoom after a view reset.
pub const DEFAULT_ZOOM: f64 = 1.0;

/// Fixed grid geometry of a session. Never resized while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridConfig {
    /// Cells per side.
    pub grid_size: u32,
    /// Side length of one cell in map pixels.
    pub cell_size: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_size: 3,
            cell_size: 1200,
        }
    }
}

impl GridConfig {
    /// Upper bound on the map side in pixels; keeps fog masks allocatable.
    pub const MAX_EXTENT: u32 = 16_384;

    /// Clamps dimensions so the config is safe to use.
    ///
    /// - Both dimensions are at least 1.
    /// - `grid_size * cell_size` is capped at [`Self::MAX_EXTENT`].
    pub fn validated(mut self) -> Self {
        self.grid_size = self.grid_size.clamp(1, Self::MAX_EXTENT);
        self.cell_size = self.cell_size.clamp(1, Self::MAX_EXTENT / self.grid_size);
        self
    }

    /// Map side length in pixels.
    pub fn extent(&self) -> u32 {
        self.grid_size * self.cell_size
    }

    pub fn contains(&self, key: CellKey) -> bool {
        key.x < self.grid_size && key.y < self.grid_size
    }

    /// Cell under a map position, clamped onto the grid.
    pub fn cell_at(&self, x: f64, y: f64) -> CellKey {
        let cell = self.cell_size as f64;
        let last = self.grid_size.saturating_sub(1) as f64;
        let clamp = |v: f64| (v / cell).floor().clamp(0.0, last) as u32;
        CellKey::new(clamp(x), clamp(y))
    }

    /// Snaps a map position to the center of the cell under it.
    pub fn snap(&self, x: f64, y: f64) -> (f64, f64) {
        let key = self.cell_at(x, y);
        let cell = self.cell_size as f64;
        (
            key.x as f64 * cell + cell / 2.0,
            key.y as f64 * cell + cell / 2.0,
        )
    }

    /// Default cursor cell, `(1, 1)` pulled back inside small grids.
    pub fn default_cursor(&self) -> CellKey {
        let last = self.grid_size.saturating_sub(1);
        CellKey::new(1.min(last), 1.min(last))
    }

    /// Clamps a cell onto the grid.
    pub fn clamp_cell(&self, key: CellKey) -> CellKey {
        let last = self.grid_size.saturating_sub(1);
        CellKey::new(key.x.min(last), key.y.min(last))
    }
}
