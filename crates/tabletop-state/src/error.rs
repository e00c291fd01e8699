use tabletop_protocol::{CellKey, GroupId, ProtocolError, TokenId};

/// Errors raised by state operations and snapshot restoration.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A cell key lies outside the fixed grid.
    #[error("cell {0} is outside the grid")]
    CellOutOfBounds(CellKey),

    /// No staging token with this id.
    #[error("token {0} is not in staging")]
    UnknownToken(TokenId),

    /// The same token id appears more than once across the sequences.
    #[error("token {0} appears more than once")]
    DuplicateToken(TokenId),

    #[error("fog group {0} does not exist")]
    UnknownFogGroup(GroupId),

    #[error("fog group {0} already exists")]
    DuplicateFogGroup(GroupId),

    /// The `everyone` group cannot be deleted.
    #[error("fog group {0} is protected")]
    ProtectedFogGroup(GroupId),

    #[error("fog group name {0:?} is blank")]
    InvalidFogGroupName(String),

    /// A raster blob is not a valid encoded raster.
    #[error("corrupt raster: {0}")]
    CorruptRaster(String),

    /// A raster decoded fine but has the wrong dimensions for its slot.
    #[error("raster is {found:?}, expected {expected:?} (width, height, channels)")]
    RasterShape {
        expected: (u32, u32, u8),
        found: (u32, u32, u8),
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
