//! The shared tabletop state document.
//!
//! [`SessionState`] is the canonical document the authority owns: grid
//! cell drawings, locks, fog masks, tokens, images and the view. Every
//! authority operation mutates the document first and then hands back
//! the [`Message`](tabletop_protocol::Message) to broadcast, so the
//! authority is never behind what it sends.
//!
//! Guests hold a [`Replica`], which merges those messages. Raster-bearing
//! messages decode off the event loop and may finish out of order; the
//! replica drops completions that a newer write already superseded.

mod config;
mod error;
mod model;
mod raster;
mod replica;
mod snapshot;

pub use config::{DEFAULT_ZOOM, GridConfig, MAX_ZOOM, MIN_ZOOM};
pub use error::StateError;
pub use model::{BrushMode, Direction, FogBrush, FogGroup, SessionState, ViewState};
pub use raster::{CELL_CHANNELS, FOG_CHANNELS, FOG_HIDDEN, FOG_REVEALED, Raster};
pub use replica::{DecodedBatch, PendingDecode, Receipt, Replica};
