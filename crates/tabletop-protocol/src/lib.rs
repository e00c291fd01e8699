//! Wire protocol for tabletop sessions.
//!
//! This crate defines what travels between the authority and its guests:
//!
//! - **Types** ([`CellKey`], [`Token`], [`Snapshot`], ...): the shared
//!   vocabulary of the state document and its persisted layout.
//! - **Messages** ([`Message`], [`Envelope`]): the replication message
//!   set and the sequence-stamped frame they travel in.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer knows nothing about connections or who is allowed
//! to send what at runtime; it only describes and serializes.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope<Message>) → State / Session
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod message;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{Envelope, Message};
pub use types::{
    Blob, CellKey, CursorCell, FogGroupSnapshot, GroupId, PlacedImage, Snapshot, Token, TokenId,
};
