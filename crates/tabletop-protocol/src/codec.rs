//! Codec trait and implementations for serializing frames.
//!
//! A codec converts between Rust types and raw bytes. The session runtime
//! is generic over [`Codec`], so a binary format can replace JSON without
//! touching anything above this crate.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the codec lives inside long-running
/// actor tasks and is shared with per-connection tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Frames stay human-readable, which keeps traffic easy to inspect.
///
/// ```rust
/// use tabletop_protocol::{Codec, Envelope, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let envelope = Envelope::new(1, 5000, Message::ClearTokens);
///
/// let bytes = codec.encode(&envelope).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(envelope, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
