//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, wrong types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A cell key was not of the form `"x,y"`.
    #[error("invalid cell key {0:?}")]
    InvalidCellKey(String),

    /// A blob was not valid base64.
    #[error("invalid blob: {0}")]
    InvalidBlob(String),
}
