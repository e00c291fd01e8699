/// Errors from storage and (de)serialization of captures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The backing store failed.
    #[error("storage failed: {0}")]
    Storage(#[source] std::io::Error),

    /// A capture could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored capture or imported document is not valid.
    #[error("corrupt session document: {0}")]
    Corrupt(#[source] serde_json::Error),
}
