//! Error types for the protocol layer.
//!
//! A `ProtocolError` is a *local* failure: a value could not be turned into
//! bytes or back. Frames that decode fine but break JSON-RPC rules are
//! answered on the wire instead, through [`ParseError`](crate::ParseError).

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a value).
    ///
    /// Common causes: malformed JSON, truncated frames, or a payload that
    /// does not match the requested type.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A cyclic-graph encoding could not be rebuilt (dangling reference,
    /// wrong node kind) or a cyclic graph was flattened into a tree.
    #[error("invalid object graph: {0}")]
    Graph(String),
}
