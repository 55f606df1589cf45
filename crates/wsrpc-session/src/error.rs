//! Error types for the session layer.

use std::time::Duration;

use serde_json::Value;
use wsrpc_protocol::{ErrorObject, ProtocolError, RequestId};
use wsrpc_transport::TransportError;

/// Why an outgoing call (or notification) failed.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The connection is not open yet, or is reconnecting.
    #[error("socket not ready")]
    NotReady,

    /// No reply arrived in time. A late reply is discarded.
    #[error("request '{method}' timed out after {}ms", .after.as_millis())]
    Timeout {
        method: String,
        params: Option<Value>,
        after: Duration,
    },

    /// The peer answered with an error object.
    #[error("remote error: {0}")]
    Remote(ErrorObject),

    /// The connection closed before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The id generator produced an id that is still waiting for a reply.
    /// The earlier call is unaffected.
    #[error("request id {0} is already pending")]
    DuplicateId(RequestId),

    /// The method name does not fit the call kind (`rpc.` prefix on a
    /// public call, or missing on an internal one).
    #[error("'{0}' is not a valid name for this call")]
    InvalidMethod(String),

    /// The request could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Writing the frame failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CallError {
    /// The remote error object, if the peer answered with one.
    pub fn remote(&self) -> Option<&ErrorObject> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}
