//! Unified error type for wsrpc.

use wsrpc_namespace::NamespaceError;
use wsrpc_protocol::ProtocolError;
use wsrpc_session::CallError;
use wsrpc_transport::{ConnectionId, TransportError};

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `wsrpc` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum WsrpcError {
    /// A transport-level error (bind, connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A namespace-level error (invalid or reserved name, closed).
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// An outgoing call or notification failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// No live session for that connection.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The peer refused a subscription change for one name.
    #[error("'{name}': {status}")]
    Subscription { name: String, status: String },

    /// The peer's login handler answered with a falsy value.
    #[error("authentication failed")]
    LoginRejected,

    /// `connect` was called while the client is already running.
    #[error("client is already connected")]
    AlreadyConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let wsrpc_err: WsrpcError = err.into();
        assert!(matches!(wsrpc_err, WsrpcError::Transport(_)));
        assert!(wsrpc_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_namespace_error() {
        let err = NamespaceError::InvalidName("chat".into());
        let wsrpc_err: WsrpcError = err.into();
        assert!(matches!(wsrpc_err, WsrpcError::Namespace(_)));
    }

    #[test]
    fn test_from_call_error_keeps_message() {
        let wsrpc_err: WsrpcError = CallError::NotReady.into();
        assert_eq!(wsrpc_err.to_string(), "socket not ready");
    }

    #[test]
    fn test_subscription_error_names_event() {
        let err = WsrpcError::Subscription {
            name: "tick".into(),
            status: "provided event invalid".into(),
        };
        assert_eq!(err.to_string(), "'tick': provided event invalid");
    }
}
