//! Per-connection handler: namespace lookup, session start, and cleanup.

use std::sync::{Arc, PoisonError};

use tokio::net::TcpStream;
use wsrpc_namespace::validate_namespace_name;
use wsrpc_protocol::JsonCodec;
use wsrpc_session::{Session, SessionConfig};
use wsrpc_transport::{
    close_code, Accepted, CloseReason, Connection, ConnectionId, WebSocketConnection,
};

use crate::server::{ServerEvent, ServerState};

/// Drop guard that forgets a connection's session when the handler exits.
///
/// This ensures cleanup happens even if the handler task is cancelled.
struct SessionGuard {
    connection: ConnectionId,
    state: Arc<ServerState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.connection);
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    state: Arc<ServerState>,
    accepted: Accepted<WebSocketConnection<TcpStream>>,
) {
    let Accepted { connection, path } = accepted;
    let connection_id = connection.id();

    if let Err(e) = validate_namespace_name(&path) {
        tracing::debug!(%connection_id, %path, error = %e, "rejecting connection");
        let _ = connection.close(close_code::POLICY, &e.to_string()).await;
        return;
    }

    let config = SessionConfig {
        request_timeout: state.request_timeout,
        listeners: state.listeners.clone(),
        ..SessionConfig::default()
    };
    // Attached under the registry lock so a vacant namespace released by a
    // leaving connection is never handed to this one.
    let started = state.registry.with_namespace(&path, |namespace| {
        Session::spawn(connection, namespace.clone(), JsonCodec, config)
    });
    let (session, done) = match started.and_then(|spawned| spawned) {
        Ok(started) => started,
        Err(e) => {
            tracing::debug!(%connection_id, %path, error = %e, "namespace closed during accept");
            return;
        }
    };

    // Insert and guard together: from here on, the session is forgotten
    // however this task ends.
    state
        .sessions
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(connection_id, session);
    let guard = SessionGuard {
        connection: connection_id,
        state: Arc::clone(&state),
    };

    tracing::info!(%connection_id, namespace = %path, "client connected");
    state.emit(ServerEvent::Connected {
        connection: connection_id,
        namespace: path.clone(),
    });

    let reason = done
        .await
        .unwrap_or_else(|e| CloseReason::abnormal(e.to_string()));

    drop(guard);
    state.registry.release_if_vacant(&path);
    tracing::info!(%connection_id, namespace = %path, %reason, "client disconnected");
    state.emit(ServerEvent::Disconnected {
        connection: connection_id,
        namespace: path,
        reason,
    });
}
