//! `Server` builder, accept loop, and the cloneable [`ServerHandle`].
//!
//! This is the entry point for running a wsrpc server. It ties the layers
//! together: transport -> session -> namespace.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use wsrpc_namespace::{Namespace, NamespaceOptions, NamespaceRegistry};
use wsrpc_session::{ListenerId, Listeners, NotificationKind, Session};
use wsrpc_transport::{
    CloseReason, ConnectionId, Transport, WebSocketConnection, WebSocketTransport,
};

use crate::handler::handle_connection;
use crate::WsrpcError;

/// Default bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Capacity of the server event channel. Slow receivers skip ahead.
const EVENT_CAPACITY: usize = 256;

pub(crate) type ServerSession = Session<WebSocketConnection<TcpStream>>;

/// Connection lifecycle events, published on [`ServerHandle::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A connection was accepted and attached to `namespace`.
    Connected {
        connection: ConnectionId,
        namespace: String,
    },
    /// A connection ended.
    Disconnected {
        connection: ConnectionId,
        namespace: String,
        reason: CloseReason,
    },
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) registry: NamespaceRegistry,
    pub(crate) sessions: RwLock<HashMap<ConnectionId, ServerSession>>,
    pub(crate) events: broadcast::Sender<ServerEvent>,
    pub(crate) request_timeout: Option<Duration>,
    /// Shared by every session, so one listener hears all clients.
    pub(crate) listeners: Listeners,
    shutdown: watch::Sender<bool>,
}

impl ServerState {
    pub(crate) fn emit(&self, event: ServerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn session(&self, connection: ConnectionId) -> Result<ServerSession, WsrpcError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection)
            .cloned()
            .ok_or(WsrpcError::UnknownConnection(connection))
    }
}

/// Builder for configuring and starting a wsrpc server.
///
/// # Example
///
/// ```rust,no_run
/// use wsrpc::prelude::*;
/// use serde_json::json;
///
/// # async fn run() -> Result<(), WsrpcError> {
/// let server = Server::builder().bind("0.0.0.0:8080").build().await?;
/// server.handle().of("/")?.register_method("sum", |params, _ctx| async move {
///     let (a, b): (i64, i64) = parse_params(params)?;
///     Ok(json!(a + b))
/// })?;
/// server.run().await
/// # }
/// ```
pub struct ServerBuilder {
    bind_addr: String,
    namespace_options: NamespaceOptions,
    request_timeout: Option<Duration>,
}

impl ServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            namespace_options: NamespaceOptions::default(),
            request_timeout: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the options every namespace is created with.
    pub fn namespace_options(mut self, options: NamespaceOptions) -> Self {
        self.namespace_options = options;
        self
    }

    /// Sets the default timeout for server-to-client calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Binds the listener. The default namespace `/` exists from the start.
    pub async fn build(self) -> Result<Server, WsrpcError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let registry = NamespaceRegistry::new(self.namespace_options);
        registry.get_or_create(wsrpc_namespace::DEFAULT_NAMESPACE)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let state = Arc::new(ServerState {
            registry,
            sessions: RwLock::new(HashMap::new()),
            events,
            request_timeout: self.request_timeout,
            listeners: Listeners::new(),
            shutdown,
        });

        Ok(Server {
            transport,
            handle: ServerHandle { state },
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound wsrpc server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct Server {
    transport: WebSocketTransport,
    handle: ServerHandle,
}

impl Server {
    /// Creates a new builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle for registering methods and talking to connections.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Runs the accept loop until [`ServerHandle::close`] is called.
    ///
    /// Each accepted connection is attached to the namespace named by its
    /// request path (created on first use) and served by its own task.
    pub async fn run(mut self) -> Result<(), WsrpcError> {
        tracing::info!(addr = ?self.local_addr().ok(), "wsrpc server running");
        let state = Arc::clone(&self.handle.state);
        let mut shutdown = state.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(accepted) => {
                        tokio::spawn(handle_connection(Arc::clone(&state), accepted));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                _ = shutdown.changed() => {}
            }
        }

        self.transport.shutdown().await?;
        tracing::info!("wsrpc server stopped");
        Ok(())
    }
}

/// Cloneable control surface of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("namespaces", &self.state.registry.names())
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Returns the namespace called `name`, creating it if needed.
    pub fn of(&self, name: &str) -> Result<Namespace, WsrpcError> {
        Ok(self.state.registry.get_or_create(name)?)
    }

    /// Names of all live namespaces, sorted.
    pub fn namespace_names(&self) -> Vec<String> {
        self.state.registry.names()
    }

    /// Closes one namespace and every connection attached to it.
    pub fn close_namespace(&self, name: &str) -> Result<(), WsrpcError> {
        Ok(self.state.registry.close(name)?)
    }

    /// Connections attached to `namespace`, sorted. Empty if it does not
    /// exist.
    pub fn connections(&self, namespace: &str) -> Vec<ConnectionId> {
        self.state
            .registry
            .get(namespace)
            .map(|ns| ns.connection_ids())
            .unwrap_or_default()
    }

    /// Calls a method on a connected client.
    pub async fn call(
        &self,
        connection: ConnectionId,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, WsrpcError> {
        let session = self.state.session(connection)?;
        Ok(session.call(method, params, timeout).await?)
    }

    /// Sends a notification to one connected client.
    pub async fn notify(
        &self,
        connection: ConnectionId,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), WsrpcError> {
        let session = self.state.session(connection)?;
        Ok(session.notify(method, params).await?)
    }

    /// Closes one connection with `code` and `reason`.
    pub async fn disconnect(
        &self,
        connection: ConnectionId,
        code: u16,
        reason: &str,
    ) -> Result<(), WsrpcError> {
        let session = self.state.session(connection)?;
        Ok(session.close(code, reason).await?)
    }

    /// Returns `true` if the connection has logged in.
    pub fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.state
            .session(connection)
            .is_ok_and(|session| session.is_authenticated())
    }

    /// Runs `listener` for every notification called `name` from any
    /// client.
    pub fn on_notification(
        &self,
        name: &str,
        listener: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.state
            .listeners
            .add(NotificationKind::Public, name, listener)
    }

    /// Runs `listener` for every internal notification called `name`.
    pub fn on_internal_notification(
        &self,
        name: &str,
        listener: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.state
            .listeners
            .add(NotificationKind::Internal, name, listener)
    }

    /// Removes one listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.listeners.remove(id)
    }

    /// Closes every namespace (and so every connection) and stops the
    /// accept loop.
    pub fn close(&self) {
        self.state.shutdown.send_replace(true);
        self.state.registry.close_all();
    }

    /// Subscribes to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.state.events.subscribe()
    }
}
