//! The reconnecting client.
//!
//! A [`Client`] owns a supervisor task that opens connections through a
//! [`Connector`], runs a [`Session`] on each, and asks its
//! [`ReconnectPolicy`] what to do when one ends. The client's namespace,
//! listeners and id counter live outside any single session, so they
//! survive reconnection.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use wsrpc_namespace::{status, Namespace, NamespaceOptions, DEFAULT_NAMESPACE, LOGIN_METHOD};
use wsrpc_protocol::{JsonCodec, ProtocolError};
use wsrpc_reconnect::{ConnectionState, Decision, ReconnectConfig, ReconnectPolicy};
use wsrpc_session::{
    is_truthy, CallError, IdGenerator, ListenerId, Listeners, NotificationKind, Session,
    SessionConfig,
};
use wsrpc_transport::{close_code, CloseReason, Connection, Connector, WebSocketConnector};

use crate::WsrpcError;

/// Capacity of the client event channel. Slow receivers skip ahead.
const EVENT_CAPACITY: usize = 64;

/// Lifecycle events, published on [`Client::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A connection opened; calls may be sent.
    Open,
    /// A connection ended (or an attempt failed, as 1006).
    Close { reason: CloseReason },
    /// A connection attempt failed.
    Error { message: String },
    /// The next attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
}

type ClientSession<T> = Session<<T as Connector>::Connection>;

/// Set to the requested close once [`Client::close`] runs.
type Shutdown = Option<CloseReason>;

struct Supervisor {
    task: JoinHandle<()>,
    shutdown: watch::Sender<Shutdown>,
}

struct ClientShared<T: Connector> {
    address: String,
    connector: T,
    reconnect: ReconnectConfig,
    request_timeout: Option<Duration>,
    ids: IdGenerator,
    namespace: Namespace,
    listeners: Listeners,
    current: RwLock<Option<ClientSession<T>>>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl<T: Connector> ClientShared<T> {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn set_current(&self, session: Option<ClientSession<T>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            id_generator: self.ids.clone(),
            listeners: self.listeners.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`Client`].
///
/// # Example
///
/// ```rust,no_run
/// use wsrpc::prelude::*;
/// use serde_json::json;
///
/// # async fn run() -> Result<(), WsrpcError> {
/// let client = Client::builder("ws://127.0.0.1:8080/")
///     .reconnect(ReconnectConfig { max_attempts: 0, ..Default::default() })
///     .connect()
///     .await?;
/// let sum = client.call("sum", Some(json!([2, 3])), None).await?;
/// assert_eq!(sum, json!(5));
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder<T: Connector = WebSocketConnector> {
    address: String,
    connector: T,
    reconnect: ReconnectConfig,
    request_timeout: Option<Duration>,
    id_generator: IdGenerator,
    namespace_options: NamespaceOptions,
}

impl ClientBuilder {
    /// Creates a builder for a WebSocket client of `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connector: WebSocketConnector,
            reconnect: ReconnectConfig::default(),
            request_timeout: None,
            id_generator: IdGenerator::default(),
            namespace_options: NamespaceOptions::default(),
        }
    }
}

impl<T: Connector> ClientBuilder<T> {
    /// Opens connections through `connector` instead.
    pub fn connector<U: Connector>(self, connector: U) -> ClientBuilder<U> {
        ClientBuilder {
            address: self.address,
            connector,
            reconnect: self.reconnect,
            request_timeout: self.request_timeout,
            id_generator: self.id_generator,
            namespace_options: self.namespace_options,
        }
    }

    /// Sets the reconnection policy.
    pub fn reconnect(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    /// Sets the default call timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the request id generator.
    pub fn id_generator(mut self, ids: IdGenerator) -> Self {
        self.id_generator = ids;
        self
    }

    /// Sets the options of the client's own namespace.
    pub fn namespace_options(mut self, options: NamespaceOptions) -> Self {
        self.namespace_options = options;
        self
    }

    /// Builds the client without connecting.
    pub fn build(self) -> Result<Client<T>, WsrpcError> {
        let namespace = Namespace::new(DEFAULT_NAMESPACE, self.namespace_options)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Client {
            shared: Arc::new(ClientShared {
                address: self.address,
                connector: self.connector,
                reconnect: self.reconnect,
                request_timeout: self.request_timeout,
                ids: self.id_generator,
                namespace,
                listeners: Listeners::new(),
                current: RwLock::new(None),
                state,
                events,
                supervisor: Mutex::new(None),
            }),
        })
    }

    /// Builds the client and waits for its first connection attempt.
    pub async fn connect(self) -> Result<Client<T>, WsrpcError> {
        let client = self.build()?;
        client.connect().await?;
        Ok(client)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A JSON-RPC peer that dials out and reconnects.
///
/// Cheap to clone: clones share the connection.
pub struct Client<T: Connector = WebSocketConnector> {
    shared: Arc<ClientShared<T>>,
}

impl<T: Connector> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Connector> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a builder for a WebSocket client of `address`.
    pub fn builder(address: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(address)
    }
}

impl<T: Connector> Client<T> {
    /// Starts the supervisor and waits for the first attempt.
    ///
    /// If that attempt fails its error is returned, and (with reconnection
    /// enabled) the supervisor keeps trying in the background.
    pub async fn connect(&self) -> Result<(), WsrpcError> {
        let (first_tx, first_rx) = oneshot::channel();
        {
            let mut supervisor = self
                .shared
                .supervisor
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if supervisor.as_ref().is_some_and(|s| !s.task.is_finished()) {
                return Err(WsrpcError::AlreadyConnected);
            }
            let (shutdown, shutdown_rx) = watch::channel(None);
            let task = tokio::spawn(supervise(Arc::clone(&self.shared), shutdown_rx, first_tx));
            *supervisor = Some(Supervisor { task, shutdown });
        }
        // A dropped sender means the client was closed before the attempt
        // finished.
        first_rx
            .await
            .unwrap_or(Err(WsrpcError::Call(CallError::ConnectionClosed)))
    }

    /// Closes the connection and stops reconnecting.
    ///
    /// The supervisor closes whichever session is open when it sees the
    /// request, including one whose connect was racing this call, and the
    /// returned future resolves once the supervisor has stopped.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), WsrpcError> {
        let supervisor = self
            .shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(supervisor) = supervisor else {
            self.shared.set_state(ConnectionState::Closed);
            return Ok(());
        };

        supervisor
            .shutdown
            .send_replace(Some(CloseReason::new(code, reason)));
        if let Err(e) = supervisor.task.await {
            tracing::warn!(error = %e, "client supervisor failed");
        }
        self.shared.set_state(ConnectionState::Closed);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns `true` while a connection is open.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Subscribes to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// The client's own namespace: methods and notifications the server
    /// may use on this client.
    pub fn namespace(&self) -> &Namespace {
        &self.shared.namespace
    }

    fn session(&self) -> Result<ClientSession<T>, CallError> {
        self.shared
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CallError::NotReady)
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Calls a method on the server. Fails fast with
    /// [`CallError::NotReady`] while disconnected.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        self.session()?.call(method, params, timeout).await
    }

    /// Calls an internal (`rpc.*`) method on the server.
    pub async fn call_internal(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        self.session()?.call_internal(method, params, timeout).await
    }

    /// Sends a notification to the server.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallError> {
        self.session()?.notify(method, params).await
    }

    /// Sends an internal (`rpc.*`) notification to the server.
    pub async fn notify_internal(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), CallError> {
        self.session()?.notify_internal(method, params).await
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Runs `listener` for every notification called `name`.
    pub fn on_notification(
        &self,
        name: &str,
        listener: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .add(NotificationKind::Public, name, listener)
    }

    /// Runs `listener` for every internal notification called `name`.
    pub fn on_internal_notification(
        &self,
        name: &str,
        listener: impl Fn(Option<Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared
            .listeners
            .add(NotificationKind::Internal, name, listener)
    }

    /// Removes one listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// The shared listener table.
    pub fn listeners(&self) -> &Listeners {
        &self.shared.listeners
    }

    /// Subscribes to server notifications. Fails on the first name the
    /// server did not answer `"ok"` for.
    pub async fn subscribe(&self, names: &[&str]) -> Result<(), WsrpcError> {
        self.toggle("rpc.on", names).await
    }

    /// Unsubscribes from server notifications. Fails on the first name the
    /// server did not answer `"ok"` for.
    pub async fn unsubscribe(&self, names: &[&str]) -> Result<(), WsrpcError> {
        self.toggle("rpc.off", names).await
    }

    async fn toggle(&self, method: &str, names: &[&str]) -> Result<(), WsrpcError> {
        let statuses = self.call_internal(method, Some(json!(names)), None).await?;
        for name in names {
            match statuses.get(*name).and_then(Value::as_str) {
                Some(status::OK) => {}
                other => {
                    return Err(WsrpcError::Subscription {
                        name: (*name).to_owned(),
                        status: other.unwrap_or("no status").to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Login and introspection
    // -----------------------------------------------------------------------

    /// Logs in with `params`. A falsy answer is
    /// [`WsrpcError::LoginRejected`].
    pub async fn login(&self, params: Value) -> Result<Value, WsrpcError> {
        let result = self.call_internal(LOGIN_METHOD, Some(params), None).await?;
        if is_truthy(&result) {
            Ok(result)
        } else {
            Err(WsrpcError::LoginRejected)
        }
    }

    /// Public method names registered on the server's namespace.
    pub async fn list_remote_methods(&self) -> Result<Vec<String>, WsrpcError> {
        self.introspect("rpc.listMethods").await
    }

    /// Notification names declared on the server's namespace.
    pub async fn list_remote_events(&self) -> Result<Vec<String>, WsrpcError> {
        self.introspect("rpc.listEvents").await
    }

    async fn introspect<R: DeserializeOwned>(&self, method: &str) -> Result<R, WsrpcError> {
        let value = self.call_internal(method, None, None).await?;
        serde_json::from_value(value).map_err(|e| WsrpcError::Protocol(ProtocolError::Decode(e)))
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

async fn supervise<T: Connector>(
    shared: Arc<ClientShared<T>>,
    mut shutdown: watch::Receiver<Shutdown>,
    first: oneshot::Sender<Result<(), WsrpcError>>,
) {
    let mut policy = ReconnectPolicy::new(shared.reconnect.clone());
    let mut first = Some(first);

    loop {
        if shutdown.borrow_and_update().is_some() {
            break;
        }
        policy.on_connecting();
        shared.set_state(policy.state());

        let attempt = tokio::select! {
            attempt = shared.connector.connect(&shared.address) => attempt,
            _ = shutdown.changed() => break,
        };

        let reason = match attempt {
            Ok(connection) => {
                match Session::spawn(
                    connection,
                    shared.namespace.clone(),
                    JsonCodec,
                    shared.session_config(),
                ) {
                    Ok((session, done)) => {
                        shared.set_current(Some(session.clone()));
                        policy.on_open();
                        shared.set_state(policy.state());
                        tracing::info!(address = %shared.address, "client connected");
                        shared.emit(ClientEvent::Open);
                        if let Some(first) = first.take() {
                            let _ = first.send(Ok(()));
                        }

                        let reason = run_session(&session, done, &mut shutdown).await;
                        shared.set_current(None);
                        reason
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "client namespace closed");
                        if let Some(first) = first.take() {
                            let _ = first.send(Err(e.into()));
                        }
                        policy.close();
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(address = %shared.address, error = %e, "connection attempt failed");
                shared.emit(ClientEvent::Error {
                    message: e.to_string(),
                });
                let reason = CloseReason::new(close_code::ABNORMAL, e.to_string());
                if let Some(first) = first.take() {
                    let _ = first.send(Err(e.into()));
                }
                reason
            }
        };

        shared.emit(ClientEvent::Close {
            reason: reason.clone(),
        });
        if shutdown.borrow().is_some() {
            break;
        }

        match policy.on_close(&reason) {
            Decision::Retry { attempt, delay } => {
                shared.set_state(policy.state());
                shared.emit(ClientEvent::Reconnecting { attempt, delay });
                tokio::select! {
                    _ = policy.wait_for_retry() => {}
                    _ = shutdown.changed() => break,
                }
            }
            Decision::Stop(stop) => {
                tracing::debug!(?stop, "client supervisor stopping");
                break;
            }
        }
    }

    policy.close();
    shared.set_current(None);
    shared.set_state(ConnectionState::Closed);
}

/// Waits for an open session to end, closing it first if shutdown is
/// requested meanwhile.
///
/// A shutdown that arrived while the connect was still in flight is unseen
/// by the receiver, so `changed()` resolves at once in that case.
async fn run_session<C: Connection>(
    session: &Session<C>,
    mut done: JoinHandle<CloseReason>,
    shutdown: &mut watch::Receiver<Shutdown>,
) -> CloseReason {
    let finished = tokio::select! {
        finished = &mut done => Some(finished),
        changed = shutdown.changed() => {
            // A dropped sender means the client itself is gone.
            let requested = match changed {
                Ok(()) => shutdown.borrow_and_update().clone(),
                Err(_) => None,
            }
            .unwrap_or_else(CloseReason::normal);
            if let Err(e) = session.close(requested.code, &requested.reason).await {
                tracing::debug!(error = %e, "client close failed");
            }
            None
        }
    };
    let finished = match finished {
        Some(finished) => finished,
        None => done.await,
    };
    finished.unwrap_or_else(|e| CloseReason::abnormal(e.to_string()))
}
