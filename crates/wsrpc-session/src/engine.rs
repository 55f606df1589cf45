//! The per-connection protocol engine.
//!
//! A [`Session`] owns one [`Connection`] and runs two tasks for it:
//!
//! ```text
//!   recv loop   frame -> classify -> route
//!                 Request       -> spawned task -> namespace -> reply
//!                 Batch         -> spawned join_all -> one batch reply
//!                 Notification  -> local listeners (no reply)
//!                 Response/Error-> correlator
//!   forwarder   PeerCommand from the namespace -> notification frame / close
//! ```
//!
//! Both ends of a connection run the same engine: a server session and a
//! client session differ only in which namespace they serve.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wsrpc_namespace::{Namespace, NamespaceError, PeerCommand, LOGIN_METHOD};
use wsrpc_protocol::{
    decode_message, is_internal, BatchItem, Codec, JsonCodec, Message, Notification, Request,
    RequestId,
};
use wsrpc_transport::{CloseReason, Connection, ConnectionId, Inbound, TransportError};

use crate::correlator::{Correlator, Ticket};
use crate::listeners::{Listeners, NotificationKind};
use crate::{auth, CallError, IdGenerator};

/// Per-session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Source of outgoing request ids. Default: a counter from 1.
    pub id_generator: IdGenerator,
    /// Where inbound notifications are delivered. Pass a shared table to
    /// keep listeners across sessions.
    pub listeners: Listeners,
    /// Timeout for calls that do not pass their own. Default: none.
    pub request_timeout: Option<Duration>,
}

struct Shared<C: Connection, K: Codec> {
    connection: C,
    codec: K,
    namespace: Namespace,
    correlator: Correlator,
    ids: IdGenerator,
    listeners: Listeners,
    request_timeout: Option<Duration>,
    /// Set by [`Session::close`] so the recv loop reports our own reason.
    local_close: Mutex<Option<CloseReason>>,
    closed: AtomicBool,
}

/// A running engine for one connection. Cheap to clone.
pub struct Session<C: Connection, K: Codec = JsonCodec> {
    shared: Arc<Shared<C, K>>,
}

impl<C: Connection, K: Codec> Clone for Session<C, K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection, K: Codec> std::fmt::Debug for Session<C, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("namespace", &self.shared.namespace.name())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl<C: Connection, K: Codec> Session<C, K> {
    /// Attaches `connection` to `namespace` and starts the engine.
    ///
    /// The returned handle resolves with the close reason once the
    /// connection has ended and the session has cleaned up after itself.
    ///
    /// # Errors
    /// Returns [`NamespaceError::Closed`] if the namespace is closed.
    pub fn spawn(
        connection: C,
        namespace: Namespace,
        codec: K,
        config: SessionConfig,
    ) -> Result<(Self, JoinHandle<CloseReason>), NamespaceError> {
        let id = connection.id();
        let (tx, rx) = mpsc::unbounded_channel();
        namespace.attach(id, tx)?;

        let session = Self {
            shared: Arc::new(Shared {
                connection,
                codec,
                namespace,
                correlator: Correlator::new(),
                ids: config.id_generator,
                listeners: config.listeners,
                request_timeout: config.request_timeout,
                local_close: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };
        tracing::debug!(%id, namespace = session.shared.namespace.name(), "session started");

        tokio::spawn(session.clone().forward(rx));
        let handle = tokio::spawn(session.clone().run());
        Ok((session, handle))
    }

    /// The connection's id.
    pub fn id(&self) -> ConnectionId {
        self.shared.connection.id()
    }

    /// The namespace this session serves.
    pub fn namespace(&self) -> &Namespace {
        &self.shared.namespace
    }

    /// The notification listener table.
    pub fn listeners(&self) -> &Listeners {
        &self.shared.listeners
    }

    /// Returns `true` once the peer has logged in on this connection.
    pub fn is_authenticated(&self) -> bool {
        self.shared.namespace.is_authenticated(self.id())
    }

    /// Number of outgoing calls awaiting a reply.
    pub fn pending(&self) -> usize {
        self.shared.correlator.len()
    }

    /// Returns `true` once the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Outgoing
    // -----------------------------------------------------------------------

    /// Calls an application method on the peer.
    ///
    /// `timeout` overrides [`SessionConfig::request_timeout`]; with neither
    /// set the call waits until a reply arrives or the connection closes.
    ///
    /// # Errors
    /// - [`CallError::InvalidMethod`] for an `rpc.`-prefixed name
    /// - [`CallError::Remote`] if the peer answered with an error
    /// - [`CallError::Timeout`] if no reply arrived in time
    /// - [`CallError::ConnectionClosed`] if the connection ended first
    /// - [`CallError::Transport`] if the request could not be written
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        if is_internal(method) {
            return Err(CallError::InvalidMethod(method.to_owned()));
        }
        self.request(method, params, timeout).await
    }

    /// Calls an internal (`rpc.*`) method on the peer.
    pub async fn call_internal(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        if !is_internal(method) {
            return Err(CallError::InvalidMethod(method.to_owned()));
        }
        self.request(method, params, timeout).await
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        let id = self.shared.ids.next_id();
        let frame = self
            .shared
            .codec
            .encode(&Message::request(id.clone(), method, params.clone()))?;

        // Registered before the write so a fast reply always finds its entry.
        let (ticket, mut rx) = self.shared.correlator.register(id.clone(), method)?;
        let _guard = PendingGuard {
            correlator: &self.shared.correlator,
            id: &id,
            ticket,
        };
        self.shared.connection.send(&frame).await?;

        let reply = match timeout.or(self.shared.request_timeout) {
            None => rx.await,
            Some(after) => match tokio::time::timeout(after, &mut rx).await {
                Ok(reply) => reply,
                Err(_) if self.shared.correlator.remove(&id, ticket) => {
                    tracing::debug!(%id, method, "request timed out");
                    return Err(CallError::Timeout {
                        method: method.to_owned(),
                        params,
                        after,
                    });
                }
                // The reply won the race; it is already in the channel.
                Err(_) => rx.await,
            },
        };
        reply.unwrap_or(Err(CallError::ConnectionClosed))
    }

    /// Sends an application notification to the peer.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CallError> {
        if is_internal(method) {
            return Err(CallError::InvalidMethod(method.to_owned()));
        }
        self.send_notification(method, params).await
    }

    /// Sends an internal (`rpc.*`) notification to the peer.
    pub async fn notify_internal(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), CallError> {
        if !is_internal(method) {
            return Err(CallError::InvalidMethod(method.to_owned()));
        }
        self.send_notification(method, params).await
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), CallError> {
        let frame = self
            .shared
            .codec
            .encode(&Message::notification(method, params))?;
        self.shared.connection.send(&frame).await?;
        Ok(())
    }

    /// Starts the close handshake. The recv loop reports `code`/`reason`
    /// as the session's close reason.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        {
            let mut local = self
                .shared
                .local_close
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if local.is_none() {
                *local = Some(CloseReason::new(code, reason));
            }
        }
        self.shared.connection.close(code, reason).await
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    async fn run(self) -> CloseReason {
        let id = self.id();
        let remote = loop {
            match self.shared.connection.recv().await {
                Ok(Inbound::Message(data)) => self.on_frame(&data).await,
                Ok(Inbound::Closed(reason)) => break reason,
                Err(e) => {
                    tracing::debug!(%id, error = %e, "recv failed");
                    break CloseReason::abnormal(e.to_string());
                }
            }
        };

        let reason = self
            .shared
            .local_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(remote);
        self.shared.closed.store(true, Ordering::Release);
        self.shared.namespace.detach(id);
        let rejected = self.shared.correlator.close();
        tracing::info!(%id, %reason, rejected, "session closed");
        reason
    }

    async fn forward(self, mut commands: mpsc::UnboundedReceiver<PeerCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                PeerCommand::Notify { method, params } => {
                    if let Err(e) = self.send_notification(&method, params).await {
                        tracing::debug!(id = %self.id(), error = %e, "notification not delivered");
                    }
                }
                PeerCommand::Close { code, reason } => {
                    if let Err(e) = self.close(code, &reason).await {
                        tracing::debug!(id = %self.id(), error = %e, "close failed");
                    }
                }
            }
        }
    }

    async fn on_frame(&self, data: &[u8]) {
        match decode_message(&self.shared.codec, data) {
            Err(rejected) => {
                tracing::debug!(id = %self.id(), error = %rejected, "frame rejected");
                self.send_message(&Message::Error(rejected.into_response())).await;
            }
            Ok(Message::Request(request) | Message::InternalRequest(request)) => {
                let session = self.clone();
                tokio::spawn(async move {
                    let reply = session.answer(request).await;
                    session.send_message(&reply).await;
                });
            }
            Ok(Message::Batch(items)) => {
                let session = self.clone();
                tokio::spawn(async move { session.answer_batch(items).await });
            }
            Ok(message) => self.accept(message),
        }
    }

    /// Routes a frame that needs no reply.
    fn accept(&self, message: Message) {
        match message {
            Message::Notification(Notification { method, params }) => {
                self.shared
                    .listeners
                    .dispatch(NotificationKind::Public, &method, params);
            }
            Message::InternalNotification(Notification { method, params }) => {
                self.shared
                    .listeners
                    .dispatch(NotificationKind::Internal, &method, params);
            }
            Message::Response(response) => {
                self.shared.correlator.resolve(&response.id, response.result);
            }
            Message::Error(error) => match error.id {
                Some(id) => {
                    self.shared.correlator.reject(&id, error.error);
                }
                None => {
                    tracing::debug!(id = %self.id(), error = %error.error, "peer reported an error");
                }
            },
            Message::Request(_) | Message::InternalRequest(_) | Message::Batch(_) => {
                tracing::debug!(id = %self.id(), "unexpected frame in reply position");
            }
        }
    }

    async fn answer(&self, request: Request) -> Message {
        let Request { id, method, params } = request;
        let id_conn = self.id();
        let outcome = if method == LOGIN_METHOD {
            auth::login(&self.shared.namespace, id_conn, params).await
        } else {
            self.shared.namespace.invoke(id_conn, &method, params).await
        };
        match outcome {
            Ok(result) => Message::response(id, result),
            Err(error) => {
                tracing::debug!(id = %id_conn, request = %id, method = %method, code = error.code, "request failed");
                Message::error(Some(id), error)
            }
        }
    }

    async fn answer_batch(&self, items: Vec<BatchItem>) {
        let replies = join_all(items.into_iter().map(|item| self.answer_item(item))).await;
        let replies: Vec<BatchItem> = replies.into_iter().flatten().map(Ok).collect();
        if !replies.is_empty() {
            self.send_message(&Message::Batch(replies)).await;
        }
    }

    async fn answer_item(&self, item: BatchItem) -> Option<Message> {
        match item {
            Err(rejected) => Some(Message::Error(rejected.into_response())),
            Ok(Message::Request(request) | Message::InternalRequest(request)) => {
                Some(self.answer(request).await)
            }
            Ok(other) => {
                self.accept(other);
                None
            }
        }
    }

    async fn send_message(&self, message: &Message) {
        let frame = match self.shared.codec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(id = %self.id(), error = %e, "failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.shared.connection.send(&frame).await {
            tracing::debug!(id = %self.id(), error = %e, "reply not delivered");
        }
    }
}

/// Removes a call's pending entry when the call future finishes or is
/// dropped. A no-op if a reply or the timeout already removed it.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: &'a RequestId,
    ticket: Ticket,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.remove(self.id, self.ticket);
    }
}
