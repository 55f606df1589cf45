//! Transport abstraction layer for wsrpc.
//!
//! Provides the [`Transport`], [`Connection`] and [`Connector`] traits that
//! abstract over a message-oriented duplex channel. The RPC engine only
//! needs whole frames in, whole frames out, and a close handshake that
//! carries a code.
//!
//! # Feature Flags
//!
//! - `websocket` (default) : WebSocket transport via `tokio-tungstenite`
//!
//! The in-memory pair ([`memory_pair`]) is always available; it is what the
//! engine tests run on.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{memory_pair, MemoryConnection};
#[cfg(feature = "websocket")]
pub use websocket::{
    ClientStream, WebSocketConnection, WebSocketConnector, WebSocketTransport,
};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
///
/// Stable for the lifetime of the connection. Namespaces use it to key
/// their connection and subscriber sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide connection ID.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Close handshake
// ---------------------------------------------------------------------------

/// Well-known close codes (RFC 6455 §7.4.1).
pub mod close_code {
    /// Normal closure. The client does not reconnect after this.
    pub const NORMAL: u16 = 1000;
    /// The endpoint is going away (server shutdown, page navigation).
    pub const GOING_AWAY: u16 = 1001;
    /// A close frame arrived without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// The connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// The endpoint refused the connection (e.g. an invalid namespace).
    pub const POLICY: u16 = 1008;
}

/// Why a connection ended: the close code plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// The close code (see [`close_code`]).
    pub code: u16,
    /// Free-form reason text. May be empty.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason from a code and text.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A normal (1000) closure with no reason text.
    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, "")
    }

    /// An abnormal (1006) closure: the peer vanished or the link failed.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(close_code::ABNORMAL, reason)
    }

    /// Returns `true` for a normal (1000) closure.
    pub fn is_normal(&self) -> bool {
        self.code == close_code::NORMAL
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// One event read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete message payload. Text frames arrive as their UTF-8 bytes.
    Message(Vec<u8>),
    /// The connection is closed. No further messages follow.
    Closed(CloseReason),
}

/// A freshly accepted connection together with the request path it was
/// opened on. Servers use the path as the namespace name.
#[derive(Debug)]
pub struct Accepted<C> {
    /// The accepted connection.
    pub connection: C,
    /// The HTTP request path from the opening handshake (`"/"` if none).
    pub path: String,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Accepted<Self::Connection>, TransportError>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Opens outgoing connections to an address.
///
/// The client lifecycle calls this once per connection attempt, so a
/// reconnect is simply another `connect`.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Opens a connection to `address`.
    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that can send and receive whole messages.
///
/// All methods take `&self` so that one task can sit in [`recv`](Self::recv)
/// while others send. Implementations serialize concurrent sends internally.
pub trait Connection: Send + Sync + 'static {
    /// Sends one message to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next event from the remote peer.
    ///
    /// Returns [`Inbound::Closed`] once the connection has ended, cleanly
    /// or not.
    fn recv(&self) -> impl Future<Output = Result<Inbound, TransportError>> + Send;

    /// Starts the close handshake with the given code and reason.
    fn close(
        &self,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
