//! The per-connection JSON-RPC engine for wsrpc.
//!
//! This crate turns a [`Connection`](wsrpc_transport::Connection) into a
//! bidirectional RPC peer:
//!
//! 1. **Dispatch**: inbound requests run against a
//!    [`Namespace`](wsrpc_namespace::Namespace) and are answered by id
//! 2. **Correlation**: outgoing calls wait for their replies, with
//!    optional timeouts ([`Correlator`])
//! 3. **Notifications**: inbound notifications reach local callbacks
//!    ([`Listeners`])
//! 4. **Login**: `rpc.login` flips the connection's authenticated flag
//!
//! # How it fits in the stack
//!
//! ```text
//! Client / Server (above)  <- one Session per live connection
//!     |
//! Session Layer (this crate)  <- framing, correlation, dispatch
//!     |
//! Namespace Layer  <- method and notification tables
//! Protocol Layer   <- Message, classify, Codec
//! Transport Layer  <- Connection
//! ```

mod auth;
mod correlator;
mod engine;
mod error;
mod id;
mod listeners;

pub use auth::is_truthy;
pub use correlator::{Correlator, Reply, Ticket};
pub use engine::{Session, SessionConfig};
pub use error::CallError;
pub use id::IdGenerator;
pub use listeners::{Listener, ListenerId, Listeners, NotificationKind};
