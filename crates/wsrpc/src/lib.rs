//! # wsrpc
//!
//! Bidirectional JSON-RPC 2.0 over WebSocket.
//!
//! Both peers can register methods, call methods on the other side, and
//! push notifications. Methods and notifications live in namespaces
//! (selected by the WebSocket path on the server); connections subscribe
//! to notifications with `rpc.on`/`rpc.off`, and protected methods wait
//! for `rpc.login`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsrpc::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), WsrpcError> {
//! let server = Server::builder().bind("127.0.0.1:8080").build().await?;
//! server.handle().of("/")?.register_method("sum", |params, _ctx| async move {
//!     let (a, b): (i64, i64) = parse_params(params)?;
//!     Ok(json!(a + b))
//! })?;
//! tokio::spawn(server.run());
//!
//! let client = Client::builder("ws://127.0.0.1:8080/").connect().await?;
//! assert_eq!(client.call("sum", Some(json!([2, 3])), None).await?, json!(5));
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod handler;
mod server;

pub use client::{Client, ClientBuilder, ClientEvent};
pub use error::WsrpcError;
pub use server::{Server, ServerBuilder, ServerEvent, ServerHandle, DEFAULT_BIND};

/// Everything needed to run a server or a client.
pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, ClientEvent, Server, ServerBuilder, ServerEvent, ServerHandle,
        WsrpcError,
    };
    pub use wsrpc_namespace::{
        method_handler, parse_params, CallContext, MethodError, Namespace, NamespaceOptions,
        NotificationMode,
    };
    pub use wsrpc_protocol::{ErrorCode, ErrorObject, Graph, RequestId};
    pub use wsrpc_reconnect::{ConnectionState, ReconnectConfig};
    pub use wsrpc_session::{CallError, IdGenerator, ListenerId, NotificationKind};
    pub use wsrpc_transport::{close_code, CloseReason, ConnectionId};
}

/// The layers, for code that needs more than the prelude.
pub use wsrpc_namespace as namespace;
pub use wsrpc_protocol as protocol;
pub use wsrpc_reconnect as reconnect;
pub use wsrpc_session as session;
pub use wsrpc_transport as transport;
