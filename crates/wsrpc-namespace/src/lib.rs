//! Namespaces for wsrpc.
//!
//! A namespace is a named partition of the RPC surface: the methods
//! callable on it, the notifications peers can subscribe to, and the
//! connections attached to it. Server and client roles share it.
//!
//! # Key types
//!
//! - [`Namespace`]: method/notification tables, subscriptions, auth flags
//! - [`NamespaceRegistry`]: get-or-create by name, close one or all
//! - [`MethodHandle`] / [`NotificationHandle`]: `protected()`/`public()` toggles
//! - [`MethodError`], [`CallContext`]: the handler contract
//! - [`PeerCommand`]: what a namespace pushes to a connection

mod builtins;
mod error;
mod handler;
mod namespace;
mod options;
mod registry;

pub use error::NamespaceError;
pub use handler::{
    method_handler, parse_params, CallContext, HandlerFuture, MethodError, MethodHandler,
};
pub use namespace::{
    status, validate_namespace_name, MethodHandle, Namespace, NotificationHandle, PeerCommand,
    PeerSender, LOGIN_METHOD,
};
pub use options::{NamespaceOptions, NotificationMode};
pub use registry::{NamespaceRegistry, DEFAULT_NAMESPACE};
