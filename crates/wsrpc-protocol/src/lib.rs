//! Wire protocol for wsrpc.
//!
//! This crate defines the "language" both peers speak:
//!
//! - **Types** ([`Message`], [`RequestId`], [`ErrorObject`], etc.) for the
//!   JSON-RPC 2.0 shapes that travel on the wire.
//! - **Classification** ([`classify`]) turning decoded JSON into a
//!   [`Message`], or into a [`ParseError`] that already knows its reply.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) for bytes in and out.
//! - **Graph** ([`Graph`]) for payloads with shared or cyclic structure.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the session
//! engine. It doesn't know about connections or namespaces; it only knows
//! how to read and write messages.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Session (dispatch, correlation)
//! ```

mod classify;
mod codec;
mod error;
mod graph;
mod types;

pub use classify::{classify, ParseError};
pub use codec::{decode_message, Codec, JsonCodec};
pub use error::ProtocolError;
pub use graph::{Graph, Node, NodeId, Slot};
pub use types::{
    is_internal, BatchItem, ErrorCode, ErrorObject, ErrorResponse, Message,
    Notification, Request, RequestId, Response, INTERNAL_PREFIX,
    JSONRPC_VERSION,
};
