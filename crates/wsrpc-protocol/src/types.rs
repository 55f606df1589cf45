//! Core JSON-RPC 2.0 types for the wire format.
//!
//! Every frame on the wire is one [`Message`], or a batch of them. The
//! shapes follow JSON-RPC 2.0 with one extension: method names starting
//! with [`INTERNAL_PREFIX`] are protocol bookkeeping (login, subscriptions,
//! introspection) and get their own variants so that dispatch never has to
//! sniff strings again.

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::ParseError;

/// The only protocol version spoken.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method/notification names with this prefix are internal.
pub const INTERNAL_PREFIX: &str = "rpc.";

/// Returns `true` if `name` carries the reserved internal prefix.
pub fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

// ---------------------------------------------------------------------------
// Request ids
// ---------------------------------------------------------------------------

/// A request identifier: an integer or a string.
///
/// `#[serde(untagged)]` keeps the wire shape a bare `1` or `"abc"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id, as produced by the default counter.
    Number(i64),
    /// String id, e.g. a random token or UUID.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Errors on the wire
// ---------------------------------------------------------------------------

/// The reserved error codes and their standard messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// -32000: server-defined (missing event list, handler failure).
    ServerError,
    /// -32600: the frame is not a valid request object.
    InvalidRequest,
    /// -32601: no handler registered under that name.
    MethodNotFound,
    /// -32602: the handler rejected its params.
    InvalidParams,
    /// -32603: internal error.
    InternalError,
    /// -32604: a method that requires params got none.
    ParamsNotFound,
    /// -32605: protected method, connection not authenticated.
    MethodForbidden,
    /// -32606: protected notification, connection not authenticated.
    EventForbidden,
    /// -32700: the frame could not be decoded at all.
    ParseError,
}

impl ErrorCode {
    /// Every reserved code, in numeric order from -32000 down.
    pub const ALL: [Self; 9] = [
        Self::ServerError,
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::InvalidParams,
        Self::InternalError,
        Self::ParamsNotFound,
        Self::MethodForbidden,
        Self::EventForbidden,
        Self::ParseError,
    ];

    /// The numeric code.
    pub const fn code(self) -> i64 {
        match self {
            Self::ServerError => -32000,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ParamsNotFound => -32604,
            Self::MethodForbidden => -32605,
            Self::EventForbidden => -32606,
            Self::ParseError => -32700,
        }
    }

    /// The standard message for this code.
    pub const fn message(self) -> &'static str {
        match self {
            Self::ServerError => "Event not provided",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ParamsNotFound => "Params not found",
            Self::MethodForbidden => "Method forbidden",
            Self::EventForbidden => "Event forbidden",
            Self::ParseError => "Parse error",
        }
    }

    /// Looks up a reserved code by number.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// A JSON-RPC error object: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional detail payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Builds the standard error object for a reserved code.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_owned(),
            data: None,
        }
    }

    /// Builds an error object for any code, using the standard message when
    /// the code is reserved and "Internal Server Error" otherwise.
    pub fn from_code(code: i64, data: Option<Value>) -> Self {
        let message = ErrorCode::from_code(code)
            .map_or("Internal Server Error", ErrorCode::message);
        Self {
            code,
            message: message.to_owned(),
            data,
        }
    }

    /// Builds an application-defined error object.
    pub fn custom(
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Attaches a detail payload.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        if let Some(data) = &self.data {
            write!(f, ": {data}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A call that expects exactly one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id, echoed by the reply.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Positional (array) or named (object) parameters.
    pub params: Option<Value>,
}

/// A fire-and-forget message. Never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Notification name.
    pub method: String,
    /// Optional payload.
    pub params: Option<Value>,
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The id of the request being answered.
    pub id: RequestId,
    /// The result value.
    pub result: Value,
}

/// A failed reply. `id` is `None` when the request could not be read far
/// enough to learn its id.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// The id of the request being answered, if known.
    pub id: Option<RequestId>,
    /// What went wrong.
    pub error: ErrorObject,
}

/// One element of a batch: a classified message, or the rejection that
/// element earned. A rejected element still produces a reply.
pub type BatchItem = Result<Message, ParseError>;

/// Every shape a frame can take.
///
/// Built by [`classify`](crate::classify) from incoming JSON, or by the
/// constructors below for outgoing traffic. The `Internal*` variants carry
/// names with the [`INTERNAL_PREFIX`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// An application method call.
    Request(Request),
    /// An internal (`rpc.*`) method call.
    InternalRequest(Request),
    /// An application notification.
    Notification(Notification),
    /// An internal (`rpc.*`) notification.
    InternalNotification(Notification),
    /// A successful reply.
    Response(Response),
    /// A failed reply.
    Error(ErrorResponse),
    /// Several messages in one frame.
    Batch(Vec<BatchItem>),
}

impl Message {
    /// Builds a request, picking the internal variant from the name.
    pub fn request(
        id: RequestId,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Self {
        let request = Request {
            id,
            method: method.into(),
            params,
        };
        if is_internal(&request.method) {
            Self::InternalRequest(request)
        } else {
            Self::Request(request)
        }
    }

    /// Builds a notification, picking the internal variant from the name.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        let notification = Notification {
            method: method.into(),
            params,
        };
        if is_internal(&notification.method) {
            Self::InternalNotification(notification)
        } else {
            Self::Notification(notification)
        }
    }

    /// Builds a successful reply.
    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response(Response { id, result })
    }

    /// Builds a failed reply.
    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self::Error(ErrorResponse { id, error })
    }

    /// Returns the method/notification name, if this message has one.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) | Self::InternalRequest(r) => Some(&r.method),
            Self::Notification(n) | Self::InternalNotification(n) => {
                Some(&n.method)
            }
            _ => None,
        }
    }

    /// Serializes into a `serde_json::Value`.
    pub fn to_value(&self) -> Value {
        // Serializing our own types into a Value cannot fail: every key is
        // a string and every leaf is already JSON.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// Borrowed wire shapes. Field order matches the usual JSON-RPC layout.

#[derive(Serialize)]
struct RequestWire<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    id: &'a RequestId,
}

#[derive(Serialize)]
struct NotificationWire<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct ResponseWire<'a> {
    jsonrpc: &'static str,
    result: &'a Value,
    id: &'a RequestId,
}

#[derive(Serialize)]
struct ErrorWire<'a> {
    jsonrpc: &'static str,
    error: &'a ErrorObject,
    id: Option<&'a RequestId>,
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Request(r) | Self::InternalRequest(r) => RequestWire {
                jsonrpc: JSONRPC_VERSION,
                method: &r.method,
                params: r.params.as_ref(),
                id: &r.id,
            }
            .serialize(serializer),
            Self::Notification(n) | Self::InternalNotification(n) => {
                NotificationWire {
                    jsonrpc: JSONRPC_VERSION,
                    method: &n.method,
                    params: n.params.as_ref(),
                }
                .serialize(serializer)
            }
            Self::Response(r) => ResponseWire {
                jsonrpc: JSONRPC_VERSION,
                result: &r.result,
                id: &r.id,
            }
            .serialize(serializer),
            Self::Error(e) => ErrorWire {
                jsonrpc: JSONRPC_VERSION,
                error: &e.error,
                id: e.id.as_ref(),
            }
            .serialize(serializer),
            Self::Batch(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    match item {
                        Ok(message) => seq.serialize_element(message)?,
                        Err(rejected) => seq.serialize_element(&ErrorWire {
                            jsonrpc: JSONRPC_VERSION,
                            error: &rejected.error,
                            id: rejected.id.as_ref(),
                        })?,
                    }
                }
                seq.end()
            }
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
