//! Method handlers: the extension point application code implements.
//!
//! A handler is an async function from `(params, context)` to a JSON result.
//! Handlers are stored type-erased (`Arc<dyn Fn>`) so one table can hold
//! closures of any shape; [`Namespace::register_method`](crate::Namespace::register_method)
//! does the boxing.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use wsrpc_protocol::{ErrorCode, ErrorObject};
use wsrpc_transport::ConnectionId;

use crate::Namespace;

/// What a handler sees besides its params.
#[derive(Clone)]
pub struct CallContext {
    /// The connection that made the call.
    pub connection_id: ConnectionId,
    /// The namespace the method is registered in.
    pub namespace: Namespace,
}

impl CallContext {
    /// Returns `true` if the calling connection has logged in.
    pub fn is_authenticated(&self) -> bool {
        self.namespace.is_authenticated(self.connection_id)
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("connection_id", &self.connection_id)
            .field("namespace", &self.namespace.name())
            .finish()
    }
}

/// The boxed future a handler returns.
pub type HandlerFuture = BoxFuture<'static, Result<Value, MethodError>>;

/// A type-erased method handler.
pub type MethodHandler =
    Arc<dyn Fn(Option<Value>, CallContext) -> HandlerFuture + Send + Sync>;

/// Boxes an async closure into a [`MethodHandler`].
pub fn method_handler<F, Fut>(handler: F) -> MethodHandler
where
    F: Fn(Option<Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
{
    Arc::new(move |params, ctx| Box::pin(handler(params, ctx)))
}

/// How a handler reports failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MethodError {
    /// A structured error, sent to the caller verbatim.
    #[error("{0}")]
    Rpc(ErrorObject),

    /// An application error, sent as -32000 with the error's type name as
    /// the message and its text as `data`.
    #[error("{name}: {message}")]
    Failed { name: String, message: String },

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl MethodError {
    /// Wraps any error, recording its type name.
    pub fn from_error<E: std::error::Error>(err: E) -> Self {
        let full = std::any::type_name::<E>();
        let name = full.rsplit("::").next().unwrap_or(full);
        Self::Failed {
            name: name.to_owned(),
            message: err.to_string(),
        }
    }

    /// -32602 with a detail message.
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::Rpc(ErrorObject::new(ErrorCode::InvalidParams).with_data(detail.into()))
    }

    /// Converts into the error object sent on the wire.
    pub fn into_error_object(self) -> ErrorObject {
        match self {
            Self::Rpc(error) => error,
            Self::Failed { name, message } => {
                ErrorObject::custom(ErrorCode::ServerError.code(), name, Some(message.into()))
            }
            Self::Panicked(text) => {
                ErrorObject::custom(ErrorCode::ServerError.code(), "panic", Some(text.into()))
            }
        }
    }

    fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        Self::Panicked(text)
    }
}

impl From<ErrorObject> for MethodError {
    fn from(error: ErrorObject) -> Self {
        Self::Rpc(error)
    }
}

/// Deserializes handler params into `T`, answering -32602 on mismatch.
///
/// Absent params deserialize from `null`, so `Option<_>` and `()` accept
/// a call without params.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, MethodError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| MethodError::invalid_params(e.to_string()))
}

/// Runs a handler, turning panics (in the call or in the future) into
/// [`MethodError::Panicked`].
pub(crate) async fn run_handler(
    handler: &MethodHandler,
    params: Option<Value>,
    ctx: CallContext,
) -> Result<Value, MethodError> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(params, ctx))) {
        Ok(future) => future,
        Err(payload) => return Err(MethodError::panicked(payload)),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(MethodError::panicked(payload)),
    }
}
