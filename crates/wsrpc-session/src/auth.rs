//! The login step.
//!
//! wsrpc does not authenticate anyone itself. A namespace installs a login
//! handler with [`Namespace::set_auth`], and the engine calls it for
//! `rpc.login` frames. A truthy result marks the connection authenticated,
//! which unlocks protected methods and notifications for it.

use serde_json::Value;
use wsrpc_namespace::{Namespace, LOGIN_METHOD};
use wsrpc_protocol::{ErrorCode, ErrorObject};
use wsrpc_transport::ConnectionId;

/// Loose truthiness of a login result: everything except `null`, `false`,
/// `0` and `""`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Runs the namespace's login handler for `connection_id`.
///
/// Answers -32604 without params and -32601 if no login handler is set.
pub(crate) async fn login(
    namespace: &Namespace,
    connection_id: ConnectionId,
    params: Option<Value>,
) -> Result<Value, ErrorObject> {
    if params.is_none() {
        return Err(ErrorObject::new(ErrorCode::ParamsNotFound));
    }
    let result = namespace.invoke(connection_id, LOGIN_METHOD, params).await?;
    if is_truthy(&result) {
        namespace.set_authenticated(connection_id, true);
        tracing::info!(namespace = namespace.name(), %connection_id, "connection authenticated");
    } else {
        tracing::debug!(namespace = namespace.name(), %connection_id, "login refused");
    }
    Ok(result)
}
