//! Internal methods every namespace answers.

use serde_json::Value;
use wsrpc_protocol::{ErrorCode, ErrorObject};

use crate::handler::{method_handler, CallContext, MethodError};
use crate::Namespace;

pub(crate) const ON: &str = "rpc.on";
pub(crate) const OFF: &str = "rpc.off";
pub(crate) const LIST_METHODS: &str = "rpc.listMethods";
pub(crate) const LIST_EVENTS: &str = "rpc.listEvents";

pub(crate) fn is_builtin(name: &str) -> bool {
    matches!(name, ON | OFF | LIST_METHODS | LIST_EVENTS)
}

pub(crate) fn install(namespace: &Namespace) {
    let builtins = [
        (ON, method_handler(on)),
        (OFF, method_handler(off)),
        (LIST_METHODS, method_handler(list_methods)),
        (LIST_EVENTS, method_handler(list_events)),
    ];
    for (name, handler) in builtins {
        // A fresh namespace is open and the names carry the prefix.
        let _ = namespace.register_handler(name, handler, true);
    }
}

/// Accepts `["a", "b"]` or a bare `"a"`.
fn event_names(params: Option<Value>) -> Result<Vec<String>, MethodError> {
    match params {
        None | Some(Value::Null) => Err(ErrorObject::new(ErrorCode::ServerError).into()),
        Some(Value::String(name)) => Ok(vec![name]),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(name),
                _ => Err(MethodError::invalid_params("event names must be strings")),
            })
            .collect(),
        Some(_) => Err(MethodError::invalid_params("expected an array of event names")),
    }
}

async fn on(params: Option<Value>, ctx: CallContext) -> Result<Value, MethodError> {
    let names = event_names(params)?;
    ctx.namespace
        .subscribe(ctx.connection_id, &names)
        .map(Value::Object)
        .map_err(MethodError::Rpc)
}

async fn off(params: Option<Value>, ctx: CallContext) -> Result<Value, MethodError> {
    let names = event_names(params)?;
    Ok(Value::Object(ctx.namespace.unsubscribe(ctx.connection_id, &names)))
}

async fn list_methods(_params: Option<Value>, ctx: CallContext) -> Result<Value, MethodError> {
    Ok(Value::from(ctx.namespace.method_names()))
}

async fn list_events(_params: Option<Value>, ctx: CallContext) -> Result<Value, MethodError> {
    Ok(Value::from(ctx.namespace.notification_names()))
}
