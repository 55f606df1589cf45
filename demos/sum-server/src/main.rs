use std::time::Duration;

use serde_json::json;
use tracing_subscriber::EnvFilter;
use wsrpc::prelude::*;
use wsrpc::DEFAULT_BIND;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

/// Registers the demo surface on the default namespace:
///
/// - `sum(a, b)`: public
/// - `secret()`: protected, needs `rpc.login` with `["demo", "demo"]`
/// - `tick`: a notification carrying a counter, sent every second
fn register(handle: &ServerHandle) -> Result<Namespace, WsrpcError> {
    let root = handle.of("/")?;

    root.register_method("sum", |params, _ctx| async move {
        let (a, b): (i64, i64) = parse_params(params)?;
        Ok(json!(a + b))
    })?;

    root.register_method("secret", |_params, ctx| async move {
        Ok(json!(format!("hello, {}", ctx.connection_id)))
    })?
    .protected();

    root.set_auth(|params, _ctx| async move {
        let (user, password): (String, String) = parse_params(params)?;
        Ok(json!(user == "demo" && password == "demo"))
    })?;

    root.register_notification("tick")?;
    Ok(root)
}

async fn tick(root: Namespace) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    let mut count: u64 = 0;
    loop {
        interval.tick().await;
        count += 1;
        if root.is_closed() {
            tracing::debug!("namespace closed, ticker stopping");
            return;
        }
        match root.send_notification("tick", Some(json!([count]))) {
            Ok(reached) => tracing::trace!(count, reached, "tick sent"),
            Err(e) => tracing::warn!(error = %e, "tick not sent"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bind = std::env::var("WSRPC_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    tracing::info!(%bind, "starting sum server");

    let server = Server::builder().bind(&bind).build().await?;
    let root = register(&server.handle())?;
    tokio::spawn(tick(root));

    server.run().await?;
    Ok(())
}
