//! Integration tests for the session engine, run over in-memory connection
//! pairs. "Raw" tests drive one end by hand with JSON frames; the others
//! run a session on both ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use wsrpc_namespace::{parse_params, MethodError, Namespace, NamespaceOptions};
use wsrpc_protocol::{JsonCodec, RequestId};
use wsrpc_session::{CallError, IdGenerator, NotificationKind, Session, SessionConfig};
use wsrpc_transport::{memory_pair, CloseReason, Connection, Inbound, MemoryConnection};

fn namespace() -> Namespace {
    let ns = Namespace::new("/", NamespaceOptions::default()).unwrap();
    ns.register_method("sum", |params, _ctx| async move {
        let (a, b): (i64, i64) = parse_params(params)?;
        Ok(json!(a + b))
    })
    .unwrap();
    ns.register_method("hang", |_params, _ctx| {
        std::future::pending::<Result<Value, MethodError>>()
    })
    .unwrap();
    ns
}

/// A session on one end, and the bare other end for the test to drive.
fn raw(ns: &Namespace) -> (Session<MemoryConnection>, MemoryConnection) {
    let (a, b) = memory_pair();
    let (session, _done) = Session::spawn(a, ns.clone(), JsonCodec, SessionConfig::default())
        .expect("namespace should be open");
    (session, b)
}

struct Engines {
    server: Session<MemoryConnection>,
    server_done: JoinHandle<CloseReason>,
    client: Session<MemoryConnection>,
    client_done: JoinHandle<CloseReason>,
}

fn engines(server_ns: &Namespace, client_config: SessionConfig) -> Engines {
    let (a, b) = memory_pair();
    let client_ns = Namespace::new("/", NamespaceOptions::default()).unwrap();
    let (server, server_done) =
        Session::spawn(a, server_ns.clone(), JsonCodec, SessionConfig::default()).unwrap();
    let (client, client_done) = Session::spawn(b, client_ns, JsonCodec, client_config).unwrap();
    Engines {
        server,
        server_done,
        client,
        client_done,
    }
}

async fn send(peer: &MemoryConnection, frame: &str) {
    peer.send(frame.as_bytes()).await.unwrap();
}

async fn recv_json(peer: &MemoryConnection) -> Value {
    match peer.recv().await.unwrap() {
        Inbound::Message(data) => serde_json::from_slice(&data).unwrap(),
        other => panic!("expected a frame, got {other:?}"),
    }
}

// =========================================================================
// Dispatch over raw frames
// =========================================================================

#[tokio::test]
async fn test_sum_request_gets_exact_reply() {
    let (_session, peer) = raw(&namespace());
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[2,3],"id":1}"#).await;
    assert_eq!(recv_json(&peer).await, json!({"jsonrpc":"2.0","result":5,"id":1}));
}

#[tokio::test]
async fn test_string_id_is_echoed() {
    let (_session, peer) = raw(&namespace());
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[1,1],"id":"abc"}"#).await;
    assert_eq!(recv_json(&peer).await["id"], json!("abc"));
}

#[tokio::test]
async fn test_undecodable_frame_gets_parse_error_with_null_id() {
    let (_session, peer) = raw(&namespace());
    send(&peer, "{not json").await;
    let reply = recv_json(&peer).await;
    assert_eq!(reply["error"]["code"], json!(-32700));
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["jsonrpc"], json!("2.0"));
}

#[tokio::test]
async fn test_unknown_method_is_method_not_found() {
    let (_session, peer) = raw(&namespace());
    send(&peer, r#"{"jsonrpc":"2.0","method":"nope","id":4}"#).await;
    let reply = recv_json(&peer).await;
    assert_eq!(reply["error"]["code"], json!(-32601));
    assert_eq!(reply["error"]["message"], json!("Method not found"));
    assert_eq!(reply["id"], json!(4));
}

#[tokio::test]
async fn test_wrong_version_is_invalid_request_keyed_by_id() {
    let (_session, peer) = raw(&namespace());
    send(&peer, r#"{"jsonrpc":"1.0","method":"sum","params":[1,2],"id":8}"#).await;
    let reply = recv_json(&peer).await;
    assert_eq!(reply["error"]["code"], json!(-32600));
    assert_eq!(reply["id"], json!(8));
}

#[tokio::test]
async fn test_batch_replies_in_order_and_skips_notifications() {
    let (_session, peer) = raw(&namespace());
    send(
        &peer,
        r#"[
            {"jsonrpc":"2.0","method":"sum","params":[2,3],"id":1},
            42,
            {"jsonrpc":"2.0","method":"tick","params":[1]}
        ]"#,
    )
    .await;

    let reply = recv_json(&peer).await;
    let items = reply.as_array().expect("batch reply");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], json!({"jsonrpc":"2.0","result":5,"id":1}));
    assert_eq!(items[1]["error"]["code"], json!(-32600));
    assert_eq!(items[1]["id"], Value::Null);
}

#[tokio::test]
async fn test_empty_batch_gets_single_error() {
    let (_session, peer) = raw(&namespace());
    send(&peer, "[]").await;
    let reply = recv_json(&peer).await;
    assert!(reply.is_object());
    assert_eq!(reply["error"]["code"], json!(-32600));
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn test_batch_of_notifications_sends_nothing() {
    let (_session, peer) = raw(&namespace());
    send(&peer, r#"[{"jsonrpc":"2.0","method":"a"},{"jsonrpc":"2.0","method":"b"}]"#).await;
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[0,1],"id":2}"#).await;
    // The first thing to come back is the reply to the later request.
    assert_eq!(recv_json(&peer).await["id"], json!(2));
}

#[tokio::test]
async fn test_notifications_never_get_a_reply() {
    let (_session, peer) = raw(&namespace());
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[2,3]}"#).await;
    send(&peer, r#"{"jsonrpc":"2.0","method":"rpc.unknown"}"#).await;
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[1,2],"id":3}"#).await;
    assert_eq!(recv_json(&peer).await, json!({"jsonrpc":"2.0","result":3,"id":3}));
}

#[tokio::test]
async fn test_unmatched_response_is_ignored() {
    let (session, peer) = raw(&namespace());
    send(&peer, r#"{"jsonrpc":"2.0","result":1,"id":999}"#).await;
    send(&peer, r#"{"jsonrpc":"2.0","error":{"code":-1,"message":"x"},"id":998}"#).await;
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[4,4],"id":5}"#).await;
    assert_eq!(recv_json(&peer).await["result"], json!(8));
    assert_eq!(session.pending(), 0);
}

#[tokio::test]
async fn test_panicking_handler_answers_server_error() {
    let ns = namespace();
    ns.register_method("explode", |_params, _ctx| async move {
        if true {
            panic!("kaboom");
        }
        Ok(Value::Null)
    })
    .unwrap();
    let (_session, peer) = raw(&ns);

    send(&peer, r#"{"jsonrpc":"2.0","method":"explode","id":1}"#).await;
    let reply = recv_json(&peer).await;
    assert_eq!(reply["error"]["code"], json!(-32000));
    assert_eq!(reply["error"]["data"], json!("kaboom"));

    // The engine keeps serving.
    send(&peer, r#"{"jsonrpc":"2.0","method":"sum","params":[1,1],"id":2}"#).await;
    assert_eq!(recv_json(&peer).await["result"], json!(2));
}

// =========================================================================
// Auth gate
// =========================================================================

#[tokio::test]
async fn test_protected_method_requires_login() {
    let ns = namespace();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    ns.register_method("secret", move |_params, _ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("42"))
        }
    })
    .unwrap()
    .protected();
    ns.set_auth(|params, _ctx| async move {
        let (user, password): (String, String) = parse_params(params)?;
        Ok(json!(user == "admin" && password == "hunter2"))
    })
    .unwrap();
    let (session, peer) = raw(&ns);

    send(&peer, r#"{"jsonrpc":"2.0","method":"secret","id":1}"#).await;
    assert_eq!(recv_json(&peer).await["error"]["code"], json!(-32605));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    send(&peer, r#"{"jsonrpc":"2.0","method":"rpc.login","id":2}"#).await;
    assert_eq!(recv_json(&peer).await["error"]["code"], json!(-32604));

    send(&peer, r#"{"jsonrpc":"2.0","method":"rpc.login","params":["admin","nope"],"id":3}"#).await;
    assert_eq!(recv_json(&peer).await["result"], json!(false));
    assert!(!session.is_authenticated());

    send(&peer, r#"{"jsonrpc":"2.0","method":"rpc.login","params":["admin","hunter2"],"id":4}"#).await;
    assert_eq!(recv_json(&peer).await["result"], json!(true));
    assert!(session.is_authenticated());

    send(&peer, r#"{"jsonrpc":"2.0","method":"secret","id":5}"#).await;
    assert_eq!(recv_json(&peer).await["result"], json!("42"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =========================================================================
// Correlation
// =========================================================================

#[tokio::test]
async fn test_call_between_engines() {
    let e = engines(&namespace(), SessionConfig::default());
    let result = e.client.call("sum", Some(json!([20, 22])), None).await.unwrap();
    assert_eq!(result, json!(42));
    assert_eq!(e.client.pending(), 0);
}

#[tokio::test]
async fn test_server_can_call_the_client() {
    let e = engines(&namespace(), SessionConfig::default());
    e.client
        .namespace()
        .register_method("whoami", |_params, _ctx| async move { Ok(json!("client")) })
        .unwrap();
    assert_eq!(e.server.call("whoami", None, None).await.unwrap(), json!("client"));
}

#[tokio::test]
async fn test_remote_error_carries_error_object() {
    let e = engines(&namespace(), SessionConfig::default());
    let err = e.client.call("sum", Some(json!({"a": 1})), None).await.unwrap_err();
    assert_eq!(err.remote().map(|e| e.code), Some(-32602));
}

#[tokio::test]
async fn test_call_rejects_misplaced_prefix() {
    let e = engines(&namespace(), SessionConfig::default());
    assert!(matches!(
        e.client.call("rpc.on", None, None).await,
        Err(CallError::InvalidMethod(_))
    ));
    assert!(matches!(
        e.client.call_internal("sum", None, None).await,
        Err(CallError::InvalidMethod(_))
    ));
    assert!(matches!(
        e.client.notify("rpc.x", None).await,
        Err(CallError::InvalidMethod(_))
    ));
}

#[tokio::test]
async fn test_duplicate_pending_id_is_refused_without_breaking_first_call() {
    let (a, peer) = memory_pair();
    let ns = Namespace::new("/", NamespaceOptions::default()).unwrap();
    let config = SessionConfig {
        id_generator: IdGenerator::custom(|| RequestId::from("fixed")),
        ..Default::default()
    };
    let (client, _done) = Session::spawn(a, ns, JsonCodec, config).unwrap();

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.call("echo", Some(json!(["one"])), None).await }
    });
    let request = recv_json(&peer).await;
    assert_eq!(request["id"], json!("fixed"));

    let second = client.call("echo", Some(json!(["two"])), None).await;
    assert!(matches!(second, Err(CallError::DuplicateId(id)) if id == RequestId::from("fixed")));
    assert_eq!(client.pending(), 1);

    send(&peer, r#"{"jsonrpc":"2.0","result":"one","id":"fixed"}"#).await;
    assert_eq!(first.await.unwrap().unwrap(), json!("one"));
    assert!(!client.is_closed());

    // Once the first call is done the id is free again.
    let third = tokio::spawn({
        let client = client.clone();
        async move { client.call("echo", Some(json!(["three"])), None).await }
    });
    assert_eq!(recv_json(&peer).await["id"], json!("fixed"));
    send(&peer, r#"{"jsonrpc":"2.0","result":"three","id":"fixed"}"#).await;
    assert_eq!(third.await.unwrap().unwrap(), json!("three"));
    assert_eq!(client.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_removes_entry_and_drops_late_reply() {
    let (a, peer) = memory_pair();
    let ns = Namespace::new("/", NamespaceOptions::default()).unwrap();
    let (client, _done) = Session::spawn(a, ns, JsonCodec, SessionConfig::default()).unwrap();

    let started = tokio::time::Instant::now();
    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call("slow", Some(json!([1])), Some(Duration::from_millis(50)))
                .await
        }
    });

    let request = recv_json(&peer).await;
    assert_eq!(request["method"], json!("slow"));

    let err = call.await.unwrap().unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(50));
    match err {
        CallError::Timeout {
            method,
            params,
            after,
        } => {
            assert_eq!(method, "slow");
            assert_eq!(params, Some(json!([1])));
            assert_eq!(after, Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(client.pending(), 0);

    // The late reply finds nothing to resolve.
    let late = json!({"jsonrpc":"2.0","result":"late","id":request["id"]});
    send(&peer, &late.to_string()).await;

    // A fresh call still correlates normally.
    let next = tokio::spawn({
        let client = client.clone();
        async move { client.call("fast", None, Some(Duration::from_secs(5))).await }
    });
    let request = recv_json(&peer).await;
    let reply = json!({"jsonrpc":"2.0","result":"ok","id":request["id"]});
    send(&peer, &reply.to_string()).await;
    assert_eq!(next.await.unwrap().unwrap(), json!("ok"));
}

#[tokio::test(start_paused = true)]
async fn test_config_timeout_applies_to_calls_without_one() {
    let config = SessionConfig {
        request_timeout: Some(Duration::from_millis(100)),
        ..SessionConfig::default()
    };
    let e = engines(&namespace(), config);
    let err = e.client.call("hang", None, None).await.unwrap_err();
    assert_eq!(err.to_string(), "request 'hang' timed out after 100ms");
}

#[tokio::test]
async fn test_close_rejects_pending_calls() {
    let e = engines(&namespace(), SessionConfig::default());
    let call = tokio::spawn({
        let client = e.client.clone();
        async move { client.call("hang", None, None).await }
    });
    while e.client.pending() == 0 {
        tokio::task::yield_now().await;
    }

    e.server.close(4000, "bye").await.unwrap();
    assert!(matches!(call.await.unwrap(), Err(CallError::ConnectionClosed)));
    assert_eq!(e.server_done.await.unwrap(), CloseReason::new(4000, "bye"));
    assert_eq!(e.client_done.await.unwrap(), CloseReason::new(4000, "bye"));
    assert!(e.client.is_closed());
    assert!(matches!(
        e.client.call("sum", Some(json!([1, 2])), None).await,
        Err(CallError::ConnectionClosed) | Err(CallError::Transport(_))
    ));
}

// =========================================================================
// Notifications
// =========================================================================

#[tokio::test]
async fn test_subscription_delivers_notifications() {
    let ns = namespace();
    ns.register_notification("tick").unwrap();
    let e = engines(&ns, SessionConfig::default());
    let (_id, mut ticks) = e.client.listeners().channel(NotificationKind::Public, "tick");

    let status = e
        .client
        .call_internal("rpc.on", Some(json!(["tick"])), None)
        .await
        .unwrap();
    assert_eq!(status, json!({"tick": "ok"}));

    assert_eq!(ns.send_notification("tick", Some(json!([1]))).unwrap(), 1);
    assert_eq!(ticks.recv().await, Some(Some(json!([1]))));

    e.client
        .call_internal("rpc.off", Some(json!(["tick"])), None)
        .await
        .unwrap();
    assert_eq!(ns.send_notification("tick", None).unwrap(), 0);
}

#[tokio::test]
async fn test_direct_notification_reaches_listener() {
    let e = engines(&namespace(), SessionConfig::default());
    let (_id, mut rx) = e.server.listeners().channel(NotificationKind::Public, "hello");
    e.client.notify("hello", Some(json!({"from": "client"}))).await.unwrap();
    assert_eq!(rx.recv().await, Some(Some(json!({"from": "client"}))));
}

#[tokio::test]
async fn test_namespace_close_ends_session() {
    let ns = namespace();
    let e = engines(&ns, SessionConfig::default());
    ns.close();
    assert_eq!(
        e.server_done.await.unwrap(),
        CloseReason::new(1000, "namespace closed")
    );
    assert!(e.client_done.await.unwrap().is_normal());
}
