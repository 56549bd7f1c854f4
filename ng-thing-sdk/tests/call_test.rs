use ng_thing_sdk::{CallOptions, OpError, OperationRequest, TransportError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

mod common;
use common::{connected_thing, spawn_responder};

const GET: &str = "/sys/p1/d1/thing/config/get";
const GET_REPLY: &str = "/sys/p1/d1/thing/config/get_reply";

#[derive(Debug, PartialEq, Deserialize)]
struct RemoteConfig {
    interval: u32,
    mode: String,
}

#[tokio::test]
async fn test_call_completes_with_matching_reply() {
    let (thing, transport) = connected_thing().await;
    let caller = thing.caller::<Value, Value>(GET_REPLY, None).await.unwrap();

    // Foreign token first, then the real reply.
    let _responder = spawn_responder(transport.clone(), GET, GET_REPLY, |req| {
        vec![
            json!({"id": "9999", "code": 200, "message": "success", "data": {"stale": true}}),
            json!({"id": req["id"], "code": 200, "message": "success", "data": {"interval": 30}}),
        ]
    });

    let request = OperationRequest::new("1001", "thing.config.get", json!({}));
    let data = caller.call(GET, request).await.unwrap();

    assert_eq!(data, json!({"interval": 30}));
    assert_eq!(caller.pending(), 0);
    let stats = caller.statistics();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
    assert_eq!(stats.failure, 0);
}

#[tokio::test]
async fn test_request_wire_envelope() {
    let (thing, transport) = connected_thing().await;
    let caller = thing
        .caller::<Value, Value>(GET_REPLY, Some(CallOptions::default().with_timeout_ms(50)))
        .await
        .unwrap();
    let mut published = transport.published();

    let request = thing.request("thing.config.get", json!({"keys": ["interval"]}));
    let token = request.token.clone();
    let _ = caller.call(GET, request).await;

    let message = published.recv().await.unwrap();
    assert_eq!(message.topic, GET);
    assert_eq!(
        message.json(),
        json!({
            "id": token,
            "version": "1.0",
            "method": "thing.config.get",
            "sys": {"ack": 1},
            "params": {"keys": ["interval"]}
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_call_times_out_without_reply() {
    let (thing, _transport) = connected_thing().await;
    let caller = thing
        .caller::<Value, Value>(GET_REPLY, Some(CallOptions::default().with_timeout_ms(100)))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = caller
        .call(GET, thing.request("thing.config.get", json!({})))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "{err}");
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(caller.pending(), 0);
    let stats = caller.statistics();
    assert_eq!(stats.timeout, 1);
    assert_eq!(stats.failure, 1);
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn test_failure_kinds_are_distinct() {
    let (thing, transport) = connected_thing().await;
    let caller = thing
        .caller::<Value, RemoteConfig>(GET_REPLY, Some(CallOptions::default().with_timeout_ms(2_000)))
        .await
        .unwrap();

    // 1. Application error code, no data for the typed payload
    let _responder = spawn_responder(transport.clone(), GET, GET_REPLY, |req| {
        vec![json!({"id": req["id"], "code": 460, "message": "unknown key"})]
    });
    let err = caller
        .call(GET, thing.request("thing.config.get", json!({})))
        .await
        .unwrap_err();
    match err {
        OpError::Operation(e) => {
            assert_eq!(e.code, 460);
            assert_eq!(e.desc, "unknown key");
        }
        other => panic!("expected operation error, got {other:?}"),
    }

    // 2. Publish rejected by the transport
    transport.fail_publish(true);
    let err = caller
        .call(GET, thing.request("thing.config.get", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OpError::Transport(TransportError::Publish { .. })
    ));
    assert!(!err.is_timeout());
    assert_eq!(caller.pending(), 0);

    let stats = caller.statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.failure, 2);
    assert_eq!(stats.timeout, 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_bindings_keep_independent_tables() {
    let (thing, transport) = connected_thing().await;
    let options = Some(CallOptions::default().with_timeout_ms(200));
    let first = thing.caller::<Value, Value>("/a/#", options).await.unwrap();
    let second = thing.caller::<Value, Value>("/a/#", options).await.unwrap();

    // Only the first binding's token is ever answered.
    let _responder = spawn_responder(transport.clone(), "/req/first", "/a/reply", |req| {
        vec![json!({"id": req["id"], "code": 200, "data": "one"})]
    });

    let (a, b) = tokio::join!(
        first.call("/req/first", OperationRequest::new("1", "m", json!({}))),
        second.call("/req/second", OperationRequest::new("2", "m", json!({}))),
    );

    assert_eq!(a.unwrap(), json!("one"));
    assert!(b.unwrap_err().is_timeout());
    assert_eq!(first.statistics().success, 1);
    assert_eq!(second.statistics().timeout, 1);
}

#[tokio::test]
async fn test_fire_and_forget_requests() {
    let (thing, transport) = connected_thing().await;
    let caller = thing.caller::<Value, Value>(GET_REPLY, None).await.unwrap();
    let mut published = transport.published();

    let request = thing
        .request("thing.event.post", json!({"level": 1}))
        .without_reply();

    // A request that expects no reply cannot be awaited.
    let err = caller.call(GET, request.clone()).await.unwrap_err();
    assert!(matches!(err, OpError::InvalidRequest { .. }));
    assert_eq!(caller.pending(), 0);

    caller.fire(GET, request).await.unwrap();
    let message = published.recv().await.unwrap();
    assert_eq!(message.json()["sys"]["ack"], 0);
}

#[tokio::test]
async fn test_unbind_cancels_pending_calls() {
    let (thing, transport) = connected_thing().await;
    let caller = thing.caller::<Value, Value>(GET_REPLY, None).await.unwrap();

    let call = {
        let caller = caller.clone();
        let request = thing.request("thing.config.get", json!({}));
        tokio::spawn(async move { caller.call(GET, request).await })
    };
    while caller.pending() == 0 {
        tokio::task::yield_now().await;
    }

    transport.fail_unsubscribe(true);
    caller.unbind().await;
    caller.unbind().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(err.is_canceled(), "{err}");
    assert!(!caller.is_bound());
    assert_eq!(caller.statistics().canceled, 1);
    assert_eq!(transport.unsubscribes(), 1);
    assert_eq!(transport.active_subscriptions(), 0);
    assert_eq!(thing.active_bindings(), 0);
}

#[tokio::test]
async fn test_typed_reply_payload() {
    let (thing, transport) = connected_thing().await;
    let caller = thing
        .caller::<Value, RemoteConfig>(GET_REPLY, None)
        .await
        .unwrap();
    let _responder = spawn_responder(transport.clone(), GET, GET_REPLY, |req| {
        vec![json!({
            "id": req["id"],
            "code": 200,
            "message": "success",
            "data": {"interval": 15, "mode": "eco"}
        })]
    });

    let config = caller
        .call(GET, thing.request("thing.config.get", json!({})))
        .await
        .unwrap();
    assert_eq!(
        config,
        RemoteConfig {
            interval: 15,
            mode: "eco".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_call_releases_its_token() {
    let (thing, _transport) = connected_thing().await;
    let caller = thing
        .caller::<Value, Value>(GET_REPLY, Some(CallOptions::default().with_timeout_ms(50)))
        .await
        .unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        caller.call(GET, OperationRequest::new("42", "thing.config.get", json!({}))),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(caller.pending(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = caller.statistics();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.canceled, 1);

    // Same token can be used again and runs into its own timeout.
    let err = caller
        .call(GET, OperationRequest::new("42", "thing.config.get", json!({})))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(caller.pending(), 0);
    assert_eq!(caller.statistics().timeout, 1);
}
