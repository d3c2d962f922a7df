//! Request/response correlation through the dispatcher and receive loop

mod common;

use common::*;
use maxwire::core::{
    AtomicConnectionState, AtomicMetrics, ConnectionState, Dispatcher, EventBus, TaskSupervisor,
};
use maxwire::core::receive_loop::run_receive_loop;
use maxwire::protocol::CMD_REQUEST;
use maxwire::{MaxWireError, Transport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Span;

struct Harness {
    transport: Arc<MockTransport>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventBus>,
    metrics: Arc<AtomicMetrics>,
    receive_loop: JoinHandle<MaxWireError>,
}

async fn harness() -> Harness {
    let transport = MockTransport::new(silent_server());
    transport.connect().await.unwrap();

    let state = Arc::new(AtomicConnectionState::new(ConnectionState::Running));
    state.set_connected(true);
    let metrics = Arc::new(AtomicMetrics::new());
    let dispatcher = Arc::new(Dispatcher::new(
        transport.clone(),
        state.clone(),
        metrics.clone(),
        11,
    ));
    let events = Arc::new(EventBus::new(
        16,
        Arc::new(TaskSupervisor::new(Span::none())),
        metrics.clone(),
    ));
    let receive_loop = tokio::spawn(run_receive_loop(
        transport.clone(),
        dispatcher.clone(),
        events.clone(),
        state,
        metrics.clone(),
    ));

    Harness {
        transport,
        dispatcher,
        events,
        metrics,
        receive_loop,
    }
}

#[tokio::test]
async fn test_responses_in_reverse_order_reach_their_own_callers() {
    let h = harness().await;

    let first = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .send_and_wait(48, json!({"n": 1}), CMD_REQUEST, Duration::from_secs(2))
                .await
        })
    };
    assert!(wait_until(Duration::from_secs(1), || h.transport.sent().len() == 1).await);
    let second = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .send_and_wait(48, json!({"n": 2}), CMD_REQUEST, Duration::from_secs(2))
                .await
        })
    };
    assert!(wait_until(Duration::from_secs(1), || h.transport.sent().len() == 2).await);

    let sent = h.transport.sent();
    verbose_println!("sent: {:?}", sent);
    h.transport.push(reply(&sent[1], json!({"answer": 2})));
    h.transport.push(reply(&sent[0], json!({"answer": 1})));

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.payload, json!({"answer": 1}));
    assert_eq!(second.payload, json!({"answer": 2}));
    assert_eq!(h.dispatcher.pending_count(), 0);
    assert_eq!(h.metrics.snapshot().frames_received, 2);
}

#[tokio::test]
async fn test_timeout_then_late_response_is_unsolicited() {
    let h = harness().await;
    let mut incoming = h.events.incoming_stream();

    let result = h
        .dispatcher
        .send_and_wait(48, json!({}), CMD_REQUEST, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(MaxWireError::Timeout(_))));
    assert_eq!(h.dispatcher.pending_count(), 0);

    let request = h.transport.sent()[0].clone();
    h.transport.push(reply(&request, json!({"late": true})));

    let late = tokio::time::timeout(Duration::from_secs(1), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(late.seq, request.seq);
    assert_eq!(late.payload, json!({"late": true}));
}

#[tokio::test]
async fn test_disconnect_fails_every_pending_request() {
    let h = harness().await;

    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .send_and_wait(48, json!({"i": i}), CMD_REQUEST, Duration::from_secs(5))
                    .await
            })
        })
        .collect();
    assert!(wait_until(Duration::from_secs(1), || h.dispatcher.pending_count() == 3).await);

    h.transport.drop_connection();

    let reason = tokio::time::timeout(Duration::from_secs(1), h.receive_loop)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reason, MaxWireError::ConnectionClosed(_)));

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Err(MaxWireError::NotConnected));
    }
    assert_eq!(h.dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn test_fanned_out_response_resolves_first_and_pushes_rest() {
    let h = harness().await;
    let mut incoming = h.events.incoming_stream();

    let waiter = {
        let dispatcher = h.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .send_and_wait(48, json!({}), CMD_REQUEST, Duration::from_secs(2))
                .await
        })
    };
    assert!(wait_until(Duration::from_secs(1), || h.transport.sent().len() == 1).await);

    let request = h.transport.sent()[0].clone();
    h.transport
        .push(reply(&request, json!([{"part": 1}, {"part": 2}])));

    let response = waiter.await.unwrap().unwrap();
    assert_eq!(response.payload, json!({"part": 1}));
    let rest = tokio::time::timeout(Duration::from_secs(1), incoming.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rest.payload, json!({"part": 2}));
}
