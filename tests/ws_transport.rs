//! Integration tests for the WebSocket hub.
//!
//! Each test serves the hub on a random port and connects real clients via
//! tokio-tungstenite.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsFrame;

use optimizer_hub::config::{DispatchConfig, RegistryConfig, TransportConfig};
use optimizer_hub::dispatch::{Dispatcher, spawn_dispatch_loop};
use optimizer_hub::optimization::{OptimizationConfiguration, OptimizationRegistry, ParameterDefinition};
use optimizer_hub::protocol::{
    Message, OptimizationToolStatus, PresenceStatus, SimulationResult, TaskState,
};
use optimizer_hub::router::{ContactRouter, spawn_progress_forwarder};
use optimizer_hub::transport::{Transport, TransportEvent, WsHub};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve a hub on a random port, return (port, hub).
async fn start_hub(
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
) -> (u16, Arc<WsHub>) {
    let hub = WsHub::new(config, events);
    let app = hub.router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, hub)
}

fn parse_frame(frame: &WsFrame) -> Value {
    match frame {
        WsFrame::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from hub"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

fn presence_frame(status: &PresenceStatus) -> WsFrame {
    let frame = json!({
        "kind": "presence",
        "available": true,
        "status": serde_json::to_value(status).unwrap(),
    });
    WsFrame::Text(frame.to_string().into())
}

fn message_frame(message: &Message) -> WsFrame {
    let frame = json!({ "kind": "message", "body": message.encode().unwrap() });
    WsFrame::Text(frame.to_string().into())
}

/// Wait until the hub reports `jid` as connected.
async fn wait_connected(hub: &WsHub, jid: &str) {
    while !hub.connected().await.iter().any(|j| j == jid) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Transport ────────────────────────────────────────────────────────

#[tokio::test]
async fn presence_and_disconnect_become_events() {
    timeout(TEST_TIMEOUT, async {
        let (events_tx, mut events) = mpsc::channel(16);
        let (port, hub) = start_hub(TransportConfig::default(), events_tx).await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=sm1"))
            .await
            .expect("WS connect failed");
        let status = PresenceStatus::SimulationManager {
            simulation_configuration_id: Some("cfg".into()),
            simulation_id: None,
        };
        ws.send(presence_frame(&status)).await.unwrap();

        let TransportEvent::Presence {
            from,
            available,
            status: body,
        } = events.recv().await.unwrap()
        else {
            panic!("expected presence");
        };
        assert_eq!(from, "sm1");
        assert!(available);
        assert_eq!(PresenceStatus::decode(&body.unwrap()).unwrap(), status);
        assert_eq!(hub.connected().await, vec!["sm1"]);

        ws.close(None).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Presence {
                from: "sm1".into(),
                available: false,
                status: None,
            }
        );
        assert!(hub.connected().await.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stale_session_close_keeps_reconnected_remote_present() {
    timeout(TEST_TIMEOUT, async {
        let (events_tx, mut events) = mpsc::channel(16);
        let (port, hub) = start_hub(TransportConfig::default(), events_tx).await;
        let url = format!("ws://127.0.0.1:{port}/ws?jid=sm1");

        let (mut first, _resp) = connect_async(&url).await.unwrap();
        wait_connected(&hub, "sm1").await;
        let (mut second, _resp) = connect_async(&url).await.unwrap();
        // The second session owns the slot once its frames are attributed.
        second
            .send(presence_frame(&PresenceStatus::Orchestrator))
            .await
            .unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            TransportEvent::Presence { available: true, .. }
        ));

        first.close(None).await.unwrap();
        while let Some(Ok(_)) = first.next().await {}
        // Give the old session time to tear down.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(hub.connected().await, vec!["sm1"]);

        second.close(None).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Presence {
                from: "sm1".into(),
                available: false,
                status: None,
            }
        );
        assert!(hub.connected().await.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn send_and_publish_reach_connected_remote() {
    timeout(TEST_TIMEOUT, async {
        let (events_tx, _events) = mpsc::channel(16);
        let (port, hub) = start_hub(TransportConfig::default(), events_tx).await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=soo"))
            .await
            .unwrap();
        wait_connected(&hub, "soo").await;

        let message = Message::cancelled("t1", None);
        hub.send("soo", &message).await.unwrap();
        let frame = parse_frame(&ws.next().await.unwrap().unwrap());
        assert_eq!(frame["kind"], "message");
        assert_eq!(frame["from"], "optimizer-hub");
        assert_eq!(
            Message::decode(frame["body"].as_str().unwrap()).unwrap(),
            message
        );

        hub.publish_status(&PresenceStatus::OptimizationTool(
            OptimizationToolStatus::default(),
        ))
        .await
        .unwrap();
        let frame = parse_frame(&ws.next().await.unwrap().unwrap());
        assert_eq!(frame["kind"], "presence");
        assert_eq!(frame["available"], true);
        assert_eq!(frame["status"]["type"], "optimization_tool");

        assert!(hub.send("nobody", &message).await.is_err());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bad_token_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let (events_tx, _events) = mpsc::channel(16);
        let config = TransportConfig {
            token: Some("s3cret".to_string().into()),
            ..Default::default()
        };
        let (port, hub) = start_hub(config, events_tx).await;

        let denied = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=sm1&token=wrong")).await;
        assert!(denied.is_err());
        let missing = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=sm1")).await;
        assert!(missing.is_err());

        let (_ws, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=sm1&token=s3cret"))
            .await
            .expect("valid token should connect");
        wait_connected(&hub, "sm1").await;
    })
    .await
    .expect("test timed out");
}

// ── Full stack ───────────────────────────────────────────────────────

#[tokio::test]
async fn optimization_over_websocket() {
    timeout(TEST_TIMEOUT, async {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (port, hub) = start_hub(TransportConfig::default(), events_tx).await;
        let transport: Arc<dyn Transport> = hub.clone();

        let dispatcher = Dispatcher::new(Arc::clone(&transport));
        let registry = OptimizationRegistry::new(
            RegistryConfig::default(),
            Arc::clone(&dispatcher),
            Arc::clone(&transport),
        );
        let dispatch = DispatchConfig {
            tick_interval: Duration::from_millis(10),
        };
        let _dispatch = spawn_dispatch_loop(Arc::clone(&dispatcher), dispatch.tick_interval);
        let _forwarder = spawn_progress_forwarder(Arc::clone(&registry), Arc::clone(&transport));
        let router = ContactRouter::new(Arc::clone(&dispatcher), registry, transport);
        let _router = router.run(events_rx);

        // Worker: answers every simulation with the sum of its parameters.
        let (mut worker, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=sm1"))
            .await
            .unwrap();
        worker
            .send(presence_frame(&PresenceStatus::SimulationManager {
                simulation_configuration_id: Some("cfg".into()),
                simulation_id: None,
            }))
            .await
            .unwrap();
        tokio::spawn(async move {
            while let Some(Ok(frame)) = worker.next().await {
                let frame = parse_frame(&frame);
                if frame["kind"] != "message" {
                    continue;
                }
                let Ok(Message::RunSimulation {
                    optimization_id,
                    simulation_id,
                    parameters,
                    ..
                }) = Message::decode(frame["body"].as_str().unwrap())
                else {
                    continue;
                };
                let result = Message::SimulationResult(SimulationResult {
                    optimization_id,
                    simulation_id,
                    success: true,
                    fitness_value: parameters.iter().map(|p| p.value).sum(),
                });
                if worker.send(message_frame(&result)).await.is_err() {
                    break;
                }
            }
        });

        // Orchestrator: submits and waits for completion.
        let (mut soo, _resp) = connect_async(format!("ws://127.0.0.1:{port}/ws?jid=soo"))
            .await
            .unwrap();
        soo.send(presence_frame(&PresenceStatus::Orchestrator))
            .await
            .unwrap();
        let configuration = OptimizationConfiguration {
            candidate_count: 3,
            generation_count: 2,
            simulation_timeout_seconds: 5,
            fitness_threshold: 1000.0,
            parameters: vec![ParameterDefinition {
                name: "x".into(),
                meta: String::new(),
                scale: 1.0,
            }],
            ..Default::default()
        };
        soo.send(message_frame(&Message::StartOptimization {
            optimization_id: "t1".into(),
            simulation_configuration_id: "cfg".into(),
            configuration,
        }))
        .await
        .unwrap();

        let mut started = false;
        loop {
            let frame = parse_frame(&soo.next().await.unwrap().unwrap());
            if frame["kind"] != "message" {
                continue;
            }
            match Message::decode(frame["body"].as_str().unwrap()).unwrap() {
                Message::OptimizationStarted { description, .. } => {
                    assert!(description.is_none());
                    started = true;
                }
                Message::OptimizationStatus {
                    snapshot: Some(snapshot),
                    ..
                } if snapshot.state == TaskState::Complete => {
                    assert_eq!(snapshot.generation, 2);
                    assert_eq!(snapshot.candidates.len(), 3);
                    break;
                }
                _ => {}
            }
        }
        assert!(started);
    })
    .await
    .expect("test timed out");
}
