//! Correlator integration tests against an in-process WebSocket server.
//!
//! The mock server speaks just enough of the wire protocol to exercise the
//! client: it records every correlation id it sees and either echoes a
//! result, answers with an error payload, or stays silent.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use driftwatch_client::{ClientConfig, ClientError, McpClient};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Respond to every request with a result echoing the method.
    Echo,
    /// Respond to every request with an error payload.
    Error,
    /// Never respond to requests (pings are still answered).
    Silent,
}

type SeenIds = Arc<Mutex<Vec<u64>>>;

async fn spawn_mock_server(behavior: Behavior) -> (u16, SeenIds) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen: SeenIds = Arc::new(Mutex::new(Vec::new()));
    let seen_accept = Arc::clone(&seen);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let seen = Arc::clone(&seen_accept);
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut write, mut read) = ws.split();

                let welcome = json!({
                    "type": "welcome",
                    "serverInfo": {"name": "mock", "version": "0.0.0"},
                    "timestamp": "2024-01-01T00:00:00Z",
                });
                let _ = write.send(Message::Text(welcome.to_string())).await;

                while let Some(Ok(msg)) = read.next().await {
                    let Message::Text(text) = msg else { continue };
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };

                    if value.get("type").and_then(|t| t.as_str()) == Some("ping") {
                        let pong = json!({
                            "type": "pong",
                            "timestamp": "2024-01-01T00:00:00Z",
                        });
                        let _ = write.send(Message::Text(pong.to_string())).await;
                        continue;
                    }

                    let Some(id) = value.get("id").and_then(|v| v.as_u64()) else {
                        continue;
                    };
                    seen.lock().unwrap().push(id);

                    let response = match behavior {
                        Behavior::Echo => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {"echo": value["method"]},
                        }),
                        Behavior::Error => json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": -32000, "message": "boom"},
                        }),
                        Behavior::Silent => continue,
                    };
                    let _ = write.send(Message::Text(response.to_string())).await;
                }
            });
        }
    });

    (port, seen)
}

fn fast_config() -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        connection_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_millis(200),
        retry_delay: Duration::from_millis(50),
        max_request_retries: 0,
        ..ClientConfig::default()
    }
}

async fn connected_client(port: u16, config: ClientConfig) -> McpClient {
    let client = McpClient::with_url(format!("ws://127.0.0.1:{}/ws", port), config);
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn request_resolves_with_the_result() {
    let (port, _) = spawn_mock_server(Behavior::Echo).await;
    let client = connected_client(port, fast_config()).await;

    let result = client.send_request("tools/list", json!({})).await.unwrap();
    assert_eq!(result["echo"], "tools/list");

    client.close().await;
}

#[tokio::test]
async fn error_payload_rejects_with_protocol_error() {
    let (port, _) = spawn_mock_server(Behavior::Error).await;
    let client = connected_client(port, fast_config()).await;

    let result = client.send_request("tools/call", json!({})).await;
    match result {
        Err(ClientError::Protocol { message, code, .. }) => {
            assert_eq!(message, "boom");
            assert_eq!(code, Some(-32000));
        }
        other => panic!("expected protocol error, got {:?}", other.map(|_| ())),
    }

    client.close().await;
}

#[tokio::test]
async fn timeout_with_no_retry_budget_rejects_within_bound() {
    let (port, _) = spawn_mock_server(Behavior::Silent).await;
    let client = connected_client(port, fast_config()).await;

    let started = Instant::now();
    let result = client.send_request("tools/list", json!({})).await;
    let elapsed = started.elapsed();

    match result {
        Err(ClientError::Timeout { attempts, .. }) => assert_eq!(attempts, 1),
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }
    // timeout + epsilon: 200ms budget, generous slack for CI schedulers
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);

    client.close().await;
}

#[tokio::test]
async fn retries_resend_under_fresh_ids_then_reject() {
    let (port, seen) = spawn_mock_server(Behavior::Silent).await;
    let config = ClientConfig {
        max_request_retries: 2,
        ..fast_config()
    };
    let client = connected_client(port, config).await;

    let result = client.send_request("tools/list", json!({})).await;
    match result {
        Err(ClientError::Timeout { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected timeout, got {:?}", other.map(|_| ())),
    }

    // Give the server a beat to record the last resend
    tokio::time::sleep(Duration::from_millis(100)).await;
    let ids = seen.lock().unwrap().clone();
    assert_eq!(ids.len(), 3, "every attempt must use its own id: {:?}", ids);
    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(deduped.len(), 3, "ids must never repeat: {:?}", ids);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids grow monotonically");

    client.close().await;
}

#[tokio::test]
async fn concurrent_requests_correlate_independently() {
    let (port, seen) = spawn_mock_server(Behavior::Echo).await;
    let config = ClientConfig {
        request_timeout: Duration::from_secs(5),
        ..fast_config()
    };
    let client = connected_client(port, config).await;

    let calls: Vec<_> = (0..10)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .send_request(&format!("method_{}", i), json!({}))
                    .await
            })
        })
        .collect();

    for call in calls {
        let result = call.await.unwrap().unwrap();
        assert!(result["echo"].as_str().unwrap().starts_with("method_"));
    }

    let ids = seen.lock().unwrap().clone();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 10, "all ids distinct: {:?}", ids);

    client.close().await;
}

#[tokio::test]
async fn explicit_close_rejects_in_flight_requests() {
    let (port, _) = spawn_mock_server(Behavior::Silent).await;
    let config = ClientConfig {
        request_timeout: Duration::from_secs(30),
        ..fast_config()
    };
    let client = connected_client(port, config).await;

    let in_flight = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("tools/list", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    client.close().await;
    let result = in_flight.await.unwrap();

    assert!(
        matches!(result, Err(ClientError::ConnectionClosed)),
        "in-flight request must reject on close, not hang"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn requests_without_a_connection_are_rejected() {
    let client = McpClient::with_url("ws://127.0.0.1:1/ws", fast_config());
    let result = client.send_request("tools/list", json!({})).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
}

#[tokio::test]
async fn welcome_frame_populates_server_info() {
    let (port, _) = spawn_mock_server(Behavior::Echo).await;
    let client = connected_client(port, fast_config()).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = client.status();
    assert_eq!(status.server_info.unwrap().name, "mock");

    client.close().await;
}

#[tokio::test]
async fn manual_ping_gets_a_pong_heartbeat() {
    let (port, _) = spawn_mock_server(Behavior::Echo).await;
    let client = connected_client(port, fast_config()).await;

    assert!(client.ping());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.status().last_heartbeat.is_some());

    client.close().await;
}
