//! Request/response correlator
//!
//! A persistent WebSocket client that assigns a unique correlation id to
//! every outgoing call, resolves the matching pending entry when the
//! response arrives, and enforces a per-call timeout with a bounded retry
//! budget. Unexpected closes trigger discovery-backed reconnection with
//! exponential backoff; an explicit [`McpClient::close`] disables
//! reconnection and rejects every pending request so nothing hangs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use driftwatch_core::{
    CallToolResult, ClientFrame, JsonRpcRequest, ListResourcesResult, ListToolsResult, McpResource,
    ServerEvent, ServerInfo, ToolSchema,
};

use crate::config::ClientConfig;
use crate::discovery;
use crate::error::{ClientError, ClientResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsReader = futures_util::stream::SplitStream<WsStream>;
type Pending = oneshot::Sender<ClientResult<Value>>;

/// Connection lifecycle. Transitions drive heartbeat start/stop and
/// reconnect scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the client's health, for status displays.
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub current_port: Option<u16>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub discovered_ports: Vec<u16>,
    pub reconnect_attempts: u32,
    pub server_info: Option<ServerInfo>,
}

struct Inner {
    state: Mutex<ConnectionState>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Pending>>,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    auto_reconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
    /// Bumped on every (re)connect and on close; tasks from a previous
    /// connection see a stale value and exit instead of acting.
    generation: AtomicU64,
    current_port: Mutex<Option<u16>>,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,
    discovered_ports: Mutex<Vec<u16>>,
    server_info: Mutex<Option<ServerInfo>>,
    events: broadcast::Sender<ServerEvent>,
}

/// The driftwatch client.
#[derive(Clone)]
pub struct McpClient {
    config: ClientConfig,
    fixed_url: Option<String>,
    inner: Arc<Inner>,
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl McpClient {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            fixed_url: None,
            inner: Arc::new(Inner {
                state: Mutex::new(ConnectionState::Disconnected),
                next_id: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                writer: Mutex::new(None),
                auto_reconnect: AtomicBool::new(true),
                reconnect_attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                current_port: Mutex::new(None),
                last_heartbeat: Mutex::new(None),
                discovered_ports: Mutex::new(Vec::new()),
                server_info: Mutex::new(None),
                events,
            }),
        }
    }

    /// A client pinned to an explicit WebSocket URL, skipping discovery.
    pub fn with_url(url: impl Into<String>, config: ClientConfig) -> Self {
        let mut client = Self::new(config);
        client.fixed_url = Some(url.into());
        client
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.inner.state) = state;
    }

    /// Receiver for server-initiated events (file changes, requirements
    /// updates, shutdown notices, pongs).
    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.state(),
            current_port: *lock(&self.inner.current_port),
            last_heartbeat: *lock(&self.inner.last_heartbeat),
            discovered_ports: lock(&self.inner.discovered_ports).clone(),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::SeqCst),
            server_info: lock(&self.inner.server_info).clone(),
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Discover the server and open the transport. Re-enables
    /// auto-reconnect after an earlier [`close`](Self::close).
    pub async fn connect(&self) -> ClientResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner.auto_reconnect.store(true, Ordering::SeqCst);
        self.try_connect().await
    }

    async fn try_connect(&self) -> ClientResult<()> {
        self.set_state(ConnectionState::Connecting);

        let (url, port) = match &self.fixed_url {
            Some(url) => {
                let port = url::Url::parse(url).ok().and_then(|u| u.port());
                (url.clone(), port)
            }
            None => match discovery::discover(&self.config).await {
                Ok(found) => {
                    *lock(&self.inner.discovered_ports) = found.healthy_ports.clone();
                    let url = found
                        .ws_url
                        .clone()
                        .unwrap_or_else(|| self.config.ws_url(found.port));
                    (url, Some(found.port))
                }
                Err(ClientError::NoServerFound) => {
                    tracing::warn!(
                        "Discovery found no server; trying default port {}",
                        self.config.default_port
                    );
                    (
                        self.config.ws_url(self.config.default_port),
                        Some(self.config.default_port),
                    )
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            },
        };

        tracing::info!("Connecting to {}", url);
        let ws = match tokio::time::timeout(self.config.connection_timeout, connect_async(&url))
            .await
        {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Transport(e.to_string()));
            }
            Err(_) => {
                // The socket never reached the open state in time
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Transport(format!(
                    "connection to {} timed out after {:?}",
                    url, self.config.connection_timeout
                )));
            }
        };

        let (mut write, read) = ws.split();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = writer_rx.recv().await {
                if write.send(message).await.is_err() {
                    break;
                }
            }
        });

        *lock(&self.inner.writer) = Some(writer_tx);
        *lock(&self.inner.current_port) = port;
        self.set_state(ConnectionState::Connected);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        let reader_client = self.clone();
        tokio::spawn(async move { reader_client.read_loop(read, generation).await });

        let heartbeat_client = self.clone();
        tokio::spawn(async move { heartbeat_client.heartbeat_loop(generation).await });

        tracing::info!("Connected{}", match port {
            Some(p) => format!(" (port {})", p),
            None => String::new(),
        });
        Ok(())
    }

    /// Disable auto-reconnect, reject every pending request, and close the
    /// transport. No request is left hanging.
    pub async fn close(&self) {
        tracing::info!("Closing client connection");
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        self.reject_all(|| ClientError::ConnectionClosed);

        let writer = lock(&self.inner.writer).take();
        if let Some(writer) = writer {
            let _ = writer.send(Message::Close(None));
        }
        *lock(&self.inner.current_port) = None;
    }

    fn reject_all(&self, make_error: impl Fn() -> ClientError) {
        let drained: Vec<(u64, Pending)> = lock(&self.inner.pending).drain().collect();
        for (id, sender) in drained {
            tracing::debug!("Rejecting pending request {}", id);
            let _ = sender.send(Err(make_error()));
        }
    }

    async fn read_loop(self, mut read: WsReader, generation: u64) {
        while let Some(message) = read.next().await {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return; // superseded by a newer connection or an explicit close
            }
            match message {
                Ok(Message::Text(text)) => self.handle_text(&text),
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.on_transport_closed();
    }

    fn on_transport_closed(&self) {
        tracing::warn!("Connection closed unexpectedly");
        self.set_state(ConnectionState::Disconnected);
        *lock(&self.inner.writer) = None;
        self.reject_all(|| ClientError::Transport("connection closed unexpectedly".to_string()));

        if self.inner.auto_reconnect.load(Ordering::SeqCst) {
            let client = self.clone();
            tokio::spawn(async move { client.reconnect_loop().await });
        }
    }

    async fn reconnect_loop(&self) {
        for attempt in 1..=self.config.max_reconnect_attempts {
            if !self.inner.auto_reconnect.load(Ordering::SeqCst) {
                return;
            }
            self.inner.reconnect_attempts.store(attempt, Ordering::SeqCst);
            let delay = self.config.reconnect_delay * 2u32.saturating_pow(attempt - 1);
            tracing::info!(
                "Reconnect attempt {}/{} in {:?}",
                attempt,
                self.config.max_reconnect_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
            if !self.inner.auto_reconnect.load(Ordering::SeqCst) {
                return;
            }
            // Discovery runs again on every attempt; the server may have
            // restarted on a different port
            match self.try_connect().await {
                Ok(()) => {
                    tracing::info!("Reconnected after {} attempt(s)", attempt);
                    return;
                }
                Err(e) => tracing::warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
        tracing::warn!(
            "Reconnect budget ({}) exhausted; call connect() to try again",
            self.config.max_reconnect_attempts
        );
    }

    async fn heartbeat_loop(&self, generation: u64) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.tick().await; // fires immediately; the first beat waits a full period
        loop {
            interval.tick().await;
            if self.inner.generation.load(Ordering::SeqCst) != generation || !self.is_connected() {
                return;
            }
            let frame = ClientFrame::Ping {
                timestamp: Utc::now().to_rfc3339(),
            };
            // A failed heartbeat is observable via last_heartbeat staleness;
            // only transport close events force a disconnect
            if !self.send_frame(&frame) {
                tracing::warn!("Heartbeat send failed");
                return;
            }
        }
    }

    fn send_frame<T: serde::Serialize>(&self, frame: &T) -> bool {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize frame: {}", e);
                return false;
            }
        };
        let writer = lock(&self.inner.writer).clone();
        match writer {
            Some(writer) => writer.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    fn handle_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Unparseable message from server: {}", e);
                return;
            }
        };

        // Correlated response
        if let Some(id) = value.get("id").and_then(|v| v.as_u64()) {
            let sender = lock(&self.inner.pending).remove(&id);
            match sender {
                Some(sender) => {
                    let outcome = match value.get("error") {
                        Some(error) => Err(ClientError::from_rpc_error(error)),
                        None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                    };
                    let _ = sender.send(outcome);
                }
                None => {
                    // Response for a request that already timed out
                    tracing::debug!("Dropping response for unknown id {}", id);
                }
            }
            return;
        }

        // Server-initiated event frame
        if value.get("type").is_some() {
            match serde_json::from_value::<ServerEvent>(value) {
                Ok(event) => {
                    match &event {
                        ServerEvent::Welcome { server_info, .. } => {
                            *lock(&self.inner.server_info) = Some(server_info.clone());
                        }
                        ServerEvent::Pong { .. } => {
                            *lock(&self.inner.last_heartbeat) = Some(Utc::now());
                        }
                        _ => {}
                    }
                    let _ = self.inner.events.send(event);
                }
                Err(e) => tracing::debug!("Unrecognized event frame: {}", e),
            }
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Send a correlated request and await its response.
    ///
    /// Settles exactly once. On timeout the pending entry is removed and,
    /// while retry budget remains and the socket is still open, the call is
    /// resent under a fresh id after a linearly increasing delay.
    pub async fn send_request(&self, method: &str, params: Value) -> ClientResult<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if !self.is_connected() {
                return Err(ClientError::NotConnected);
            }

            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let text = serde_json::to_string(&JsonRpcRequest::new(id, method, params.clone()))?;

            let (done_tx, done_rx) = oneshot::channel();
            lock(&self.inner.pending).insert(id, done_tx);

            let writer = lock(&self.inner.writer).clone();
            let sent = match writer {
                Some(writer) => writer.send(Message::Text(text)).is_ok(),
                None => false,
            };
            if !sent {
                lock(&self.inner.pending).remove(&id);
                return Err(ClientError::NotConnected);
            }
            tracing::debug!("Request {} sent: {}", id, method);

            match tokio::time::timeout(self.config.request_timeout, done_rx).await {
                Ok(Ok(outcome)) => return outcome,
                // Resolver dropped without settling; only close paths do that
                Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
                Err(_) => {
                    lock(&self.inner.pending).remove(&id);
                    if attempt <= self.config.max_request_retries && self.is_connected() {
                        let delay = self.config.retry_delay * attempt;
                        tracing::warn!(
                            "Request {} ({}) timed out, retry {}/{} in {:?}",
                            id,
                            method,
                            attempt,
                            self.config.max_request_retries,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ClientError::Timeout {
                        attempts: attempt,
                        last_id: id,
                    });
                }
            }
        }
    }

    /// Fire-and-forget notification; the server sends no response.
    pub fn send_notification(&self, kind: &str, data: Value) -> ClientResult<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let request = JsonRpcRequest::notification(
            "notification",
            json!({
                "type": kind,
                "data": data,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
        if self.send_frame(&request) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Send a liveness ping outside the heartbeat schedule.
    pub fn ping(&self) -> bool {
        self.is_connected()
            && self.send_frame(&ClientFrame::Ping {
                timestamp: Utc::now().to_rfc3339(),
            })
    }

    // ========================================================================
    // Tool wrappers
    // ========================================================================

    pub async fn list_tools(&self) -> ClientResult<Vec<ToolSchema>> {
        let result = self.send_request("tools/list", json!({})).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)?;
        Ok(parsed.tools)
    }

    pub async fn list_resources(&self) -> ClientResult<Vec<McpResource>> {
        let result = self.send_request("resources/list", json!({})).await?;
        let parsed: ListResourcesResult = serde_json::from_value(result)?;
        Ok(parsed.resources)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<CallToolResult> {
        tracing::info!("Calling tool: {}", name);
        let result = self
            .send_request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn analyze_deviation(
        &self,
        file_path: &str,
        content: Option<&str>,
    ) -> ClientResult<CallToolResult> {
        self.call_tool(
            "analyze_deviation",
            json!({ "filePath": file_path, "content": content }),
        )
        .await
    }

    pub async fn get_project_context(&self, include_history: bool) -> ClientResult<CallToolResult> {
        self.call_tool(
            "get_project_context",
            json!({ "includeHistory": include_history }),
        )
        .await
    }

    pub async fn get_server_info(&self) -> ClientResult<CallToolResult> {
        self.call_tool("get_server_info", json!({})).await
    }

    pub async fn update_requirements(
        &self,
        requirements: &str,
        version: Option<&str>,
    ) -> ClientResult<CallToolResult> {
        self.call_tool(
            "update_requirements",
            json!({ "requirements": requirements, "version": version }),
        )
        .await
    }

    pub async fn auto_generate_requirements(&self, params: Value) -> ClientResult<CallToolResult> {
        self.call_tool("auto_generate_requirements", params).await
    }
}
