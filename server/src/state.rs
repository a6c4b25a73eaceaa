//! Shared server state
//!
//! A single [`ServerContext`] owns everything the handlers need: the
//! resolved config, the bound port, the start instant, and the registry of
//! connected WebSocket clients. No process-global state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use driftwatch_core::ServerEvent;
use tokio::sync::mpsc::UnboundedSender;

/// Registry of connected WebSocket clients.
///
/// Each connection registers an outbound text channel; broadcasts serialize
/// the event once and fan it out best-effort (a closed channel just means
/// that client is gone and will be unregistered by its own task).
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    senders: RwLock<HashMap<u64, UnboundedSender<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel, returning its id.
    pub fn register(&self, sender: UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut senders) = self.senders.write() {
            senders.insert(id, sender);
        }
        id
    }

    /// Remove a connection.
    pub fn unregister(&self, id: u64) {
        if let Ok(mut senders) = self.senders.write() {
            senders.remove(&id);
        }
    }

    /// Number of currently connected clients.
    pub fn count(&self) -> usize {
        self.senders.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Push an event to every connected client. Best-effort, no retry.
    pub fn broadcast(&self, event: &ServerEvent) {
        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast event: {}", e);
                return;
            }
        };
        if let Ok(senders) = self.senders.read() {
            for sender in senders.values() {
                let _ = sender.send(text.clone());
            }
        }
    }
}

/// Everything a request handler needs, shared behind an `Arc`.
pub struct ServerContext {
    pub config: crate::config::ServerConfig,
    /// Port actually bound (0 in stdio mode, where no socket is open).
    pub port: u16,
    pub pid: u32,
    pub started_at: Instant,
    pub clients: ClientRegistry,
}

impl ServerContext {
    pub fn new(config: crate::config::ServerConfig, port: u16) -> Self {
        Self {
            config,
            port,
            pid: std::process::id(),
            started_at: Instant::now(),
            clients: ClientRegistry::new(),
        }
    }

    /// Seconds since the server started.
    pub fn uptime(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Advertised WebSocket URL for the bound port.
    pub fn ws_url(&self) -> String {
        format!(
            "{}://{}:{}/ws",
            self.config.protocol, self.config.host, self.port
        )
    }

    /// Advertised HTTP base URL for the bound port.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.port)
    }
}
