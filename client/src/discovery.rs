//! Port discovery
//!
//! Resolves which port a running server is bound to, in order:
//!
//! 1. the `.mcp-port.json` sidecar, if its port answers a liveness probe;
//! 2. a health scan across the configured range, accepting the first
//!    (lowest) port that is healthy AND confirms service identity via
//!    `/api/status` - a random service answering `/health` on a shared
//!    port range must not be mistaken for ours;
//! 3. nothing - the caller decides whether to fall back to the default
//!    port and risk the connection failing.
//!
//! Probing is read-only and bounded by `range_size x probe_timeout`.

use std::path::Path;

use driftwatch_core::{port_file_path, PortRecord};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// How a port was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    /// Read from the sidecar record and verified live.
    PortFile,
    /// Found by scanning the range with health probes.
    HealthProbe,
}

/// A discovered, probe-verified server port.
#[derive(Debug, Clone)]
pub struct DiscoveredPort {
    pub port: u16,
    pub source: PortSource,
    /// WebSocket URL advertised by the record, when one was read.
    pub ws_url: Option<String>,
    /// Every port that answered the health probe during the scan.
    pub healthy_ports: Vec<u16>,
}

/// Read and parse the port record sidecar. Any failure is treated as
/// "no record" - a stale or half-written file must not break discovery.
pub async fn read_port_record(project_path: &Path) -> Option<PortRecord> {
    let path = port_file_path(project_path);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("No port record at {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<PortRecord>(&raw) {
        Ok(record) => {
            tracing::info!("Port record found: port {}", record.port);
            Some(record)
        }
        Err(e) => {
            tracing::warn!("Unreadable port record at {}: {}", path.display(), e);
            None
        }
    }
}

async fn get_json(
    http: &reqwest::Client,
    config: &ClientConfig,
    port: u16,
    path: &str,
) -> Option<serde_json::Value> {
    let url = format!("{}{}", config.http_url(port), path);
    let response = http
        .get(&url)
        .timeout(config.probe_timeout)
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json().await.ok()
}

/// Liveness probe: `GET /health` answering `{"status":"healthy"}`.
pub async fn probe_health(http: &reqwest::Client, config: &ClientConfig, port: u16) -> bool {
    match get_json(http, config, port, "/health").await {
        Some(body) => body.get("status").and_then(|s| s.as_str()) == Some("healthy"),
        None => false,
    }
}

/// Identity probe: `GET /api/status` answering `{"status":"running"}`.
pub async fn confirm_identity(http: &reqwest::Client, config: &ClientConfig, port: u16) -> bool {
    match get_json(http, config, port, "/api/status").await {
        Some(body) => body.get("status").and_then(|s| s.as_str()) == Some("running"),
        None => false,
    }
}

/// Run the discovery sequence.
pub async fn discover(config: &ClientConfig) -> ClientResult<DiscoveredPort> {
    let http = reqwest::Client::new();

    // 1. Sidecar record, trusted only after a live probe
    if let Some(record) = read_port_record(&config.project_path).await {
        if probe_health(&http, config, record.port).await {
            tracing::info!("Discovered port {} from port record", record.port);
            return Ok(DiscoveredPort {
                port: record.port,
                source: PortSource::PortFile,
                ws_url: Some(record.ws_url),
                healthy_ports: vec![record.port],
            });
        }
        tracing::warn!(
            "Port record names port {} but it failed the liveness probe; falling back to range scan",
            record.port
        );
    }

    // 2. Range scan, first confirmed port wins
    let (start, end) = config.port_range;
    tracing::info!("Scanning port range {}-{}", start, end);
    let mut healthy_ports = Vec::new();
    for port in start..=end {
        if !probe_health(&http, config, port).await {
            continue;
        }
        healthy_ports.push(port);
        if confirm_identity(&http, config, port).await {
            tracing::info!("Discovered port {} by health scan", port);
            return Ok(DiscoveredPort {
                port,
                source: PortSource::HealthProbe,
                ws_url: None,
                healthy_ports,
            });
        }
        tracing::debug!("Port {} is healthy but not ours, continuing", port);
    }

    // 3. Nothing found
    Err(ClientError::NoServerFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP stub answering /health and /api/status.
    async fn spawn_http_stub(identity: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let body = if request.starts_with("GET /health") {
                        r#"{"status":"healthy","port":0,"uptime":1.0}"#.to_string()
                    } else if request.starts_with("GET /api/status") && identity {
                        r#"{"status":"running","clients":0}"#.to_string()
                    } else {
                        r#"{"status":"unknown"}"#.to_string()
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    fn test_config(dir: &Path, range: (u16, u16)) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            project_path: dir.to_path_buf(),
            port_range: range,
            probe_timeout: std::time::Duration::from_millis(500),
            ..ClientConfig::default()
        }
    }

    async fn write_record(dir: &Path, port: u16) {
        let record = PortRecord {
            port,
            ws_url: format!("ws://127.0.0.1:{}/ws", port),
            http_url: format!("http://127.0.0.1:{}", port),
            pid: 1,
            start_time: chrono::Utc::now(),
            project_path: dir.display().to_string(),
            server_version: Some("2.0.0".to_string()),
        };
        tokio::fs::write(
            port_file_path(dir),
            serde_json::to_string_pretty(&record).unwrap(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn live_port_record_wins_without_range_scan() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_http_stub(true).await;
        write_record(dir.path(), addr.port()).await;

        // A range that cannot contain the stub: if discovery tried to scan
        // it instead of trusting the record, it would find nothing
        let config = test_config(dir.path(), (1, 1));
        let discovered = discover(&config).await.unwrap();
        assert_eq!(discovered.port, addr.port());
        assert_eq!(discovered.source, PortSource::PortFile);
        assert!(discovered.ws_url.unwrap().contains(&addr.port().to_string()));
    }

    #[tokio::test]
    async fn stale_record_falls_through_to_scan() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_http_stub(true).await;
        // Record points at a dead port; the scan range contains the stub
        write_record(dir.path(), 1).await;

        let config = test_config(dir.path(), (addr.port(), addr.port()));
        let discovered = discover(&config).await.unwrap();
        assert_eq!(discovered.port, addr.port());
        assert_eq!(discovered.source, PortSource::HealthProbe);
    }

    #[tokio::test]
    async fn nothing_live_reports_no_server_found() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), 1).await;

        let config = test_config(dir.path(), (1, 1));
        let result = discover(&config).await;
        assert!(matches!(result, Err(ClientError::NoServerFound)));
    }

    #[tokio::test]
    async fn healthy_but_foreign_service_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // Answers /health but fails the /api/status identity check
        let addr = spawn_http_stub(false).await;

        let config = test_config(dir.path(), (addr.port(), addr.port()));
        let result = discover(&config).await;
        assert!(matches!(result, Err(ClientError::NoServerFound)));
    }

    #[tokio::test]
    async fn corrupt_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(port_file_path(dir.path()), "{not json")
            .await
            .unwrap();
        assert!(read_port_record(dir.path()).await.is_none());
    }
}
