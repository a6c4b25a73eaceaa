//! Port allocation and sidecar records
//!
//! The server takes the first free port at or above its preferred port.
//! Availability is established by the bind itself (the listener is kept),
//! so there is no test-then-rebind window. Once bound, the port record is
//! written atomically so discovery never observes a half-written file.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;

use driftwatch_core::{port_file_path, status_file_path, PortRecord, StatusRecord, SERVER_VERSION};

use crate::state::ServerContext;

/// Bind the first available port in `[preferred, end]`.
///
/// A preferred port of 0 asks the OS for an ephemeral port directly.
/// Returns the listener together with the port actually bound.
pub async fn bind_first_available(preferred: u16, end: u16) -> Result<(TcpListener, u16)> {
    if preferred == 0 {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .context("failed to bind an ephemeral port")?;
        let port = listener.local_addr()?.port();
        return Ok((listener, port));
    }

    for port in preferred..=end {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                if port != preferred {
                    tracing::info!(
                        "Preferred port {} busy, bound {} instead",
                        preferred,
                        port
                    );
                }
                return Ok((listener, port));
            }
            Err(e) => {
                tracing::debug!("Port {} unavailable: {}", port, e);
            }
        }
    }

    anyhow::bail!("no available port in range {}-{}", preferred, end)
}

/// Write the port record sidecar. Atomic: temp file + rename.
pub async fn write_port_record(ctx: &ServerContext) -> Result<()> {
    let record = PortRecord {
        port: ctx.port,
        ws_url: ctx.ws_url(),
        http_url: ctx.http_url(),
        pid: ctx.pid,
        start_time: Utc::now(),
        project_path: ctx.config.project_path.display().to_string(),
        server_version: Some(SERVER_VERSION.to_string()),
    };

    let path = port_file_path(&ctx.config.project_path);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(&record)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path)
        .await
        .context("failed to move port record into place")?;

    tracing::info!("Port record written: {}", path.display());
    Ok(())
}

/// Rewrite the status record sidecar with the current client count.
pub async fn write_status_record(ctx: &ServerContext) -> Result<()> {
    let record = StatusRecord {
        status: "running".to_string(),
        port: ctx.port,
        pid: ctx.pid,
        clients: ctx.clients.count(),
        project_path: ctx.config.project_path.display().to_string(),
        last_update: Utc::now(),
        uptime: ctx.uptime(),
    };

    let path = status_file_path(&ctx.config.project_path);
    let json = serde_json::to_string_pretty(&record)?;
    tokio::fs::write(&path, json).await?;
    Ok(())
}

/// Remove both sidecar files. Missing files are not an error.
pub async fn cleanup_records(project_path: &Path) {
    let _ = tokio::fs::remove_file(port_file_path(project_path)).await;
    let _ = tokio::fs::remove_file(status_file_path(project_path)).await;
    tracing::info!("Sidecar records removed");
}

/// Periodically refresh the status record while the server runs.
pub fn spawn_status_refresher(ctx: Arc<ServerContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ctx.config.status_interval);
        interval.tick().await; // the initial record is written at startup
        loop {
            interval.tick().await;
            if let Err(e) = write_status_record(&ctx).await {
                tracing::warn!("Failed to refresh status record: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn test_context(dir: &Path, port: u16) -> ServerContext {
        let config = ServerConfig {
            project_path: dir.to_path_buf(),
            ..ServerConfig::default()
        };
        ServerContext::new(config, port)
    }

    #[tokio::test]
    async fn binds_preferred_port_when_free() {
        // Ephemeral bind to find a port that is free right now
        let probe = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let free = probe.local_addr().unwrap().port();
        drop(probe);

        let (listener, port) = bind_first_available(free, free).await.unwrap();
        assert_eq!(port, free);
        drop(listener);
    }

    #[tokio::test]
    async fn scans_past_occupied_port() {
        let held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();

        // busy is taken, so the scan must land on a later port
        let (listener, port) = bind_first_available(busy, busy.saturating_add(20))
            .await
            .unwrap();
        assert!(port > busy);
        drop(listener);
        drop(held);
    }

    #[tokio::test]
    async fn errors_when_range_exhausted() {
        let held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();

        let result = bind_first_available(busy, busy).await;
        assert!(result.is_err());
        drop(held);
    }

    #[tokio::test]
    async fn port_record_round_trips_through_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), 3456);

        write_port_record(&ctx).await.unwrap();
        let raw = tokio::fs::read_to_string(port_file_path(dir.path()))
            .await
            .unwrap();
        let record: PortRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.port, 3456);
        assert!(record.ws_url.ends_with(":3456/ws"));
        assert_eq!(record.pid, std::process::id());

        cleanup_records(dir.path()).await;
        assert!(!port_file_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn status_record_reflects_uptime_and_clients() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path(), 3456);

        write_status_record(&ctx).await.unwrap();
        let raw = tokio::fs::read_to_string(status_file_path(dir.path()))
            .await
            .unwrap();
        let record: StatusRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.status, "running");
        assert_eq!(record.clients, 0);
        assert!(record.uptime >= 0.0);
    }
}
