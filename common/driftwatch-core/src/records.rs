//! Sidecar discovery records
//!
//! The server writes two JSON files next to the project it watches: a port
//! record on bind and a status record refreshed while running. Clients read
//! the port record during discovery but must never trust it alone - the
//! process may have died without cleanup, so a record is only as good as a
//! successful liveness probe against the port it names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the port record, relative to the project root.
pub const PORT_FILE_NAME: &str = ".mcp-port.json";

/// File name of the status record, relative to the project root.
pub const STATUS_FILE_NAME: &str = ".mcp-status.json";

/// Path of the port record for a project directory.
pub fn port_file_path(project_path: &Path) -> PathBuf {
    project_path.join(PORT_FILE_NAME)
}

/// Path of the status record for a project directory.
pub fn status_file_path(project_path: &Path) -> PathBuf {
    project_path.join(STATUS_FILE_NAME)
}

/// Written by the server on bind, removed on graceful shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub port: u16,
    pub ws_url: String,
    pub http_url: String,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub project_path: String,
    #[serde(default)]
    pub server_version: Option<String>,
}

/// Refreshed periodically while the server runs. Advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub status: String,
    pub port: u16,
    pub pid: u32,
    pub clients: usize,
    pub project_path: String,
    pub last_update: DateTime<Utc>,
    /// Seconds since the server started.
    pub uptime: f64,
}
