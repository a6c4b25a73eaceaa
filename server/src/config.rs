//! Configuration loading
//!
//! Settings come from three layers, strongest first: environment variables,
//! an optional `.driftwatch.toml` found by walking up the directory tree,
//! and built-in defaults. The defaults match the documented wire contract
//! (port range 3001-3050, 30s request timeout, 25s tool timeout).

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Find a config file by walking up the directory tree from cwd.
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break, // Reached filesystem root
        }
    }

    None
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hostname used when building advertised URLs.
    pub host: String,
    /// WebSocket scheme used when building advertised URLs (`ws` or `wss`).
    pub protocol: String,
    /// First port tried when binding.
    pub preferred_port: u16,
    /// Inclusive upper bound of the bind scan.
    pub port_range_end: u16,
    /// Root of the project being watched; sidecar files live here.
    pub project_path: PathBuf,
    /// Per-tool-call execution budget. Deliberately shorter than the
    /// client's request timeout so the server fails first with a
    /// structured error.
    pub tool_timeout: Duration,
    /// How often the status sidecar is rewritten.
    pub status_interval: Duration,
    /// Whether to run the file-change broadcaster.
    pub watch: bool,
}

/// On-disk config file shape (`.driftwatch.toml`).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    timeout: TimeoutSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_protocol")]
    protocol: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_range_end")]
    port_range_end: u16,
    #[serde(default = "default_watch")]
    watch: bool,
}

#[derive(Debug, Deserialize)]
struct TimeoutSection {
    #[serde(default = "default_tool_timeout_ms")]
    tool_call_ms: u64,
    #[serde(default = "default_status_interval_ms")]
    status_update_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_protocol() -> String {
    "ws".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_range_end() -> u16 {
    3050
}

fn default_watch() -> bool {
    true
}

fn default_tool_timeout_ms() -> u64 {
    25_000
}

fn default_status_interval_ms() -> u64 {
    30_000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            protocol: default_protocol(),
            port: default_port(),
            port_range_end: default_range_end(),
            watch: default_watch(),
        }
    }
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            tool_call_ms: default_tool_timeout_ms(),
            status_update_ms: default_status_interval_ms(),
        }
    }
}

impl ServerConfig {
    /// Load config from `.driftwatch.toml` (if present) and the environment.
    ///
    /// Environment variables override file values:
    /// `MCP_HOST`, `MCP_PROTOCOL`, `MCP_WEB_PORT`, `MCP_PORT_RANGE_START`,
    /// `MCP_PORT_RANGE_END`, `TOOL_CALL_TIMEOUT`, `STATUS_UPDATE_INTERVAL`,
    /// `DRIFTWATCH_PROJECT_PATH`.
    pub fn load() -> Result<Self> {
        let file = match find_config_file(".driftwatch.toml") {
            Some(path) => {
                tracing::debug!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                tracing::debug!("No .driftwatch.toml found, using defaults");
                FileConfig::default()
            }
        };

        let project_path = match std::env::var("DRIFTWATCH_PROJECT_PATH") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => std::env::current_dir()?,
        };

        let preferred_port = env_u16("MCP_WEB_PORT")
            .or_else(|| env_u16("MCP_PORT_RANGE_START"))
            .unwrap_or(file.server.port);

        let config = Self {
            host: std::env::var("MCP_HOST").unwrap_or(file.server.host),
            protocol: std::env::var("MCP_PROTOCOL").unwrap_or(file.server.protocol),
            preferred_port,
            port_range_end: env_u16("MCP_PORT_RANGE_END").unwrap_or(file.server.port_range_end),
            project_path,
            tool_timeout: Duration::from_millis(
                env_u64("TOOL_CALL_TIMEOUT").unwrap_or(file.timeout.tool_call_ms),
            ),
            status_interval: Duration::from_millis(
                env_u64("STATUS_UPDATE_INTERVAL").unwrap_or(file.timeout.status_update_ms),
            ),
            watch: file.server.watch,
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<FileConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.preferred_port != 0 && self.preferred_port > self.port_range_end {
            anyhow::bail!(
                "invalid port range: {} > {}",
                self.preferred_port,
                self.port_range_end
            );
        }
        if self.tool_timeout.is_zero() || self.status_interval.is_zero() {
            anyhow::bail!("timeouts must be greater than zero");
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            protocol: default_protocol(),
            preferred_port: default_port(),
            port_range_end: default_range_end(),
            project_path: PathBuf::from("."),
            tool_timeout: Duration::from_millis(default_tool_timeout_ms()),
            status_interval: Duration::from_millis(default_status_interval_ms()),
            watch: default_watch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_fills_defaults() {
        let parsed: FileConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.server.port, 3001);
        assert_eq!(parsed.server.port_range_end, 3050);
        assert_eq!(parsed.timeout.tool_call_ms, 25_000);
    }

    #[test]
    fn file_config_partial_sections() {
        let parsed: FileConfig = toml::from_str(
            r#"
            [server]
            port = 4001

            [timeout]
            tool_call_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 4001);
        assert_eq!(parsed.server.host, "localhost");
        assert_eq!(parsed.timeout.tool_call_ms, 5000);
        assert_eq!(parsed.timeout.status_update_ms, 30_000);
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let config = ServerConfig {
            preferred_port: 4000,
            port_range_end: 3001,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = ServerConfig {
            tool_timeout: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ephemeral_preferred_port_is_allowed() {
        let config = ServerConfig {
            preferred_port: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
