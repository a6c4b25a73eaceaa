//! Client configuration
//!
//! Environment-driven with documented defaults; every timeout and retry
//! budget is externally tunable. Defaults mirror the server's wire
//! contract: port range 3001-3050, 30s request timeout, 30s heartbeat.

use std::path::PathBuf;
use std::time::Duration;

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_ms(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname.
    pub host: String,
    /// WebSocket scheme (`ws` or `wss`).
    pub protocol: String,
    /// Port used when discovery finds nothing live.
    pub default_port: u16,
    /// Inclusive range scanned during health-probe discovery.
    pub port_range: (u16, u16),
    /// Project directory whose sidecar records are consulted first.
    pub project_path: PathBuf,
    /// Budget for the socket to reach the open state.
    pub connection_timeout: Duration,
    /// Per-request budget before a retry or a timeout error.
    pub request_timeout: Duration,
    /// Interval between liveness pings while connected.
    pub heartbeat_interval: Duration,
    /// Budget for each HTTP probe during discovery.
    pub probe_timeout: Duration,
    /// Reconnect attempts after an unexpected close.
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential reconnect backoff.
    pub reconnect_delay: Duration,
    /// Resends of a timed-out request before giving up.
    pub max_request_retries: u32,
    /// Base delay for linear retry backoff (attempt x delay).
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            protocol: "ws".to_string(),
            default_port: 3001,
            port_range: (3001, 3050),
            project_path: PathBuf::from("."),
            connection_timeout: Duration::from_millis(10_000),
            request_timeout: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(30_000),
            probe_timeout: Duration::from_millis(2_000),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1_000),
            max_request_retries: 2,
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

impl ClientConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `MCP_HOST`, `MCP_PROTOCOL`, `MCP_WEB_PORT`,
    /// `MCP_PORT_RANGE_START`, `MCP_PORT_RANGE_END`,
    /// `DRIFTWATCH_PROJECT_PATH`, `CONNECTION_TIMEOUT`, `REQUEST_TIMEOUT`,
    /// `HEARTBEAT_INTERVAL`, `HEALTH_CHECK_TIMEOUT` (all durations in ms).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let range_start = env_u16("MCP_PORT_RANGE_START").unwrap_or(defaults.port_range.0);
        let range_end = env_u16("MCP_PORT_RANGE_END").unwrap_or(defaults.port_range.1);
        Self {
            host: std::env::var("MCP_HOST").unwrap_or(defaults.host),
            protocol: std::env::var("MCP_PROTOCOL").unwrap_or(defaults.protocol),
            default_port: env_u16("MCP_WEB_PORT").unwrap_or(range_start),
            port_range: (range_start, range_end),
            project_path: std::env::var("DRIFTWATCH_PROJECT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.project_path),
            connection_timeout: env_ms("CONNECTION_TIMEOUT").unwrap_or(defaults.connection_timeout),
            request_timeout: env_ms("REQUEST_TIMEOUT").unwrap_or(defaults.request_timeout),
            heartbeat_interval: env_ms("HEARTBEAT_INTERVAL").unwrap_or(defaults.heartbeat_interval),
            probe_timeout: env_ms("HEALTH_CHECK_TIMEOUT").unwrap_or(defaults.probe_timeout),
            max_reconnect_attempts: env_u32("MCP_MAX_RECONNECT_ATTEMPTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_delay: env_ms("MCP_RECONNECT_DELAY").unwrap_or(defaults.reconnect_delay),
            max_request_retries: env_u32("MCP_REQUEST_RETRIES")
                .unwrap_or(defaults.max_request_retries),
            retry_delay: env_ms("MCP_RETRY_DELAY").unwrap_or(defaults.retry_delay),
        }
    }

    /// WebSocket URL for a port.
    pub fn ws_url(&self, port: u16) -> String {
        format!("{}://{}:{}/ws", self.protocol, self.host, port)
    }

    /// HTTP base URL for a port.
    pub fn http_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.host, port)
    }
}
