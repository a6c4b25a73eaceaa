//! Client error taxonomy
//!
//! Every failure surfaced to a caller is classified: a machine kind (the
//! enum variant), a severity tier, a ready-to-display message, and a
//! retryable flag. Retries happen only for transport and timeout failures;
//! validation and not-found errors indicate a caller bug and never retry.

use serde::Serialize;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// How bad a failure is, for health reporting and user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Errors surfaced by the driftwatch client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket-level failure: connect refused, handshake failure, broken pipe.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with an error payload.
    #[error("server error: {message}")]
    Protocol {
        message: String,
        code: Option<i32>,
        data: Option<serde_json::Value>,
    },

    /// No response arrived within the request timeout (after retries).
    #[error("request timed out after {attempts} attempt(s), last correlation id {last_id}")]
    Timeout { attempts: u32, last_id: u64 },

    /// An operation needed an open connection and there was none.
    #[error("not connected to a server")]
    NotConnected,

    /// The connection was closed while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The arguments were rejected before dispatch.
    #[error("invalid arguments: {0}")]
    Validation(String),

    /// The named tool or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The handler failed on the server side.
    #[error("server internal error: {0}")]
    ServerInternal(String),

    /// Discovery found no live server in the configured range.
    #[error("no running server discovered")]
    NoServerFound,

    /// Bad client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether retrying the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout { .. } | Self::NoServerFound
        )
    }

    /// Severity tier for display and health reporting.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Transport(_) | Self::NotConnected | Self::ConnectionClosed => Severity::High,
            Self::Timeout { .. } | Self::Protocol { .. } | Self::ServerInternal(_) => {
                Severity::Medium
            }
            Self::NoServerFound => Severity::Medium,
            Self::Validation(_) | Self::NotFound(_) | Self::Json(_) => Severity::Low,
            Self::Config(_) => Severity::Critical,
        }
    }

    /// A short message fit for direct display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(_) => "Connection to the server failed.".to_string(),
            Self::Protocol { message, .. } => format!("The server reported an error: {}", message),
            Self::Timeout { .. } => "The request timed out. Try again shortly.".to_string(),
            Self::NotConnected => "Not connected to a server.".to_string(),
            Self::ConnectionClosed => "The connection was closed.".to_string(),
            Self::Validation(message) => format!("Invalid request: {}", message),
            Self::NotFound(what) => format!("Not found: {}", what),
            Self::ServerInternal(_) => "The server hit an internal error.".to_string(),
            Self::NoServerFound => "No running server was found.".to_string(),
            Self::Config(message) => format!("Configuration problem: {}", message),
            Self::Json(_) => "Received a malformed response.".to_string(),
        }
    }

    /// Classify an error payload from a JSON-RPC response.
    pub fn from_rpc_error(error: &serde_json::Value) -> Self {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("server error")
            .to_string();
        let code = error.get("code").and_then(|c| c.as_i64()).map(|c| c as i32);
        match code {
            Some(-32601) => Self::NotFound(message),
            Some(-32602) => Self::Validation(message),
            Some(-32603) => Self::ServerInternal(message),
            _ => Self::Protocol {
                message,
                code,
                data: error.get("data").cloned(),
            },
        }
    }
}
