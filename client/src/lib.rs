//! Client SDK for the driftwatch server
//!
//! Connects to a running driftwatch instance without a pre-agreed port:
//! discovery consults the `.mcp-port.json` sidecar, falls back to a health
//! scan across the configured range, and only then to the default port.
//! Requests are correlated by unique ids with per-call timeout and retry;
//! unexpected closes trigger discovery-backed reconnection.
//!
//! ```rust,ignore
//! use driftwatch_client::{ClientConfig, McpClient};
//!
//! let client = McpClient::new(ClientConfig::from_env());
//! client.connect().await?;
//! let result = client.analyze_deviation("src/main.rs", None).await?;
//! client.close().await;
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;

pub use client::{ClientStatus, ConnectionState, McpClient};
pub use config::ClientConfig;
pub use discovery::{discover, DiscoveredPort, PortSource};
pub use error::{ClientError, ClientResult, Severity};
