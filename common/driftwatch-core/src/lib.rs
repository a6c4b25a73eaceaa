//! Driftwatch Core - Shared wire protocol and discovery records
//!
//! This crate provides the types shared between the driftwatch server and
//! its clients:
//!
//! - **Protocol**: JSON-RPC 2.0 envelope, tool catalog shapes, and the
//!   server-event frames exchanged over the WebSocket transport
//! - **Records**: the `.mcp-port.json` / `.mcp-status.json` sidecar files
//!   used for out-of-band port discovery and health advertisement
//! - **Results**: helpers for building tool results and converting them to
//!   the rmcp shape for the stdio transport

pub mod protocol;
pub mod records;
pub mod result;

// Re-export commonly used items at crate root
pub use protocol::{
    CallToolParams, CallToolResult, ClientFrame, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListResourcesResult, ListToolsResult, McpResource, ServerEvent, ServerInfo, ToolContent,
    ToolSchema,
};
pub use records::{port_file_path, status_file_path, PortRecord, StatusRecord};
pub use result::{json_result, text_result};

/// Protocol version advertised in welcome frames and sidecar records.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name advertised to clients.
pub const SERVER_NAME: &str = "driftwatch";
