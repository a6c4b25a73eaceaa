//! Tool implementations
//!
//! Each tool declares a schemars-derived parameter struct; the catalog's
//! `inputSchema` values are generated from those structs, and dispatch
//! validates incoming arguments by deserializing into them.

pub mod context;
pub mod deviation;
pub mod requirements;
pub mod sessions;

use async_trait::async_trait;
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use driftwatch_core::{
    json_result, port_file_path, status_file_path, CallToolResult, SERVER_NAME, SERVER_VERSION,
};

use crate::dispatch::{parse_args, ToolError, ToolHandler};
use crate::state::ServerContext;

/// Schema value for a parameter struct, for the tool catalog.
pub fn schema_value<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default()
}

// ============================================================================
// Parameter structs (wire names are camelCase, matching the JS clients)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeDeviationParams {
    /// File to score, absolute or relative to the project root.
    pub file_path: String,
    /// File content; read from disk when omitted.
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetProjectContextParams {
    #[serde(default)]
    pub include_history: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct GetServerInfoParams {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequirementsParams {
    /// New requirements document body.
    pub requirements: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    Basic,
    Detailed,
    Comprehensive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoGenerateRequirementsParams {
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub analysis_depth: Option<AnalysisDepth>,
    #[serde(default)]
    pub include_documents: Option<bool>,
    #[serde(default)]
    pub include_sessions: Option<bool>,
}

// ============================================================================
// get_server_info
// ============================================================================

pub struct GetServerInfo;

#[async_trait]
impl ToolHandler for GetServerInfo {
    fn name(&self) -> &'static str {
        "get_server_info"
    }

    fn description(&self) -> &'static str {
        "Report server identity, bound port, uptime, and client count"
    }

    fn input_schema(&self) -> serde_json::Value {
        schema_value::<GetServerInfoParams>()
    }

    async fn call(
        &self,
        ctx: &ServerContext,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        let _params: GetServerInfoParams = parse_args(self.name(), args)?;

        let info = json!({
            "serverName": SERVER_NAME,
            "version": SERVER_VERSION,
            "port": ctx.port,
            "pid": ctx.pid,
            "uptime": ctx.uptime(),
            "clients": ctx.clients.count(),
            "projectPath": ctx.config.project_path.display().to_string(),
            "portFile": port_file_path(&ctx.config.project_path).display().to_string(),
            "statusFile": status_file_path(&ctx.config.project_path).display().to_string(),
            "capabilities": ["auto-port-allocation", "client-discovery", "health-check", "file-watch"],
            "timestamp": Utc::now(),
        });

        json_result(&info).map_err(|e| ToolError::Internal(e.to_string()))
    }
}

/// The fixed tool set exposed by the dispatcher.
pub fn all() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(deviation::AnalyzeDeviation),
        Arc::new(context::GetProjectContext),
        Arc::new(GetServerInfo),
        Arc::new(requirements::UpdateRequirements),
        Arc::new(requirements::AutoGenerateRequirements),
    ]
}
