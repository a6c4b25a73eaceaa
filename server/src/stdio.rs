//! MCP stdio transport
//!
//! Exposes the same tool set over a stdio MCP server for editor and agent
//! integrations that spawn the process directly instead of connecting over
//! WebSocket. All handlers delegate to the shared dispatcher, so behavior
//! (validation, timeout, audit logging) is identical on both transports.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::dispatch::ToolDispatcher;
use crate::tools::{
    AnalyzeDeviationParams, AutoGenerateRequirementsParams, GetProjectContextParams,
    GetServerInfoParams, UpdateRequirementsParams,
};

#[derive(Clone)]
pub struct DriftwatchMcpServer {
    dispatcher: Arc<ToolDispatcher>,
    tool_router: ToolRouter<Self>,
}

impl DriftwatchMcpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }

    async fn forward<T: serde::Serialize>(
        &self,
        name: &str,
        params: &T,
    ) -> Result<CallToolResult, McpError> {
        let args = serde_json::to_value(params)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(self.dispatcher.invoke(name, args).await.into_rmcp())
    }
}

#[tool_router]
impl DriftwatchMcpServer {
    #[tool(description = "Score a file against the project's deviation heuristics")]
    async fn analyze_deviation(
        &self,
        Parameters(params): Parameters<AnalyzeDeviationParams>,
    ) -> Result<CallToolResult, McpError> {
        self.forward("analyze_deviation", &params).await
    }

    #[tool(description = "Collect the project file listing and optional history")]
    async fn get_project_context(
        &self,
        Parameters(params): Parameters<GetProjectContextParams>,
    ) -> Result<CallToolResult, McpError> {
        self.forward("get_project_context", &params).await
    }

    #[tool(description = "Report server identity, port, uptime, and client count")]
    async fn get_server_info(
        &self,
        Parameters(params): Parameters<GetServerInfoParams>,
    ) -> Result<CallToolResult, McpError> {
        self.forward("get_server_info", &params).await
    }

    #[tool(description = "Write a new revision of the requirements document")]
    async fn update_requirements(
        &self,
        Parameters(params): Parameters<UpdateRequirementsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.forward("update_requirements", &params).await
    }

    #[tool(description = "Mine sessions and documents for ranked requirement candidates")]
    async fn auto_generate_requirements(
        &self,
        Parameters(params): Parameters<AutoGenerateRequirementsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.forward("auto_generate_requirements", &params).await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for DriftwatchMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Project deviation monitoring tools: deviation scoring, project context, \
                 requirements management, and server discovery info."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Serve the tool set over stdio until the peer disconnects.
pub async fn serve_stdio(dispatcher: Arc<ToolDispatcher>) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = DriftwatchMcpServer::new(dispatcher);
    let service = server.serve(rmcp::transport::stdio()).await?;

    tracing::info!("MCP stdio server running, waiting for requests...");
    service.waiting().await?;

    tracing::info!("MCP stdio server shutting down");
    Ok(())
}
