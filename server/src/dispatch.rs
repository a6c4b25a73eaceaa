//! Tool dispatch
//!
//! The dispatcher owns the fixed tool set and is the only place handler
//! failures are allowed to surface: every invocation returns a structured
//! [`CallToolResult`], never an error that could tear down the transport.
//! Each call is logged with a generated request id and its duration - the
//! audit trail for per-tool latency and failure rate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;

use driftwatch_core::{
    CallToolResult, ListResourcesResult, ListToolsResult, McpResource, ToolContent, ToolSchema,
};

use crate::state::ServerContext;

/// Failure modes a tool handler may produce. Dispatch folds both into the
/// structured error envelope; they differ only in code and retry semantics
/// on the client side.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("{0}")]
    Internal(String),
}

impl ToolError {
    fn code(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "validation",
            ToolError::Internal(_) => "internal",
        }
    }
}

/// Deserialize tool arguments into their declared parameter struct.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: serde_json::Value) -> Result<T, ToolError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| ToolError::Validation(format!("{}: {}", tool, e)))
}

/// A named tool with a declared input schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> serde_json::Value;
    async fn call(
        &self,
        ctx: &ServerContext,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError>;
}

pub struct ToolDispatcher {
    ctx: Arc<ServerContext>,
    tools: Vec<Arc<dyn ToolHandler>>,
    tool_timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let tool_timeout = ctx.config.tool_timeout;
        Self {
            ctx,
            tools: crate::tools::all(),
            tool_timeout,
        }
    }

    /// Dispatcher over an explicit tool set (tests use this to inject
    /// slow or failing handlers).
    pub fn with_tools(
        ctx: Arc<ServerContext>,
        tools: Vec<Arc<dyn ToolHandler>>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            tools,
            tool_timeout,
        }
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// The advertised tool catalog. Read-only, side-effect free.
    pub fn catalog(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self
                .tools
                .iter()
                .map(|t| ToolSchema {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    input_schema: t.input_schema(),
                })
                .collect(),
        }
    }

    /// The advertised resource list. Read-only, side-effect free.
    pub fn resources(&self) -> ListResourcesResult {
        ListResourcesResult {
            resources: vec![
                McpResource {
                    uri: "file://project-context".to_string(),
                    name: "project-context".to_string(),
                    description: "Project context information".to_string(),
                    mime_type: "application/json".to_string(),
                },
                McpResource {
                    uri: "file://requirements".to_string(),
                    name: "requirements".to_string(),
                    description: "Project requirements document".to_string(),
                    mime_type: "text/markdown".to_string(),
                },
                McpResource {
                    uri: "file://port-info".to_string(),
                    name: "port-info".to_string(),
                    description: "Server port record".to_string(),
                    mime_type: "application/json".to_string(),
                },
            ],
        }
    }

    /// Execute a tool by name.
    ///
    /// Always returns a result: unknown names, bad arguments, handler
    /// failures, and timeouts all come back as error-flagged results.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> CallToolResult {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let started = Instant::now();
        tracing::info!("[{}] tool call started: {}", request_id, name);

        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            let duration = started.elapsed().as_millis();
            tracing::warn!(
                "[{}] tool call failed: {} ({}ms): unknown tool",
                request_id,
                name,
                duration
            );
            return error_envelope(
                "not_found",
                format!("Unknown tool: {}", name),
                name,
                &request_id,
                duration,
            );
        };

        let outcome = tokio::time::timeout(self.tool_timeout, tool.call(&self.ctx, args)).await;
        let duration = started.elapsed().as_millis();

        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(
                    "[{}] tool call completed: {} ({}ms)",
                    request_id,
                    name,
                    duration
                );
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    "[{}] tool call failed: {} ({}ms): {}",
                    request_id,
                    name,
                    duration,
                    e
                );
                error_envelope(e.code(), e.to_string(), name, &request_id, duration)
            }
            Err(_) => {
                tracing::warn!(
                    "[{}] tool call timed out: {} ({}ms)",
                    request_id,
                    name,
                    duration
                );
                error_envelope(
                    "timeout",
                    format!(
                        "Tool call timed out: {} ({}s)",
                        name,
                        self.tool_timeout.as_secs()
                    ),
                    name,
                    &request_id,
                    duration,
                )
            }
        }
    }
}

/// Structured error result: the single text content is a JSON envelope the
/// remote caller can parse.
fn error_envelope(
    code: &str,
    message: String,
    tool: &str,
    request_id: &str,
    duration_ms: u128,
) -> CallToolResult {
    let envelope = json!({
        "error": true,
        "code": code,
        "message": message,
        "tool": tool,
        "requestId": request_id,
        "durationMs": duration_ms,
        "timestamp": Utc::now(),
    });
    CallToolResult {
        content: vec![ToolContent::text(
            serde_json::to_string_pretty(&envelope).unwrap_or(message),
        )],
        is_error: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn test_dispatcher() -> ToolDispatcher {
        let config = ServerConfig {
            project_path: std::env::temp_dir(),
            ..ServerConfig::default()
        };
        ToolDispatcher::new(Arc::new(ServerContext::new(config, 3001)))
    }

    fn envelope_of(result: &CallToolResult) -> serde_json::Value {
        serde_json::from_str(result.first_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn unknown_tool_returns_structured_error() {
        let dispatcher = test_dispatcher();
        let result = dispatcher.invoke("unknown_tool", json!({})).await;
        assert!(result.is_error());
        let envelope = envelope_of(&result);
        assert_eq!(envelope["code"], "not_found");
        assert!(envelope["message"]
            .as_str()
            .unwrap()
            .contains("unknown_tool"));
    }

    #[tokio::test]
    async fn missing_required_field_is_a_validation_error() {
        let dispatcher = test_dispatcher();
        let result = dispatcher.invoke("analyze_deviation", json!({})).await;
        assert!(result.is_error());
        let envelope = envelope_of(&result);
        assert_eq!(envelope["code"], "validation");
        assert!(envelope["message"].as_str().unwrap().contains("filePath"));
    }

    #[tokio::test]
    async fn null_arguments_mean_empty_object() {
        let dispatcher = test_dispatcher();
        let result = dispatcher
            .invoke("get_server_info", serde_json::Value::Null)
            .await;
        assert!(!result.is_error());
        let info = envelope_of(&result);
        assert_eq!(info["port"], 3001);
        assert!(info["uptime"].as_f64().unwrap() >= 0.0);
    }

    struct SleepyTool;

    #[async_trait]
    impl ToolHandler for SleepyTool {
        fn name(&self) -> &'static str {
            "sleepy"
        }
        fn description(&self) -> &'static str {
            "sleeps"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn call(
            &self,
            _ctx: &ServerContext,
            _args: serde_json::Value,
        ) -> Result<CallToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(driftwatch_core::text_result("done"))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn description(&self) -> &'static str {
            "fails"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn call(
            &self,
            _ctx: &ServerContext,
            _args: serde_json::Value,
        ) -> Result<CallToolResult, ToolError> {
            Err(ToolError::Internal("handler blew up".to_string()))
        }
    }

    #[tokio::test]
    async fn slow_handler_hits_the_global_timeout() {
        let config = ServerConfig::default();
        let ctx = Arc::new(ServerContext::new(config, 3001));
        let dispatcher = ToolDispatcher::with_tools(
            ctx,
            vec![Arc::new(SleepyTool)],
            Duration::from_millis(50),
        );

        let started = Instant::now();
        let result = dispatcher.invoke("sleepy", json!({})).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.is_error());
        assert_eq!(envelope_of(&result)["code"], "timeout");
    }

    #[tokio::test]
    async fn handler_failure_becomes_an_envelope_not_a_crash() {
        let config = ServerConfig::default();
        let ctx = Arc::new(ServerContext::new(config, 3001));
        let dispatcher = ToolDispatcher::with_tools(
            ctx,
            vec![Arc::new(FailingTool)],
            Duration::from_secs(1),
        );

        let result = dispatcher.invoke("failing", json!({})).await;
        assert!(result.is_error());
        let envelope = envelope_of(&result);
        assert_eq!(envelope["code"], "internal");
        assert_eq!(envelope["tool"], "failing");
        assert!(envelope["requestId"].as_str().is_some());
    }

    #[tokio::test]
    async fn catalog_lists_schemas() {
        let dispatcher = test_dispatcher();
        let catalog = dispatcher.catalog();
        assert_eq!(catalog.tools.len(), 5);
        let analyze = catalog
            .tools
            .iter()
            .find(|t| t.name == "analyze_deviation")
            .unwrap();
        assert!(analyze.input_schema.is_object());
    }
}
