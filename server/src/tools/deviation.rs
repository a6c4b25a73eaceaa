//! Deviation analysis
//!
//! Scores a file against simple heuristic rules. The score starts at 100
//! and each detected deviation subtracts a weighted penalty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use driftwatch_core::{json_result, CallToolResult};

use super::AnalyzeDeviationParams;
use crate::dispatch::{parse_args, ToolError, ToolHandler};
use crate::state::ServerContext;

#[derive(Debug, Clone, Serialize)]
pub struct Deviation {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub severity: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviationAnalysis {
    pub file_path: String,
    pub deviations: Vec<Deviation>,
    pub suggestions: Vec<String>,
    pub score: i32,
    pub server_port: u16,
    pub timestamp: DateTime<Utc>,
}

/// Resolve a possibly-relative path against the project root.
fn resolve_path(project_path: &Path, file_path: &str) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_path.join(path)
    }
}

/// Run the heuristic rules over the file content.
pub fn analyze_content(file_path: &str, content: &str, server_port: u16) -> DeviationAnalysis {
    let mut deviations = Vec::new();
    let mut suggestions = Vec::new();
    let mut score: i32 = 100;

    // Script files are expected to declare strict mode
    if file_path.ends_with(".js") || file_path.ends_with(".ts") {
        if !content.contains("use strict") && !content.contains("\"use strict\"") {
            deviations.push(Deviation {
                kind: "code_standard".to_string(),
                message: "missing strict mode directive".to_string(),
                line: Some(1),
                severity: "warning".to_string(),
            });
            suggestions.push("Add a strict mode directive at the top of the file".to_string());
            score -= 5;
        }
    }

    if !content.contains("/**") && !content.contains("//") {
        deviations.push(Deviation {
            kind: "documentation".to_string(),
            message: "no code comments found".to_string(),
            line: None,
            severity: "info".to_string(),
        });
        suggestions.push("Document the intent of non-obvious sections".to_string());
        score -= 10;
    }

    DeviationAnalysis {
        file_path: file_path.to_string(),
        deviations,
        suggestions,
        score,
        server_port,
        timestamp: Utc::now(),
    }
}

pub struct AnalyzeDeviation;

#[async_trait]
impl ToolHandler for AnalyzeDeviation {
    fn name(&self) -> &'static str {
        "analyze_deviation"
    }

    fn description(&self) -> &'static str {
        "Score a file against the project's deviation heuristics"
    }

    fn input_schema(&self) -> serde_json::Value {
        super::schema_value::<AnalyzeDeviationParams>()
    }

    async fn call(
        &self,
        ctx: &ServerContext,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        let params: AnalyzeDeviationParams = parse_args(self.name(), args)?;

        let content = match params.content {
            Some(content) => content,
            None => {
                let path = resolve_path(&ctx.config.project_path, &params.file_path);
                tokio::fs::read_to_string(&path).await.map_err(|e| {
                    ToolError::Internal(format!("analysis failed: {}: {}", path.display(), e))
                })?
            }
        };

        let analysis = analyze_content(&params.file_path, &content, ctx.port);
        json_result(&analysis).map_err(|e| ToolError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_rust_file_keeps_full_score() {
        let analysis = analyze_content("src/lib.rs", "// a comment\nfn main() {}", 3001);
        assert_eq!(analysis.score, 100);
        assert!(analysis.deviations.is_empty());
    }

    #[test]
    fn script_without_strict_mode_loses_points() {
        let analysis = analyze_content("index.js", "// entry\nconsole.log(1)", 3001);
        assert_eq!(analysis.score, 95);
        assert_eq!(analysis.deviations.len(), 1);
        assert_eq!(analysis.deviations[0].kind, "code_standard");
        assert_eq!(analysis.deviations[0].severity, "warning");
    }

    #[test]
    fn uncommented_file_loses_points() {
        let analysis = analyze_content("data.txt", "just text", 3001);
        assert_eq!(analysis.score, 90);
        assert_eq!(analysis.deviations[0].kind, "documentation");
    }

    #[test]
    fn both_rules_stack() {
        let analysis = analyze_content("index.ts", "export const x = 1", 3001);
        assert_eq!(analysis.score, 85);
        assert_eq!(analysis.deviations.len(), 2);
        assert_eq!(analysis.suggestions.len(), 2);
    }

    #[test]
    fn relative_paths_resolve_against_project_root() {
        let resolved = resolve_path(Path::new("/proj"), "src/main.rs");
        assert_eq!(resolved, Path::new("/proj/src/main.rs"));

        let absolute = resolve_path(Path::new("/proj"), "/etc/hosts");
        assert_eq!(absolute, Path::new("/etc/hosts"));
    }
}
