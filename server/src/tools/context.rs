//! Project context
//!
//! Scans the project tree into a flat file listing. The scan is bounded on
//! purpose: depth capped at 5, at most 1000 entries per directory, hidden
//! files and dependency/build directories skipped.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};

use driftwatch_core::{json_result, CallToolResult};

use super::sessions;
use super::GetProjectContextParams;
use crate::dispatch::{parse_args, ToolError, ToolHandler};
use crate::state::ServerContext;

const MAX_SCAN_DEPTH: usize = 5;
const MAX_FILES_PER_DIR: usize = 1000;

const SKIP_DIRS: &[&str] = &["node_modules", "dist", "build", "target", ".git", ".vscode"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub size: u64,
}

fn should_skip(name: &str) -> bool {
    name.starts_with('.') || SKIP_DIRS.contains(&name)
}

/// Bounded recursive scan of the project tree.
pub async fn scan_project_files(project_path: &Path) -> Vec<FileEntry> {
    let mut files = Vec::new();
    let mut stack: Vec<(PathBuf, usize)> = vec![(project_path.to_path_buf(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        if depth >= MAX_SCAN_DEPTH {
            tracing::warn!("Max scan depth reached, skipping: {}", dir.display());
            continue;
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to scan {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut file_count = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if file_count >= MAX_FILES_PER_DIR {
                tracing::warn!(
                    "Directory entry limit ({}) reached, stopping scan of {}",
                    MAX_FILES_PER_DIR,
                    dir.display()
                );
                break;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if should_skip(&name) {
                continue;
            }

            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };

            if file_type.is_dir() {
                stack.push((path, depth + 1));
            } else if file_type.is_file() {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                let rel = path
                    .strip_prefix(project_path)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                files.push(FileEntry {
                    path: rel,
                    name,
                    kind: "file",
                    size,
                });
                file_count += 1;
            }
        }
    }

    files
}

pub struct GetProjectContext;

#[async_trait]
impl ToolHandler for GetProjectContext {
    fn name(&self) -> &'static str {
        "get_project_context"
    }

    fn description(&self) -> &'static str {
        "Collect the project file listing, optionally with history, sessions, and documents"
    }

    fn input_schema(&self) -> serde_json::Value {
        super::schema_value::<GetProjectContextParams>()
    }

    async fn call(
        &self,
        ctx: &ServerContext,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        let params: GetProjectContextParams = parse_args(self.name(), args)?;

        let files = scan_project_files(&ctx.config.project_path).await;

        let mut context = json!({
            "projectPath": ctx.config.project_path.display().to_string(),
            "serverPort": ctx.port,
            "files": files,
            "structure": {},
            "timestamp": Utc::now(),
        });

        if params.include_history {
            context["history"] = json!({
                "lastModified": Utc::now(),
                "changes": [],
            });
            context["sessions"] = serde_json::to_value(sessions::recorded_sessions())
                .map_err(|e| ToolError::Internal(e.to_string()))?;
            let documents = sessions::technical_documents(&ctx.config.project_path).await;
            context["documents"] =
                serde_json::to_value(documents).map_err(|e| ToolError::Internal(e.to_string()))?;
        }

        json_result(&context).map_err(|e| ToolError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, b"content").await.unwrap();
    }

    #[tokio::test]
    async fn scan_skips_hidden_and_dependency_dirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/main.rs")).await;
        touch(&dir.path().join("node_modules/pkg/index.js")).await;
        touch(&dir.path().join(".hidden/secret.txt")).await;
        touch(&dir.path().join(".env")).await;

        let files = scan_project_files(dir.path()).await;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs"]);
    }

    #[tokio::test]
    async fn scan_stops_at_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/b/c/d/shallow.txt")).await;
        touch(&dir.path().join("a/b/c/d/e/too_deep.txt")).await;

        let files = scan_project_files(dir.path()).await;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"a/b/c/d/shallow.txt"));
        assert!(!paths.iter().any(|p| p.contains("too_deep")));
    }

    #[tokio::test]
    async fn entries_carry_relative_paths_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("README.md")).await;

        let files = scan_project_files(dir.path()).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "README.md");
        assert_eq!(files[0].name, "README.md");
        assert_eq!(files[0].size, 7);
    }
}
