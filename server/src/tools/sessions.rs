//! Recorded review sessions and technical document sweep
//!
//! The session corpus is the built-in record of requirement and design
//! review meetings that the requirements generator mines for candidates.
//! Documents are swept from a fixed set of project-relative locations.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// A decision captured during a review session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDecision {
    pub id: String,
    pub title: String,
    pub content: String,
    pub maker: String,
    pub impact: String,
    pub timestamp: String,
}

/// A recorded review session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSession {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub start_time: DateTime<Utc>,
    pub duration: String,
    pub message_count: u32,
    pub decision_count: u32,
    pub summary: String,
    pub participants: Vec<String>,
    pub decisions: Vec<SessionDecision>,
}

/// The built-in review corpus.
pub fn recorded_sessions() -> Vec<ReviewSession> {
    vec![
        ReviewSession {
            id: "session_001".to_string(),
            title: "Protocol integration review".to_string(),
            kind: "requirement".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap(),
            duration: "2h30m".to_string(),
            message_count: 45,
            decision_count: 3,
            summary: "Reviewed the tool protocol integration plan and settled on a \
                      client-server architecture with discovery sidecars"
                .to_string(),
            participants: vec![
                "product".to_string(),
                "architecture".to_string(),
                "frontend".to_string(),
            ],
            decisions: vec![SessionDecision {
                id: "dec_001".to_string(),
                title: "Transport selection".to_string(),
                content: "Use WebSocket for bidirectional real-time communication".to_string(),
                maker: "architecture".to_string(),
                impact: "Shapes the overall transport design".to_string(),
                timestamp: "09:45:00".to_string(),
            }],
        },
        ReviewSession {
            id: "session_002".to_string(),
            title: "Context management requirements".to_string(),
            kind: "requirement".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 16, 14, 0, 0).unwrap(),
            duration: "1h45m".to_string(),
            message_count: 32,
            decision_count: 2,
            summary: "Discussed project context management, including snapshots and \
                      context compression"
                .to_string(),
            participants: vec![
                "product".to_string(),
                "frontend".to_string(),
                "design".to_string(),
            ],
            decisions: vec![],
        },
        ReviewSession {
            id: "session_003".to_string(),
            title: "Deviation alerting design".to_string(),
            kind: "design".to_string(),
            start_time: Utc.with_ymd_and_hms(2024, 1, 17, 10, 0, 0).unwrap(),
            duration: "3h15m".to_string(),
            message_count: 67,
            decision_count: 5,
            summary: "Designed the deviation scoring algorithm and the alerting \
                      interaction flow"
                .to_string(),
            participants: vec![
                "architecture".to_string(),
                "algorithms".to_string(),
                "design".to_string(),
            ],
            decisions: vec![SessionDecision {
                id: "dec_002".to_string(),
                title: "Deviation scoring algorithm".to_string(),
                content: "Combine vector similarity with weighted rule scoring".to_string(),
                maker: "algorithms".to_string(),
                impact: "Determines alert accuracy".to_string(),
                timestamp: "11:30:00".to_string(),
            }],
        },
    ]
}

/// A technical document picked up by the sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalDocument {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub extension: String,
    pub content: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

const ALLOWED_EXTENSIONS: &[&str] = &[".md", ".txt", ".json", ".ts", ".vue", ".js"];

/// Document content is truncated at this many bytes on load.
const MAX_DOCUMENT_CONTENT: usize = 10_000;

fn allowed_extension(name: &str) -> bool {
    ALLOWED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Sweep the fixed document locations under the project root.
pub async fn technical_documents(project_path: &Path) -> Vec<TechnicalDocument> {
    let roots = [
        project_path.join(".driftwatch").join("documents"),
        project_path.join("docs"),
        project_path.join("README.md"),
        project_path.join("package.json"),
    ];

    let mut documents = Vec::new();
    for root in roots {
        let Ok(meta) = tokio::fs::metadata(&root).await else {
            continue;
        };
        if meta.is_dir() {
            scan_document_dir(&root, &mut documents).await;
        } else if meta.is_file() {
            if let Some(doc) = load_document(&root).await {
                documents.push(doc);
            }
        }
    }
    documents
}

async fn scan_document_dir(dir: &Path, documents: &mut Vec<TechnicalDocument>) {
    // Manual stack instead of recursion; async fns cannot self-recurse
    let mut stack: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&current).await else {
            tracing::warn!("Failed to scan document directory: {}", current.display());
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                if allowed_extension(&name) {
                    if let Some(doc) = load_document(&path).await {
                        documents.push(doc);
                    }
                }
            }
        }
    }
}

async fn load_document(path: &Path) -> Option<TechnicalDocument> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to load document {}: {}", path.display(), e);
            return None;
        }
    };

    let mut truncated = content;
    if truncated.len() > MAX_DOCUMENT_CONTENT {
        let mut cut = MAX_DOCUMENT_CONTENT;
        while !truncated.is_char_boundary(cut) {
            cut -= 1;
        }
        truncated.truncate(cut);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    Some(TechnicalDocument {
        path: path.display().to_string(),
        name,
        extension,
        content: truncated,
        last_modified: meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now),
        size: meta.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corpus_has_requirement_sessions_with_decisions() {
        let sessions = recorded_sessions();
        assert_eq!(sessions.len(), 3);
        assert!(sessions.iter().any(|s| s.kind == "requirement"));
        let total_decisions: usize = sessions.iter().map(|s| s.decisions.len()).sum();
        assert!(total_decisions >= 2);
    }

    #[tokio::test]
    async fn sweep_picks_up_allowed_extensions_only() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        tokio::fs::create_dir_all(&docs).await.unwrap();
        tokio::fs::write(docs.join("spec.md"), "# Spec").await.unwrap();
        tokio::fs::write(docs.join("image.png"), [0u8, 1, 2]).await.unwrap();

        let found = technical_documents(dir.path()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "spec.md");
        assert_eq!(found[0].extension, ".md");
    }

    #[tokio::test]
    async fn long_documents_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let readme = dir.path().join("README.md");
        tokio::fs::write(&readme, "x".repeat(20_000)).await.unwrap();

        let found = technical_documents(dir.path()).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content.len(), MAX_DOCUMENT_CONTENT);
        assert_eq!(found[0].size, 20_000);
    }
}
