//! File-change broadcaster
//!
//! A recursive watcher over the project tree. Create and modify events are
//! pushed to every connected WebSocket client, best-effort. The returned
//! handle keeps the OS watch alive; dropping it stops the watcher.

use std::path::{Component, Path};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use driftwatch_core::ServerEvent;

use crate::state::ServerContext;

/// Directories that produce high-churn events and should always be skipped.
const SKIP_SEGMENTS: &[&str] = &["node_modules", "target", "dist", "build"];

#[derive(Debug, Clone, Copy)]
enum ChangeKind {
    Added,
    Changed,
}

/// Handle for the running watcher. Keeps the OS watch alive.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

/// Returns `true` for hidden files and high-churn directories.
fn is_ignored(root: &Path, path: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || SKIP_SEGMENTS.contains(&name.as_ref())
        }
        _ => false,
    })
}

/// Start watching the project tree and broadcasting change events.
pub fn start(ctx: Arc<ServerContext>) -> Result<FileWatcher> {
    let root = ctx.config.project_path.clone();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(ChangeKind, std::path::PathBuf)>();

    let mut watcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                let kind = match event.kind {
                    EventKind::Create(_) => Some(ChangeKind::Added),
                    EventKind::Modify(_) => Some(ChangeKind::Changed),
                    _ => None,
                };
                if let Some(kind) = kind {
                    for path in event.paths {
                        let _ = tx.send((kind, path));
                    }
                }
            }
            Err(e) => {
                tracing::error!("File watcher error: {}", e);
            }
        })
        .context("failed to create file watcher")?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .context("failed to watch project root")?;

    tracing::info!("File watcher started on {}", root.display());

    tokio::spawn(async move {
        while let Some((kind, path)) = rx.recv().await {
            if is_ignored(&ctx.config.project_path, &path) {
                continue;
            }

            let file_path = path
                .strip_prefix(&ctx.config.project_path)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if file_path.is_empty() {
                continue;
            }

            let timestamp = Utc::now().to_rfc3339();
            let event = match kind {
                ChangeKind::Added => {
                    tracing::debug!("File added: {}", file_path);
                    ServerEvent::FileAdded {
                        file_path,
                        timestamp,
                    }
                }
                ChangeKind::Changed => {
                    tracing::debug!("File changed: {}", file_path);
                    ServerEvent::FileChanged {
                        file_path,
                        timestamp,
                    }
                }
            };
            ctx.clients.broadcast(&event);
        }
    });

    Ok(FileWatcher { _watcher: watcher })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_and_high_churn_paths_are_ignored() {
        let root = Path::new("/proj");
        assert!(is_ignored(root, Path::new("/proj/.git/index")));
        assert!(is_ignored(root, Path::new("/proj/node_modules/pkg/a.js")));
        assert!(is_ignored(root, Path::new("/proj/target/debug/out")));
        assert!(is_ignored(root, Path::new("/proj/.mcp-port.json")));
        assert!(!is_ignored(root, Path::new("/proj/src/main.rs")));
        assert!(!is_ignored(root, Path::new("/proj/docs/spec.md")));
    }
}
