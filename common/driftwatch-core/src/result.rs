//! Result helpers for tool responses
//!
//! Tool handlers return [`CallToolResult`] values whose content is a single
//! pretty-printed JSON text item, matching the wire shape clients expect.
//! Conversions to the rmcp result type serve the stdio transport.

use serde::Serialize;

use crate::protocol::{CallToolResult, ToolContent};

/// Build a successful result carrying pretty-printed JSON.
pub fn json_result<T: Serialize>(data: &T) -> Result<CallToolResult, serde_json::Error> {
    let json = serde_json::to_string_pretty(data)?;
    Ok(CallToolResult {
        content: vec![ToolContent::text(json)],
        is_error: None,
    })
}

/// Build a successful result carrying plain text.
pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![ToolContent::text(text)],
        is_error: None,
    }
}

/// Build an error-flagged result carrying plain text.
pub fn error_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult {
        content: vec![ToolContent::text(text)],
        is_error: Some(true),
    }
}

impl CallToolResult {
    /// Convert to the rmcp result shape for the stdio transport.
    pub fn into_rmcp(self) -> rmcp::model::CallToolResult {
        let contents: Vec<rmcp::model::Content> = self
            .content
            .into_iter()
            .map(|c| match c {
                ToolContent::Text { text } => rmcp::model::Content::text(text),
            })
            .collect();
        if self.is_error.unwrap_or(false) {
            rmcp::model::CallToolResult::error(contents)
        } else {
            rmcp::model::CallToolResult::success(contents)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Payload {
        score: u32,
    }

    #[test]
    fn json_result_pretty_prints() {
        let result = json_result(&Payload { score: 95 }).unwrap();
        let text = result.first_text().unwrap();
        assert!(text.contains("\"score\": 95"));
        assert!(!result.is_error());
    }

    #[test]
    fn error_result_is_flagged() {
        let result = error_result("analysis failed");
        assert!(result.is_error());
        assert_eq!(result.first_text(), Some("analysis failed"));
    }
}
