//! Requirements document management and auto-generation
//!
//! `update_requirements` writes the versioned requirements document and
//! notifies connected clients. `auto_generate_requirements` mines the
//! review-session corpus and the technical-document sweep for requirement
//! candidates, scores them, and returns a ranked evaluation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::time::Instant;

use driftwatch_core::{json_result, text_result, CallToolResult, ServerEvent};

use super::sessions::{self, ReviewSession, SessionDecision, TechnicalDocument};
use super::{AnalysisDepth, AutoGenerateRequirementsParams, TimeRange, UpdateRequirementsParams};
use crate::dispatch::{parse_args, ToolError, ToolHandler};
use crate::state::ServerContext;

// ============================================================================
// update_requirements
// ============================================================================

pub struct UpdateRequirements;

#[async_trait]
impl ToolHandler for UpdateRequirements {
    fn name(&self) -> &'static str {
        "update_requirements"
    }

    fn description(&self) -> &'static str {
        "Write a new revision of the requirements document and notify clients"
    }

    fn input_schema(&self) -> serde_json::Value {
        super::schema_value::<UpdateRequirementsParams>()
    }

    async fn call(
        &self,
        ctx: &ServerContext,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        let params: UpdateRequirementsParams = parse_args(self.name(), args)?;
        let version = params.version.unwrap_or_else(|| "1.0.0".to_string());

        let path = ctx
            .config
            .project_path
            .join(".driftwatch")
            .join("requirements.md");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Internal(format!("requirements update failed: {}", e)))?;
        }

        let content = format!(
            "# Project Requirements\n\nVersion: {}\nUpdated: {}\nServer port: {}\n\n{}",
            version,
            Utc::now().to_rfc3339(),
            ctx.port,
            params.requirements
        );
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Internal(format!("requirements update failed: {}", e)))?;

        tracing::info!("Requirements document updated to version {}", version);
        ctx.clients.broadcast(&ServerEvent::RequirementsUpdated {
            version: version.clone(),
            timestamp: Utc::now().to_rfc3339(),
        });

        Ok(text_result(format!(
            "Requirements document updated to version {}",
            version
        )))
    }
}

// ============================================================================
// auto_generate_requirements
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCandidate {
    pub id: String,
    pub title: String,
    pub description: String,
    pub source: String,
    pub source_id: String,
    pub priority: String,
    pub category: String,
    pub confidence: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related_decisions: Vec<SessionDecision>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub business_value: u32,
    pub technical_feasibility: u32,
    pub implementation_cost: u32,
    pub risk_assessment: u32,
    pub overall_score: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRequirement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub category: String,
    pub source: String,
    pub source_id: String,
    pub confidence: u32,
    pub evaluation: Evaluation,
    pub generated_at: DateTime<Utc>,
    pub related_items: Vec<SessionDecision>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: String,
    pub importance: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetrics {
    pub sessions_analyzed: usize,
    pub documents_scanned: usize,
    pub requirements_candidates: usize,
    pub processing_time_ms: u128,
}

fn categorize(title: &str, description: &str) -> &'static str {
    let text = format!("{} {}", title, description).to_lowercase();
    if text.contains("ui") || text.contains("interface") || text.contains("interaction") {
        "ui/ux"
    } else if text.contains("api") || text.contains("endpoint") || text.contains("service") {
        "api"
    } else if text.contains("performance") || text.contains("optimiz") || text.contains("latency") {
        "performance"
    } else if text.contains("security") || text.contains("permission") || text.contains("auth") {
        "security"
    } else {
        "feature"
    }
}

fn session_confidence(session: &ReviewSession) -> u32 {
    let mut confidence = 50;
    if session.decision_count > 0 {
        confidence += 20;
    }
    if session.message_count > 30 {
        confidence += 15;
    }
    if session.participants.len() > 2 {
        confidence += 10;
    }
    confidence.min(95)
}

fn candidates_from_sessions(sessions: &[ReviewSession]) -> Vec<RequirementCandidate> {
    sessions
        .iter()
        .filter(|s| s.kind == "requirement" || !s.decisions.is_empty())
        .map(|s| RequirementCandidate {
            id: format!("req_session_{}", s.id),
            title: s.title.clone(),
            description: s.summary.clone(),
            source: "session".to_string(),
            source_id: s.id.clone(),
            priority: if s.decision_count > 2 { "high" } else { "medium" }.to_string(),
            category: categorize(&s.title, &s.summary).to_string(),
            confidence: session_confidence(s),
            related_decisions: s.decisions.clone(),
        })
        .collect()
}

fn candidates_from_documents(documents: &[TechnicalDocument]) -> Vec<RequirementCandidate> {
    let mut candidates = Vec::new();
    for doc in documents {
        let name = doc.name.to_lowercase();
        if doc.extension != ".md" || !(name.contains("requirement") || name.contains("spec")) {
            continue;
        }
        let lines: Vec<&str> = doc.content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("##") && trimmed.to_lowercase().contains("requirement") {
                candidates.push(RequirementCandidate {
                    id: format!("req_doc_{}_{}", doc.name, i),
                    title: trimmed.trim_start_matches('#').trim().to_string(),
                    description: lines.get(i + 1).unwrap_or(&"").to_string(),
                    source: "document".to_string(),
                    source_id: doc.path.clone(),
                    priority: "medium".to_string(),
                    category: "documented".to_string(),
                    confidence: 70,
                    related_decisions: Vec::new(),
                });
            }
        }
    }
    candidates
}

fn evaluate_business_value(candidate: &RequirementCandidate) -> u32 {
    let mut score = 60;
    if candidate.priority == "high" {
        score += 25;
    }
    if candidate.confidence > 80 {
        score += 10;
    }
    if !candidate.related_decisions.is_empty() {
        score += 15;
    }
    score.min(95)
}

fn evaluate_feasibility(candidate: &RequirementCandidate) -> u32 {
    let mut score: i32 = 70;
    if candidate.category == "ui/ux" {
        score += 15;
    }
    if candidate.category == "performance" {
        score -= 10;
    }
    if candidate.source == "session" {
        score += 10;
    }
    score.clamp(30, 95) as u32
}

fn evaluate_cost(candidate: &RequirementCandidate) -> u32 {
    let mut cost: i32 = 50;
    if candidate.priority == "high" {
        cost += 20;
    }
    if candidate.category == "api" {
        cost += 15;
    }
    if candidate.category == "ui/ux" {
        cost -= 10;
    }
    cost.clamp(20, 90) as u32
}

fn evaluate_risk(candidate: &RequirementCandidate) -> u32 {
    let mut risk: i32 = 40;
    if candidate.category == "security" {
        risk += 25;
    }
    if candidate.confidence < 60 {
        risk += 20;
    }
    if candidate.priority == "high" {
        risk += 10;
    }
    risk.clamp(15, 85) as u32
}

fn generate_requirements(candidates: Vec<RequirementCandidate>) -> Vec<GeneratedRequirement> {
    let mut requirements: Vec<GeneratedRequirement> = candidates
        .into_iter()
        .map(|candidate| {
            let business_value = evaluate_business_value(&candidate);
            let technical_feasibility = evaluate_feasibility(&candidate);
            let implementation_cost = evaluate_cost(&candidate);
            let risk_assessment = evaluate_risk(&candidate);
            let overall_score = (business_value
                + technical_feasibility
                + (100 - implementation_cost)
                + (100 - risk_assessment))
                / 4;

            GeneratedRequirement {
                id: format!("auto_{}", uuid::Uuid::new_v4().simple()),
                title: candidate.title.clone(),
                description: candidate.description.clone(),
                priority: candidate.priority.clone(),
                category: candidate.category.clone(),
                source: candidate.source.clone(),
                source_id: candidate.source_id.clone(),
                confidence: candidate.confidence,
                evaluation: Evaluation {
                    business_value,
                    technical_feasibility,
                    implementation_cost,
                    risk_assessment,
                    overall_score,
                },
                generated_at: Utc::now(),
                related_items: candidate.related_decisions,
            }
        })
        .collect();

    requirements.sort_by(|a, b| b.evaluation.overall_score.cmp(&a.evaluation.overall_score));
    requirements
}

fn build_insights(
    sessions: &[ReviewSession],
    documents: &[TechnicalDocument],
    candidates: &[RequirementCandidate],
) -> Vec<Insight> {
    let mut insights = Vec::new();

    if !sessions.is_empty() {
        let requirement_sessions = sessions.iter().filter(|s| s.kind == "requirement").count();
        insights.push(Insight {
            kind: "session_analysis".to_string(),
            title: "Session analysis".to_string(),
            content: format!(
                "Analyzed {} recorded sessions, {} of them requirement reviews.",
                sessions.len(),
                requirement_sessions
            ),
            importance: "medium".to_string(),
        });
    }

    if !documents.is_empty() {
        let spec_docs = documents
            .iter()
            .filter(|d| {
                let name = d.name.to_lowercase();
                name.contains("spec") || name.contains("requirement")
            })
            .count();
        insights.push(Insight {
            kind: "document_analysis".to_string(),
            title: "Document analysis".to_string(),
            content: format!(
                "Scanned {} technical documents, {} of them specifications.",
                documents.len(),
                spec_docs
            ),
            importance: "medium".to_string(),
        });
    }

    if !candidates.is_empty() {
        let high_priority = candidates.iter().filter(|c| c.priority == "high").count();
        insights.push(Insight {
            kind: "requirement_insights".to_string(),
            title: "Requirement candidates".to_string(),
            content: format!(
                "Identified {} requirement candidates, {} of them high priority.",
                candidates.len(),
                high_priority
            ),
            importance: "high".to_string(),
        });
    }

    insights
}

fn parse_bound(value: &Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn filter_sessions(sessions: Vec<ReviewSession>, range: &TimeRange) -> Vec<ReviewSession> {
    let start = parse_bound(&range.start);
    let end = parse_bound(&range.end);
    sessions
        .into_iter()
        .filter(|s| {
            start.map(|b| s.start_time >= b).unwrap_or(true)
                && end.map(|b| s.start_time <= b).unwrap_or(true)
        })
        .collect()
}

pub struct AutoGenerateRequirements;

#[async_trait]
impl ToolHandler for AutoGenerateRequirements {
    fn name(&self) -> &'static str {
        "auto_generate_requirements"
    }

    fn description(&self) -> &'static str {
        "Mine recorded sessions and documents for requirement candidates and rank them"
    }

    fn input_schema(&self) -> serde_json::Value {
        super::schema_value::<AutoGenerateRequirementsParams>()
    }

    async fn call(
        &self,
        ctx: &ServerContext,
        args: serde_json::Value,
    ) -> Result<CallToolResult, ToolError> {
        let params: AutoGenerateRequirementsParams = parse_args(self.name(), args)?;
        let depth = params.analysis_depth.unwrap_or(AnalysisDepth::Detailed);
        let include_documents = params.include_documents.unwrap_or(true);
        let include_sessions = params.include_sessions.unwrap_or(true);
        let time_range = params.time_range.clone().unwrap_or_default();

        let started = Instant::now();
        let mut metrics = AnalysisMetrics::default();

        let sessions = if include_sessions {
            let sessions = filter_sessions(sessions::recorded_sessions(), &time_range);
            metrics.sessions_analyzed = sessions.len();
            sessions
        } else {
            Vec::new()
        };

        let documents = if include_documents {
            let documents = sessions::technical_documents(&ctx.config.project_path).await;
            metrics.documents_scanned = documents.len();
            documents
        } else {
            Vec::new()
        };

        let mut candidates = candidates_from_sessions(&sessions);
        candidates.extend(candidates_from_documents(&documents));
        metrics.requirements_candidates = candidates.len();

        let insights = build_insights(&sessions, &documents, &candidates);
        let generated = generate_requirements(candidates);
        metrics.processing_time_ms = started.elapsed().as_millis();

        tracing::info!(
            "Requirement generation finished: {} candidates in {}ms",
            metrics.requirements_candidates,
            metrics.processing_time_ms
        );

        let result = json!({
            "timestamp": Utc::now(),
            "config": {
                "timeRange": time_range,
                "analysisDepth": depth,
                "includeDocuments": include_documents,
                "includeSessions": include_sessions,
            },
            "generatedRequirements": generated,
            "analysisMetrics": metrics,
            "insights": insights,
        });
        json_result(&result).map_err(|e| ToolError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<ReviewSession> {
        sessions::recorded_sessions()
    }

    #[test]
    fn session_candidates_carry_priority_from_decisions() {
        let candidates = candidates_from_sessions(&corpus());
        // All three corpus sessions qualify (requirement kind or decisions)
        assert_eq!(candidates.len(), 3);
        let alerting = candidates
            .iter()
            .find(|c| c.source_id == "session_003")
            .unwrap();
        assert_eq!(alerting.priority, "high");
    }

    #[test]
    fn confidence_is_capped() {
        for session in corpus() {
            assert!(session_confidence(&session) <= 95);
        }
    }

    #[test]
    fn generated_requirements_are_sorted_by_score() {
        let generated = generate_requirements(candidates_from_sessions(&corpus()));
        let scores: Vec<u32> = generated
            .iter()
            .map(|r| r.evaluation.overall_score)
            .collect();
        let mut sorted = scores.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(scores, sorted);
    }

    #[test]
    fn security_candidates_score_higher_risk() {
        let base = RequirementCandidate {
            id: "c1".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            source: "session".to_string(),
            source_id: "s".to_string(),
            priority: "medium".to_string(),
            category: "feature".to_string(),
            confidence: 80,
            related_decisions: Vec::new(),
        };
        let security = RequirementCandidate {
            category: "security".to_string(),
            ..base.clone()
        };
        assert!(evaluate_risk(&security) > evaluate_risk(&base));
    }

    #[test]
    fn categorize_matches_keywords() {
        assert_eq!(categorize("API gateway", ""), "api");
        assert_eq!(categorize("Login", "permission model"), "security");
        assert_eq!(categorize("Misc", "other work"), "feature");
    }

    #[test]
    fn time_range_filters_sessions() {
        let range = TimeRange {
            start: Some("2024-01-16T00:00:00Z".to_string()),
            end: None,
        };
        let filtered = filter_sessions(corpus(), &range);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|s| s.id != "session_001"));
    }

    #[test]
    fn document_extraction_reads_requirement_headings() {
        let doc = TechnicalDocument {
            path: "/p/spec.md".to_string(),
            name: "spec.md".to_string(),
            extension: ".md".to_string(),
            content: "# Title\n## Requirement: discovery\nClients find the port.\n## Notes\n"
                .to_string(),
            last_modified: Utc::now(),
            size: 10,
        };
        let candidates = candidates_from_documents(&[doc]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Requirement: discovery");
        assert_eq!(candidates[0].description, "Clients find the port.");
        assert_eq!(candidates[0].confidence, 70);
    }
}
