//! Judges whether the findings gathered so far adequately cover the plan,
//! and if not, what to look into next.

use crate::parse::parse_lenient;
use research_domain::error::Result;
use research_domain::model::{Finding, GapReport, SubQuestion};
use research_providers::{ChatMessage, LlmTransport};
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You review research findings against the original plan and judge whether important \
gaps remain. Respond with a JSON object: {\"has_gaps\": false, \"gaps\": [], \"recommendations\": [], \
\"confidence\": 0.0}.";

/// Findings beyond this count are omitted from the review context, keeping
/// the prompt bounded on long-running sessions. Grounded on
/// `reviewer.py::_build_review_context`'s `findings[:20]` cap.
const MAX_FINDINGS_IN_CONTEXT: usize = 20;

#[derive(Debug, Deserialize, Default)]
struct ReviewResponse {
    #[serde(default)]
    has_gaps: bool,
    #[serde(default)]
    gaps: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    confidence: f64,
}

pub struct Reviewer {
    transport: Arc<dyn LlmTransport>,
}

impl Reviewer {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self { transport }
    }

    fn build_review_context(
        plan: &[SubQuestion],
        findings: &[Finding],
        iteration: u32,
        max_iterations: u32,
    ) -> String {
        let mut lines = vec![format!("Iteration {iteration} of {max_iterations}"), String::new(), "Plan:".to_string()];
        for sq in plan {
            lines.push(format!("- {}: {}", sq.id, sq.question));
        }
        lines.push(String::new());
        lines.push("Findings:".to_string());
        if findings.is_empty() {
            lines.push("(none yet)".to_string());
        }
        for finding in findings.iter().take(MAX_FINDINGS_IN_CONTEXT) {
            lines.push(format!(
                "- [{}] {}: {}",
                finding.sub_question_id, finding.source_info.title, finding.summary
            ));
        }
        lines.join("\n")
    }

    pub async fn review(
        &self,
        plan: &[SubQuestion],
        findings: &[Finding],
        iteration: u32,
        max_iterations: u32,
    ) -> Result<GapReport> {
        let context = Self::build_review_context(plan, findings, iteration, max_iterations);
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(&context)];
        let completion = self.transport.complete(&messages, true, true).await?;

        let parsed: ReviewResponse = parse_lenient(&completion.content, ReviewResponse::default);

        Ok(GapReport {
            has_gaps: parsed.has_gaps,
            gaps: parsed.gaps,
            recommendations: parsed.recommendations,
            confidence: parsed.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_domain::model::SubQuestionStatus;
    use research_providers::ScriptedTransport;

    fn plan() -> Vec<SubQuestion> {
        vec![SubQuestion {
            id: "sq-001".into(),
            question: "What is X?".into(),
            status: SubQuestionStatus::Pending,
        }]
    }

    #[tokio::test]
    async fn reviews_from_valid_json() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            r#"{"has_gaps": true, "gaps": ["missing recent data"], "recommendations": ["search 2025 sources"], "confidence": 0.4}"#.to_string(),
        ]));
        let reviewer = Reviewer::new(transport);
        let gaps = reviewer.review(&plan(), &[], 1, 3).await.unwrap();
        assert!(gaps.has_gaps);
        assert_eq!(gaps.gaps, vec!["missing recent data".to_string()]);
        assert_eq!(gaps.confidence, 0.4);
    }

    #[tokio::test]
    async fn falls_back_to_no_gaps_on_malformed_output() {
        let transport = Arc::new(ScriptedTransport::new(vec!["not json".to_string()]));
        let reviewer = Reviewer::new(transport);
        let gaps = reviewer.review(&plan(), &[], 1, 3).await.unwrap();
        assert!(!gaps.has_gaps);
        assert!(gaps.gaps.is_empty());
        assert_eq!(gaps.confidence, 0.0);
    }
}
