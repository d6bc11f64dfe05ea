//! Decomposes a research query into 3-7 sub-questions.

use crate::parse::parse_lenient;
use research_domain::model::{GapReport, ResearchOptions, SubQuestion, SubQuestionStatus};
use research_domain::error::Result;
use research_providers::{ChatMessage, LlmTransport};
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a research planner. Decompose the user's query into 3 to 7 independent, \
atomic sub-questions that together cover the topic. Respond with a JSON object: \
{\"sub_questions\": [{\"id\": \"sq-001\", \"question\": \"...\"}, ...]}.";

#[derive(Debug, Deserialize, Default)]
struct PlanResponse {
    #[serde(default)]
    sub_questions: Vec<RawSubQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawSubQuestion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    question: Option<String>,
}

pub struct Planner {
    transport: Arc<dyn LlmTransport>,
}

impl Planner {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self { transport }
    }

    /// Builds the iteration-refined query: on iteration > 1 with gap
    /// recommendations present, the top-3 recommendations are appended.
    /// Grounded on `graph.py::_planner_node`'s refinement step.
    pub fn augment_query(query: &str, iteration: u32, gaps: &GapReport) -> String {
        if iteration > 1 && !gaps.recommendations.is_empty() {
            let top3: Vec<&str> = gaps
                .recommendations
                .iter()
                .take(3)
                .map(String::as_str)
                .collect();
            format!("{query} (Additional focus: {})", top3.join(" "))
        } else {
            query.to_string()
        }
    }

    fn build_memory_context(session_memory: &[String]) -> String {
        if session_memory.is_empty() {
            return "Prior session memory: none".to_string();
        }
        let mut lines = vec!["Prior session memory (reuse useful lines of inquiry, avoid duplicates):".to_string()];
        for (i, entry) in session_memory.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, entry));
        }
        lines.join("\n")
    }

    pub async fn plan(
        &self,
        query: &str,
        session_memory: &[String],
        options: &ResearchOptions,
    ) -> Result<Vec<SubQuestion>> {
        let memory_context = Self::build_memory_context(session_memory);
        let user_message = format!(
            "Research Query: {query}\n\n\
             Runtime constraints:\n\
             - max_iterations: {}\n\
             - max_sources_total: {}\n\
             - source_diversity: {}\n\
             - report_length_target: {:?}\n\
             \n\
             {memory_context}\n\
             Generate a research plan with sub-questions.",
            options.max_iterations, options.max_sources, options.source_diversity, options.report_length,
        );

        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(&user_message)];
        let completion = self.transport.complete(&messages, true, true).await?;

        let query_for_default = query.to_string();
        let parsed: PlanResponse = parse_lenient(&completion.content, move || PlanResponse {
            sub_questions: vec![RawSubQuestion {
                id: Some("sq-001".to_string()),
                question: Some(query_for_default),
            }],
        });

        let mut plan = Vec::with_capacity(parsed.sub_questions.len());
        for (i, raw) in parsed.sub_questions.into_iter().enumerate() {
            plan.push(SubQuestion {
                id: raw.id.unwrap_or_else(|| format!("sq-{:03}", i + 1)),
                question: raw.question.unwrap_or_default(),
                status: SubQuestionStatus::Pending,
            });
        }
        if plan.is_empty() {
            plan.push(SubQuestion {
                id: "sq-001".to_string(),
                question: query.to_string(),
                status: SubQuestionStatus::Pending,
            });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_providers::ScriptedTransport;

    #[tokio::test]
    async fn plans_from_valid_json() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            r#"{"sub_questions": [{"id": "sq-001", "question": "What is quantum networking?"}, {"id": "sq-002", "question": "Who are the leading vendors?"}]}"#.to_string(),
        ]));
        let planner = Planner::new(transport);
        let plan = planner.plan("quantum networking", &[], &ResearchOptions::default()).await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].id, "sq-001");
    }

    #[tokio::test]
    async fn falls_back_to_single_subquestion_on_malformed_output() {
        let transport = Arc::new(ScriptedTransport::new(vec!["not json at all".to_string()]));
        let planner = Planner::new(transport);
        let plan = planner.plan("my query", &[], &ResearchOptions::default()).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].question, "my query");
    }

    #[test]
    fn augments_query_with_top_three_recommendations_after_first_iteration() {
        let gaps = GapReport {
            has_gaps: true,
            gaps: vec![],
            recommendations: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            confidence: 0.5,
        };
        let augmented = Planner::augment_query("base query", 2, &gaps);
        assert_eq!(augmented, "base query (Additional focus: a b c)");
    }

    #[test]
    fn does_not_augment_on_first_iteration() {
        let gaps = GapReport {
            has_gaps: true,
            recommendations: vec!["x".into()],
            ..Default::default()
        };
        assert_eq!(Planner::augment_query("q", 1, &gaps), "q");
    }
}
