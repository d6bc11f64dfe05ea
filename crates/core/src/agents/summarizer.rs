//! Condenses one fetched source into a `Finding`: cleans raw content,
//! truncates it to a budget the model can digest, and asks the model for a
//! focused summary plus key facts.

use crate::parse::parse_lenient;
use research_domain::error::Result;
use research_domain::model::{Finding, Source, SourceInfo, WordCount};
use research_providers::{ChatMessage, LlmTransport};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You summarize source content in service of a research sub-question. Respond with a \
JSON object: {\"summary\": \"...\", \"key_facts\": [\"...\"], \"relevance_score\": 0.0}.";

/// Content longer than this is truncated before being sent to the model,
/// matching `summarizer.py`'s `content[:8000]` budget.
const MAX_CONTENT_CHARS: usize = 8000;
/// Length of the raw-content fallback summary when parsing fails.
const FALLBACK_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    key_facts: Vec<String>,
    #[serde(default)]
    relevance_score: Option<f64>,
}

pub struct Summarizer {
    transport: Arc<dyn LlmTransport>,
}

impl Summarizer {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self { transport }
    }

    fn url_pattern() -> &'static regex::Regex {
        static RE: OnceLock<regex::Regex> = OnceLock::new();
        RE.get_or_init(|| regex::Regex::new(r"https?://\S+").expect("valid url regex"))
    }

    /// Collapses whitespace, strips any surviving HTML tags, and replaces
    /// embedded URLs with a placeholder so the model's attention stays on
    /// prose. Grounded on `summarizer.py::_clean_content`.
    pub fn clean_content(raw: &str) -> String {
        let no_tags = {
            let mut out = String::with_capacity(raw.len());
            let mut in_tag = false;
            for c in raw.chars() {
                match c {
                    '<' => in_tag = true,
                    '>' => in_tag = false,
                    _ if !in_tag => out.push(c),
                    _ => {}
                }
            }
            out
        };
        let no_urls = Self::url_pattern().replace_all(&no_tags, "[link]").into_owned();
        no_urls.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn truncate(content: &str) -> String {
        content.chars().take(MAX_CONTENT_CHARS).collect()
    }

    pub async fn summarize(&self, sub_question: &str, source: &Source) -> Result<Finding> {
        let cleaned = Self::clean_content(&source.content);
        let truncated = Self::truncate(&cleaned);
        let original_word_count = cleaned.split_whitespace().count();

        let user_message = format!(
            "Sub-question: {sub_question}\n\nSource: {} ({})\n\nContent:\n{truncated}",
            source.title, source.url
        );
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(&user_message)];
        let completion = self.transport.complete(&messages, false, true).await?;

        let fallback_summary: String = truncated.chars().take(FALLBACK_SUMMARY_CHARS).collect();
        let parsed: SummaryResponse = parse_lenient(&completion.content, {
            let fallback_summary = fallback_summary.clone();
            move || SummaryResponse {
                summary: Some(fallback_summary),
                key_facts: vec![],
                relevance_score: Some(0.5),
            }
        });

        let summary = parsed.summary.unwrap_or(fallback_summary);
        let relevance_score = parsed.relevance_score.unwrap_or(0.5);
        let summary_word_count = summary.split_whitespace().count();
        let compression_ratio = if original_word_count == 0 {
            1.0
        } else {
            summary_word_count as f64 / original_word_count as f64
        };

        Ok(Finding {
            sub_question_id: source.sub_question_id.clone(),
            source_info: SourceInfo {
                url: source.url.clone(),
                title: source.title.clone(),
                reliability: source.reliability,
            },
            summary,
            key_facts: parsed.key_facts,
            relevance_score,
            compression_ratio,
            word_count: WordCount {
                original: original_word_count,
                summary: summary_word_count,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_domain::model::Reliability;
    use research_providers::ScriptedTransport;

    fn source(content: &str) -> Source {
        Source {
            id: "src-001".into(),
            url: "https://example.com/a".into(),
            title: "Example".into(),
            content: content.into(),
            domain: "example.com".into(),
            confidence: 0.65,
            reliability: Reliability::Medium,
            timestamp: "2026-01-01T00:00:00".into(),
            sub_question_id: "sq-001".into(),
        }
    }

    #[test]
    fn clean_content_strips_tags_and_urls_and_collapses_whitespace() {
        let raw = "<p>See  https://example.com/path   for   details</p>";
        assert_eq!(Summarizer::clean_content(raw), "See [link] for details");
    }

    #[tokio::test]
    async fn summarizes_from_valid_json() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            r#"{"summary": "It works.", "key_facts": ["fact one"], "relevance_score": 0.9}"#.to_string(),
        ]));
        let summarizer = Summarizer::new(transport);
        let finding = summarizer.summarize("does it work?", &source("Some content about the topic.")).await.unwrap();
        assert_eq!(finding.summary, "It works.");
        assert_eq!(finding.key_facts, vec!["fact one".to_string()]);
        assert_eq!(finding.relevance_score, 0.9);
    }

    #[tokio::test]
    async fn falls_back_to_truncated_content_on_malformed_output() {
        let transport = Arc::new(ScriptedTransport::new(vec!["garbage, not json".to_string()]));
        let summarizer = Summarizer::new(transport);
        let finding = summarizer.summarize("q", &source("Original raw content here.")).await.unwrap();
        assert!(finding.summary.starts_with("Original raw content"));
        assert!(finding.key_facts.is_empty());
        assert_eq!(finding.relevance_score, 0.5);
    }
}
