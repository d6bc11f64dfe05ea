//! Synthesizes findings into a cited report: a strict-JSON LLM call, a
//! repair pass if that fails, a raw-text fallback if the repair pass also
//! fails, and a citation validator that runs regardless of which path
//! produced the report.

use research_domain::error::Result;
use research_domain::model::{Finding, Report, ReportLength, ReportSection, ReportSource};
use research_providers::{ChatMessage, LlmTransport};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You write a research report from the findings gathered by earlier agents. Cite \
sources inline using the form [🔗 Title](URL), where URL exactly matches a finding's source URL. Respond with \
strict JSON: {\"title\": \"...\", \"executive_summary\": \"...\", \
\"sections\": [{\"heading\": \"...\", \"content\": \"...\"}], \"confidence_assessment\": \"...\"}.";

const REPAIR_SYSTEM_PROMPT: &str =
    "The previous response was not valid JSON. Re-emit the SAME report content as strict JSON only, no \
prose, no code fences, matching the schema: {\"title\": \"...\", \"executive_summary\": \"...\", \
\"sections\": [{\"heading\": \"...\", \"content\": \"...\"}], \"confidence_assessment\": \"...\"}.";

/// The first writer response is truncated to this many characters before
/// being handed to the repair pass, per spec.md's "truncated to 12 000
/// characters" repair contract.
const REPAIR_INPUT_CHARS: usize = 12_000;
const RAW_FALLBACK_SUMMARY_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    executive_summary: Option<String>,
    #[serde(default)]
    sections: Vec<RawSection>,
    #[serde(default)]
    confidence_assessment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    heading: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

pub struct Writer {
    transport: Arc<dyn LlmTransport>,
}

impl Writer {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self { transport }
    }

    fn build_context(findings: &[Finding], report_length: ReportLength) -> String {
        let mut lines = vec![format!("Target length: ~{} words", report_length.target_words()), String::new(), "Findings:".to_string()];
        for (i, finding) in findings.iter().enumerate() {
            lines.push(format!(
                "{}. [🔗 {}]({}) — {}",
                i + 1,
                finding.source_info.title,
                finding.source_info.url,
                finding.summary
            ));
        }
        lines.join("\n")
    }

    async fn call_writer(&self, context: &str) -> Result<String> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(context)];
        let completion = self.transport.complete(&messages, false, true).await?;
        Ok(completion.content)
    }

    async fn repair(&self, broken_output: &str) -> Result<String> {
        let truncated: String = broken_output.chars().take(REPAIR_INPUT_CHARS).collect();
        let messages = vec![ChatMessage::system(REPAIR_SYSTEM_PROMPT), ChatMessage::user(&truncated)];
        let completion = self.transport.complete(&messages, false, true).await?;
        Ok(completion.content)
    }

    fn extract_json_strict(content: &str) -> Option<RawReport> {
        let candidate = crate::parse::extract_json(content)?;
        serde_json::from_str(candidate).ok()
    }

    fn raw_text_report(raw_output: &str, _findings: &[Finding]) -> (String, String, Vec<ReportSection>, String) {
        let summary: String = raw_output.chars().take(RAW_FALLBACK_SUMMARY_CHARS).collect();
        (
            "Research Report".to_string(),
            summary,
            vec![ReportSection {
                heading: "Findings".to_string(),
                content: raw_output.to_string(),
            }],
            "Confidence reduced: report synthesized from unparseable model output.".to_string(),
        )
    }

    fn sources_used(findings: &[Finding]) -> Vec<ReportSource> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for finding in findings {
            if seen.insert(finding.source_info.url.clone()) {
                sources.push(ReportSource {
                    id: finding.source_info.url.clone(),
                    url: finding.source_info.url.clone(),
                    title: finding.source_info.title.clone(),
                    domain: Self::domain_of(&finding.source_info.url),
                    reliability: finding.source_info.reliability,
                    confidence: finding.source_info.reliability.confidence(),
                });
            }
        }
        sources
    }

    fn domain_of(url: &str) -> String {
        let host = url.split("://").nth(1).and_then(|r| r.split('/').next()).unwrap_or("");
        host.strip_prefix("www.").unwrap_or(host).to_string()
    }

    fn markdown_link_pattern() -> &'static regex::Regex {
        static RE: OnceLock<regex::Regex> = OnceLock::new();
        RE.get_or_init(|| regex::Regex::new(r"\[🔗 ([^\]]*)\]\(([^)]*)\)").expect("valid link regex"))
    }

    fn numeric_citation_pattern() -> &'static regex::Regex {
        static RE: OnceLock<regex::Regex> = OnceLock::new();
        RE.get_or_init(|| regex::Regex::new(r"\[(\d+)\]").expect("valid numeric citation regex"))
    }

    /// Validates and repairs inline citations: markdown-link citations are
    /// kept only if their URL is among the findings; legacy numeric
    /// citations are converted to the link form when the index maps to a
    /// finding, else dropped. Warnings record every drop/conversion.
    fn validate_citations(text: &str, findings: &[Finding], warnings: &mut Vec<String>) -> String {
        let known_urls: HashSet<&str> = findings.iter().map(|f| f.source_info.url.as_str()).collect();

        let after_links = Self::markdown_link_pattern().replace_all(text, |caps: &regex::Captures| {
            let title = &caps[1];
            let url = &caps[2];
            if known_urls.contains(url) {
                format!("[🔗 {title}]({url})")
            } else {
                warnings.push(format!("dropped citation with unknown URL: {url}"));
                String::new()
            }
        });

        let after_numeric = Self::numeric_citation_pattern().replace_all(&after_links, |caps: &regex::Captures| {
            let n: usize = caps[1].parse().unwrap_or(0);
            if n >= 1 && n <= findings.len() {
                let finding = &findings[n - 1];
                format!("[🔗 {}]({})", finding.source_info.title, finding.source_info.url)
            } else {
                warnings.push(format!("dropped numeric citation [{n}]: out of range"));
                String::new()
            }
        });

        after_numeric.into_owned()
    }

    pub async fn write(&self, findings: &[Finding], report_length: ReportLength) -> Result<Report> {
        let context = Self::build_context(findings, report_length);
        let first_output = self.call_writer(&context).await?;

        let (title, executive_summary, mut sections, confidence_assessment) =
            if let Some(parsed) = Self::extract_json_strict(&first_output) {
                Self::report_fields_from_raw(parsed, findings)
            } else {
                let repaired_output = self.repair(&first_output).await?;
                if let Some(parsed) = Self::extract_json_strict(&repaired_output) {
                    Self::report_fields_from_raw(parsed, findings)
                } else {
                    Self::raw_text_report(&first_output, findings)
                }
            };

        let mut warnings = Vec::new();
        let validated_summary = Self::validate_citations(&executive_summary, findings, &mut warnings);
        for section in sections.iter_mut() {
            section.content = Self::validate_citations(&section.content, findings, &mut warnings);
        }

        let word_count = validated_summary.split_whitespace().count()
            + sections.iter().map(|s| s.content.split_whitespace().count()).sum::<usize>();

        Ok(Report {
            title,
            executive_summary: validated_summary,
            sections,
            sources_used: Self::sources_used(findings),
            confidence_assessment,
            word_count,
            error: None,
            citation_validation_warnings: warnings,
        })
    }

    fn report_fields_from_raw(raw: RawReport, findings: &[Finding]) -> (String, String, Vec<ReportSection>, String) {
        let title = raw.title.unwrap_or_else(|| "Research Report".to_string());
        let executive_summary = raw.executive_summary.unwrap_or_default();
        let sections = if raw.sections.is_empty() {
            vec![ReportSection {
                heading: "Findings".to_string(),
                content: findings.iter().map(|f| f.summary.clone()).collect::<Vec<_>>().join("\n\n"),
            }]
        } else {
            raw.sections
                .into_iter()
                .map(|s| ReportSection {
                    heading: s.heading.unwrap_or_else(|| "Section".to_string()),
                    content: s.content.unwrap_or_default(),
                })
                .collect()
        };
        let confidence_assessment = raw.confidence_assessment.unwrap_or_default();
        (title, executive_summary, sections, confidence_assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_domain::model::{Reliability, SourceInfo, WordCount};
    use research_providers::ScriptedTransport;

    fn finding(url: &str, title: &str) -> Finding {
        Finding {
            sub_question_id: "sq-001".into(),
            source_info: SourceInfo {
                url: url.into(),
                title: title.into(),
                reliability: Reliability::High,
            },
            summary: "a summary".into(),
            key_facts: vec![],
            relevance_score: 0.8,
            compression_ratio: 1.0,
            word_count: WordCount { original: 10, summary: 5 },
        }
    }

    #[tokio::test]
    async fn writes_from_valid_json_and_keeps_known_citation() {
        let findings = vec![finding("https://a.example/x", "Source A")];
        let body = r#"{"title": "My Report", "executive_summary": "See [🔗 Source A](https://a.example/x).", "sections": [{"heading": "Body", "content": "More [🔗 Source A](https://a.example/x) detail."}], "confidence_assessment": "high"}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![body.to_string()]));
        let writer = Writer::new(transport);
        let report = writer.write(&findings, ReportLength::Medium).await.unwrap();
        assert_eq!(report.title, "My Report");
        assert!(report.executive_summary.contains("https://a.example/x"));
        assert!(report.citation_validation_warnings.is_empty());
        assert_eq!(report.sources_used.len(), 1);
    }

    #[tokio::test]
    async fn drops_citation_with_unknown_url() {
        let findings = vec![finding("https://a.example/x", "Source A")];
        let body = r#"{"title": "T", "executive_summary": "See [🔗 Unknown](https://unknown.example/y).", "sections": [], "confidence_assessment": "low"}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![body.to_string()]));
        let writer = Writer::new(transport);
        let report = writer.write(&findings, ReportLength::Short).await.unwrap();
        assert!(!report.executive_summary.contains("unknown.example"));
        assert_eq!(report.citation_validation_warnings.len(), 1);
    }

    #[tokio::test]
    async fn converts_valid_numeric_citation_to_link_form() {
        let findings = vec![finding("https://a.example/x", "Source A")];
        let body = r#"{"title": "T", "executive_summary": "As shown in [1].", "sections": [], "confidence_assessment": "ok"}"#;
        let transport = Arc::new(ScriptedTransport::new(vec![body.to_string()]));
        let writer = Writer::new(transport);
        let report = writer.write(&findings, ReportLength::Short).await.unwrap();
        assert!(report.executive_summary.contains("[🔗 Source A](https://a.example/x)"));
    }

    #[tokio::test]
    async fn repairs_on_first_malformed_response() {
        let findings = vec![finding("https://a.example/x", "Source A")];
        let valid = r#"{"title": "Repaired", "executive_summary": "ok", "sections": [], "confidence_assessment": "ok"}"#;
        let transport = Arc::new(ScriptedTransport::new(vec!["not json at all".to_string(), valid.to_string()]));
        let writer = Writer::new(transport);
        let report = writer.write(&findings, ReportLength::Short).await.unwrap();
        assert_eq!(report.title, "Repaired");
    }

    #[tokio::test]
    async fn falls_back_to_raw_text_report_when_repair_also_fails() {
        let findings = vec![finding("https://a.example/x", "Source A")];
        let transport = Arc::new(ScriptedTransport::new(vec![
            "still not json".to_string(),
            "still broken".to_string(),
        ]));
        let writer = Writer::new(transport);
        let report = writer.write(&findings, ReportLength::Short).await.unwrap();
        assert_eq!(report.title, "Research Report");
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sources_used.len(), 1);
    }
}
