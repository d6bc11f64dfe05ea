//! Deterministic Markdown rendering of a finished [`Report`], stored
//! alongside its JSON form so a session's output is readable without a
//! client that understands the JSON schema.

use research_domain::model::Report;
use std::fmt::Write;

/// Title → executive summary → sections → confidence assessment →
/// numbered sources → word-count footer. Never panics: malformed or
/// empty fields simply render as empty text.
pub fn report_to_markdown(report: &Report) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# {}\n", report.title);
    if !report.executive_summary.is_empty() {
        let _ = writeln!(out, "## Executive Summary\n\n{}\n", report.executive_summary);
    }

    for section in &report.sections {
        let _ = writeln!(out, "## {}\n\n{}\n", section.heading, section.content);
    }

    if !report.confidence_assessment.is_empty() {
        let _ = writeln!(out, "## Confidence Assessment\n\n{}\n", report.confidence_assessment);
    }

    if !report.sources_used.is_empty() {
        let _ = writeln!(out, "## Sources\n");
        for (i, source) in report.sources_used.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}. [{}]({}) — {} ({:.2} confidence)",
                i + 1,
                source.title,
                source.url,
                source.domain,
                source.confidence
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "---\n\n*{} words*", report.word_count);

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_domain::model::{Reliability, ReportSection, ReportSource};

    fn sample_report() -> Report {
        Report {
            title: "Quantum Networking".to_string(),
            executive_summary: "A brief overview.".to_string(),
            sections: vec![ReportSection {
                heading: "Background".to_string(),
                content: "Some content.".to_string(),
            }],
            sources_used: vec![ReportSource {
                id: "https://a.example".to_string(),
                url: "https://a.example".to_string(),
                title: "Source A".to_string(),
                domain: "a.example".to_string(),
                reliability: Reliability::High,
                confidence: 0.8,
            }],
            confidence_assessment: "High confidence.".to_string(),
            word_count: 42,
            error: None,
            citation_validation_warnings: vec![],
        }
    }

    #[test]
    fn renders_all_sections_in_order() {
        let md = report_to_markdown(&sample_report());
        let summary_pos = md.find("Executive Summary").unwrap();
        let section_pos = md.find("Background").unwrap();
        let confidence_pos = md.find("Confidence Assessment").unwrap();
        let sources_pos = md.find("## Sources").unwrap();
        assert!(summary_pos < section_pos);
        assert!(section_pos < confidence_pos);
        assert!(confidence_pos < sources_pos);
        assert!(md.ends_with("*42 words*\n"));
    }

    #[test]
    fn never_panics_on_empty_report() {
        let report = Report {
            title: String::new(),
            executive_summary: String::new(),
            sections: vec![],
            sources_used: vec![],
            confidence_assessment: String::new(),
            word_count: 0,
            error: None,
            citation_validation_warnings: vec![],
        };
        let md = report_to_markdown(&report);
        assert!(md.contains("0 words"));
    }
}
