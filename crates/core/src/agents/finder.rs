//! Discovers diverse sources for one sub-question: LLM-generated search
//! queries, executed against a web search provider, filtered for domain
//! diversity.

use crate::parse::parse_lenient;
use crate::search::WebSearch;
use research_domain::error::Result;
use research_domain::model::{Reliability, Source};
use research_providers::{ChatMessage, LlmTransport};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You generate search queries to find diverse, authoritative sources for a research \
sub-question. Respond with a JSON object: {\"search_queries\": [{\"query\": \"...\", \"priority\": 1}, ...]}.";

#[derive(Debug, Deserialize, Default)]
struct SearchPlan {
    #[serde(default)]
    search_queries: Vec<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

/// The maximum sources kept per domain when diversity enforcement is on,
/// matching `finder.py`'s hardcoded `max_per_domain = 2`.
const MAX_PER_DOMAIN: usize = 2;

pub struct Finder {
    transport: Arc<dyn LlmTransport>,
    search: Arc<dyn WebSearch>,
}

impl Finder {
    pub fn new(transport: Arc<dyn LlmTransport>, search: Arc<dyn WebSearch>) -> Self {
        Self { transport, search }
    }

    async fn generate_search_queries(&self, sub_question: &str) -> Result<Vec<String>> {
        let user_message = format!(
            "Sub-question: {sub_question}\n\n\
             Generate search queries to find diverse, authoritative sources for this research question."
        );
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(&user_message)];
        let completion = self.transport.complete(&messages, true, true).await?;

        let content_for_default = completion.content.clone();
        let plan: SearchPlan = parse_lenient(&completion.content, move || SearchPlan {
            search_queries: vec![SearchQuery {
                query: content_for_default.chars().take(100).collect(),
            }],
        });
        Ok(plan
            .search_queries
            .into_iter()
            .map(|q| q.query)
            .filter(|q| !q.is_empty())
            .collect())
    }

    /// Source reliability heuristic: `.gov`/`.edu` or a known scientific
    /// host maps to high, any dotted domain to medium, else low.
    pub fn estimate_reliability(domain: &str) -> Reliability {
        const TRUSTED_SUFFIXES: [&str; 2] = [".gov", ".edu"];
        const TRUSTED_DOMAINS: [&str; 4] = ["nature.com", "science.org", "arxiv.org", "github.com"];
        if TRUSTED_SUFFIXES.iter().any(|s| domain.ends_with(s))
            || TRUSTED_DOMAINS.iter().any(|d| domain.ends_with(d))
        {
            Reliability::High
        } else if domain.contains('.') {
            Reliability::Medium
        } else {
            Reliability::Low
        }
    }

    fn domain_of(url: &str) -> String {
        url.split("://")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or("")
            .to_string()
    }

    pub async fn find_sources(
        &self,
        sub_question: &str,
        sub_question_id: &str,
        results_per_query: u32,
        sources_limit: u32,
        enforce_diversity: bool,
    ) -> Result<Vec<Source>> {
        let queries = self.generate_search_queries(sub_question).await?;
        let max_per_domain = if enforce_diversity { MAX_PER_DOMAIN } else { usize::MAX };

        let mut sources = Vec::new();
        let mut domain_counts: HashMap<String, usize> = HashMap::new();

        'queries: for query in queries {
            let results = self.search.search(&query, results_per_query).await;
            for result in results {
                if sources.len() >= sources_limit as usize {
                    break 'queries;
                }
                let domain = Self::domain_of(&result.url);
                let count = domain_counts.entry(domain.clone()).or_insert(0);
                if *count >= max_per_domain {
                    continue;
                }
                *count += 1;

                let reliability = Self::estimate_reliability(&domain);
                sources.push(Source {
                    id: Source::make_id(sub_question_id, &result.url),
                    url: result.url,
                    title: if result.title.is_empty() { "Untitled".to_string() } else { result.title },
                    content: result.snippet,
                    domain,
                    confidence: reliability.confidence(),
                    reliability,
                    timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
                    sub_question_id: sub_question_id.to_string(),
                });
            }
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ScriptedSearch, SearchResult};
    use research_providers::ScriptedTransport;

    fn result(url: &str, title: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: url.to_string(),
            snippet: "snippet".to_string(),
        }
    }

    #[test]
    fn reliability_heuristic_matches_trusted_suffixes_and_hosts() {
        assert_eq!(Finder::estimate_reliability("nih.gov"), Reliability::High);
        assert_eq!(Finder::estimate_reliability("mit.edu"), Reliability::High);
        assert_eq!(Finder::estimate_reliability("arxiv.org"), Reliability::High);
        assert_eq!(Finder::estimate_reliability("example.com"), Reliability::Medium);
        assert_eq!(Finder::estimate_reliability("localhost"), Reliability::Low);
    }

    #[tokio::test]
    async fn enforces_per_domain_cap_when_diversity_enabled() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            r#"{"search_queries": [{"query": "q1"}]}"#.to_string(),
        ]));
        let search = Arc::new(ScriptedSearch::new(vec![vec![
            result("https://example.com/a", "A"),
            result("https://example.com/b", "B"),
            result("https://example.com/c", "C"),
            result("https://other.com/d", "D"),
        ]]));
        let finder = Finder::new(transport, search);
        let sources = finder
            .find_sources("question", "sq-001", 10, 10, true)
            .await
            .unwrap();
        let example_count = sources.iter().filter(|s| s.domain == "example.com").count();
        assert_eq!(example_count, 2);
        assert_eq!(sources.len(), 3);
    }

    #[tokio::test]
    async fn respects_overall_sources_limit() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            r#"{"search_queries": [{"query": "q1"}]}"#.to_string(),
        ]));
        let search = Arc::new(ScriptedSearch::new(vec![vec![
            result("https://a.com/1", "A"),
            result("https://b.com/1", "B"),
            result("https://c.com/1", "C"),
        ]]));
        let finder = Finder::new(transport, search);
        let sources = finder
            .find_sources("question", "sq-001", 10, 2, true)
            .await
            .unwrap();
        assert_eq!(sources.len(), 2);
    }
}
