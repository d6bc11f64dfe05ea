//! The fixed-topology state graph: planner → finder → summarizer → (router
//! A) → reviewer → (router B) → writer → END, with a bounded iteration
//! loop and a finder retry loop. Grounded on the original system's
//! `ResearchGraph`.

use crate::agents::{Finder, Planner, Reviewer, Summarizer, Writer};
use crate::search::{ContentFetcher, WebSearch};
use async_trait::async_trait;
use research_domain::error::Result;
use research_domain::model::{EventType, ResearchState, SessionStatus, Source, SubQuestionStatus};
use research_providers::LlmTransport;
use std::collections::HashSet;
use std::sync::Arc;

/// Cooperatively checked before each node; the engine never interrupts a
/// node mid-flight, only between them.
pub trait CancelSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Durable checkpoint hook, called after every node so a session's state is
/// inspectable even if the process dies mid-run. Resumption from a
/// checkpoint is not implemented — see the crash-recovery design instead.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn checkpoint(&self, state: &ResearchState) -> Result<()>;
}

/// Fan-out target for node-level progress events. The Session Manager
/// installs one of these per run so every node emission reaches both the
/// live stream and the durable log.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event_type: EventType, message: String, fields: serde_json::Map<String, serde_json::Value>);
}

/// A sink that drops every event, for callers that only want the final
/// `ResearchState` (tests, offline batch runs).
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event_type: EventType, _message: String, _fields: serde_json::Map<String, serde_json::Value>) {}
}

/// A signal that is never cancelled.
pub struct NeverCancelled;

impl CancelSignal for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Maximum times the summarizer→finder retry loop fires before falling
/// through to the reviewer regardless of key-fact yield.
const MAX_FINDER_RETRIES: u32 = 2;

fn empty_fields() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// The collaborators every run needs beyond its own scalar parameters:
/// cancellation, event fan-out, and checkpointing. Bundled so `run`'s
/// signature stays a named contract rather than a wall of positional
/// arguments.
pub struct RunContext {
    pub cancel: Arc<dyn CancelSignal>,
    pub events: Arc<dyn EventSink>,
    pub checkpointer: Arc<dyn Checkpointer>,
}

pub struct GraphEngine {
    planner: Planner,
    finder: Finder,
    summarizer: Summarizer,
    reviewer: Reviewer,
    writer: Writer,
    content_fetcher: Arc<dyn ContentFetcher>,
}

impl GraphEngine {
    pub fn new(transport: Arc<dyn LlmTransport>, web_search: Arc<dyn WebSearch>, content_fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            planner: Planner::new(transport.clone()),
            finder: Finder::new(transport.clone(), web_search),
            summarizer: Summarizer::new(transport.clone()),
            reviewer: Reviewer::new(transport.clone()),
            writer: Writer::new(transport),
            content_fetcher,
        }
    }

    /// Runs a complete research session, bounded by `timeout`. Never below
    /// 60 seconds, per the run contract.
    pub async fn run(
        &self,
        query: String,
        session_id: String,
        timeout: std::time::Duration,
        options: research_domain::model::ResearchOptions,
        session_memory: Vec<String>,
        run_context: RunContext,
    ) -> ResearchState {
        let RunContext { cancel, events, checkpointer } = run_context;
        let timeout = timeout.max(std::time::Duration::from_secs(60));
        let mut state = ResearchState::new(session_id, query, options, session_memory, now_iso());

        match tokio::time::timeout(timeout, self.drive(&mut state, cancel, events.as_ref(), checkpointer.as_ref())).await {
            Ok(Ok(())) => state,
            Ok(Err(e)) => {
                state.status = SessionStatus::Error;
                state.error = Some(e.to_string());
                events
                    .emit(EventType::ResearchError, e.to_string(), empty_fields())
                    .await;
                state
            }
            Err(_) => {
                state.status = SessionStatus::Error;
                state.error = Some(format!("timed out after {}s", timeout.as_secs()));
                events
                    .emit(EventType::ResearchError, state.error.clone().unwrap(), empty_fields())
                    .await;
                state
            }
        }
    }

    async fn drive(
        &self,
        state: &mut ResearchState,
        cancel: Arc<dyn CancelSignal>,
        events: &dyn EventSink,
        checkpointer: &dyn Checkpointer,
    ) -> Result<()> {
        #[derive(PartialEq)]
        enum Node {
            Planner,
            Finder,
            Summarizer,
            Reviewer,
            Writer,
        }

        let mut node = Node::Planner;
        loop {
            if cancel.is_cancelled() {
                state.status = SessionStatus::Stopped;
                return Ok(());
            }

            match node {
                Node::Planner => {
                    self.planner_node(state, events).await?;
                    node = Node::Finder;
                }
                Node::Finder => {
                    self.finder_node(state, events).await?;
                    node = Node::Summarizer;
                }
                Node::Summarizer => {
                    self.summarizer_node(state, events).await?;
                    node = if self.router_a(state) { Node::Finder } else { Node::Reviewer };
                }
                Node::Reviewer => {
                    self.reviewer_node(state, events).await?;
                    node = if self.router_b(state) { Node::Planner } else { Node::Writer };
                }
                Node::Writer => {
                    self.writer_node(state, events).await?;
                    checkpointer.checkpoint(state).await?;
                    return Ok(());
                }
            }
            checkpointer.checkpoint(state).await?;
        }
    }

    async fn planner_node(&self, state: &mut ResearchState, events: &dyn EventSink) -> Result<()> {
        events
            .emit(EventType::PlannerRunning, "Analyzing query and generating research plan...".to_string(), empty_fields())
            .await;

        let query = Planner::augment_query(&state.query, state.iteration, &state.gaps);
        let plan = self.planner.plan(&query, &state.session_memory, &state.options).await?;

        let questions: Vec<serde_json::Value> = plan.iter().map(|sq| serde_json::Value::String(sq.question.clone())).collect();
        let mut fields = serde_json::Map::new();
        fields.insert("sub_questions_count".to_string(), serde_json::Value::from(plan.len()));
        fields.insert("questions".to_string(), serde_json::Value::Array(questions));

        state.plan = plan;
        events
            .emit(
                EventType::PlannerComplete,
                format!("Generated {} sub-questions to research", state.plan.len()),
                fields,
            )
            .await;
        Ok(())
    }

    async fn finder_node(&self, state: &mut ResearchState, events: &dyn EventSink) -> Result<()> {
        events
            .emit(EventType::FinderRunning, "Searching for diverse sources across domains...".to_string(), empty_fields())
            .await;

        let mut seen_urls: HashSet<String> = state.sources.iter().map(|s| s.url.clone()).collect();
        let mut domains: HashSet<String> = state.sources.iter().map(|s| s.domain.clone()).collect();

        for sub_question in state.plan.clone() {
            let new_sources = self
                .finder
                .find_sources(
                    &sub_question.question,
                    &sub_question.id,
                    state.options.search_results_per_query,
                    state.options.max_sources,
                    state.options.source_diversity,
                )
                .await?;

            for source in new_sources {
                if seen_urls.contains(&source.url) {
                    continue;
                }
                seen_urls.insert(source.url.clone());
                domains.insert(source.domain.clone());

                let mut fields = serde_json::Map::new();
                fields.insert("source_title".to_string(), serde_json::Value::String(source.title.clone()));
                fields.insert("source_url".to_string(), serde_json::Value::String(source.url.clone()));
                fields.insert("source_domain".to_string(), serde_json::Value::String(source.domain.clone()));
                fields.insert("sources_so_far".to_string(), serde_json::Value::from(state.sources.len() + 1));

                events
                    .emit(EventType::FinderSource, format!("Found source: {}", source.title), fields)
                    .await;
                state.sources.push(source);
            }
        }

        let sample_urls: Vec<serde_json::Value> = state.sources.iter().take(5).map(|s| serde_json::Value::String(s.url.clone())).collect();
        let mut fields = serde_json::Map::new();
        fields.insert("sources_count".to_string(), serde_json::Value::from(state.sources.len()));
        fields.insert("domains_count".to_string(), serde_json::Value::from(domains.len()));
        fields.insert("urls".to_string(), serde_json::Value::Array(sample_urls));

        events
            .emit(
                EventType::FinderComplete,
                format!("Discovered {} unique sources from {} different domains", state.sources.len(), domains.len()),
                fields,
            )
            .await;
        Ok(())
    }

    async fn summarizer_node(&self, state: &mut ResearchState, events: &dyn EventSink) -> Result<()> {
        events
            .emit(
                EventType::SummarizerRunning,
                "Extracting key facts and compressing content...".to_string(),
                empty_fields(),
            )
            .await;

        let sq_questions: std::collections::HashMap<String, String> =
            state.plan.iter().map(|sq| (sq.id.clone(), sq.question.clone())).collect();

        let already_summarized: HashSet<String> = state.findings.iter().map(|f| f.source_info.url.clone()).collect();
        let limit = state.options.summarizer_source_limit as usize;
        let mut new_key_facts = 0usize;
        let mut new_findings = 0usize;

        let pending: Vec<Source> = state
            .sources
            .iter()
            .filter(|s| !already_summarized.contains(&s.url))
            .take(limit)
            .cloned()
            .collect();

        for source in pending {
            let mut fields = serde_json::Map::new();
            fields.insert("source_url".to_string(), serde_json::Value::String(source.url.clone()));
            events
                .emit(EventType::SummarizerFetch, format!("Fetching content from {}", source.url), fields)
                .await;

            let fetched = self.content_fetcher.fetch(&source.url).await;
            let content = fetched.unwrap_or_else(|| source.content.clone());
            let source_with_content = Source { content, ..source };

            let question = sq_questions.get(&source_with_content.sub_question_id).cloned().unwrap_or_default();
            let finding = self.summarizer.summarize(&question, &source_with_content).await?;

            new_key_facts += finding.key_facts.len();
            new_findings += 1;
            state.findings.push(finding);
        }

        if new_key_facts == 0 && new_findings > 0 {
            state.needs_finder_retry = true;
            let mut fields = serde_json::Map::new();
            fields.insert("retry_reason".to_string(), serde_json::Value::String("zero_key_facts".to_string()));
            events
                .emit(
                    EventType::SummarizerRetry,
                    "No key facts extracted. Extending search with broader queries...".to_string(),
                    fields,
                )
                .await;
        } else {
            state.needs_finder_retry = false;
            let mut fields = serde_json::Map::new();
            fields.insert("findings_count".to_string(), serde_json::Value::from(state.findings.len()));
            fields.insert("key_facts_count".to_string(), serde_json::Value::from(new_key_facts));
            events
                .emit(
                    EventType::SummarizerComplete,
                    format!("Extracted {new_key_facts} key facts from {new_findings} sources"),
                    fields,
                )
                .await;
        }
        Ok(())
    }

    /// Router A: retry finder on a zero-key-fact summarization round, up to
    /// `MAX_FINDER_RETRIES` times. Returns `true` to route back to finder.
    fn router_a(&self, state: &mut ResearchState) -> bool {
        if state.needs_finder_retry && state.finder_retry_count < MAX_FINDER_RETRIES {
            state.finder_retry_count += 1;
            true
        } else {
            false
        }
    }

    async fn reviewer_node(&self, state: &mut ResearchState, events: &dyn EventSink) -> Result<()> {
        events
            .emit(
                EventType::ReviewerRunning,
                "Analyzing findings for coverage gaps and depth issues...".to_string(),
                empty_fields(),
            )
            .await;

        let gaps = self
            .reviewer
            .review(&state.plan, &state.findings, state.iteration, state.options.max_iterations)
            .await?;

        let next_action = if gaps.has_gaps && state.iteration < state.options.max_iterations {
            "iterate"
        } else {
            "finish"
        };
        let mut fields = serde_json::Map::new();
        fields.insert("gaps_found".to_string(), serde_json::Value::from(gaps.gaps.len()));
        fields.insert("next_action".to_string(), serde_json::Value::String(next_action.to_string()));

        let message = format!(
            "Found {} gaps (confidence: {:.0}%). {}",
            gaps.gaps.len(),
            gaps.confidence * 100.0,
            if next_action == "iterate" { "Starting next iteration..." } else { "Proceeding to write report..." }
        );
        state.gaps = gaps;
        events.emit(EventType::ReviewerComplete, message, fields).await;
        Ok(())
    }

    /// Router B: max iterations or no remaining gaps routes to the writer;
    /// otherwise loops back to the planner. Returns `true` to route to the
    /// planner.
    fn router_b(&self, state: &mut ResearchState) -> bool {
        if state.iteration >= state.options.max_iterations {
            return false;
        }
        if !state.gaps.has_gaps {
            return false;
        }
        state.iteration += 1;
        true
    }

    async fn writer_node(&self, state: &mut ResearchState, events: &dyn EventSink) -> Result<()> {
        events
            .emit(
                EventType::WriterRunning,
                format!("Synthesizing {} findings into a report with citations...", state.findings.len()),
                empty_fields(),
            )
            .await;

        let report = self.writer.write(&state.findings, state.options.report_length).await?;

        let mut fields = serde_json::Map::new();
        fields.insert("word_count".to_string(), serde_json::Value::from(report.word_count));
        fields.insert("sources_cited".to_string(), serde_json::Value::from(report.sources_used.len()));
        let message = format!("Report complete: {} words, {} sources cited", report.word_count, report.sources_used.len());

        state.final_report = Some(report);
        state.status = SessionStatus::Completed;
        finalize_plan_statuses(state);
        events.emit(EventType::WriterComplete, message, fields).await;
        Ok(())
    }
}

/// Mark every planned sub-question completed once the writer has run.
fn finalize_plan_statuses(state: &mut ResearchState) {
    for sq in state.plan.iter_mut() {
        sq.status = SubQuestionStatus::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ScriptedFetcher, ScriptedSearch};
    use research_domain::model::ResearchOptions;
    use research_providers::ScriptedTransport;

    fn planner_json(n: usize) -> String {
        let qs: Vec<String> = (1..=n)
            .map(|i| format!(r#"{{"id": "sq-{i:03}", "question": "question {i}"}}"#))
            .collect();
        format!(r#"{{"sub_questions": [{}]}}"#, qs.join(","))
    }

    fn search_result(url: &str) -> crate::search::SearchResult {
        crate::search::SearchResult {
            title: "Title".to_string(),
            url: url.to_string(),
            snippet: "snippet".to_string(),
        }
    }

    struct RecordingCheckpointer {
        count: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Checkpointer for RecordingCheckpointer {
        async fn checkpoint(&self, _state: &ResearchState) -> Result<()> {
            self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_writer_with_one_iteration() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            planner_json(1),                                                     // planner
            r#"{"search_queries": [{"query": "q"}]}"#.to_string(),                // finder
            r#"{"summary": "s", "key_facts": ["fact"], "relevance_score": 0.8}"#.to_string(), // summarizer
            r#"{"has_gaps": false, "gaps": [], "recommendations": [], "confidence": 0.9}"#.to_string(), // reviewer
            r#"{"title": "Report", "executive_summary": "summary", "sections": [], "confidence_assessment": "high"}"#.to_string(), // writer
        ]));
        let search = Arc::new(ScriptedSearch::new(vec![vec![search_result("https://a.example/1")]]));
        let fetcher = Arc::new(ScriptedFetcher::new(std::collections::HashMap::new()));
        let engine = GraphEngine::new(transport, search, fetcher);
        let checkpointer = Arc::new(RecordingCheckpointer { count: std::sync::atomic::AtomicUsize::new(0) });

        let state = engine
            .run(
                "my query".to_string(),
                "session-1".to_string(),
                std::time::Duration::from_secs(60),
                ResearchOptions::default(),
                vec![],
                RunContext {
                    cancel: Arc::new(NeverCancelled),
                    events: Arc::new(NullEventSink),
                    checkpointer: checkpointer.clone(),
                },
            )
            .await;

        assert_eq!(state.status, SessionStatus::Completed);
        assert!(state.final_report.is_some());
        assert!(checkpointer.count.load(std::sync::atomic::Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn iterates_when_reviewer_reports_gaps_until_max_iterations() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            planner_json(1),
            r#"{"search_queries": [{"query": "q"}]}"#.to_string(),
            r#"{"summary": "s", "key_facts": ["fact"], "relevance_score": 0.8}"#.to_string(),
            r#"{"has_gaps": true, "gaps": ["missing depth"], "recommendations": ["dig deeper"], "confidence": 0.3}"#.to_string(),
            planner_json(1),
            r#"{"search_queries": [{"query": "q2"}]}"#.to_string(),
            r#"{"summary": "s2", "key_facts": ["fact2"], "relevance_score": 0.8}"#.to_string(),
            r#"{"has_gaps": false, "gaps": [], "recommendations": [], "confidence": 0.9}"#.to_string(),
            r#"{"title": "Report", "executive_summary": "summary", "sections": [], "confidence_assessment": "high"}"#.to_string(),
        ]));
        let search = Arc::new(ScriptedSearch::new(vec![
            vec![search_result("https://a.example/1")],
            vec![search_result("https://b.example/2")],
        ]));
        let fetcher = Arc::new(ScriptedFetcher::new(std::collections::HashMap::new()));
        let engine = GraphEngine::new(transport, search, fetcher);
        let checkpointer = Arc::new(RecordingCheckpointer { count: std::sync::atomic::AtomicUsize::new(0) });

        let options = ResearchOptions { max_iterations: 2, ..ResearchOptions::default() };

        let state = engine
            .run(
                "my query".to_string(),
                "session-2".to_string(),
                std::time::Duration::from_secs(60),
                options,
                vec![],
                RunContext {
                    cancel: Arc::new(NeverCancelled),
                    events: Arc::new(NullEventSink),
                    checkpointer,
                },
            )
            .await;

        assert_eq!(state.status, SessionStatus::Completed);
        assert_eq!(state.iteration, 2);
        assert_eq!(state.sources.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_before_a_node_stops_the_run() {
        struct AlwaysCancelled;
        impl CancelSignal for AlwaysCancelled {
            fn is_cancelled(&self) -> bool {
                true
            }
        }
        let transport = Arc::new(ScriptedTransport::new(vec![planner_json(1)]));
        let search = Arc::new(ScriptedSearch::new(vec![]));
        let fetcher = Arc::new(ScriptedFetcher::new(std::collections::HashMap::new()));
        let engine = GraphEngine::new(transport, search, fetcher);
        let checkpointer = Arc::new(RecordingCheckpointer { count: std::sync::atomic::AtomicUsize::new(0) });

        let state = engine
            .run(
                "q".to_string(),
                "session-3".to_string(),
                std::time::Duration::from_secs(60),
                ResearchOptions::default(),
                vec![],
                RunContext {
                    cancel: Arc::new(AlwaysCancelled),
                    events: Arc::new(NullEventSink),
                    checkpointer,
                },
            )
            .await;

        assert_eq!(state.status, SessionStatus::Stopped);
        assert!(state.plan.is_empty());
    }
}
