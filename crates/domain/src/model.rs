//! Research session data model: the types persisted by the store and
//! threaded through the graph engine.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQuestionStatus {
    Pending,
    Researching,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reliability {
    High,
    Medium,
    Low,
}

impl Reliability {
    /// Confidence mapping fixed by the source finder's heuristic: high=0.8,
    /// medium=0.65, low=0.5.
    pub fn confidence(&self) -> f64 {
        match self {
            Reliability::High => 0.8,
            Reliability::Medium => 0.65,
            Reliability::Low => 0.5,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLength {
    Short,
    Medium,
    Long,
}

impl ReportLength {
    /// Target word count the writer aims for, per report length preset.
    pub fn target_words(&self) -> usize {
        match self {
            ReportLength::Short => 900,
            ReportLength::Medium => 1500,
            ReportLength::Long => 2300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchOptions {
    pub max_iterations: u32,
    pub max_sources: u32,
    pub max_sources_per_question: u32,
    pub search_results_per_query: u32,
    pub source_diversity: bool,
    pub report_length: ReportLength,
    pub include_session_memory: bool,
    pub session_memory_limit: u32,
    pub summarizer_source_limit: u32,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_sources: 12,
            max_sources_per_question: 4,
            search_results_per_query: 5,
            source_diversity: true,
            report_length: ReportLength::Medium,
            include_session_memory: true,
            session_memory_limit: 3,
            summarizer_source_limit: 6,
        }
    }
}

impl ResearchOptions {
    /// Clamps every field to its documented bound. Called once at session
    /// start so a malformed request can't silently violate an invariant
    /// deep inside an agent.
    pub fn clamped(mut self) -> Self {
        self.max_iterations = self.max_iterations.clamp(1, 10);
        self.max_sources = self.max_sources.clamp(3, 40);
        self.max_sources_per_question = self.max_sources_per_question.clamp(1, 12);
        self.search_results_per_query = self.search_results_per_query.clamp(1, 15);
        self.session_memory_limit = self.session_memory_limit.clamp(0, 8);
        self.summarizer_source_limit = self.summarizer_source_limit.clamp(1, 20);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Research state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: String,
    pub question: String,
    pub status: SubQuestionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub domain: String,
    pub confidence: f64,
    pub reliability: Reliability,
    pub timestamp: String,
    pub sub_question_id: String,
}

impl Source {
    /// Deterministic id from the owning sub-question and the URL, grounded
    /// on the original finder's `src-{sq_id}-{hash(url) % 10000:04d}` scheme.
    pub fn make_id(sub_question_id: &str, url: &str) -> String {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        let bucket = hasher.finish() % 10000;
        format!("src-{sub_question_id}-{bucket:04}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    pub title: String,
    pub reliability: Reliability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCount {
    pub original: usize,
    pub summary: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub sub_question_id: String,
    pub source_info: SourceInfo,
    pub summary: String,
    pub key_facts: Vec<String>,
    pub relevance_score: f64,
    pub compression_ratio: f64,
    pub word_count: WordCount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapReport {
    pub has_gaps: bool,
    pub gaps: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSource {
    pub id: String,
    pub url: String,
    pub title: String,
    pub domain: String,
    pub reliability: Reliability,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub heading: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub executive_summary: String,
    pub sections: Vec<ReportSection>,
    pub sources_used: Vec<ReportSource>,
    pub confidence_assessment: String,
    pub word_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Citations dropped or rewritten by the writer's validator. Resolves
    /// the open question of whether dropped citations should be surfaced.
    #[serde(default)]
    pub citation_validation_warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub query: String,
    pub session_id: String,
    pub status: SessionStatus,
    pub options: ResearchOptions,
    pub plan: Vec<SubQuestion>,
    pub sources: Vec<Source>,
    pub findings: Vec<Finding>,
    pub gaps: GapReport,
    pub iteration: u32,
    pub needs_finder_retry: bool,
    pub finder_retry_count: u32,
    pub session_memory: Vec<String>,
    pub final_report: Option<Report>,
    pub error: Option<String>,
    pub started_at: String,
}

impl ResearchState {
    pub fn new(session_id: String, query: String, options: ResearchOptions, session_memory: Vec<String>, started_at: String) -> Self {
        Self {
            query,
            session_id,
            status: SessionStatus::Running,
            options,
            plan: Vec::new(),
            sources: Vec::new(),
            findings: Vec::new(),
            gaps: GapReport::default(),
            iteration: 1,
            needs_finder_retry: false,
            finder_retry_count: 0,
            session_memory,
            final_report: None,
            error: None,
            started_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub query: String,
    pub options: ResearchOptions,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
    pub is_stopped: bool,
    pub state: ResearchState,
    pub final_report: Option<Report>,
    pub events_count: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    ResearchStarted,
    Heartbeat,
    ResearchCompleted,
    ResearchStopped,
    ResearchError,
    Done,
    PlannerRunning,
    PlannerComplete,
    FinderRunning,
    FinderSource,
    FinderComplete,
    SummarizerRunning,
    SummarizerFetch,
    SummarizerRetry,
    SummarizerComplete,
    ReviewerRunning,
    ReviewerComplete,
    WriterRunning,
    WriterComplete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Connected => "connected",
            EventType::ResearchStarted => "research_started",
            EventType::Heartbeat => "heartbeat",
            EventType::ResearchCompleted => "research_completed",
            EventType::ResearchStopped => "research_stopped",
            EventType::ResearchError => "research_error",
            EventType::Done => "done",
            EventType::PlannerRunning => "planner_running",
            EventType::PlannerComplete => "planner_complete",
            EventType::FinderRunning => "finder_running",
            EventType::FinderSource => "finder_source",
            EventType::FinderComplete => "finder_complete",
            EventType::SummarizerRunning => "summarizer_running",
            EventType::SummarizerFetch => "summarizer_fetch",
            EventType::SummarizerRetry => "summarizer_retry",
            EventType::SummarizerComplete => "summarizer_complete",
            EventType::ReviewerRunning => "reviewer_running",
            EventType::ReviewerComplete => "reviewer_complete",
            EventType::WriterRunning => "writer_running",
            EventType::WriterComplete => "writer_complete",
        }
    }

    /// Lifecycle events terminate a session's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ResearchCompleted | EventType::ResearchStopped | EventType::ResearchError
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: String,
    pub timestamp: String,
    pub message: String,
    pub index: u64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Documents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Json,
    Markdown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Json => "json",
            DocumentType::Markdown => "markdown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub session_id: String,
    pub doc_type: DocumentType,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

impl Document {
    /// Deterministic id from the owning session and document type.
    pub fn make_id(session_id: &str, doc_type: DocumentType) -> String {
        format!("doc-{session_id}-{}", doc_type.as_str())
    }
}
