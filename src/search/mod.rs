pub mod local;
pub mod query;
pub mod scoring;

pub use local::LocalSearchProvider;
pub use query::to_fts_expression;

use crate::error::Result;
use crate::model::{Observation, Scope, Summary, Timestamp};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Default cap on hits returned by one search.
pub const DEFAULT_MAX_RESULTS: usize = 50;

/// Characters of content kept in [`SearchHit::match_context`].
pub const MATCH_CONTEXT_CHARS: usize = 100;

/// Something retrievable: an observation or a summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "entity", rename_all = "snake_case")]
pub enum MemoryItem {
    Observation(Observation),
    Summary(Summary),
}

impl MemoryItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Observation(o) => &o.id,
            Self::Summary(s) => &s.id,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Observation(o) => o.timestamp,
            Self::Summary(s) => s.created_at,
        }
    }

    /// Text used for display and token estimates.
    pub fn content(&self) -> &str {
        match self {
            Self::Observation(o) => o.content.as_deref().unwrap_or_default(),
            Self::Summary(s) => &s.content,
        }
    }

    pub fn is_redacted(&self) -> bool {
        matches!(self, Self::Observation(o) if o.redacted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub scope: Scope,
    pub max_results: usize,
    pub exclude_ids: Vec<String>,
    pub include_redacted: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            scope: Scope::default(),
            max_results: DEFAULT_MAX_RESULTS,
            exclude_ids: Vec::new(),
            include_redacted: false,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn excluding(mut self, ids: Vec<String>) -> Self {
        self.exclude_ids = ids;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub item: MemoryItem,
    pub score: f64,
    pub match_context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Matches found before truncation to `max_results`.
    pub total_candidates: usize,
}

/// Candidate source for retrieval. Implementations must not surface query
/// syntax problems as errors; a malformed query is an empty response.
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn search<'a>(
        &'a self,
        request: &'a SearchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse>> + Send + 'a>>;
}
