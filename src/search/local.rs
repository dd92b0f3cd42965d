use super::scoring::{combine, normalize, recency};
use super::{
    MATCH_CONTEXT_CHARS, MemoryItem, SearchHit, SearchProvider, SearchRequest, SearchResponse,
    query,
};
use crate::error::{MemoryError, Result};
use crate::model::{Timestamp, now_millis, truncate_chars};
use crate::storage::{FullTextMatch, MatchFilter, SqliteStore};
use std::future::Future;
use std::pin::Pin;

/// Rows fetched from each index before scoring.
const DEFAULT_FETCH_LIMIT: usize = 1000;

/// Full-text search over the local SQLite indexes with relevance/recency
/// scoring.
#[derive(Clone)]
pub struct LocalSearchProvider {
    store: SqliteStore,
    fetch_limit: usize,
    fixed_now: Option<Timestamp>,
}

impl LocalSearchProvider {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            fixed_now: None,
        }
    }

    /// Score recency against `now` instead of the wall clock.
    pub fn with_now(mut self, now: Timestamp) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit.max(1);
        self
    }

    async fn run(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let Some(expression) = query::to_fts_expression(&request.query) else {
            tracing::debug!(query = %request.query, "search query rejected by grammar");
            return Ok(SearchResponse::default());
        };

        let filter = MatchFilter {
            scope: &request.scope,
            exclude_ids: &request.exclude_ids,
            include_redacted: request.include_redacted,
            limit: self.fetch_limit,
        };
        let observations = match self.store.match_observations(&expression, &filter).await {
            Ok(matches) => matches,
            Err(err) => return swallow_syntax(&request.query, err),
        };
        let summaries = match self.store.match_summaries(&expression, &filter).await {
            Ok(matches) => matches,
            Err(err) => return swallow_syntax(&request.query, err),
        };

        let candidates: Vec<FullTextMatch<MemoryItem>> = observations
            .into_iter()
            .map(|m| FullTextMatch {
                entity: MemoryItem::Observation(m.entity),
                rank: m.rank,
            })
            .chain(summaries.into_iter().map(|m| FullTextMatch {
                entity: MemoryItem::Summary(m.entity),
                rank: m.rank,
            }))
            .collect();

        let ranks: Vec<f64> = candidates.iter().map(|m| m.rank).collect();
        let relevance = normalize(&ranks);
        let now = self.fixed_now.unwrap_or_else(now_millis);

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .zip(relevance)
            .map(|(candidate, relevance)| {
                let item = candidate.entity;
                let score = combine(relevance, recency(now, item.timestamp()));
                let match_context = truncate_chars(item.content(), MATCH_CONTEXT_CHARS);
                SearchHit {
                    item,
                    score,
                    match_context,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.item.timestamp().cmp(&a.item.timestamp()))
                .then_with(|| a.item.id().cmp(b.item.id()))
        });
        let total_candidates = hits.len();
        hits.truncate(request.max_results);

        tracing::debug!(
            query = %request.query,
            total_candidates,
            returned = hits.len(),
            "local search complete"
        );
        Ok(SearchResponse {
            hits,
            total_candidates,
        })
    }
}

fn swallow_syntax(query: &str, err: MemoryError) -> Result<SearchResponse> {
    match err {
        MemoryError::QuerySyntax(message) => {
            tracing::debug!(query, error = %message, "fts5 rejected query");
            Ok(SearchResponse::default())
        }
        other => Err(other),
    }
}

impl SearchProvider for LocalSearchProvider {
    fn name(&self) -> &str {
        "local-fts"
    }

    fn search<'a>(
        &'a self,
        request: &'a SearchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse>> + Send + 'a>> {
        Box::pin(self.run(request))
    }
}
