pub mod tiering;

use crate::error::Result;
use crate::model::{Pin, PinTargetType, Scope, Summary, Timestamp, estimate_tokens, now_millis};
use crate::search::{DEFAULT_MAX_RESULTS, MemoryItem, SearchHit, SearchProvider, SearchRequest, SearchResponse};
use crate::storage::SqliteStore;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub scope: Scope,
    pub max_candidates: usize,
    pub include_redacted: bool,
    /// `None` disables budget filtering.
    pub token_budget: Option<usize>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, scope: Scope) -> Self {
        Self {
            query: query.into(),
            scope,
            max_candidates: DEFAULT_MAX_RESULTS,
            include_redacted: false,
            token_budget: None,
        }
    }

    pub fn with_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = Some(token_budget);
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }
}

/// An active pin with its resolved target.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedItem {
    pub pin: Pin,
    pub target: MemoryItem,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalProvenance {
    pub query: String,
    pub scope: Scope,
    /// Hits the provider found before any truncation.
    pub total_candidates: usize,
    pub returned_candidates: usize,
    pub truncated: bool,
    pub tier0_over_budget: bool,
    pub provider: String,
    pub tokens_used: usize,
}

/// Tier 0 is `pins` then `current_summary`; tier 1 is `candidates` in score
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub pins: Vec<PinnedItem>,
    pub current_summary: Option<Summary>,
    pub candidates: Vec<SearchHit>,
    pub provenance: RetrievalProvenance,
}

impl RetrievalResult {
    /// Ids of every returned item, tier 0 first.
    pub fn item_ids(&self) -> Vec<&str> {
        self.pins
            .iter()
            .map(|p| p.target.id())
            .chain(self.current_summary.iter().map(|s| s.id.as_str()))
            .chain(self.candidates.iter().map(|h| h.item.id()))
            .collect()
    }
}

/// Answers "what's relevant now" by merging pins, the running session's
/// summary and search candidates under an optional token budget.
pub struct RetrievalOrchestrator {
    store: SqliteStore,
    provider: Arc<dyn SearchProvider>,
    fixed_now: Option<Timestamp>,
}

impl RetrievalOrchestrator {
    pub fn new(store: SqliteStore, provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            store,
            provider,
            fixed_now: None,
        }
    }

    /// Evaluate pin expiry against `now` instead of the wall clock.
    pub fn with_now(mut self, now: Timestamp) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult> {
        let now = self.fixed_now.unwrap_or_else(now_millis);

        let pins = self.resolve_pins(&request.scope, request.include_redacted, now).await?;
        let current_summary = self
            .current_summary(&request.scope)
            .await?
            .filter(|summary| !pins.iter().any(|p| p.target.id() == summary.id));

        let reserved: Vec<String> = pins
            .iter()
            .map(|p| p.target.id().to_string())
            .chain(current_summary.iter().map(|s| s.id.clone()))
            .collect();

        let search = SearchRequest {
            query: request.query.clone(),
            scope: request.scope.clone(),
            max_results: request.max_candidates,
            exclude_ids: reserved,
            include_redacted: request.include_redacted,
        };
        let response = match self.provider.search(&search).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    provider = self.provider.name(),
                    error = %err,
                    "search provider failed; continuing without candidates"
                );
                SearchResponse::default()
            }
        };
        let SearchResponse {
            hits,
            total_candidates,
        } = response;
        let provider_returned = hits.len();

        let tier0_tokens = pins
            .iter()
            .map(|p| estimate_tokens(p.target.content()))
            .chain(current_summary.iter().map(|s| estimate_tokens(&s.content)))
            .sum();
        let packed = tiering::pack(tier0_tokens, hits, request.token_budget);
        if packed.tier0_over_budget {
            tracing::debug!(
                tier0_tokens,
                budget = ?request.token_budget,
                "pinned context exceeds token budget"
            );
        }

        let provenance = RetrievalProvenance {
            query: request.query.clone(),
            scope: request.scope.clone(),
            total_candidates,
            returned_candidates: packed.candidates.len(),
            truncated: total_candidates > provider_returned || packed.dropped > 0,
            tier0_over_budget: packed.tier0_over_budget,
            provider: self.provider.name().to_string(),
            tokens_used: packed.tokens_used,
        };
        tracing::debug!(
            pins = pins.len(),
            has_summary = current_summary.is_some(),
            candidates = provenance.returned_candidates,
            tokens = provenance.tokens_used,
            "retrieval assembled"
        );

        Ok(RetrievalResult {
            pins,
            current_summary,
            candidates: packed.candidates,
            provenance,
        })
    }

    async fn resolve_pins(
        &self,
        scope: &Scope,
        include_redacted: bool,
        now: Timestamp,
    ) -> Result<Vec<PinnedItem>> {
        let mut resolved = Vec::new();
        for pin in self.store.list_active_pins(Some(scope), now).await? {
            let target = match pin.target_type {
                PinTargetType::Observation => self
                    .store
                    .get_observation_by_id(&pin.target_id)
                    .await?
                    .map(MemoryItem::Observation),
                PinTargetType::Summary => self
                    .store
                    .get_summary_by_id(&pin.target_id)
                    .await?
                    .map(MemoryItem::Summary),
            };
            match target {
                Some(target) if include_redacted || !target.is_redacted() => {
                    if resolved
                        .iter()
                        .all(|p: &PinnedItem| p.target.id() != target.id())
                    {
                        resolved.push(PinnedItem { pin, target });
                    }
                }
                Some(_) => {
                    tracing::debug!(pin = %pin.id, target = %pin.target_id, "pinned target is redacted");
                }
                None => {
                    tracing::debug!(pin = %pin.id, target = %pin.target_id, "pinned target no longer exists");
                }
            }
        }
        Ok(resolved)
    }

    async fn current_summary(&self, scope: &Scope) -> Result<Option<Summary>> {
        let Some(session_id) = scope.session_id.as_deref() else {
            return Ok(None);
        };
        match self.store.get_open_capsule_for_session(session_id).await? {
            Some(capsule) => self.store.get_latest_summary_for_capsule(&capsule.id).await,
            None => Ok(None),
        }
    }
}
