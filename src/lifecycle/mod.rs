pub mod hooks;

pub use hooks::{EventMapper, EventOutcome, MappedEvent, SessionContext, SessionHooks};

use crate::error::{MemoryError, Result};
use crate::model::{
    Capsule, CapsuleDraft, CapsuleType, Observation, ObservationDraft, Scope, SummaryDraft,
    now_millis,
};
use crate::storage::{ClosedCapsule, SqliteStore};
use std::collections::HashMap;

/// Optional close-time inputs. A summary is written only when
/// `summary_content` is set.
#[derive(Debug, Clone, Default)]
pub struct CloseSignals {
    pub summary_content: Option<String>,
    pub summary_confidence: Option<f64>,
    /// Defaults to the capsule's observation ids.
    pub evidence_refs: Option<Vec<String>>,
}

impl CloseSignals {
    pub fn summary(content: impl Into<String>) -> Self {
        Self {
            summary_content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.summary_confidence = Some(confidence);
        self
    }
}

#[derive(Debug, Clone)]
struct CachedCapsule {
    capsule: Capsule,
    event_count: usize,
}

/// Open -> Closed state machine over capsules, with a write-through cache of
/// the capsules this process has open.
///
/// The store stays authoritative: cache misses and process start consult it,
/// and an open capsule left behind by a dead process is adopted rather than
/// duplicated.
pub struct CapsuleManager {
    store: SqliteStore,
    cache: HashMap<String, CachedCapsule>,
    sessions: HashMap<String, String>,
}

impl CapsuleManager {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    fn adopt(&mut self, capsule: Capsule) -> Capsule {
        let event_count = capsule.observation_ids.len();
        if capsule.capsule_type == CapsuleType::Session {
            if let Some(session_id) = capsule.scope.session_id.clone() {
                self.sessions.insert(session_id, capsule.id.clone());
            }
        }
        self.cache.insert(
            capsule.id.clone(),
            CachedCapsule {
                capsule: capsule.clone(),
                event_count,
            },
        );
        capsule
    }

    /// The store's open capsule for `session_id`, with the cache brought in
    /// line. A cached capsule the store no longer has open is evicted.
    async fn sync_session(&mut self, session_id: &str) -> Result<Option<Capsule>> {
        let stored = self.store.get_open_capsule_for_session(session_id).await?;
        let stale = self
            .sessions
            .get(session_id)
            .filter(|cached| stored.as_ref().is_none_or(|capsule| &capsule.id != *cached))
            .cloned();
        if let Some(stale) = stale {
            tracing::info!(id = %stale, session_id, "dropping cached capsule closed elsewhere");
            self.evict(&stale);
        }

        let Some(capsule) = stored else {
            return Ok(None);
        };
        if !self.cache.contains_key(&capsule.id) {
            tracing::info!(
                id = %capsule.id,
                session_id,
                events = capsule.observation_ids.len(),
                "adopting open capsule left by another manager"
            );
        }
        Ok(Some(self.adopt(capsule)))
    }

    /// Evict `id` when the store says it is gone or closed.
    async fn evict_if_closed(&mut self, id: &str) -> Result<()> {
        if !self.cache.contains_key(id) {
            return Ok(());
        }
        let open = self
            .store
            .get_capsule_by_id(id)
            .await?
            .is_some_and(|capsule| capsule.is_open());
        if !open {
            tracing::info!(id, "dropping cached capsule closed elsewhere");
            self.evict(id);
        }
        Ok(())
    }

    /// Open a capsule, or return the one already open for the session.
    ///
    /// The store decides which session capsule is open; the cache only
    /// mirrors it. Workflow-node capsules always get a fresh id.
    pub async fn open(
        &mut self,
        capsule_type: CapsuleType,
        intent: &str,
        scope: Scope,
    ) -> Result<Capsule> {
        let session_id = match capsule_type {
            CapsuleType::Session => scope.session_id.clone(),
            CapsuleType::WorkflowNode => None,
        };
        if let Some(session_id) = session_id.as_deref() {
            if let Some(capsule) = self.sync_session(session_id).await? {
                return Ok(capsule);
            }
        }

        let capsule = match self
            .store
            .create_capsule(CapsuleDraft::new(capsule_type, intent, scope))
            .await
        {
            Ok(capsule) => capsule,
            Err(MemoryError::Conflict(reason)) => {
                // Another writer opened the session between lookup and insert.
                let Some(session_id) = session_id.as_deref() else {
                    return Err(MemoryError::Conflict(reason));
                };
                tracing::debug!(session_id, %reason, "lost open race; adopting winner");
                return self
                    .sync_session(session_id)
                    .await?
                    .ok_or(MemoryError::Conflict(reason));
            }
            Err(err) => return Err(err),
        };
        tracing::info!(id = %capsule.id, capsule_type = %capsule.capsule_type, "capsule opened");
        Ok(self.adopt(capsule))
    }

    /// Close an open capsule, writing a summary when `signals` carries one.
    ///
    /// Without explicit `evidence_refs` the summary cites every observation
    /// attached to the capsule when it closes.
    pub async fn close(&mut self, id: &str, signals: Option<CloseSignals>) -> Result<ClosedCapsule> {
        let closed_at = now_millis();
        let summary = signals.and_then(|signals| {
            Some(SummaryDraft {
                id: None,
                capsule_id: id.to_string(),
                content: signals.summary_content?,
                confidence: signals.summary_confidence,
                created_at: Some(closed_at),
                evidence_refs: signals.evidence_refs,
            })
        });

        let closed = self.store.close_capsule_with_summary(id, closed_at, summary).await;
        if matches!(closed, Ok(_) | Err(MemoryError::NotFoundOrAlreadyClosed(_))) {
            self.evict(id);
        }
        closed
    }

    fn evict(&mut self, id: &str) {
        let Some(cached) = self.cache.remove(id) else {
            return;
        };
        if let Some(session_id) = cached.capsule.scope.session_id {
            if self.sessions.get(&session_id).is_some_and(|mapped| mapped == id) {
                self.sessions.remove(&session_id);
            }
        }
    }

    /// Cache first, then the store.
    pub async fn get(&self, id: &str) -> Result<Option<Capsule>> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(Some(cached.capsule.clone()));
        }
        self.store.get_capsule_by_id(id).await
    }

    /// The open session capsule for `scope.session_id`.
    ///
    /// Only session-keyed lookups exist; any other dimension is rejected.
    pub async fn get_open(&mut self, scope: &Scope) -> Result<Option<Capsule>> {
        if scope.repo_id.is_some() || scope.agent_id.is_some() || scope.user_id.is_some() {
            return Err(MemoryError::UnsupportedScope(
                "open capsules are tracked per sessionId only".to_string(),
            ));
        }
        let Some(session_id) = scope.session_id.as_deref() else {
            return Err(MemoryError::UnsupportedScope(
                "sessionId is required to look up an open capsule".to_string(),
            ));
        };

        self.sync_session(session_id).await
    }

    /// Persist an observation and append it to an open capsule.
    pub async fn record_observation(
        &mut self,
        capsule_id: &str,
        draft: ObservationDraft,
    ) -> Result<Observation> {
        let observation = match self.store.record_observation(capsule_id, draft).await {
            Ok(observation) => observation,
            Err(err @ (MemoryError::Conflict(_) | MemoryError::NotFound { .. })) => {
                self.evict_if_closed(capsule_id).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        if let Some(cached) = self.cache.get_mut(capsule_id) {
            cached.event_count += 1;
            cached.capsule.observation_ids.push(observation.id.clone());
        }
        Ok(observation)
    }

    /// Observations recorded against a cached capsule, including those
    /// recorded before adoption.
    pub fn event_count(&self, id: &str) -> Option<usize> {
        self.cache.get(id).map(|cached| cached.event_count)
    }

    /// Load every open capsule from the store into the cache.
    pub async fn recover_open_capsules(&mut self) -> Result<usize> {
        let open = self.store.list_open_capsules().await?;
        let mut adopted = 0;
        for capsule in open {
            if !self.cache.contains_key(&capsule.id) {
                self.adopt(capsule);
                adopted += 1;
            }
        }
        if adopted > 0 {
            tracing::info!(adopted, "recovered open capsules");
        }
        Ok(adopted)
    }

    pub fn open_capsules(&self) -> impl Iterator<Item = &Capsule> {
        self.cache.values().map(|cached| &cached.capsule)
    }
}
