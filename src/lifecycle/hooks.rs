use super::{CapsuleManager, CloseSignals};
use crate::error::{MemoryError, Result};
use crate::model::{Capsule, CapsuleType, Observation, ObservationDraft, Scope};
use crate::storage::ClosedCapsule;

/// What an adapter-specific event turns into.
#[derive(Debug, Clone)]
pub enum MappedEvent {
    /// Persist this observation against the session's capsule.
    Observation(ObservationDraft),
    /// Lifecycle-only event; nothing to record.
    Skip,
    /// The event could not be mapped, e.g. a required field was missing.
    Error(String),
}

/// Adapter-side translation from a host's event shape to observations.
///
/// The core never inspects `Self::Event`.
pub trait EventMapper: Send + Sync {
    type Event;

    fn map_event(&self, event: &Self::Event) -> MappedEvent;
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub capsule: Capsule,
}

/// Result of [`SessionHooks::on_event`]. Capture never fails the host.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Recorded(Observation),
    Skipped,
    Failed(String),
}

impl EventOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

/// Binds an [`EventMapper`] to a [`CapsuleManager`] so a host integration
/// only has to forward its session start, event and stop callbacks.
pub struct SessionHooks<M> {
    manager: CapsuleManager,
    mapper: M,
}

impl<M: EventMapper> SessionHooks<M> {
    pub fn new(manager: CapsuleManager, mapper: M) -> Self {
        Self { manager, mapper }
    }

    pub fn manager(&self) -> &CapsuleManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut CapsuleManager {
        &mut self.manager
    }

    /// Open (or resume) the session capsule. `scope.session_id` is always
    /// replaced by `session_id`.
    pub async fn on_session_start(
        &mut self,
        session_id: &str,
        scope: Scope,
        intent: Option<&str>,
    ) -> Result<SessionContext> {
        let scope = Scope {
            session_id: Some(session_id.to_string()),
            ..scope
        };
        let default_intent = format!("session {session_id}");
        let capsule = self
            .manager
            .open(
                CapsuleType::Session,
                intent.unwrap_or(&default_intent),
                scope,
            )
            .await?;
        Ok(SessionContext {
            session_id: session_id.to_string(),
            capsule,
        })
    }

    pub async fn on_event(&mut self, session_id: &str, event: &M::Event) -> EventOutcome {
        let draft = match self.mapper.map_event(event) {
            MappedEvent::Observation(draft) => draft,
            MappedEvent::Skip => return EventOutcome::Skipped,
            MappedEvent::Error(reason) => {
                tracing::warn!(session_id, reason = %reason, "event mapping failed");
                return EventOutcome::Failed(reason);
            }
        };

        match self.record(session_id, draft).await {
            Ok(observation) => EventOutcome::Recorded(observation),
            Err(err) => {
                tracing::warn!(session_id, error = %err, "failed to record observation");
                EventOutcome::Failed(err.to_string())
            }
        }
    }

    async fn record(&mut self, session_id: &str, draft: ObservationDraft) -> Result<Observation> {
        let capsule = self
            .manager
            .get_open(&Scope::session(session_id))
            .await?
            .ok_or_else(|| MemoryError::NotFoundOrAlreadyClosed(format!("session {session_id}")))?;
        let draft = ObservationDraft {
            scope: inherit_scope(draft.scope, &capsule.scope),
            ..draft
        };
        self.manager.record_observation(&capsule.id, draft).await
    }

    /// Close the session's open capsule.
    pub async fn on_stop(
        &mut self,
        session_id: &str,
        signals: Option<CloseSignals>,
    ) -> Result<ClosedCapsule> {
        let capsule = self
            .manager
            .get_open(&Scope::session(session_id))
            .await?
            .ok_or_else(|| MemoryError::NotFoundOrAlreadyClosed(format!("session {session_id}")))?;
        self.manager.close(&capsule.id, signals).await
    }
}

/// Dimensions the event left unset come from the capsule.
fn inherit_scope(event: Scope, capsule: &Scope) -> Scope {
    Scope {
        session_id: event.session_id.or_else(|| capsule.session_id.clone()),
        repo_id: event.repo_id.or_else(|| capsule.repo_id.clone()),
        agent_id: event.agent_id.or_else(|| capsule.agent_id.clone()),
        user_id: event.user_id.or_else(|| capsule.user_id.clone()),
    }
}
