//! Shared plumbing for the tick stages.

use edflow_core::{Event, EventKind, PatientId, TickStage, Time};
use edflow_retrieval::{QueryContext, RetrievalEngine, ScoredRule};
use tracing::debug;

use crate::config::AgentConfig;

/// Read-only inputs of a stage.
pub(crate) struct StageEnv<'a> {
    pub config: &'a AgentConfig,
    pub engine: &'a RetrievalEngine,
}

impl StageEnv<'_> {
    /// Retrieve for `query`, recording a fallback event if the engine degraded.
    pub async fn retrieve(
        &self,
        query: &QueryContext<'_>,
        stage: TickStage,
        patient: &PatientId,
        pending: &mut Pending,
    ) -> Vec<ScoredRule> {
        let outcome = self.engine.retrieve(query, self.config.retrieval_k).await;
        if let Some(error) = outcome.degraded {
            pending.system(EventKind::RetrievalFallback {
                stage,
                patient: Some(patient.clone()),
                reason: error.to_string(),
            });
        }
        outcome.hits
    }
}

/// Events produced by a tick that is still in progress.
#[derive(Debug)]
pub(crate) struct Pending {
    now: Time,
    events: Vec<Event>,
}

impl Pending {
    pub(crate) fn new(now: Time) -> Self {
        Self { now, events: Vec::new() }
    }

    /// Record an agent decision.
    pub(crate) fn agent(&mut self, kind: EventKind) {
        debug!("{}: {:?}", kind.name(), kind.patient());
        self.events.push(Event::agent(self.now, kind));
    }

    /// Record a mechanical transition.
    pub(crate) fn system(&mut self, kind: EventKind) {
        debug!("{}: {:?}", kind.name(), kind.patient());
        self.events.push(Event::system(self.now, kind));
    }

    /// Events so far, in emission order.
    pub(crate) fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn into_events(self) -> Vec<Event> {
        self.events
    }
}
