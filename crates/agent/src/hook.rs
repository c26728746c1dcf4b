//! Tick hooks - observe (and possibly abort) a tick between stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use edflow_core::{Event, TickStage};

use crate::context::SimulationContext;

/// What a hook wants the tick to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    /// Run the next stage
    Continue,
    /// Roll the tick back
    Abort(String),
}

/// Called after every stage with the working copy of the state and the
/// events the tick has produced so far.
///
/// Nothing a hook sees is committed yet. Aborting discards both.
pub trait TickHook: Send + Sync {
    /// Inspect the tick after `stage`.
    fn after_stage(&self, stage: TickStage, ctx: &SimulationContext, pending: &[Event]) -> HookAction;
}

/// Cooperative stop request, shared between the caller and the agent.
///
/// As a hook it aborts the tick in flight, so a run stops on a tick boundary.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Create a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl TickHook for StopFlag {
    fn after_stage(&self, _stage: TickStage, _ctx: &SimulationContext, _pending: &[Event]) -> HookAction {
        if self.is_stopped() {
            HookAction::Abort("stop requested".to_string())
        } else {
            HookAction::Continue
        }
    }
}
