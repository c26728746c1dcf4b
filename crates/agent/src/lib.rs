//! Orchestration agent for emergency department patient flow.
//!
//! The [`Agent`] owns the department state and advances it tick by tick,
//! asking the retrieval engine for protocols at each decision point and
//! recording every decision in the event log.

#![warn(missing_docs)]

pub mod allocation;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod hook;
mod intake;
pub mod snapshot;
mod stage;
mod staffing;
mod transfer;
pub mod triage;

pub use allocation::{best_room, StaffBudget};
pub use config::{AgentConfig, TreatmentMinutes};
pub use context::{QueuedArrival, SimulationContext};
pub use engine::{Agent, TickReport};
pub use error::AgentError;
pub use hook::{HookAction, StopFlag, TickHook};
pub use snapshot::{Metrics, QueueEntry, Snapshot};
pub use triage::{select_rule, verdict, TriageVerdict};
