//! The orchestration agent - runs the tick pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use edflow_core::{ArrivalDescriptor, Event, EventKind, EventLog, PatientId, RoomId, Staff, TickStage, Time, Vitals};
use edflow_retrieval::{RetrievalEngine, RetrievalMode};
use edflow_rules::RuleStore;
use edflow_storage::EventStore;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::context::SimulationContext;
use crate::error::AgentError;
use crate::hook::{HookAction, StopFlag, TickHook};
use crate::snapshot::{Metrics, Snapshot};
use crate::stage::{Pending, StageEnv};
use crate::{allocation, intake, staffing, transfer, triage};

/// Summary of one committed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Simulated time of the tick
    pub clock: Time,
    /// Events committed
    pub events: usize,
    /// Patients admitted
    pub arrivals: usize,
    /// Room allocations
    pub allocations: usize,
    /// New overflows
    pub overflows: usize,
    /// Transfers out
    pub transfers: usize,
    /// Discharges
    pub discharges: usize,
    /// Retrieval calls served by the fallback
    pub fallbacks: usize,
    /// Rooms left below coverage
    pub understaffed: usize,
}

impl TickReport {
    fn new(tick: u64, clock: Time, events: &[Event]) -> Self {
        let count = |name: &str| events.iter().filter(|e| e.kind.name() == name).count();
        Self {
            tick,
            clock,
            events: events.len(),
            arrivals: count("arrival"),
            allocations: count("allocation"),
            overflows: count("overflow"),
            transfers: count("transfer"),
            discharges: count("discharge"),
            fallbacks: count("retrieval_fallback"),
            understaffed: count("understaffed"),
        }
    }
}

/// The orchestration agent.
///
/// Each tick advances the clock and runs:
/// ```text
/// Intake → Triage → Allocation → Transfer → Staffing → verify → commit
/// ```
/// The stages work on a copy of the state and buffer their events; the copy
/// and the events are committed together, or not at all.
pub struct Agent {
    config: AgentConfig,
    engine: RetrievalEngine,
    ctx: SimulationContext,
    log: EventLog,
    hooks: Vec<Box<dyn TickHook>>,
    store: Option<Box<dyn EventStore>>,
}

impl Agent {
    /// Create an agent for a facility.
    pub fn new(config: AgentConfig, engine: RetrievalEngine) -> Result<Self, AgentError> {
        let config = config.validated()?;
        info!(
            "Agent ready: {} rooms, {} staff, {} rules ({} retrieval)",
            config.rooms.len(),
            config.staff.len(),
            engine.store().len(),
            engine.mode()
        );
        Ok(Self {
            ctx: SimulationContext::new(&config),
            config,
            engine,
            log: EventLog::new(),
            hooks: Vec::new(),
            store: None,
        })
    }

    /// Add a tick hook.
    pub fn with_hook(mut self, hook: impl TickHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Mirror committed events to a store.
    pub fn with_event_store(mut self, store: impl EventStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Queue arrivals for the next ticks.
    ///
    /// The whole batch is rejected if any id is already known.
    pub fn ingest(&mut self, arrivals: impl IntoIterator<Item = ArrivalDescriptor>) -> Result<usize, AgentError> {
        let arrivals: Vec<ArrivalDescriptor> = arrivals.into_iter().collect();
        let mut batch = BTreeSet::new();
        for arrival in &arrivals {
            if self.ctx.knows(&arrival.id) || !batch.insert(arrival.id.clone()) {
                return Err(AgentError::DuplicatePatient(arrival.id.clone()));
            }
        }

        let count = arrivals.len();
        for arrival in arrivals {
            self.ctx.enqueue(arrival);
        }
        debug!("Queued {} arrivals", count);
        Ok(count)
    }

    /// Queue a vitals update, applied at the next tick.
    pub fn update_vitals(&mut self, id: &PatientId, vitals: Vitals) -> Result<(), AgentError> {
        let present = self.ctx.patients.contains_key(id) || self.ctx.arrivals.iter().any(|q| &q.arrival.id == id);
        if !present {
            return Err(AgentError::UnknownPatient(id.clone()));
        }
        self.ctx.vitals_updates.push((id.clone(), vitals));
        Ok(())
    }

    /// Queue a room capacity change, applied at the next tick.
    ///
    /// Capacity may not drop to zero or below the room's current occupancy.
    pub fn update_room_capacity(&mut self, room: &RoomId, capacity: usize) -> Result<(), AgentError> {
        let occupancy = self
            .ctx
            .room(room)
            .map(|r| r.occupants.len())
            .ok_or_else(|| AgentError::UnknownRoom(room.clone()))?;
        if capacity == 0 || capacity < occupancy {
            return Err(AgentError::CapacityBelowOccupancy {
                room: room.clone(),
                capacity,
                occupancy,
            });
        }
        self.ctx.capacity_updates.push((room.clone(), capacity));
        Ok(())
    }

    /// Queue a staff member joining the roster at the next tick.
    pub fn add_staff(&mut self, staff: Staff) -> Result<(), AgentError> {
        if self.ctx.knows_staff(&staff.id) {
            return Err(AgentError::DuplicateStaff(staff.id));
        }
        if let Some(room) = staff.assignment.as_ref() {
            debug!("Ignoring assignment of new staff {} to {}", staff.id, room);
        }
        self.ctx.staff_arrivals.push(staff);
        Ok(())
    }

    /// Run one tick.
    ///
    /// On error nothing is committed: state and log are as before the call.
    pub async fn tick(&mut self) -> Result<TickReport, AgentError> {
        let mut work = self.ctx.clone();
        work.clock = work.clock + self.config.tick_duration();
        work.tick += 1;
        debug!("Tick {} at {}", work.tick, work.clock);

        let mut pending = Pending::new(work.clock);
        let env = StageEnv {
            config: &self.config,
            engine: &self.engine,
        };

        intake::run(&mut work, &self.config, &mut pending);
        self.after(TickStage::Intake, &work, &pending)?;

        triage::run(&mut work, &env, &mut pending).await;
        self.after(TickStage::Triage, &work, &pending)?;

        allocation::run(&mut work, &env, &mut pending).await;
        self.after(TickStage::Allocation, &work, &pending)?;

        transfer::run(&mut work, &env, &mut pending).await;
        self.after(TickStage::Transfer, &work, &pending)?;

        staffing::run(&mut work, &mut pending);
        let metrics = Metrics::compute(&work);
        pending.system(EventKind::MetricsSample {
            saturation_rate: one_decimal(metrics.saturation_rate),
            waiting: metrics.waiting,
            mean_wait_minutes: one_decimal(metrics.mean_wait_minutes),
        });
        self.after(TickStage::Staffing, &work, &pending)?;

        work.verify().map_err(|reason| {
            error!("Tick {} rejected: {}", work.tick, reason);
            AgentError::InvariantViolation(reason)
        })?;

        let events = pending.into_events();
        let report = TickReport::new(work.tick, work.clock, &events);
        let committed_after = self.log.last_sequence();
        self.ctx = work;
        self.log.extend(events);
        self.mirror(committed_after).await;

        info!(
            "Tick {} committed: {} events, {} allocations, {} overflows",
            report.tick, report.events, report.allocations, report.overflows
        );
        Ok(report)
    }

    /// Run up to `ticks` ticks, stopping early once `stop` is set.
    pub async fn run(&mut self, ticks: usize, stop: &StopFlag) -> Result<Vec<TickReport>, AgentError> {
        let mut reports = Vec::with_capacity(ticks);
        for _ in 0..ticks {
            if stop.is_stopped() {
                info!("Stop requested, halting after tick {}", self.ctx.tick);
                break;
            }
            match self.tick().await {
                Ok(report) => reports.push(report),
                Err(AgentError::TickAborted { .. }) if stop.is_stopped() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    fn after(&self, stage: TickStage, ctx: &SimulationContext, pending: &Pending) -> Result<(), AgentError> {
        for hook in &self.hooks {
            if let HookAction::Abort(reason) = hook.after_stage(stage, ctx, pending.events()) {
                warn!("Tick {} aborted after {}: {}", ctx.tick, stage, reason);
                return Err(AgentError::TickAborted { stage, reason });
            }
        }
        Ok(())
    }

    async fn mirror(&mut self, committed_after: u64) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let batch: Vec<Event> = self
            .log
            .iter()
            .filter(|e| e.sequence > committed_after)
            .cloned()
            .collect();
        if let Err(e) = store.append_batch(&batch).await {
            error!("Failed to persist {} events: {}", batch.len(), e);
        }
    }

    /// Serializable view of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.ctx)
    }

    /// Committed events.
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Committed state.
    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    /// Rule store in use.
    pub fn rules(&self) -> &Arc<RuleStore> {
        self.engine.store()
    }

    /// Retrieval mode chosen at construction.
    pub fn retrieval_mode(&self) -> RetrievalMode {
        self.engine.mode()
    }

    /// Facility configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

fn one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
