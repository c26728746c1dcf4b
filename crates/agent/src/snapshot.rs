//! Read-only views of the simulation for renderers.

use edflow_core::{PatientId, PatientStatus, Room, Staff, Time, TransferUnit, TriageClass};
use serde::{Deserialize, Serialize};

use crate::context::SimulationContext;

/// Department-level indicators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Occupied beds as a percentage of total bed capacity
    pub saturation_rate: f64,
    /// Patients waiting for a room
    pub waiting: usize,
    /// Patients waiting with no eligible room
    pub overflowed: usize,
    /// Patients in a room, not yet treated
    pub allocated: usize,
    /// Patients being treated
    pub in_treatment: usize,
    /// Patients transferred out
    pub transferred: usize,
    /// Patients discharged
    pub discharged: usize,
    /// Mean wait of waiting patients, minutes
    pub mean_wait_minutes: f64,
    /// Longest wait of waiting patients, minutes
    pub max_wait_minutes: i64,
}

impl Metrics {
    /// Compute from a context.
    pub fn compute(ctx: &SimulationContext) -> Self {
        let capacity: usize = ctx.rooms.iter().map(|r| r.max_capacity).sum();
        let occupied: usize = ctx.rooms.iter().map(|r| r.occupants.len()).sum();

        let waits: Vec<i64> = ctx
            .patients
            .values()
            .filter(|p| !p.status.holds_room())
            .map(|p| p.wait_minutes)
            .collect();
        let count = |status: PatientStatus| ctx.patients.values().filter(|p| p.status == status).count();
        let archived = |status: PatientStatus| ctx.archived.iter().filter(|p| p.status == status).count();

        Self {
            saturation_rate: if capacity == 0 {
                0.0
            } else {
                occupied as f64 * 100.0 / capacity as f64
            },
            waiting: waits.len(),
            overflowed: count(PatientStatus::Overflowed),
            allocated: count(PatientStatus::Allocated),
            in_treatment: count(PatientStatus::InTreatment),
            transferred: archived(PatientStatus::Transferred),
            discharged: archived(PatientStatus::Discharged),
            mean_wait_minutes: if waits.is_empty() {
                0.0
            } else {
                waits.iter().sum::<i64>() as f64 / waits.len() as f64
            },
            max_wait_minutes: waits.iter().copied().max().unwrap_or(0),
        }
    }
}

/// A patient waiting for a room, as shown in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Patient
    pub patient: PatientId,
    /// Triage class, if triaged
    pub class: Option<TriageClass>,
    /// Status
    pub status: PatientStatus,
    /// Effective priority, 1 = served first
    pub effective_priority: u8,
    /// Minutes waited
    pub wait_minutes: i64,
    /// Escalated after a long wait
    pub escalated: bool,
    /// Capabilities a room must provide
    pub required: Vec<String>,
}

/// Serializable picture of the department at the end of a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulated time
    pub clock: Time,
    /// Ticks completed
    pub tick: u64,
    /// Rooms and their occupants
    pub rooms: Vec<Room>,
    /// Staff and their assignments
    pub staff: Vec<Staff>,
    /// Waiting patients in service order
    pub queue: Vec<QueueEntry>,
    /// Downstream units
    pub units: Vec<TransferUnit>,
    /// Indicators
    pub metrics: Metrics,
}

impl Snapshot {
    /// Build from a context.
    pub fn capture(ctx: &SimulationContext) -> Self {
        let queue = ctx
            .service_order(|p| !p.status.holds_room())
            .into_iter()
            .filter_map(|id| ctx.patients.get(&id))
            .map(|p| QueueEntry {
                patient: p.id.clone(),
                class: p.triage_class,
                status: p.status,
                effective_priority: p.effective_priority(),
                wait_minutes: p.wait_minutes,
                escalated: p.escalated,
                required: p.required_capabilities.iter().cloned().collect(),
            })
            .collect();

        Self {
            clock: ctx.clock,
            tick: ctx.tick,
            rooms: ctx.rooms.clone(),
            staff: ctx.staff.clone(),
            queue,
            units: ctx.units.clone(),
            metrics: Metrics::compute(ctx),
        }
    }
}
