//! Event model - atoms of the simulation timeline.

use serde::{Deserialize, Serialize};

use crate::facility::StaffRole;
use crate::id::{EventId, PatientId, RoomId, RuleId, StaffId};
use crate::patient::TriageClass;
use crate::Time;

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// The orchestration agent's decisions
    Agent,
    /// Intake, clocks and other mechanical transitions
    System,
}

/// Stage of the tick pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStage {
    /// Arrivals, vitals updates, treatment progress
    Intake,
    /// Triage scoring
    Triage,
    /// Room allocation
    Allocation,
    /// Transfer evaluation
    Transfer,
    /// Staff rebalancing
    Staffing,
}

impl std::fmt::Display for TickStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Intake => "intake",
            Self::Triage => "triage",
            Self::Allocation => "allocation",
            Self::Transfer => "transfer",
            Self::Staffing => "staffing",
        };
        f.write_str(name)
    }
}

/// What happened, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Patient entered the department
    Arrival { patient: PatientId },

    /// Triage class assigned or changed
    TriageDecision {
        patient: PatientId,
        class: TriageClass,
        previous: Option<TriageClass>,
        severity_score: u32,
        rule: Option<RuleId>,
    },

    /// A rule was used to justify a decision
    RuleApplied {
        rule: RuleId,
        patient: PatientId,
        stage: TickStage,
        relevance: f32,
    },

    /// Patient placed in a room
    Allocation {
        patient: PatientId,
        room: RoomId,
        class: TriageClass,
        rules: Vec<RuleId>,
    },

    /// No eligible room for the patient
    Overflow {
        patient: PatientId,
        class: TriageClass,
        required: Vec<String>,
    },

    /// Treatment began in the allocated room
    TreatmentStarted { patient: PatientId, room: RoomId },

    /// Patient moved to another unit
    Transfer {
        patient: PatientId,
        destination: String,
        room: Option<RoomId>,
        rule: RuleId,
    },

    /// Patient left the department
    Discharge {
        patient: PatientId,
        room: Option<RoomId>,
        rule: Option<RuleId>,
    },

    /// Transfer refused because the destination is full
    UnitSaturated {
        patient: PatientId,
        unit: String,
        rule: RuleId,
    },

    /// Standard patient escalated after a long wait
    Escalation { patient: PatientId, wait_minutes: i64 },

    /// Staff member moved into a room
    StaffAssigned { staff: StaffId, room: RoomId },

    /// Staff member left a room
    StaffReleased { staff: StaffId, room: RoomId },

    /// Occupied room below minimum coverage
    Understaffed {
        room: RoomId,
        assigned: usize,
        required: usize,
    },

    /// Semantic retrieval failed and keyword ranking was used instead
    RetrievalFallback {
        stage: TickStage,
        patient: Option<PatientId>,
        reason: String,
    },

    /// Room capacity changed at runtime
    CapacityChanged {
        room: RoomId,
        previous: usize,
        capacity: usize,
    },

    /// Staff member joined the roster at runtime
    StaffAdded { staff: StaffId, role: StaffRole },

    /// Department indicators at the end of a tick
    MetricsSample {
        saturation_rate: f64,
        waiting: usize,
        mean_wait_minutes: f64,
    },
}

impl EventKind {
    /// Short snake_case name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Arrival { .. } => "arrival",
            Self::TriageDecision { .. } => "triage_decision",
            Self::RuleApplied { .. } => "rule_applied",
            Self::Allocation { .. } => "allocation",
            Self::Overflow { .. } => "overflow",
            Self::TreatmentStarted { .. } => "treatment_started",
            Self::Transfer { .. } => "transfer",
            Self::Discharge { .. } => "discharge",
            Self::UnitSaturated { .. } => "unit_saturated",
            Self::Escalation { .. } => "escalation",
            Self::StaffAssigned { .. } => "staff_assigned",
            Self::StaffReleased { .. } => "staff_released",
            Self::Understaffed { .. } => "understaffed",
            Self::RetrievalFallback { .. } => "retrieval_fallback",
            Self::CapacityChanged { .. } => "capacity_changed",
            Self::StaffAdded { .. } => "staff_added",
            Self::MetricsSample { .. } => "metrics_sample",
        }
    }

    /// Patient the event concerns, if any.
    pub fn patient(&self) -> Option<&PatientId> {
        match self {
            Self::Arrival { patient }
            | Self::TriageDecision { patient, .. }
            | Self::RuleApplied { patient, .. }
            | Self::Allocation { patient, .. }
            | Self::Overflow { patient, .. }
            | Self::TreatmentStarted { patient, .. }
            | Self::Transfer { patient, .. }
            | Self::Discharge { patient, .. }
            | Self::UnitSaturated { patient, .. }
            | Self::Escalation { patient, .. } => Some(patient),
            Self::RetrievalFallback { patient, .. } => patient.as_ref(),
            Self::StaffAssigned { .. }
            | Self::StaffReleased { .. }
            | Self::Understaffed { .. }
            | Self::CapacityChanged { .. }
            | Self::StaffAdded { .. }
            | Self::MetricsSample { .. } => None,
        }
    }
}

/// An event is an atomic record of something that happened at a simulated time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: EventId,

    /// Position in the log, assigned on append
    pub sequence: u64,

    /// Simulated time it happened
    pub timestamp: Time,

    /// Who produced it
    pub actor: Actor,

    /// What happened
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Create a new event. The sequence number is assigned by the log.
    pub fn new(timestamp: Time, actor: Actor, kind: EventKind) -> Self {
        Self {
            id: EventId::new(),
            sequence: 0,
            timestamp,
            actor,
            kind,
        }
    }

    /// Event raised by the agent.
    pub fn agent(timestamp: Time, kind: EventKind) -> Self {
        Self::new(timestamp, Actor::Agent, kind)
    }

    /// Event raised by the system.
    pub fn system(timestamp: Time, kind: EventKind) -> Self {
        Self::new(timestamp, Actor::System, kind)
    }

    /// Ordering key: timestamp, then sequence.
    pub fn order_key(&self) -> (Time, u64) {
        (self.timestamp, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = Event::agent(
            chrono::Utc::now(),
            EventKind::Overflow {
                patient: PatientId::new("P7"),
                class: TriageClass::Critical,
                required: vec!["resuscitation".to_string()],
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "overflow");
        assert_eq!(json["patient"], "P7");
        assert_eq!(json["class"], "critical");
        assert_eq!(json["actor"], "agent");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_patient_accessor() {
        let now = chrono::Utc::now();
        let arrival = Event::system(now, EventKind::Arrival { patient: PatientId::new("P1") });
        assert_eq!(arrival.kind.patient().map(|p| p.as_str()), Some("P1"));
        assert_eq!(arrival.kind.name(), "arrival");

        let gap = Event::agent(
            now,
            EventKind::Understaffed { room: RoomId::new("R1"), assigned: 0, required: 1 },
        );
        assert!(gap.kind.patient().is_none());
    }
}
