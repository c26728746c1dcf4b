//! Patient model - the unit flowing through the department.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::{PatientId, RoomId, RuleId};
use crate::Time;

/// Ordered triage category. `Critical` is the highest priority.
///
/// Variants are declared from least to most severe so the derived
/// ordering reads naturally: `Minor < Standard < Urgent < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageClass {
    /// Can wait or be redirected
    Minor,
    /// Needs care, not time critical
    Standard,
    /// Needs care soon
    Urgent,
    /// Immediate, life threatening
    Critical,
}

impl TriageClass {
    /// All classes, most severe first.
    pub const ALL: [TriageClass; 4] = [
        TriageClass::Critical,
        TriageClass::Urgent,
        TriageClass::Standard,
        TriageClass::Minor,
    ];

    /// Numeric rank, 0 for minor up to 3 for critical.
    pub fn rank(self) -> u8 {
        match self {
            Self::Minor => 0,
            Self::Standard => 1,
            Self::Urgent => 2,
            Self::Critical => 3,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Standard => "standard",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for TriageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minor" => Ok(Self::Minor),
            "standard" => Ok(Self::Standard),
            "urgent" => Ok(Self::Urgent),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown triage class '{}'", other)),
        }
    }
}

/// A single measurable vital sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalSign {
    /// Beats per minute
    HeartRate,
    /// mmHg
    SystolicBp,
    /// Breaths per minute
    RespiratoryRate,
    /// SpO2 percent
    OxygenSaturation,
    /// Degrees Celsius
    Temperature,
    /// Self-reported, 0-10
    PainScore,
    /// Glasgow coma scale, 3-15
    Consciousness,
}

/// Vital-sign vector recorded for a patient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vitals {
    /// Heart rate (bpm)
    pub heart_rate: f64,
    /// Systolic blood pressure (mmHg)
    pub systolic_bp: f64,
    /// Respiratory rate (breaths/min)
    pub respiratory_rate: f64,
    /// Oxygen saturation (%)
    pub oxygen_saturation: f64,
    /// Temperature (°C)
    pub temperature: f64,
    /// Pain score (0-10)
    pub pain_score: f64,
    /// Glasgow coma scale (3-15)
    pub consciousness: f64,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            heart_rate: 75.0,
            systolic_bp: 120.0,
            respiratory_rate: 16.0,
            oxygen_saturation: 98.0,
            temperature: 37.0,
            pain_score: 0.0,
            consciousness: 15.0,
        }
    }
}

impl Vitals {
    /// Read one sign.
    pub fn get(&self, sign: VitalSign) -> f64 {
        match sign {
            VitalSign::HeartRate => self.heart_rate,
            VitalSign::SystolicBp => self.systolic_bp,
            VitalSign::RespiratoryRate => self.respiratory_rate,
            VitalSign::OxygenSaturation => self.oxygen_saturation,
            VitalSign::Temperature => self.temperature,
            VitalSign::PainScore => self.pain_score,
            VitalSign::Consciousness => self.consciousness,
        }
    }

    /// Early-warning severity score: per-sign points summed.
    ///
    /// Zero means all signs are in their normal band. Anything at or above 7
    /// is conventionally an emergency response trigger.
    pub fn severity_score(&self) -> u32 {
        let rr = self.respiratory_rate;
        let respiratory = if rr <= 8.0 {
            3
        } else if rr <= 11.0 {
            1
        } else if rr <= 20.0 {
            0
        } else if rr <= 24.0 {
            2
        } else {
            3
        };

        let spo2 = self.oxygen_saturation;
        let saturation = if spo2 <= 91.0 {
            3
        } else if spo2 <= 93.0 {
            2
        } else if spo2 <= 95.0 {
            1
        } else {
            0
        };

        let bp = self.systolic_bp;
        let pressure = if bp <= 90.0 {
            3
        } else if bp <= 100.0 {
            2
        } else if bp <= 110.0 {
            1
        } else if bp < 220.0 {
            0
        } else {
            3
        };

        let hr = self.heart_rate;
        let pulse = if hr <= 40.0 {
            3
        } else if hr <= 50.0 {
            1
        } else if hr <= 90.0 {
            0
        } else if hr <= 110.0 {
            1
        } else if hr <= 130.0 {
            2
        } else {
            3
        };

        let t = self.temperature;
        let temperature = if t <= 35.0 {
            3
        } else if t <= 36.0 {
            1
        } else if t <= 38.0 {
            0
        } else if t <= 39.0 {
            1
        } else {
            2
        };

        let consciousness = if self.consciousness < 15.0 { 3 } else { 0 };

        respiratory + saturation + pressure + pulse + temperature + consciousness
    }

    /// Clinical keywords derived from abnormal signs, used as retrieval terms.
    pub fn clinical_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.oxygen_saturation < 92.0 {
            flags.push("hypoxia");
        }
        if self.heart_rate > 110.0 {
            flags.push("tachycardia");
        }
        if self.heart_rate < 50.0 {
            flags.push("bradycardia");
        }
        if self.systolic_bp <= 90.0 {
            flags.push("hypotension");
        }
        if self.respiratory_rate > 24.0 {
            flags.push("tachypnea");
        }
        if self.temperature >= 38.5 {
            flags.push("fever");
        }
        if self.temperature <= 35.0 {
            flags.push("hypothermia");
        }
        if self.consciousness < 15.0 {
            flags.push("altered");
            flags.push("consciousness");
        }
        if self.pain_score >= 8.0 {
            flags.push("severe");
            flags.push("pain");
        }
        flags
    }
}

/// Lifecycle status of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    /// Registered, not yet triaged
    Arrived,
    /// Triage class assigned, waiting for a room
    Triaged,
    /// Holds a room, treatment not started
    Allocated,
    /// Being treated in the room
    InTreatment,
    /// Treatment complete, left the department
    Discharged,
    /// Moved to another unit
    Transferred,
    /// No eligible room was found; retried every tick
    Overflowed,
}

impl PatientStatus {
    /// Whether the patient has left the department.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Discharged | Self::Transferred)
    }

    /// Whether the patient still needs a room.
    pub fn awaiting_room(self) -> bool {
        matches!(self, Self::Triaged | Self::Overflowed)
    }

    /// Whether the patient currently holds a room.
    pub fn holds_room(self) -> bool {
        matches!(self, Self::Allocated | Self::InTreatment)
    }
}

/// An arrival as produced by a scenario feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalDescriptor {
    /// Patient identifier
    pub id: PatientId,

    /// When the patient arrived (may be in the past or future of the clock)
    pub arrival_time: Time,

    /// Vitals at arrival
    #[serde(default)]
    pub vitals: Vitals,

    /// Specialty the referral asked for (e.g. "cardiology")
    #[serde(default)]
    pub requested_specialty: Option<String>,
}

/// A patient inside the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    /// Unique identifier
    pub id: PatientId,

    /// Arrival time
    pub arrival_time: Time,

    /// Ingest order, used as the last tie-break
    pub intake_order: u64,

    /// Current vitals
    pub vitals: Vitals,

    /// Vitals changed since the last triage
    pub vitals_dirty: bool,

    /// Requested specialty, if any
    pub requested_specialty: Option<String>,

    /// Capability tags a room must provide
    pub required_capabilities: BTreeSet<String>,

    /// Assigned triage class
    pub triage_class: Option<TriageClass>,

    /// Rule that justified the current class
    pub triage_rule: Option<RuleId>,

    /// Lifecycle status
    pub status: PatientStatus,

    /// Room held, if any
    pub room: Option<RoomId>,

    /// Minutes waited since arrival (refreshed each tick)
    pub wait_minutes: i64,

    /// Wait escalation applied
    pub escalated: bool,

    /// When treatment began
    pub treatment_started: Option<Time>,

    /// Destination unit after a transfer
    pub destination: Option<String>,
}

impl Patient {
    /// Build a patient from an arrival descriptor.
    pub fn from_arrival(arrival: ArrivalDescriptor, intake_order: u64) -> Self {
        let mut required_capabilities = BTreeSet::new();
        if let Some(specialty) = &arrival.requested_specialty {
            required_capabilities.insert(specialty.to_lowercase());
        }

        Self {
            id: arrival.id,
            arrival_time: arrival.arrival_time,
            intake_order,
            vitals: arrival.vitals,
            vitals_dirty: true,
            requested_specialty: arrival.requested_specialty,
            required_capabilities,
            triage_class: None,
            triage_rule: None,
            status: PatientStatus::Arrived,
            room: None,
            wait_minutes: 0,
            escalated: false,
            treatment_started: None,
            destination: None,
        }
    }

    /// Severity score of the current vitals.
    pub fn severity_score(&self) -> u32 {
        self.vitals.severity_score()
    }

    /// Refresh the derived wait time.
    pub fn refresh_wait(&mut self, now: Time) {
        self.wait_minutes = (now - self.arrival_time).num_minutes().max(0);
    }

    /// Effective priority, 1 = served first.
    ///
    /// Critical always comes first; an escalated standard patient comes next,
    /// ahead of urgent ones.
    pub fn effective_priority(&self) -> u8 {
        match self.triage_class {
            Some(TriageClass::Critical) => 1,
            Some(TriageClass::Standard) if self.escalated => 2,
            Some(TriageClass::Urgent) => 3,
            Some(TriageClass::Standard) => 4,
            Some(TriageClass::Minor) => 5,
            None => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triage_class_ordering() {
        assert!(TriageClass::Critical > TriageClass::Urgent);
        assert!(TriageClass::Urgent > TriageClass::Standard);
        assert!(TriageClass::Standard > TriageClass::Minor);
        assert_eq!(TriageClass::Critical.rank(), 3);
        assert_eq!("URGENT".parse::<TriageClass>(), Ok(TriageClass::Urgent));
    }

    #[test]
    fn test_normal_vitals_score_zero() {
        assert_eq!(Vitals::default().severity_score(), 0);
        assert!(Vitals::default().clinical_flags().is_empty());
    }

    #[test]
    fn test_shocked_patient_scores_high() {
        let vitals = Vitals {
            heart_rate: 140.0,
            systolic_bp: 85.0,
            respiratory_rate: 28.0,
            oxygen_saturation: 88.0,
            ..Vitals::default()
        };
        assert_eq!(vitals.severity_score(), 12);
        let flags = vitals.clinical_flags();
        assert!(flags.contains(&"hypoxia"));
        assert!(flags.contains(&"hypotension"));
    }

    #[test]
    fn test_effective_priority_escalation() {
        let arrival = ArrivalDescriptor {
            id: PatientId::new("P1"),
            arrival_time: chrono::Utc::now(),
            vitals: Vitals::default(),
            requested_specialty: Some("Cardiology".to_string()),
        };
        let mut patient = Patient::from_arrival(arrival, 0);
        assert!(patient.required_capabilities.contains("cardiology"));

        patient.triage_class = Some(TriageClass::Standard);
        assert_eq!(patient.effective_priority(), 4);
        patient.escalated = true;
        assert_eq!(patient.effective_priority(), 2);
    }
}
