//! Trigger conditions and their interpreter.
//!
//! Conditions are a closed tagged variant deserialized from the rule file and
//! evaluated against a patient (and optionally the room it holds). Nothing in
//! a rule file is executable code.

use edflow_core::{Patient, Room, TriageClass, VitalSign};
use serde::{Deserialize, Serialize};

const FLOAT_EPSILON: f64 = 1e-9;

/// Numeric fact a threshold can compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// Heart rate
    HeartRate,
    /// Systolic blood pressure
    SystolicBp,
    /// Respiratory rate
    RespiratoryRate,
    /// Oxygen saturation
    OxygenSaturation,
    /// Temperature
    Temperature,
    /// Pain score
    PainScore,
    /// Glasgow coma scale
    Consciousness,
    /// Early-warning severity score
    SeverityScore,
    /// Minutes since arrival
    WaitMinutes,
    /// Current triage class rank (0 = minor .. 3 = critical)
    TriageRank,
    /// Occupants of the patient's room
    RoomOccupancy,
}

/// Comparison operator for thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    /// Greater than
    #[serde(rename = ">")]
    Gt,
    /// Greater than or equal
    #[serde(rename = ">=")]
    Ge,
    /// Less than
    #[serde(rename = "<")]
    Lt,
    /// Less than or equal
    #[serde(rename = "<=")]
    Le,
    /// Equal (epsilon tolerant)
    #[serde(rename = "==")]
    Eq,
    /// Not equal
    #[serde(rename = "!=")]
    Ne,
}

impl Comparison {
    /// Apply the operator.
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => (left - right).abs() < FLOAT_EPSILON,
            Self::Ne => (left - right).abs() >= FLOAT_EPSILON,
        }
    }

    /// Whether the operator bounds the attribute from below.
    fn is_lower_bound(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Eq)
    }
}

/// Whose capability tags a capability condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySubject {
    /// Capabilities of the room the patient holds
    Room,
    /// Capabilities the patient requires
    Patient,
}

/// Set-membership mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetMatch {
    /// At least one tag present
    #[default]
    Any,
    /// Every tag present
    All,
}

/// A structured trigger predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a numeric attribute against a constant
    Threshold {
        attribute: Attribute,
        op: Comparison,
        value: f64,
    },

    /// Capability-set membership
    Capability {
        subject: CapabilitySubject,
        tags: Vec<String>,
        #[serde(default)]
        mode: SetMatch,
    },

    /// Current triage class is at least `class`
    TriageAtLeast { class: TriageClass },

    /// Every child holds
    All { conditions: Vec<Condition> },

    /// At least one child holds
    Any { conditions: Vec<Condition> },

    /// Child does not hold
    Not { condition: Box<Condition> },
}

/// Facts a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The patient
    pub patient: &'a Patient,
    /// The room the patient holds, if any
    pub room: Option<&'a Room>,
}

impl<'a> EvalContext<'a> {
    /// Context for a patient without a room.
    pub fn patient(patient: &'a Patient) -> Self {
        Self { patient, room: None }
    }

    /// Context for a patient in a room.
    pub fn with_room(patient: &'a Patient, room: Option<&'a Room>) -> Self {
        Self { patient, room }
    }

    /// Look up a numeric attribute; `None` when the fact is unknown.
    pub fn attribute(&self, attribute: Attribute) -> Option<f64> {
        let vitals = &self.patient.vitals;
        let value = match attribute {
            Attribute::HeartRate => vitals.get(VitalSign::HeartRate),
            Attribute::SystolicBp => vitals.get(VitalSign::SystolicBp),
            Attribute::RespiratoryRate => vitals.get(VitalSign::RespiratoryRate),
            Attribute::OxygenSaturation => vitals.get(VitalSign::OxygenSaturation),
            Attribute::Temperature => vitals.get(VitalSign::Temperature),
            Attribute::PainScore => vitals.get(VitalSign::PainScore),
            Attribute::Consciousness => vitals.get(VitalSign::Consciousness),
            Attribute::SeverityScore => f64::from(self.patient.severity_score()),
            Attribute::WaitMinutes => self.patient.wait_minutes as f64,
            Attribute::TriageRank => f64::from(self.patient.triage_class?.rank()),
            Attribute::RoomOccupancy => self.room?.occupants.len() as f64,
        };
        Some(value)
    }
}

impl Condition {
    /// Evaluate the predicate. Unknown facts make a leaf false.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Self::Threshold { attribute, op, value } => ctx
                .attribute(*attribute)
                .map_or(false, |actual| op.apply(actual, *value)),
            Self::Capability { subject, tags, mode } => {
                let held = match subject {
                    CapabilitySubject::Room => match ctx.room {
                        Some(room) => &room.capabilities,
                        None => return false,
                    },
                    CapabilitySubject::Patient => &ctx.patient.required_capabilities,
                };
                let mut hits = tags.iter().map(|t| held.contains(&t.to_lowercase()));
                match mode {
                    SetMatch::Any => hits.any(|h| h),
                    SetMatch::All => hits.all(|h| h),
                }
            }
            Self::TriageAtLeast { class } => ctx.patient.triage_class.map_or(false, |c| c >= *class),
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
            Self::Not { condition } => !condition.evaluate(ctx),
        }
    }

    /// Structural validation; returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Threshold { value, .. } => {
                if value.is_finite() {
                    Ok(())
                } else {
                    Err("threshold value must be finite".to_string())
                }
            }
            Self::Capability { tags, .. } => {
                if tags.iter().any(|t| !t.trim().is_empty()) {
                    Ok(())
                } else {
                    Err("capability condition needs at least one tag".to_string())
                }
            }
            Self::TriageAtLeast { .. } => Ok(()),
            Self::All { conditions } | Self::Any { conditions } => {
                if conditions.is_empty() {
                    return Err("composite condition is empty".to_string());
                }
                conditions.iter().try_for_each(Condition::validate)
            }
            Self::Not { condition } => condition.validate(),
        }
    }

    /// Highest lower-bound threshold placed on the severity score, ignoring
    /// negated branches.
    pub fn severity_threshold(&self) -> Option<f64> {
        match self {
            Self::Threshold {
                attribute: Attribute::SeverityScore,
                op,
                value,
            } if op.is_lower_bound() => Some(*value),
            Self::All { conditions } | Self::Any { conditions } => conditions
                .iter()
                .filter_map(Condition::severity_threshold)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v)))),
            _ => None,
        }
    }

    /// Lowercase capability tags mentioned anywhere in the tree.
    pub fn normalize(&mut self) {
        match self {
            Self::Capability { tags, .. } => {
                for tag in tags.iter_mut() {
                    *tag = tag.trim().to_lowercase();
                }
                tags.retain(|t| !t.is_empty());
            }
            Self::All { conditions } | Self::Any { conditions } => {
                conditions.iter_mut().for_each(Condition::normalize)
            }
            Self::Not { condition } => condition.normalize(),
            Self::Threshold { .. } | Self::TriageAtLeast { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edflow_core::{ArrivalDescriptor, PatientId, Vitals};

    fn patient_with(vitals: Vitals) -> Patient {
        Patient::from_arrival(
            ArrivalDescriptor {
                id: PatientId::new("P1"),
                arrival_time: chrono::Utc::now(),
                vitals,
                requested_specialty: Some("cardiology".to_string()),
            },
            0,
        )
    }

    #[test]
    fn test_threshold_deserialize_and_evaluate() {
        let json = r#"{"kind": "threshold", "attribute": "oxygen_saturation", "op": "<", "value": 90}"#;
        let condition: Condition = serde_json::from_str(json).unwrap();

        let hypoxic = patient_with(Vitals { oxygen_saturation: 85.0, ..Vitals::default() });
        let normal = patient_with(Vitals::default());
        assert!(condition.evaluate(&EvalContext::patient(&hypoxic)));
        assert!(!condition.evaluate(&EvalContext::patient(&normal)));
    }

    #[test]
    fn test_composite_and_not() {
        let json = r#"{
            "kind": "all",
            "conditions": [
                {"kind": "threshold", "attribute": "severity_score", "op": ">=", "value": 7},
                {"kind": "not", "condition": {"kind": "capability", "subject": "room", "tags": ["ICU"]}}
            ]
        }"#;
        let mut condition: Condition = serde_json::from_str(json).unwrap();
        condition.normalize();
        assert!(condition.validate().is_ok());
        assert_eq!(condition.severity_threshold(), Some(7.0));

        let severe = patient_with(Vitals {
            heart_rate: 140.0,
            systolic_bp: 85.0,
            respiratory_rate: 28.0,
            ..Vitals::default()
        });
        let general = Room::new("R1", 1).with_capability("general");
        let icu = Room::new("R2", 1).with_capability("icu");

        assert!(condition.evaluate(&EvalContext::with_room(&severe, Some(&general))));
        assert!(!condition.evaluate(&EvalContext::with_room(&severe, Some(&icu))));
    }

    #[test]
    fn test_missing_facts_are_false() {
        let patient = patient_with(Vitals::default());
        let ctx = EvalContext::patient(&patient);

        let occupancy = Condition::Threshold {
            attribute: Attribute::RoomOccupancy,
            op: Comparison::Ge,
            value: 0.0,
        };
        assert!(!occupancy.evaluate(&ctx));
        assert!(!Condition::TriageAtLeast { class: TriageClass::Minor }.evaluate(&ctx));

        let wants_cardio = Condition::Capability {
            subject: CapabilitySubject::Patient,
            tags: vec!["cardiology".to_string()],
            mode: SetMatch::All,
        };
        assert!(wants_cardio.evaluate(&ctx));
    }

    #[test]
    fn test_empty_composite_rejected() {
        let empty = Condition::Any { conditions: vec![] };
        assert!(empty.validate().is_err());

        let nested = Condition::Not { condition: Box::new(Condition::All { conditions: vec![] }) };
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_comparison_operators() {
        assert!(Comparison::Eq.apply(1.0, 1.0));
        assert!(Comparison::Ne.apply(1.0, 1.5));
        assert!(Comparison::Le.apply(2.0, 2.0));
        assert!(!Comparison::Lt.apply(2.0, 2.0));
    }
}
