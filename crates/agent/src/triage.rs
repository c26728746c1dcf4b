//! Triage stage: assign a class from the best matching threshold rule.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use edflow_core::{EventKind, Patient, PatientId, PatientStatus, RuleId, TickStage, TriageClass};
use edflow_retrieval::{QueryContext, ScoredRule};
use edflow_rules::{EvalContext, RuleAction, RuleCategory};

use crate::context::SimulationContext;
use crate::stage::{Pending, StageEnv};

/// Outcome of classifying one patient.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageVerdict {
    /// Assigned class
    pub class: TriageClass,
    /// Rule that decided it, `None` when the default class was used
    pub rule: Option<RuleId>,
    /// Relevance of that rule
    pub relevance: f32,
    /// Capabilities the rule asks for
    pub requires: Vec<String>,
}

/// Pick the winning triage rule among retrieved hits.
///
/// Only rules whose trigger holds are considered. The most acute class wins,
/// then the higher explicit severity threshold, then relevance, then the
/// earlier rule. Relevance decides which rules are candidates, never which
/// band applies.
pub fn select_rule<'a>(hits: &'a [ScoredRule], eval: &EvalContext<'_>) -> Option<&'a ScoredRule> {
    hits.iter()
        .filter(|hit| hit.rule.matches(eval))
        .filter_map(|hit| match hit.rule.action {
            RuleAction::AssignTriage { class, .. } => Some((class, hit)),
            _ => None,
        })
        .min_by(|(ca, a), (cb, b)| {
            cb.cmp(ca)
                .then_with(|| {
                    let ta = a.rule.severity_threshold().unwrap_or(f64::NEG_INFINITY);
                    let tb = b.rule.severity_threshold().unwrap_or(f64::NEG_INFINITY);
                    tb.partial_cmp(&ta).unwrap_or(Ordering::Equal)
                })
                .then_with(|| b.relevance.partial_cmp(&a.relevance).unwrap_or(Ordering::Equal))
                .then(a.position.cmp(&b.position))
        })
        .map(|(_, hit)| hit)
}

/// Verdict for a patient given retrieved hits.
pub fn verdict(hits: &[ScoredRule], eval: &EvalContext<'_>, default_class: TriageClass) -> TriageVerdict {
    select_rule(hits, eval)
        .and_then(|hit| match &hit.rule.action {
            RuleAction::AssignTriage { class, requires } => Some(TriageVerdict {
                class: *class,
                rule: Some(hit.rule.id.clone()),
                relevance: hit.relevance,
                requires: requires.clone(),
            }),
            _ => None,
        })
        .unwrap_or(TriageVerdict {
            class: default_class,
            rule: None,
            relevance: 0.0,
            requires: Vec::new(),
        })
}

fn needs_triage(patient: &Patient) -> bool {
    !patient.status.is_terminal() && (patient.triage_class.is_none() || patient.vitals_dirty)
}

/// Run the triage stage.
pub(crate) async fn run(ctx: &mut SimulationContext, env: &StageEnv<'_>, pending: &mut Pending) {
    for id in ctx.intake_order(needs_triage) {
        let Some(verdict) = classify(ctx, env, &id, pending).await else {
            continue;
        };
        apply(ctx, &id, verdict, pending);
    }
}

async fn classify(
    ctx: &SimulationContext,
    env: &StageEnv<'_>,
    id: &PatientId,
    pending: &mut Pending,
) -> Option<TriageVerdict> {
    let patient = ctx.patients.get(id)?;
    let room = ctx.room_of(patient);

    // Re-scoring looks at the vitals only, not at the previous decision.
    let mut unscored = patient.clone();
    unscored.triage_class = None;
    unscored.required_capabilities = specialty_tags(patient);
    let query = QueryContext::for_category(RuleCategory::Triage).with_patient(&unscored);
    let hits = env.retrieve(&query, TickStage::Triage, id, pending).await;
    Some(verdict(&hits, &EvalContext::with_room(patient, room), env.config.default_class))
}

fn specialty_tags(patient: &Patient) -> BTreeSet<String> {
    patient
        .requested_specialty
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn apply(ctx: &mut SimulationContext, id: &PatientId, verdict: TriageVerdict, pending: &mut Pending) {
    let Some(patient) = ctx.patients.get_mut(id) else {
        return;
    };

    let previous = patient.triage_class;
    patient.triage_class = Some(verdict.class);
    patient.triage_rule = verdict.rule.clone();
    patient.vitals_dirty = false;

    let mut required = specialty_tags(patient);
    required.extend(verdict.requires.iter().cloned());
    patient.required_capabilities = required;

    if patient.status == PatientStatus::Arrived {
        patient.status = PatientStatus::Triaged;
    }

    pending.agent(EventKind::TriageDecision {
        patient: id.clone(),
        class: verdict.class,
        previous,
        severity_score: patient.severity_score(),
        rule: verdict.rule.clone(),
    });
    if let Some(rule) = verdict.rule {
        pending.agent(EventKind::RuleApplied {
            rule,
            patient: id.clone(),
            stage: TickStage::Triage,
            relevance: verdict.relevance,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use edflow_core::{ArrivalDescriptor, Vitals};
    use edflow_retrieval::RetrievalEngine;
    use edflow_rules::RuleStore;
    use proptest::prelude::*;

    const THRESHOLDS: &str = r#"[
        {"id": "band-minor", "category": "triage",
         "trigger": {"kind": "threshold", "attribute": "severity_score", "op": ">=", "value": 0},
         "action": {"type": "assign_triage", "class": "minor"},
         "rationale": "No hypoxia, tachycardia or fever: fast track."},
        {"id": "band-critical", "category": "triage",
         "trigger": {"kind": "threshold", "attribute": "severity_score", "op": ">=", "value": 7},
         "action": {"type": "assign_triage", "class": "critical", "requires": ["resuscitation"]},
         "rationale": "Early warning score of seven or more."},
        {"id": "band-standard", "category": "triage",
         "trigger": {"kind": "threshold", "attribute": "severity_score", "op": ">=", "value": 2},
         "action": {"type": "assign_triage", "class": "standard"},
         "rationale": "Mild tachypnea or hypotension without altered consciousness."},
        {"id": "band-urgent", "category": "triage",
         "trigger": {"kind": "threshold", "attribute": "severity_score", "op": ">=", "value": 4},
         "action": {"type": "assign_triage", "class": "urgent"},
         "rationale": "Fever with tachycardia needs review within the hour."}
    ]"#;

    fn engine() -> RetrievalEngine {
        RetrievalEngine::keyword(Arc::new(RuleStore::from_json_str(THRESHOLDS, "bands").unwrap()))
    }

    fn patient(vitals: Vitals) -> Patient {
        Patient::from_arrival(
            ArrivalDescriptor {
                id: PatientId::new("P1"),
                arrival_time: chrono::Utc::now(),
                vitals,
                requested_specialty: None,
            },
            0,
        )
    }

    async fn classify_vitals(engine: &RetrievalEngine, vitals: Vitals) -> TriageVerdict {
        let p = patient(vitals);
        let query = QueryContext::for_category(RuleCategory::Triage).with_patient(&p);
        let outcome = engine.retrieve(&query, 8).await;
        verdict(&outcome.hits, &EvalContext::patient(&p), TriageClass::Standard)
    }

    #[tokio::test]
    async fn test_highest_matching_threshold_wins_ties() {
        let engine = engine();

        let calm = classify_vitals(&engine, Vitals::default()).await;
        assert_eq!(calm.class, TriageClass::Minor);
        assert_eq!(calm.rule, Some(RuleId::new("band-minor")));

        let shocked = classify_vitals(
            &engine,
            Vitals {
                heart_rate: 140.0,
                systolic_bp: 85.0,
                respiratory_rate: 28.0,
                ..Vitals::default()
            },
        )
        .await;
        assert_eq!(shocked.class, TriageClass::Critical);
        assert_eq!(shocked.requires, vec!["resuscitation".to_string()]);
    }

    #[tokio::test]
    async fn test_flag_words_in_a_lower_band_do_not_win() {
        let engine = engine();
        let hypoxic = Vitals {
            oxygen_saturation: 85.0,
            heart_rate: 140.0,
            systolic_bp: 85.0,
            ..Vitals::default()
        };
        assert!(hypoxic.severity_score() >= 7);

        let verdict = classify_vitals(&engine, hypoxic).await;
        assert_eq!(verdict.class, TriageClass::Critical);
        assert_eq!(verdict.rule, Some(RuleId::new("band-critical")));
    }

    #[test]
    fn test_no_match_uses_default_class() {
        let p = patient(Vitals::default());
        let v = verdict(&[], &EvalContext::patient(&p), TriageClass::Standard);
        assert_eq!(v.class, TriageClass::Standard);
        assert_eq!(v.rule, None);
    }

    fn vitals_strategy() -> impl Strategy<Value = Vitals> {
        (
            30.0f64..180.0,
            60.0f64..230.0,
            4.0f64..40.0,
            75.0f64..100.0,
            33.0f64..41.5,
            0.0f64..10.0,
            3.0f64..15.0,
        )
            .prop_map(|(hr, sbp, rr, spo2, temp, pain, gcs)| Vitals {
                heart_rate: hr,
                systolic_bp: sbp,
                respiratory_rate: rr,
                oxygen_saturation: spo2,
                temperature: temp,
                pain_score: pain,
                consciousness: gcs.round(),
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_triage_is_monotone_in_severity(a in vitals_strategy(), b in vitals_strategy()) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let engine = engine();
            let (low, high) = if a.severity_score() <= b.severity_score() { (a, b) } else { (b, a) };

            let low_class = runtime.block_on(classify_vitals(&engine, low)).class;
            let high_class = runtime.block_on(classify_vitals(&engine, high)).class;
            prop_assert!(low_class <= high_class, "{:?} > {:?}", low_class, high_class);
        }
    }
}
