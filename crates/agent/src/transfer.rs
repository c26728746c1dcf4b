//! Transfer stage: move roomed patients on when a transfer protocol applies.

use edflow_core::{EventKind, PatientId, PatientStatus, RuleId, TickStage};
use edflow_retrieval::{QueryContext, ScoredRule};
use edflow_rules::{EvalContext, RuleAction, RuleCategory};
use tracing::{debug, info};

use crate::context::SimulationContext;
use crate::stage::{Pending, StageEnv};

/// Run the transfer stage.
pub(crate) async fn run(ctx: &mut SimulationContext, env: &StageEnv<'_>, pending: &mut Pending) {
    for id in ctx.service_order(|p| p.status.holds_room()) {
        let Some(hit) = applicable_rule(ctx, env, &id, pending).await else {
            continue;
        };
        match hit.rule.action {
            RuleAction::Transfer { ref unit, .. } => {
                transfer(ctx, &id, unit, hit.rule.id.clone(), hit.relevance, pending)
            }
            RuleAction::Discharge => {
                let room = ctx.archive(&id, PatientStatus::Discharged);
                applied(pending, &id, hit.rule.id.clone(), hit.relevance);
                pending.agent(EventKind::Discharge {
                    patient: id.clone(),
                    room,
                    rule: Some(hit.rule.id.clone()),
                });
            }
            _ => {}
        }
    }
}

/// Top retrieved transfer rule whose trigger holds.
async fn applicable_rule(
    ctx: &SimulationContext,
    env: &StageEnv<'_>,
    id: &PatientId,
    pending: &mut Pending,
) -> Option<ScoredRule> {
    let patient = ctx.patients.get(id)?;
    let room = ctx.room_of(patient);
    let query = QueryContext::for_category(RuleCategory::Transfer)
        .with_patient(patient)
        .with_room(room);
    let hits = env.retrieve(&query, TickStage::Transfer, id, pending).await;

    let eval = EvalContext::with_room(patient, room);
    hits.into_iter().find(|hit| hit.rule.matches(&eval))
}

fn transfer(
    ctx: &mut SimulationContext,
    id: &PatientId,
    unit: &str,
    rule: RuleId,
    relevance: f32,
    pending: &mut Pending,
) {
    if let Some(declared) = ctx.unit_mut(unit) {
        if !declared.accept() {
            debug!("Unit {} is full, {} stays", declared.name, id);
            pending.agent(EventKind::UnitSaturated {
                patient: id.clone(),
                unit: declared.name.clone(),
                rule,
            });
            return;
        }
    }

    if let Some(patient) = ctx.patients.get_mut(id) {
        patient.destination = Some(unit.to_string());
    }
    let room = ctx.archive(id, PatientStatus::Transferred);
    info!("Transferred {} to {}", id, unit);
    applied(pending, id, rule.clone(), relevance);
    pending.agent(EventKind::Transfer {
        patient: id.clone(),
        destination: unit.to_string(),
        room,
        rule,
    });
}

fn applied(pending: &mut Pending, id: &PatientId, rule: RuleId, relevance: f32) {
    pending.agent(EventKind::RuleApplied {
        rule,
        patient: id.clone(),
        stage: TickStage::Transfer,
        relevance,
    });
}
