//! Intake stage: facility changes, treatment progress, due arrivals and
//! vitals updates.

use edflow_core::{EventKind, Patient, PatientId, PatientStatus};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::context::SimulationContext;
use crate::stage::Pending;

/// Run the intake stage at `ctx.clock`.
pub(crate) fn run(ctx: &mut SimulationContext, config: &AgentConfig, pending: &mut Pending) {
    apply_capacity(ctx, pending);
    admit_staff(ctx, pending);
    complete_treatments(ctx, config, pending);
    start_treatments(ctx, pending);
    admit_arrivals(ctx, pending);
    apply_vitals(ctx);

    let now = ctx.clock;
    for patient in ctx.patients.values_mut() {
        if !patient.status.holds_room() {
            patient.refresh_wait(now);
        }
    }
}

fn apply_capacity(ctx: &mut SimulationContext, pending: &mut Pending) {
    for (room_id, capacity) in std::mem::take(&mut ctx.capacity_updates) {
        let Some(room) = ctx.room_mut(&room_id) else {
            warn!("Dropping capacity change for unknown room {}", room_id);
            continue;
        };
        // Occupancy may have grown since the change was queued.
        if capacity == 0 || capacity < room.occupants.len() {
            warn!(
                "Dropping capacity change for room {}: {} beds, {} occupied",
                room_id,
                capacity,
                room.occupants.len()
            );
            continue;
        }
        let previous = std::mem::replace(&mut room.max_capacity, capacity);
        if previous != capacity {
            info!("Room {} capacity {} -> {}", room_id, previous, capacity);
            pending.system(EventKind::CapacityChanged {
                room: room_id,
                previous,
                capacity,
            });
        }
    }
}

fn admit_staff(ctx: &mut SimulationContext, pending: &mut Pending) {
    for mut member in std::mem::take(&mut ctx.staff_arrivals) {
        if ctx.staff.iter().any(|s| s.id == member.id) {
            warn!("Dropping duplicate staff {}", member.id);
            continue;
        }
        member.assignment = None;
        info!("Staff {} joined the roster", member.id);
        pending.system(EventKind::StaffAdded {
            staff: member.id.clone(),
            role: member.role,
        });
        ctx.staff.push(member);
    }
}

fn complete_treatments(ctx: &mut SimulationContext, config: &AgentConfig, pending: &mut Pending) {
    let now = ctx.clock;
    let done: Vec<PatientId> = ctx
        .intake_order(|p| {
            p.status == PatientStatus::InTreatment
                && p.treatment_started.map_or(false, |started| {
                    let class = p.triage_class.unwrap_or(config.default_class);
                    now - started >= config.treatment_minutes.for_class(class)
                })
        });

    for id in done {
        let room = ctx.archive(&id, PatientStatus::Discharged);
        pending.system(EventKind::Discharge { patient: id, room, rule: None });
    }
}

fn start_treatments(ctx: &mut SimulationContext, pending: &mut Pending) {
    let now = ctx.clock;
    let ready: Vec<PatientId> = ctx.intake_order(|p| {
        p.status == PatientStatus::Allocated
            && p.room.as_ref().map_or(false, |room| {
                ctx.room(room)
                    .map_or(false, |r| ctx.coverage(&r.id) >= r.min_staff)
            })
    });

    for id in ready {
        if let Some(patient) = ctx.patients.get_mut(&id) {
            patient.status = PatientStatus::InTreatment;
            patient.treatment_started = Some(now);
            if let Some(room) = patient.room.clone() {
                pending.system(EventKind::TreatmentStarted { patient: id, room });
            }
        }
    }
}

fn admit_arrivals(ctx: &mut SimulationContext, pending: &mut Pending) {
    let now = ctx.clock;
    let (mut due, later): (Vec<_>, Vec<_>) = ctx
        .arrivals
        .drain(..)
        .partition(|q| q.arrival.arrival_time <= now);
    ctx.arrivals = later;

    due.sort_by_key(|q| (q.arrival.arrival_time, q.order));
    for queued in due {
        let patient = Patient::from_arrival(queued.arrival, queued.order);
        debug!("Patient {} arrived", patient.id);
        pending.system(EventKind::Arrival { patient: patient.id.clone() });
        ctx.patients.insert(patient.id.clone(), patient);
    }
}

fn apply_vitals(ctx: &mut SimulationContext) {
    let mut kept = Vec::new();
    for (id, vitals) in ctx.vitals_updates.drain(..) {
        match ctx.patients.get_mut(&id) {
            // an identical reading does not warrant re-triage
            Some(patient) if patient.vitals == vitals => {}
            Some(patient) => {
                patient.vitals = vitals;
                patient.vitals_dirty = true;
            }
            // not arrived yet
            None if ctx.arrivals.iter().any(|q| q.arrival.id == id) => kept.push((id, vitals)),
            None => debug!("Dropping vitals update for departed patient {}", id),
        }
    }
    ctx.vitals_updates = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use edflow_core::{ArrivalDescriptor, Room, RoomId, Staff, StaffRole, TriageClass, Vitals};

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default().with_room(Room::new("R1", 1));
        config.start_time = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        config
    }

    fn allocated(ctx: &mut SimulationContext, id: &str) {
        let mut p = Patient::from_arrival(
            ArrivalDescriptor {
                id: PatientId::new(id),
                arrival_time: ctx.clock,
                vitals: Vitals::default(),
                requested_specialty: None,
            },
            0,
        );
        p.triage_class = Some(TriageClass::Standard);
        p.vitals_dirty = false;
        p.status = PatientStatus::Allocated;
        p.room = Some(RoomId::new("R1"));
        ctx.rooms[0].occupants.push(p.id.clone());
        ctx.patients.insert(p.id.clone(), p);
    }

    #[test]
    fn test_off_shift_coverage_does_not_start_treatment() {
        let config = config();
        let mut ctx = SimulationContext::new(&config);
        let mut nurse = Staff::new("N1", StaffRole::Nurse)
            .with_shift(ctx.clock - Duration::hours(8), ctx.clock);
        nurse.assignment = Some(RoomId::new("R1"));
        ctx.staff.push(nurse);
        allocated(&mut ctx, "P1");

        let mut pending = Pending::new(ctx.clock);
        run(&mut ctx, &config, &mut pending);
        assert_eq!(ctx.patients[&PatientId::new("P1")].status, PatientStatus::Allocated);

        ctx.staff[0].shift = None;
        run(&mut ctx, &config, &mut pending);
        assert_eq!(ctx.patients[&PatientId::new("P1")].status, PatientStatus::InTreatment);
    }

    #[test]
    fn test_unchanged_vitals_stay_clean() {
        let config = config();
        let mut ctx = SimulationContext::new(&config);
        allocated(&mut ctx, "P1");
        let id = PatientId::new("P1");

        ctx.vitals_updates.push((id.clone(), Vitals::default()));
        let mut pending = Pending::new(ctx.clock);
        run(&mut ctx, &config, &mut pending);
        assert!(!ctx.patients[&id].vitals_dirty);

        let worse = Vitals {
            heart_rate: 130.0,
            ..Vitals::default()
        };
        ctx.vitals_updates.push((id.clone(), worse));
        run(&mut ctx, &config, &mut pending);
        assert!(ctx.patients[&id].vitals_dirty);
        assert_eq!(ctx.patients[&id].vitals, worse);
    }

    #[test]
    fn test_capacity_change_rechecks_occupancy() {
        let config = config();
        let mut ctx = SimulationContext::new(&config);
        allocated(&mut ctx, "P1");
        let room = RoomId::new("R1");

        ctx.capacity_updates.push((room.clone(), 0));
        ctx.capacity_updates.push((RoomId::new("R9"), 3));
        ctx.capacity_updates.push((room.clone(), 3));
        let mut pending = Pending::new(ctx.clock);
        apply_capacity(&mut ctx, &mut pending);

        assert_eq!(ctx.room(&room).unwrap().max_capacity, 3);
        assert!(ctx.capacity_updates.is_empty());
        let changes: Vec<_> = pending
            .events()
            .iter()
            .filter(|e| e.kind.name() == "capacity_changed")
            .collect();
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_queued_staff_join_unassigned() {
        let config = config();
        let mut ctx = SimulationContext::new(&config);
        ctx.staff.push(Staff::new("N1", StaffRole::Nurse));
        let mut late = Staff::new("N2", StaffRole::Physician);
        late.assignment = Some(RoomId::new("R1"));
        ctx.staff_arrivals.push(late);
        ctx.staff_arrivals.push(Staff::new("N1", StaffRole::Aide));

        let mut pending = Pending::new(ctx.clock);
        admit_staff(&mut ctx, &mut pending);

        assert_eq!(ctx.staff.len(), 2);
        assert_eq!(ctx.staff[0].role, StaffRole::Nurse);
        assert_eq!(ctx.staff[1].assignment, None);
        assert_eq!(ctx.free_staff(), 2);
    }
}
