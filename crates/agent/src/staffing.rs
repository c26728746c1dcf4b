//! Staffing stage: release idle staff and cover occupied rooms.

use edflow_core::{EventKind, RoomId};
use tracing::warn;

use crate::context::SimulationContext;
use crate::stage::Pending;

/// Run the staffing stage.
pub(crate) fn run(ctx: &mut SimulationContext, pending: &mut Pending) {
    release(ctx, pending);

    for room_id in rooms_by_acuity(ctx) {
        let Some(required) = ctx.room(&room_id).map(|r| r.min_staff) else {
            continue;
        };

        while ctx.coverage(&room_id) < required {
            let now = ctx.clock;
            let pick = ctx
                .staff
                .iter()
                .enumerate()
                .filter(|(_, s)| s.assignment.is_none() && s.on_duty(now))
                .min_by_key(|(index, s)| (s.role.coverage_preference(), *index))
                .map(|(index, _)| index);
            let Some(index) = pick else {
                break;
            };
            let member = &mut ctx.staff[index];
            member.assignment = Some(room_id.clone());
            pending.system(EventKind::StaffAssigned {
                staff: member.id.clone(),
                room: room_id.clone(),
            });
        }

        let assigned = ctx.coverage(&room_id);
        if assigned < required {
            warn!("Room {} understaffed: {}/{}", room_id, assigned, required);
            pending.system(EventKind::Understaffed {
                room: room_id,
                assigned,
                required,
            });
        }
    }
}

/// Release off-shift staff and staff covering empty rooms.
fn release(ctx: &mut SimulationContext, pending: &mut Pending) {
    let now = ctx.clock;
    let occupied: Vec<RoomId> = ctx
        .rooms
        .iter()
        .filter(|r| !r.occupants.is_empty())
        .map(|r| r.id.clone())
        .collect();

    for member in &mut ctx.staff {
        let Some(room) = member.assignment.clone() else {
            continue;
        };
        if !member.on_duty(now) || !occupied.contains(&room) {
            member.assignment = None;
            pending.system(EventKind::StaffReleased {
                staff: member.id.clone(),
                room,
            });
        }
    }
}

/// Occupied rooms, the one holding the most acute patient first.
fn rooms_by_acuity(ctx: &SimulationContext) -> Vec<RoomId> {
    let mut rooms: Vec<(u8, usize, RoomId)> = ctx
        .rooms
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.occupants.is_empty())
        .map(|(index, r)| {
            let acuity = r
                .occupants
                .iter()
                .filter_map(|id| ctx.patients.get(id))
                .filter_map(|p| p.triage_class.map(|c| c.rank()))
                .max()
                .unwrap_or(0);
            (acuity, index, r.id.clone())
        })
        .collect();
    rooms.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    rooms.into_iter().map(|(_, _, id)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use edflow_core::{
        ArrivalDescriptor, Event, Patient, PatientId, PatientStatus, Room, Staff, StaffRole, TriageClass, Vitals,
    };

    use crate::config::AgentConfig;

    fn place(ctx: &mut SimulationContext, id: &str, room: &str, class: TriageClass) {
        let mut p = Patient::from_arrival(
            ArrivalDescriptor {
                id: PatientId::new(id),
                arrival_time: ctx.clock,
                vitals: Vitals::default(),
                requested_specialty: None,
            },
            0,
        );
        p.triage_class = Some(class);
        p.status = PatientStatus::Allocated;
        p.room = Some(RoomId::new(room));
        ctx.room_mut(&RoomId::new(room)).unwrap().occupants.push(p.id.clone());
        ctx.patients.insert(p.id.clone(), p);
    }

    fn kinds(pending: Pending) -> Vec<&'static str> {
        pending.into_events().iter().map(|e: &Event| e.kind.name()).collect()
    }

    #[test]
    fn test_most_acute_room_is_covered_first_by_nurses() {
        let config = AgentConfig::default()
            .with_room(Room::new("minor-room", 1))
            .with_room(Room::new("resus", 1))
            .with_staff(Staff::new("A1", StaffRole::Aide))
            .with_staff(Staff::new("N1", StaffRole::Nurse));
        let mut ctx = SimulationContext::new(&config);
        place(&mut ctx, "P1", "minor-room", TriageClass::Minor);
        place(&mut ctx, "P2", "resus", TriageClass::Critical);

        let mut pending = Pending::new(ctx.clock);
        run(&mut ctx, &mut pending);

        let nurse = ctx.staff.iter().find(|s| s.id.as_str() == "N1").unwrap();
        assert_eq!(nurse.assignment, Some(RoomId::new("resus")));
        let aide = ctx.staff.iter().find(|s| s.id.as_str() == "A1").unwrap();
        assert_eq!(aide.assignment, Some(RoomId::new("minor-room")));
        assert_eq!(kinds(pending), vec!["staff_assigned", "staff_assigned"]);
    }

    #[test]
    fn test_shortage_is_reported_and_off_shift_released() {
        let start = AgentConfig::default().start_time;
        let config = AgentConfig::default()
            .with_room(Room::new("R1", 1).with_min_staff(2))
            .with_staff(Staff::new("N1", StaffRole::Nurse).with_shift(start - Duration::hours(8), start));
        let mut ctx = SimulationContext::new(&config);
        place(&mut ctx, "P1", "R1", TriageClass::Urgent);
        ctx.staff[0].assignment = Some(RoomId::new("R1"));

        let mut pending = Pending::new(ctx.clock);
        run(&mut ctx, &mut pending);

        assert_eq!(ctx.staff[0].assignment, None);
        assert_eq!(kinds(pending), vec!["staff_released", "understaffed"]);
    }
}
