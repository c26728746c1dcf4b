//! Simulation state owned by the agent.

use std::collections::BTreeMap;

use edflow_core::{
    ArrivalDescriptor, Patient, PatientId, PatientStatus, Room, RoomId, Staff, StaffId, Time, TransferUnit,
    Vitals,
};
use serde::Serialize;

use crate::config::AgentConfig;

/// An arrival waiting for its arrival time to pass.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedArrival {
    /// Ingest order
    pub order: u64,
    /// The arrival
    pub arrival: ArrivalDescriptor,
}

/// All live state of one simulation.
///
/// The agent works on a clone of this during a tick and swaps it in only when
/// the tick completes.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationContext {
    /// Current simulated time
    pub clock: Time,

    /// Ticks completed
    pub tick: u64,

    /// Patients still in the department
    pub patients: BTreeMap<PatientId, Patient>,

    /// Discharged and transferred patients
    pub archived: Vec<Patient>,

    /// Rooms in declaration order
    pub rooms: Vec<Room>,

    /// Staff roster
    pub staff: Vec<Staff>,

    /// Downstream units
    pub units: Vec<TransferUnit>,

    /// Arrivals not yet due
    pub arrivals: Vec<QueuedArrival>,

    /// Vitals updates to apply at the next tick
    pub vitals_updates: Vec<(PatientId, Vitals)>,

    /// Room capacity changes to apply at the next tick
    pub capacity_updates: Vec<(RoomId, usize)>,

    /// Staff joining the roster at the next tick
    pub staff_arrivals: Vec<Staff>,

    next_order: u64,
}

impl SimulationContext {
    /// Initial state for a facility.
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            clock: config.start_time,
            tick: 0,
            patients: BTreeMap::new(),
            archived: Vec::new(),
            rooms: config.rooms.clone(),
            staff: config.staff.clone(),
            units: config.units.clone(),
            arrivals: Vec::new(),
            vitals_updates: Vec::new(),
            capacity_updates: Vec::new(),
            staff_arrivals: Vec::new(),
            next_order: 0,
        }
    }

    /// Whether `id` was ever ingested.
    pub fn knows(&self, id: &PatientId) -> bool {
        self.patients.contains_key(id)
            || self.archived.iter().any(|p| &p.id == id)
            || self.arrivals.iter().any(|q| &q.arrival.id == id)
    }

    /// Queue an arrival, assigning its ingest order.
    pub(crate) fn enqueue(&mut self, arrival: ArrivalDescriptor) {
        let order = self.next_order;
        self.next_order += 1;
        self.arrivals.push(QueuedArrival { order, arrival });
    }

    /// Room by id.
    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|r| &r.id == id)
    }

    /// Mutable room by id.
    pub fn room_mut(&mut self, id: &RoomId) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| &r.id == id)
    }

    /// Room held by a patient.
    pub fn room_of(&self, patient: &Patient) -> Option<&Room> {
        patient.room.as_ref().and_then(|id| self.room(id))
    }

    /// On-duty staff assigned to a room.
    pub fn coverage(&self, room: &RoomId) -> usize {
        self.staff
            .iter()
            .filter(|s| s.assignment.as_ref() == Some(room) && s.on_duty(self.clock))
            .count()
    }

    /// Whether `id` is on the roster or queued to join it.
    pub fn knows_staff(&self, id: &StaffId) -> bool {
        self.staff.iter().chain(&self.staff_arrivals).any(|s| &s.id == id)
    }

    /// On-duty staff without an assignment.
    pub fn free_staff(&self) -> usize {
        self.staff
            .iter()
            .filter(|s| s.assignment.is_none() && s.on_duty(self.clock))
            .count()
    }

    /// Unit by destination name (case-insensitive).
    pub fn unit_mut(&mut self, name: &str) -> Option<&mut TransferUnit> {
        self.units.iter_mut().find(|u| u.name.eq_ignore_ascii_case(name))
    }

    /// Remove a patient from its room, if any.
    pub(crate) fn vacate(&mut self, patient: &PatientId) -> Option<RoomId> {
        let room_id = self.patients.get_mut(patient)?.room.take()?;
        if let Some(room) = self.room_mut(&room_id) {
            room.occupants.retain(|p| p != patient);
        }
        Some(room_id)
    }

    /// Move a patient out of the department with a terminal status.
    pub(crate) fn archive(&mut self, patient: &PatientId, status: PatientStatus) -> Option<RoomId> {
        let room = self.vacate(patient);
        if let Some(mut p) = self.patients.remove(patient) {
            p.status = status;
            self.archived.push(p);
        }
        room
    }

    /// Active patient ids sorted for service: effective priority, then
    /// arrival time, then ingest order.
    pub fn service_order(&self, filter: impl Fn(&Patient) -> bool) -> Vec<PatientId> {
        let mut selected: Vec<&Patient> = self.patients.values().filter(|p| filter(p)).collect();
        selected.sort_by_key(|p| (p.effective_priority(), p.arrival_time, p.intake_order));
        selected.into_iter().map(|p| p.id.clone()).collect()
    }

    /// Active patient ids in ingest order.
    pub fn intake_order(&self, filter: impl Fn(&Patient) -> bool) -> Vec<PatientId> {
        let mut selected: Vec<&Patient> = self.patients.values().filter(|p| filter(p)).collect();
        selected.sort_by_key(|p| p.intake_order);
        selected.into_iter().map(|p| p.id.clone()).collect()
    }

    /// Check capacity and assignment invariants.
    pub fn verify(&self) -> Result<(), String> {
        for room in &self.rooms {
            if room.occupants.len() > room.max_capacity {
                return Err(format!(
                    "room {} holds {} patients, capacity {}",
                    room.id,
                    room.occupants.len(),
                    room.max_capacity
                ));
            }
            for occupant in &room.occupants {
                let holder = self.patients.get(occupant).ok_or_else(|| {
                    format!("room {} lists patient {} who is not in the department", room.id, occupant)
                })?;
                if holder.room.as_ref() != Some(&room.id) || !holder.status.holds_room() {
                    return Err(format!("room {} lists patient {} who does not hold it", room.id, occupant));
                }
            }
        }

        for patient in self.patients.values() {
            let listed = self.rooms.iter().filter(|r| r.occupants.contains(&patient.id)).count();
            match &patient.room {
                Some(id) if listed != 1 || self.room(id).map_or(true, |r| !r.occupants.contains(&patient.id)) => {
                    return Err(format!("patient {} holds room {} inconsistently", patient.id, id));
                }
                None if listed > 0 || patient.status.holds_room() => {
                    return Err(format!("patient {} occupies a room it does not hold", patient.id));
                }
                _ => {}
            }
        }

        for member in &self.staff {
            if let Some(room) = &member.assignment {
                if self.room(room).is_none() {
                    return Err(format!("staff {} assigned to unknown room {}", member.id, room));
                }
            }
        }

        for unit in &self.units {
            if unit.occupancy > unit.capacity {
                return Err(format!("unit {} over capacity", unit.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edflow_core::{PatientStatus, TriageClass};

    fn ctx() -> SimulationContext {
        let config = AgentConfig::default()
            .with_room(Room::new("R1", 1))
            .with_room(Room::new("R2", 2));
        SimulationContext::new(&config)
    }

    fn admit(ctx: &mut SimulationContext, id: &str, room: &str) {
        let mut p = Patient::from_arrival(
            ArrivalDescriptor {
                id: PatientId::new(id),
                arrival_time: ctx.clock,
                vitals: Vitals::default(),
                requested_specialty: None,
            },
            ctx.patients.len() as u64,
        );
        p.triage_class = Some(TriageClass::Standard);
        p.status = PatientStatus::Allocated;
        p.room = Some(RoomId::new(room));
        ctx.room_mut(&RoomId::new(room)).unwrap().occupants.push(p.id.clone());
        ctx.patients.insert(p.id.clone(), p);
    }

    #[test]
    fn test_verify_accepts_consistent_state() {
        let mut ctx = ctx();
        admit(&mut ctx, "P1", "R1");
        admit(&mut ctx, "P2", "R2");
        assert!(ctx.verify().is_ok());
    }

    #[test]
    fn test_verify_catches_over_capacity() {
        let mut ctx = ctx();
        admit(&mut ctx, "P1", "R1");
        admit(&mut ctx, "P2", "R1");
        assert!(ctx.verify().unwrap_err().contains("capacity"));
    }

    #[test]
    fn test_verify_catches_dangling_occupant() {
        let mut ctx = ctx();
        admit(&mut ctx, "P1", "R1");
        ctx.patients.get_mut(&PatientId::new("P1")).unwrap().room = None;
        assert!(ctx.verify().is_err());
    }

    #[test]
    fn test_coverage_ignores_off_shift_staff() {
        let mut ctx = ctx();
        let room = RoomId::new("R1");
        let mut on = Staff::new("N1", edflow_core::StaffRole::Nurse);
        on.assignment = Some(room.clone());
        let mut off = Staff::new("N2", edflow_core::StaffRole::Nurse)
            .with_shift(ctx.clock - chrono::Duration::hours(8), ctx.clock);
        off.assignment = Some(room.clone());
        ctx.staff = vec![on, off];

        assert_eq!(ctx.coverage(&room), 1);
        assert!(ctx.knows_staff(&StaffId::new("N2")));
        assert!(!ctx.knows_staff(&StaffId::new("N3")));
    }

    #[test]
    fn test_archive_frees_room() {
        let mut ctx = ctx();
        admit(&mut ctx, "P1", "R2");
        let freed = ctx.archive(&PatientId::new("P1"), PatientStatus::Discharged);
        assert_eq!(freed, Some(RoomId::new("R2")));
        assert!(ctx.room(&RoomId::new("R2")).unwrap().occupants.is_empty());
        assert_eq!(ctx.archived[0].status, PatientStatus::Discharged);
        assert!(ctx.knows(&PatientId::new("P1")));
        assert!(ctx.verify().is_ok());
    }
}
