//! edflow core data models.
//!
//! This crate defines the data structures shared by the rule store, the
//! retrieval engine and the orchestration agent: patients, rooms, staff,
//! transfer units, events and the append-only event log.

#![warn(missing_docs)]

mod id;
mod patient;
mod facility;
mod event;
mod log;

pub use id::*;
pub use patient::{ArrivalDescriptor, Patient, PatientStatus, TriageClass, VitalSign, Vitals};
pub use facility::{Room, RoomStatus, ShiftWindow, Staff, StaffRole, TransferUnit};
pub use event::{Actor, Event, EventKind, TickStage};
pub use log::{hourly_flow, EventCursor, EventLog, HourlyFlow};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
