//! Facility model - rooms, staff, and downstream transfer units.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::{PatientId, RoomId, StaffId};
use crate::Time;

/// Occupancy status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    /// No occupants
    Free,
    /// At least one occupant
    Occupied,
    /// Held back from allocation
    Reserved,
}

fn default_capacity() -> usize {
    1
}

fn default_min_staff() -> usize {
    1
}

/// A treatment room or bed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Unique identifier
    pub id: RoomId,

    /// Capability tags (e.g. "resuscitation", "cardiology")
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    /// Maximum simultaneous occupants
    #[serde(default = "default_capacity")]
    pub max_capacity: usize,

    /// Minimum staff while occupied
    #[serde(default = "default_min_staff")]
    pub min_staff: usize,

    /// Held back from allocation
    #[serde(default)]
    pub reserved: bool,

    /// Current occupants
    #[serde(default)]
    pub occupants: Vec<PatientId>,
}

impl Room {
    /// Create an empty room.
    pub fn new(id: impl Into<String>, max_capacity: usize) -> Self {
        Self {
            id: RoomId::new(id),
            capabilities: BTreeSet::new(),
            max_capacity,
            min_staff: default_min_staff(),
            reserved: false,
            occupants: Vec::new(),
        }
    }

    /// Add a capability tag.
    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.insert(tag.into().to_lowercase());
        self
    }

    /// Set the minimum staff coverage.
    pub fn with_min_staff(mut self, min_staff: usize) -> Self {
        self.min_staff = min_staff;
        self
    }

    /// Mark reserved.
    pub fn reserved(mut self) -> Self {
        self.reserved = true;
        self
    }

    /// Derived status.
    pub fn status(&self) -> RoomStatus {
        if self.reserved {
            RoomStatus::Reserved
        } else if self.occupants.is_empty() {
            RoomStatus::Free
        } else {
            RoomStatus::Occupied
        }
    }

    /// Whether one more patient fits.
    pub fn has_space(&self) -> bool {
        self.occupants.len() < self.max_capacity
    }

    /// Whether the room provides every tag in `required`.
    pub fn provides(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Number of `wanted` tags this room provides.
    pub fn match_count(&self, wanted: &BTreeSet<String>) -> usize {
        wanted.intersection(&self.capabilities).count()
    }
}

/// Clinical role of a staff member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    /// Registered nurse
    Nurse,
    /// Physician
    Physician,
    /// Care aide
    Aide,
}

impl StaffRole {
    /// Preference when filling coverage gaps, lower first.
    pub fn coverage_preference(self) -> u8 {
        match self {
            Self::Nurse => 0,
            Self::Physician => 1,
            Self::Aide => 2,
        }
    }
}

/// Shift window, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftWindow {
    /// Shift start
    pub start: Time,
    /// Shift end (exclusive)
    pub end: Time,
}

impl ShiftWindow {
    /// Whether `t` falls within the shift.
    pub fn contains(&self, t: Time) -> bool {
        self.start <= t && t < self.end
    }
}

/// A staff member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    /// Unique identifier
    pub id: StaffId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Role
    pub role: StaffRole,

    /// Room currently covered
    #[serde(default)]
    pub assignment: Option<RoomId>,

    /// Shift; none means always on duty
    #[serde(default)]
    pub shift: Option<ShiftWindow>,
}

impl Staff {
    /// Create an unassigned staff member on permanent duty.
    pub fn new(id: impl Into<String>, role: StaffRole) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: StaffId::new(id),
            role,
            assignment: None,
            shift: None,
        }
    }

    /// Set the shift window.
    pub fn with_shift(mut self, start: Time, end: Time) -> Self {
        self.shift = Some(ShiftWindow { start, end });
        self
    }

    /// Whether on duty at `now`.
    pub fn on_duty(&self, now: Time) -> bool {
        self.shift.map_or(true, |s| s.contains(now))
    }
}

/// A downstream unit that receives transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferUnit {
    /// Unit name, matched against transfer rule destinations
    pub name: String,

    /// Bed capacity
    pub capacity: usize,

    /// Beds in use
    #[serde(default)]
    pub occupancy: usize,

    /// Specialties handled
    #[serde(default)]
    pub specialties: Vec<String>,
}

impl TransferUnit {
    /// Whether a bed is available.
    pub fn has_space(&self) -> bool {
        self.occupancy < self.capacity
    }

    /// Take a bed; false when full.
    pub fn accept(&mut self) -> bool {
        if self.has_space() {
            self.occupancy += 1;
            true
        } else {
            false
        }
    }
}
