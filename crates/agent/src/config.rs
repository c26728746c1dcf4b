//! Facility configuration.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use edflow_core::{Room, Staff, Time, TransferUnit, TriageClass};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AgentError;

/// Minutes of treatment before discharge, per triage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreatmentMinutes {
    /// Critical
    pub critical: i64,
    /// Urgent
    pub urgent: i64,
    /// Standard
    pub standard: i64,
    /// Minor
    pub minor: i64,
}

impl Default for TreatmentMinutes {
    fn default() -> Self {
        Self {
            critical: 120,
            urgent: 60,
            standard: 30,
            minor: 15,
        }
    }
}

impl TreatmentMinutes {
    /// Duration for a class.
    pub fn for_class(&self, class: TriageClass) -> Duration {
        let minutes = match class {
            TriageClass::Critical => self.critical,
            TriageClass::Urgent => self.urgent,
            TriageClass::Standard => self.standard,
            TriageClass::Minor => self.minor,
        };
        Duration::minutes(minutes)
    }
}

/// Everything the agent needs besides rules: the facility and the clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Simulated time before the first tick
    pub start_time: Time,

    /// Simulated minutes per tick
    pub tick_minutes: i64,

    /// Rooms, in declaration order
    pub rooms: Vec<Room>,

    /// Staff roster
    pub staff: Vec<Staff>,

    /// Downstream units
    pub units: Vec<TransferUnit>,

    /// Treatment durations
    pub treatment_minutes: TreatmentMinutes,

    /// Wait after which a standard patient is escalated
    pub escalation_after_minutes: i64,

    /// Rules retrieved per query
    pub retrieval_k: usize,

    /// Class used when no triage rule matches
    pub default_class: TriageClass,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            start_time: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).single().unwrap_or_default(),
            tick_minutes: 15,
            rooms: Vec::new(),
            staff: Vec::new(),
            units: Vec::new(),
            treatment_minutes: TreatmentMinutes::default(),
            escalation_after_minutes: 360,
            retrieval_k: 8,
            default_class: TriageClass::Standard,
        }
    }
}

impl AgentConfig {
    /// Load a facility file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|source| AgentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| AgentError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let config = config.validated()?;
        info!(
            "Loaded facility: {} rooms, {} staff, {} units",
            config.rooms.len(),
            config.staff.len(),
            config.units.len()
        );
        Ok(config)
    }

    /// Set the start time.
    pub fn with_start_time(mut self, start: Time) -> Self {
        self.start_time = start;
        self
    }

    /// Set the tick length in minutes.
    pub fn with_tick_minutes(mut self, minutes: i64) -> Self {
        self.tick_minutes = minutes;
        self
    }

    /// Add a room.
    pub fn with_room(mut self, room: Room) -> Self {
        self.rooms.push(room);
        self
    }

    /// Add a staff member.
    pub fn with_staff(mut self, staff: Staff) -> Self {
        self.staff.push(staff);
        self
    }

    /// Add a transfer unit.
    pub fn with_unit(mut self, unit: TransferUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Set the escalation threshold.
    pub fn with_escalation_after(mut self, minutes: i64) -> Self {
        self.escalation_after_minutes = minutes;
        self
    }

    /// Set treatment durations.
    pub fn with_treatment_minutes(mut self, minutes: TreatmentMinutes) -> Self {
        self.treatment_minutes = minutes;
        self
    }

    /// Tick length.
    pub fn tick_duration(&self) -> Duration {
        Duration::minutes(self.tick_minutes)
    }

    /// Check consistency and normalize tags. Rooms start empty.
    pub fn validated(mut self) -> Result<Self, AgentError> {
        if self.tick_minutes <= 0 {
            return Err(AgentError::Config("tick_minutes must be positive".to_string()));
        }
        if self.retrieval_k == 0 {
            return Err(AgentError::Config("retrieval_k must be at least 1".to_string()));
        }

        let mut room_ids = BTreeSet::new();
        for room in &mut self.rooms {
            if room.id.as_str().trim().is_empty() {
                return Err(AgentError::Config("room with empty id".to_string()));
            }
            if !room_ids.insert(room.id.clone()) {
                return Err(AgentError::Config(format!("duplicate room '{}'", room.id)));
            }
            if room.max_capacity == 0 {
                return Err(AgentError::Config(format!("room '{}' has no capacity", room.id)));
            }
            room.capabilities = room
                .capabilities
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            room.occupants.clear();
        }

        let mut staff_ids = BTreeSet::new();
        for member in &mut self.staff {
            if !staff_ids.insert(member.id.clone()) {
                return Err(AgentError::Config(format!("duplicate staff '{}'", member.id)));
            }
            // nobody covers an empty room at start
            member.assignment = None;
        }

        let mut unit_names = BTreeSet::new();
        for unit in &self.units {
            if !unit_names.insert(unit.name.to_lowercase()) {
                return Err(AgentError::Config(format!("duplicate unit '{}'", unit.name)));
            }
            if unit.occupancy > unit.capacity {
                return Err(AgentError::Config(format!("unit '{}' is over capacity", unit.name)));
            }
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facility_json_defaults_and_normalization() {
        let json = r#"{
            "start_time": "2024-03-01T08:00:00Z",
            "rooms": [
                {"id": "R1", "capabilities": ["Resuscitation", " Monitoring "]},
                {"id": "R2", "max_capacity": 2, "min_staff": 2}
            ],
            "staff": [{"id": "N1", "name": "Ana", "role": "nurse", "assignment": "R1"}],
            "units": [{"name": "ICU", "capacity": 2}]
        }"#;
        let config: AgentConfig = serde_json::from_str(json).unwrap();
        let config = config.validated().unwrap();

        assert_eq!(config.tick_minutes, 15);
        assert_eq!(config.escalation_after_minutes, 360);
        assert_eq!(config.default_class, TriageClass::Standard);
        assert!(config.rooms[0].capabilities.contains("resuscitation"));
        assert!(config.rooms[0].capabilities.contains("monitoring"));
        assert_eq!(config.rooms[1].max_capacity, 2);
        assert_eq!(config.staff[0].assignment, None);
        assert_eq!(config.treatment_minutes.for_class(TriageClass::Urgent), Duration::minutes(60));
    }

    #[test]
    fn test_validation_errors() {
        let dup = AgentConfig::default()
            .with_room(Room::new("R1", 1))
            .with_room(Room::new("R1", 1));
        assert!(matches!(dup.validated(), Err(AgentError::Config(_))));

        let zero_tick = AgentConfig::default().with_tick_minutes(0);
        assert!(matches!(zero_tick.validated(), Err(AgentError::Config(_))));

        let no_beds = AgentConfig::default().with_room(Room::new("R1", 0));
        assert!(matches!(no_beds.validated(), Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facility.json");
        tokio::fs::write(&path, "{\"rooms\": 3}").await.unwrap();
        assert!(matches!(AgentConfig::load(&path).await, Err(AgentError::Json { .. })));
        assert!(matches!(
            AgentConfig::load(dir.path().join("missing.json")).await,
            Err(AgentError::Io { .. })
        ));
    }
}
