//! Agent errors.

use std::path::PathBuf;

use edflow_core::{PatientId, RoomId, StaffId, TickStage};

/// Errors raised by the orchestration agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Facility file could not be read
    #[error("cannot read facility file {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Facility file is not valid JSON for the expected shape
    #[error("facility file {path} is invalid: {source}")]
    Json {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Facility description is inconsistent
    #[error("invalid facility configuration: {0}")]
    Config(String),

    /// Patient id already ingested
    #[error("patient {0} is already known")]
    DuplicatePatient(PatientId),

    /// Vitals update for a patient that is not in the department
    #[error("unknown patient {0}")]
    UnknownPatient(PatientId),

    /// Facility change names a room that does not exist
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),

    /// Staff id already on the roster
    #[error("staff {0} is already on the roster")]
    DuplicateStaff(StaffId),

    /// Capacity change would evict patients or close the room
    #[error("room {room} cannot shrink to {capacity} beds, {occupancy} occupied")]
    CapacityBelowOccupancy {
        /// Room being changed
        room: RoomId,
        /// Requested capacity
        capacity: usize,
        /// Patients in the room
        occupancy: usize,
    },

    /// Post-tick state broke a capacity or assignment invariant
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A tick hook aborted the tick; nothing was committed
    #[error("tick aborted after {stage}: {reason}")]
    TickAborted {
        /// Last completed stage
        stage: TickStage,
        /// Hook's reason
        reason: String,
    },
}

impl AgentError {
    /// Whether the run cannot continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::DuplicatePatient(_)
                | Self::UnknownPatient(_)
                | Self::UnknownRoom(_)
                | Self::DuplicateStaff(_)
                | Self::CapacityBelowOccupancy { .. }
                | Self::TickAborted { .. }
        )
    }
}
