use ulid::Ulid;

use crate::model::ScheduleConflict;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    ScheduleConflict(ScheduleConflict),
    TeacherConflict(ScheduleConflict),
    CapacityFull { batch_id: Ulid, capacity: u32 },
    AlreadyReserved(Ulid),
    ReservationExpired,
    EmptyReservation,
    SwitchNotAllowed(&'static str),
    Locked { days_remaining: i64 },
    Validation(String),
    LimitExceeded(&'static str),
    Persistence(String),
}

impl EngineError {
    /// Stable machine-readable code, used on the wire and as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::ScheduleConflict(_) => "schedule_conflict",
            EngineError::TeacherConflict(_) => "teacher_conflict",
            EngineError::CapacityFull { .. } => "capacity_full",
            EngineError::AlreadyReserved(_) => "already_reserved",
            EngineError::ReservationExpired => "reservation_expired",
            EngineError::EmptyReservation => "empty_reservation",
            EngineError::SwitchNotAllowed(_) => "switch_not_allowed",
            EngineError::Locked { .. } => "locked",
            EngineError::Validation(_) => "validation",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Persistence(_) => "persistence",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::ScheduleConflict(c) => {
                write!(f, "schedule conflict with {:?}: {}", c.offending, c.reason())
            }
            EngineError::TeacherConflict(c) => {
                write!(f, "teacher already assigned to {:?}: {}", c.offending, c.reason())
            }
            EngineError::CapacityFull { batch_id, capacity } => {
                write!(f, "batch {batch_id} is full: all {capacity} seats taken")
            }
            EngineError::AlreadyReserved(item_id) => {
                write!(f, "already in reservation as item {item_id}")
            }
            EngineError::ReservationExpired => {
                write!(f, "reservation expired; it has been cleared, start again")
            }
            EngineError::EmptyReservation => write!(f, "reservation is empty"),
            EngineError::SwitchNotAllowed(reason) => write!(f, "switch not allowed: {reason}"),
            EngineError::Locked { days_remaining } => {
                write!(f, "pass is locked for another {days_remaining} day(s)")
            }
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
