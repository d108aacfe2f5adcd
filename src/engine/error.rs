use chrono::{NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::{conflict_message, ReservationStatus, Slot};

use super::resolver::ValidationPhase;

/// Which end of the operating window a slot fell outside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoursBound {
    Opening,
    Closing,
}

#[derive(Debug)]
pub enum EngineError {
    ResourceNotFound(Ulid),
    ReservationNotFound(Ulid),
    ResourceInactive(Ulid),
    InvalidResource(&'static str),
    InvalidInterval(String),
    OperatingHours {
        bound: HoursBound,
        limit: NaiveTime,
    },
    /// Overlap with an active reservation, found either at check time or at commit.
    Conflict {
        reservation_id: Ulid,
        window: Slot,
    },
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    CancellationWindowClosed {
        id: Ulid,
        starts_at: NaiveDateTime,
    },
    Unvalidated(ValidationPhase),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Everything except journal failures is a rejection the caller can act on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ResourceNotFound(id) => write!(f, "court not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::ResourceInactive(id) => {
                write!(f, "court {id} is not accepting reservations")
            }
            EngineError::InvalidResource(msg) => write!(f, "invalid court: {msg}"),
            EngineError::InvalidInterval(msg) => write!(f, "invalid time slot: {msg}"),
            EngineError::OperatingHours { bound, limit } => match bound {
                HoursBound::Opening => write!(f, "Court opens at {}", limit.format("%H:%M")),
                HoursBound::Closing => write!(
                    f,
                    "Booking would extend past closing time ({})",
                    limit.format("%H:%M")
                ),
            },
            EngineError::Conflict { window, .. } => f.write_str(&conflict_message(window)),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "reservation {id}: illegal status change {from} -> {to}")
            }
            EngineError::CancellationWindowClosed { starts_at, .. } => write!(
                f,
                "Cannot cancel booking less than 24 hours before start time ({})",
                starts_at.format("%Y-%m-%d %H:%M")
            ),
            EngineError::Unvalidated(phase) => {
                write!(f, "booking validated only through {phase:?}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
