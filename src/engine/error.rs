use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Window overlaps the given active reservation.
    Conflict(Ulid),
    /// Malformed or out-of-range input; the caller must fix the request.
    Validation(&'static str),
    Authorization(&'static str),
    /// Illegal transition for the reservation's current status.
    InvalidState {
        action: &'static str,
        status: ReservationStatus,
    },
    HasActiveReservations(Ulid),
    TooEarly {
        opens_at: Ms,
    },
    Expired {
        closed_at: Ms,
    },
    /// Optimistic-concurrency loss; retry with fresh state.
    StaleState {
        expected: u64,
        actual: u64,
    },
    LimitExceeded(&'static str),
    /// Store write failed or timed out; retry with backoff.
    Unavailable(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "window overlaps active reservation: {id}")
            }
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Authorization(msg) => write!(f, "not authorized: {msg}"),
            EngineError::InvalidState { action, status } => {
                write!(f, "cannot {action}: reservation is {}", status.label())
            }
            EngineError::HasActiveReservations(id) => {
                write!(f, "cannot remove space {id}: active reservations exist")
            }
            EngineError::TooEarly { opens_at } => {
                write!(f, "too early: allowed from {opens_at}")
            }
            EngineError::Expired { closed_at } => {
                write!(f, "window closed at {closed_at}")
            }
            EngineError::StaleState { expected, actual } => {
                write!(f, "stale state: expected version {expected}, found {actual}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Unavailable(e) => write!(f, "store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
