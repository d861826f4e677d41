use ulid::Ulid;

use crate::model::{Ms, SessionStatus, Span};

#[derive(Debug)]
pub enum EngineError {
    /// Interval fails start < end.
    InvalidInterval { start: Ms, end: Ms },
    /// Candidate slot overlaps a live slot of the same owner.
    Overlap { candidate: Span, conflicting: Ulid },
    /// Caller's role or identity does not permit the operation.
    NotAuthorized(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Slot exists but is booked or deleted.
    SlotUnavailable(Ulid),
    /// Slot cannot be deleted while a booking holds it.
    SlotBooked(Ulid),
    /// Expert attempted to book their own slot.
    SelfBooking(Ulid),
    /// Lifecycle action not legal from the session's current status.
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end})")
            }
            EngineError::Overlap {
                candidate,
                conflicting,
            } => write!(
                f,
                "slot [{}, {}) overlaps existing slot {conflicting}",
                candidate.start, candidate.end
            ),
            EngineError::NotAuthorized(msg) => write!(f, "not authorized: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(id) => write!(f, "slot unavailable: {id}"),
            EngineError::SlotBooked(id) => {
                write!(f, "slot {id} has an active booking")
            }
            EngineError::SelfBooking(id) => {
                write!(f, "cannot book own slot: {id}")
            }
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a {} session", from.as_str())
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
