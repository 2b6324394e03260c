use ulid::Ulid;

use crate::model::RequestStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum BookingError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Carries the id of the Reserved period in the way.
    Conflict(Ulid),
    InvalidState {
        id: Ulid,
        status: RequestStatus,
    },
    /// Cancellation attempted inside the one-day window before arrival.
    TooLate(Ulid),
    LimitExceeded(&'static str),
    InvalidInput(&'static str),
    Storage(String),
}

impl BookingError {
    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::NotFound(_) => "not_found",
            BookingError::AlreadyExists(_) => "already_exists",
            BookingError::Conflict(_) => "conflict",
            BookingError::InvalidState { .. } => "invalid_state",
            BookingError::TooLate(_) => "too_late",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::Storage(_) => "storage",
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            BookingError::Conflict(id) => write!(f, "conflict with reserved period: {id}"),
            BookingError::InvalidState { id, status } => {
                write!(f, "request {id} is {status}, transition not allowed")
            }
            BookingError::TooLate(id) => {
                write!(f, "request {id} can no longer be canceled: stay starts within a day")
            }
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            BookingError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<std::io::Error> for BookingError {
    fn from(e: std::io::Error) -> Self {
        BookingError::Storage(e.to_string())
    }
}
