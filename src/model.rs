use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Wall clock in Unix milliseconds.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Closed interval `[start, end]` with `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Strict overlap: shared boundaries do not count.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Inclusive overlap: shared boundaries count.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Why a stretch of time is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Backed by an approved reservation request.
    Reserved,
    /// Blocked manually by the host.
    OwnerSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailabilityPeriod {
    pub id: Ulid,
    pub span: Span,
    pub reason: Reason,
}

impl UnavailabilityPeriod {
    pub fn new(span: Span, reason: Reason) -> Self {
        Self {
            id: Ulid::new(),
            span,
            reason,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.reason == Reason::Reserved
    }
}

/// Calendar of one accommodation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unavailability {
    pub id: Ulid,
    pub accommodation_id: Ulid,
    pub accommodation_name: String,
    pub host_id: Ulid,
    /// Sorted by `span.start`; no two periods with the same reason touch.
    pub periods: Vec<UnavailabilityPeriod>,
    /// Approve incoming reservation requests without host review.
    pub auto_approve: bool,
}

impl Unavailability {
    pub fn new(accommodation_id: Ulid, accommodation_name: String, host_id: Ulid, auto_approve: bool) -> Self {
        Self {
            id: Ulid::new(),
            accommodation_id,
            accommodation_name,
            host_id,
            periods: Vec::new(),
            auto_approve,
        }
    }

    pub fn has_upcoming_reservation(&self, now: Ms) -> bool {
        self.periods
            .iter()
            .any(|p| p.is_reserved() && p.span.start > now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    DeclinedByHost,
    DeclinedByUser,
    Completed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::DeclinedByHost | RequestStatus::DeclinedByUser | RequestStatus::Completed
        )
    }

    /// Pending → {Approved, DeclinedByHost}; Approved → {DeclinedByUser, Completed}.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Approved)
                | (RequestStatus::Pending, RequestStatus::DeclinedByHost)
                | (RequestStatus::Approved, RequestStatus::DeclinedByUser)
                | (RequestStatus::Approved, RequestStatus::Completed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::DeclinedByHost => "declined_by_host",
            RequestStatus::DeclinedByUser => "declined_by_user",
            RequestStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A guest's submission, before the workflow assigns identity and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservationRequest {
    pub accommodation_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub guest_count: u32,
    pub total_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub accommodation_id: Ulid,
    pub accommodation_name: String,
    pub host_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub guest_count: u32,
    pub total_price: f64,
    pub status: RequestStatus,
}

impl ReservationRequest {
    /// The stay has not started yet.
    pub fn is_upcoming(&self, now: Ms) -> bool {
        self.span.start > now
    }

    /// Guests may cancel until one day before arrival.
    pub fn cancellation_open(&self, now: Ms) -> bool {
        now < self.span.start - DAY_MS
    }
}

/// Which side of a reservation a user is on, for filtered listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Guest,
}

/// Flat event types, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    AccommodationRegistered {
        id: Ulid,
        accommodation_id: Ulid,
        accommodation_name: String,
        host_id: Ulid,
        auto_approve: bool,
    },
    AccommodationUpdated {
        accommodation_id: Ulid,
        accommodation_name: String,
        host_id: Ulid,
        auto_approve: bool,
    },
    AccommodationRemoved {
        accommodation_id: Ulid,
    },
    PeriodsReplaced {
        accommodation_id: Ulid,
        periods: Vec<UnavailabilityPeriod>,
    },
    RequestStored {
        request: ReservationRequest,
    },
    RequestStatusChanged {
        ids: Vec<Ulid>,
        status: RequestStatus,
    },
    RequestsDeleted {
        ids: Vec<Ulid>,
    },
}
