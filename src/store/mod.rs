//! Storage contracts for the ledger and the workflow, plus the bundled
//! DashMap + WAL implementation ([`Store`]).

mod commit;
mod requests;
mod state;
mod unavailability;

pub use state::Store;

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;

/// Keyed store of ledger entries, one per accommodation.
#[async_trait]
pub trait UnavailabilityStore: Send + Sync {
    async fn get_by_accommodation(&self, accommodation_id: Ulid) -> Result<Option<Unavailability>, BookingError>;

    /// Fails with `AlreadyExists` if an entry for the accommodation is present.
    async fn insert(&self, entry: Unavailability) -> Result<(), BookingError>;

    /// Replace name, host and policy. Periods are left alone.
    async fn update(&self, entry: &Unavailability) -> Result<(), BookingError>;

    async fn replace_periods(
        &self,
        accommodation_id: Ulid,
        periods: Vec<UnavailabilityPeriod>,
    ) -> Result<(), BookingError>;

    async fn get_by_host(&self, host_id: Ulid) -> Result<Vec<Unavailability>, BookingError>;

    /// Returns false if there was nothing to delete.
    async fn delete_by_accommodation(&self, accommodation_id: Ulid) -> Result<bool, BookingError>;

    async fn list(&self) -> Result<Vec<Unavailability>, BookingError>;
}

/// Store of reservation requests.
///
/// Time-windowed listings split on `now`: `past` selects stays that ended
/// before `now`, otherwise stays still running or ahead. `search` is a
/// case-insensitive substring match on the accommodation name.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get(&self, id: Ulid) -> Result<Option<ReservationRequest>, BookingError>;

    async fn insert(&self, request: ReservationRequest) -> Result<(), BookingError>;

    /// Overwrite a stored request. `NotFound` if absent.
    async fn update(&self, request: &ReservationRequest) -> Result<(), BookingError>;

    async fn delete(&self, id: Ulid) -> Result<bool, BookingError>;

    /// Delete all of `ids` in one commit. Returns how many existed.
    async fn delete_many(&self, ids: &[Ulid]) -> Result<usize, BookingError>;

    async fn by_accommodation(
        &self,
        accommodation_id: Ulid,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ReservationRequest>, BookingError>;

    async fn by_client(
        &self,
        user_id: Ulid,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ReservationRequest>, BookingError>;

    async fn by_host_window(
        &self,
        host_id: Ulid,
        past: bool,
        search: Option<&str>,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError>;

    async fn by_client_window(
        &self,
        user_id: Ulid,
        past: bool,
        search: Option<&str>,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError>;

    /// Decline every Pending request of the accommodation strictly overlapping
    /// `span`. Returns the ids that changed.
    async fn cancel_overlapping_pending(&self, accommodation_id: Ulid, span: Span) -> Result<Vec<Ulid>, BookingError>;

    async fn delete_by_host(&self, host_id: Ulid) -> Result<usize, BookingError>;

    /// Approved or completed stays of `user_id` with `host_id` that ended before `now`.
    async fn past_approved_by_client_and_host(
        &self,
        user_id: Ulid,
        host_id: Ulid,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError>;

    async fn by_client_and_accommodation(
        &self,
        user_id: Ulid,
        accommodation_id: Ulid,
    ) -> Result<Vec<ReservationRequest>, BookingError>;

    /// Approved requests whose stay ended at or before `now`.
    async fn ended_approved(&self, now: Ms) -> Result<Vec<ReservationRequest>, BookingError>;

    /// Move all of `ids` to `status` in one commit.
    async fn set_status_many(&self, ids: &[Ulid], status: RequestStatus) -> Result<(), BookingError>;
}

/// Shared predicate for the windowed listings.
pub(crate) fn matches_window(request: &ReservationRequest, past: bool, search: Option<&str>, now: Ms) -> bool {
    let in_window = if past {
        request.span.end < now
    } else {
        request.span.end >= now
    };
    if !in_window {
        return false;
    }
    match search {
        Some(term) if !term.is_empty() => request
            .accommodation_name
            .to_lowercase()
            .contains(&term.to_lowercase()),
        _ => true,
    }
}
