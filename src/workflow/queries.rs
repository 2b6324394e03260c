use ulid::Ulid;

use crate::error::BookingError;
use crate::limits::MAX_SEARCH_LEN;
use crate::model::*;

use super::Workflow;

impl Workflow {
    pub async fn get(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        self.require(id).await
    }

    pub async fn by_accommodation(
        &self,
        accommodation_id: Ulid,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        self.requests.by_accommodation(accommodation_id, status).await
    }

    pub async fn by_client(&self, user_id: Ulid, status: Option<RequestStatus>) -> Result<Vec<ReservationRequest>, BookingError> {
        self.requests.by_client(user_id, status).await
    }

    pub async fn filtered(
        &self,
        user_id: Ulid,
        role: Role,
        past: bool,
        search: Option<&str>,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        self.filtered_at(user_id, role, past, search, now_ms()).await
    }

    /// A host's or a guest's requests, split into history (`past`) and
    /// current/upcoming, optionally narrowed by accommodation name.
    pub async fn filtered_at(
        &self,
        user_id: Ulid,
        role: Role,
        past: bool,
        search: Option<&str>,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        if search.is_some_and(|s| s.len() > MAX_SEARCH_LEN) {
            return Err(BookingError::LimitExceeded("search term too long"));
        }
        match role {
            Role::Host => self.requests.by_host_window(user_id, past, search, now).await,
            Role::Guest => self.requests.by_client_window(user_id, past, search, now).await,
        }
    }

    /// How many reservations the guest has canceled.
    pub async fn count_canceled_by_client(&self, user_id: Ulid) -> Result<usize, BookingError> {
        Ok(self
            .requests
            .by_client(user_id, Some(RequestStatus::DeclinedByUser))
            .await?
            .len())
    }

    pub async fn guest_has_stayed_with_host(&self, guest_id: Ulid, host_id: Ulid) -> Result<bool, BookingError> {
        self.guest_has_stayed_with_host_at(guest_id, host_id, now_ms()).await
    }

    /// The guest had an accepted stay with this host that is over.
    pub async fn guest_has_stayed_with_host_at(&self, guest_id: Ulid, host_id: Ulid, now: Ms) -> Result<bool, BookingError> {
        Ok(!self
            .requests
            .past_approved_by_client_and_host(guest_id, host_id, now)
            .await?
            .is_empty())
    }

    /// The guest holds an accepted (or completed) reservation for the accommodation.
    pub async fn guest_has_reservation_for_accommodation(
        &self,
        guest_id: Ulid,
        accommodation_id: Ulid,
    ) -> Result<bool, BookingError> {
        Ok(self
            .requests
            .by_client_and_accommodation(guest_id, accommodation_id)
            .await?
            .iter()
            .any(|r| matches!(r.status, RequestStatus::Approved | RequestStatus::Completed)))
    }
}
