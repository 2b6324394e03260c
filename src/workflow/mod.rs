//! Reservation-request state machine.
//!
//! ```text
//! Pending ──approve──▶ Approved ──cancel_by_guest──▶ DeclinedByUser
//!    │                    │
//!    └──decline──▶ DeclinedByHost   └──complete_elapsed──▶ Completed
//! ```
//!
//! Transitions hold the accommodation's ledger lock, so an approval and a
//! competing `add_period` on the same accommodation never interleave.

mod queries;

use std::sync::Arc;

use tracing::{info, warn};
use ulid::Ulid;

use crate::error::BookingError;
use crate::intervals;
use crate::ledger::{AccommodationGuard, Ledger, validate_span};
use crate::limits::*;
use crate::model::*;
use crate::notify::{EventPublisher, Notification, Topic, publish_or_warn};
use crate::observability;
use crate::store::ReservationStore;

pub const TAG_AUTOMATIC: &str = "automatic";
pub const TAG_ACCEPTED: &str = "accept-request";
pub const TAG_DECLINED: &str = "decline-request";
pub const TAG_CANCELED: &str = "canceled";

pub struct Workflow {
    ledger: Arc<Ledger>,
    requests: Arc<dyn ReservationStore>,
    publisher: Arc<dyn EventPublisher>,
}

fn validate_new(new: &NewReservationRequest) -> Result<(), BookingError> {
    validate_span(&new.span)?;
    if new.span.duration_ms() == 0 {
        return Err(BookingError::InvalidInput("stay has no length"));
    }
    if new.guest_count == 0 {
        return Err(BookingError::InvalidInput("guest count must be positive"));
    }
    if new.guest_count > MAX_GUEST_COUNT {
        return Err(BookingError::LimitExceeded("too many guests"));
    }
    if !new.total_price.is_finite() || new.total_price < 0.0 {
        return Err(BookingError::InvalidInput("total price must be a non-negative number"));
    }
    Ok(())
}

fn require_transition(request: &ReservationRequest, next: RequestStatus) -> Result<(), BookingError> {
    if !request.status.can_transition_to(next) {
        return Err(BookingError::InvalidState {
            id: request.id,
            status: request.status,
        });
    }
    Ok(())
}

impl Workflow {
    pub fn new(ledger: Arc<Ledger>, requests: Arc<dyn ReservationStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            ledger,
            requests,
            publisher,
        }
    }

    async fn require(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        self.requests.get(id).await?.ok_or(BookingError::NotFound(id))
    }

    /// Lock the request's accommodation and re-read the request under it.
    async fn lock_request(&self, id: Ulid) -> Result<(AccommodationGuard, ReservationRequest), BookingError> {
        let accommodation_id = self.require(id).await?.accommodation_id;
        let guard = self.ledger.lock(accommodation_id).await;
        let request = self.require(id).await?;
        Ok((guard, request))
    }

    async fn set_status(&self, request: &mut ReservationRequest, status: RequestStatus) -> Result<(), BookingError> {
        require_transition(request, status)?;
        self.requests.set_status_many(&[request.id], status).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => status.as_str()).increment(1);
        request.status = status;
        Ok(())
    }

    fn notify(&self, topic: Topic, receiver: Ulid, request_id: Ulid, tag: &str) {
        publish_or_warn(
            self.publisher.as_ref(),
            topic,
            &Notification::reservation(receiver, request_id, tag),
        );
    }

    // ── Transitions ──────────────────────────────────────────

    /// Store a new Pending request. Auto-approving accommodations approve it
    /// on the spot; an approval failure is returned after the creation
    /// notice has gone out, with the request left Pending.
    pub async fn submit(&self, new: NewReservationRequest) -> Result<ReservationRequest, BookingError> {
        validate_new(&new)?;
        let entry = self
            .ledger
            .get(new.accommodation_id)
            .await?
            .ok_or(BookingError::NotFound(new.accommodation_id))?;

        let request = ReservationRequest {
            id: Ulid::new(),
            accommodation_id: new.accommodation_id,
            accommodation_name: entry.accommodation_name.clone(),
            host_id: entry.host_id,
            user_id: new.user_id,
            span: new.span,
            guest_count: new.guest_count,
            total_price: new.total_price,
            status: RequestStatus::Pending,
        };
        self.requests.insert(request.clone()).await?;
        metrics::counter!(observability::REQUESTS_SUBMITTED_TOTAL).increment(1);
        info!(
            "request {} submitted for {} by {}",
            request.id, request.accommodation_id, request.user_id
        );

        let approval = if entry.auto_approve {
            Some(self.approve_unannounced(request.id).await)
        } else {
            None
        };

        let tag = if entry.auto_approve { TAG_AUTOMATIC } else { "" };
        self.notify(Topic::RequestCreated, request.host_id, request.id, tag);

        match approval {
            None => Ok(request),
            Some(Ok(approved)) => {
                self.notify(Topic::HostReviewed, approved.user_id, approved.id, TAG_ACCEPTED);
                Ok(approved)
            }
            Some(Err(e)) => {
                warn!("auto-approval of {} failed: {e}", request.id);
                Err(e)
            }
        }
    }

    /// Host accepts a Pending request.
    pub async fn approve(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        let approved = self.approve_unannounced(id).await?;
        self.notify(Topic::HostReviewed, approved.user_id, approved.id, TAG_ACCEPTED);
        Ok(approved)
    }

    /// Conflicts are checked before any write. If the ledger write still
    /// fails, the request goes back to Pending.
    async fn approve_unannounced(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        let (guard, mut request) = self.lock_request(id).await?;
        require_transition(&request, RequestStatus::Approved)?;

        let entry = self
            .ledger
            .get(request.accommodation_id)
            .await?
            .ok_or(BookingError::NotFound(request.accommodation_id))?;
        if let Some(blocking) = intervals::reserved_overlap(&entry.periods, &request.span) {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            return Err(BookingError::Conflict(blocking.id));
        }

        self.set_status(&mut request, RequestStatus::Approved).await?;
        if let Err(e) = self.reserve(&guard, &request).await {
            warn!("approval of {id} failed after status change, reverting: {e}");
            // Compensation, outside the transition table.
            if let Err(revert) = self.requests.set_status_many(&[id], RequestStatus::Pending).await {
                tracing::error!("could not revert {id} to pending: {revert}");
            }
            return Err(e);
        }

        info!("request {id} approved");
        Ok(request)
    }

    /// Decline the competing Pending requests, then block the stay.
    async fn reserve(&self, guard: &AccommodationGuard, request: &ReservationRequest) -> Result<(), BookingError> {
        let declined = self
            .requests
            .cancel_overlapping_pending(request.accommodation_id, request.span)
            .await?;
        if !declined.is_empty() {
            info!("approval of {} declined {} competing requests", request.id, declined.len());
        }
        self.ledger
            .add_period_locked(guard, request.accommodation_id, request.span, Reason::Reserved)
            .await?;
        Ok(())
    }

    /// Host rejects a Pending request. The calendar is not touched.
    pub async fn decline(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        let (_guard, mut request) = self.lock_request(id).await?;
        self.set_status(&mut request, RequestStatus::DeclinedByHost).await?;
        info!("request {id} declined by host");
        self.notify(Topic::HostReviewed, request.user_id, request.id, TAG_DECLINED);
        Ok(request)
    }

    pub async fn cancel_by_guest(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        self.cancel_by_guest_at(id, now_ms()).await
    }

    /// Guest withdraws an Approved reservation. Allowed until one day before
    /// arrival; frees the reserved span.
    pub async fn cancel_by_guest_at(&self, id: Ulid, now: Ms) -> Result<ReservationRequest, BookingError> {
        let (guard, mut request) = self.lock_request(id).await?;
        require_transition(&request, RequestStatus::DeclinedByUser)?;
        if !request.cancellation_open(now) {
            return Err(BookingError::TooLate(id));
        }

        self.set_status(&mut request, RequestStatus::DeclinedByUser).await?;
        self.ledger
            .release_reserved_span_locked(&guard, request.accommodation_id, request.span)
            .await?;
        info!("request {id} canceled by guest");
        self.notify(Topic::ReservationCanceled, request.host_id, request.id, TAG_CANCELED);
        Ok(request)
    }

    /// Move every Approved request whose stay has ended to Completed.
    pub async fn complete_elapsed(&self, now: Ms) -> Result<usize, BookingError> {
        let ended: Vec<Ulid> = self
            .requests
            .ended_approved(now)
            .await?
            .into_iter()
            .filter(|r| r.status.can_transition_to(RequestStatus::Completed))
            .map(|r| r.id)
            .collect();
        if ended.is_empty() {
            return Ok(0);
        }
        self.requests.set_status_many(&ended, RequestStatus::Completed).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => RequestStatus::Completed.as_str())
            .increment(ended.len() as u64);
        Ok(ended.len())
    }

    // ── Deletion ─────────────────────────────────────────────

    pub async fn delete_request(&self, id: Ulid) -> Result<(), BookingError> {
        self.delete_request_at(id, now_ms()).await
    }

    /// Refused while the request is an Approved stay that has not started.
    pub async fn delete_request_at(&self, id: Ulid, now: Ms) -> Result<(), BookingError> {
        let (_guard, request) = self.lock_request(id).await?;
        if request.status == RequestStatus::Approved && request.is_upcoming(now) {
            return Err(BookingError::InvalidState {
                id,
                status: request.status,
            });
        }
        self.requests.delete(id).await?;
        Ok(())
    }

    pub async fn delete_client(&self, user_id: Ulid) -> Result<bool, BookingError> {
        self.delete_client_at(user_id, now_ms()).await
    }

    /// Drop all of a guest's requests, unless one is an upcoming Approved stay.
    ///
    /// Holds the locks of every accommodation the guest has requested, so no
    /// approval lands between the check and the delete.
    pub async fn delete_client_at(&self, user_id: Ulid, now: Ms) -> Result<bool, BookingError> {
        let (_guards, requests) = loop {
            let seen = self.requests.by_client(user_id, None).await?;
            let guards = self.ledger.lock_many(seen.iter().map(|r| r.accommodation_id)).await;
            let requests = self.requests.by_client(user_id, None).await?;
            if requests
                .iter()
                .all(|r| seen.iter().any(|s| s.accommodation_id == r.accommodation_id))
            {
                break (guards, requests);
            }
        };
        if requests
            .iter()
            .any(|r| r.status == RequestStatus::Approved && r.is_upcoming(now))
        {
            info!("client {user_id} has upcoming reservations, not deleting");
            return Ok(false);
        }
        let ids: Vec<Ulid> = requests.iter().map(|r| r.id).collect();
        let removed = self.requests.delete_many(&ids).await?;
        info!("client {user_id} deleted: {removed} reservation requests dropped");
        Ok(true)
    }

    pub async fn can_delete_accommodation(&self, accommodation_id: Ulid) -> Result<bool, BookingError> {
        self.can_delete_accommodation_at(accommodation_id, now_ms()).await
    }

    /// Refuses while an Approved stay is upcoming. Otherwise deletes the
    /// accommodation's Approved requests and its calendar.
    pub async fn can_delete_accommodation_at(&self, accommodation_id: Ulid, now: Ms) -> Result<bool, BookingError> {
        let guard = self.ledger.lock(accommodation_id).await;
        let approved = self
            .requests
            .by_accommodation(accommodation_id, Some(RequestStatus::Approved))
            .await?;
        if approved.iter().any(|r| r.is_upcoming(now)) {
            return Ok(false);
        }
        let ids: Vec<Ulid> = approved.iter().map(|r| r.id).collect();
        self.requests.delete_many(&ids).await?;
        self.ledger.delete_locked(&guard, accommodation_id).await?;
        drop(guard);
        self.ledger.forget_lock(accommodation_id);
        Ok(true)
    }
}
