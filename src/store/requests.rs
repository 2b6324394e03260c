use async_trait::async_trait;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;

use super::{ReservationStore, Store, matches_window};

impl Store {
    /// Matching requests, ordered by arrival then id.
    fn collect_requests<F>(&self, keep: F) -> Vec<ReservationRequest>
    where
        F: Fn(&ReservationRequest) -> bool,
    {
        let mut found: Vec<ReservationRequest> = self
            .requests
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| (r.span.start, r.id));
        found
    }
}

fn status_matches(request: &ReservationRequest, status: Option<RequestStatus>) -> bool {
    status.is_none_or(|s| request.status == s)
}

#[async_trait]
impl ReservationStore for Store {
    async fn get(&self, id: Ulid) -> Result<Option<ReservationRequest>, BookingError> {
        Ok(self.requests.get(&id).map(|r| r.value().clone()))
    }

    async fn insert(&self, request: ReservationRequest) -> Result<(), BookingError> {
        if self.requests.contains_key(&request.id) {
            return Err(BookingError::AlreadyExists(request.id));
        }
        self.commit(Event::RequestStored { request }).await
    }

    async fn update(&self, request: &ReservationRequest) -> Result<(), BookingError> {
        if !self.requests.contains_key(&request.id) {
            return Err(BookingError::NotFound(request.id));
        }
        self.commit(Event::RequestStored {
            request: request.clone(),
        })
        .await
    }

    async fn delete(&self, id: Ulid) -> Result<bool, BookingError> {
        Ok(self.delete_many(&[id]).await? == 1)
    }

    async fn delete_many(&self, ids: &[Ulid]) -> Result<usize, BookingError> {
        let existing: Vec<Ulid> = ids
            .iter()
            .copied()
            .filter(|id| self.requests.contains_key(id))
            .collect();
        if existing.is_empty() {
            return Ok(0);
        }
        let count = existing.len();
        self.commit(Event::RequestsDeleted { ids: existing }).await?;
        Ok(count)
    }

    async fn by_accommodation(
        &self,
        accommodation_id: Ulid,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| r.accommodation_id == accommodation_id && status_matches(r, status)))
    }

    async fn by_client(
        &self,
        user_id: Ulid,
        status: Option<RequestStatus>,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| r.user_id == user_id && status_matches(r, status)))
    }

    async fn by_host_window(
        &self,
        host_id: Ulid,
        past: bool,
        search: Option<&str>,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| r.host_id == host_id && matches_window(r, past, search, now)))
    }

    async fn by_client_window(
        &self,
        user_id: Ulid,
        past: bool,
        search: Option<&str>,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| r.user_id == user_id && matches_window(r, past, search, now)))
    }

    async fn cancel_overlapping_pending(&self, accommodation_id: Ulid, span: Span) -> Result<Vec<Ulid>, BookingError> {
        let ids: Vec<Ulid> = self
            .collect_requests(|r| {
                r.accommodation_id == accommodation_id
                    && r.status == RequestStatus::Pending
                    && r.span.overlaps(&span)
            })
            .into_iter()
            .map(|r| r.id)
            .collect();
        if !ids.is_empty() {
            self.set_status_many(&ids, RequestStatus::DeclinedByHost).await?;
        }
        Ok(ids)
    }

    async fn delete_by_host(&self, host_id: Ulid) -> Result<usize, BookingError> {
        let ids: Vec<Ulid> = self
            .requests
            .iter()
            .filter(|r| r.host_id == host_id)
            .map(|r| r.id)
            .collect();
        self.delete_many(&ids).await
    }

    async fn past_approved_by_client_and_host(
        &self,
        user_id: Ulid,
        host_id: Ulid,
        now: Ms,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| {
            r.user_id == user_id
                && r.host_id == host_id
                && matches!(r.status, RequestStatus::Approved | RequestStatus::Completed)
                && r.span.end < now
        }))
    }

    async fn by_client_and_accommodation(
        &self,
        user_id: Ulid,
        accommodation_id: Ulid,
    ) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| r.user_id == user_id && r.accommodation_id == accommodation_id))
    }

    async fn ended_approved(&self, now: Ms) -> Result<Vec<ReservationRequest>, BookingError> {
        Ok(self.collect_requests(|r| r.status == RequestStatus::Approved && r.span.end <= now))
    }

    async fn set_status_many(&self, ids: &[Ulid], status: RequestStatus) -> Result<(), BookingError> {
        if let Some(missing) = ids.iter().find(|id| !self.requests.contains_key(id)) {
            return Err(BookingError::NotFound(*missing));
        }
        if ids.is_empty() {
            return Ok(());
        }
        self.commit(Event::RequestStatusChanged {
            ids: ids.to_vec(),
            status,
        })
        .await
    }
}
