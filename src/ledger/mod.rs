//! Per-accommodation unavailability calendars.
//!
//! Every read-modify-write of an entry runs under that accommodation's async
//! mutex. Callers that already hold the guard (the workflow, during approval
//! and cancellation) use the `_locked` variants.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::BookingError;
use crate::intervals;
use crate::limits::*;
use crate::model::*;
use crate::notify::{EventPublisher, Notification, Topic, publish_or_warn};
use crate::observability;
use crate::store::{ReservationStore, UnavailabilityStore};

/// Proof that the caller holds an accommodation's lock.
pub type AccommodationGuard = OwnedMutexGuard<()>;

pub(crate) fn validate_span(span: &Span) -> Result<(), BookingError> {
    if span.end < span.start {
        return Err(BookingError::InvalidInput("span ends before it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::LimitExceeded("span too wide"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), BookingError> {
    if name.len() > MAX_NAME_LEN {
        return Err(BookingError::LimitExceeded("accommodation name too long"));
    }
    Ok(())
}

pub struct Ledger {
    store: Arc<dyn UnavailabilityStore>,
    requests: Arc<dyn ReservationStore>,
    publisher: Arc<dyn EventPublisher>,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn UnavailabilityStore>,
        requests: Arc<dyn ReservationStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            requests,
            publisher,
            locks: DashMap::new(),
        }
    }

    /// Serialize mutations of one accommodation.
    pub async fn lock(&self, accommodation_id: Ulid) -> AccommodationGuard {
        let lock = self.locks.entry(accommodation_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Lock several accommodations in id order. Duplicates are locked once.
    pub async fn lock_many(&self, accommodation_ids: impl IntoIterator<Item = Ulid>) -> Vec<AccommodationGuard> {
        let mut ids: Vec<Ulid> = accommodation_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Drop the lock table entry of a removed accommodation unless someone
    /// still holds or waits on it.
    pub fn forget_lock(&self, accommodation_id: Ulid) {
        self.locks
            .remove_if(&accommodation_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    async fn require(&self, accommodation_id: Ulid) -> Result<Unavailability, BookingError> {
        self.store
            .get_by_accommodation(accommodation_id)
            .await?
            .ok_or(BookingError::NotFound(accommodation_id))
    }

    // ── Entry lifecycle ──────────────────────────────────────

    pub async fn create(
        &self,
        accommodation_id: Ulid,
        name: &str,
        host_id: Ulid,
        auto_approve: bool,
    ) -> Result<Unavailability, BookingError> {
        validate_name(name)?;
        let _guard = self.lock(accommodation_id).await;
        if self.store.get_by_accommodation(accommodation_id).await?.is_some() {
            return Err(BookingError::AlreadyExists(accommodation_id));
        }
        let entry = Unavailability::new(accommodation_id, name.to_string(), host_id, auto_approve);
        self.store.insert(entry.clone()).await?;
        info!("registered accommodation {accommodation_id} for host {host_id} (auto_approve={auto_approve})");
        Ok(entry)
    }

    pub async fn update(
        &self,
        accommodation_id: Ulid,
        name: &str,
        host_id: Ulid,
        auto_approve: bool,
    ) -> Result<Unavailability, BookingError> {
        validate_name(name)?;
        let _guard = self.lock(accommodation_id).await;
        let mut entry = self.require(accommodation_id).await?;
        entry.accommodation_name = name.to_string();
        entry.host_id = host_id;
        entry.auto_approve = auto_approve;
        self.store.update(&entry).await?;
        Ok(entry)
    }

    pub async fn delete(&self, accommodation_id: Ulid) -> Result<bool, BookingError> {
        let guard = self.lock(accommodation_id).await;
        let removed = self.delete_locked(&guard, accommodation_id).await?;
        drop(guard);
        if removed {
            self.forget_lock(accommodation_id);
        }
        Ok(removed)
    }

    pub async fn delete_locked(&self, _guard: &AccommodationGuard, accommodation_id: Ulid) -> Result<bool, BookingError> {
        let removed = self.store.delete_by_accommodation(accommodation_id).await?;
        if removed {
            info!("removed accommodation {accommodation_id}");
        }
        Ok(removed)
    }

    // ── Periods ──────────────────────────────────────────────

    /// Block `span`. Fails with `Conflict` if a Reserved period strictly
    /// overlaps it; the entry is untouched in that case.
    pub async fn add_period(&self, accommodation_id: Ulid, span: Span, reason: Reason) -> Result<Unavailability, BookingError> {
        let guard = self.lock(accommodation_id).await;
        self.add_period_locked(&guard, accommodation_id, span, reason).await
    }

    pub async fn add_period_locked(
        &self,
        _guard: &AccommodationGuard,
        accommodation_id: Ulid,
        span: Span,
        reason: Reason,
    ) -> Result<Unavailability, BookingError> {
        validate_span(&span)?;
        let mut entry = self.require(accommodation_id).await?;

        if let Some(blocking) = intervals::reserved_overlap(&entry.periods, &span) {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            return Err(BookingError::Conflict(blocking.id));
        }
        if entry.periods.len() >= MAX_PERIODS_PER_ACCOMMODATION {
            return Err(BookingError::LimitExceeded("too many periods on accommodation"));
        }

        entry.periods = intervals::insert(UnavailabilityPeriod::new(span, reason), &entry.periods);
        self.store
            .replace_periods(accommodation_id, entry.periods.clone())
            .await?;

        let declined = self.requests.cancel_overlapping_pending(accommodation_id, span).await?;
        if !declined.is_empty() {
            debug!(
                "declined {} pending requests on {accommodation_id} overlapping [{}, {}]",
                declined.len(),
                span.start,
                span.end
            );
        }
        Ok(entry)
    }

    /// Free `span` from Reserved periods. Owner blocks stay.
    pub async fn release_reserved_span(&self, accommodation_id: Ulid, span: Span) -> Result<Unavailability, BookingError> {
        let guard = self.lock(accommodation_id).await;
        self.release_reserved_span_locked(&guard, accommodation_id, span).await
    }

    pub async fn release_reserved_span_locked(
        &self,
        _guard: &AccommodationGuard,
        accommodation_id: Ulid,
        span: Span,
    ) -> Result<Unavailability, BookingError> {
        self.remove_where(accommodation_id, span, Reason::Reserved).await
    }

    /// Free `span` from owner blocks. Reserved periods stay.
    pub async fn delete_owner_block(&self, accommodation_id: Ulid, span: Span) -> Result<Unavailability, BookingError> {
        let _guard = self.lock(accommodation_id).await;
        self.remove_where(accommodation_id, span, Reason::OwnerSet).await
    }

    async fn remove_where(&self, accommodation_id: Ulid, span: Span, reason: Reason) -> Result<Unavailability, BookingError> {
        validate_span(&span)?;
        let mut entry = self.require(accommodation_id).await?;
        entry.periods = intervals::subtract_where(&span, &entry.periods, |p| p.reason == reason);
        self.store
            .replace_periods(accommodation_id, entry.periods.clone())
            .await?;
        Ok(entry)
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn get(&self, accommodation_id: Ulid) -> Result<Option<Unavailability>, BookingError> {
        self.store.get_by_accommodation(accommodation_id).await
    }

    pub async fn by_host(&self, host_id: Ulid) -> Result<Vec<Unavailability>, BookingError> {
        self.store.get_by_host(host_id).await
    }

    pub async fn list(&self) -> Result<Vec<Unavailability>, BookingError> {
        self.store.list().await
    }

    pub async fn is_auto_approve(&self, accommodation_id: Ulid) -> Result<bool, BookingError> {
        Ok(self.require(accommodation_id).await?.auto_approve)
    }

    /// The subset of `accommodation_ids` free over `span`, in input order.
    /// Ids without a calendar count as free.
    pub async fn filter_available(&self, accommodation_ids: &[Ulid], span: Span) -> Result<Vec<Ulid>, BookingError> {
        if accommodation_ids.len() > MAX_IDS_PER_FILTER {
            return Err(BookingError::LimitExceeded("too many accommodation ids"));
        }
        validate_span(&span)?;

        let mut available = Vec::with_capacity(accommodation_ids.len());
        for &id in accommodation_ids {
            let free = match self.store.get_by_accommodation(id).await? {
                Some(entry) => intervals::is_free(&entry.periods, &span),
                None => true,
            };
            if free {
                available.push(id);
            }
        }
        Ok(available)
    }

    // ── Host removal ─────────────────────────────────────────

    pub async fn delete_host(&self, host_id: Ulid) -> Result<bool, BookingError> {
        self.delete_host_at(host_id, now_ms()).await
    }

    /// Refuses (`Ok(false)`) while any of the host's accommodations has a
    /// Reserved period starting after `now`. Otherwise announces the removal
    /// and drops the host's reservation requests.
    pub async fn delete_host_at(&self, host_id: Ulid, now: Ms) -> Result<bool, BookingError> {
        let (_guards, entries) = loop {
            let seen = self.store.get_by_host(host_id).await?;
            let guards = self.lock_many(seen.iter().map(|e| e.accommodation_id)).await;
            let entries = self.store.get_by_host(host_id).await?;
            if entries
                .iter()
                .all(|e| seen.iter().any(|s| s.accommodation_id == e.accommodation_id))
            {
                break (guards, entries);
            }
        };
        if entries.iter().any(|e| e.has_upcoming_reservation(now)) {
            info!("host {host_id} still has upcoming reservations, not deleting");
            return Ok(false);
        }

        publish_or_warn(
            self.publisher.as_ref(),
            Topic::AccommodationDelete,
            &Notification::HostDeleted { host_id },
        );
        let removed = self.requests.delete_by_host(host_id).await?;
        info!("host {host_id} deleted: {removed} reservation requests dropped");
        Ok(true)
    }
}
