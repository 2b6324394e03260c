use async_trait::async_trait;
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;

use super::{Store, UnavailabilityStore};

#[async_trait]
impl UnavailabilityStore for Store {
    async fn get_by_accommodation(&self, accommodation_id: Ulid) -> Result<Option<Unavailability>, BookingError> {
        Ok(self.entries.get(&accommodation_id).map(|e| e.value().clone()))
    }

    async fn insert(&self, entry: Unavailability) -> Result<(), BookingError> {
        if self.entries.contains_key(&entry.accommodation_id) {
            return Err(BookingError::AlreadyExists(entry.accommodation_id));
        }
        let accommodation_id = entry.accommodation_id;
        self.commit(Event::AccommodationRegistered {
            id: entry.id,
            accommodation_id,
            accommodation_name: entry.accommodation_name,
            host_id: entry.host_id,
            auto_approve: entry.auto_approve,
        })
        .await?;
        if !entry.periods.is_empty() {
            self.commit(Event::PeriodsReplaced {
                accommodation_id,
                periods: entry.periods,
            })
            .await?;
        }
        Ok(())
    }

    async fn update(&self, entry: &Unavailability) -> Result<(), BookingError> {
        if !self.entries.contains_key(&entry.accommodation_id) {
            return Err(BookingError::NotFound(entry.accommodation_id));
        }
        self.commit(Event::AccommodationUpdated {
            accommodation_id: entry.accommodation_id,
            accommodation_name: entry.accommodation_name.clone(),
            host_id: entry.host_id,
            auto_approve: entry.auto_approve,
        })
        .await
    }

    async fn replace_periods(
        &self,
        accommodation_id: Ulid,
        periods: Vec<UnavailabilityPeriod>,
    ) -> Result<(), BookingError> {
        if !self.entries.contains_key(&accommodation_id) {
            return Err(BookingError::NotFound(accommodation_id));
        }
        self.commit(Event::PeriodsReplaced {
            accommodation_id,
            periods,
        })
        .await
    }

    async fn get_by_host(&self, host_id: Ulid) -> Result<Vec<Unavailability>, BookingError> {
        let mut found: Vec<Unavailability> = self
            .entries
            .iter()
            .filter(|e| e.host_id == host_id)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| e.accommodation_id);
        Ok(found)
    }

    async fn delete_by_accommodation(&self, accommodation_id: Ulid) -> Result<bool, BookingError> {
        if !self.entries.contains_key(&accommodation_id) {
            return Ok(false);
        }
        self.commit(Event::AccommodationRemoved { accommodation_id }).await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<Unavailability>, BookingError> {
        let mut all: Vec<Unavailability> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|e| e.accommodation_id);
        Ok(all)
    }
}
