use std::path::Path;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::error::BookingError;
use crate::model::*;
use crate::wal::Wal;

use super::commit::{WalCommand, wal_writer_loop};

/// In-memory state with optional write-ahead durability.
///
/// Every mutation is expressed as one [`Event`]: appended to the WAL first,
/// then applied to the maps.
pub struct Store {
    /// Ledger entries keyed by accommodation id.
    pub(super) entries: DashMap<Ulid, Unavailability>,
    /// Reservation requests keyed by request id.
    pub(super) requests: DashMap<Ulid, ReservationRequest>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Commits hold it shared; compaction takes it exclusively so the
    /// snapshot it writes contains every event already in the log.
    commit_gate: RwLock<()>,
}

impl Store {
    /// Volatile store, nothing written to disk.
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            requests: DashMap::new(),
            wal_tx: None,
            commit_gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path` (dropping any torn tail), then start the
    /// group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let events = Wal::recover(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            entries: DashMap::new(),
            requests: DashMap::new(),
            wal_tx: Some(wal_tx),
            commit_gate: RwLock::new(()),
        };
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            "replayed {} events from {}: {} accommodations, {} requests",
            events.len(),
            path.display(),
            store.entries.len(),
            store.requests.len()
        );
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.wal_tx.is_some()
    }

    /// Make `event` durable, then apply it.
    pub(super) async fn commit(&self, event: Event) -> Result<(), BookingError> {
        let _gate = self.commit_gate.read().await;
        if let Some(wal_tx) = &self.wal_tx {
            let (tx, rx) = oneshot::channel();
            wal_tx
                .send(WalCommand::Append {
                    event: event.clone(),
                    response: tx,
                })
                .await
                .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
            rx.await
                .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))??;
        }
        self.apply(&event);
        Ok(())
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::AccommodationRegistered {
                id,
                accommodation_id,
                accommodation_name,
                host_id,
                auto_approve,
            } => {
                let mut entry =
                    Unavailability::new(*accommodation_id, accommodation_name.clone(), *host_id, *auto_approve);
                entry.id = *id;
                self.entries.insert(*accommodation_id, entry);
            }
            Event::AccommodationUpdated {
                accommodation_id,
                accommodation_name,
                host_id,
                auto_approve,
            } => {
                if let Some(mut entry) = self.entries.get_mut(accommodation_id) {
                    entry.accommodation_name = accommodation_name.clone();
                    entry.host_id = *host_id;
                    entry.auto_approve = *auto_approve;
                }
            }
            Event::AccommodationRemoved { accommodation_id } => {
                self.entries.remove(accommodation_id);
            }
            Event::PeriodsReplaced {
                accommodation_id,
                periods,
            } => {
                if let Some(mut entry) = self.entries.get_mut(accommodation_id) {
                    entry.periods = periods.clone();
                }
            }
            Event::RequestStored { request } => {
                self.requests.insert(request.id, request.clone());
            }
            Event::RequestStatusChanged { ids, status } => {
                for id in ids {
                    if let Some(mut request) = self.requests.get_mut(id) {
                        request.status = *status;
                    }
                }
            }
            Event::RequestsDeleted { ids } => {
                for id in ids {
                    self.requests.remove(id);
                }
            }
        }
    }

    /// Minimal event list recreating the current state.
    fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.entries.len() * 2 + self.requests.len());
        for entry in self.entries.iter() {
            events.push(Event::AccommodationRegistered {
                id: entry.id,
                accommodation_id: entry.accommodation_id,
                accommodation_name: entry.accommodation_name.clone(),
                host_id: entry.host_id,
                auto_approve: entry.auto_approve,
            });
            if !entry.periods.is_empty() {
                events.push(Event::PeriodsReplaced {
                    accommodation_id: entry.accommodation_id,
                    periods: entry.periods.clone(),
                });
            }
        }
        for request in self.requests.iter() {
            events.push(Event::RequestStored {
                request: request.clone(),
            });
        }
        events
    }

    /// Rewrite the WAL from the current state. No-op for a volatile store.
    pub async fn compact(&self) -> Result<(), BookingError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::Storage("WAL writer dropped response".into()))??;
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
