use std::path::Path;
use std::sync::Arc;

use crate::ledger::Ledger;
use crate::notify::NotifyHub;
use crate::store::Store;
use crate::workflow::Workflow;

/// Everything a connection needs: the store, the notification hub, and the
/// ledger and workflow wired on top of them.
pub struct BookingService {
    pub store: Arc<Store>,
    pub notify: Arc<NotifyHub>,
    pub ledger: Arc<Ledger>,
    pub workflow: Arc<Workflow>,
}

impl BookingService {
    fn wire(store: Store) -> Self {
        let store = Arc::new(store);
        let notify = Arc::new(NotifyHub::new());
        let ledger = Arc::new(Ledger::new(store.clone(), store.clone(), notify.clone()));
        let workflow = Arc::new(Workflow::new(ledger.clone(), store.clone(), notify.clone()));
        Self {
            store,
            notify,
            ledger,
            workflow,
        }
    }

    pub fn in_memory() -> Self {
        Self::wire(Store::in_memory())
    }

    /// Durable service backed by the WAL at `wal_path`.
    pub fn open(wal_path: &Path) -> std::io::Result<Self> {
        Ok(Self::wire(Store::open(wal_path)?))
    }
}
