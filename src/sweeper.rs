use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::now_ms;
use crate::store::Store;
use crate::workflow::Workflow;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that marks approved stays as completed once they end.
pub async fn run_sweeper(workflow: Arc<Workflow>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match workflow.complete_elapsed(now_ms()).await {
            Ok(0) => {}
            Ok(n) => info!("completed {n} elapsed reservations"),
            Err(e) => warn!("sweep failed: {e}"),
        }
    }
}

/// Rewrite the WAL whenever more than `threshold` events were appended
/// since the last compaction.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    if !store.is_durable() {
        return;
    }
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            debug!("compactor skip: {appends} appends since last compaction");
            continue;
        }
        if let Err(e) = store.compact().await {
            warn!("compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::service::BookingService;
    use ulid::Ulid;

    #[tokio::test]
    async fn sweeper_completes_stays_that_ended() {
        let service = BookingService::in_memory();
        let acc = Ulid::new();
        service.ledger.create(acc, "Pine Cabin", Ulid::new(), true).await.unwrap();

        let now = now_ms();
        let request = service
            .workflow
            .submit(NewReservationRequest {
                accommodation_id: acc,
                user_id: Ulid::new(),
                span: Span::new(now + 2 * HOUR_MS, now + 3 * HOUR_MS),
                guest_count: 2,
                total_price: 90.0,
            })
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Approved);

        assert_eq!(tokio_test::assert_ok!(service.workflow.complete_elapsed(now).await), 0);
        assert_eq!(service.workflow.complete_elapsed(now + 4 * HOUR_MS).await.unwrap(), 1);
        let done = service.workflow.get(request.id).await.unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn sweeper_loop_completes_past_stays() {
        let service = BookingService::in_memory();
        let acc = Ulid::new();
        service.ledger.create(acc, "Harbor Loft", Ulid::new(), true).await.unwrap();

        let now = now_ms();
        let request = service
            .workflow
            .submit(NewReservationRequest {
                accommodation_id: acc,
                user_id: Ulid::new(),
                span: Span::new(now - 3 * DAY_MS, now - DAY_MS),
                guest_count: 1,
                total_price: 200.0,
            })
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Approved);

        let handle = tokio::spawn(run_sweeper(service.workflow.clone(), Duration::from_millis(10)));
        let mut status = RequestStatus::Approved;
        for _ in 0..100 {
            status = service.workflow.get(request.id).await.unwrap().status;
            if status == RequestStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn compactor_exits_for_volatile_store() {
        let store = Arc::new(Store::in_memory());
        // Returns immediately instead of looping forever.
        run_compactor(store, 1).await;
    }
}
