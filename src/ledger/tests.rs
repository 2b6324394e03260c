use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::notify::testing::RecordingPublisher;
use crate::store::Store;

const T: Ms = 1_800_000_000_000;
const H: Ms = HOUR_MS;

struct Fixture {
    store: Arc<Store>,
    publisher: Arc<RecordingPublisher>,
    ledger: Arc<Ledger>,
}

fn fixture() -> Fixture {
    let store = Arc::new(Store::in_memory());
    let publisher = Arc::new(RecordingPublisher::default());
    let ledger = Arc::new(Ledger::new(store.clone(), store.clone(), publisher.clone()));
    Fixture {
        store,
        publisher,
        ledger,
    }
}

fn span(start_h: Ms, end_h: Ms) -> Span {
    Span::new(T + start_h * H, T + end_h * H)
}

fn pending(accommodation_id: Ulid, host_id: Ulid, s: Span) -> ReservationRequest {
    ReservationRequest {
        id: Ulid::new(),
        accommodation_id,
        accommodation_name: "Garden Flat".into(),
        host_id,
        user_id: Ulid::new(),
        span: s,
        guest_count: 1,
        total_price: 80.0,
        status: RequestStatus::Pending,
    }
}

async fn registered(f: &Fixture) -> (Ulid, Ulid) {
    let acc = Ulid::new();
    let host = Ulid::new();
    f.ledger.create(acc, "Garden Flat", host, false).await.unwrap();
    (acc, host)
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn create_then_get() {
    let f = fixture();
    let (acc, host) = registered(&f).await;
    let entry = f.ledger.get(acc).await.unwrap().unwrap();
    assert_eq!(entry.accommodation_id, acc);
    assert_eq!(entry.host_id, host);
    assert!(entry.periods.is_empty());
    assert!(!entry.auto_approve);
}

#[tokio::test]
async fn create_twice_is_already_exists() {
    let f = fixture();
    let (acc, host) = registered(&f).await;
    let err = f.ledger.create(acc, "Again", host, true).await.unwrap_err();
    assert_eq!(err, BookingError::AlreadyExists(acc));
}

#[tokio::test]
async fn create_rejects_long_name() {
    let f = fixture();
    let name = "x".repeat(MAX_NAME_LEN + 1);
    let err = f.ledger.create(Ulid::new(), &name, Ulid::new(), false).await.unwrap_err();
    assert!(matches!(err, BookingError::LimitExceeded(_)));
}

#[tokio::test]
async fn update_keeps_periods() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(0, 10), Reason::OwnerSet).await.unwrap();

    let new_host = Ulid::new();
    let updated = f.ledger.update(acc, "Renamed", new_host, true).await.unwrap();
    assert_eq!(updated.accommodation_name, "Renamed");
    assert_eq!(updated.periods.len(), 1);
    assert!(f.ledger.is_auto_approve(acc).await.unwrap());
    assert_eq!(f.ledger.by_host(new_host).await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_entry_is_not_found() {
    let f = fixture();
    let acc = Ulid::new();
    assert_eq!(
        f.ledger.update(acc, "x", Ulid::new(), false).await.unwrap_err(),
        BookingError::NotFound(acc)
    );
    assert_eq!(
        f.ledger.add_period(acc, span(0, 1), Reason::OwnerSet).await.unwrap_err(),
        BookingError::NotFound(acc)
    );
    assert_eq!(
        f.ledger.release_reserved_span(acc, span(0, 1)).await.unwrap_err(),
        BookingError::NotFound(acc)
    );
    assert_eq!(
        f.ledger.delete_owner_block(acc, span(0, 1)).await.unwrap_err(),
        BookingError::NotFound(acc)
    );
    assert_eq!(f.ledger.is_auto_approve(acc).await.unwrap_err(), BookingError::NotFound(acc));
}

#[tokio::test]
async fn delete_removes_entry() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    assert!(f.ledger.delete(acc).await.unwrap());
    assert!(f.ledger.get(acc).await.unwrap().is_none());
    assert!(!f.ledger.delete(acc).await.unwrap());
    assert!(f.ledger.list().await.unwrap().is_empty());
    assert_eq!(f.ledger.tracked_locks(), 0);
}

#[tokio::test]
async fn forget_lock_keeps_held_locks() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    let guard = f.ledger.lock(acc).await;
    f.ledger.forget_lock(acc);
    assert_eq!(f.ledger.tracked_locks(), 1);

    // A waiter queued behind the guard still gets the same mutex.
    let ledger = f.ledger.clone();
    let waiter = tokio::spawn(async move { ledger.add_period(acc, span(0, 1), Reason::OwnerSet).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    drop(guard);
    waiter.await.unwrap().unwrap();

    f.ledger.forget_lock(acc);
    assert_eq!(f.ledger.tracked_locks(), 0);
}

#[tokio::test]
async fn lock_many_dedups_and_blocks_single_locks() {
    let f = fixture();
    let (a, _) = registered(&f).await;
    let (b, _) = registered(&f).await;
    let guards = f.ledger.lock_many([b, a, b]).await;
    assert_eq!(guards.len(), 2);

    let ledger = f.ledger.clone();
    let blocked = tokio::spawn(async move { ledger.add_period(a, span(0, 1), Reason::OwnerSet).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());
    drop(guards);
    blocked.await.unwrap().unwrap();
}

// ── add_period ───────────────────────────────────────────

#[tokio::test]
async fn reserved_overlap_conflicts_without_change() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    let entry = f.ledger.add_period(acc, span(10, 20), Reason::Reserved).await.unwrap();
    let reserved_id = entry.periods[0].id;

    for reason in [Reason::Reserved, Reason::OwnerSet] {
        let err = f.ledger.add_period(acc, span(15, 25), reason).await.unwrap_err();
        assert_eq!(err, BookingError::Conflict(reserved_id));
    }
    let after = f.ledger.get(acc).await.unwrap().unwrap();
    assert_eq!(after.periods, entry.periods);
}

#[tokio::test]
async fn touching_reserved_coalesces() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(10, 20), Reason::Reserved).await.unwrap();
    let entry = f.ledger.add_period(acc, span(20, 30), Reason::Reserved).await.unwrap();
    assert_eq!(entry.periods.len(), 1);
    assert_eq!(entry.periods[0].span, span(10, 30));
}

#[tokio::test]
async fn owner_blocks_coalesce_and_coexist_with_reserved() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(0, 10), Reason::OwnerSet).await.unwrap();
    f.ledger.add_period(acc, span(5, 15), Reason::OwnerSet).await.unwrap();
    let entry = f.ledger.add_period(acc, span(12, 20), Reason::Reserved).await.unwrap();

    let owner: Vec<_> = entry.periods.iter().filter(|p| !p.is_reserved()).collect();
    let reserved: Vec<_> = entry.periods.iter().filter(|p| p.is_reserved()).collect();
    assert_eq!(owner.len(), 1);
    assert_eq!(owner[0].span, span(0, 15));
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].span, span(12, 20));
}

#[tokio::test]
async fn add_period_declines_overlapping_pending() {
    let f = fixture();
    let (acc, host) = registered(&f).await;
    let hit = pending(acc, host, span(5, 15));
    let miss = pending(acc, host, span(20, 30));
    ReservationStore::insert(f.store.as_ref(), hit.clone()).await.unwrap();
    ReservationStore::insert(f.store.as_ref(), miss.clone()).await.unwrap();

    f.ledger.add_period(acc, span(10, 20), Reason::OwnerSet).await.unwrap();

    let hit = ReservationStore::get(f.store.as_ref(), hit.id).await.unwrap().unwrap();
    let miss = ReservationStore::get(f.store.as_ref(), miss.id).await.unwrap().unwrap();
    assert_eq!(hit.status, RequestStatus::DeclinedByHost);
    assert_eq!(miss.status, RequestStatus::Pending);
}

#[tokio::test]
async fn add_period_validates_span() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    let err = f
        .ledger
        .add_period(acc, Span::new(0, 1_000), Reason::OwnerSet)
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::LimitExceeded("timestamp out of range"));

    let too_wide = Span::new(T, T + MAX_SPAN_DURATION_MS + 1);
    let err = f.ledger.add_period(acc, too_wide, Reason::OwnerSet).await.unwrap_err();
    assert_eq!(err, BookingError::LimitExceeded("span too wide"));
}

#[tokio::test]
async fn concurrent_add_period_does_not_lose_updates() {
    let f = fixture();
    let (acc, _) = registered(&f).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = f.ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.add_period(acc, span(i * 10, i * 10 + 5), Reason::OwnerSet).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let entry = f.ledger.get(acc).await.unwrap().unwrap();
    assert_eq!(entry.periods.len(), 20);
}

// ── Removal ──────────────────────────────────────────────

#[tokio::test]
async fn release_reserved_span_leaves_owner_blocks() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(0, 10), Reason::OwnerSet).await.unwrap();
    f.ledger.add_period(acc, span(10, 20), Reason::Reserved).await.unwrap();

    let entry = f.ledger.release_reserved_span(acc, span(0, 20)).await.unwrap();
    assert_eq!(entry.periods.len(), 1);
    assert_eq!(entry.periods[0].reason, Reason::OwnerSet);
    assert_eq!(entry.periods[0].span, span(0, 10));
}

#[tokio::test]
async fn release_middle_of_merged_reservation_splits_it() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(0, 10), Reason::Reserved).await.unwrap();
    f.ledger.add_period(acc, span(10, 20), Reason::Reserved).await.unwrap();
    f.ledger.add_period(acc, span(20, 30), Reason::Reserved).await.unwrap();

    let entry = f.ledger.release_reserved_span(acc, span(10, 20)).await.unwrap();
    let spans: Vec<Span> = entry.periods.iter().map(|p| p.span).collect();
    assert_eq!(spans, vec![span(0, 10), span(20, 30)]);
    assert_ne!(entry.periods[0].id, entry.periods[1].id);
}

#[tokio::test]
async fn delete_owner_block_keeps_reserved() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(0, 10), Reason::Reserved).await.unwrap();
    f.ledger.add_period(acc, span(10, 40), Reason::OwnerSet).await.unwrap();

    let entry = f.ledger.delete_owner_block(acc, span(0, 20)).await.unwrap();
    let spans: Vec<(Span, Reason)> = entry.periods.iter().map(|p| (p.span, p.reason)).collect();
    assert_eq!(spans, vec![(span(0, 10), Reason::Reserved), (span(20, 40), Reason::OwnerSet)]);
}

// ── filter_available ─────────────────────────────────────

#[tokio::test]
async fn filter_available_boundaries() {
    let f = fixture();
    let (acc, _) = registered(&f).await;
    f.ledger.add_period(acc, span(10, 20), Reason::OwnerSet).await.unwrap();
    let unknown = Ulid::new();

    let ids = [acc, unknown];
    assert_eq!(f.ledger.filter_available(&ids, span(15, 18)).await.unwrap(), vec![unknown]);
    assert_eq!(f.ledger.filter_available(&ids, span(5, 12)).await.unwrap(), vec![unknown]);
    assert_eq!(f.ledger.filter_available(&ids, span(20, 30)).await.unwrap(), vec![acc, unknown]);
    assert_eq!(f.ledger.filter_available(&ids, span(0, 10)).await.unwrap(), vec![acc, unknown]);
}

#[tokio::test]
async fn filter_available_rejects_oversized_input() {
    let f = fixture();
    let ids: Vec<Ulid> = (0..=MAX_IDS_PER_FILTER).map(|_| Ulid::new()).collect();
    let err = f.ledger.filter_available(&ids, span(0, 1)).await.unwrap_err();
    assert!(matches!(err, BookingError::LimitExceeded(_)));
}

// ── delete_host ──────────────────────────────────────────

#[tokio::test]
async fn delete_host_refused_with_upcoming_reservation() {
    let f = fixture();
    let (acc, host) = registered(&f).await;
    f.ledger.add_period(acc, span(48, 72), Reason::Reserved).await.unwrap();
    let req = pending(acc, host, span(100, 110));
    ReservationStore::insert(f.store.as_ref(), req.clone()).await.unwrap();

    assert!(!f.ledger.delete_host_at(host, T).await.unwrap());
    assert!(f.publisher.take().is_empty());
    assert!(ReservationStore::get(f.store.as_ref(), req.id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_host_publishes_and_drops_requests() {
    let f = fixture();
    let (acc, host) = registered(&f).await;
    // Past reservation and a future owner block do not hold the host back.
    f.ledger.add_period(acc, span(0, 10), Reason::Reserved).await.unwrap();
    f.ledger.add_period(acc, span(100, 200), Reason::OwnerSet).await.unwrap();
    let req = pending(acc, host, span(300, 310));
    ReservationStore::insert(f.store.as_ref(), req.clone()).await.unwrap();

    assert!(f.ledger.delete_host_at(host, T + 50 * H).await.unwrap());
    assert_eq!(
        f.publisher.take(),
        vec![(Topic::AccommodationDelete, Notification::HostDeleted { host_id: host })]
    );
    assert!(ReservationStore::get(f.store.as_ref(), req.id).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_host_waits_for_reservation_in_progress() {
    let f = fixture();
    let (acc, host) = registered(&f).await;
    let req = pending(acc, host, span(100, 110));
    ReservationStore::insert(f.store.as_ref(), req.clone()).await.unwrap();

    let guard = f.ledger.lock(acc).await;
    let ledger = f.ledger.clone();
    let deletion = tokio::spawn(async move { ledger.delete_host_at(host, T).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!deletion.is_finished());

    // The reservation lands before the deletion gets the accommodation.
    f.ledger
        .add_period_locked(&guard, acc, span(48, 72), Reason::Reserved)
        .await
        .unwrap();
    drop(guard);

    assert!(!deletion.await.unwrap().unwrap());
    assert!(f.publisher.take().is_empty());
    assert!(ReservationStore::get(f.store.as_ref(), req.id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_host_survives_publish_failure() {
    let store = Arc::new(Store::in_memory());
    let ledger = Ledger::new(store.clone(), store.clone(), Arc::new(RecordingPublisher::failing()));
    let host = Ulid::new();
    assert!(ledger.delete_host_at(host, T).await.unwrap());
}
