//! Reconciler behavior against a simulated backing store: optimistic
//! rollback, race arbitration, watch-list notifications, and feed teardown.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

use seatmap::error::{ReserveError, StoreError};
use seatmap::models::{Seat, SeatStatus};
use seatmap::notify::MemoryNotifier;
use seatmap::reconciler::{drive_feed, Reconciler, WatchOutcome};
use seatmap::store::{BookingUpdate, SeatFeed, SeatStore, SubscriptionHandle};
use seatmap::watchlist::WatchList;

/* ---------- simulated backing store ---------- */

struct MockInner {
    seats: HashMap<String, Seat>,
    commit_calls: usize,
    fail_commits: bool,
    feeds: Vec<mpsc::Sender<Seat>>,
}

#[derive(Clone)]
struct MockStore {
    inner: Arc<Mutex<MockInner>>,
    user: Option<String>,
}

impl MockStore {
    fn with_seats(seats: Vec<Seat>) -> Self {
        let seats = seats.into_iter().map(|s| (s.id.clone(), s)).collect();
        MockStore {
            inner: Arc::new(Mutex::new(MockInner {
                seats,
                commit_calls: 0,
                fail_commits: false,
                feeds: Vec::new(),
            })),
            user: Some("u1".to_string()),
        }
    }

    fn as_user(&self, user: Option<&str>) -> Self {
        MockStore {
            inner: self.inner.clone(),
            user: user.map(str::to_string),
        }
    }

    fn fail_commits(&self) {
        self.inner.lock().unwrap().fail_commits = true;
    }

    fn commit_calls(&self) -> usize {
        self.inner.lock().unwrap().commit_calls
    }

    fn stored_seat(&self, seat_id: &str) -> Option<Seat> {
        self.inner.lock().unwrap().seats.get(seat_id).cloned()
    }

    /// Deliver a row change to every open subscription.
    async fn push_event(&self, seat: Seat) {
        let txs: Vec<_> = self.inner.lock().unwrap().feeds.clone();
        for tx in txs {
            let _ = tx.send(seat.clone()).await;
        }
    }
}

#[async_trait]
impl SeatStore for MockStore {
    async fn fetch_all(&self) -> Result<Vec<Seat>, StoreError> {
        let mut seats: Vec<Seat> = self.inner.lock().unwrap().seats.values().cloned().collect();
        seats.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(seats)
    }

    async fn current_user(&self) -> Result<Option<String>, StoreError> {
        Ok(self.user.clone())
    }

    async fn commit_booking(
        &self,
        seat_id: &str,
        update: &BookingUpdate,
    ) -> Result<Seat, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.commit_calls += 1;

        if inner.fail_commits {
            return Err(StoreError::Backend("simulated store outage".to_string()));
        }

        let seat = inner
            .seats
            .get_mut(seat_id)
            .ok_or_else(|| StoreError::Backend(format!("no such seat: {seat_id}")))?;
        if seat.status != SeatStatus::Available {
            return Err(StoreError::Conflict(seat_id.to_string()));
        }

        seat.status = SeatStatus::Occupied;
        seat.vacant_at = Some(update.vacant_at);
        seat.booked_by = Some(update.booked_by.clone());
        Ok(seat.clone())
    }

    async fn subscribe(&self) -> Result<(SeatFeed, SubscriptionHandle), StoreError> {
        let (pump_tx, mut pump_rx) = mpsc::channel::<Seat>(16);
        let (out_tx, out_rx) = mpsc::channel::<Seat>(16);
        self.inner.lock().unwrap().feeds.push(pump_tx);

        let task = tokio::spawn(async move {
            while let Some(seat) = pump_rx.recv().await {
                if out_tx.send(seat).await.is_err() {
                    break;
                }
            }
        });

        Ok((out_rx, SubscriptionHandle::new(task.abort_handle())))
    }
}

/* ---------- helpers ---------- */

fn seat(id: &str, status: SeatStatus) -> Seat {
    Seat {
        id: id.to_string(),
        status,
        vacant_at: None,
        booked_by: None,
        seat_type: None,
        parent: None,
    }
}

fn occupied(id: &str, by: &str) -> Seat {
    Seat {
        vacant_at: Some(Utc::now() + Duration::minutes(90)),
        booked_by: Some(by.to_string()),
        ..seat(id, SeatStatus::Occupied)
    }
}

struct Harness {
    reconciler: Reconciler<MockStore>,
    notifier: Arc<MemoryNotifier>,
    _dir: TempDir,
    watchlist_path: std::path::PathBuf,
}

async fn start(store: MockStore) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("watchlist.json");
    let notifier = Arc::new(MemoryNotifier::default());
    let reconciler = Reconciler::start(store, WatchList::load(&path), notifier.clone())
        .await
        .unwrap();
    Harness {
        reconciler,
        notifier,
        _dir: dir,
        watchlist_path: path,
    }
}

fn persisted_watchlist(path: &std::path::Path) -> Vec<String> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/* ---------- tests ---------- */

#[tokio::test]
async fn book_without_selection_short_circuits() {
    let store = MockStore::with_seats(vec![seat("A", SeatStatus::Available)]);
    let mut h = start(store.clone()).await;

    let err = h.reconciler.book(60).await.unwrap_err();
    assert!(matches!(err, ReserveError::NotSelected));
    // Precondition failures never reach the store
    assert_eq!(store.commit_calls(), 0);
}

#[tokio::test]
async fn book_occupied_seat_short_circuits() {
    let store = MockStore::with_seats(vec![occupied("B", "someone-else")]);
    let mut h = start(store.clone()).await;

    h.reconciler.select_seat("B");
    let err = h.reconciler.book(60).await.unwrap_err();
    assert!(matches!(err, ReserveError::AlreadyOccupied(id) if id == "B"));
    assert_eq!(store.commit_calls(), 0);
}

#[tokio::test]
async fn book_without_identity_fails_before_commit() {
    let store = MockStore::with_seats(vec![seat("A", SeatStatus::Available)]);
    let mut h = start(store.as_user(None)).await;

    h.reconciler.select_seat("A");
    let err = h.reconciler.book(60).await.unwrap_err();
    assert!(matches!(err, ReserveError::Unauthenticated));
    assert_eq!(store.commit_calls(), 0);
    // Nothing leaked into the cache either
    assert!(h.reconciler.selected_seat().unwrap().is_available());
}

#[tokio::test]
async fn failed_commit_rolls_back_the_optimistic_update() {
    let store = MockStore::with_seats(vec![seat("S", SeatStatus::Available)]);
    store.fail_commits();
    let mut h = start(store.clone()).await;

    h.reconciler.select_seat("S");
    let err = h.reconciler.book(60).await.unwrap_err();
    assert!(matches!(err, ReserveError::BookingFailed(msg) if msg.contains("simulated")));

    // Cache restored to the pre-booking snapshot, selection untouched
    let cached = h.reconciler.selected_seat().unwrap();
    assert_eq!(cached.status, SeatStatus::Available);
    assert_eq!(cached.vacant_at, None);
    assert_eq!(cached.booked_by, None);
    assert_eq!(store.commit_calls(), 1);
}

#[tokio::test]
async fn concurrent_bookings_resolve_to_exactly_one_winner() {
    let store = MockStore::with_seats(vec![seat("I-9", SeatStatus::Available)]);
    let mut h1 = start(store.as_user(Some("u1"))).await;
    let mut h2 = start(store.as_user(Some("u2"))).await;

    h1.reconciler.select_seat("I-9");
    h2.reconciler.select_seat("I-9");

    let (r1, r2) = tokio::join!(h1.reconciler.book(60), h2.reconciler.book(60));

    let (winner, loser_err) = match (r1, r2) {
        (Ok(seat), Err(err)) => (("u1", seat, &h1, &h2), err),
        (Err(err), Ok(seat)) => (("u2", seat, &h2, &h1), err),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    let (user, confirmed, won, lost) = winner;

    assert!(matches!(loser_err, ReserveError::BookingFailed(_)));
    assert_eq!(confirmed.status, SeatStatus::Occupied);
    assert_eq!(confirmed.booked_by.as_deref(), Some(user));

    // The store holds the winning commit and the winner's cache matches it
    let stored = store.stored_seat("I-9").unwrap();
    assert_eq!(stored, confirmed);
    assert_eq!(won.reconciler.seat("I-9"), Some(&stored));

    // The loser rolled back to its pre-booking view
    assert_eq!(
        lost.reconciler.seat("I-9").unwrap().status,
        SeatStatus::Available
    );
    assert_eq!(store.commit_calls(), 2);
}

#[tokio::test]
async fn successful_booking_adopts_authoritative_row_and_clears_selection() {
    let store = MockStore::with_seats(vec![
        seat("A", SeatStatus::Available),
        occupied("B", "someone-else"),
        seat("C", SeatStatus::Available),
    ]);
    let mut h = start(store.clone()).await;

    h.reconciler.select_seat("A");
    let confirmed = h.reconciler.book(30).await.unwrap();

    assert_eq!(confirmed.status, SeatStatus::Occupied);
    assert_eq!(confirmed.booked_by.as_deref(), Some("u1"));
    assert!(confirmed.vacant_at.is_some());

    // Cache entry is exactly the row the store returned
    assert_eq!(h.reconciler.seat("A"), Some(&store.stored_seat("A").unwrap()));
    assert!(h.reconciler.selected_seat().is_none());

    let stats = h.reconciler.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.occupied, 2);
    assert_eq!(stats.available, 1);
}

#[tokio::test]
async fn watch_is_idempotent() {
    let store = MockStore::with_seats(vec![occupied("I-5", "someone-else")]);
    let mut h = start(store).await;

    h.reconciler.select_seat("I-5");
    assert_eq!(h.reconciler.watch_selected().unwrap(), WatchOutcome::Added);
    assert_eq!(
        h.reconciler.watch_selected().unwrap(),
        WatchOutcome::AlreadyWatching
    );

    assert_eq!(persisted_watchlist(&h.watchlist_path), ["I-5".to_string()]);
}

#[tokio::test]
async fn watch_selected_requires_a_selection() {
    let store = MockStore::with_seats(vec![seat("A", SeatStatus::Available)]);
    let mut h = start(store).await;

    assert!(matches!(
        h.reconciler.watch_selected(),
        Err(ReserveError::NotSelected)
    ));
}

#[tokio::test]
async fn watched_seat_becoming_available_notifies_exactly_once() {
    let store = MockStore::with_seats(vec![occupied("I-5", "someone-else")]);
    let mut h = start(store).await;

    h.reconciler.watch("I-5");

    // Not a transition to Available: no notification
    h.reconciler.apply_change(occupied("I-5", "someone-else"));
    assert!(h.notifier.messages().is_empty());

    h.reconciler.apply_change(seat("I-5", SeatStatus::Available));
    assert_eq!(h.notifier.messages(), ["Seat I-5 is now available"]);
    assert!(persisted_watchlist(&h.watchlist_path).is_empty());

    // Identical repeat event: id already gone from the watch-list
    h.reconciler.apply_change(seat("I-5", SeatStatus::Available));
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn watch_fires_independently_of_selection() {
    let store = MockStore::with_seats(vec![
        occupied("I-5", "someone-else"),
        seat("C", SeatStatus::Available),
    ]);
    let mut h = start(store).await;

    h.reconciler.watch("I-5");
    h.reconciler.select_seat("C");

    h.reconciler.apply_change(seat("I-5", SeatStatus::Available));
    assert_eq!(h.notifier.messages().len(), 1);
    assert_eq!(h.reconciler.selected_seat().unwrap().id, "C");
}

#[tokio::test]
async fn feed_events_fold_into_the_cache_until_unsubscribed() {
    let store = MockStore::with_seats(vec![seat("A", SeatStatus::Available)]);
    let h = start(store.clone()).await;
    let reconciler = Arc::new(tokio::sync::Mutex::new(h.reconciler));

    let (feed, subscription) = store.subscribe().await.unwrap();
    let driver = drive_feed(reconciler.clone(), feed);

    store.push_event(occupied("A", "u2")).await;

    // Wait for the driver to fold the event in
    for _ in 0..100 {
        if reconciler.lock().await.seat("A").unwrap().status == SeatStatus::Occupied {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(
        reconciler.lock().await.seat("A").unwrap().booked_by.as_deref(),
        Some("u2")
    );

    // Released subscriptions must never mutate the cache again
    subscription.unsubscribe();
    driver.await.unwrap();
    store.push_event(seat("A", SeatStatus::Available)).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(
        reconciler.lock().await.seat("A").unwrap().status,
        SeatStatus::Occupied
    );
}

#[tokio::test]
async fn snapshot_orders_seats_and_reports_stats() {
    let store = MockStore::with_seats(vec![
        seat("C", SeatStatus::Available),
        occupied("A", "u2"),
        seat("B", SeatStatus::Available),
    ]);
    let mut h = start(store).await;
    h.reconciler.select_seat("B");

    let view = h.reconciler.snapshot();
    assert!(!view.loading);
    let ids: Vec<_> = view.seats.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["A", "B", "C"]);
    assert_eq!(view.selected_seat.unwrap().id, "B");
    assert_eq!(view.stats.percent, 33);
}

#[tokio::test]
async fn snapshot_failure_surfaces_as_sync_error() {
    // A store whose snapshot always fails keeps the component in Loading
    struct BrokenStore;

    #[async_trait]
    impl SeatStore for BrokenStore {
        async fn fetch_all(&self) -> Result<Vec<Seat>, StoreError> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        async fn current_user(&self) -> Result<Option<String>, StoreError> {
            Ok(Some("u1".to_string()))
        }
        async fn commit_booking(
            &self,
            _seat_id: &str,
            _update: &BookingUpdate,
        ) -> Result<Seat, StoreError> {
            unreachable!("no commit without a snapshot")
        }
        async fn subscribe(&self) -> Result<(SeatFeed, SubscriptionHandle), StoreError> {
            unreachable!("no subscription without a snapshot")
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let err = Reconciler::start(
        BrokenStore,
        WatchList::load(dir.path().join("watchlist.json")),
        Arc::new(MemoryNotifier::default()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ReserveError::Sync(msg) if msg.contains("connection refused")));
}
