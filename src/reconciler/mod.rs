//! Seat reservation reconciler.
//!
//! Owns the local view of the floor plan: a cache of seat rows keyed by id,
//! at most one selected seat, and the user's watch-list. Booking is a
//! two-phase commit at the client boundary: a speculative local apply for
//! perceived latency, then the store's conditional update as the single
//! arbiter of concurrent attempts, replacing the cache entry on success and
//! restoring the prior snapshot on failure.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ReserveError;
use crate::models::{Seat, SeatStats, SeatStatus};
use crate::notify::Notifier;
use crate::store::{BookingUpdate, SeatFeed, SeatStore};
use crate::watchlist::WatchList;

/// Result of a watch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchOutcome {
    Added,
    AlreadyWatching,
}

/// Read-only snapshot handed to the UI layer for rendering.
#[derive(Debug, Serialize)]
pub struct StateView {
    pub loading: bool,
    pub seats: Vec<Seat>,
    pub selected_seat: Option<Seat>,
    pub stats: SeatStats,
}

/// Phase 1 of a booking: the speculative row applied locally before the
/// store has confirmed anything. Pure so the two-phase flow is testable
/// without a network.
pub fn speculative_booking(prior: &Seat, user: &str, vacant_at: DateTime<Utc>) -> Seat {
    Seat {
        status: SeatStatus::Occupied,
        vacant_at: Some(vacant_at),
        booked_by: Some(user.to_string()),
        ..prior.clone()
    }
}

pub struct Reconciler<S> {
    store: S,
    user: Option<String>,
    seats: HashMap<String, Seat>,
    selected: Option<String>,
    watchlist: WatchList,
    notifier: Arc<dyn Notifier>,
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("user", &self.user)
            .field("seats", &self.seats)
            .field("selected", &self.selected)
            .field("watchlist", &self.watchlist)
            .finish_non_exhaustive()
    }
}

impl<S: SeatStore> Reconciler<S> {
    /// Establish the initialization contract: resolve the session identity
    /// and fetch the full seat snapshot, in that order. Until both succeed
    /// there is no reconciler, which is how `Loading -> Ready` stays
    /// one-way.
    pub async fn start(
        store: S,
        watchlist: WatchList,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ReserveError> {
        let user = store
            .current_user()
            .await
            .map_err(|err| ReserveError::Sync(err.to_string()))?;
        let snapshot = store
            .fetch_all()
            .await
            .map_err(|err| ReserveError::Sync(err.to_string()))?;

        let seats: HashMap<String, Seat> = snapshot
            .into_iter()
            .map(|seat| (seat.id.clone(), seat))
            .collect();
        info!(
            "Reconciler ready: {} seats, {} watched, user {:?}",
            seats.len(),
            watchlist.ids().len(),
            user
        );

        Ok(Self {
            store,
            user,
            seats,
            selected: None,
            watchlist,
            notifier,
        })
    }

    /// Select a seat for the booking sidebar. Pure local operation: no
    /// backend effect, never fails. An id missing from the cache leaves the
    /// selection as it was.
    pub fn select_seat(&mut self, seat_id: &str) {
        if self.seats.contains_key(seat_id) {
            self.selected = Some(seat_id.to_string());
        } else {
            debug!("Ignoring selection of unknown seat {}", seat_id);
        }
    }

    /// The selected seat as currently cached, so any local or inbound
    /// mutation is reflected immediately.
    pub fn selected_seat(&self) -> Option<&Seat> {
        self.selected.as_deref().and_then(|id| self.seats.get(id))
    }

    /// Book the selected seat for `duration_minutes`.
    ///
    /// Preconditions are checked in order with no store call: a selection
    /// must exist, the cached row must be `Available`, and the session must
    /// be signed in. Then the optimistic row goes into the cache, the
    /// conditional commit runs, and the cache ends up holding either the
    /// authoritative returned row (success, selection cleared) or the
    /// pre-booking snapshot (failure, selection kept).
    pub async fn book(&mut self, duration_minutes: u32) -> Result<Seat, ReserveError> {
        let seat_id = self.selected.clone().ok_or(ReserveError::NotSelected)?;
        let prior = self
            .seats
            .get(&seat_id)
            .cloned()
            .ok_or(ReserveError::NotSelected)?;
        if prior.status == SeatStatus::Occupied {
            return Err(ReserveError::AlreadyOccupied(seat_id));
        }
        let user = self.user.clone().ok_or(ReserveError::Unauthenticated)?;

        let vacant_at = Utc::now() + Duration::minutes(i64::from(duration_minutes));

        // Phase 1: speculative apply, prior snapshot retained for rollback
        let speculative = speculative_booking(&prior, &user, vacant_at);
        self.seats.insert(seat_id.clone(), speculative);

        // Phase 2: the store arbitrates the race
        let update = BookingUpdate {
            vacant_at,
            booked_by: user,
        };
        match self.store.commit_booking(&seat_id, &update).await {
            Ok(confirmed) => {
                info!("Seat {} booked until {:?}", seat_id, confirmed.vacant_at);
                self.seats.insert(seat_id, confirmed.clone());
                self.selected = None;
                Ok(confirmed)
            }
            Err(err) => {
                warn!("Booking of {} rejected, rolling back: {}", seat_id, err);
                self.seats.insert(seat_id, prior);
                Err(ReserveError::BookingFailed(err.to_string()))
            }
        }
    }

    /// Ask to be notified when `seat_id` becomes free. Idempotent: watching
    /// an already-watched seat is a reported no-op.
    pub fn watch(&mut self, seat_id: &str) -> WatchOutcome {
        if self.watchlist.add(seat_id) {
            info!("Watching seat {}", seat_id);
            WatchOutcome::Added
        } else {
            WatchOutcome::AlreadyWatching
        }
    }

    pub fn watch_selected(&mut self) -> Result<WatchOutcome, ReserveError> {
        let seat_id = self.selected.clone().ok_or(ReserveError::NotSelected)?;
        Ok(self.watch(&seat_id))
    }

    /// Fold one inbound change event into the cache, last write wins per
    /// id. Runs for every event regardless of what is selected; a watched
    /// seat turning `Available` fires exactly one notification and drops
    /// the id from the persisted list.
    pub fn apply_change(&mut self, seat: Seat) {
        debug!("Seat change: {} -> {}", seat.id, seat.status);
        let became_available = seat.status == SeatStatus::Available;
        let seat_id = seat.id.clone();
        self.seats.insert(seat_id.clone(), seat);

        if became_available && self.watchlist.remove(&seat_id) {
            self.notifier
                .notify(&format!("Seat {} is now available", seat_id));
        }
    }

    pub fn stats(&self) -> SeatStats {
        SeatStats::from_seats(self.seats.values())
    }

    pub fn snapshot(&self) -> StateView {
        let mut seats: Vec<Seat> = self.seats.values().cloned().collect();
        seats.sort_by(|a, b| a.id.cmp(&b.id));
        StateView {
            loading: false,
            seats,
            selected_seat: self.selected_seat().cloned(),
            stats: self.stats(),
        }
    }

    /// Current cached row for a seat id, if known.
    pub fn seat(&self, seat_id: &str) -> Option<&Seat> {
        self.seats.get(seat_id)
    }
}

/// Consume the change feed until the subscription is released. Once the
/// channel closes this task ends, so an unsubscribed feed can never mutate
/// the cache again.
pub fn drive_feed<S>(
    reconciler: Arc<Mutex<Reconciler<S>>>,
    mut feed: SeatFeed,
) -> JoinHandle<()>
where
    S: SeatStore + 'static,
{
    tokio::spawn(async move {
        while let Some(seat) = feed.recv().await {
            reconciler.lock().await.apply_change(seat);
        }
        debug!("Seat feed closed, reconciler no longer receiving changes");
    })
}
