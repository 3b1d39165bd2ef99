pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::StoreError;
use crate::models::Seat;

pub use postgres::PgSeatStore;

/// Fields written by a booking commit. The store adds `status = Occupied`
/// itself as part of the conditional update.
#[derive(Debug, Clone)]
pub struct BookingUpdate {
    pub vacant_at: DateTime<Utc>,
    pub booked_by: String,
}

/// Inbound stream of row-level seat changes, in store commit order.
pub type SeatFeed = mpsc::Receiver<Seat>;

/// Owner of a live change subscription. The feed stays open until
/// [`unsubscribe`](SubscriptionHandle::unsubscribe) is called; dropping the
/// handle alone does not release it, so teardown has to be explicit.
#[derive(Debug)]
pub struct SubscriptionHandle {
    abort: AbortHandle,
}

impl SubscriptionHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Stop the pump task behind the feed. The feed channel closes once the
    /// task is gone, which ends any consumer loop reading from it.
    pub fn unsubscribe(self) {
        self.abort.abort();
    }
}

/// Contract with the system of record for seat rows.
///
/// The store, not the client, serializes concurrent booking attempts:
/// `commit_booking` must be atomic and fail with [`StoreError::Conflict`]
/// when the seat is no longer `Available`.
#[async_trait]
pub trait SeatStore: Send + Sync {
    /// Full snapshot of every seat, fetched once at startup.
    async fn fetch_all(&self) -> Result<Vec<Seat>, StoreError>;

    /// Identity of the local session, if one is signed in.
    async fn current_user(&self) -> Result<Option<String>, StoreError>;

    /// Conditional update: Occupied/vacant_at/booked_by, applied only while
    /// the row is still `Available`. Returns the post-update row.
    async fn commit_booking(
        &self,
        seat_id: &str,
        update: &BookingUpdate,
    ) -> Result<Seat, StoreError>;

    /// Open a standing subscription to seat changes.
    async fn subscribe(&self) -> Result<(SeatFeed, SubscriptionHandle), StoreError>;
}
