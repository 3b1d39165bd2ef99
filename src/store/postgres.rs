use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::FromRow;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::database::Database;
use crate::error::StoreError;
use crate::models::{Seat, User};
use crate::store::{BookingUpdate, SeatFeed, SeatStore, SubscriptionHandle};

// Notification channel fed by the row trigger in the seed migration
const SEAT_CHANNEL: &str = "lrc_seats_changed";

const FEED_BUFFER: usize = 256;

/// Backing store over the `lrc_seats` table. Change events arrive through
/// Postgres LISTEN/NOTIFY with the full row as a JSON payload.
#[derive(Clone)]
pub struct PgSeatStore {
    db: Database,
    session_email: Option<String>,
}

// Raw row shape; status comes back as text and is validated on the way out
#[derive(Debug, FromRow)]
struct SeatRow {
    id: String,
    status: String,
    vacant_at: Option<DateTime<Utc>>,
    booked_by: Option<String>,
    seat_type: Option<String>,
    parent: Option<String>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|err: String| StoreError::Backend(err))?;
        Ok(Seat {
            id: row.id,
            status,
            vacant_at: row.vacant_at,
            booked_by: row.booked_by,
            seat_type: row.seat_type,
            parent: row.parent,
        })
    }
}

impl PgSeatStore {
    pub fn new(db: Database, session_email: Option<String>) -> Self {
        Self { db, session_email }
    }
}

#[async_trait]
impl SeatStore for PgSeatStore {
    async fn fetch_all(&self) -> Result<Vec<Seat>, StoreError> {
        let rows = sqlx::query_as::<_, SeatRow>(
            "SELECT id, status, vacant_at, booked_by, seat_type, parent
             FROM lrc_seats
             ORDER BY id",
        )
        .fetch_all(&self.db.pool)
        .await?;

        rows.into_iter().map(Seat::try_from).collect()
    }

    async fn current_user(&self) -> Result<Option<String>, StoreError> {
        let Some(email) = self.session_email.as_deref() else {
            return Ok(None);
        };
        let user = User::find_by_email(email, &self.db)
            .await
            .map_err(StoreError::from)?;
        Ok(user.map(|u| u.email))
    }

    async fn commit_booking(
        &self,
        seat_id: &str,
        update: &BookingUpdate,
    ) -> Result<Seat, StoreError> {
        // The WHERE clause is the whole arbitration: if another client got
        // here first the row is no longer Available and nothing matches.
        let row = sqlx::query_as::<_, SeatRow>(
            "UPDATE lrc_seats
             SET status = 'Occupied', vacant_at = $2, booked_by = $3
             WHERE id = $1 AND status = 'Available'
             RETURNING id, status, vacant_at, booked_by, seat_type, parent",
        )
        .bind(seat_id)
        .bind(update.vacant_at)
        .bind(&update.booked_by)
        .fetch_optional(&self.db.pool)
        .await?;

        match row {
            Some(row) => Seat::try_from(row),
            None => Err(StoreError::Conflict(seat_id.to_string())),
        }
    }

    async fn subscribe(&self) -> Result<(SeatFeed, SubscriptionHandle), StoreError> {
        let mut listener = PgListener::connect_with(&self.db.pool).await?;
        listener.listen(SEAT_CHANNEL).await?;
        info!("Listening for seat changes on '{}'", SEAT_CHANNEL);

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let task = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<Seat>(notification.payload()) {
                            Ok(seat) => {
                                if tx.send(seat).await.is_err() {
                                    // Receiver side is gone, stop pumping
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!("Undecodable seat change payload: {:?}", err);
                            }
                        }
                    }
                    Err(err) => {
                        warn!("Seat change listener lost: {:?}", err);
                        break;
                    }
                }
            }
        });

        Ok((rx, SubscriptionHandle::new(task.abort_handle())))
    }
}
