use thiserror::Error;

/// Everything that can go wrong with the backing store.
///
/// `Conflict` is the interesting one: the conditional commit found the seat
/// no longer in the expected state, meaning another client won the race.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("seat {0} no longer satisfies the update precondition")]
    Conflict(String),

    #[error("{0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// User-facing failure taxonomy of the reservation flow. Each variant maps
/// to exactly one notification in the UI layer.
#[derive(Debug, Clone, Error)]
pub enum ReserveError {
    #[error("no seat selected")]
    NotSelected,

    #[error("seat {0} is already occupied")]
    AlreadyOccupied(String),

    #[error("sign in required to book a seat")]
    Unauthenticated,

    #[error("booking failed: {0}")]
    BookingFailed(String),

    #[error("seat snapshot fetch failed: {0}")]
    Sync(String),
}
