use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Occupancy state of a single seat. Stored as text in `lrc_seats.status`
/// and serialized with the same spelling the floor-plan UI expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeatStatus {
    Available,
    Occupied,
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatStatus::Available => write!(f, "Available"),
            SeatStatus::Occupied => write!(f, "Occupied"),
        }
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(SeatStatus::Available),
            "Occupied" => Ok(SeatStatus::Occupied),
            other => Err(format!("unknown seat status: {other}")),
        }
    }
}

/// One bookable resource on the floor plan. Seat rows are provisioned once
/// (see the seed migration); only `status`, `vacant_at` and `booked_by`
/// ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: String,
    pub status: SeatStatus,
    pub vacant_at: Option<DateTime<Utc>>,
    pub booked_by: Option<String>,
    #[serde(rename = "type")]
    pub seat_type: Option<String>,
    pub parent: Option<String>,
}

impl Seat {
    pub fn is_available(&self) -> bool {
        self.status == SeatStatus::Available
    }
}

/// Occupancy figures derived from a seat cache. Pure projection, no state
/// of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatStats {
    pub total: usize,
    pub occupied: usize,
    pub available: usize,
    pub percent: u32,
}

impl SeatStats {
    pub fn from_seats<'a, I>(seats: I) -> Self
    where
        I: IntoIterator<Item = &'a Seat>,
    {
        let mut total = 0;
        let mut occupied = 0;
        for seat in seats {
            total += 1;
            if seat.status == SeatStatus::Occupied {
                occupied += 1;
            }
        }
        let available = total - occupied;
        let percent = if total == 0 {
            0
        } else {
            (occupied as f64 / total as f64 * 100.0).round() as u32
        };
        SeatStats {
            total,
            occupied,
            available,
            percent,
        }
    }
}
