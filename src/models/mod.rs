pub mod seat;
pub mod user;

pub use seat::{Seat, SeatStats, SeatStatus};
pub use user::User;
