use crate::model::Ms;

pub const MAX_ROOM_ID_LEN: usize = 256;
pub const MAX_ROOMS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// A single reservation may not run longer than 31 days.
pub const MAX_RESERVATION_DURATION_MS: Ms = 31 * 24 * 3_600_000;
