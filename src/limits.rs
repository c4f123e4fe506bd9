use crate::model::Ms;

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// 2000-01-01T00:00:00
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 9999-12-31T23:59:59.999
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;
/// 366 days.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
