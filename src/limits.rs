use crate::model::{Ms, DAY_MS};

// 2000-01-01T00:00:00Z .. 2100-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single stay or owner block.
pub const MAX_SPAN_DURATION_MS: Ms = 3 * 365 * DAY_MS;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SEARCH_LEN: usize = 256;
pub const MAX_PERIODS_PER_ACCOMMODATION: usize = 10_000;
pub const MAX_IDS_PER_FILTER: usize = 1_000;
pub const MAX_GUEST_COUNT: u32 = 64;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
