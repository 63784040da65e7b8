//! Guard-rail limits. Inputs past these caps are rejected with
//! `LimitExceeded` before touching state.

use crate::model::Ms;

/// Timestamps before the unix epoch are rejected.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Year-3000 cutoff; rejects garbage far-future timestamps.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

/// A single reservation window may span at most 24 hours.
pub const MAX_WINDOW_DURATION_MS: Ms = 24 * 60 * 60 * 1000;

/// Availability queries may scan at most 90 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 90 * 24 * 60 * 60 * 1000;

/// Check-in opens this long before the reservation start.
pub const CHECK_IN_EARLY_MS: Ms = 15 * 60 * 1000;

/// A confirmed reservation not checked in within this grace past its
/// start is marked no-show by the sweeper.
pub const NO_SHOW_GRACE_MS: Ms = 30 * 60 * 1000;

/// WAL appends outstanding longer than this surface `Unavailable`.
pub const WAL_APPEND_TIMEOUT_MS: u64 = 5_000;

pub const MAX_SPACES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_SPACE: usize = 100_000;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_KEYWORD_LEN: usize = 128;
pub const MAX_PAGE_SIZE: usize = 100;

/// Per-space broadcast buffer; a subscriber lagging past this loses events.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;

/// Hard cap on a single WAL entry; a length prefix past this is treated
/// as corruption, not an allocation request.
pub const MAX_WAL_ENTRY_BYTES: usize = 1 << 20;
