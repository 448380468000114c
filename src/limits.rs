//! Hard ceilings on input sizes. Requests exceeding these fail with
//! `EngineError::LimitExceeded` before any state is touched.

use crate::model::Ms;

pub const MAX_BUSINESSES: usize = 10_000;
pub const MAX_BATCHES: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PATTERN_LEN: usize = 32;
pub const MAX_CAPACITY: u32 = 10_000;

/// Items a single reservation may hold at once.
pub const MAX_RESERVATION_ITEMS: usize = 20;

pub const MAX_CONTACT_FIELD_LEN: usize = 256;

/// Longest batch run, start date to end date.
pub const MAX_BATCH_DAYS: i64 = 3 * 366;

/// Upper bound on the configured reservation window.
pub const MAX_RESERVATION_WINDOW_MS: Ms = 24 * 3_600_000;

/// Longest request line accepted by the service surface.
pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024;
