//! Hard caps. All of these surface as `EngineError::LimitExceeded` —
//! infrastructure guards, not business errors.

use crate::model::Ms;

/// Slots a single expert may hold (including soft-deleted ones).
pub const MAX_SLOTS_PER_OWNER: usize = 10_000;

/// Rows in one multi-row slot INSERT.
pub const MAX_BATCH_SIZE: usize = 100;

/// Widest single slot or session: 24 hours.
pub const MAX_SPAN_DURATION_MS: Ms = 24 * 3_600_000;

/// 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest availability query window: 92 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 24 * 3_600_000;

/// Titles, descriptions, notes, cancellation reasons, feedback text.
pub const MAX_TEXT_LEN: usize = 4_096;

/// Entries in a feedback strengths/improvements list.
pub const MAX_FEEDBACK_ITEMS: usize = 32;

pub const MAX_USERS_PER_TENANT: usize = 100_000;

pub const MAX_SESSIONS_PER_TENANT: usize = 1_000_000;

/// Undelivered notifications retained per user (older ones are dropped).
pub const MAX_INBOX_LEN: usize = 256;

pub const MAX_TENANTS: usize = 1_024;

pub const MAX_TENANT_NAME_LEN: usize = 256;
