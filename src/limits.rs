use crate::model::{HOUR, MINUTE, Ms};

/// Lock codes open this long before a reservation's check-in.
pub const RESERVATION_START_BUFFER: Ms = 30 * MINUTE;

/// Lock codes stay valid this long after a reservation's check-out.
pub const RESERVATION_END_BUFFER: Ms = 30 * MINUTE;

/// Reservations are only considered when their buffered window touches `[now - 1h, now + 1h]`.
pub const RELEVANCE_WINDOW: Ms = HOUR;

/// An orphaned lock code is allowed to live at most this much longer.
pub const ORPHAN_GRACE: Ms = HOUR;

/// Manually added lock codes must keep this distance from every other code on the device.
pub const CONFLICT_BUFFER: Ms = HOUR;

/// Number of trailing `TransactionNumber` characters used as the door code.
pub const LOCK_CODE_LEN: usize = 4;

/// Audit entries retained per device; older entries are dropped.
pub const MAX_AUDIT_LOG_ENTRIES: usize = 1000;
