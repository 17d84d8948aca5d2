use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ReconcileError;
use crate::limits::*;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 60 * MINUTE;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Closed interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Move the start earlier by `before` and the end later by `after`.
    pub fn widen(&self, before: Ms, after: Ms) -> Self {
        Self {
            start: self.start - before,
            end: self.end + after,
        }
    }

    /// Strict overlap: spans that only share an edge do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Inclusive intersection: sharing an edge counts.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

// ── Upstream entities ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: Ulid,
    pub name: String,
    /// Account identifier the device controller needs to reach this property's hardware.
    pub controller_id: String,
    #[serde(default)]
    pub updated_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Ulid,
    pub name: String,
    pub property_id: Ulid,
    /// Where this unit's reservations come from (e.g. a calendar URL). Empty means none.
    #[serde(default)]
    pub calendar_url: String,
    #[serde(default)]
    pub updated_by: String,
}

impl Unit {
    pub fn has_reservation_source(&self) -> bool {
        !self.calendar_url.trim().is_empty()
    }
}

/// A normalized booking. Never persisted; recomputed on every scheduler pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub transaction_number: String,
    /// Check-in, already adjusted for the property's check-in hour.
    pub start: Ms,
    /// Check-out, already adjusted for the property's check-out hour.
    pub end: Ms,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: String,
}

impl Reservation {
    /// The door code: the last `LOCK_CODE_LEN` characters of the transaction number.
    pub fn lock_code(&self) -> Result<String, ReconcileError> {
        let chars: Vec<char> = self.transaction_number.trim().chars().collect();
        if chars.len() < LOCK_CODE_LEN {
            return Err(ReconcileError::MalformedReservation {
                reservation_id: self.id.clone(),
                reason: "transaction number is too short to derive a lock code",
            });
        }
        Ok(chars[chars.len() - LOCK_CODE_LEN..].iter().collect())
    }

    /// The reservation window widened by the check-in/check-out buffers.
    pub fn buffered_span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
        }
        .widen(RESERVATION_START_BUFFER, RESERVATION_END_BUFFER)
    }
}

// ── Managed lock codes ───────────────────────────────────────

/// Lifecycle of a managed lock code. Variant order is the order of progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockCodeStatus {
    Scheduled,
    Adding,
    Enabled,
    Removing,
    Complete,
}

impl LockCodeStatus {
    /// Forward moves are always allowed. The two backward moves are self-healing:
    /// a completed code found on the lock again goes back to `Removing`, and an
    /// enabled code that vanished from the lock goes back to `Adding`.
    pub fn can_transition_to(self, to: LockCodeStatus) -> bool {
        to >= self
            || matches!(
                (self, to),
                (LockCodeStatus::Complete, LockCodeStatus::Removing)
                    | (LockCodeStatus::Enabled, LockCodeStatus::Adding)
            )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockCodeStatus::Scheduled => "Scheduled",
            LockCodeStatus::Adding => "Adding",
            LockCodeStatus::Enabled => "Enabled",
            LockCodeStatus::Removing => "Removing",
            LockCodeStatus::Complete => "Complete",
        }
    }
}

impl fmt::Display for LockCodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link from a managed lock code to the reservation it was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLink {
    pub id: String,
    /// Whether the scheduler may keep the code in step with the reservation.
    pub sync: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedLockCode {
    pub id: Ulid,
    pub code: String,
    pub start_at: Ms,
    pub end_at: Ms,
    pub status: LockCodeStatus,
    /// Human-readable reason for the last change.
    pub note: String,
    #[serde(default)]
    pub reservation: Option<ReservationLink>,
    #[serde(default)]
    pub started_adding_at: Option<Ms>,
    #[serde(default)]
    pub was_enabled_at: Option<Ms>,
    #[serde(default)]
    pub started_removing_at: Option<Ms>,
    #[serde(default)]
    pub was_completed_at: Option<Ms>,
}

impl ManagedLockCode {
    pub fn scheduled(code: String, start_at: Ms, end_at: Ms, note: String) -> Self {
        Self {
            id: Ulid::new(),
            code,
            start_at,
            end_at,
            status: LockCodeStatus::Scheduled,
            note,
            reservation: None,
            started_adding_at: None,
            was_enabled_at: None,
            started_removing_at: None,
            was_completed_at: None,
        }
    }

    pub fn has_started(&self, now: Ms) -> bool {
        now > self.start_at
    }

    pub fn has_ended(&self, now: Ms) -> bool {
        now > self.end_at
    }

    pub fn code_should_be_present(&self, now: Ms) -> bool {
        self.has_started(now) && !self.has_ended(now)
    }

    pub fn window(&self) -> Span {
        Span {
            start: self.start_at,
            end: self.end_at,
        }
    }

    pub fn reservation_id(&self) -> Option<&str> {
        self.reservation.as_ref().map(|r| r.id.as_str())
    }

    /// Removal has started or finished. A retired code is never put back on
    /// the lock; a returning reservation gets a fresh entry instead.
    pub fn is_retired(&self) -> bool {
        self.status >= LockCodeStatus::Removing
    }

    /// Linked to a reservation and allowed to follow it.
    pub fn is_syncable(&self) -> bool {
        self.reservation.as_ref().is_some_and(|r| r.sync)
    }

    /// Move to `to`, stamping the stage entered and clearing every later stage.
    /// Returns whether the status changed.
    pub fn set_status(&mut self, to: LockCodeStatus, now: Ms) -> Result<bool, ReconcileError> {
        if self.status == to {
            return Ok(false);
        }
        if !self.status.can_transition_to(to) {
            return Err(ReconcileError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        match to {
            LockCodeStatus::Scheduled => {
                self.started_adding_at = None;
                self.was_enabled_at = None;
                self.started_removing_at = None;
                self.was_completed_at = None;
            }
            LockCodeStatus::Adding => {
                self.started_adding_at = Some(now);
                self.was_enabled_at = None;
                self.started_removing_at = None;
                self.was_completed_at = None;
            }
            LockCodeStatus::Enabled => {
                self.was_enabled_at = Some(now);
                self.started_removing_at = None;
                self.was_completed_at = None;
            }
            LockCodeStatus::Removing => {
                self.started_removing_at = Some(now);
                self.was_completed_at = None;
            }
            LockCodeStatus::Complete => {
                self.was_completed_at = Some(now);
            }
        }
        Ok(true)
    }
}

// ── Devices ──────────────────────────────────────────────────

/// A code slot as reported by the lock controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLockCode {
    pub slot: u32,
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// Last snapshot of the lock as the controller reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDevice {
    pub name: String,
    #[serde(default)]
    pub lock_codes: Vec<RawLockCode>,
}

impl RawDevice {
    pub fn has_code(&self, code: &str) -> bool {
        self.lock_codes.iter().any(|lc| lc.code == code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Ulid,
    pub property_id: Ulid,
    #[serde(default)]
    pub unit_id: Option<Ulid>,
    #[serde(default)]
    pub raw_device: RawDevice,
    /// Owned codes in creation order. Completed codes stay as history.
    #[serde(default)]
    pub managed_lock_codes: Vec<ManagedLockCode>,
    #[serde(default)]
    pub last_refreshed_at: Ms,
}

impl Device {
    pub fn name(&self) -> &str {
        &self.raw_device.name
    }

    pub fn managed_lock_code(&self, id: Ulid) -> Option<&ManagedLockCode> {
        self.managed_lock_codes.iter().find(|m| m.id == id)
    }

    /// True if any existing code comes within `CONFLICT_BUFFER` of the candidate's window.
    pub fn has_conflicting_managed_lock_code(&self, candidate: &ManagedLockCode) -> bool {
        let window = candidate.window();
        self.managed_lock_codes
            .iter()
            .filter(|m| m.id != candidate.id)
            .any(|m| m.window().widen(CONFLICT_BUFFER, CONFLICT_BUFFER).overlaps(&window))
    }

    /// Add a hand-entered code that no reservation owns. Returns the new code's id.
    pub fn schedule_manual_lock_code(
        &mut self,
        code: &str,
        start_at: Ms,
        end_at: Ms,
        author: &str,
    ) -> Result<Ulid, ReconcileError> {
        let code = code.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ReconcileError::InvalidLockCode("code must be digits only"));
        }
        if start_at >= end_at {
            return Err(ReconcileError::InvalidLockCode("start must be before end"));
        }

        let mlc = ManagedLockCode::scheduled(
            code.to_string(),
            start_at,
            end_at,
            format!("Added by {author}."),
        );
        if self.has_conflicting_managed_lock_code(&mlc) {
            return Err(ReconcileError::ConflictingLockCode {
                device_id: self.id,
                code: mlc.code,
            });
        }

        let id = mlc.id;
        self.managed_lock_codes.push(mlc);
        Ok(id)
    }

    pub fn edit_managed_lock_code_end(
        &mut self,
        id: Ulid,
        end_at: Ms,
        author: &str,
    ) -> Result<&ManagedLockCode, ReconcileError> {
        let mlc = self
            .managed_lock_codes
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ReconcileError::NotFound(id))?;
        if end_at <= mlc.start_at {
            return Err(ReconcileError::InvalidLockCode("end must be after start"));
        }
        mlc.end_at = end_at;
        mlc.note = format!("Edited by {author}.");
        Ok(mlc)
    }
}

// ── Audit log ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub created_at: Ms,
    pub log: String,
}

impl AuditLogEntry {
    pub fn for_lock_code(mlc: &ManagedLockCode, now: Ms) -> Self {
        Self {
            created_at: now,
            log: format!(
                "Code: {}; Status: {}; Start: {}; End: {}; Note: {}",
                mlc.code,
                mlc.status,
                rfc3339(mlc.start_at),
                rfc3339(mlc.end_at),
                mlc.note
            ),
        }
    }
}

/// Append-only history of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub device_id: Ulid,
    pub entries: Vec<AuditLogEntry>,
}

impl AuditLog {
    pub fn new(device_id: Ulid) -> Self {
        Self {
            device_id,
            entries: Vec::new(),
        }
    }

    /// Append and keep only the newest `MAX_AUDIT_LOG_ENTRIES`.
    pub fn append(&mut self, entries: impl IntoIterator<Item = AuditLogEntry>) {
        self.entries.extend(entries);
        if self.entries.len() > MAX_AUDIT_LOG_ENTRIES {
            let excess = self.entries.len() - MAX_AUDIT_LOG_ENTRIES;
            self.entries.drain(..excess);
        }
    }
}

// ── Store log events ─────────────────────────────────────────

/// One durable mutation of the store. Replaying the log in order rebuilds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    PropertySaved(Property),
    UnitSaved(Unit),
    DeviceSaved(Device),
    AuditAppended {
        device_id: Ulid,
        entries: Vec<AuditLogEntry>,
    },
}

fn rfc3339(ms: Ms) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2021-01-02T00:00:00Z
    const JAN_2: Ms = 1_609_545_600_000;

    fn mlc(start_at: Ms, end_at: Ms) -> ManagedLockCode {
        ManagedLockCode::scheduled("1234".into(), start_at, end_at, String::new())
    }

    #[test]
    fn status_order_matches_lifecycle() {
        use LockCodeStatus::*;
        assert!(Scheduled < Adding);
        assert!(Adding < Enabled);
        assert!(Enabled < Removing);
        assert!(Removing < Complete);
    }

    #[test]
    fn removal_retires_a_code() {
        let mut m = mlc(0, HOUR);
        for (status, retired) in [
            (LockCodeStatus::Scheduled, false),
            (LockCodeStatus::Enabled, false),
            (LockCodeStatus::Removing, true),
            (LockCodeStatus::Complete, true),
        ] {
            m.status = status;
            assert_eq!(m.is_retired(), retired, "{status}");
        }
    }

    #[test]
    fn transitions_only_move_forward_or_self_heal() {
        use LockCodeStatus::*;
        assert!(Scheduled.can_transition_to(Adding));
        assert!(Scheduled.can_transition_to(Complete));
        assert!(Complete.can_transition_to(Removing));
        assert!(Enabled.can_transition_to(Adding));

        assert!(!Complete.can_transition_to(Enabled));
        assert!(!Removing.can_transition_to(Adding));
        assert!(!Adding.can_transition_to(Scheduled));
        assert!(!Complete.can_transition_to(Scheduled));
    }

    #[test]
    fn time_predicates_are_strict() {
        let m = mlc(1000, 2000);
        assert!(!m.has_started(1000));
        assert!(m.has_started(1001));
        assert!(!m.has_ended(2000));
        assert!(m.has_ended(2001));
        assert!(!m.code_should_be_present(1000));
        assert!(m.code_should_be_present(1500));
        assert!(m.code_should_be_present(2000));
        assert!(!m.code_should_be_present(2001));
    }

    #[test]
    fn set_status_stamps_and_clears_stage_times() {
        let mut m = mlc(0, 10);
        assert!(m.set_status(LockCodeStatus::Adding, 1).unwrap());
        assert!(m.set_status(LockCodeStatus::Enabled, 2).unwrap());
        assert_eq!(m.started_adding_at, Some(1));
        assert_eq!(m.was_enabled_at, Some(2));

        // Code vanished from the lock: back to adding, enabled stamp cleared.
        assert!(m.set_status(LockCodeStatus::Adding, 3).unwrap());
        assert_eq!(m.started_adding_at, Some(3));
        assert_eq!(m.was_enabled_at, None);

        assert!(!m.set_status(LockCodeStatus::Adding, 4).unwrap());
        assert_eq!(m.started_adding_at, Some(3));
    }

    #[test]
    fn set_status_rejects_regression() {
        let mut m = mlc(0, 10);
        m.set_status(LockCodeStatus::Complete, 1).unwrap();
        let err = m.set_status(LockCodeStatus::Enabled, 2).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidTransition { .. }));
        assert_eq!(m.status, LockCodeStatus::Complete);

        assert!(m.set_status(LockCodeStatus::Removing, 3).unwrap());
        assert_eq!(m.started_removing_at, Some(3));
        assert_eq!(m.was_completed_at, None);
    }

    #[test]
    fn lock_code_is_last_four_characters() {
        let r = Reservation {
            id: "r1".into(),
            transaction_number: "21107569".into(),
            start: 0,
            end: HOUR,
            summary: String::new(),
            status: String::new(),
        };
        assert_eq!(r.lock_code().unwrap(), "7569");

        let short = Reservation {
            transaction_number: "123".into(),
            ..r
        };
        assert!(matches!(
            short.lock_code(),
            Err(ReconcileError::MalformedReservation { .. })
        ));
    }

    #[test]
    fn buffered_span_widens_by_half_an_hour() {
        let r = Reservation {
            id: "r1".into(),
            transaction_number: "12345678".into(),
            start: 10 * HOUR,
            end: 20 * HOUR,
            summary: String::new(),
            status: String::new(),
        };
        assert_eq!(
            r.buffered_span(),
            Span::new(10 * HOUR - 30 * MINUTE, 20 * HOUR + 30 * MINUTE)
        );
    }

    #[test]
    fn conflicting_manual_codes_respect_hour_buffer() {
        let mut device = Device {
            id: Ulid::new(),
            property_id: Ulid::new(),
            unit_id: None,
            raw_device: RawDevice::default(),
            managed_lock_codes: vec![mlc(JAN_2, JAN_2 + 24 * HOUR)],
            last_refreshed_at: 0,
        };

        // Just before the existing range (outside hour buffer).
        assert!(!device.has_conflicting_managed_lock_code(&mlc(JAN_2 - 24 * HOUR, JAN_2 - 2 * HOUR)));
        // Overlapping start range (within hour buffer).
        assert!(device.has_conflicting_managed_lock_code(&mlc(JAN_2 - 24 * HOUR, JAN_2 - 59 * MINUTE)));
        // Just after the existing range (outside hour buffer).
        assert!(!device.has_conflicting_managed_lock_code(&mlc(JAN_2 + 25 * HOUR, JAN_2 + 48 * HOUR)));
        // Overlapping end range (within hour buffer).
        assert!(device.has_conflicting_managed_lock_code(&mlc(JAN_2 + 24 * HOUR + 59 * MINUTE, JAN_2 + 48 * HOUR)));

        let err = device
            .schedule_manual_lock_code("4321", JAN_2 + 2 * HOUR, JAN_2 + 3 * HOUR, "ops@example.com")
            .unwrap_err();
        assert!(matches!(err, ReconcileError::ConflictingLockCode { .. }));

        let id = device
            .schedule_manual_lock_code("4321", JAN_2 + 26 * HOUR, JAN_2 + 30 * HOUR, "ops@example.com")
            .unwrap();
        let added = device.managed_lock_code(id).unwrap();
        assert_eq!(added.status, LockCodeStatus::Scheduled);
        assert_eq!(added.note, "Added by ops@example.com.");
        assert!(added.reservation.is_none());
    }

    #[test]
    fn manual_code_must_be_digits() {
        let mut device = Device {
            id: Ulid::new(),
            property_id: Ulid::new(),
            unit_id: None,
            raw_device: RawDevice::default(),
            managed_lock_codes: Vec::new(),
            last_refreshed_at: 0,
        };
        assert!(device.schedule_manual_lock_code("12a4", 0, HOUR, "x").is_err());
        assert!(device.schedule_manual_lock_code("1234", HOUR, HOUR, "x").is_err());
        assert!(device.managed_lock_codes.is_empty());
    }

    #[test]
    fn edit_end_records_author() {
        let mut device = Device {
            id: Ulid::new(),
            property_id: Ulid::new(),
            unit_id: None,
            raw_device: RawDevice::default(),
            managed_lock_codes: vec![mlc(0, HOUR)],
            last_refreshed_at: 0,
        };
        let id = device.managed_lock_codes[0].id;

        let edited = device.edit_managed_lock_code_end(id, 2 * HOUR, "ops").unwrap();
        assert_eq!(edited.end_at, 2 * HOUR);
        assert_eq!(edited.note, "Edited by ops.");

        assert!(matches!(
            device.edit_managed_lock_code_end(Ulid::new(), 2 * HOUR, "ops"),
            Err(ReconcileError::NotFound(_))
        ));
    }

    #[test]
    fn audit_entry_format() {
        let mut m = mlc(JAN_2, JAN_2 + HOUR);
        m.note = "Lock code present.".into();
        let entry = AuditLogEntry::for_lock_code(&m, 5);
        assert_eq!(entry.created_at, 5);
        assert_eq!(
            entry.log,
            "Code: 1234; Status: Scheduled; Start: 2021-01-02T00:00:00Z; End: 2021-01-02T01:00:00Z; Note: Lock code present."
        );
    }

    #[test]
    fn audit_log_keeps_newest_entries() {
        let mut log = AuditLog::new(Ulid::new());
        log.append((0..MAX_AUDIT_LOG_ENTRIES as Ms + 5).map(|i| AuditLogEntry {
            created_at: i,
            log: String::new(),
        }));
        assert_eq!(log.entries.len(), MAX_AUDIT_LOG_ENTRIES);
        assert_eq!(log.entries[0].created_at, 5);
    }

    #[test]
    fn device_json_defaults() {
        let json = format!(
            r#"{{"id":"{}","property_id":"{}","raw_device":{{"name":"Front door"}}}}"#,
            Ulid::new(),
            Ulid::new()
        );
        let d: Device = serde_json::from_str(&json).unwrap();
        assert_eq!(d.name(), "Front door");
        assert!(d.managed_lock_codes.is_empty());
        assert!(d.unit_id.is_none());
    }
}
