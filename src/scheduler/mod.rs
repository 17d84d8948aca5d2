
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::error::ReconcileError;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::ports::{DeviceRepository, ReservationRepository, UnitRepository};

pub const NOTE_ORPHANED: &str = "Reservation has disappeared; ending lock code within the hour.";

/// A relevant reservation with its lock code derived and its window buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredLockCode {
    pub reservation_id: String,
    pub transaction_number: String,
    pub code: String,
    pub start_at: Ms,
    pub end_at: Ms,
}

/// Derives the managed lock codes each device should carry from the
/// reservations of its unit.
///
/// A pass plans every device before writing any of them, so an upstream
/// integrity failure (duplicate reservation IDs, a transaction number too
/// short to yield a code) fails the pass with nothing persisted.
pub struct Scheduler {
    device_repository: Arc<dyn DeviceRepository>,
    reservation_repository: Arc<dyn ReservationRepository>,
    unit_repository: Arc<dyn UnitRepository>,
}

impl Scheduler {
    pub fn new(
        device_repository: Arc<dyn DeviceRepository>,
        reservation_repository: Arc<dyn ReservationRepository>,
        unit_repository: Arc<dyn UnitRepository>,
    ) -> Self {
        Self {
            device_repository,
            reservation_repository,
            unit_repository,
        }
    }

    pub async fn reconcile_reservations_and_lock_codes(&self) -> Result<(), ReconcileError> {
        self.reconcile_at(now_ms()).await
    }

    pub async fn reconcile_at(&self, now: Ms) -> Result<(), ReconcileError> {
        let started = Instant::now();
        let result = self.reconcile(now).await;
        observability::record_pass(observability::PASS_SCHEDULER, started, result.is_ok());
        result
    }

    async fn reconcile(&self, now: Ms) -> Result<(), ReconcileError> {
        let units = self
            .unit_repository
            .list()
            .await
            .map_err(ReconcileError::collaborator("getting units"))?;

        let reservations_by_unit = self
            .reservation_repository
            .get_for_units(&units)
            .await
            .map_err(ReconcileError::collaborator("getting reservations"))?;

        let devices = self
            .device_repository
            .list()
            .await
            .map_err(ReconcileError::collaborator("getting devices"))?;

        let mut writes = Vec::new();
        for mut device in devices {
            let Some(unit_id) = device.unit_id else { continue };
            let reservations = reservations_by_unit
                .get(&unit_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let desired = relevant_reservations(unit_id, reservations, now)?;
            let changed = plan_device(&mut device, &desired, now);
            if !changed.is_empty() {
                writes.push((device, changed));
            }
        }

        for (device, changed) in writes {
            let changed: Vec<ManagedLockCode> = changed
                .iter()
                .map(|&i| device.managed_lock_codes[i].clone())
                .collect();
            self.device_repository
                .append_to_audit_log(&device, &changed, now)
                .await
                .map_err(ReconcileError::collaborator("appending to audit log"))?;
            self.device_repository
                .put(device)
                .await
                .map_err(ReconcileError::collaborator("updating device"))?;
            metrics::counter!(observability::DEVICE_WRITES_TOTAL, "pass" => observability::PASS_SCHEDULER)
                .increment(1);
        }

        Ok(())
    }
}

/// Reservations whose buffered window touches `[now - 1h, now + 1h]`, in input
/// order, each with its lock code. IDs must be unique within the unit.
pub fn relevant_reservations(
    unit_id: Ulid,
    reservations: &[Reservation],
    now: Ms,
) -> Result<Vec<DesiredLockCode>, ReconcileError> {
    let window = Span::new(now - RELEVANCE_WINDOW, now + RELEVANCE_WINDOW);
    let mut seen = HashSet::new();
    let mut desired = Vec::new();

    for r in reservations {
        let span = r.buffered_span();
        // Inverted spans are judged by their extent so they get reported below.
        let extent = Span::new(span.start.min(span.end), span.start.max(span.end));
        if !extent.touches(&window) {
            continue;
        }
        if r.id.trim().is_empty() {
            return Err(ReconcileError::MalformedReservation {
                reservation_id: r.transaction_number.clone(),
                reason: "reservation has no ID",
            });
        }
        if r.end < r.start {
            return Err(ReconcileError::MalformedReservation {
                reservation_id: r.id.clone(),
                reason: "reservation ends before it starts",
            });
        }
        // We don't control the IDs, so check they're unique among the unit's active reservations.
        if !seen.insert(r.id.as_str()) {
            return Err(ReconcileError::DuplicateReservation {
                unit_id,
                reservation_id: r.id.clone(),
            });
        }
        desired.push(DesiredLockCode {
            reservation_id: r.id.clone(),
            transaction_number: r.transaction_number.clone(),
            code: r.lock_code()?,
            start_at: span.start,
            end_at: span.end,
        });
    }

    Ok(desired)
}

/// Bring one device's managed lock codes in line with `desired`, in place.
/// Returns the indices of the codes created or changed.
pub fn plan_device(device: &mut Device, desired: &[DesiredLockCode], now: Ms) -> Vec<usize> {
    let mut changed = Vec::new();

    // Newest entry per reservation; older ones are history.
    let by_reservation: HashMap<&str, usize> = device
        .managed_lock_codes
        .iter()
        .enumerate()
        .filter_map(|(i, m)| m.reservation_id().map(|id| (id, i)))
        .collect();
    let existing: Vec<Option<usize>> = desired
        .iter()
        .map(|d| by_reservation.get(d.reservation_id.as_str()).copied())
        .collect();

    for (d, existing) in desired.iter().zip(existing) {
        let Some(i) = existing else {
            // Already over; don't resurrect history.
            if now <= d.end_at {
                changed.push(schedule_for(device, d));
            }
            continue;
        };
        let mlc = &mut device.managed_lock_codes[i];
        if !mlc.is_syncable() {
            continue;
        }
        if mlc.is_retired() {
            // The code is coming off the lock. If the reservation is still on,
            // start over with a new entry and leave this one as history.
            if now <= d.end_at {
                debug!(device = %device.id, reservation = %d.reservation_id, status = %mlc.status, "reservation outlived its lock code");
                changed.push(schedule_for(device, d));
            }
            continue;
        }
        let mut fields = Vec::new();
        if mlc.code != d.code {
            fields.push("code");
            mlc.code = d.code.clone();
        }
        if mlc.start_at != d.start_at {
            fields.push("start");
            mlc.start_at = d.start_at;
        }
        if mlc.end_at != d.end_at {
            fields.push("end");
            mlc.end_at = d.end_at;
        }
        if !fields.is_empty() {
            mlc.note = format!("Updating to match reservation (fields: {}).", fields.join(", "));
            debug!(device = %device.id, reservation = %d.reservation_id, ?fields, "lock code drifted");
            if !changed.contains(&i) {
                changed.push(i);
            }
        }
    }

    let relevant: HashSet<&str> = desired.iter().map(|d| d.reservation_id.as_str()).collect();
    let deadline = now + ORPHAN_GRACE;
    for (i, mlc) in device.managed_lock_codes.iter_mut().enumerate() {
        if !mlc.is_syncable() || mlc.is_retired() || mlc.has_ended(now) {
            continue;
        }
        if mlc.reservation_id().is_some_and(|id| relevant.contains(id)) {
            continue;
        }
        if mlc.end_at <= deadline {
            continue;
        }
        // Could be a transient upstream glitch, so shorten rather than drop.
        mlc.end_at = deadline;
        mlc.start_at = mlc.start_at.min(deadline);
        mlc.note = NOTE_ORPHANED.to_string();
        info!(
            device = %device.id,
            reservation = mlc.reservation_id().unwrap_or_default(),
            code = %mlc.code,
            "reservation disappeared, ending lock code early"
        );
        metrics::counter!(observability::ORPHANS_DEGRADED_TOTAL).increment(1);
        if !changed.contains(&i) {
            changed.push(i);
        }
    }

    changed
}

/// Append a Scheduled entry for `d` and return its index.
fn schedule_for(device: &mut Device, d: &DesiredLockCode) -> usize {
    let mut mlc = ManagedLockCode::scheduled(
        d.code.clone(),
        d.start_at,
        d.end_at,
        format!("Automatically created for reservation {}.", d.transaction_number),
    );
    mlc.reservation = Some(ReservationLink {
        id: d.reservation_id.clone(),
        sync: true,
    });
    info!(device = %device.id, reservation = %d.reservation_id, code = %mlc.code, "scheduling lock code");
    metrics::counter!(observability::LOCK_CODES_CREATED_TOTAL).increment(1);
    device.managed_lock_codes.push(mlc);
    device.managed_lock_codes.len() - 1
}
