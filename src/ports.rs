use std::collections::HashMap;

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::PortError;
use crate::model::{Device, ManagedLockCode, Ms, Property, Reservation, Unit};

pub type PortResult<T> = Result<T, PortError>;

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn list(&self) -> PortResult<Vec<Device>>;

    /// Full overwrite. Returns the stored value.
    async fn put(&self, device: Device) -> PortResult<Device>;

    /// One entry per changed code, stamped `now`. Must not fail silently.
    async fn append_to_audit_log(&self, device: &Device, changed: &[ManagedLockCode], now: Ms) -> PortResult<()>;
}

#[async_trait]
pub trait PropertyRepository: Send + Sync {
    /// May memoize within a single pass.
    async fn get_cached(&self, id: Ulid) -> PortResult<Option<Property>>;
}

#[async_trait]
pub trait UnitRepository: Send + Sync {
    async fn list(&self) -> PortResult<Vec<Unit>>;
}

/// One upstream booking system.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn get_for_units(&self, units: &[Unit]) -> PortResult<HashMap<Ulid, Vec<Reservation>>>;
}

/// Talks to the lock hardware.
///
/// Both calls must be idempotent: adding a code that is already present, or
/// removing one that is already gone, is not a failure.
#[async_trait]
pub trait DeviceController: Send + Sync {
    async fn add_lock_code(&self, property: &Property, device: &Device, code: &str) -> PortResult<()>;
    async fn remove_lock_code(&self, property: &Property, device: &Device, code: &str) -> PortResult<()>;
}

/// Refreshes each device's `RawDevice` snapshot from the controller.
#[async_trait]
pub trait SnapshotRefresher: Send + Sync {
    /// Returns how many devices were refreshed.
    async fn refresh(&self, now: Ms) -> PortResult<usize>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> PortResult<()>;
}
