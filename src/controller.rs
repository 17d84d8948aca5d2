use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::error::PortError;
use crate::model::*;
use crate::observability;
use crate::ports::{DeviceController, PortResult, SnapshotRefresher};
use crate::store::InMemoryStore;

/// A lock controller that keeps programmed codes in memory.
pub struct SimulatedController {
    store: Arc<InMemoryStore>,
    programmed: DashMap<Ulid, BTreeSet<String>>,
    offline: AtomicBool,
}

impl SimulatedController {
    pub fn new(store: Arc<InMemoryStore>) -> Self {
        Self {
            store,
            programmed: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    /// Seed the lock's programmed codes from the device's last snapshot.
    pub fn adopt_snapshot(&self, device: &Device) {
        let codes = device.raw_device.lock_codes.iter().map(|lc| lc.code.clone()).collect();
        self.programmed.insert(device.id, codes);
    }

    /// Codes currently programmed into a device's lock.
    pub fn codes(&self, device_id: Ulid) -> Vec<String> {
        self.programmed
            .get(&device_id)
            .map(|e| e.value().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Change a lock behind the reconciler's back, as a guest or technician might.
    pub fn program_externally(&self, device_id: Ulid, code: &str, present: bool) {
        let mut codes = self.programmed.entry(device_id).or_default();
        if present {
            codes.insert(code.to_string());
        } else {
            codes.remove(code);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, property: &Property) -> PortResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PortError::new(format!(
                "controller account {} unreachable",
                property.controller_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceController for SimulatedController {
    async fn add_lock_code(&self, property: &Property, device: &Device, code: &str) -> PortResult<()> {
        self.check_online(property)?;
        let added = self.programmed.entry(device.id).or_default().insert(code.to_string());
        debug!(device = %device.id, code, added, "add lock code");
        Ok(())
    }

    async fn remove_lock_code(&self, property: &Property, device: &Device, code: &str) -> PortResult<()> {
        self.check_online(property)?;
        let removed = self
            .programmed
            .get_mut(&device.id)
            .is_some_and(|mut codes| codes.remove(code));
        debug!(device = %device.id, code, removed, "remove lock code");
        Ok(())
    }
}

#[async_trait]
impl SnapshotRefresher for SimulatedController {
    async fn refresh(&self, now: Ms) -> PortResult<usize> {
        let started = Instant::now();
        let mut refreshed = 0;
        for id in self.store.device_ids() {
            let lock_codes: Vec<RawLockCode> = self
                .codes(id)
                .into_iter()
                .enumerate()
                .map(|(slot, code)| RawLockCode {
                    slot: slot as u32 + 1,
                    code,
                    name: String::new(),
                })
                .collect();
            self.store
                .update_device(id, |d| {
                    d.raw_device.lock_codes = lock_codes;
                    d.last_refreshed_at = now;
                })
                .await?;
            refreshed += 1;
        }
        observability::record_pass(observability::PASS_REFRESH, started, true);
        Ok(refreshed)
    }
}
