mod decision;

pub use decision::{decide, Command, Decision, Transition};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::model::*;
use crate::observability;
use crate::ports::{DeviceController, DeviceRepository, Notifier, PropertyRepository};

/// Indices into `Device::managed_lock_codes` for one code value.
#[derive(Debug, Default)]
struct LockState {
    exists: bool,
    request_to_add: Vec<usize>,
    request_to_remove: Vec<usize>,
}

/// Converges each lock's programmed codes with the managed lock codes that
/// should currently be active.
///
/// A pass reads every device, groups its started codes by value, decides per
/// value what the lock needs (see [`decide`]) and writes each changed device
/// back once. Every branch looks at the current status before acting, so a
/// crash between a controller call and the device write is repaired by the
/// next pass.
pub struct LockEngine {
    device_controller: Arc<dyn DeviceController>,
    device_repository: Arc<dyn DeviceRepository>,
    notifier: Arc<dyn Notifier>,
    property_repository: Arc<dyn PropertyRepository>,
}

impl LockEngine {
    pub fn new(
        device_controller: Arc<dyn DeviceController>,
        device_repository: Arc<dyn DeviceRepository>,
        notifier: Arc<dyn Notifier>,
        property_repository: Arc<dyn PropertyRepository>,
    ) -> Self {
        Self {
            device_controller,
            device_repository,
            notifier,
            property_repository,
        }
    }

    pub async fn update_locks(&self) -> Result<(), ReconcileError> {
        self.update_locks_at(now_ms()).await
    }

    pub async fn update_locks_at(&self, now: Ms) -> Result<(), ReconcileError> {
        let started = Instant::now();
        let result = self.converge_all(now).await;
        observability::record_pass(observability::PASS_LOCK_ENGINE, started, result.is_ok());
        result
    }

    async fn converge_all(&self, now: Ms) -> Result<(), ReconcileError> {
        let devices = self
            .device_repository
            .list()
            .await
            .map_err(ReconcileError::collaborator("getting devices"))?;

        for mut device in devices {
            let changed = self.converge_device(&mut device, now).await?;
            if changed.is_empty() {
                continue;
            }

            let changed: Vec<ManagedLockCode> = changed
                .iter()
                .map(|&i| device.managed_lock_codes[i].clone())
                .collect();

            self.device_repository
                .append_to_audit_log(&device, &changed, now)
                .await
                .map_err(ReconcileError::collaborator("appending to audit log"))?;
            let device = self
                .device_repository
                .put(device)
                .await
                .map_err(ReconcileError::collaborator("putting device"))?;
            metrics::counter!(observability::DEVICE_WRITES_TOTAL, "pass" => observability::PASS_LOCK_ENGINE)
                .increment(1);

            let (subject, body) = change_summary(&device, &changed);
            self.notifier
                .send(&subject, &body)
                .await
                .map_err(ReconcileError::collaborator("sending notification"))?;
        }

        Ok(())
    }

    /// Decide and act for every code value on one device. Returns the indices
    /// of the managed lock codes whose status changed.
    async fn converge_device(&self, device: &mut Device, now: Ms) -> Result<Vec<usize>, ReconcileError> {
        let lock_states = lock_states(device, now);
        if lock_states.is_empty() {
            return Ok(Vec::new());
        }

        let mut plans = Vec::with_capacity(lock_states.len());
        for (code, state) in lock_states {
            let adds: Vec<LockCodeStatus> = state
                .request_to_add
                .iter()
                .map(|&i| device.managed_lock_codes[i].status)
                .collect();
            let removes: Vec<LockCodeStatus> = state
                .request_to_remove
                .iter()
                .map(|&i| device.managed_lock_codes[i].status)
                .collect();
            let decision = decide(state.exists, &adds, &removes).map_err(|reason| ReconcileError::Invariant {
                device_id: device.id,
                code: code.clone(),
                reason,
            })?;
            plans.push((code, state, decision));
        }

        let property = if plans.iter().any(|(_, _, d)| d.command.is_some()) {
            let found = self
                .property_repository
                .get_cached(device.property_id)
                .await
                .map_err(ReconcileError::collaborator("getting property"))?;
            match found {
                Some(p) => Some(p),
                None => {
                    warn!(
                        device = %device.id,
                        property = %device.property_id,
                        "property not found, skipping device"
                    );
                    return Ok(Vec::new());
                }
            }
        } else {
            None
        };

        let mut changed = Vec::new();
        for (code, state, decision) in plans {
            if let (Some(command), Some(property)) = (decision.command, property.as_ref()) {
                debug!(device = %device.id, code = %code, command = command.label(), "sending lock command");
                match command {
                    Command::Add => self
                        .device_controller
                        .add_lock_code(property, device, &code)
                        .await
                        .map_err(ReconcileError::collaborator("adding lock code"))?,
                    Command::Remove => self
                        .device_controller
                        .remove_lock_code(property, device, &code)
                        .await
                        .map_err(ReconcileError::collaborator("removing lock code"))?,
                }
                metrics::counter!(observability::CONTROLLER_COMMANDS_TOTAL, "command" => command.label())
                    .increment(1);
            }

            let slots = state
                .request_to_add
                .iter()
                .zip(&decision.adds)
                .chain(state.request_to_remove.iter().zip(&decision.removes));
            for (&i, transition) in slots {
                let Some(transition) = transition else { continue };
                let mlc = &mut device.managed_lock_codes[i];
                if mlc.set_status(transition.to, now)? {
                    mlc.note = transition.note.to_string();
                    info!(device = %device.id, code = %mlc.code, status = %mlc.status, "{}", transition.note);
                    metrics::counter!(observability::STATUS_TRANSITIONS_TOTAL, "status" => mlc.status.as_str())
                        .increment(1);
                    changed.push(i);
                }
            }
        }

        Ok(changed)
    }
}

/// Group the device's started codes by value. Codes that have not started are
/// left alone whatever the lock reports.
fn lock_states(device: &Device, now: Ms) -> BTreeMap<String, LockState> {
    let mut states: BTreeMap<String, LockState> = BTreeMap::new();

    for (i, mlc) in device.managed_lock_codes.iter().enumerate() {
        if !mlc.has_started(now) {
            continue;
        }

        let state = states.entry(mlc.code.clone()).or_insert_with(|| LockState {
            exists: device.raw_device.has_code(&mlc.code),
            ..LockState::default()
        });

        if mlc.code_should_be_present(now) && !mlc.is_retired() {
            state.request_to_add.push(i);
        } else {
            state.request_to_remove.push(i);
        }
    }

    states
}

fn change_summary(device: &Device, changed: &[ManagedLockCode]) -> (String, String) {
    let subject = format!("Lock codes updated: {}", device.name());
    let body = changed
        .iter()
        .map(|m| format!("Code: {}, Status: {}", m.code, m.status))
        .collect::<Vec<_>>()
        .join("\n");
    (subject, body)
}
