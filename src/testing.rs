use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::PortError;
use crate::model::*;
use crate::ports::*;

pub const NOW: Ms = 1_700_000_000_000;

pub fn device_with(codes: Vec<ManagedLockCode>, present: &[&str]) -> Device {
    Device {
        id: Ulid::new(),
        property_id: Ulid::new(),
        unit_id: None,
        raw_device: RawDevice {
            name: "Front door".into(),
            lock_codes: present
                .iter()
                .enumerate()
                .map(|(slot, code)| RawLockCode {
                    slot: slot as u32 + 1,
                    code: code.to_string(),
                    name: String::new(),
                })
                .collect(),
        },
        managed_lock_codes: codes,
        last_refreshed_at: 0,
    }
}

pub fn mlc(code: &str, status: LockCodeStatus, start_at: Ms, end_at: Ms) -> ManagedLockCode {
    let mut m = ManagedLockCode::scheduled(code.into(), start_at, end_at, String::new());
    m.status = status;
    m
}

pub fn property_for(device: &Device) -> Property {
    Property {
        id: device.property_id,
        name: "Lakeside".into(),
        controller_id: "9876".into(),
        updated_by: String::new(),
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub devices: Mutex<Vec<Device>>,
    pub puts: Mutex<Vec<Device>>,
    pub audits: Mutex<Vec<(Ulid, Vec<ManagedLockCode>, Ms)>>,
}

impl FakeDevices {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn audit_count(&self) -> usize {
        self.audits.lock().unwrap().len()
    }

    pub fn device(&self, id: Ulid) -> Device {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl DeviceRepository for FakeDevices {
    async fn list(&self) -> PortResult<Vec<Device>> {
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn put(&self, device: Device) -> PortResult<Device> {
        let mut devices = self.devices.lock().unwrap();
        if let Some(slot) = devices.iter_mut().find(|d| d.id == device.id) {
            *slot = device.clone();
        }
        self.puts.lock().unwrap().push(device.clone());
        Ok(device)
    }

    async fn append_to_audit_log(&self, device: &Device, changed: &[ManagedLockCode], now: Ms) -> PortResult<()> {
        self.audits.lock().unwrap().push((device.id, changed.to_vec(), now));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProperties {
    pub properties: HashMap<Ulid, Property>,
    pub lookups: Mutex<usize>,
}

impl FakeProperties {
    pub fn new(properties: impl IntoIterator<Item = Property>) -> Self {
        Self {
            properties: properties.into_iter().map(|p| (p.id, p)).collect(),
            lookups: Mutex::new(0),
        }
    }
}

#[async_trait]
impl PropertyRepository for FakeProperties {
    async fn get_cached(&self, id: Ulid) -> PortResult<Option<Property>> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self.properties.get(&id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Add(Ulid, String),
    Remove(Ulid, String),
}

#[derive(Default)]
pub struct FakeController {
    pub calls: Mutex<Vec<Call>>,
    pub fail: bool,
}

impl FakeController {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceController for FakeController {
    async fn add_lock_code(&self, _property: &Property, device: &Device, code: &str) -> PortResult<()> {
        if self.fail {
            return Err(PortError::new("controller offline"));
        }
        self.calls.lock().unwrap().push(Call::Add(device.id, code.into()));
        Ok(())
    }

    async fn remove_lock_code(&self, _property: &Property, device: &Device, code: &str) -> PortResult<()> {
        if self.fail {
            return Err(PortError::new("controller offline"));
        }
        self.calls.lock().unwrap().push(Call::Remove(device.id, code.into()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, subject: &str, body: &str) -> PortResult<()> {
        self.sent.lock().unwrap().push((subject.into(), body.into()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeUnits {
    pub units: Vec<Unit>,
}

#[async_trait]
impl UnitRepository for FakeUnits {
    async fn list(&self) -> PortResult<Vec<Unit>> {
        Ok(self.units.clone())
    }
}

pub fn unit() -> Unit {
    Unit {
        id: Ulid::new(),
        name: "Unit 1".into(),
        property_id: Ulid::new(),
        calendar_url: "notBlank".into(),
        updated_by: String::new(),
    }
}

#[derive(Default)]
pub struct FakeReservations {
    pub by_unit: HashMap<Ulid, Vec<Reservation>>,
    pub fail: bool,
}

#[async_trait]
impl ReservationRepository for FakeReservations {
    async fn get_for_units(&self, units: &[Unit]) -> PortResult<HashMap<Ulid, Vec<Reservation>>> {
        if self.fail {
            return Err(PortError::new("calendar unavailable"));
        }
        Ok(units
            .iter()
            .filter_map(|u| self.by_unit.get(&u.id).map(|r| (u.id, r.clone())))
            .collect())
    }
}

pub fn reservation(id: &str, transaction_number: &str, start: Ms, end: Ms) -> Reservation {
    Reservation {
        id: id.into(),
        transaction_number: transaction_number.into(),
        start,
        end,
        summary: String::new(),
        status: String::new(),
    }
}
