use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::feed::MemoryReservations;
use crate::model::{Device, Property, Reservation, Unit};
use crate::ports::PortResult;
use crate::store::InMemoryStore;

/// JSON seed data for a fresh store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Reservations by unit ID.
    #[serde(default)]
    pub reservations: HashMap<Ulid, Vec<Reservation>>,
}

impl Fixture {
    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> io::Result<Self> {
        serde_json::from_str(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Save records the store doesn't already hold and load the reservations.
    /// Records that survived from an earlier run keep their persisted state.
    pub async fn seed(self, store: &InMemoryStore, reservations: &MemoryReservations) -> PortResult<usize> {
        let mut saved = 0;
        for property in self.properties {
            if store.property(property.id).is_none() {
                store.save_property(property).await?;
                saved += 1;
            }
        }
        for unit in self.units {
            if store.unit(unit.id).is_none() {
                store.save_unit(unit).await?;
                saved += 1;
            }
        }
        for device in self.devices {
            if store.device(device.id).is_none() {
                store.save_device(device).await?;
                saved += 1;
            }
        }
        let reservation_units = self.reservations.len();
        for (unit_id, list) in self.reservations {
            reservations.set(unit_id, list);
        }
        info!(saved, reservation_units, "fixture seeded");
        Ok(saved)
    }
}
