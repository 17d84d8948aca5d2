use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::try_join_all;
use tracing::debug;
use ulid::Ulid;

use crate::model::{Reservation, Unit};
use crate::ports::{PortResult, ReservationRepository};

/// Fetches the reservations of a single unit from one upstream system.
#[async_trait]
pub trait UnitFeed: Send + Sync {
    async fn fetch(&self, unit: &Unit) -> PortResult<Vec<Reservation>>;
}

/// Adapts a per-unit feed to the bulk `ReservationRepository` contract.
///
/// Units are fetched concurrently. The first failure fails the whole call.
pub struct FeedRepository {
    feed: Arc<dyn UnitFeed>,
}

impl FeedRepository {
    pub fn new(feed: Arc<dyn UnitFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl ReservationRepository for FeedRepository {
    async fn get_for_units(&self, units: &[Unit]) -> PortResult<HashMap<Ulid, Vec<Reservation>>> {
        let fetches = units.iter().filter(|u| u.has_reservation_source()).map(|u| async move {
            let reservations = self.feed.fetch(u).await?;
            debug!(unit = %u.id, count = reservations.len(), "fetched reservations");
            Ok::<_, crate::error::PortError>((u.id, reservations))
        });
        Ok(try_join_all(fetches).await?.into_iter().collect())
    }
}

/// Reservations held in memory, keyed by unit.
#[derive(Default)]
pub struct MemoryReservations {
    by_unit: DashMap<Ulid, Vec<Reservation>>,
}

impl MemoryReservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, unit_id: Ulid, reservations: Vec<Reservation>) {
        self.by_unit.insert(unit_id, reservations);
    }

    pub fn upsert(&self, unit_id: Ulid, reservation: Reservation) {
        let mut list = self.by_unit.entry(unit_id).or_default();
        match list.iter_mut().find(|r| r.id == reservation.id) {
            Some(existing) => *existing = reservation,
            None => list.push(reservation),
        }
    }

    pub fn cancel(&self, unit_id: Ulid, reservation_id: &str) {
        if let Some(mut list) = self.by_unit.get_mut(&unit_id) {
            list.retain(|r| r.id != reservation_id);
        }
    }
}

#[async_trait]
impl UnitFeed for MemoryReservations {
    async fn fetch(&self, unit: &Unit) -> PortResult<Vec<Reservation>> {
        Ok(self.by_unit.get(&unit.id).map(|e| e.value().clone()).unwrap_or_default())
    }
}
