use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;
use ulid::Ulid;

use crate::model::{Reservation, Unit};
use crate::ports::{PortResult, ReservationRepository};

/// Merges several upstream booking systems into one `ReservationRepository`.
///
/// Sources are queried concurrently and merged in the order given. When two
/// sources report the same transaction number for a unit, the earlier source wins.
pub struct ReservationAggregator {
    sources: Vec<Arc<dyn ReservationRepository>>,
}

impl ReservationAggregator {
    pub fn new(sources: Vec<Arc<dyn ReservationRepository>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl ReservationRepository for ReservationAggregator {
    async fn get_for_units(&self, units: &[Unit]) -> PortResult<HashMap<Ulid, Vec<Reservation>>> {
        let per_source = try_join_all(self.sources.iter().map(|s| s.get_for_units(units))).await?;

        let mut merged: HashMap<Ulid, Vec<Reservation>> = HashMap::new();
        let mut seen: HashMap<Ulid, HashSet<String>> = HashMap::new();
        for (source, by_unit) in per_source.into_iter().enumerate() {
            // Walk units in input order so the merged lists are stable.
            for unit in units {
                let Some(reservations) = by_unit.get(&unit.id) else { continue };
                let seen = seen.entry(unit.id).or_default();
                let list = merged.entry(unit.id).or_default();
                for r in reservations {
                    if seen.insert(r.transaction_number.clone()) {
                        list.push(r.clone());
                    } else {
                        debug!(unit = %unit.id, source, transaction = %r.transaction_number, "duplicate reservation dropped");
                    }
                }
            }
        }
        Ok(merged)
    }
}
