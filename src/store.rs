use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::error::PortError;
use crate::model::*;
use crate::observability;
use crate::ports::{DeviceRepository, PortResult, PropertyRepository, UnitRepository};
use crate::journal::Journal;

// ── Journal writer ───────────────────────────────────────

enum JournalCommand {
    Append {
        events: Vec<StoreEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Rewrite {
        events: Vec<StoreEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    RecordsSinceRewrite {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Vec<StoreEvent>, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that queue up while a write is in flight are
/// committed together with a single sync.
async fn journal_writer(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut journal, batch);
                if let Some(other) = deferred {
                    handle_command(&mut journal, other);
                }
            }
            other => handle_command(&mut journal, other),
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: Vec<Pending>) {
    let events: Vec<StoreEvent> = batch.iter().flat_map(|(e, _)| e.iter().cloned()).collect();
    let result = journal.append(&events);
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_command(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Rewrite { events, response } => {
            let _ = response.send(journal.rewrite(&events));
        }
        JournalCommand::RecordsSinceRewrite { response } => {
            let _ = response.send(journal.records_since_rewrite());
        }
        JournalCommand::Append { events, response } => commit_batch(journal, vec![(events, response)]),
    }
}

/// In-memory repositories for properties, units, devices and audit logs,
/// optionally backed by a [`Journal`] on disk.
pub struct InMemoryStore {
    properties: DashMap<Ulid, Property>,
    units: DashMap<Ulid, Unit>,
    devices: DashMap<Ulid, Device>,
    audit_logs: DashMap<Ulid, AuditLog>,
    journal_tx: Option<mpsc::Sender<JournalCommand>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A store that lives only in memory.
    pub fn new() -> Self {
        Self {
            properties: DashMap::new(),
            units: DashMap::new(),
            devices: DashMap::new(),
            audit_logs: DashMap::new(),
            journal_tx: None,
        }
    }

    /// Rebuild the store from the journal at `path` and keep appending to it.
    /// Must be called inside a tokio runtime.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let (journal, recovered) = Journal::open(&path)?;
        let (journal_tx, journal_rx) = mpsc::channel(1024);
        tokio::spawn(journal_writer(journal, journal_rx));

        let mut store = Self::new();
        for event in &recovered.events {
            store.apply(event);
        }
        store.journal_tx = Some(journal_tx);
        info!(
            path = %path.display(),
            events = recovered.events.len(),
            discarded_bytes = recovered.discarded_bytes,
            devices = store.devices.len(),
            "store journal replayed"
        );
        Ok(store)
    }

    fn apply(&self, event: &StoreEvent) {
        match event {
            StoreEvent::PropertySaved(p) => {
                self.properties.insert(p.id, p.clone());
            }
            StoreEvent::UnitSaved(u) => {
                self.units.insert(u.id, u.clone());
            }
            StoreEvent::DeviceSaved(d) => {
                self.devices.insert(d.id, d.clone());
            }
            StoreEvent::AuditAppended { device_id, entries } => {
                self.audit_logs
                    .entry(*device_id)
                    .or_insert_with(|| AuditLog::new(*device_id))
                    .append(entries.iter().cloned());
            }
        }
    }

    async fn persist(&self, events: Vec<StoreEvent>) -> PortResult<()> {
        let Some(journal_tx) = &self.journal_tx else { return Ok(()) };
        let (tx, rx) = oneshot::channel();
        journal_tx
            .send(JournalCommand::Append { events, response: tx })
            .await
            .map_err(|_| PortError::new("store journal writer shut down"))?;
        rx.await
            .map_err(|_| PortError::new("store journal writer dropped response"))??;
        Ok(())
    }

    /// Log and apply in one step.
    async fn persist_and_apply(&self, event: StoreEvent) -> PortResult<()> {
        self.persist(vec![event.clone()]).await?;
        self.apply(&event);
        Ok(())
    }

    // ── Seeding / admin ──────────────────────────────────────

    pub async fn save_property(&self, property: Property) -> PortResult<()> {
        self.persist_and_apply(StoreEvent::PropertySaved(property)).await
    }

    pub async fn save_unit(&self, unit: Unit) -> PortResult<()> {
        self.persist_and_apply(StoreEvent::UnitSaved(unit)).await
    }

    pub async fn save_device(&self, device: Device) -> PortResult<()> {
        self.persist_and_apply(StoreEvent::DeviceSaved(device)).await
    }

    pub fn device(&self, id: Ulid) -> Option<Device> {
        self.devices.get(&id).map(|e| e.value().clone())
    }

    pub fn property(&self, id: Ulid) -> Option<Property> {
        self.properties.get(&id).map(|e| e.value().clone())
    }

    pub fn unit(&self, id: Ulid) -> Option<Unit> {
        self.units.get(&id).map(|e| e.value().clone())
    }

    pub fn device_ids(&self) -> Vec<Ulid> {
        self.devices.iter().map(|e| *e.key()).collect()
    }

    pub fn audit_log(&self, device_id: Ulid) -> Option<AuditLog> {
        self.audit_logs.get(&device_id).map(|e| e.value().clone())
    }

    /// Apply `f` to a stored device and persist the result.
    pub async fn update_device<F>(&self, id: Ulid, f: F) -> PortResult<Device>
    where
        F: FnOnce(&mut Device),
    {
        let mut device = self
            .device(id)
            .ok_or_else(|| PortError::new(format!("device {id} not found")))?;
        f(&mut device);
        self.save_device(device.clone()).await?;
        Ok(device)
    }

    // ── Compaction ───────────────────────────────────────────

    /// Events that rebuild the current state from scratch.
    fn snapshot(&self) -> Vec<StoreEvent> {
        let mut events: Vec<StoreEvent> = Vec::new();
        events.extend(self.properties.iter().map(|e| StoreEvent::PropertySaved(e.value().clone())));
        events.extend(self.units.iter().map(|e| StoreEvent::UnitSaved(e.value().clone())));
        events.extend(self.devices.iter().map(|e| StoreEvent::DeviceSaved(e.value().clone())));
        events.extend(self.audit_logs.iter().map(|e| StoreEvent::AuditAppended {
            device_id: *e.key(),
            entries: e.value().entries.clone(),
        }));
        events
    }

    /// Rewrite the journal as a snapshot of the current state. No-op without a journal.
    pub async fn compact(&self) -> io::Result<()> {
        let Some(journal_tx) = &self.journal_tx else { return Ok(()) };
        let started = Instant::now();
        let events = self.snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        journal_tx
            .send(JournalCommand::Rewrite { events, response: tx })
            .await
            .map_err(|_| io::Error::other("store journal writer shut down"))?;
        rx.await
            .map_err(|_| io::Error::other("store journal writer dropped response"))??;
        metrics::histogram!(observability::COMPACTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(events = count, "store journal compacted");
        Ok(())
    }

    /// Journal records written since the last compaction, counting those replayed on open.
    pub async fn appends_since_compact(&self) -> u64 {
        let Some(journal_tx) = &self.journal_tx else { return 0 };
        let (tx, rx) = oneshot::channel();
        if journal_tx.send(JournalCommand::RecordsSinceRewrite { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl DeviceRepository for InMemoryStore {
    async fn list(&self) -> PortResult<Vec<Device>> {
        let mut devices: Vec<Device> = self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.name().cmp(b.name()).then(a.id.cmp(&b.id)));
        Ok(devices)
    }

    async fn put(&self, device: Device) -> PortResult<Device> {
        self.save_device(device.clone()).await?;
        Ok(device)
    }

    async fn append_to_audit_log(&self, device: &Device, changed: &[ManagedLockCode], now: Ms) -> PortResult<()> {
        if changed.is_empty() {
            return Ok(());
        }
        let entries = changed.iter().map(|m| AuditLogEntry::for_lock_code(m, now)).collect();
        self.persist_and_apply(StoreEvent::AuditAppended {
            device_id: device.id,
            entries,
        })
        .await
    }
}

#[async_trait]
impl PropertyRepository for InMemoryStore {
    async fn get_cached(&self, id: Ulid) -> PortResult<Option<Property>> {
        Ok(self.property(id))
    }
}

#[async_trait]
impl UnitRepository for InMemoryStore {
    async fn list(&self) -> PortResult<Vec<Unit>> {
        let mut units: Vec<Unit> = self.units.iter().map(|e| e.value().clone()).collect();
        units.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(units)
    }
}

/// Memoizes property lookups until `clear` is called, normally once per pass.
pub struct PropertyCache {
    inner: Arc<dyn PropertyRepository>,
    cache: DashMap<Ulid, Option<Property>>,
}

impl PropertyCache {
    pub fn new(inner: Arc<dyn PropertyRepository>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl PropertyRepository for PropertyCache {
    async fn get_cached(&self, id: Ulid) -> PortResult<Option<Property>> {
        if let Some(hit) = self.cache.get(&id) {
            return Ok(hit.value().clone());
        }
        let property = self.inner.get_cached(id).await?;
        self.cache.insert(id, property.clone());
        Ok(property)
    }
}
