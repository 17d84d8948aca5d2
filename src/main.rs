use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lockwarden::aggregator::ReservationAggregator;
use lockwarden::config::Config;
use lockwarden::controller::SimulatedController;
use lockwarden::feed::{FeedRepository, MemoryReservations};
use lockwarden::fixture::Fixture;
use lockwarden::lockengine::LockEngine;
use lockwarden::notify::LogNotifier;
use lockwarden::ports::{DeviceRepository, ReservationRepository};
use lockwarden::runner::{run_reconciler, Reconciler};
use lockwarden::scheduler::Scheduler;
use lockwarden::store::{InMemoryStore, PropertyCache};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    lockwarden::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(InMemoryStore::open(config.store_path())?);
    let reservations = Arc::new(MemoryReservations::new());

    if let Some(path) = &config.fixture {
        Fixture::load(path)?.seed(&store, &reservations).await?;
    }

    let controller = Arc::new(SimulatedController::new(store.clone()));
    for device in store.list().await? {
        controller.adopt_snapshot(&device);
    }

    let property_cache = Arc::new(PropertyCache::new(store.clone()));
    let sources: Vec<Arc<dyn ReservationRepository>> = vec![Arc::new(FeedRepository::new(reservations.clone()))];
    let aggregator = Arc::new(ReservationAggregator::new(sources));
    let scheduler = Scheduler::new(store.clone(), aggregator, store.clone());
    let lock_engine = LockEngine::new(
        controller.clone(),
        store.clone(),
        Arc::new(LogNotifier),
        property_cache.clone(),
    );
    let reconciler = Arc::new(
        Reconciler::new(scheduler, lock_engine)
            .with_refresher(controller)
            .with_property_cache(property_cache)
            .with_compaction(store.clone(), config.compact_threshold),
    );

    info!("lockwarden started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  interval: {}s", config.interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let runner = tokio::spawn(run_reconciler(reconciler, config.interval));

    // Stop on SIGTERM/ctrl-c. Every write is already durable, so there is nothing to drain.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    runner.abort();
    store.compact().await?;
    info!("lockwarden stopped");
    Ok(())
}
