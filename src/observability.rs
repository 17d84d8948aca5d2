use std::net::SocketAddr;
use std::time::Instant;

// ── Pass-level (RED) ────────────────────────────────────────────

/// Counter: reconciliation passes. Labels: pass, status.
pub const PASSES_TOTAL: &str = "lockwarden_passes_total";

/// Histogram: pass duration in seconds. Labels: pass.
pub const PASS_DURATION_SECONDS: &str = "lockwarden_pass_duration_seconds";

pub const PASS_SCHEDULER: &str = "scheduler";
pub const PASS_LOCK_ENGINE: &str = "lock_engine";
pub const PASS_REFRESH: &str = "refresh";

// ── Work done ───────────────────────────────────────────────────

/// Counter: add/remove calls sent to the controller. Labels: command.
pub const CONTROLLER_COMMANDS_TOTAL: &str = "lockwarden_controller_commands_total";

/// Counter: managed lock code status changes. Labels: status (the new one).
pub const STATUS_TRANSITIONS_TOTAL: &str = "lockwarden_status_transitions_total";

/// Counter: device writes (audit append + put). Labels: pass.
pub const DEVICE_WRITES_TOTAL: &str = "lockwarden_device_writes_total";

/// Counter: managed lock codes created from reservations.
pub const LOCK_CODES_CREATED_TOTAL: &str = "lockwarden_lock_codes_created_total";

/// Counter: orphaned codes whose end was pulled in.
pub const ORPHANS_DEGRADED_TOTAL: &str = "lockwarden_orphans_degraded_total";

/// Histogram: store log compaction duration in seconds.
pub const COMPACTION_DURATION_SECONDS: &str = "lockwarden_compaction_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record one finished pass.
pub fn record_pass(pass: &'static str, started: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(PASSES_TOTAL, "pass" => pass, "status" => status).increment(1);
    metrics::histogram!(PASS_DURATION_SECONDS, "pass" => pass).record(started.elapsed().as_secs_f64());
}
