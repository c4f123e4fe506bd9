use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::RejectionReason;

// ── Reservation decisions ───────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (`accepted` or a rejection code).
pub const RESERVATIONS_TOTAL: &str = "slotwise_reservations_total";

/// Histogram: time spent in the validator while holding the commit locks, in seconds.
pub const VALIDATION_DURATION_SECONDS: &str = "slotwise_validation_duration_seconds";

/// Histogram: availability search latency in seconds.
pub const SEARCH_DURATION_SECONDS: &str = "slotwise_search_duration_seconds";

// ── State and storage ───────────────────────────────────────────

/// Gauge: resources currently loaded.
pub const RESOURCES_ACTIVE: &str = "slotwise_resources_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotwise_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt `tracing` subscriber. Returns false if one was already set.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt::try_init().is_ok()
}

/// Label for `RESERVATIONS_TOTAL`.
pub fn outcome_label(verdict: &Result<(), RejectionReason>) -> &'static str {
    match verdict {
        Ok(()) => "accepted",
        Err(reason) => reason.code(),
    }
}
