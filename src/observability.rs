use std::net::SocketAddr;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: reservations persisted as PENDING_PAYMENT.
pub const RESERVATIONS_CREATED_TOTAL: &str = "courtbook_reservations_created_total";

/// Counter: bookings rejected for overlap. Labels: phase (check, commit).
pub const CONFLICTS_TOTAL: &str = "courtbook_conflicts_total";

/// Counter: applied status transitions. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "courtbook_status_transitions_total";

/// Counter: transitions refused by the state machine.
pub const INVALID_TRANSITIONS_TOTAL: &str = "courtbook_invalid_transitions_total";

/// Counter: reservations marked COMPLETED by the sweeper.
pub const COMPLETIONS_SWEPT_TOTAL: &str = "courtbook_completions_swept_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtbook_wal_flush_duration_seconds";

/// Histogram: group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
