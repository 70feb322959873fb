use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: backend calls. Labels: op, status.
pub const BACKEND_CALLS_TOTAL: &str = "bizdir_backend_calls_total";

/// Histogram: backend call latency in seconds. Labels: op.
pub const BACKEND_CALL_DURATION_SECONDS: &str = "bizdir_backend_call_duration_seconds";

/// Counter: reservation submissions. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "bizdir_reservations_total";

/// Counter: failed full listing loads (prior snapshot kept).
pub const LISTING_LOAD_FAILURES_TOTAL: &str = "bizdir_listing_load_failures_total";

// ── Realtime ────────────────────────────────────────────────────

/// Counter: change events applied to a listing store. Labels: kind.
pub const CHANGE_EVENTS_TOTAL: &str = "bizdir_change_events_total";

/// Counter: notification payloads that failed to decode.
pub const CHANGE_EVENTS_DROPPED_TOTAL: &str = "bizdir_change_events_dropped_total";

/// Counter: times a subscriber fell behind and forced a full reload.
pub const SUBSCRIBER_LAG_TOTAL: &str = "bizdir_subscriber_lag_total";

/// Gauge: open change subscriptions.
pub const SUBSCRIPTIONS_ACTIVE: &str = "bizdir_subscriptions_active";

/// Gauge: listings held by the live mirror.
pub const LISTINGS_MIRRORED: &str = "bizdir_listings_mirrored";

/// Gauge: listings in the filtered, sorted view.
pub const LISTINGS_DISPLAYED: &str = "bizdir_listings_displayed";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::warn!("metrics exporter not installed: {e}"),
    }
}
