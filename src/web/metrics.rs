//! Prometheus metrics definitions and registration.
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so the
//! controller can record unconditionally.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Install the Prometheus recorder and register all metric descriptions.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();
    Ok(handle)
}

fn register_metric_descriptions() {
    describe_gauge!(
        "nimbus_uptime_seconds",
        "Time in seconds since the controller started"
    );
    describe_gauge!(
        "nimbus_countdown_seconds_left",
        "Seconds left on the shade countdown (0 when idle)"
    );
    describe_counter!(
        "nimbus_store_writes_total",
        "Status store writes by field and result"
    );
    describe_counter!(
        "nimbus_snapshots_total",
        "Status snapshots received from the store"
    );
    describe_counter!(
        "nimbus_snapshot_errors_total",
        "Subscription errors and malformed snapshots"
    );
    describe_counter!(
        "nimbus_countdown_finished_total",
        "Countdowns that ran out"
    );
    describe_counter!(
        "nimbus_intents_rejected_total",
        "User intents rejected before reaching the store"
    );
}

pub struct Metrics;

impl Metrics {
    pub fn set_uptime(start_time: Instant) {
        gauge!("nimbus_uptime_seconds").set(start_time.elapsed().as_secs_f64());
    }

    pub fn set_countdown(seconds_left: Option<u64>) {
        gauge!("nimbus_countdown_seconds_left").set(seconds_left.unwrap_or_default() as f64);
    }

    pub fn record_store_write(field: &str, success: bool) {
        let result = if success { "ok" } else { "error" };
        counter!(
            "nimbus_store_writes_total",
            "field" => field.to_string(),
            "result" => result
        )
        .increment(1);
    }

    pub fn inc_snapshots() {
        counter!("nimbus_snapshots_total").increment(1);
    }

    pub fn inc_snapshot_errors() {
        counter!("nimbus_snapshot_errors_total").increment(1);
    }

    pub fn inc_countdown_finished() {
        counter!("nimbus_countdown_finished_total").increment(1);
    }

    pub fn inc_rejected_intents(reason: &'static str) {
        counter!("nimbus_intents_rejected_total", "reason" => reason).increment(1);
    }
}
