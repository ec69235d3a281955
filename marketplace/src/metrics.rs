//! Business metrics.
//!
//! Counters are recorded through the `metrics` facade; the server binary
//! installs the Prometheus exporter on its own listener. Without an installed
//! recorder (tests) every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter listening on `addr` and describe every metric.
///
/// # Errors
///
/// Returns error if the exporter cannot be built or a recorder is already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_business_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Describe all business metrics.
pub fn register_business_metrics() {
    describe_counter!(
        "marketplace_requests_total",
        "Request lifecycle events by event"
    );
    describe_counter!("marketplace_offers_total", "Offer lifecycle events by event");
    describe_counter!(
        "marketplace_appointments_total",
        "Appointment lifecycle events by event"
    );
    describe_counter!(
        "marketplace_scheduling_conflicts_total",
        "Bookings or reschedules rejected for overlapping an existing appointment"
    );
    describe_counter!(
        "marketplace_payment_intents_total",
        "Payment intents by resulting status"
    );
    describe_counter!(
        "marketplace_reconciliations_total",
        "Confirmation deliveries by disposition"
    );
    describe_counter!(
        "marketplace_notifications_total",
        "Notifications recorded by type"
    );
    describe_counter!(
        "marketplace_payment_discrepancies_total",
        "Reconciliation discrepancies recorded for repair"
    );
    describe_histogram!(
        "marketplace_processor_call_duration_seconds",
        "Latency of external processor calls"
    );
}

pub(crate) fn request_event(event: &'static str) {
    counter!("marketplace_requests_total", "event" => event).increment(1);
}

pub(crate) fn offer_event(event: &'static str) {
    counter!("marketplace_offers_total", "event" => event).increment(1);
}

pub(crate) fn appointment_event(event: &'static str) {
    counter!("marketplace_appointments_total", "event" => event).increment(1);
}

pub(crate) fn scheduling_conflict() {
    counter!("marketplace_scheduling_conflicts_total").increment(1);
}

pub(crate) fn payment_intent(status: &'static str) {
    counter!("marketplace_payment_intents_total", "status" => status).increment(1);
}

pub(crate) fn reconciliation(result: &'static str) {
    counter!("marketplace_reconciliations_total", "result" => result).increment(1);
}

pub(crate) fn notification(kind: &'static str) {
    counter!("marketplace_notifications_total", "type" => kind).increment(1);
}

pub(crate) fn discrepancy() {
    counter!("marketplace_payment_discrepancies_total").increment(1);
}

pub(crate) fn processor_call(processor: &'static str, elapsed: Duration) {
    histogram!("marketplace_processor_call_duration_seconds", "processor" => processor)
        .record(elapsed.as_secs_f64());
}
