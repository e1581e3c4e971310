/*!
 * # Metrics Module
 *
 * Prometheus collectors for the checkout pipeline, exposed in text format
 * at `/metrics`.
 *
 * - Finalization outcomes and latency
 * - Webhook deliveries by result
 * - Payment gateway calls and circuit state
 */

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref FINALIZATION_OUTCOMES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "checkout_finalizations_total",
                "Checkout finalization attempts by outcome"
            ),
            &["source", "outcome"]
        )
        .expect("metric can be created")
    );

    pub static ref FINALIZATION_DURATION: HistogramVec = register(
        HistogramVec::new(
            HistogramOpts::new(
                "checkout_finalization_duration_seconds",
                "Wall time spent finalizing a checkout"
            ),
            &["outcome"]
        )
        .expect("metric can be created")
    );

    pub static ref WEBHOOK_DELIVERIES: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "payment_webhook_deliveries_total",
                "Inbound provider webhook deliveries by result"
            ),
            &["event", "result"]
        )
        .expect("metric can be created")
    );

    pub static ref GATEWAY_CALLS: IntCounterVec = register(
        IntCounterVec::new(
            Opts::new(
                "payment_gateway_calls_total",
                "Outbound payment provider calls by operation and result"
            ),
            &["operation", "result"]
        )
        .expect("metric can be created")
    );

    pub static ref CIRCUIT_STATE: IntGaugeVec = register(
        IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0 closed, 1 half-open, 2 open)"
            ),
            &["name"]
        )
        .expect("metric can be created")
    );
}

fn register<C>(collector: C) -> C
where
    C: Collector + Clone + 'static,
{
    if let Err(e) = REGISTRY.register(Box::new(collector.clone())) {
        error!(error = %e, "Failed to register metric collector");
    }
    collector
}

pub fn record_finalization(source: &str, outcome: &str, elapsed_secs: f64) {
    FINALIZATION_OUTCOMES
        .with_label_values(&[source, outcome])
        .inc();
    FINALIZATION_DURATION
        .with_label_values(&[outcome])
        .observe(elapsed_secs);
}

pub fn record_webhook(event: &str, result: &str) {
    WEBHOOK_DELIVERIES.with_label_values(&[event, result]).inc();
}

pub fn record_gateway_call(operation: &str, result: &str) {
    GATEWAY_CALLS.with_label_values(&[operation, result]).inc();
}

pub fn set_circuit_state(name: &str, state: i64) {
    CIRCUIT_STATE.with_label_values(&[name]).set(state);
}

/// Renders every registered collector in Prometheus text format.
pub fn render() -> Result<String, MetricsError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| MetricsError::ExportError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
}

/// `GET /metrics`
pub async fn metrics_handler() -> Response {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
