//! Health server for Kubernetes health checks and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness check (always returns 200 if server is running)
//! - `/readyz` - Readiness check (returns 200 once the webhook is serving)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::webhooks::{OutcomeReporter, OutcomeTag};

/// Labels for admission request metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdmissionLabels {
    pub admission_status: String,
}

impl EncodeLabelSet for AdmissionLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("admission_status", self.admission_status.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the webhook
pub struct Metrics {
    /// Admission requests by outcome
    pub validation_request_count: Family<AdmissionLabels, Counter>,
    /// Admission request latency by outcome
    pub validation_request_duration_seconds: Family<AdmissionLabels, Histogram>,
    /// Admission events dropped because the queue was full
    pub admission_events_dropped: Counter,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let validation_request_count = Family::<AdmissionLabels, Counter>::default();
        registry.register(
            "gatekeeper_validation_request_count",
            "The number of requests that are routed to validation webhook",
            validation_request_count.clone(),
        );

        let validation_request_duration_seconds =
            Family::<AdmissionLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "gatekeeper_validation_request_duration_seconds",
            "The response time in seconds",
            validation_request_duration_seconds.clone(),
        );

        let admission_events_dropped = Counter::default();
        registry.register(
            "gatekeeper_admission_events_dropped",
            "Admission events dropped because the event queue was full",
            admission_events_dropped.clone(),
        );

        Self {
            validation_request_count,
            validation_request_duration_seconds,
            admission_events_dropped,
            registry,
        }
    }

    /// Record one finished admission request
    pub fn record_request(&self, outcome: OutcomeTag, duration_secs: f64) {
        let labels = AdmissionLabels {
            admission_status: outcome.as_str().to_string(),
        };
        self.validation_request_count.get_or_create(&labels).inc();
        self.validation_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

impl OutcomeReporter for Metrics {
    fn report_outcome(&self, outcome: OutcomeTag, elapsed: Duration) {
        self.record_request(outcome, elapsed.as_secs_f64());
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the webhook is serving
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness check handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check handler
///
/// Returns 503 Service Unavailable until the webhook is serving.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server
///
/// Binds to 0.0.0.0:`port` and serves health/metrics endpoints.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
