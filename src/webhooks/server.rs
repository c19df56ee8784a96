//! Admission webhook server.
//!
//! Provides HTTPS endpoints for the Kubernetes API server:
//! - `/v1/admit` - validation, always routed
//! - `/v1/mutate` - mutation, routed when enabled; allows without patches
//!
//! Each validation call runs on its own task under a cancellation token that
//! fires when the HTTP request is dropped, so an abandoned request still
//! finishes with an error outcome instead of vanishing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::webhooks::context::RequestContext;
use crate::webhooks::handler::ValidationHandler;
use crate::webhooks::request::{
    AdmissionRequest, AdmissionRequestExt, AdmissionResponse, AdmissionResponseExt,
    AdmissionReview, invalid_review,
};

/// Validation endpoint
pub const VALIDATE_PATH: &str = "/v1/admit";
/// Mutation endpoint
pub const MUTATE_PATH: &str = "/v1/mutate";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub handler: Arc<ValidationHandler>,
    pub request_timeout: Duration,
}

impl WebhookState {
    pub fn new(handler: Arc<ValidationHandler>, request_timeout: Duration) -> Self {
        Self {
            handler,
            request_timeout,
        }
    }
}

/// Unwrap the request from a review body, or build the 400 answer.
///
/// Undecodable bodies and reviews without a request both get an invalid
/// review envelope, so the API server always reads a review back.
#[allow(clippy::result_large_err)]
fn admission_request(
    payload: Result<Json<AdmissionReview>, JsonRejection>,
) -> Result<AdmissionRequest, (StatusCode, Json<AdmissionReview>)> {
    let reason = match payload {
        Ok(Json(review)) => match TryInto::<AdmissionRequest>::try_into(review) {
            Ok(request) => return Ok(request),
            Err(e) => e.to_string(),
        },
        Err(rejection) => rejection.body_text(),
    };
    error!(reason = %reason, "Invalid AdmissionReview");
    Err((
        StatusCode::BAD_REQUEST,
        Json(invalid_review(format!("Invalid AdmissionReview: {}", reason))),
    ))
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>, enable_mutation: bool) -> Router {
    let router = Router::new().route(VALIDATE_PATH, post(validate));
    let router = if enable_mutation {
        router.route(MUTATE_PATH, post(mutate))
    } else {
        router
    };
    router.with_state(state)
}

/// Validation admission handler
async fn validate(
    State(state): State<Arc<WebhookState>>,
    payload: Result<Json<AdmissionReview>, JsonRejection>,
) -> impl IntoResponse {
    let request = match admission_request(payload) {
        Ok(request) => request,
        Err(invalid) => return invalid,
    };

    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        kind = %request.kind.kind,
        namespace = %request.namespace_name(),
        name = %request.name,
        "Processing admission request"
    );

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let ctx = RequestContext::with_timeout(state.request_timeout).with_cancellation(cancel);
    let handler = state.handler.clone();
    let failed = AdmissionResponse::from(&request);

    let response = match tokio::spawn(async move { handler.handle(&request, &ctx).await }).await {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %failed.uid, error = %e, "Admission task failed");
            failed
                .deny(e)
                .with_code(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    (StatusCode::OK, Json(response.into_review()))
}

/// Mutation admission handler. No mutation is performed.
async fn mutate(
    State(_state): State<Arc<WebhookState>>,
    payload: Result<Json<AdmissionReview>, JsonRejection>,
) -> impl IntoResponse {
    let request = match admission_request(payload) {
        Ok(request) => request,
        Err(invalid) => return invalid,
    };
    debug!(uid = %request.uid, "Mutation request passed through");
    (
        StatusCode::OK,
        Json(
            AdmissionResponse::from(&request)
                .with_code(StatusCode::OK)
                .into_review(),
        ),
    )
}

/// Errors that can occur when running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:`port`. TLS certificates are loaded from the paths given
/// (PEM format).
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    enable_mutation: bool,
    port: u16,
    cert_path: PathBuf,
    key_path: PathBuf,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;

    let app = create_webhook_router(state, enable_mutation);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, mutation = enable_mutation, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
