//! Policy engine seam and the evaluation dispatcher.
//!
//! The engine itself lives outside this crate. It receives the admission
//! request augmented with its namespace and returns one result per violated
//! constraint.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::webhooks::context::RequestContext;
use crate::webhooks::request::AdmissionRequest;
use crate::webhooks::trace_config::TracingDirective;

/// What a violated constraint asks the webhook to do.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnforcementAction {
    /// Block the request
    Deny,
    /// Report without blocking
    Dryrun,
    /// Pass through
    Warn,
    /// Any action this webhook does not know
    Other(String),
}

impl EnforcementAction {
    pub fn as_str(&self) -> &str {
        match self {
            EnforcementAction::Deny => "deny",
            EnforcementAction::Dryrun => "dryrun",
            EnforcementAction::Warn => "warn",
            EnforcementAction::Other(action) => action,
        }
    }

    /// Whether the violation is logged and reported as an event.
    pub fn is_reported(&self) -> bool {
        matches!(self, EnforcementAction::Deny | EnforcementAction::Dryrun)
    }
}

impl From<String> for EnforcementAction {
    fn from(action: String) -> Self {
        match action.as_str() {
            "deny" => EnforcementAction::Deny,
            "dryrun" => EnforcementAction::Dryrun,
            "warn" => EnforcementAction::Warn,
            _ => EnforcementAction::Other(action),
        }
    }
}

impl From<&str> for EnforcementAction {
    fn from(action: &str) -> Self {
        EnforcementAction::from(action.to_string())
    }
}

impl From<EnforcementAction> for String {
    fn from(action: EnforcementAction) -> Self {
        match action {
            EnforcementAction::Other(action) => action,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the constraint that produced a result.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// One violated constraint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub enforcement_action: EnforcementAction,
    pub constraint: ConstraintRef,
    #[serde(default)]
    pub msg: String,
}

/// Answer of one engine review.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineResponse {
    /// Violations in engine order
    #[serde(default)]
    pub results: Vec<EvaluationResult>,
    /// Decision trace, present when tracing was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl EngineResponse {
    /// Human-readable trace for the log.
    pub fn trace_dump(&self) -> String {
        match &self.trace {
            Some(trace) => format!("Trace:\n{}", trace),
            None => "Trace: <none>".to_string(),
        }
    }
}

/// Input to the engine: the request plus its namespace object.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewContext<'a> {
    pub admission_request: &'a AdmissionRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
}

impl<'a> ReviewContext<'a> {
    pub fn new(admission_request: &'a AdmissionRequest, namespace: Option<Namespace>) -> Self {
        Self {
            admission_request,
            namespace,
        }
    }
}

/// The policy evaluation engine.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluate all constraints against the review.
    async fn review(&self, review: &ReviewContext<'_>, tracing: bool) -> Result<EngineResponse>;

    /// The engine's internal state, for diagnostics.
    async fn dump(&self) -> Result<String>;
}

/// Engine reached over HTTP.
///
/// `POST /v1/review` takes `{review, tracing}` and answers an
/// [`EngineResponse`]; `GET /v1/dump` answers the state dump as text.
pub struct HttpPolicyEngine {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ReviewBody<'a, 'b> {
    review: &'a ReviewContext<'b>,
    tracing: bool,
}

impl HttpPolicyEngine {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response, call: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Engine(format!("{} returned {}: {}", call, status, body)))
    }
}

#[async_trait]
impl PolicyEngine for HttpPolicyEngine {
    async fn review(&self, review: &ReviewContext<'_>, tracing: bool) -> Result<EngineResponse> {
        let response = self
            .client
            .post(format!("{}/v1/review", self.base_url))
            .json(&ReviewBody { review, tracing })
            .send()
            .await?;
        let response = Self::check(response, "review").await?;
        Ok(response.json::<EngineResponse>().await?)
    }

    async fn dump(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/v1/dump", self.base_url))
            .send()
            .await?;
        let response = Self::check(response, "dump").await?;
        Ok(response.text().await?)
    }
}

/// Calls the engine and logs the diagnostics a tracing directive asks for.
#[derive(Clone)]
pub struct EvaluationDispatcher {
    engine: Arc<dyn PolicyEngine>,
}

impl EvaluationDispatcher {
    pub fn new(engine: Arc<dyn PolicyEngine>) -> Self {
        Self { engine }
    }

    /// Evaluate the review. Engine failures propagate; a failed state dump
    /// is only logged.
    pub async fn evaluate(
        &self,
        review: &ReviewContext<'_>,
        directive: TracingDirective,
        ctx: &RequestContext,
    ) -> Result<Vec<EvaluationResult>> {
        let response = ctx.run(self.engine.review(review, directive.enabled)).await?;

        if directive.enabled {
            info!(trace = %response.trace_dump(), "Evaluation trace");
        }
        if directive.dump {
            match ctx.run(self.engine.dump()).await {
                Ok(dump) => info!(dump = %dump, "Engine state dump"),
                Err(e) => error!(error = %e, "dump error"),
            }
        }

        Ok(response.results)
    }
}
