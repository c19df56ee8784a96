//! The validation pipeline.
//!
//! ```text
//! Start -> SelfCheck -> OperationFilter -> OwnResourceFilter
//!       -> NamespaceExclusion -> Evaluate -> Aggregate -> Respond
//! ```
//!
//! Every filter stage may end the request with an allow. Evaluation failures
//! end it according to the failure policy. The outcome of every request is
//! reported exactly once, by [`ValidationHandler::handle`], after the
//! pipeline has returned it.

use std::sync::Arc;

use axum::http::StatusCode;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::settings::{FailurePolicy, WebhookSettings};
use crate::webhooks::context::RequestContext;
use crate::webhooks::engine::{
    EvaluationDispatcher, EvaluationResult, PolicyEngine, ReviewContext,
};
use crate::webhooks::filters::{self, Bypass, Process, ProcessExcluder};
use crate::webhooks::namespace::NamespaceAugmenter;
use crate::webhooks::outcome::{OutcomeReporter, OutcomeTag};
use crate::webhooks::request::{
    AdmissionRequest, AdmissionRequestExt, AdmissionResponse, AdmissionResponseExt,
};
use crate::webhooks::trace_config::ConfigResolver;
use crate::webhooks::violations::{EventSink, ViolationAggregator};

/// Where the pipeline ended.
#[derive(Debug)]
pub enum Decision {
    /// A filter allowed the request without evaluation
    Bypassed(Bypass),
    /// A store read or the engine failed
    Failed(Error),
    /// Evaluation finished; holds the deny messages, empty to allow
    Evaluated(Vec<String>),
}

/// Turn a decision into the outcome to record and the response to send.
pub fn build_response(
    decision: Decision,
    request: &AdmissionRequest,
    failure_policy: FailurePolicy,
) -> (OutcomeTag, AdmissionResponse) {
    let response = AdmissionResponse::from(request);
    match decision {
        Decision::Bypassed(bypass) => (
            bypass.outcome(),
            response.with_message(bypass.message()).with_code(StatusCode::OK),
        ),
        Decision::Failed(e) => {
            let response = match failure_policy {
                FailurePolicy::Closed => response
                    .deny(&e)
                    .with_code(StatusCode::INTERNAL_SERVER_ERROR),
                FailurePolicy::Open => response.with_message(&e).with_code(StatusCode::OK),
            };
            (OutcomeTag::Error, response)
        }
        Decision::Evaluated(msgs) if msgs.is_empty() => {
            (OutcomeTag::Allow, response.with_code(StatusCode::OK))
        }
        Decision::Evaluated(msgs) => (
            OutcomeTag::Deny,
            response
                .deny(msgs.join("\n"))
                .with_code(StatusCode::FORBIDDEN),
        ),
    }
}

/// Decides admission requests.
///
/// Shared by all in-flight requests; holds no per-request state.
pub struct ValidationHandler {
    service_account: String,
    failure_policy: FailurePolicy,
    excluder: Arc<ProcessExcluder>,
    config: ConfigResolver,
    namespaces: NamespaceAugmenter,
    dispatcher: EvaluationDispatcher,
    aggregator: ViolationAggregator,
    reporter: Option<Arc<dyn OutcomeReporter>>,
}

impl ValidationHandler {
    pub fn builder(
        settings: WebhookSettings,
        engine: Arc<dyn PolicyEngine>,
        namespaces: NamespaceAugmenter,
    ) -> ValidationHandlerBuilder {
        ValidationHandlerBuilder {
            settings,
            engine,
            namespaces,
            excluder: Arc::new(ProcessExcluder::new()),
            config: ConfigResolver::default(),
            events: None,
            reporter: None,
        }
    }

    /// Decide one request and record its outcome.
    pub async fn handle(&self, request: &AdmissionRequest, ctx: &RequestContext) -> AdmissionResponse {
        let started = Instant::now();
        let decision = self.decide(request, ctx).await;
        let (outcome, response) = build_response(decision, request, self.failure_policy);

        if let Some(reporter) = &self.reporter {
            reporter.report_outcome(outcome, started.elapsed());
        }
        debug!(
            uid = %request.uid,
            outcome = %outcome,
            allowed = response.allowed,
            "Admission request decided"
        );
        response
    }

    /// Run the pipeline up to its terminal state.
    pub async fn decide(&self, request: &AdmissionRequest, ctx: &RequestContext) -> Decision {
        if let Some(bypass) = filters::classify(request, &self.service_account) {
            return Decision::Bypassed(bypass);
        }
        if self
            .excluder
            .is_namespace_excluded(Process::Webhook, request.namespace_name())
        {
            return Decision::Bypassed(Bypass::ExcludedNamespace);
        }

        match self.evaluate(request, ctx).await {
            Ok(results) => Decision::Evaluated(self.aggregator.deny_messages(&results, request)),
            Err(e) => {
                error!(uid = %request.uid, error = %e, "error executing query");
                Decision::Failed(e)
            }
        }
    }

    async fn evaluate(
        &self,
        request: &AdmissionRequest,
        ctx: &RequestContext,
    ) -> Result<Vec<EvaluationResult>> {
        let directive = self.config.tracing_directive(request, ctx).await;

        // Server-side apply sends a Namespace's own name as its namespace;
        // review it as the cluster-scoped object it is.
        let coerced;
        let request = if request.is_namespace_kind() && request.namespace.is_some() {
            let mut cluster_scoped = request.clone();
            cluster_scoped.namespace = None;
            coerced = cluster_scoped;
            &coerced
        } else {
            request
        };

        let namespace = self.namespaces.augment(request, ctx).await?;
        let review = ReviewContext::new(request, namespace);
        self.dispatcher.evaluate(&review, directive, ctx).await
    }
}

/// Assembles a [`ValidationHandler`].
pub struct ValidationHandlerBuilder {
    settings: WebhookSettings,
    engine: Arc<dyn PolicyEngine>,
    namespaces: NamespaceAugmenter,
    excluder: Arc<ProcessExcluder>,
    config: ConfigResolver,
    events: Option<Arc<dyn EventSink>>,
    reporter: Option<Arc<dyn OutcomeReporter>>,
}

impl ValidationHandlerBuilder {
    pub fn excluder(mut self, excluder: Arc<ProcessExcluder>) -> Self {
        self.excluder = excluder;
        self
    }

    pub fn config_resolver(mut self, config: ConfigResolver) -> Self {
        self.config = config;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn OutcomeReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> ValidationHandler {
        ValidationHandler {
            service_account: self.settings.service_account(),
            failure_policy: self.settings.failure_policy,
            excluder: self.excluder,
            config: self.config,
            namespaces: self.namespaces,
            dispatcher: EvaluationDispatcher::new(self.engine),
            aggregator: ViolationAggregator::new(&self.settings, self.events),
            reporter: self.reporter,
        }
    }
}
