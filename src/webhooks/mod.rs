//! Validating admission webhook.
//!
//! Every create/update request routed to the webhook passes through the
//! [`ValidationHandler`] pipeline:
//! - Filters: self-management guard, operation and own-resource checks,
//!   namespace exclusion
//! - Evaluation: config-driven tracing, namespace augmentation, policy engine
//! - Aggregation: deny messages, deny logging, admission events

pub mod context;
pub mod engine;
pub mod filters;
pub mod handler;
pub mod namespace;
pub mod outcome;
pub mod request;
mod server;
pub mod trace_config;
pub mod violations;

pub use context::RequestContext;
pub use engine::{
    ConstraintRef, EngineResponse, EnforcementAction, EvaluationResult, HttpPolicyEngine,
    PolicyEngine, ReviewContext,
};
pub use filters::{Bypass, Process, ProcessExcluder};
pub use handler::{Decision, ValidationHandler, ValidationHandlerBuilder, build_response};
pub use namespace::{ApiNamespaceReader, CachedNamespaceReader, NamespaceAugmenter, NamespaceReader};
pub use outcome::{OutcomeReporter, OutcomeTag};
pub use request::{
    AdmissionRequest, AdmissionRequestExt, AdmissionResponse, AdmissionResponseExt,
    AdmissionReview, GroupVersionKind, Operation, invalid_review,
};
pub use server::{
    MUTATE_PATH, VALIDATE_PATH, WebhookError, WebhookState, create_webhook_router,
    run_webhook_server,
};
pub use trace_config::{ConfigResolver, ConfigSource, KubeConfigSource, TracingDirective};
pub use violations::{EventPublisher, EventSink, KubeEventSink, ViolationEvent};
