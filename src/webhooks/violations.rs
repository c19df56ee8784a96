//! Violation aggregation, deny logging and admission events.
//!
//! Every `deny` and `dryrun` result can be logged and reported as a Warning
//! event; only `deny` results contribute to the denial message.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::PostParams;
use kube::{Api, Client};
use prometheus_client::metrics::counter::Counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::settings::WebhookSettings;
use crate::webhooks::engine::{EnforcementAction, EvaluationResult};
use crate::webhooks::request::{AdmissionRequest, AdmissionRequestExt};

/// Component name events are reported under.
pub const EVENT_COMPONENT: &str = "gatekeeper-webhook";
/// Event reason for a denied request.
pub const REASON_FAILED_ADMISSION: &str = "FailedAdmission";
/// Event reason for a dryrun violation.
pub const REASON_DRYRUN_VIOLATION: &str = "DryrunViolation";

const DENY_EVENT_PREFIX: &str = "Admission webhook \"validation.gatekeeper.sh\" denied request";
const DRYRUN_EVENT_PREFIX: &str = "Dryrun violation";

/// A Warning event describing one violation.
#[derive(Clone, Debug, PartialEq)]
pub struct ViolationEvent {
    pub reason: &'static str,
    pub message: String,
    pub annotations: BTreeMap<String, String>,
    pub involved_object: ObjectReference,
}

/// Receives violation events.
///
/// `emit` is called on the admission path and must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ViolationEvent);
}

/// Reference the event is attached to.
///
/// Events live in the platform namespace, so the reference does too; the uid
/// keys the resource and the constraint so distinct violations do not merge.
pub fn violation_ref(
    platform_namespace: &str,
    request: &AdmissionRequest,
    resource_name: &str,
    result: &EvaluationResult,
) -> ObjectReference {
    let uid = format!(
        "{}/{}/{}/{}/{}/{}",
        request.kind.kind,
        request.namespace_name(),
        resource_name,
        result.constraint.kind,
        result.constraint.namespace,
        result.constraint.name
    );
    ObjectReference {
        kind: Some(request.kind.kind.clone()),
        name: Some(resource_name.to_string()),
        namespace: Some(platform_namespace.to_string()),
        uid: Some(uid),
        ..Default::default()
    }
}

/// Folds engine results into the deny-message list.
#[derive(Clone)]
pub struct ViolationAggregator {
    log_denies: bool,
    resolve_names: bool,
    platform_namespace: String,
    events: Option<Arc<dyn EventSink>>,
}

impl ViolationAggregator {
    /// `events` is only consulted when event emission is enabled.
    pub fn new(settings: &WebhookSettings, events: Option<Arc<dyn EventSink>>) -> Self {
        let events = if settings.emit_admission_events {
            if events.is_none() {
                warn!("Admission events enabled without an event sink, events will not be emitted");
            }
            events
        } else {
            None
        };
        Self {
            log_denies: settings.log_denies,
            resolve_names: settings.reports_violations(),
            platform_namespace: settings.platform_namespace.clone(),
            events,
        }
    }

    /// Deny messages in engine order, formatted `[denied by <constraint>] <msg>`.
    pub fn deny_messages(
        &self,
        results: &[EvaluationResult],
        request: &AdmissionRequest,
    ) -> Vec<String> {
        let resource_name = if !results.is_empty() && self.resolve_names {
            request.resource_name()
        } else {
            String::new()
        };

        let mut msgs = Vec::new();
        for result in results {
            if result.enforcement_action.is_reported() {
                if self.log_denies {
                    info!(
                        process = "admission",
                        event_type = "violation",
                        constraint_name = %result.constraint.name,
                        constraint_kind = %result.constraint.kind,
                        constraint_action = %result.enforcement_action,
                        resource_kind = %request.kind.kind,
                        resource_namespace = %request.namespace_name(),
                        resource_name = %resource_name,
                        request_username = %request.username(),
                        "denied admission"
                    );
                }
                if let Some(sink) = &self.events {
                    sink.emit(self.violation_event(result, request, &resource_name));
                }
            }
            // only deny prompts a deny admission response
            if result.enforcement_action == EnforcementAction::Deny {
                msgs.push(format!(
                    "[denied by {}] {}",
                    result.constraint.name, result.msg
                ));
            }
        }
        msgs
    }

    fn violation_event(
        &self,
        result: &EvaluationResult,
        request: &AdmissionRequest,
        resource_name: &str,
    ) -> ViolationEvent {
        let annotations = BTreeMap::from([
            ("process".to_string(), "admission".to_string()),
            ("event_type".to_string(), "violation".to_string()),
            ("constraint_name".to_string(), result.constraint.name.clone()),
            ("constraint_kind".to_string(), result.constraint.kind.clone()),
            (
                "constraint_action".to_string(),
                result.enforcement_action.to_string(),
            ),
            ("resource_kind".to_string(), request.kind.kind.clone()),
            (
                "resource_namespace".to_string(),
                request.namespace_name().to_string(),
            ),
            ("resource_name".to_string(), resource_name.to_string()),
            ("request_username".to_string(), request.username().to_string()),
        ]);

        let (reason, prefix) = match result.enforcement_action {
            EnforcementAction::Dryrun => (REASON_DRYRUN_VIOLATION, DRYRUN_EVENT_PREFIX),
            _ => (REASON_FAILED_ADMISSION, DENY_EVENT_PREFIX),
        };

        ViolationEvent {
            reason,
            message: format!(
                "{}, Resource Namespace: {}, Constraint: {}, Message: {}",
                prefix,
                request.namespace_name(),
                result.constraint.name,
                result.msg
            ),
            annotations,
            involved_object: violation_ref(
                &self.platform_namespace,
                request,
                resource_name,
                result,
            ),
        }
    }
}

/// Queues events for asynchronous creation in the platform namespace.
///
/// A full queue drops the event rather than delay admission.
pub struct KubeEventSink {
    tx: mpsc::Sender<ViolationEvent>,
    dropped: Counter,
}

impl KubeEventSink {
    /// Create the sink and the publisher that drains it.
    pub fn new(
        client: Client,
        namespace: &str,
        capacity: usize,
        dropped: Counter,
    ) -> (Self, EventPublisher) {
        let (tx, rx) = mpsc::channel(capacity);
        let publisher = EventPublisher {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            rx,
        };
        (Self { tx, dropped }, publisher)
    }
}

impl EventSink for KubeEventSink {
    fn emit(&self, event: ViolationEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.inc();
            warn!(error = %e, "Dropping admission event");
        }
    }
}

/// Background task creating queued events.
pub struct EventPublisher {
    api: Api<Event>,
    namespace: String,
    rx: mpsc::Receiver<ViolationEvent>,
}

impl EventPublisher {
    /// Publish until every sink is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let reason = event.reason;
            let event = to_core_event(event, &self.namespace);
            match self.api.create(&PostParams::default(), &event).await {
                Ok(_) => debug!(reason = %reason, "Published admission event"),
                Err(e) => warn!(reason = %reason, error = %e, "Failed to publish event"),
            }
        }
        debug!("Event queue closed");
    }
}

/// Build the core/v1 Event for a violation.
pub fn to_core_event(event: ViolationEvent, namespace: &str) -> Event {
    let now = Time(jiff::Timestamp::now());
    let base_name = event
        .involved_object
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or("admission");
    Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}.", base_name)),
            namespace: Some(namespace.to_string()),
            annotations: Some(event.annotations),
            ..Default::default()
        },
        involved_object: event.involved_object,
        reason: Some(event.reason.to_string()),
        message: Some(event.message),
        type_: Some("Warning".to_string()),
        source: Some(EventSource {
            component: Some(EVENT_COMPONENT.to_string()),
            host: None,
        }),
        reporting_component: Some(EVENT_COMPONENT.to_string()),
        first_timestamp: Some(now.clone()),
        last_timestamp: Some(now),
        count: Some(1),
        ..Default::default()
    }
}
