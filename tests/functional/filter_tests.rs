//! Requests that are allowed before the engine is consulted.

use gatekeeper_webhook::settings::WebhookSettings;
use gatekeeper_webhook::webhooks::{Operation, OutcomeTag, Process, RequestContext};

use crate::common::fixtures::{AdmissionRequestBuilder, SERVICE_ACCOUNT, deny};
use crate::common::mocks::Harness;

#[tokio::test]
async fn test_service_account_bypass() {
    let harness = Harness::with_settings(WebhookSettings {
        platform_namespace: "platform-ns".to_string(),
        ..Default::default()
    });
    harness.engine.set_results(vec![deny("c1", "never seen")]);
    let request = AdmissionRequestBuilder::pod()
        .namespace("team-a")
        .username("system:serviceaccount:platform-ns:gatekeeper-admin")
        .build();

    let response = harness.handler().handle(&request, &RequestContext::new()).await;

    assert!(response.allowed);
    assert_eq!(response.result.message, "Gatekeeper does not self-manage");
    assert_eq!(response.result.code, 200);
    assert_eq!(harness.engine.review_count(), 0);
    assert_eq!(harness.cached.call_count(), 0);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Unknown]);
}

#[tokio::test]
async fn test_service_account_of_other_namespace_is_evaluated() {
    let harness = Harness::new();
    let request = AdmissionRequestBuilder::pod()
        .namespace("team-a")
        .username("system:serviceaccount:other-ns:gatekeeper-admin")
        .build();

    let response = harness.handler().handle(&request, &RequestContext::new()).await;

    assert!(response.allowed);
    assert_eq!(harness.engine.review_count(), 1);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Allow]);
}

#[tokio::test]
async fn test_self_management_takes_precedence_over_operation() {
    let harness = Harness::new();
    let request = AdmissionRequestBuilder::pod()
        .operation(Operation::Delete)
        .username(SERVICE_ACCOUNT)
        .build();

    let response = harness.handler().handle(&request, &RequestContext::new()).await;

    assert_eq!(response.result.message, "Gatekeeper does not self-manage");
}

#[tokio::test]
async fn test_unreviewed_operations_are_allowed() {
    for operation in [Operation::Delete, Operation::Connect] {
        let harness = Harness::new();
        harness.engine.set_results(vec![deny("c1", "never seen")]);
        let request = AdmissionRequestBuilder::pod()
            .operation(operation.clone())
            .namespace("team-a")
            .build();

        let response = harness.handler().handle(&request, &RequestContext::new()).await;

        assert!(response.allowed, "{:?} should be allowed", operation);
        assert_eq!(
            response.result.message,
            "Gatekeeper only validates create and update requests"
        );
        assert_eq!(harness.engine.review_count(), 0);
        assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Unknown]);
    }
}

#[tokio::test]
async fn test_update_is_reviewed() {
    let harness = Harness::new();
    let request = AdmissionRequestBuilder::pod()
        .operation(Operation::Update)
        .namespace("team-a")
        .build();

    harness.handler().handle(&request, &RequestContext::new()).await;

    assert_eq!(harness.engine.review_count(), 1);
}

#[tokio::test]
async fn test_platform_resources_are_not_validated() {
    for group in ["templates.gatekeeper.sh", "constraints.gatekeeper.sh"] {
        let harness = Harness::new();
        harness.engine.set_results(vec![deny("c1", "never seen")]);
        let request = AdmissionRequestBuilder::new(group, "v1beta1", "K8sRequiredLabels")
            .name("must-have-owner")
            .build();

        let response = harness.handler().handle(&request, &RequestContext::new()).await;

        assert!(response.allowed);
        assert_eq!(response.result.message, "Not validating gatekeeper resources");
        assert_eq!(harness.engine.review_count(), 0);
        assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Unknown]);
    }
}

#[tokio::test]
async fn test_lookalike_group_is_evaluated() {
    let harness = Harness::new();
    let request = AdmissionRequestBuilder::new("constraints.gatekeeper.sh.example", "v1", "Thing")
        .build();

    harness.handler().handle(&request, &RequestContext::new()).await;

    assert_eq!(harness.engine.review_count(), 1);
}

#[tokio::test]
async fn test_excluded_namespace_is_skipped() {
    let harness = Harness::new();
    harness
        .excluder
        .add(Process::Webhook, ["kube-system".to_string()]);
    harness.engine.set_results(vec![deny("c1", "never seen")]);
    let request = AdmissionRequestBuilder::pod().namespace("kube-system").build();

    let response = harness.handler().handle(&request, &RequestContext::new()).await;

    assert!(response.allowed);
    assert_eq!(
        response.result.message,
        "Namespace is set to be ignored by Gatekeeper config"
    );
    assert_eq!(harness.engine.review_count(), 0);
    assert_eq!(harness.cached.call_count(), 0);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Skip]);
}

#[tokio::test]
async fn test_wildcard_exclusion_applies_to_webhook() {
    let harness = Harness::new();
    harness.excluder.add(Process::Star, ["kube-system".to_string()]);
    let request = AdmissionRequestBuilder::pod().namespace("kube-system").build();

    harness.handler().handle(&request, &RequestContext::new()).await;

    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Skip]);
}

#[tokio::test]
async fn test_audit_exclusion_does_not_skip_admission() {
    let harness = Harness::new();
    harness.excluder.add(Process::Audit, ["kube-system".to_string()]);
    let request = AdmissionRequestBuilder::pod().namespace("kube-system").build();

    harness.handler().handle(&request, &RequestContext::new()).await;

    assert_eq!(harness.engine.review_count(), 1);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Allow]);
}

#[tokio::test]
async fn test_bypass_response_carries_request_uid() {
    let harness = Harness::new();
    let request = AdmissionRequestBuilder::pod()
        .uid("7f0c")
        .operation(Operation::Delete)
        .build();

    let response = harness.handler().handle(&request, &RequestContext::new()).await;

    assert_eq!(response.uid, "7f0c");
}
