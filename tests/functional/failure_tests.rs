//! Store and engine failures, cancellation and deadlines.

use std::time::Duration;

use gatekeeper_webhook::settings::{FailurePolicy, WebhookSettings};
use gatekeeper_webhook::webhooks::{OutcomeTag, RequestContext};
use tokio_util::sync::CancellationToken;

use crate::common::fixtures::{PLATFORM_NAMESPACE, deny, pod_request};
use crate::common::mocks::{Harness, ReaderMode};

#[tokio::test]
async fn test_namespace_read_failure_denies_with_500() {
    let harness = Harness::new();
    harness.cached.set_mode(ReaderMode::Fail);

    let response = harness
        .handler()
        .handle(&pod_request("team-a"), &RequestContext::new())
        .await;

    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert!(response.result.message.contains("etcdserver: request timed out"));
    assert_eq!(harness.direct.call_count(), 0);
    assert_eq!(harness.engine.review_count(), 0);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test]
async fn test_fallback_failure_is_an_error() {
    let harness = Harness::new();
    harness.cached.set_mode(ReaderMode::NotFound);
    harness.direct.set_mode(ReaderMode::NotFound);

    let response = harness
        .handler()
        .handle(&pod_request("gone"), &RequestContext::new())
        .await;

    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(harness.direct.call_count(), 1);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test]
async fn test_engine_failure_denies_with_500() {
    let harness = Harness::new();
    harness.engine.fail_with("engine unavailable");

    let response = harness
        .handler()
        .handle(&pod_request("team-a"), &RequestContext::new())
        .await;

    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert!(response.result.message.contains("engine unavailable"));
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test]
async fn test_fail_open_allows_on_error() {
    let harness = Harness::with_settings(WebhookSettings {
        failure_policy: FailurePolicy::Open,
        platform_namespace: PLATFORM_NAMESPACE.to_string(),
        ..Default::default()
    });
    harness.engine.fail_with("engine unavailable");

    let response = harness
        .handler()
        .handle(&pod_request("team-a"), &RequestContext::new())
        .await;

    assert!(response.allowed);
    assert!(response.result.message.contains("engine unavailable"));
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test]
async fn test_fail_open_still_denies_violations() {
    let harness = Harness::with_settings(WebhookSettings {
        failure_policy: FailurePolicy::Open,
        ..Default::default()
    });
    harness.engine.set_results(vec![deny("c1", "nope")]);

    let response = harness
        .handler()
        .handle(&pod_request("team-a"), &RequestContext::new())
        .await;

    assert!(!response.allowed);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Deny]);
}

#[tokio::test]
async fn test_cancelled_request_is_an_error() {
    let harness = Harness::new();
    let token = CancellationToken::new();
    token.cancel();
    let ctx = RequestContext::new().with_cancellation(token);

    let response = harness.handler().handle(&pod_request("team-a"), &ctx).await;

    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(harness.engine.review_count(), 0);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_engine_hits_deadline() {
    let harness = Harness::new();
    harness.engine.delay_by(Duration::from_secs(30));
    let ctx = RequestContext::with_timeout(Duration::from_secs(3));

    let response = harness.handler().handle(&pod_request("team-a"), &ctx).await;

    assert!(!response.allowed);
    assert_eq!(response.result.code, 500);
    assert_eq!(harness.engine.review_count(), 0);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_evaluation_reports_once() {
    let harness = Harness::new();
    harness.engine.delay_by(Duration::from_secs(30));
    let handler = std::sync::Arc::new(harness.handler());
    let token = CancellationToken::new();
    let ctx = RequestContext::new().with_cancellation(token.clone());

    let task = tokio::spawn({
        let handler = handler.clone();
        async move { handler.handle(&pod_request("team-a"), &ctx).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    token.cancel();
    let response = task.await.unwrap();

    assert!(!response.allowed);
    assert_eq!(harness.reporter.outcomes(), vec![OutcomeTag::Error]);
}

#[tokio::test]
async fn test_every_path_reports_exactly_once() {
    let harness = Harness::new();
    let handler = harness.handler();

    handler
        .handle(&pod_request("team-a"), &RequestContext::new())
        .await;
    harness.engine.fail_with("boom");
    handler
        .handle(&pod_request("team-a"), &RequestContext::new())
        .await;

    assert_eq!(
        harness.reporter.outcomes(),
        vec![OutcomeTag::Allow, OutcomeTag::Error]
    );
}
