// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for gatekeeper-webhook.
//!
//! These tests run without a Kubernetes cluster or a policy engine and test
//! individual components in isolation.

#[path = "../common/mod.rs"]
mod common;

mod crd_tests {
    use gatekeeper_webhook::crd::{Config, KindSelector};
    use gatekeeper_webhook::webhooks::{Process, ProcessExcluder};
    use kube::Resource;

    fn config_json() -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "config.gatekeeper.sh/v1alpha1",
            "kind": "Config",
            "metadata": {"name": "config", "namespace": "gatekeeper-system"},
            "spec": {
                "match": [
                    {"excludedNamespaces": ["kube-system"], "processes": ["*"]},
                    {"excludedNamespaces": ["monitoring"], "processes": ["audit", "webhook"]}
                ],
                "validation": {
                    "traces": [
                        {"user": "alice", "kind": {"group": "", "version": "v1", "kind": "Pod"}, "dump": "All"}
                    ]
                }
            }
        })
    }

    #[test]
    fn test_config_resource_identity() {
        assert_eq!(Config::group(&()), "config.gatekeeper.sh");
        assert_eq!(Config::version(&()), "v1alpha1");
        assert_eq!(Config::kind(&()), "Config");
    }

    #[test]
    fn test_config_deserializes() {
        let config: Config = serde_json::from_value(config_json()).unwrap();

        assert_eq!(config.spec.match_entries.len(), 2);
        let trace = &config.spec.validation.traces[0];
        assert_eq!(trace.user, "alice");
        assert_eq!(trace.kind, KindSelector::new("", "v1", "Pod"));
        assert!(trace.wants_dump());
    }

    #[test]
    fn test_config_drives_excluder() {
        let config: Config = serde_json::from_value(config_json()).unwrap();
        let excluder = ProcessExcluder::from_config(&config.spec);

        assert!(excluder.is_namespace_excluded(Process::Webhook, "kube-system"));
        assert!(excluder.is_namespace_excluded(Process::Sync, "kube-system"));
        assert!(excluder.is_namespace_excluded(Process::Webhook, "monitoring"));
        assert!(!excluder.is_namespace_excluded(Process::Sync, "monitoring"));
        assert!(!excluder.is_namespace_excluded(Process::Webhook, "team-a"));
    }

    #[test]
    fn test_empty_config_spec() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "apiVersion": "config.gatekeeper.sh/v1alpha1",
            "kind": "Config",
            "metadata": {"name": "config"},
            "spec": {}
        }))
        .unwrap();

        assert!(config.spec.match_entries.is_empty());
        assert!(config.spec.validation.traces.is_empty());
    }
}

mod request_tests {
    use gatekeeper_webhook::webhooks::{
        AdmissionRequest, AdmissionRequestExt, AdmissionReview, Operation,
    };

    use crate::common::fixtures::AdmissionRequestBuilder;

    #[test]
    fn test_review_decodes() {
        let body = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "abc",
                "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
                "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
                "namespace": "team-a",
                "operation": "UPDATE",
                "userInfo": {"username": "bob", "groups": ["devs"]},
                "object": {"metadata": {"name": "api"}},
                "oldObject": {"metadata": {"name": "api"}}
            }
        });
        let review: AdmissionReview = serde_json::from_str(&body.to_string()).unwrap();

        let request: AdmissionRequest = review.try_into().unwrap();
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.kind.group, "apps");
        assert_eq!(request.namespace_name(), "team-a");
        assert_eq!(request.username(), "bob");
        assert_eq!(request.user_info.groups, Some(vec!["devs".to_string()]));
        assert_eq!(request.resource_name(), "api");
    }

    #[test]
    fn test_resource_name_without_object() {
        let request = AdmissionRequestBuilder::pod().build();
        assert_eq!(request.resource_name(), "");
    }

    #[test]
    fn test_resource_name_with_generate_name_only() {
        let request = AdmissionRequestBuilder::pod()
            .object(serde_json::json!({"metadata": {"generateName": "web-"}}))
            .build();
        assert_eq!(request.resource_name(), "");
    }

    #[test]
    fn test_namespace_kind_detection() {
        assert!(AdmissionRequestBuilder::new("", "v1", "Namespace").build().is_namespace_kind());
        assert!(!AdmissionRequestBuilder::new("example.com", "v1", "Namespace")
            .build()
            .is_namespace_kind());
        assert!(!AdmissionRequestBuilder::pod().build().is_namespace_kind());
    }
}

mod engine_tests {
    use gatekeeper_webhook::webhooks::{EnforcementAction, EngineResponse, EvaluationResult};

    #[test]
    fn test_results_decode_in_order() {
        let response: EngineResponse = serde_json::from_value(serde_json::json!({
            "results": [
                {"enforcementAction": "deny", "constraint": {"name": "a", "kind": "K"}, "msg": "first"},
                {"enforcementAction": "dryrun", "constraint": {"name": "b", "kind": "K"}, "msg": "second"},
                {"enforcementAction": "scoped", "constraint": {"name": "c", "kind": "K"}, "msg": "third"}
            ]
        }))
        .unwrap();

        let actions: Vec<&EnforcementAction> = response
            .results
            .iter()
            .map(|r: &EvaluationResult| &r.enforcement_action)
            .collect();
        assert_eq!(
            actions,
            vec![
                &EnforcementAction::Deny,
                &EnforcementAction::Dryrun,
                &EnforcementAction::Other("scoped".to_string())
            ]
        );
        assert_eq!(response.results[1].msg, "second");
    }

    #[test]
    fn test_reported_actions() {
        assert!(EnforcementAction::Deny.is_reported());
        assert!(EnforcementAction::Dryrun.is_reported());
        assert!(!EnforcementAction::Warn.is_reported());
        assert!(!EnforcementAction::from("scoped").is_reported());
    }
}

mod settings_tests {
    use clap::Parser;
    use gatekeeper_webhook::settings::{Args, FailurePolicy};

    #[test]
    fn test_explicit_flags() {
        let args = Args::try_parse_from([
            "gatekeeper-webhook",
            "--log-denies",
            "--emit-admission-events",
            "--failure-policy",
            "open",
            "--namespace",
            "platform-ns",
            "--request-timeout-secs",
            "5",
            "--cert-dir",
            "/tmp/certs",
        ])
        .unwrap();

        let settings = args.webhook_settings();
        assert!(settings.log_denies);
        assert!(settings.emit_admission_events);
        assert_eq!(settings.failure_policy, FailurePolicy::Open);
        assert_eq!(
            settings.service_account(),
            "system:serviceaccount:platform-ns:gatekeeper-admin"
        );
        assert_eq!(args.request_timeout().as_secs(), 5);
        assert_eq!(args.cert_path().to_str(), Some("/tmp/certs/tls.crt"));
        assert_eq!(args.key_path().to_str(), Some("/tmp/certs/tls.key"));
    }

    #[test]
    fn test_invalid_failure_policy_rejected() {
        let result = Args::try_parse_from(["gatekeeper-webhook", "--failure-policy", "maybe"]);
        assert!(result.is_err());
    }
}

mod metrics_tests {
    use std::time::Duration;

    use gatekeeper_webhook::health::Metrics;
    use gatekeeper_webhook::webhooks::{OutcomeReporter, OutcomeTag};

    #[test]
    fn test_outcomes_are_labelled() {
        let metrics = Metrics::new();
        metrics.report_outcome(OutcomeTag::Allow, Duration::from_millis(4));
        metrics.report_outcome(OutcomeTag::Deny, Duration::from_millis(9));
        metrics.report_outcome(OutcomeTag::Unknown, Duration::from_millis(1));

        let output = metrics.encode();
        assert!(output.contains("gatekeeper_validation_request_count_total{admission_status=\"allow\"} 1"));
        assert!(output.contains("gatekeeper_validation_request_count_total{admission_status=\"deny\"} 1"));
        assert!(output.contains("admission_status=\"unknown\""));
        assert!(output.contains("gatekeeper_validation_request_duration_seconds"));
    }
}

mod error_tests {
    use gatekeeper_webhook::Error;

    #[test]
    fn test_only_not_found_is_retryable() {
        assert!(Error::NotFound("namespace \"a\"".to_string()).is_not_found());
        assert!(!Error::Engine("boom".to_string()).is_not_found());
        assert!(!Error::Cancelled.is_not_found());
        assert!(!Error::DeadlineExceeded.is_not_found());
    }
}
