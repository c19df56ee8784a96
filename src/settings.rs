//! Process flags and the immutable settings threaded into the pipeline.
//!
//! Flags are parsed once at startup. Everything the request path needs is
//! copied into [`WebhookSettings`], which is never mutated afterwards.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Service account the platform itself runs as.
pub const SERVICE_ACCOUNT_NAME: &str = "gatekeeper-admin";

/// Namespace used when `POD_NAMESPACE` is not set.
pub const DEFAULT_NAMESPACE: &str = "gatekeeper-system";

/// What to answer when evaluation itself fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Deny with an internal-error status.
    #[default]
    Closed,
    /// Allow, carrying the error text in the message.
    Open,
}

/// Command line flags for the webhook binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "gatekeeper-webhook", version, about)]
pub struct Args {
    /// Log detailed info on each deny
    #[arg(long, env = "LOG_DENIES")]
    pub log_denies: bool,

    /// Emit Kubernetes events in the platform namespace for each admission violation
    #[arg(long, env = "EMIT_ADMISSION_EVENTS")]
    pub emit_admission_events: bool,

    /// Serve the mutation endpoint
    #[arg(long, env = "ENABLE_MUTATION")]
    pub enable_mutation: bool,

    /// Answer to give when policy evaluation fails
    #[arg(long, env = "FAILURE_POLICY", value_enum, default_value_t = FailurePolicy::Closed)]
    pub failure_policy: FailurePolicy,

    /// Base URL of the policy engine
    #[arg(long, env = "ENGINE_URL", default_value = "http://127.0.0.1:8181")]
    pub engine_url: String,

    /// Per-request deadline for store reads and evaluation
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 3)]
    pub request_timeout_secs: u64,

    /// Webhook HTTPS port
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 8443)]
    pub port: u16,

    /// Health and metrics port
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Directory holding tls.crt and tls.key
    #[arg(long, env = "CERT_DIR", default_value = "/certs")]
    pub cert_dir: PathBuf,

    /// Namespace the platform runs in
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,
}

impl Args {
    /// Settings consumed by the admission pipeline.
    pub fn webhook_settings(&self) -> WebhookSettings {
        WebhookSettings {
            log_denies: self.log_denies,
            emit_admission_events: self.emit_admission_events,
            failure_policy: self.failure_policy,
            platform_namespace: self.namespace.clone(),
        }
    }

    /// Per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Path to the serving certificate.
    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join("tls.crt")
    }

    /// Path to the serving key.
    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join("tls.key")
    }
}

/// Immutable pipeline settings, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    pub log_denies: bool,
    pub emit_admission_events: bool,
    pub failure_policy: FailurePolicy,
    pub platform_namespace: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            log_denies: false,
            emit_admission_events: false,
            failure_policy: FailurePolicy::Closed,
            platform_namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl WebhookSettings {
    /// Username the platform's own requests arrive with.
    pub fn service_account(&self) -> String {
        format!(
            "system:serviceaccount:{}:{}",
            self.platform_namespace, SERVICE_ACCOUNT_NAME
        )
    }

    /// Whether violations need a resolved resource name.
    pub fn reports_violations(&self) -> bool {
        self.log_denies || self.emit_admission_events
    }
}
