//! Short-circuit filters that run before any store read or evaluation.
//!
//! The self-management guard and the admission classifier only look at the
//! request itself. The exclusion filter consults the process-wide exclusion
//! set, which the Config watcher keeps current.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

use tracing::warn;

use crate::crd::ConfigSpec;
use crate::webhooks::outcome::OutcomeTag;
use crate::webhooks::request::{AdmissionRequest, AdmissionRequestExt, Operation};

/// API group of the platform's policy templates.
pub const TEMPLATES_GROUP: &str = "templates.gatekeeper.sh";
/// API group of the platform's constraint instances.
pub const CONSTRAINTS_GROUP: &str = "constraints.gatekeeper.sh";

/// Why a request was allowed without evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bypass {
    /// Issued by the platform's own service account
    SelfManaged,
    /// Neither a create nor an update
    UnsupportedOperation,
    /// Targets a policy template or constraint
    PlatformResource,
    /// Namespace excluded from the webhook stage
    ExcludedNamespace,
}

impl Bypass {
    /// Message returned with the allow response.
    pub fn message(&self) -> &'static str {
        match self {
            Bypass::SelfManaged => "Gatekeeper does not self-manage",
            Bypass::UnsupportedOperation => "Gatekeeper only validates create and update requests",
            Bypass::PlatformResource => "Not validating gatekeeper resources",
            Bypass::ExcludedNamespace => "Namespace is set to be ignored by Gatekeeper config",
        }
    }

    /// Outcome recorded for the request.
    pub fn outcome(&self) -> OutcomeTag {
        match self {
            Bypass::ExcludedNamespace => OutcomeTag::Skip,
            Bypass::SelfManaged | Bypass::UnsupportedOperation | Bypass::PlatformResource => {
                OutcomeTag::Unknown
            }
        }
    }
}

/// Whether the request was issued by the platform itself.
pub fn is_self_managed(request: &AdmissionRequest, service_account: &str) -> bool {
    request.username() == service_account
}

/// Whether the operation is one this webhook evaluates.
pub fn is_reviewed_operation(operation: &Operation) -> bool {
    matches!(operation, Operation::Create | Operation::Update)
}

/// Whether the request targets one of the platform's own API groups.
pub fn is_platform_resource(request: &AdmissionRequest) -> bool {
    request.kind.group == TEMPLATES_GROUP || request.kind.group == CONSTRAINTS_GROUP
}

/// Run the guard and the classifier.
///
/// Returns the first bypass that applies, or `None` when the request must be
/// evaluated.
pub fn classify(request: &AdmissionRequest, service_account: &str) -> Option<Bypass> {
    if is_self_managed(request, service_account) {
        return Some(Bypass::SelfManaged);
    }
    if !is_reviewed_operation(&request.operation) {
        return Some(Bypass::UnsupportedOperation);
    }
    if is_platform_resource(request) {
        return Some(Bypass::PlatformResource);
    }
    None
}

/// Processing stages a namespace can be excluded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Process {
    Audit,
    Sync,
    Webhook,
    /// Every stage
    Star,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Audit => write!(f, "audit"),
            Process::Sync => write!(f, "sync"),
            Process::Webhook => write!(f, "webhook"),
            Process::Star => write!(f, "*"),
        }
    }
}

impl FromStr for Process {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audit" => Ok(Process::Audit),
            "sync" => Ok(Process::Sync),
            "webhook" => Ok(Process::Webhook),
            "*" => Ok(Process::Star),
            _ => Err(format!("Unknown process: {}", s)),
        }
    }
}

type ExclusionMap = HashMap<Process, HashSet<String>>;

/// Process-wide set of excluded namespaces, keyed by stage.
///
/// Read by every admission request; replaced wholesale when the Config
/// object changes.
#[derive(Debug, Default)]
pub struct ProcessExcluder {
    excluded: RwLock<ExclusionMap>,
}

impl ProcessExcluder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an excluder from a Config spec.
    pub fn from_config(spec: &ConfigSpec) -> Self {
        Self {
            excluded: RwLock::new(exclusions_from_config(spec)),
        }
    }

    /// Exclude namespaces from one stage.
    pub fn add(&self, process: Process, namespaces: impl IntoIterator<Item = String>) {
        let mut excluded = self.excluded.write().unwrap_or_else(PoisonError::into_inner);
        excluded.entry(process).or_default().extend(namespaces);
    }

    /// Swap in the exclusions of a new Config spec.
    pub fn replace(&self, spec: &ConfigSpec) {
        let next = exclusions_from_config(spec);
        *self.excluded.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Drop every exclusion.
    pub fn clear(&self) {
        self.excluded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Whether `namespace` is excluded from `process`.
    pub fn is_namespace_excluded(&self, process: Process, namespace: &str) -> bool {
        let excluded = self.excluded.read().unwrap_or_else(PoisonError::into_inner);
        [process, Process::Star]
            .iter()
            .filter_map(|p| excluded.get(p))
            .any(|namespaces| namespaces.contains(namespace))
    }
}

fn exclusions_from_config(spec: &ConfigSpec) -> ExclusionMap {
    let mut map = ExclusionMap::new();
    for entry in &spec.match_entries {
        for name in &entry.processes {
            match name.parse::<Process>() {
                Ok(process) => map
                    .entry(process)
                    .or_default()
                    .extend(entry.excluded_namespaces.iter().cloned()),
                Err(e) => warn!(error = %e, "Ignoring match entry process"),
            }
        }
    }
    map
}
