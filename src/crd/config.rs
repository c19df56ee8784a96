//! Config Custom Resource Definition.
//!
//! The platform keeps exactly one `Config` object, named `config`, in its own
//! namespace. The webhook only ever reads it: trace specs select requests that
//! get a step-by-step evaluation trace, and match entries list namespaces
//! excluded from one or more processing stages.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::webhooks::GroupVersionKind;

/// Name of the singleton Config object inside the platform namespace.
pub const CONFIG_NAME: &str = "config";

/// Dump level that additionally requests an engine state dump.
pub const DUMP_ALL: &str = "All";

/// Config is the platform-wide dynamic configuration.
///
/// Example:
/// ```yaml
/// apiVersion: config.gatekeeper.sh/v1alpha1
/// kind: Config
/// metadata:
///   name: config
///   namespace: gatekeeper-system
/// spec:
///   match:
///     - excludedNamespaces: ["kube-system"]
///       processes: ["webhook"]
///   validation:
///     traces:
///       - user: "user:alice"
///         kind:
///           group: ""
///           version: "v1"
///           kind: "Pod"
///         dump: "All"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "config.gatekeeper.sh",
    version = "v1alpha1",
    kind = "Config",
    plural = "configs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    /// Validation (admission) settings.
    #[serde(default)]
    pub validation: ValidationSpec,

    /// Namespace exclusions per process stage.
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_entries: Vec<MatchEntry>,
}

/// Settings for the validating webhook.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSpec {
    /// Requests to trace, matched in list order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<TraceSpec>,
}

/// Selects requests from one user for one kind to be traced.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpec {
    /// Exact requester username.
    #[serde(default)]
    pub user: String,

    /// Exact group/version/kind of the reviewed object.
    #[serde(default)]
    pub kind: KindSelector,

    /// `All` (case-insensitive) also dumps engine state.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dump: String,
}

impl TraceSpec {
    /// Whether this trace asks for an engine state dump.
    pub fn wants_dump(&self) -> bool {
        self.dump.eq_ignore_ascii_case(DUMP_ALL)
    }
}

/// Group/version/kind a trace applies to.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct KindSelector {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

impl KindSelector {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Exact match on all three parts.
    pub fn matches(&self, gvk: &GroupVersionKind) -> bool {
        self.group == gvk.group && self.version == gvk.version && self.kind == gvk.kind
    }
}

/// A set of namespaces excluded from the listed processes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchEntry {
    /// Namespaces skipped by the listed processes.
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,

    /// Process names: `audit`, `sync`, `webhook`, or `*` for all of them.
    #[serde(default)]
    pub processes: Vec<String>,
}
