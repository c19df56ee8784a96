//! Admission request and response helpers.
//!
//! The webhook speaks kube's `admission.k8s.io/v1` `AdmissionReview`, with
//! the reviewed object decoded as a [`DynamicObject`]. This module adds the
//! accessors the pipeline reads on a request and the status codes it answers
//! with.

use axum::http::StatusCode;
use kube::core::admission::{self, META_API_VERSION_V1, META_KIND};
use kube::core::{DynamicObject, TypeMeta};

pub use kube::core::GroupVersionKind;
pub use kube::core::admission::{AdmissionResponse, Operation};

/// A pending operation submitted for a decision.
pub type AdmissionRequest = admission::AdmissionRequest<DynamicObject>;

/// Review envelope, used for both directions.
pub type AdmissionReview = admission::AdmissionReview<DynamicObject>;

/// Accessors over the optional request fields.
pub trait AdmissionRequestExt {
    /// Requester username; empty when the API server sent none.
    fn username(&self) -> &str;

    /// Namespace of the object; empty for cluster-scoped objects.
    fn namespace_name(&self) -> &str;

    /// Name of the object being admitted.
    ///
    /// Prefers the name supplied with the request. On a create the client may
    /// omit it and rely on `generateName`, in which case the object's own
    /// metadata is consulted. No name anywhere yields an empty string.
    fn resource_name(&self) -> String;

    /// Whether the request targets a core `Namespace` object.
    fn is_namespace_kind(&self) -> bool;
}

impl AdmissionRequestExt for AdmissionRequest {
    fn username(&self) -> &str {
        self.user_info.username.as_deref().unwrap_or_default()
    }

    fn namespace_name(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    fn resource_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.object
            .as_ref()
            .and_then(|object| object.metadata.name.clone())
            .unwrap_or_default()
    }

    fn is_namespace_kind(&self) -> bool {
        self.kind.group.is_empty() && self.kind.kind == "Namespace"
    }
}

/// Status shaping for admission responses.
pub trait AdmissionResponseExt {
    /// Set the HTTP-equivalent status code carried in the response.
    fn with_code(self, code: StatusCode) -> Self;

    /// Set the message without changing the verdict.
    fn with_message<T: ToString>(self, message: T) -> Self;
}

impl AdmissionResponseExt for AdmissionResponse {
    fn with_code(mut self, code: StatusCode) -> Self {
        self.result.code = code.as_u16();
        self
    }

    fn with_message<T: ToString>(mut self, message: T) -> Self {
        self.result.message = message.to_string();
        self
    }
}

/// Review answering a body that could not be read as a v1 review.
///
/// There is no uid to echo, so the response carries only the reason and a
/// 400 code.
pub fn invalid_review<T: ToString>(reason: T) -> AdmissionReview {
    let mut response = AdmissionResponse::invalid(reason).with_code(StatusCode::BAD_REQUEST);
    response.types = TypeMeta {
        api_version: META_API_VERSION_V1.to_string(),
        kind: META_KIND.to_string(),
    };
    response.into_review()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) fn test_request(group: &str, kind: &str) -> AdmissionRequest {
    serde_json::from_value(serde_json::json!({
        "uid": "test-uid",
        "kind": {"group": group, "version": "v1", "kind": kind},
        "resource": {"group": group, "version": "v1", "resource": format!("{}s", kind.to_lowercase())},
        "operation": "CREATE",
        "userInfo": {"username": "alice"}
    }))
    .expect("test request must decode")
}
