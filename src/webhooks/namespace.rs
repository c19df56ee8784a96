//! Namespace augmentation for the review context.
//!
//! The namespace object is read through the reflector cache first. The cache
//! may lag behind a namespace created moments ago, so a not-found there is
//! retried once directly against the API server. Any other failure aborts
//! the request.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client};
use tracing::debug;

use crate::error::{Error, Result};
use crate::webhooks::context::RequestContext;
use crate::webhooks::request::{AdmissionRequest, AdmissionRequestExt};

/// Reads Namespace objects by name.
#[async_trait]
pub trait NamespaceReader: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
}

/// Serves reads from a reflector store.
pub struct CachedNamespaceReader {
    store: Store<Namespace>,
}

impl CachedNamespaceReader {
    pub fn new(store: Store<Namespace>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NamespaceReader for CachedNamespaceReader {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.store
            .get(&ObjectRef::new(name))
            .map(|ns| Namespace::clone(&ns))
            .ok_or_else(|| Error::NotFound(format!("namespace \"{}\"", name)))
    }
}

/// Reads straight from the API server, bypassing any cache.
pub struct ApiNamespaceReader {
    api: Api<Namespace>,
}

impl ApiNamespaceReader {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NamespaceReader for ApiNamespaceReader {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        Ok(self.api.get(name).await?)
    }
}

/// Resolves the namespace of a request for the review context.
#[derive(Clone)]
pub struct NamespaceAugmenter {
    cached: Arc<dyn NamespaceReader>,
    direct: Arc<dyn NamespaceReader>,
}

impl NamespaceAugmenter {
    pub fn new(cached: Arc<dyn NamespaceReader>, direct: Arc<dyn NamespaceReader>) -> Self {
        Self { cached, direct }
    }

    /// The namespace object for the request, or `None` for cluster-scoped
    /// requests.
    pub async fn augment(
        &self,
        request: &AdmissionRequest,
        ctx: &RequestContext,
    ) -> Result<Option<Namespace>> {
        let name = request.namespace_name();
        if name.is_empty() {
            return Ok(None);
        }
        self.resolve(name, ctx).await.map(Some)
    }

    /// Cached read with a single uncached retry on not-found.
    pub async fn resolve(&self, name: &str, ctx: &RequestContext) -> Result<Namespace> {
        match ctx.run(self.cached.get_namespace(name)).await {
            Ok(ns) => Ok(ns),
            Err(e) if e.is_not_found() => {
                debug!(namespace = %name, "Namespace not cached, asking the API server");
                ctx.run(self.direct.get_namespace(name)).await
            }
            Err(e) => Err(e),
        }
    }
}
