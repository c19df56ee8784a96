//! Config resolution and per-request tracing directives.
//!
//! The Config singleton is read on every request because it may change
//! between calls. Tracing is a diagnostic aid, not a safety gate, so a
//! missing client, a missing object, or a failed read all leave tracing off.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Api, Client};
use tracing::debug;

use crate::crd::{CONFIG_NAME, Config, ConfigSpec, TraceSpec};
use crate::error::{Error, Result};
use crate::webhooks::context::RequestContext;
use crate::webhooks::request::{AdmissionRequest, AdmissionRequestExt};

/// Source of the Config singleton.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get_config(&self) -> Result<Config>;
}

/// Reads the Config singleton from the API server.
pub struct KubeConfigSource {
    api: Api<Config>,
}

impl KubeConfigSource {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ConfigSource for KubeConfigSource {
    async fn get_config(&self) -> Result<Config> {
        Ok(self.api.get(CONFIG_NAME).await?)
    }
}

/// Whether evaluation of one request is traced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TracingDirective {
    /// Ask the engine for a decision trace
    pub enabled: bool,
    /// Also log the engine's internal state
    pub dump: bool,
}

impl TracingDirective {
    /// Match trace specs against the request.
    ///
    /// A spec matches when its user equals the requester and its kind equals
    /// the request kind, both exactly. Any match enables tracing; a matching
    /// spec with dump level `All` also enables the dump.
    pub fn from_traces(traces: &[TraceSpec], request: &AdmissionRequest) -> Self {
        let mut directive = Self::default();
        for trace in traces {
            if trace.user != request.username() || !trace.kind.matches(&request.kind) {
                continue;
            }
            directive.enabled = true;
            if trace.wants_dump() {
                directive.dump = true;
            }
        }
        directive
    }
}

/// Derives tracing directives from the current Config.
#[derive(Clone, Default)]
pub struct ConfigResolver {
    injected: Option<ConfigSpec>,
    source: Option<Arc<dyn ConfigSource>>,
}

impl ConfigResolver {
    pub fn new(source: Option<Arc<dyn ConfigSource>>) -> Self {
        Self {
            injected: None,
            source,
        }
    }

    /// Use a fixed Config instead of reading one.
    pub fn with_injected_config(mut self, spec: ConfigSpec) -> Self {
        self.injected = Some(spec);
        self
    }

    /// Resolve the directive for one request. Never fails.
    pub async fn tracing_directive(
        &self,
        request: &AdmissionRequest,
        ctx: &RequestContext,
    ) -> TracingDirective {
        if let Some(spec) = &self.injected {
            return TracingDirective::from_traces(&spec.validation.traces, request);
        }
        match self.fetch(ctx).await {
            Ok(config) => TracingDirective::from_traces(&config.spec.validation.traces, request),
            Err(e) => {
                debug!(error = %e, "Config unavailable, tracing disabled");
                TracingDirective::default()
            }
        }
    }

    async fn fetch(&self, ctx: &RequestContext) -> Result<Config> {
        let source = self
            .source
            .as_ref()
            .ok_or(Error::MissingClient("retrieve validation config"))?;
        ctx.run(source.get_config()).await
    }
}
