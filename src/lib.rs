//! gatekeeper-webhook library crate
//!
//! This module exports the admission pipeline, the Config CRD, the health
//! server, and the background watchers that keep the namespace cache and the
//! exclusion set current.

pub mod crd;
pub mod error;
pub mod health;
pub mod settings;
pub mod webhooks;

pub use error::{Error, Result};
pub use health::HealthState;
pub use settings::{Args, FailurePolicy, WebhookSettings};
pub use webhooks::{ValidationHandler, WebhookError, WebhookState, run_webhook_server};

use std::future::Future;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher::{Config as WatcherConfig, Event};
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

use crd::{CONFIG_NAME, Config};
use webhooks::ProcessExcluder;

/// Create the default watcher configuration for all watchers.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a reflector-backed cache of Namespace objects.
///
/// Returns the store (for cached lookups) and the future that keeps it
/// filled; the future runs until the watch stream ends and must be spawned.
pub fn namespace_cache(client: Client) -> (reflector::Store<Namespace>, impl Future<Output = ()>) {
    let api: Api<Namespace> = Api::all(client);
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, default_watcher_config()))
        .default_backoff()
        .touched_objects();

    let driver = async move {
        stream
            .for_each(|result| async move {
                match result {
                    Ok(ns) => debug!(namespace = ?ns.metadata.name, "Namespace cache updated"),
                    Err(e) => warn!(error = %e, "Namespace watch error"),
                }
            })
            .await;
        error!("Namespace watch stream ended unexpectedly");
    };
    (reader, driver)
}

/// Keep the exclusion set in line with the Config singleton.
///
/// Every applied version replaces the exclusions; deletion, or a relist that
/// no longer finds the object, clears them.
pub async fn watch_config(client: Client, namespace: &str, excluder: Arc<ProcessExcluder>) {
    let api: Api<Config> = Api::namespaced(client, namespace);
    let watcher_config =
        default_watcher_config().fields(&format!("metadata.name={}", CONFIG_NAME));

    info!(namespace = %namespace, "Watching Config for namespace exclusions");

    let mut seen_in_relist = false;
    let mut events = watcher(api, watcher_config).default_backoff().boxed();
    loop {
        match events.try_next().await {
            Ok(Some(event)) => {
                apply_config_event(&excluder, event, &mut seen_in_relist);
            }
            Ok(None) => break,
            Err(e) => warn!(error = %e, "Config watch error"),
        }
    }

    error!("Config watch stream ended unexpectedly");
}

fn apply_config_event(excluder: &ProcessExcluder, event: Event<Config>, seen_in_relist: &mut bool) {
    match event {
        Event::Apply(config) | Event::InitApply(config) => {
            *seen_in_relist = true;
            info!(
                entries = config.spec.match_entries.len(),
                "Config changed, refreshing namespace exclusions"
            );
            excluder.replace(&config.spec);
        }
        Event::Delete(_) => {
            info!("Config deleted, clearing namespace exclusions");
            excluder.clear();
        }
        Event::Init => *seen_in_relist = false,
        Event::InitDone => {
            if !*seen_in_relist {
                excluder.clear();
            }
        }
    }
}
