//! gatekeeper-webhook - validating admission webhook for a policy-enforcement platform.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Parses flags into immutable webhook settings
//! - Creates the Kubernetes client
//! - Starts the namespace cache, the Config watcher, and the event publisher
//! - Starts the health server and the TLS webhook server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use gatekeeper_webhook::health::{HealthState, run_health_server};
use gatekeeper_webhook::settings::Args;
use gatekeeper_webhook::webhooks::{
    ApiNamespaceReader, CachedNamespaceReader, ConfigResolver, HttpPolicyEngine, KubeConfigSource,
    KubeEventSink, NamespaceAugmenter, ProcessExcluder, ValidationHandler, WebhookState,
};
use gatekeeper_webhook::{namespace_cache, run_webhook_server, watch_config};

/// Pending admission events before new ones are dropped
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Grace period for in-flight admission requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatekeeper_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let args = Args::parse();
    let settings = args.webhook_settings();
    info!(
        namespace = %settings.platform_namespace,
        log_denies = settings.log_denies,
        emit_admission_events = settings.emit_admission_events,
        failure_policy = ?settings.failure_policy,
        enable_mutation = args.enable_mutation,
        "Starting gatekeeper-webhook"
    );

    // Both rustls providers are linked; pick one before any TLS config is built
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (health checks should answer before serving)
    let health_handle = {
        let health_state = health_state.clone();
        let port = args.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Namespace cache for the augmenter
    let (namespace_store, namespace_driver) = namespace_cache(client.clone());
    let namespace_handle = tokio::spawn(namespace_driver);

    // Exclusion set fed by the Config singleton
    let excluder = Arc::new(ProcessExcluder::new());
    let config_handle = {
        let client = client.clone();
        let namespace = settings.platform_namespace.clone();
        let excluder = excluder.clone();
        tokio::spawn(async move { watch_config(client, &namespace, excluder).await })
    };

    let namespaces = NamespaceAugmenter::new(
        Arc::new(CachedNamespaceReader::new(namespace_store)),
        Arc::new(ApiNamespaceReader::new(client.clone())),
    );
    let config = ConfigResolver::new(Some(Arc::new(KubeConfigSource::new(
        client.clone(),
        &settings.platform_namespace,
    ))));
    let engine = Arc::new(HttpPolicyEngine::new(&args.engine_url)?);

    let mut builder = ValidationHandler::builder(settings.clone(), engine, namespaces)
        .excluder(excluder)
        .config_resolver(config)
        .reporter(health_state.metrics.clone());

    let event_handle = if settings.emit_admission_events {
        let (sink, publisher) = KubeEventSink::new(
            client.clone(),
            &settings.platform_namespace,
            EVENT_QUEUE_CAPACITY,
            health_state.metrics.admission_events_dropped.clone(),
        );
        builder = builder.event_sink(Arc::new(sink));
        Some(tokio::spawn(publisher.run()))
    } else {
        None
    };

    let handler = Arc::new(builder.build());
    let state = Arc::new(WebhookState::new(handler, args.request_timeout()));

    let webhook_handle = {
        let enable_mutation = args.enable_mutation;
        let port = args.port;
        let cert_path = args.cert_path();
        let key_path = args.key_path();
        tokio::spawn(async move {
            if let Err(e) =
                run_webhook_server(state, enable_mutation, port, cert_path, key_path).await
            {
                error!("Webhook server error: {}", e);
            }
        })
    };
    health_state.set_ready(true).await;

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = namespace_handle => {
            if let Err(e) = result {
                error!("Namespace cache task panicked: {}", e);
            }
        }
        result = config_handle => {
            if let Err(e) = result {
                error!("Config watcher task panicked: {}", e);
            }
        }
        result = async {
            match event_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Event publisher task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the API server stops routing requests here
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admission requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
