// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Streakguard API Server
//!
//! Receives activity evidence from Garmin and Whoop webhooks and from the
//! chat bridge, and runs the periodic deadline sweep and Whoop sync.

use std::sync::Arc;
use streakguard::{
    config::{Config, StoreBackend},
    db::{FirestoreDb, MemoryStore, TimelineStore},
    services::{
        enforcement::run_enforcement_loop,
        providers::{garmin::GarminClient, whoop::WhoopClient},
        sync::run_sync_loop,
        ChatBridgeNotifier, HttpProviderApi, LogNotifier, MemoryTtlStore, Notifier,
    },
    AppState,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, backend = ?config.store_backend, "Starting Streakguard API");

    let store: Arc<dyn TimelineStore> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(FirestoreDb::new(&config.gcp_project_id).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let provider_api = Arc::new(HttpProviderApi::new(
        GarminClient::new(
            config.garmin_client_id.clone(),
            config.garmin_client_secret.clone(),
        ),
        WhoopClient::new(
            config.whoop_client_id.clone(),
            config.whoop_client_secret.clone(),
        ),
    ));

    let notifier: Arc<dyn Notifier> = match &config.chat_bridge_url {
        Some(url) => {
            tracing::info!(url = %url, "Chat bridge notifier enabled");
            Arc::new(ChatBridgeNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let policy = config.policy.clone();
    let port = config.port;
    let state = Arc::new(AppState::new(
        config,
        store,
        Arc::new(MemoryTtlStore::new()),
        provider_api,
        notifier,
    ));

    // Background loops stop when `true` is sent.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let enforcement = tokio::spawn(run_enforcement_loop(
        state.scheduler.clone(),
        policy.sweep_interval,
        shutdown_rx.clone(),
    ));
    let sync = tokio::spawn(run_sync_loop(
        state.pipeline.clone(),
        state.store.clone(),
        policy.deadline(),
        policy.sync_interval,
        shutdown_rx,
    ));

    // Build router
    let app = streakguard::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    shutdown_tx.send(true)?;
    let _ = tokio::join!(enforcement, sync);
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["streakguard=debug", "info"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    tracing_subscriber::registry().with(filter).with(format).init();
}
