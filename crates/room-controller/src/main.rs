//! Room Controller
//!
//! Signaling coordinator service for multi-party real-time media sessions.
//!
//! # Servers
//!
//! - HTTP server for health endpoints and Prometheus metrics
//!   (default: 0.0.0.0:8081)
//!
//! The client-facing message transport is provided by the embedding
//! deployment; it accepts connections and drives
//! [`room_controller::signaling::SignalingSession`] against the directory
//! handle this binary constructs.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Construct the media engine backend
//! 4. Initialize actor system (`RoomDirectoryActorHandle`)
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::actors::{ActorMetrics, DirectoryLimits, RoomDirectoryActorHandle};
use room_controller::config::{Config, EngineBackend};
use room_controller::engine::local::LocalMediaEngine;
use room_controller::engine::MediaEngine;
use room_controller::observability::{health_router, HealthState};
use room_controller::registry::ProducerRegistry;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!(
        rc_id = %config.rc_id,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        max_peers_per_room = config.max_peers_per_room,
        engine_backend = ?config.engine_backend,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder.
    // This must happen before any metrics are recorded.
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Construct the media engine backend
    let engine: Arc<dyn MediaEngine> = match config.engine_backend {
        EngineBackend::Local => Arc::new(LocalMediaEngine::new()),
    };

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let registry = Arc::new(ProducerRegistry::new());

    let directory = RoomDirectoryActorHandle::new(
        config.rc_id.clone(),
        engine,
        Arc::clone(&registry),
        Arc::clone(&actor_metrics),
        DirectoryLimits {
            max_rooms: config.max_rooms,
            max_peers_per_room: config.max_peers_per_room,
        },
    );
    info!("Actor system initialized");

    // Create shutdown token as child of the directory's token so every
    // auxiliary task is cancelled when the directory shuts down
    let shutdown_token = directory.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        anyhow::anyhow!("Invalid health bind address: {e}")
    })?;

    let health_router = health_router(Arc::clone(&health_state));

    // Add /metrics endpoint served by the Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = health_router
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            anyhow::anyhow!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    // Spawn health server task
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // The actor system accepts joins from here on
    health_state.set_ready();

    // Wait for shutdown signal
    info!("Room Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so orchestrators stop sending traffic
    health_state.set_not_ready();

    // Shutdown actor system (cancels rooms and reclaims engine state)
    if let Err(e) = directory.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    // Give auxiliary tasks time to shut down
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
