//! LinkHub broker API server.
//!
//! Multi-tenant OAuth broker and API abstraction gateway: projects sign
//! requests with API-key pairs, end users connect third-party accounts, and
//! the uniform verb surface dispatches to provider adapters.

mod bootstrap;
mod config;
mod health;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::info;

use config::{AppMode, Config};
use health::{health_handler, livez_handler, readyz_handler};
use linkhub_api::context::{request_context_middleware, request_deadline_middleware};
use linkhub_api::{api_router, ApiConfig, AppState};
use linkhub_crypto::KeyRing;
use linkhub_webhooks::{DeliveryService, EventPublisher, WebhookWorker};

/// Interval between expired-state sweeps.
const STATE_SWEEP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        mode = %config.app_mode,
        "Starting LinkHub broker API"
    );

    match config.validate_security() {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::warn!(target: "security", "{}", warning);
            }
        }
        Err(errors) => {
            for error in &errors {
                tracing::error!(target: "security", "{}", error);
            }
            eprintln!(
                "FATAL: {} insecure default(s) detected in production mode.",
                errors.len()
            );
            std::process::exit(1);
        }
    }

    let keyring = match KeyRing::from_hex(&config.master_encryption_key) {
        Ok(ring) => Arc::new(ring),
        Err(e) => {
            eprintln!("FATAL: invalid master encryption key: {e}");
            std::process::exit(1);
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            info!("Database connection established");
            pool
        }
        Err(e) => {
            eprintln!("FATAL: database connection failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = linkhub_db::migrations::run_migrations(&pool).await {
        eprintln!("FATAL: migrations failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = bootstrap::seed_providers(&pool, &keyring, &config).await {
        eprintln!("FATAL: provider seeding failed: {e}");
        std::process::exit(1);
    }

    let registry = match bootstrap::build_registry(&pool, &keyring).await {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("FATAL: adapter registry construction failed: {e}");
            std::process::exit(1);
        }
    };

    let (events, event_rx) = EventPublisher::new(1024);

    let state = AppState::new(
        pool.clone(),
        keyring.clone(),
        registry,
        events,
        ApiConfig {
            broker_base_url: config.broker_base_url.clone(),
            oauth_callback_url: config.oauth_callback_url.clone(),
            allow_private_webhooks: !config.app_mode.is_production(),
            default_minute_limit: config.rate_limit_per_minute,
            default_day_limit: config.rate_limit_per_day,
        },
    );

    let shutdown = CancellationToken::new();

    // Webhook delivery worker
    let delivery_service = DeliveryService::new(pool.clone(), keyring.clone());
    let worker = WebhookWorker::new(delivery_service, event_rx, shutdown.clone());
    let worker_handle = tokio::spawn(worker.run());

    // Hourly sweep of expired unused OAuth states
    let sweep_oauth = state.oauth.clone();
    let sweep_token = shutdown.clone();
    let sweep_handle = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(STATE_SWEEP_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = sweep_token.cancelled() => break,
                _ = interval.tick() => sweep_oauth.sweep_expired_states().await,
            }
        }
    });

    let cors = if config.app_mode == AppMode::Production {
        CorsLayer::new()
    } else {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/livez", get(livez_handler))
        .route("/readyz", get(readyz_handler).with_state(pool.clone()))
        .nest("/v1", api_router(state))
        .layer(middleware::from_fn(request_deadline_middleware))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("FATAL: invalid listen address: {e}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(%addr, "LinkHub broker API listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop background work and wait for it to wind down.
    shutdown.cancel();
    let _ = worker_handle.await;
    let _ = sweep_handle.await;

    if let Err(e) = serve_result {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }

    info!("LinkHub broker API stopped");
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
