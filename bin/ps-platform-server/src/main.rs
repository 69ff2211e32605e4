//! Platform Service Server
//!
//! Production server for the platform registration API:
//! - `POST /api/platforms`, `GET /api/platforms`, `GET /api/platforms/{id}`
//! - OpenAPI document at `/api-docs/openapi.json`
//! - Metrics and health on a separate port
//!
//! In `outbox` publish mode the outbox relay and stuck-row recovery run inside
//! this process unless `relay.embedded` is false, in which case the
//! `ps-outbox-relay` binary is expected to drain the outbox.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PLATFORM_SERVICE_CONFIG` | - | Path to a TOML config file |
//! | `PLATFORM_SERVICE_HTTP_PORT` | `8080` | HTTP API port |
//! | `PLATFORM_SERVICE_METRICS_PORT` | `9090` | Metrics/health port |
//! | `PLATFORM_SERVICE_DATABASE_URL` | `sqlite://platforms.db?mode=rwc` | Database URL |
//! | `PLATFORM_SERVICE_REPLICATION_ENABLED` | `true` | Replicate to the peer service |
//! | `PLATFORM_SERVICE_REPLICATION_ENDPOINT` | `http://localhost:6000/api/c/platforms` | Peer endpoint |
//! | `PLATFORM_SERVICE_CHANNEL_ENDPOINT` | `http://localhost:8081/api/events` | Event channel endpoint |
//! | `PLATFORM_SERVICE_CHANNEL_TOKEN` | - | Channel Bearer token |
//! | `PLATFORM_SERVICE_PUBLISH_MODE` | `direct` | `direct` or `outbox` |
//! | `PLATFORM_SERVICE_RELAY_EMBEDDED` | `true` | Run the relay in this process |
//! | `LOG_FORMAT` | `text` | `json` for structured output |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{http::HeaderValue, response::Json, routing::get, Router};
use sqlx::SqlitePool;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ps_common::{Observer, RetryPolicy, TracingObserver};
use ps_config::{AppConfig, ConfigLoader, DeliveryMode, HttpConfig};
use ps_outbox::sqlite::SqliteOutboxRepository;
use ps_outbox::{
    AsyncEventPublisher, HttpChannel, HttpChannelConfig, OutboxRelay, OutboxRelayConfig, RecoveryConfig,
    RecoveryTask,
};
use ps_platform::repository::sqlite;
use ps_platform::{
    api_router, CreationOrchestrator, DisabledReplication, HttpReplicationClient, HttpReplicationConfig,
    PlatformsState, SqlitePlatformRepository, SyncReplicationClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    ps_common::logging::init_logging("ps-platform-server");

    info!("Starting Platform Service Server");

    let config = ConfigLoader::new().load()?;
    let observer: Arc<dyn Observer> = Arc::new(TracingObserver);
    let shutdown = CancellationToken::new();

    // Storage
    let pool = connect_database(&config).await?;
    let repository = Arc::new(SqlitePlatformRepository::new(pool.clone()));
    repository.init_schema().await?;

    // Outbound collaborators
    let replication: Arc<dyn SyncReplicationClient> = if config.replication.enabled {
        info!(endpoint = %config.replication.endpoint, "Replication enabled");
        Arc::new(HttpReplicationClient::new(HttpReplicationConfig {
            endpoint: config.replication.endpoint.clone(),
            connect_timeout: config.replication.connect_timeout(),
            request_timeout: config.replication.request_timeout(),
        })?)
    } else {
        info!("Replication disabled");
        Arc::new(DisabledReplication)
    };

    let channel = Arc::new(HttpChannel::new(HttpChannelConfig {
        endpoint: config.channel.endpoint.clone(),
        api_token: config.channel.api_token.clone(),
        connect_timeout: config.channel.connect_timeout(),
        request_timeout: config.channel.request_timeout(),
    })?);
    let policy = RetryPolicy::new(config.publish.max_attempts, config.publish.base_delay());
    let publisher = Arc::new(AsyncEventPublisher::new(channel, policy, observer.clone()));
    info!(
        mode = ?config.publish.mode,
        max_attempts = policy.max_attempts,
        total_backoff_ms = %policy.total_backoff().as_millis(),
        "Event publishing configured"
    );

    let orchestrator = Arc::new(CreationOrchestrator::new(
        repository.clone(),
        replication,
        publisher.clone(),
        observer.clone(),
        config.publish.mode,
    ));

    // Embedded relay
    let mut background = Vec::new();
    if config.publish.mode == DeliveryMode::Outbox && config.relay.embedded {
        let outbox_repo = Arc::new(SqliteOutboxRepository::new(pool.clone()));

        let relay = OutboxRelay::new(
            outbox_repo.clone(),
            publisher.clone(),
            observer.clone(),
            OutboxRelayConfig {
                poll_interval: config.relay.poll_interval(),
                batch_size: config.relay.batch_size,
                max_relay_attempts: config.relay.max_relay_attempts,
            },
        );
        let recovery = RecoveryTask::new(
            outbox_repo,
            RecoveryConfig {
                check_interval: config.relay.recovery_interval(),
                stuck_timeout: config.relay.stuck_timeout(),
            },
            observer.clone(),
        );

        let token = shutdown.clone();
        background.push(tokio::spawn(async move { relay.run(token).await }));
        let token = shutdown.clone();
        background.push(tokio::spawn(async move { recovery.run(token).await }));
        info!("Embedded outbox relay started");
    } else if config.publish.mode == DeliveryMode::Outbox {
        warn!("Outbox mode without embedded relay; run ps-outbox-relay against the same database");
    }

    // API server
    let state = PlatformsState {
        repository,
        orchestrator,
        observer,
        shutdown: shutdown.clone(),
    };
    let app = api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.http));

    let api_addr = format!("{}:{}", config.http.host, config.http.port);
    info!("API server listening on http://{}", api_addr);

    let api_listener = TcpListener::bind(&api_addr).await?;
    let api_task = {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(api_listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                warn!(error = %e, "API server stopped with error");
            }
        })
    };

    // Metrics server
    let metrics_addr = format!("{}:{}", config.http.host, config.http.metrics_port);
    info!("Metrics server listening on http://{}/metrics", metrics_addr);

    let metrics_app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler));

    let metrics_listener = TcpListener::bind(&metrics_addr).await?;
    let metrics_task = {
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .ok();
        })
    };

    info!("Platform Service Server started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    // In-flight publish retries observe the cancellation and roll back
    shutdown.cancel();

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = api_task.await;
        let _ = metrics_task.await;
        for handle in background {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for tasks to stop");
    }

    pool.close().await;
    info!("Platform Service Server shutdown complete");
    Ok(())
}

async fn connect_database(config: &AppConfig) -> Result<SqlitePool> {
    let pool = sqlite::connect(&config.database.url, config.database.max_connections).await?;

    info!(url = %config.database.url, "Connected to database");
    Ok(pool)
}

fn cors_layer(http: &HttpConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if http.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = http
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn metrics_handler() -> &'static str {
    "# HELP ps_platform_up Platform service is up\n# TYPE ps_platform_up gauge\nps_platform_up 1\n"
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "READY"
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
