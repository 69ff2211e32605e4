//! Platform Service Outbox Relay
//!
//! Reads `Platform_Published` events from the platform database outbox and
//! publishes them to the message channel. Use it when the platform server runs
//! with `relay.embedded = false`.
//!
//! Each relay pass runs the full publish retry cycle for a row. Rows that keep
//! failing go back to PENDING until `relay.max_relay_attempts` passes are used
//! up, then they are marked FAILED. Rows left IN_PROGRESS by a crashed relay are
//! reset by the recovery task.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PLATFORM_SERVICE_CONFIG` | - | Path to a TOML config file |
//! | `PLATFORM_SERVICE_DATABASE_URL` | `sqlite://platforms.db?mode=rwc` | Database holding the outbox |
//! | `PLATFORM_SERVICE_CHANNEL_ENDPOINT` | `http://localhost:8081/api/events` | Event channel endpoint |
//! | `PLATFORM_SERVICE_CHANNEL_TOKEN` | - | Channel Bearer token |
//! | `PLATFORM_SERVICE_RELAY_POLL_INTERVAL_MS` | `1000` | Poll interval in milliseconds |
//! | `PLATFORM_SERVICE_RELAY_BATCH_SIZE` | `50` | Max rows per batch |
//! | `PLATFORM_SERVICE_METRICS_PORT` | `9090` | Metrics/health port |
//! | `LOG_FORMAT` | `text` | `json` for structured output |
//! | `RUST_LOG` | `info` | Log level |

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ps_common::{Observer, RetryPolicy, TracingObserver};
use ps_config::ConfigLoader;
use ps_outbox::sqlite::SqliteOutboxRepository;
use ps_outbox::{
    AsyncEventPublisher, HttpChannel, HttpChannelConfig, OutboxRelay, OutboxRelayConfig, OutboxRepository,
    RecoveryConfig, RecoveryTask,
};

#[tokio::main]
async fn main() -> Result<()> {
    ps_common::logging::init_logging("ps-outbox-relay");

    info!("Starting Platform Service Outbox Relay");

    let config = ConfigLoader::new().load()?;
    let observer: Arc<dyn Observer> = Arc::new(TracingObserver);
    let shutdown = CancellationToken::new();

    // Outbox repository
    let options = SqliteConnectOptions::from_str(&config.database.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(options)
        .await?;
    let outbox_repo = Arc::new(SqliteOutboxRepository::new(pool.clone()));
    outbox_repo.init_schema().await?;
    info!(url = %config.database.url, "Outbox repository initialized");

    // Channel and publisher
    let channel = Arc::new(HttpChannel::new(HttpChannelConfig {
        endpoint: config.channel.endpoint.clone(),
        api_token: config.channel.api_token.clone(),
        connect_timeout: config.channel.connect_timeout(),
        request_timeout: config.channel.request_timeout(),
    })?);
    let policy = RetryPolicy::new(config.publish.max_attempts, config.publish.base_delay());
    let publisher = Arc::new(AsyncEventPublisher::new(channel, policy, observer.clone()));
    info!(endpoint = %config.channel.endpoint, "Publishing to channel");

    let relay = OutboxRelay::new(
        outbox_repo.clone(),
        publisher,
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
        observer,
    );

    let relay_handle = {
        let token = shutdown.clone();
        tokio::spawn(async move { relay.run(token).await })
    };
    let recovery_handle = {
        let token = shutdown.clone();
        tokio::spawn(async move { recovery.run(token).await })
    };

    // Metrics server
    let metrics_addr = format!("{}:{}", config.http.host, config.http.metrics_port);
    info!("Metrics server listening on http://{}/metrics", metrics_addr);

    let metrics_app = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .route("/health", axum::routing::get(health_handler))
        .route("/ready", axum::routing::get(ready_handler));

    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr).await?;
    let metrics_handle = {
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .ok();
        })
    };

    info!("Platform Service Outbox Relay started");
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    // The relay puts claimed but unpublished rows back to PENDING
    shutdown.cancel();

    let drained = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = relay_handle.await;
        let _ = recovery_handle.await;
        let _ = metrics_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!("Timed out waiting for relay to stop");
    }

    pool.close().await;
    info!("Platform Service Outbox Relay shutdown complete");
    Ok(())
}

async fn metrics_handler() -> String {
    "# HELP ps_outbox_up Outbox relay is up\n# TYPE ps_outbox_up gauge\nps_outbox_up 1\n".to_string()
}

async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
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
