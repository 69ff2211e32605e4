//! Platform Service
//!
//! Registers platforms and propagates each creation to:
//! - a replication peer, synchronously and best-effort
//! - a message channel, as a durable `Platform_Published` event
//!
//! ## Module Organization (Aggregate-based)
//!
//! - `customer` - owners of platforms
//! - `platform` - entity, creation orchestration and REST endpoints
//! - `repository` - transactional storage
//! - `replication` - synchronous peer client

// Aggregates
pub mod customer;
pub mod platform;

// Infrastructure
pub mod repository;
pub mod replication;
pub mod shared;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa_axum::router::OpenApiRouter;

// Re-export common types from shared
pub use shared::error::{PlatformError, Result};

// Re-export main types for convenience
pub use customer::{Customer, NewCustomer};
pub use platform::{NewPlatform, Platform, PlatformView, PlatformsState, platforms_router};
pub use platform::operations::{
    CreatePlatformCommand, CreatedPlatform, CreationError, CreationOrchestrator, PlatformPublished,
};
pub use repository::{PlatformRepository, RepositoryTransaction, SqlitePlatformRepository, StorageError};
pub use replication::{
    DisabledReplication, HttpReplicationClient, HttpReplicationConfig, ReplicationError, SyncReplicationClient,
};

/// Path the OpenAPI document is served from
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Build the HTTP API: `/api/platforms` plus its OpenAPI document.
pub fn api_router(state: PlatformsState) -> Router {
    let (router, mut openapi) = OpenApiRouter::new()
        .nest("/api/platforms", platforms_router(state))
        .split_for_parts();

    openapi.info.title = "Platform Service API".to_string();
    openapi.info.version = env!("CARGO_PKG_VERSION").to_string();
    openapi.info.description = Some("Platform registration with replication and event publishing".to_string());

    let openapi = Arc::new(openapi);
    router.route(
        OPENAPI_PATH,
        get(move || {
            let openapi = openapi.clone();
            async move { Json(openapi.as_ref().clone()) }
        }),
    )
}
