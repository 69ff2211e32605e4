//! Platforms API
//!
//! REST endpoints for platform creation and lookup.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    Json,
};
use ps_common::{Observation, Observer};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::platform::operations::{CreatePlatformCommand, CreationOrchestrator};
use crate::platform::PlatformView;
use crate::repository::PlatformRepository;
use crate::shared::error::PlatformError;

/// Create platform request
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlatformRequest {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub publisher: String,

    /// Stored as given
    #[serde(default)]
    pub cost: String,
}

/// Query parameters for platform creation
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CreatePlatformParams {
    /// Email of the owning customer; created with placeholder names if unknown
    pub customer_email: Option<String>,
}

/// Platforms service state
#[derive(Clone)]
pub struct PlatformsState {
    pub repository: Arc<dyn PlatformRepository>,
    pub orchestrator: Arc<CreationOrchestrator>,
    pub observer: Arc<dyn Observer>,
    /// Cancelled on shutdown; each request works under a child token
    pub shutdown: CancellationToken,
}

/// Create a new platform
#[utoipa::path(
    post,
    path = "",
    tag = "platforms",
    params(CreatePlatformParams),
    request_body = CreatePlatformRequest,
    responses(
        (status = 201, description = "Platform created", body = PlatformView,
            headers(("Location" = String, description = "URL of the created platform"))),
        (status = 400, description = "Validation error"),
        (status = 500, description = "Creation failed")
    )
)]
pub async fn create_platform(
    State(state): State<PlatformsState>,
    Query(params): Query<CreatePlatformParams>,
    payload: Result<Json<CreatePlatformRequest>, JsonRejection>,
) -> Result<(StatusCode, [(header::HeaderName, String); 1], Json<PlatformView>), PlatformError> {
    let Json(req) = payload?;
    let command = CreatePlatformCommand {
        customer_email: params.customer_email.unwrap_or_default(),
        name: req.name,
        publisher: req.publisher,
        cost: req.cost,
    };

    let cancel = state.shutdown.child_token();
    let created = state.orchestrator.create(command, &cancel).await?;

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, created.location)],
        Json(created.platform),
    ))
}

/// List platforms
#[utoipa::path(
    get,
    path = "",
    tag = "platforms",
    responses(
        (status = 200, description = "List of platforms", body = Vec<PlatformView>)
    )
)]
pub async fn list_platforms(
    State(state): State<PlatformsState>,
) -> Result<Json<Vec<PlatformView>>, PlatformError> {
    let platforms = state.repository.find_all_platforms().await?;
    state.observer.observe(Observation::PlatformsListed { count: platforms.len() });

    Ok(Json(platforms.into_iter().map(PlatformView::from).collect()))
}

/// Get platform by ID
#[utoipa::path(
    get,
    path = "/{id}",
    tag = "platforms",
    params(
        ("id" = i64, Path, description = "Platform ID")
    ),
    responses(
        (status = 200, description = "Platform found", body = PlatformView),
        (status = 404, description = "Platform not found")
    )
)]
pub async fn get_platform(
    State(state): State<PlatformsState>,
    Path(id): Path<i64>,
) -> Result<Json<PlatformView>, PlatformError> {
    match state.repository.find_platform_by_id(id).await? {
        Some(platform) => Ok(Json(platform.into())),
        None => {
            state.observer.observe(Observation::PlatformNotFound { platform_id: id });
            Err(PlatformError::not_found("Platform", id.to_string()))
        }
    }
}

/// Create platforms router
pub fn platforms_router(state: PlatformsState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(create_platform, list_platforms))
        .routes(routes!(get_platform))
        .with_state(state)
}
