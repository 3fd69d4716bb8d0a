//! HTTP handlers for object groups. `{key}` accepts a group id or name.

use crate::{
    errors::AppError,
    models::group::{GroupInput, StorageObjectGroup},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// GET `/api/groups`
pub async fn list_groups(
    State(state): State<AppState>,
) -> Result<Json<Vec<StorageObjectGroup>>, AppError> {
    Ok(Json(state.groups.list_groups().await?))
}

/// GET `/api/groups/names`
pub async fn list_group_names(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.groups.list_group_names().await?))
}

/// POST `/api/groups`
pub async fn create_group(
    State(state): State<AppState>,
    Json(input): Json<GroupInput>,
) -> Result<Response, AppError> {
    let group = state.groups.create_group(input).await?;

    let mut response = (StatusCode::CREATED, Json(&group)).into_response();
    if let Ok(location) = HeaderValue::from_str(&format!("/api/groups/{}", group.id)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// GET `/api/groups/{key}`
pub async fn get_group(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<StorageObjectGroup>, AppError> {
    Ok(Json(state.groups.get_group(&key).await?))
}

/// PUT `/api/groups/{key}`
pub async fn update_group(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(input): Json<GroupInput>,
) -> Result<Json<StorageObjectGroup>, AppError> {
    Ok(Json(state.groups.update_group(&key, input).await?))
}

/// DELETE `/api/groups/{key}`: removes every member object too.
pub async fn delete_group(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.groups.delete_group(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
