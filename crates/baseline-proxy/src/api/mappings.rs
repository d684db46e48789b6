//! Mapping management handlers

use super::{auth::authorized_organization_id, AppState};
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use baseline_types::Mapping;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListMappingsQuery {
    pub workgroup_id: Option<Uuid>,
}

pub async fn list_mappings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListMappingsQuery>,
) -> ApiResult<Json<Vec<Mapping>>> {
    let organization_id = authorized_organization_id(&headers, &state)?;

    let mappings = state
        .ctx
        .registry
        .list_mappings(Some(organization_id), query.workgroup_id)
        .await?;
    Ok(Json(mappings))
}

pub async fn create_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut mapping): Json<Mapping>,
) -> ApiResult<(StatusCode, Json<Mapping>)> {
    let organization_id = authorized_organization_id(&headers, &state)?;

    mapping.organization_id = Some(organization_id);
    let mapping = state.ctx.registry.create_mapping(mapping).await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

pub async fn update_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<Mapping>,
) -> ApiResult<StatusCode> {
    authorized_organization_id(&headers, &state)?;

    state.ctx.registry.update_mapping(&id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_mapping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    authorized_organization_id(&headers, &state)?;

    state.ctx.registry.delete_mapping(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
