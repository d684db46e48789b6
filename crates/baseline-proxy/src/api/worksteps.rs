//! Workstep management handlers

use super::{auth::authorized_organization_id, AppState};
use crate::error::{ApiError, ApiResult};
use crate::registry::WorkstepPatch;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use baseline_types::{ProtocolMessagePayload, Workstep};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateWorkstepRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub cardinality: i32,
    #[serde(default)]
    pub require_finalized_deploy: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecuteWorkstepResponse {
    pub proof: Value,
}

pub async fn list_all_worksteps(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Workstep>>> {
    authorized_organization_id(&headers, &state)?;

    // flatten across prototypes, cardinality-ordered within each workflow
    let workflows = state
        .ctx
        .registry
        .list_workflows(Default::default())
        .await?;

    let mut worksteps = Vec::new();
    for workflow in workflows {
        worksteps.extend(state.ctx.registry.list_worksteps(&workflow.id).await?);
    }
    Ok(Json(worksteps))
}

pub async fn list_worksteps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Workstep>>> {
    authorized_organization_id(&headers, &state)?;

    let worksteps = state.ctx.registry.list_worksteps(&workflow_id).await?;
    Ok(Json(worksteps))
}

pub async fn workstep_details(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workflow_id, workstep_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Workstep>> {
    authorized_organization_id(&headers, &state)?;

    let workstep = state
        .ctx
        .registry
        .get_workstep(&workstep_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("workstep not found".into()))?;

    if workstep.workflow_id != workflow_id {
        return Err(ApiError::Forbidden);
    }

    Ok(Json(workstep))
}

pub async fn create_workstep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workflow_id): Path<Uuid>,
    Json(request): Json<CreateWorkstepRequest>,
) -> ApiResult<(StatusCode, Json<Workstep>)> {
    authorized_organization_id(&headers, &state)?;

    let mut workstep = Workstep::new(workflow_id, request.name, request.cardinality);
    workstep.description = request.description;
    workstep.require_finalized_deploy = request.require_finalized_deploy;

    let workstep = state.ctx.registry.add_workstep(&workflow_id, workstep).await?;
    Ok((StatusCode::CREATED, Json(workstep)))
}

pub async fn update_workstep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workflow_id, workstep_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<WorkstepPatch>,
) -> ApiResult<StatusCode> {
    authorized_organization_id(&headers, &state)?;

    state
        .ctx
        .registry
        .update_workstep(&workflow_id, &workstep_id, patch)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_workstep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workflow_id, workstep_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    authorized_organization_id(&headers, &state)?;

    state
        .ctx
        .registry
        .delete_workstep(&workflow_id, &workstep_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn execute_workstep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((workflow_id, workstep_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ProtocolMessagePayload>,
) -> ApiResult<(StatusCode, Json<ExecuteWorkstepResponse>)> {
    authorized_organization_id(&headers, &state)?;

    let token = super::auth::bearer_token(&headers)
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let proof = state
        .ctx
        .registry
        .execute_workstep(&token, &workflow_id, &workstep_id, &payload)
        .await?;

    Ok((StatusCode::CREATED, Json(ExecuteWorkstepResponse { proof })))
}
