//! Workflow management handlers

use super::{auth::authorized_organization_id, AppState};
use crate::error::{ApiError, ApiResult};
use crate::registry::{WorkflowFilter, WorkflowPatch, WorkflowVersion};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use baseline_types::{Participant, Workflow};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub workgroup_id: Option<Uuid>,
    #[serde(default)]
    pub filter_instances: bool,
    #[serde(default)]
    pub filter_prototypes: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub workgroup_id: Option<Uuid>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub shield: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VersionWorkflowRequest {
    pub version: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<Json<Vec<Workflow>>> {
    authorized_organization_id(&headers, &state)?;

    // the query flags name what is removed from the listing
    let workflows = state
        .ctx
        .registry
        .list_workflows(WorkflowFilter {
            workgroup_id: query.workgroup_id,
            prototypes_only: query.filter_instances,
            instances_only: query.filter_prototypes,
        })
        .await?;
    Ok(Json(workflows))
}

pub async fn workflow_details(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    authorized_organization_id(&headers, &state)?;

    let workflow = state
        .ctx
        .registry
        .get_workflow(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("workflow not found".into()))?;
    Ok(Json(workflow))
}

pub async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    authorized_organization_id(&headers, &state)?;

    let mut workflow = Workflow::new(request.name, request.workgroup_id, request.version);
    workflow.description = request.description;
    workflow.participants = request.participants;
    workflow.shield = request.shield;

    // participants default to the workgroup membership
    if workflow.participants.is_empty() {
        if let Some(workgroup_id) = request.workgroup_id {
            if let Some(workgroup) = state.ctx.registry.get_workgroup(&workgroup_id).await? {
                workflow.participants = workgroup.participants;
            }
        }
    }

    let workflow = state.ctx.registry.create_workflow(workflow).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn update_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<WorkflowPatch>,
) -> ApiResult<StatusCode> {
    authorized_organization_id(&headers, &state)?;

    state.ctx.registry.update_workflow(&id, patch).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deploy_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    authorized_organization_id(&headers, &state)?;

    let workflow = state.ctx.registry.deploy_workflow(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(workflow)))
}

pub async fn version_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<VersionWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    authorized_organization_id(&headers, &state)?;

    let version = request
        .version
        .ok_or_else(|| ApiError::validation("version is required"))?;

    let workflow = state
        .ctx
        .registry
        .version_workflow(&id, &version, request.name, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn list_workflow_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<WorkflowVersion>>> {
    authorized_organization_id(&headers, &state)?;

    if state.ctx.registry.get_workflow(&id).await?.is_none() {
        return Err(ApiError::NotFound("workflow not found".into()));
    }

    let versions = state.ctx.registry.list_workflow_versions(&id).await?;
    Ok(Json(versions))
}

pub async fn delete_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    authorized_organization_id(&headers, &state)?;

    state.ctx.registry.delete_workflow(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
