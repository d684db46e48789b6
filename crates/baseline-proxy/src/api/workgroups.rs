//! Workgroup management handlers
//!
//! `POST /workgroups` doubles as workgroup-join invitation acceptance:
//! a request carrying an invitation token verifies the JWT, caches the
//! invitor as a counterparty alongside its credential, and broadcasts a
//! `JOIN` protocol message back to the invitor.

use super::{
    auth::{authorized_organization_id, verify_invitation_token},
    AppState,
};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use baseline_bus::subject::SUBJECT_PROTOCOL_MESSAGE_OUTBOUND;
use baseline_types::{
    Opcode, Participant, ProtocolMessage, ProtocolMessagePayload, Workgroup,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateWorkgroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,

    /// Invitation JWT; presence switches to the acceptance flow
    pub token: Option<String>,

    /// Bearer credential authorized by the invitor for peer publishes
    pub authorized_bearer_token: Option<String>,
}

pub async fn list_workgroups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Workgroup>>> {
    authorized_organization_id(&headers, &state)?;

    let workgroups = state.ctx.registry.list_workgroups().await?;
    Ok(Json(workgroups))
}

pub async fn workgroup_details(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Workgroup>> {
    authorized_organization_id(&headers, &state)?;

    let workgroup = state
        .ctx
        .registry
        .get_workgroup(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("workgroup not found".into()))?;
    Ok(Json(workgroup))
}

pub async fn create_workgroup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateWorkgroupRequest>,
) -> ApiResult<StatusCode> {
    let organization_id = authorized_organization_id(&headers, &state)?;

    match request.token {
        Some(token) => accept_invitation(&state, &request.authorized_bearer_token, &token).await,
        None => {
            let name = request
                .name
                .ok_or_else(|| ApiError::validation("name is required"))?;
            let mut workgroup = Workgroup::new(name, Some(organization_id));
            workgroup.description = request.description;
            state.ctx.registry.create_workgroup(workgroup).await?;
            Ok(StatusCode::CREATED)
        }
    }
}

/// Accept a workgroup-join invitation
async fn accept_invitation(
    state: &AppState,
    authorized_bearer_token: &Option<String>,
    token: &str,
) -> ApiResult<StatusCode> {
    let claims = verify_invitation_token(token, state)?;

    let workgroup_id = claims
        .baseline
        .workgroup_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| ApiError::validation("invalid workgroup identifier in invitation"))?;

    let invitor_address = claims
        .baseline
        .invitor_organization_address
        .ok_or_else(|| ApiError::validation("no invitor address provided in vc"))?;

    let registry_contract_address = claims
        .baseline
        .registry_contract_address
        .ok_or_else(|| {
            ApiError::validation(format!(
                "no registry contract address provided by invitor: {invitor_address}"
            ))
        })?;

    let configured = state.ctx.config.registry.contract_address.as_deref();
    if configured != Some(registry_contract_address.as_str()) {
        return Err(ApiError::validation(format!(
            "given registry contract address ({registry_contract_address}) did not match configured address ({})",
            configured.unwrap_or("<unset>")
        )));
    }

    let invitor = Participant::new(&invitor_address);
    state
        .ctx
        .directory
        .cache_organization(&invitor)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    if let Some(vc) = authorized_bearer_token {
        state
            .ctx
            .directory
            .cache_issued_vc(&invitor_address, vc)
            .await
            .map_err(|err| {
                ApiError::validation(format!("failed to cache organization-issued vc; {err}"))
            })?;
    }

    let join = ProtocolMessage {
        baseline_id: None,
        opcode: Some(Opcode::Join),
        identifier: Some(workgroup_id),
        sender: state.ctx.organization_address(),
        recipient: Some(invitor_address),
        shield: None,
        signature: None,
        message_type: None,
        payload: Some(ProtocolMessagePayload {
            object: Some(json!({
                "address": state.ctx.organization_address(),
                "authorized_bearer_token": serde_json::Value::Null,
            })),
            payload_type: None,
            witness: None,
            proof: None,
        }),
    };

    let payload =
        serde_json::to_vec(&join).map_err(|err| ApiError::Internal(err.to_string()))?;
    tracing::debug!(bytes = payload.len(), "broadcasting JOIN protocol message");
    state
        .ctx
        .bus
        .publish(SUBJECT_PROTOCOL_MESSAGE_OUTBOUND, payload)
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(StatusCode::NO_CONTENT)
}
