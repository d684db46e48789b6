//! Local stack configuration handlers

use super::{auth::authorized_organization_id, AppState};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The exposed local configuration
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_refresh_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_contract_address: Option<String>,
}

/// Mutable configuration attributes
#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub organization_id: Option<Uuid>,
    pub organization_address: Option<String>,
    pub organization_refresh_token: Option<String>,
    pub workgroup_id: Option<String>,
}

pub async fn config_details(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ConfigResponse>> {
    let organization = state.ctx.organization_config();
    if organization.organization_id.is_none() {
        return Err(ApiError::NotFound("config not initialized".into()));
    }

    authorized_organization_id(&headers, &state)?;

    Ok(Json(ConfigResponse {
        workgroup_id: organization.workgroup_id,
        organization_address: organization.address,
        organization_id: organization.organization_id,
        organization_refresh_token: organization.refresh_token,
        registry_contract_address: state.ctx.config.registry.contract_address.clone(),
    }))
}

pub async fn update_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateConfigRequest>,
) -> ApiResult<StatusCode> {
    let subject = authorized_organization_id(&headers, &state)?;

    if let Some(organization_id) = request.organization_id {
        if organization_id != subject {
            return Err(ApiError::Forbidden);
        }
    }

    {
        let mut organization = state
            .ctx
            .organization
            .write()
            .expect("organization lock poisoned");

        // a previously unset organization id is initialized by the bearer
        if organization.organization_id.is_none() {
            organization.organization_id = Some(subject.to_string());
            tracing::debug!(organization_id = %subject, "organization id initialized by bearer");
        }

        if let Some(address) = request.organization_address {
            organization.address = Some(address);
        }
        if let Some(refresh_token) = request.organization_refresh_token {
            organization.refresh_token = Some(refresh_token);
        }
        if let Some(workgroup_id) = request.workgroup_id {
            organization.workgroup_id = Some(workgroup_id);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
