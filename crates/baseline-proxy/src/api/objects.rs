//! System-of-record proxy objects handlers

use super::{auth::authorized_organization_id, AppState};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use baseline_types::{Message, ProtocolMessage};

/// `POST /api/v1/objects`: baseline a system-of-record create
pub async fn create_object(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut message): Json<Message>,
) -> ApiResult<(StatusCode, Json<ProtocolMessage>)> {
    authorized_organization_id(&headers, &state)?;

    match state.outbound.baseline_outbound(&mut message).await {
        Ok(mut protocol_message) => {
            // the canonical object stays private; it is not echoed back
            if let Some(payload) = protocol_message.payload.as_mut() {
                payload.object = None;
            }
            Ok((StatusCode::ACCEPTED, Json(protocol_message)))
        }
        Err(errors) => Err(ApiError::Validation(errors)),
    }
}

/// `PUT /api/v1/objects/:id`: baseline a system-of-record update
pub async fn update_object(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut message): Json<Message>,
) -> ApiResult<(StatusCode, Json<ProtocolMessage>)> {
    authorized_organization_id(&headers, &state)?;

    if state
        .ctx
        .records
        .lookup_record_by_internal_id(&id)
        .is_none()
    {
        return Err(ApiError::NotFound("baseline record not found".into()));
    }

    message.id = Some(id);

    match state.outbound.baseline_outbound(&mut message).await {
        Ok(mut protocol_message) => {
            if let Some(payload) = protocol_message.payload.as_mut() {
                payload.object = None;
            }
            Ok((StatusCode::ACCEPTED, Json(protocol_message)))
        }
        Err(errors) => Err(ApiError::Validation(errors)),
    }
}
