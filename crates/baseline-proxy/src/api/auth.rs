//! Organization subject authorization
//!
//! Resource handlers require a bearer JWT whose subject names an
//! organization; the subject must match the locally configured
//! organization id.

use super::AppState;
use crate::error::ApiError;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct SubjectClaims {
    sub: String,
}

/// Extract the bearer token from the Authorization header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")))
}

/// Resolve and authorize the organization subject of a request.
///
/// Returns 401 when no valid organization bearer token is present and 403
/// when the subject does not match the configured organization.
pub fn authorized_organization_id(
    headers: &HeaderMap,
    state: &AppState,
) -> Result<Uuid, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let key = DecodingKey::from_secret(state.ctx.config.server.jwt_secret.as_bytes());
    let claims = decode::<SubjectClaims>(token, &key, &validation)
        .map_err(|_| ApiError::Unauthorized)?
        .claims;

    // subjects are rendered as `organization:<uuid>`
    let subject = claims
        .sub
        .strip_prefix("organization:")
        .unwrap_or(&claims.sub);
    let organization_id = Uuid::parse_str(subject).map_err(|_| ApiError::Unauthorized)?;

    if let Some(configured) = state.ctx.organization_id() {
        if configured != organization_id {
            return Err(ApiError::Forbidden);
        }
    }

    Ok(organization_id)
}

/// Claims carried by a workgroup-join invitation
#[derive(Debug, Deserialize)]
pub struct InvitationClaims {
    pub baseline: BaselineClaim,
}

/// The `baseline` claim of an invitation JWT
#[derive(Debug, Deserialize)]
pub struct BaselineClaim {
    pub workgroup_id: Option<String>,
    pub invitor_organization_address: Option<String>,
    pub registry_contract_address: Option<String>,
}

/// Verify an invitation JWT against the key selected by its `kid` header,
/// falling back to the shared secret.
pub fn verify_invitation_token(
    token: &str,
    state: &AppState,
) -> Result<InvitationClaims, ApiError> {
    let header = decode_header(token)
        .map_err(|err| ApiError::validation(format!("failed to parse invitation jwt; {err}")))?;

    let secret = match header.kid.as_deref() {
        Some(kid) => state
            .ctx
            .config
            .server
            .jwt_keys
            .get(kid)
            .ok_or_else(|| {
                ApiError::validation(format!(
                    "failed to resolve a valid verification key; invalid kid specified in header: {kid}"
                ))
            })?
            .clone(),
        None => state.ctx.config.server.jwt_secret.clone(),
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<InvitationClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|err| ApiError::validation(format!("failed to parse invitation jwt; {err}")))
}
