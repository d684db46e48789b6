//! Verifiable credential issuance
//!
//! A counterparty requests a VC by proving control of its organization
//! address key: the request carries the address, the ed25519 public key
//! and a signature over the address bytes. On success the proxy issues a
//! signed bearer credential scoped to the local workgroup.

use super::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

/// Issued credential lifetime
const CREDENTIAL_TTL_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct IssueCredentialRequest {
    pub address: Option<String>,
    /// Hex-encoded ed25519 public key
    pub public_key: Option<String>,
    /// Hex-encoded signature over the address bytes
    pub signature: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IssueCredentialResponse {
    pub vc: String,
}

#[derive(Debug, Serialize)]
struct CredentialClaims {
    sub: String,
    iat: i64,
    exp: i64,
    baseline: CredentialBaselineClaim,
}

#[derive(Debug, Serialize)]
struct CredentialBaselineClaim {
    #[serde(skip_serializing_if = "Option::is_none")]
    workgroup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer_organization_address: Option<String>,
}

pub async fn issue_credential(
    State(state): State<AppState>,
    Json(request): Json<IssueCredentialRequest>,
) -> ApiResult<(StatusCode, Json<IssueCredentialResponse>)> {
    let address = request
        .address
        .ok_or_else(|| ApiError::validation("address is required"))?;
    let public_key = request
        .public_key
        .ok_or_else(|| ApiError::validation("public_key is required"))?;
    let signature = request
        .signature
        .ok_or_else(|| ApiError::validation("signature is required"))?;

    verify_address_signature(&address, &public_key, &signature)?;

    let organization = state.ctx.organization_config();
    let now = Utc::now();
    let claims = CredentialClaims {
        sub: address.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(CREDENTIAL_TTL_HOURS)).timestamp(),
        baseline: CredentialBaselineClaim {
            workgroup_id: organization.workgroup_id,
            issuer_organization_address: organization.address,
        },
    };

    let vc = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.ctx.config.server.jwt_secret.as_bytes()),
    )
    .map_err(|err| ApiError::Internal(err.to_string()))?;

    tracing::debug!(address, "issued verifiable credential");
    Ok((StatusCode::CREATED, Json(IssueCredentialResponse { vc })))
}

/// Verify the requester controls the key bound to the claimed address
fn verify_address_signature(
    address: &str,
    public_key: &str,
    signature: &str,
) -> Result<(), ApiError> {
    let key_bytes: [u8; 32] = hex::decode(public_key.trim_start_matches("0x"))
        .map_err(|err| ApiError::validation(format!("failed to decode public key; {err}")))?
        .try_into()
        .map_err(|_| ApiError::validation("public key must be 32 bytes"))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|err| ApiError::validation(format!("invalid public key; {err}")))?;

    let signature_bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|err| ApiError::validation(format!("failed to decode signature; {err}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|err| ApiError::validation(format!("invalid signature; {err}")))?;

    verifying_key
        .verify(address.as_bytes(), &signature)
        .map_err(|_| ApiError::validation("recovered key did not match signer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn test_valid_signature_accepted() {
        let key = keypair();
        let address = "0xorg1";
        let signature = key.sign(address.as_bytes());

        let result = verify_address_signature(
            address,
            &hex::encode(key.verifying_key().to_bytes()),
            &hex::encode(signature.to_bytes()),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_signature_over_other_address_rejected() {
        let key = keypair();
        let signature = key.sign(b"0xother");

        let result = verify_address_signature(
            "0xorg1",
            &hex::encode(key.verifying_key().to_bytes()),
            &hex::encode(signature.to_bytes()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_key_rejected() {
        let result = verify_address_signature("0xorg1", "zz", "00");
        assert!(result.is_err());
    }
}
