//! Identity service client

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Short-lived access token vended from an organization refresh token
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
}

/// Vends access JWTs for organization-scoped RPCs
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Exchange a refresh token for an organization access token
    async fn create_token(&self, refresh_token: &str, organization_id: &str)
        -> Result<AccessToken>;
}

/// HTTP implementation against the external identity service
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: trim_base_url(base_url),
        })
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn create_token(
        &self,
        refresh_token: &str,
        organization_id: &str,
    ) -> Result<AccessToken> {
        let response = self
            .http
            .post(format!("{}/api/v1/tokens", self.base_url))
            .bearer_auth(refresh_token)
            .json(&json!({
                "grant_type": "refresh_token",
                "organization_id": organization_id,
            }))
            .send()
            .await?;

        deserialize_response(response).await
    }
}

pub(crate) fn trim_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

pub(crate) async fn deserialize_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Rpc {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(ClientError::Transport)
}

pub(crate) async fn expect_success(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Rpc {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}
