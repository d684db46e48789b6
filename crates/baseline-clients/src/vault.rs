//! Vault client for verifiable credential storage

use crate::error::Result;
use crate::ident::{deserialize_response, trim_base_url};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

/// Handle to a stored secret
#[derive(Debug, Clone, Deserialize)]
pub struct SecretRef {
    pub id: Uuid,
}

/// A retrieved secret value
#[derive(Debug, Clone, Deserialize)]
pub struct Secret {
    pub value: String,
}

/// Stores and retrieves secrets (verifiable credentials) in the vault
#[async_trait]
pub trait VaultClient: Send + Sync {
    async fn create_secret(
        &self,
        token: &str,
        vault_id: &Uuid,
        value: &str,
        name: &str,
        description: &str,
        kind: &str,
    ) -> Result<SecretRef>;

    async fn fetch_secret(&self, token: &str, vault_id: &Uuid, secret_id: &str) -> Result<Secret>;
}

/// HTTP implementation against the external vault service
pub struct HttpVaultClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpVaultClient {
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
impl VaultClient for HttpVaultClient {
    async fn create_secret(
        &self,
        token: &str,
        vault_id: &Uuid,
        value: &str,
        name: &str,
        description: &str,
        kind: &str,
    ) -> Result<SecretRef> {
        let response = self
            .http
            .post(format!("{}/api/v1/vaults/{vault_id}/secrets", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "value": value,
                "name": name,
                "description": description,
                "type": kind,
            }))
            .send()
            .await?;

        deserialize_response(response).await
    }

    async fn fetch_secret(&self, token: &str, vault_id: &Uuid, secret_id: &str) -> Result<Secret> {
        let response = self
            .http
            .get(format!(
                "{}/api/v1/vaults/{vault_id}/secrets/{secret_id}",
                self.base_url
            ))
            .bearer_auth(token)
            .send()
            .await?;

        deserialize_response(response).await
    }
}
