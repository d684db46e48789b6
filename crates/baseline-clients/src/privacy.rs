//! Privacy (zero-knowledge) service client

use crate::error::Result;
use crate::ident::{deserialize_response, trim_base_url};
use async_trait::async_trait;
use baseline_types::Prover;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Proof generation response
#[derive(Debug, Clone, Deserialize)]
pub struct ProveResponse {
    pub proof: Value,
}

/// Proof verification response
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub result: bool,
}

/// Compiles provers and generates/verifies proofs
#[async_trait]
pub trait PrivacyClient: Send + Sync {
    /// Submit prover parameters for compilation; artifacts build
    /// asynchronously
    async fn create_prover(&self, token: &str, params: Value) -> Result<Prover>;

    /// Fetch a prover, including its compilation status
    async fn fetch_prover(&self, token: &str, prover_id: &str) -> Result<Prover>;

    /// Generate a proof for the given witness
    async fn prove(&self, token: &str, prover_id: &str, witness: Value) -> Result<ProveResponse>;

    /// Verify a proof against a witness; `store` persists the resulting
    /// state commitment
    async fn verify(
        &self,
        token: &str,
        prover_id: &str,
        store: bool,
        proof: Value,
        witness: Value,
    ) -> Result<VerifyResponse>;
}

/// HTTP implementation against the external privacy service
pub struct HttpPrivacyClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPrivacyClient {
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
impl PrivacyClient for HttpPrivacyClient {
    async fn create_prover(&self, token: &str, params: Value) -> Result<Prover> {
        let response = self
            .http
            .post(format!("{}/api/v1/circuits", self.base_url))
            .bearer_auth(token)
            .json(&params)
            .send()
            .await?;

        deserialize_response(response).await
    }

    async fn fetch_prover(&self, token: &str, prover_id: &str) -> Result<Prover> {
        let response = self
            .http
            .get(format!("{}/api/v1/circuits/{prover_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        deserialize_response(response).await
    }

    async fn prove(&self, token: &str, prover_id: &str, witness: Value) -> Result<ProveResponse> {
        let response = self
            .http
            .post(format!(
                "{}/api/v1/circuits/{prover_id}/prove",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&json!({ "witness": witness }))
            .send()
            .await?;

        deserialize_response(response).await
    }

    async fn verify(
        &self,
        token: &str,
        prover_id: &str,
        store: bool,
        proof: Value,
        witness: Value,
    ) -> Result<VerifyResponse> {
        let response = self
            .http
            .post(format!(
                "{}/api/v1/circuits/{prover_id}/verify",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&json!({
                "store": store,
                "proof": proof,
                "witness": witness,
            }))
            .send()
            .await?;

        deserialize_response(response).await
    }
}
