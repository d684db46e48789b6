//! On-chain registry client

use crate::error::{ClientError, Result};
use crate::ident::{deserialize_response, trim_base_url};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Executes read calls against the organization registry contract
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Execute a contract method; the response is the raw return tuple
    async fn execute_contract(
        &self,
        token: &str,
        contract_address: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value>;

    /// Look up an organization registration; the third tuple element is the
    /// base64-encoded messaging endpoint
    async fn get_org(
        &self,
        token: &str,
        registry_address: &str,
        org_address: &str,
    ) -> Result<Value> {
        let response = self
            .execute_contract(token, registry_address, "getOrg", vec![json!(org_address)])
            .await?;

        response
            .as_array()
            .and_then(|tuple| tuple.get(2))
            .cloned()
            .ok_or_else(|| {
                ClientError::UnexpectedResponse(
                    "getOrg returned no messaging endpoint element".into(),
                )
            })
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteContractResponse {
    response: Value,
}

/// HTTP implementation against the external chain service
pub struct HttpChainClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpChainClient {
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
impl ChainClient for HttpChainClient {
    async fn execute_contract(
        &self,
        token: &str,
        contract_address: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        let response = self
            .http
            .post(format!(
                "{}/api/v1/contracts/{contract_address}/execute",
                self.base_url
            ))
            .bearer_auth(token)
            .json(&json!({
                "method": method,
                "params": params,
                "value": 0,
            }))
            .send()
            .await?;

        let body: ExecuteContractResponse = deserialize_response(response).await?;
        Ok(body.response)
    }
}
