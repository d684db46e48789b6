//! System-of-record adapter client

use crate::error::{ClientError, Result};
use crate::ident::{deserialize_response, expect_success, trim_base_url};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Business object status reported back to the system of record
pub const BUSINESS_OBJECT_STATUS_SUCCESS: &str = "success";

/// Business object error status
pub const BUSINESS_OBJECT_STATUS_ERROR: &str = "error";

/// CRUDs business objects in the internal system of record
#[async_trait]
pub trait SorClient: Send + Sync {
    /// Create a business object; the response carries the internal `id`
    async fn create_object(&self, params: Value) -> Result<Value>;

    /// Update a business object by internal id
    async fn update_object(&self, id: &str, payload: Value) -> Result<()>;

    /// Surface exchange progress or errors for a business object
    async fn update_object_status(&self, id: &str, params: Value) -> Result<()>;
}

/// Extract the internal id from a create-object response
pub fn object_id(response: &Value) -> Result<String> {
    response
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ClientError::UnexpectedResponse("no id present in system of record response".into())
        })
}

/// HTTP implementation against the configured system-of-record adapter
pub struct HttpSorClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpSorClient {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            base_url: trim_base_url(base_url),
            bearer_token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl SorClient for HttpSorClient {
    async fn create_object(&self, params: Value) -> Result<Value> {
        let request = self
            .http
            .post(format!("{}/api/v1/business_objects", self.base_url))
            .json(&params);

        let response = self.authorize(request).send().await?;
        deserialize_response(response).await
    }

    async fn update_object(&self, id: &str, payload: Value) -> Result<()> {
        let request = self
            .http
            .put(format!("{}/api/v1/business_objects/{id}", self.base_url))
            .json(&payload);

        let response = self.authorize(request).send().await?;
        expect_success(response).await
    }

    async fn update_object_status(&self, id: &str, params: Value) -> Result<()> {
        let request = self
            .http
            .put(format!(
                "{}/api/v1/business_objects/{id}/status",
                self.base_url
            ))
            .json(&params);

        let response = self.authorize(request).send().await?;
        expect_success(response).await
    }
}
