//! Protocol message dispatcher
//!
//! Consumes `baseline.protocolmessage.outbound`. For each message the
//! dispatcher resolves the recipient's messaging endpoint and bearer
//! credential, opens a short-lived authenticated connection to the
//! recipient's bus, publishes the raw bytes to the `baseline` subject and
//! closes. Failures trigger a counterparty re-resolution and a nak so the
//! message is retried.

use crate::context::ProxyContext;
use async_trait::async_trait;
use baseline_bus::{subject::SUBJECT_BASELINE, Delivery, Disposition, MessageHandler};
use baseline_types::ProtocolMessage;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Peer connect timeout
const PEER_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Short-lived connection to a counterparty's messaging endpoint
#[async_trait]
pub trait PeerGateway: Send + Sync {
    /// Publish raw bytes to a subject on the peer's bus, authorized by the
    /// peer-issued verifiable credential.
    async fn publish(
        &self,
        endpoint: &str,
        bearer_token: &str,
        connection_name: &str,
        subject: &str,
        payload: &[u8],
    ) -> std::result::Result<(), String>;

    /// Request a verifiable credential from the counterparty's credential
    /// endpoint.
    async fn request_credential(
        &self,
        endpoint: &str,
        address: &str,
    ) -> std::result::Result<String, String>;
}

/// HTTP implementation of the peer gateway
pub struct HttpPeerGateway {
    http: reqwest::Client,
}

impl HttpPeerGateway {
    pub fn new() -> std::result::Result<Self, String> {
        let http = reqwest::Client::builder()
            .connect_timeout(PEER_CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PeerGateway for HttpPeerGateway {
    async fn publish(
        &self,
        endpoint: &str,
        bearer_token: &str,
        connection_name: &str,
        subject: &str,
        payload: &[u8],
    ) -> std::result::Result<(), String> {
        let url = format!("{}/api/v1/subjects/{subject}", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer_token)
            .header("x-baseline-connection", connection_name)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!("peer publish returned status {}", response.status()));
        }
        Ok(())
    }

    async fn request_credential(
        &self,
        endpoint: &str,
        address: &str,
    ) -> std::result::Result<String, String> {
        let url = format!("{}/api/v1/credentials", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .json(&json!({ "address": address }))
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!(
                "credential request returned status {}",
                response.status()
            ));
        }

        let body: serde_json::Value = response.json().await.map_err(|err| err.to_string())?;
        body.get("vc")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "credential response carried no vc".to_string())
    }
}

pub struct Dispatcher {
    ctx: Arc<ProxyContext>,
    gateway: Arc<dyn PeerGateway>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ProxyContext>, gateway: Arc<dyn PeerGateway>) -> Self {
        Self { ctx, gateway }
    }

    /// Resolve the recipient's bearer credential, requesting one from the
    /// counterparty when none is cached.
    async fn resolve_credential(&self, recipient: &str, endpoint: &str) -> Option<String> {
        if let Some(vc) = self.ctx.directory.lookup_issued_vc(recipient).await {
            return Some(vc);
        }

        let own_address = self.ctx.organization_address().unwrap_or_default();
        match self.gateway.request_credential(endpoint, &own_address).await {
            Ok(vc) => {
                if let Err(err) = self.ctx.directory.cache_issued_vc(recipient, &vc).await {
                    tracing::warn!(recipient, error = %err, "failed to cache requested verifiable credential");
                }
                Some(vc)
            }
            Err(err) => {
                tracing::warn!(
                    recipient,
                    error = %err,
                    "failed to request verifiable credential from recipient counterparty"
                );
                None
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        tracing::debug!(
            bytes = delivery.payload.len(),
            subject = %delivery.subject,
            "consuming dispatch protocol message"
        );

        let message: ProtocolMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "failed to unmarshal dispatch protocol message");
                return Disposition::Term;
            }
        };

        let Some(recipient) = message.recipient.as_deref() else {
            tracing::warn!("no participant specified in protocol message");
            return Disposition::Term;
        };

        let endpoint = match self.ctx.directory.resolve_messaging_endpoint(recipient).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                // the endpoint may appear in the registry later
                tracing::warn!(recipient, "failed to lookup recipient messaging endpoint");
                return Disposition::Nak;
            }
            Err(err) => {
                tracing::warn!(recipient, error = %err, "failed to lookup recipient messaging endpoint");
                return Disposition::Nak;
            }
        };

        let Some(bearer_token) = self.resolve_credential(recipient, &endpoint).await else {
            self.ctx.directory.resolve_counterparties().await;
            return Disposition::Nak;
        };

        let connection_name = format!(
            "{}-{}",
            self.ctx.organization_address().unwrap_or_default(),
            Uuid::new_v4()
        );

        match self
            .gateway
            .publish(
                &endpoint,
                &bearer_token,
                &connection_name,
                SUBJECT_BASELINE,
                &delivery.payload,
            )
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    bytes = delivery.payload.len(),
                    recipient,
                    "broadcast protocol message to recipient"
                );
                Disposition::Ack
            }
            Err(err) => {
                // clear cached state so the endpoint is re-fetched
                self.ctx.directory.resolve_counterparties().await;
                tracing::warn!(recipient, error = %err, "failed to publish protocol message to recipient");
                Disposition::Nak
            }
        }
    }
}
