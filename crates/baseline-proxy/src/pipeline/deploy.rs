//! Workstep deployment loop
//!
//! Deploying a workflow prototype fans out one `baseline.workstep.deploy`
//! message per workstep and a `baseline.workflow.deploy` message for the
//! workflow itself. Each workstep handler provisions a prover and enqueues
//! a finalize message; the finalize handler naks until the external prover
//! has compiled. The workflow handler naks until every workstep reports
//! deployed, then stamps the deployment and acks.

use crate::context::ProxyContext;
use async_trait::async_trait;
use baseline_bus::{Delivery, Disposition, MessageHandler};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct WorkstepDeployMessage {
    workstep_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct WorkflowDeployMessage {
    workflow_id: Uuid,
}

pub struct WorkstepDeployHandler {
    ctx: Arc<ProxyContext>,
}

impl WorkstepDeployHandler {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MessageHandler for WorkstepDeployHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message: WorkstepDeployMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "failed to unmarshal workstep deploy message");
                return Disposition::Term;
            }
        };

        let token = match self.ctx.tokens.vend().await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "failed to vend organization access token");
                return Disposition::Nak;
            }
        };

        match self
            .ctx
            .registry
            .deploy_workstep(&token, &message.workstep_id)
            .await
        {
            Ok(true) => {
                tracing::debug!(workstep_id = %message.workstep_id, "workstep pending deployment");
                Disposition::Ack
            }
            Ok(false) => Disposition::Nak,
            Err(err) => {
                tracing::warn!(workstep_id = %message.workstep_id, error = %err, "failed to deploy workstep");
                Disposition::Nak
            }
        }
    }
}

pub struct WorkstepFinalizeDeployHandler {
    ctx: Arc<ProxyContext>,
}

impl WorkstepFinalizeDeployHandler {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MessageHandler for WorkstepFinalizeDeployHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message: WorkstepDeployMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "failed to unmarshal workstep finalize deploy message");
                return Disposition::Term;
            }
        };

        let token = match self.ctx.tokens.vend().await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "failed to vend organization access token");
                return Disposition::Nak;
            }
        };

        match self
            .ctx
            .registry
            .finalize_workstep_deploy(&token, &message.workstep_id)
            .await
        {
            Ok(true) => {
                tracing::debug!(workstep_id = %message.workstep_id, "deployed workstep");
                Disposition::Ack
            }
            Ok(false) => Disposition::Nak,
            Err(err) => {
                tracing::warn!(workstep_id = %message.workstep_id, error = %err, "failed to finalize workstep deployment");
                Disposition::Nak
            }
        }
    }
}

pub struct WorkflowDeployHandler {
    ctx: Arc<ProxyContext>,
}

impl WorkflowDeployHandler {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl MessageHandler for WorkflowDeployHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let message: WorkflowDeployMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "failed to unmarshal workflow deploy message");
                return Disposition::Term;
            }
        };

        match self
            .ctx
            .registry
            .finalize_workflow_deploy(&message.workflow_id)
            .await
        {
            Ok(true) => Disposition::Ack,
            Ok(false) => Disposition::Nak,
            Err(err) => {
                tracing::warn!(workflow_id = %message.workflow_id, error = %err, "failed to finalize workflow deployment");
                Disposition::Nak
            }
        }
    }
}
