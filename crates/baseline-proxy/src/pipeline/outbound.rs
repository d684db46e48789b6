//! Outbound pipeline
//!
//! Invoked synchronously from the objects edge. Transforms a system-of-
//! record write into a proven `BASELINE` protocol message and publishes one
//! copy per recipient to `baseline.protocolmessage.outbound`. A newly
//! materialized context is preceded by a `SYNC(workflow)` broadcast so
//! every participant can provision the same prover set.

use crate::context::ProxyContext;
use baseline_bus::subject::SUBJECT_PROTOCOL_MESSAGE_OUTBOUND;
use baseline_clients::{BUSINESS_OBJECT_STATUS_ERROR, BUSINESS_OBJECT_STATUS_SUCCESS};
use baseline_types::{
    BaselineContext, BaselineRecord, DocumentWitness, Message, Opcode, Participant,
    ProtocolMessage, ProtocolMessagePayload, WorkflowInstance, PAYLOAD_TYPE_WORKFLOW,
};
use serde_json::json;
use std::sync::Arc;

pub struct OutboundPipeline {
    ctx: Arc<ProxyContext>,
}

impl OutboundPipeline {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }

    /// Baseline an outbound system-of-record write.
    ///
    /// On success returns the proven protocol message; on failure the
    /// accumulated errors are returned, mirrored into `message.errors`, and
    /// the system of record is notified with an `error` status.
    pub async fn baseline_outbound(
        &self,
        message: &mut Message,
    ) -> std::result::Result<ProtocolMessage, Vec<String>> {
        if message.id.is_none() {
            message.errors.push("id is required".into());
            return Err(message.errors.clone());
        }
        if message.message_type.is_none() {
            message.errors.push("type is required".into());
            return Err(message.errors.clone());
        }
        if message.payload.is_none() {
            message.errors.push("payload is required".into());
            return Err(message.errors.clone());
        }

        let internal_id = message.id.clone().expect("validated above");
        let message_type = message.message_type.clone().expect("validated above");

        let mut record = self.ctx.records.lookup_record_by_internal_id(&internal_id);
        if record.is_none() {
            if let Some(baseline_id) = message.baseline_id {
                tracing::debug!(
                    baseline_id = %baseline_id,
                    "attempting to map outbound message to unmapped baseline record"
                );
                record = self.ctx.records.lookup_record(&baseline_id);
            }
        }

        let record = match record {
            Some(record) => record,
            None => {
                match self
                    .materialize_record(message, &internal_id, &message_type)
                    .await
                {
                    Ok(record) => record,
                    Err(error) => {
                        message.errors.push(error);
                        self.update_status_error(message, &internal_id, &message_type)
                            .await;
                        return Err(message.errors.clone());
                    }
                }
            }
        };

        message.baseline_id = record.baseline_id;
        let baseline_id = record.baseline_id.expect("cached record has baseline id");

        let workflow = match self.ctx.records.resolve_workflow(&baseline_id, None) {
            Some(workflow) => workflow,
            None => {
                message
                    .errors
                    .push(format!("failed to lookup workflow for baseline id: {baseline_id}"));
                self.update_status_error(message, &internal_id, &message_type)
                    .await;
                return Err(message.errors.clone());
            }
        };

        // witness over the raw payload bytes
        let payload = message.payload.clone().expect("validated above");
        let payload_bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                message.errors.push(format!("failed to serialize payload: {err}"));
                self.update_status_error(message, &internal_id, &message_type)
                    .await;
                return Err(message.errors.clone());
            }
        };
        let witness = DocumentWitness::compute(&payload_bytes);

        let mut protocol_message = ProtocolMessage {
            baseline_id: Some(baseline_id),
            opcode: Some(Opcode::Baseline),
            identifier: Some(workflow.id),
            sender: self.ctx.organization_address(),
            recipient: None,
            shield: workflow.shield.clone(),
            signature: None,
            message_type: Some(message_type.clone()),
            payload: Some(ProtocolMessagePayload {
                object: Some(payload),
                payload_type: Some(message_type.clone()),
                witness: Some(witness.to_value()),
                proof: None,
            }),
        };

        // prove against the current workstep
        if let Err(error) = self.prove(&workflow, &mut protocol_message).await {
            let error = format!(
                "failed to prove outbound baseline protocol message; invalid state transition; {error}"
            );
            tracing::warn!(baseline_id = %baseline_id, "{error}");
            message.errors.push(error);
            self.update_status_error(message, &internal_id, &message_type)
                .await;
            return Err(message.errors.clone());
        }

        // fan out one message per recipient, skipping self
        let recipients: Vec<Participant> = if message.recipients.is_empty() {
            workflow.participants.clone()
        } else {
            message.recipients.clone()
        };

        tracing::debug!(
            baseline_id = %baseline_id,
            recipients = recipients.len(),
            "dispatching outbound protocol message"
        );

        for recipient in &recipients {
            let Some(address) = recipient.address.as_deref() else {
                tracing::warn!("failed to dispatch protocol message to recipient; no recipient address");
                continue;
            };
            if let Err(err) = self.broadcast(&protocol_message, address) {
                let error =
                    format!("failed to dispatch protocol message to recipient: {address}; {err}");
                tracing::warn!("{error}");
                message.errors.push(error);
            }
        }

        if let Err(err) = self
            .ctx
            .sor
            .update_object_status(
                &internal_id,
                json!({
                    "baseline_id": baseline_id,
                    "message_id": message.message_id,
                    "status": BUSINESS_OBJECT_STATUS_SUCCESS,
                    "type": message_type,
                }),
            )
            .await
        {
            tracing::warn!(error = %err, "failed to update business object status");
        }

        Ok(protocol_message)
    }

    /// Create the context, workflow instance and record for a baseline
    /// thread this proxy has not seen before, and announce the workflow to
    /// every participant.
    async fn materialize_record(
        &self,
        message: &mut Message,
        internal_id: &str,
        message_type: &str,
    ) -> std::result::Result<BaselineRecord, String> {
        let (workflow, mut context, fresh_context) = match message.baseline_id {
            Some(baseline_id) => {
                let workflow = self
                    .ctx
                    .records
                    .lookup_workflow_by_baseline_id(&baseline_id)
                    .ok_or_else(|| {
                        format!("failed to lookup workflow for given baseline id: {baseline_id}")
                    })?;
                let context = self.ctx.records.lookup_context(&baseline_id).ok_or_else(|| {
                    format!("failed to lookup baseline context for given baseline id: {baseline_id}")
                })?;
                (workflow, context, false)
            }
            None => {
                let workflow = self
                    .ctx
                    .registry
                    .instantiate_workflow(message_type, None)
                    .await
                    .map_err(|err| err.to_string())?;

                self.ctx
                    .records
                    .cache_workflow(&workflow)
                    .map_err(|err| err.to_string())?;

                tracing::debug!(workflow_id = %workflow.id, "initializing new baseline context");
                let context = BaselineContext::new(None, Some(workflow.id));
                (workflow, context, true)
            }
        };

        // map internal record id -> baseline record
        let mut record = BaselineRecord {
            baseline_id: context.baseline_id,
            id: Some(internal_id.to_string()),
            context_id: Some(context.id),
            record_type: Some(message_type.to_string()),
        };

        self.ctx
            .records
            .cache_record(&mut record, Some(&mut context))
            .await
            .map_err(|err| err.to_string())?;

        let baseline_id = record.baseline_id.expect("cached record has baseline id");
        self.ctx
            .records
            .cache_workflow_for_baseline(&baseline_id, &workflow.id);

        // a fresh context: broadcast the workflow definition so each
        // participant can materialize the same prover set
        if fresh_context {
            self.sync_workflow(message, &workflow, &baseline_id);
        }

        Ok(record)
    }

    /// Broadcast `SYNC(workflow)` to every workflow participant
    fn sync_workflow(
        &self,
        message: &mut Message,
        workflow: &WorkflowInstance,
        baseline_id: &uuid::Uuid,
    ) {
        let mut sanitized = workflow.clone();
        for workstep in sanitized.worksteps.iter_mut() {
            workstep.prover = workstep.prover.as_ref().map(|p| p.sanitized());
            workstep.prover_id = None;
        }

        let sync = ProtocolMessage {
            baseline_id: Some(*baseline_id),
            opcode: Some(Opcode::Sync),
            identifier: Some(workflow.id),
            sender: self.ctx.organization_address(),
            recipient: None,
            shield: workflow.shield.clone(),
            signature: None,
            message_type: message.message_type.clone(),
            payload: Some(ProtocolMessagePayload {
                object: Some(json!({
                    "id": sanitized.id,
                    "participants": sanitized.participants,
                    "shield": sanitized.shield,
                    "worksteps": sanitized.worksteps,
                })),
                payload_type: Some(PAYLOAD_TYPE_WORKFLOW.to_string()),
                witness: None,
                proof: None,
            }),
        };

        for participant in &workflow.participants {
            let Some(address) = participant.address.as_deref() else {
                tracing::warn!("failed to dispatch protocol message to recipient; no recipient address");
                continue;
            };
            if let Err(err) = self.broadcast(&sync, address) {
                let error =
                    format!("failed to dispatch protocol message to recipient: {address}; {err}");
                tracing::warn!("{error}");
                message.errors.push(error);
            }
        }
    }

    /// Publish a protocol message addressed to one recipient, skipping a
    /// no-op broadcast to self.
    fn broadcast(
        &self,
        message: &ProtocolMessage,
        recipient: &str,
    ) -> std::result::Result<(), String> {
        if self.ctx.is_self(recipient) {
            tracing::debug!(recipient, "skipping no-op protocol message broadcast to self");
            return Ok(());
        }

        let addressed = message.for_recipient(recipient);
        let payload = serde_json::to_vec(&addressed).map_err(|err| err.to_string())?;

        tracing::debug!(bytes = payload.len(), recipient, "broadcasting protocol message");
        self.ctx
            .bus
            .publish(SUBJECT_PROTOCOL_MESSAGE_OUTBOUND, payload)
            .map_err(|err| err.to_string())
    }

    /// Attach a proof generated against the current workstep's prover
    async fn prove(
        &self,
        workflow: &WorkflowInstance,
        message: &mut ProtocolMessage,
    ) -> std::result::Result<(), String> {
        let token = self.ctx.tokens.vend().await.map_err(|err| err.to_string())?;

        let current = workflow
            .current_workstep()
            .ok_or_else(|| "workflow instance has no worksteps".to_string())?;
        let prover_id = current
            .prover_id
            .ok_or_else(|| "current workstep has no provisioned prover".to_string())?;

        let witness = message
            .payload
            .as_ref()
            .and_then(|p| p.witness.clone())
            .unwrap_or(serde_json::Value::Null);

        let response = self
            .ctx
            .privacy
            .prove(&token, &prover_id.to_string(), witness)
            .await
            .map_err(|err| err.to_string())?;

        if let Some(payload) = message.payload.as_mut() {
            payload.proof = Some(response.proof);
        }
        Ok(())
    }

    async fn update_status_error(&self, message: &Message, internal_id: &str, message_type: &str) {
        let mut status = json!({
            "errors": message.errors,
            "message_id": message.message_id,
            "status": BUSINESS_OBJECT_STATUS_ERROR,
            "type": message_type,
        });
        if let Some(baseline_id) = message.baseline_id {
            status["baseline_id"] = json!(baseline_id);
        }

        if let Err(err) = self.ctx.sor.update_object_status(internal_id, status).await {
            tracing::warn!(error = %err, "failed to update business object status");
        }
    }
}
