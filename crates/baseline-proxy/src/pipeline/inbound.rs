//! Inbound protocol message pipeline
//!
//! Consumes `baseline.inbound` and dispatches by opcode:
//!
//! - `BASELINE`: resolve-or-create the context, workflow instance and
//!   record for the thread, verify the attached proof against the current
//!   workstep, then create or update the business object in the system of
//!   record
//! - `SYNC`: provision a prover, or materialize and cache a counterparty's
//!   workflow instance
//! - `JOIN`: reserved
//!
//! Transient failures (proof rejection, system-of-record errors) nak so
//! the message is redelivered up to the max-deliveries bound; malformed
//! messages and unknown opcodes terminate.

use crate::context::ProxyContext;
use async_trait::async_trait;
use baseline_bus::{Delivery, Disposition, MessageHandler};
use baseline_clients::object_id;
use baseline_types::{
    BaselineContext, BaselineRecord, Opcode, ProtocolMessage, WorkflowInstance,
    PAYLOAD_TYPE_CIRCUIT, PAYLOAD_TYPE_WORKFLOW,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

pub struct InboundPipeline {
    ctx: Arc<ProxyContext>,
}

impl InboundPipeline {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        Self { ctx }
    }

    async fn baseline_inbound(&self, message: &ProtocolMessage) -> Disposition {
        let Some(baseline_id) = message.baseline_id else {
            tracing::warn!("inbound BASELINE message specified no baseline id");
            return Disposition::Term;
        };
        let Some(message_type) = message.message_type.as_deref() else {
            tracing::warn!(baseline_id = %baseline_id, "inbound BASELINE message specified no type");
            return Disposition::Term;
        };
        let Some(payload) = message.payload.as_ref() else {
            tracing::warn!(baseline_id = %baseline_id, "inbound BASELINE message carried no payload");
            return Disposition::Term;
        };
        let (Some(witness), Some(proof)) = (payload.witness.clone(), payload.proof.clone()) else {
            tracing::warn!(baseline_id = %baseline_id, "inbound BASELINE message missing witness or proof");
            return Disposition::Term;
        };

        // the record mutex is held across resolution, verification and the
        // system-of-record call so a redelivery cannot create a duplicate
        // business object
        let _guard = self.ctx.records.lock_record(&baseline_id).await;

        let mut record = self.ctx.records.lookup_record(&baseline_id);

        let workflow = match self
            .resolve_or_materialize_workflow(&baseline_id, message.identifier, message_type)
            .await
        {
            Some(workflow) => workflow,
            None => return Disposition::Nak,
        };

        if record.is_none() {
            let mut context = self
                .ctx
                .records
                .lookup_context(&baseline_id)
                .unwrap_or_else(|| BaselineContext::new(Some(baseline_id), Some(workflow.id)));
            context.workflow_id.get_or_insert(workflow.id);

            let mut created = BaselineRecord {
                baseline_id: Some(baseline_id),
                id: None,
                context_id: Some(context.id),
                record_type: Some(message_type.to_string()),
            };

            if let Err(err) = self
                .ctx
                .records
                .cache_record_locked(&mut created, Some(&mut context))
            {
                tracing::warn!(baseline_id = %baseline_id, error = %err, "failed to cache baseline record");
                return Disposition::Nak;
            }

            tracing::debug!(
                baseline_id = %baseline_id,
                workflow_id = %workflow.id,
                message_type,
                "inbound protocol message initialized baseline record"
            );
            record = Some(created);
        }

        let Some(mut record) = record else {
            return Disposition::Nak;
        };

        // verify against the current workstep's prover
        let token = match self.ctx.tokens.vend().await {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "failed to vend organization access token");
                return Disposition::Nak;
            }
        };

        let Some(current) = workflow.current_workstep() else {
            tracing::warn!(workflow_id = %workflow.id, "workflow instance has no worksteps to verify against");
            return Disposition::Nak;
        };
        let Some(prover_id) = current.prover_id else {
            tracing::warn!(workstep_id = %current.id, "current workstep has no provisioned prover");
            return Disposition::Nak;
        };

        match self
            .ctx
            .privacy
            .verify(&token, &prover_id.to_string(), true, proof, witness)
            .await
        {
            Ok(response) if response.result => {}
            Ok(_) => {
                tracing::warn!(
                    baseline_id = %baseline_id,
                    prover_id = %prover_id,
                    "failed to verify inbound protocol message; invalid state transition"
                );
                return Disposition::Nak;
            }
            Err(err) => {
                tracing::warn!(baseline_id = %baseline_id, error = %err, "failed to verify inbound protocol message");
                return Disposition::Nak;
            }
        }

        // apply to the system of record
        let object = payload.object.clone().unwrap_or(serde_json::Value::Null);
        if record.id.is_none() {
            let response = match self
                .ctx
                .sor
                .create_object(json!({
                    "baseline_id": baseline_id,
                    "payload": object,
                    "type": message_type,
                }))
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(baseline_id = %baseline_id, error = %err, "failed to create business object during inbound baseline");
                    return Disposition::Nak;
                }
            };

            let internal_id = match object_id(&response) {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(baseline_id = %baseline_id, error = %err, "failed to create business object during inbound baseline");
                    return Disposition::Nak;
                }
            };

            if let Err(err) = record.set_internal_id(internal_id) {
                tracing::warn!(baseline_id = %baseline_id, error = %err, "refusing to remap baseline record internal id");
                return Disposition::Nak;
            }
            let mut context = self.ctx.records.lookup_context(&baseline_id);
            if let Err(err) = self
                .ctx
                .records
                .cache_record_locked(&mut record, context.as_mut())
            {
                tracing::warn!(baseline_id = %baseline_id, error = %err, "failed to cache baseline record");
                return Disposition::Nak;
            }
        } else if let Err(err) = self
            .ctx
            .sor
            .update_object(record.id.as_deref().unwrap_or_default(), object)
            .await
        {
            tracing::warn!(baseline_id = %baseline_id, error = %err, "failed to update business object during inbound baseline");
            return Disposition::Nak;
        }

        Disposition::Ack
    }

    /// Resolve the workflow instance for a baseline thread, materializing
    /// one from the prototype serving the mapping type when no instance is
    /// cached yet.
    async fn resolve_or_materialize_workflow(
        &self,
        baseline_id: &Uuid,
        identifier: Option<Uuid>,
        message_type: &str,
    ) -> Option<WorkflowInstance> {
        if let Some(workflow) = self
            .ctx
            .records
            .resolve_workflow(baseline_id, identifier.as_ref())
        {
            return Some(workflow);
        }

        tracing::debug!(baseline_id = %baseline_id, message_type, "initializing baseline workflow");
        let instance = match self
            .ctx
            .registry
            .instantiate_workflow(message_type, identifier)
            .await
        {
            Ok(instance) => instance,
            Err(err) => {
                tracing::warn!(
                    baseline_id = %baseline_id,
                    message_type,
                    error = %err,
                    "failed to initialize baseline workflow"
                );
                return None;
            }
        };

        if let Err(err) = self.ctx.records.cache_workflow(&instance) {
            tracing::warn!(error = %err, "failed to cache workflow instance");
            return None;
        }
        self.ctx
            .records
            .cache_workflow_for_baseline(baseline_id, &instance.id);
        Some(instance)
    }

    async fn sync_inbound(&self, message: &ProtocolMessage) -> Disposition {
        let Some(payload) = message.payload.as_ref() else {
            tracing::warn!("inbound SYNC message carried no payload");
            return Disposition::Term;
        };

        match payload.payload_type.as_deref() {
            Some(PAYLOAD_TYPE_CIRCUIT) => {
                let Some(object) = payload.object.clone() else {
                    tracing::warn!("inbound SYNC circuit message carried no object");
                    return Disposition::Term;
                };

                let token = match self.ctx.tokens.vend().await {
                    Ok(token) => token,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to vend organization access token");
                        return Disposition::Nak;
                    }
                };

                match self.ctx.privacy.create_prover(&token, object).await {
                    Ok(prover) => {
                        tracing::debug!(prover_id = ?prover.id, "sync protocol message created prover");
                        Disposition::Ack
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to handle inbound sync protocol message; failed to create prover");
                        Disposition::Nak
                    }
                }
            }

            Some(PAYLOAD_TYPE_WORKFLOW) => {
                let Some(object) = payload.object.clone() else {
                    tracing::warn!("inbound SYNC workflow message carried no object");
                    return Disposition::Term;
                };
                let mut workflow: WorkflowInstance = match serde_json::from_value(object) {
                    Ok(workflow) => workflow,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to unmarshal workflow from sync protocol message");
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

                for workstep in workflow.worksteps.iter_mut() {
                    let params = match &workstep.prover {
                        Some(prover) => match serde_json::to_value(prover.sanitized()) {
                            Ok(params) => params,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to marshal prover params from sync protocol message");
                                return Disposition::Term;
                            }
                        },
                        None => json!({}),
                    };

                    match self.ctx.privacy.create_prover(&token, params).await {
                        Ok(prover) => {
                            tracing::debug!(prover_id = ?prover.id, "sync protocol message created prover");
                            workstep.prover_id = prover.id;
                            workstep.prover = Some(prover);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to handle inbound sync protocol message; failed to create prover");
                            return Disposition::Nak;
                        }
                    }
                }

                if let Err(err) = self.ctx.records.cache_workflow(&workflow) {
                    tracing::warn!(error = %err, "failed to cache workflow from sync protocol message");
                    return Disposition::Nak;
                }
                if let Some(baseline_id) = message.baseline_id {
                    self.ctx
                        .records
                        .cache_workflow_for_baseline(&baseline_id, &workflow.id);
                }

                tracing::debug!(
                    workflow_id = %workflow.id,
                    worksteps = workflow.worksteps.len(),
                    "cached workflow from sync protocol message"
                );
                Disposition::Ack
            }

            other => {
                // treated as a no-op
                tracing::warn!(payload_type = ?other, "inbound SYNC message specified unknown payload type");
                Disposition::Ack
            }
        }
    }
}

#[async_trait]
impl MessageHandler for InboundPipeline {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        tracing::debug!(
            bytes = delivery.payload.len(),
            subject = %delivery.subject,
            "consuming inbound protocol message"
        );

        let message: ProtocolMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "failed to unmarshal inbound protocol message");
                return Disposition::Term;
            }
        };

        let Some(opcode) = message.opcode else {
            tracing::warn!("inbound protocol message specified no opcode");
            return Disposition::Term;
        };

        match opcode {
            Opcode::Baseline => self.baseline_inbound(&message).await,
            Opcode::Sync => self.sync_inbound(&message).await,
            Opcode::Join => {
                // reserved: will add the sender as a workgroup counterparty,
                // store its bearer token and sync the local prover set
                tracing::warn!("JOIN opcode not yet implemented");
                Disposition::Ack
            }
        }
    }
}
