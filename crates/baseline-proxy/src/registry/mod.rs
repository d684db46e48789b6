//! Workflow registry
//!
//! Persistence and lookup of workgroups, workflow prototypes, worksteps and
//! mappings, plus the deployment machinery: deploying a prototype fans out
//! per-workstep deploy messages, each workstep provisions a prover with the
//! privacy service, and the workflow is finalized once every workstep
//! reports deployed.

mod memory;
mod postgres;
mod storage;

pub use memory::InMemoryRegistryStorage;
pub use postgres::PostgresRegistryStorage;
pub use storage::{RegistryStorage, WorkflowFilter, WorkflowVersion};

use crate::error::Result;
use baseline_bus::{subject, MessageBus};
use baseline_clients::PrivacyClient;
use baseline_types::{
    workflow::{assert_contiguous_cardinalities, prover_params_factory},
    DomainError, Mapping, Participant, ProtocolMessagePayload, Workflow, WorkflowInstance,
    WorkflowStatus, Workgroup, Workstep, WorkstepStatus,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Mutable workflow attributes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub status: Option<WorkflowStatus>,
}

/// Mutable workstep attributes; status is immutable via this path
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkstepPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub cardinality: Option<i32>,
    pub require_finalized_deploy: Option<bool>,
    pub status: Option<WorkstepStatus>,
}

pub struct WorkflowRegistry {
    storage: Arc<dyn RegistryStorage>,
    bus: MessageBus,
    privacy: Arc<dyn PrivacyClient>,
}

impl WorkflowRegistry {
    pub fn new(
        storage: Arc<dyn RegistryStorage>,
        bus: MessageBus,
        privacy: Arc<dyn PrivacyClient>,
    ) -> Self {
        Self {
            storage,
            bus,
            privacy,
        }
    }

    // ── Workgroups ───────────────────────────────────────────────────

    pub async fn create_workgroup(&self, workgroup: Workgroup) -> Result<Workgroup> {
        workgroup.validate()?;
        self.storage.upsert_workgroup(workgroup.clone()).await?;
        tracing::info!(workgroup_id = %workgroup.id, "created workgroup");
        Ok(workgroup)
    }

    pub async fn get_workgroup(&self, id: &Uuid) -> Result<Option<Workgroup>> {
        self.storage.get_workgroup(id).await
    }

    pub async fn list_workgroups(&self) -> Result<Vec<Workgroup>> {
        self.storage.list_workgroups().await
    }

    pub async fn add_workgroup_participant(
        &self,
        workgroup_id: &Uuid,
        participant: Participant,
    ) -> Result<Workgroup> {
        let mut workgroup = self
            .storage
            .get_workgroup(workgroup_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("workgroup not found: {workgroup_id}")))?;

        let address = participant.address.clone().unwrap_or_default();
        workgroup.add_participant(participant)?;
        self.storage.upsert_workgroup(workgroup.clone()).await?;
        tracing::info!(workgroup_id = %workgroup_id, participant = %address, "added workgroup participant");
        Ok(workgroup)
    }

    // ── Workflow prototypes ──────────────────────────────────────────

    pub async fn create_workflow(&self, mut workflow: Workflow) -> Result<Workflow> {
        workflow.workflow_id = None;
        workflow.status = WorkflowStatus::Draft;
        workflow.deployed_at = None;
        workflow.validate()?;

        self.storage.insert_workflow(workflow.clone()).await?;
        self.storage
            .insert_workflow_version(WorkflowVersion {
                id: Uuid::new_v4(),
                root_workflow_id: workflow.id,
                workflow_id: workflow.id,
                version: workflow.version.clone(),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(workflow_id = %workflow.id, "created workflow prototype");
        Ok(workflow)
    }

    pub async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>> {
        self.storage.get_workflow(id).await
    }

    pub async fn list_workflows(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>> {
        self.storage.list_workflows(filter).await
    }

    pub async fn update_workflow(&self, id: &Uuid, patch: WorkflowPatch) -> Result<Workflow> {
        let mut workflow = self.require_workflow(id).await?;

        if let Some(status) = patch.status {
            if status != workflow.status {
                if !workflow.status.can_transition_to(status) {
                    return Err(DomainError::StateConflict(format!(
                        "workflow status cannot move from {:?} to {:?}",
                        workflow.status, status
                    ))
                    .into());
                }
                if matches!(
                    status,
                    WorkflowStatus::Deployed | WorkflowStatus::PendingDeployment
                ) {
                    return Err(DomainError::StateConflict(
                        "workflows are deployed via the deploy operation".into(),
                    )
                    .into());
                }
                workflow.status = status;
            }
        }

        if let Some(name) = patch.name {
            workflow.name = Some(name);
        }
        if let Some(description) = patch.description {
            workflow.description = Some(description);
        }
        if let Some(version) = patch.version {
            workflow.version = Some(version);
        }

        self.storage.update_workflow(workflow.clone()).await?;
        Ok(workflow)
    }

    /// Clone a non-draft prototype as a new draft with the given version,
    /// carrying its worksteps.
    pub async fn version_workflow(
        &self,
        id: &Uuid,
        version: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Workflow> {
        let workflow = self.require_workflow(id).await?;
        let mut clone = workflow.clone_as_version(version)?;

        if let Some(name) = name {
            clone.name = Some(name);
        }
        if let Some(description) = description {
            clone.description = Some(description);
        }

        self.storage.insert_workflow(clone.clone()).await?;

        let worksteps = self.storage.list_worksteps(id).await?;
        for workstep in worksteps {
            let mut cloned_step = workstep.clone();
            cloned_step.id = Uuid::new_v4();
            cloned_step.workflow_id = clone.id;
            cloned_step.status = WorkstepStatus::Draft;
            cloned_step.prover_id = None;
            cloned_step.prover = None;
            cloned_step.created_at = Utc::now();
            self.storage.insert_workstep(cloned_step).await?;
        }

        let root = self
            .storage
            .find_workflow_version_root(id)
            .await?
            .unwrap_or(*id);
        self.storage
            .insert_workflow_version(WorkflowVersion {
                id: Uuid::new_v4(),
                root_workflow_id: root,
                workflow_id: clone.id,
                version: Some(version.to_string()),
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(workflow_id = %id, version, clone_id = %clone.id, "versioned workflow prototype");
        Ok(clone)
    }

    pub async fn list_workflow_versions(&self, id: &Uuid) -> Result<Vec<WorkflowVersion>> {
        let root = self
            .storage
            .find_workflow_version_root(id)
            .await?
            .unwrap_or(*id);
        self.storage.list_workflow_versions(&root).await
    }

    /// Move a draft prototype into `pending_deployment` and fan out deploy
    /// messages for each of its worksteps plus a workflow finalize message.
    pub async fn deploy_workflow(&self, id: &Uuid) -> Result<Workflow> {
        let mut workflow = self.require_workflow(id).await?;

        if !workflow.is_prototype() {
            return Err(
                DomainError::StateConflict("cannot deploy a workflow instance".into()).into(),
            );
        }
        if workflow.status != WorkflowStatus::Draft {
            return Err(DomainError::StateConflict(
                "only draft workflow prototypes can be deployed".into(),
            )
            .into());
        }

        let worksteps = self.storage.list_worksteps(id).await?;
        if worksteps.is_empty() {
            return Err(DomainError::Validation(
                "workflow prototype requires at least one workstep".into(),
            )
            .into());
        }
        assert_contiguous_cardinalities(&worksteps)?;

        workflow.status = WorkflowStatus::PendingDeployment;
        self.storage.update_workflow(workflow.clone()).await?;

        for workstep in &worksteps {
            self.publish(
                subject::SUBJECT_WORKSTEP_DEPLOY,
                json!({ "workstep_id": workstep.id }),
            )?;
        }
        self.publish(
            subject::SUBJECT_WORKFLOW_DEPLOY,
            json!({ "workflow_id": workflow.id }),
        )?;

        tracing::info!(workflow_id = %id, worksteps = worksteps.len(), "workflow pending deployment");
        Ok(workflow)
    }

    pub async fn delete_workflow(&self, id: &Uuid) -> Result<()> {
        let workflow = self.require_workflow(id).await?;
        if workflow.status != WorkflowStatus::Draft {
            return Err(DomainError::StateConflict(
                "only draft workflow prototypes can be deleted".into(),
            )
            .into());
        }

        self.storage.delete_workflow(id).await?;
        tracing::info!(workflow_id = %id, "deleted workflow prototype");
        Ok(())
    }

    // ── Worksteps ────────────────────────────────────────────────────

    pub async fn get_workstep(&self, id: &Uuid) -> Result<Option<Workstep>> {
        self.storage.get_workstep(id).await
    }

    pub async fn list_worksteps(&self, workflow_id: &Uuid) -> Result<Vec<Workstep>> {
        self.storage.list_worksteps(workflow_id).await
    }

    /// Append a workstep to a draft prototype at the next cardinality
    pub async fn add_workstep(&self, workflow_id: &Uuid, mut workstep: Workstep) -> Result<Workstep> {
        let workflow = self.require_workflow(workflow_id).await?;

        if !workflow.is_prototype() {
            return Err(DomainError::StateConflict(
                "cannot add workstep to workflow instance".into(),
            )
            .into());
        }
        if workflow.status != WorkflowStatus::Draft {
            return Err(DomainError::StateConflict(
                "cannot add worksteps to non-draft workflow prototype".into(),
            )
            .into());
        }

        let existing = self.storage.list_worksteps(workflow_id).await?;
        let next_cardinality = existing.len() as i32 + 1;

        workstep.workflow_id = *workflow_id;
        workstep.workstep_id = None;
        workstep.status = WorkstepStatus::Draft;
        workstep.prover_id = None;

        if workstep.cardinality <= 0 {
            workstep.cardinality = next_cardinality;
        } else if existing.iter().any(|w| w.cardinality == workstep.cardinality) {
            return Err(DomainError::StateConflict(format!(
                "cardinality already in use: {}",
                workstep.cardinality
            ))
            .into());
        } else if workstep.cardinality != next_cardinality {
            return Err(DomainError::Validation(format!(
                "workstep cardinality must be the next position: {next_cardinality}"
            ))
            .into());
        }
        workstep.validate()?;

        self.storage.insert_workstep(workstep.clone()).await?;
        tracing::info!(workflow_id = %workflow_id, workstep_id = %workstep.id, cardinality = workstep.cardinality, "created workstep");
        Ok(workstep)
    }

    pub async fn update_workstep(
        &self,
        workflow_id: &Uuid,
        workstep_id: &Uuid,
        patch: WorkstepPatch,
    ) -> Result<Workstep> {
        let workflow = self.require_workflow(workflow_id).await?;
        let mut workstep = self.require_workstep(workstep_id).await?;

        if workstep.workflow_id != *workflow_id {
            return Err(DomainError::NotFound(format!(
                "workstep does not belong to workflow: {workstep_id}"
            ))
            .into());
        }
        if workflow.status != WorkflowStatus::Draft {
            return Err(DomainError::StateConflict(
                "cannot update worksteps of a non-draft workflow prototype".into(),
            )
            .into());
        }
        if let Some(status) = patch.status {
            if status != workstep.status {
                return Err(
                    DomainError::StateConflict("cannot modify workstep status".into()).into(),
                );
            }
        }

        if let Some(cardinality) = patch.cardinality {
            if cardinality != workstep.cardinality {
                let siblings = self.storage.list_worksteps(workflow_id).await?;
                if siblings
                    .iter()
                    .any(|w| w.id != workstep.id && w.cardinality == cardinality)
                {
                    return Err(DomainError::StateConflict(format!(
                        "cardinality already in use: {cardinality}"
                    ))
                    .into());
                }
                if cardinality < 1 || cardinality > siblings.len() as i32 {
                    return Err(DomainError::Validation(format!(
                        "cardinality out of range: {cardinality}"
                    ))
                    .into());
                }
                workstep.cardinality = cardinality;
            }
        }

        if let Some(name) = patch.name {
            workstep.name = Some(name);
        }
        if let Some(description) = patch.description {
            workstep.description = Some(description);
        }
        if let Some(require_finalized_deploy) = patch.require_finalized_deploy {
            workstep.require_finalized_deploy = require_finalized_deploy;
        }

        self.storage.update_workstep(workstep.clone()).await?;
        Ok(workstep)
    }

    /// Delete a workstep from a draft prototype, re-sequencing the
    /// remaining cardinalities to keep the `1..n` invariant.
    pub async fn delete_workstep(&self, workflow_id: &Uuid, workstep_id: &Uuid) -> Result<()> {
        let workflow = self.require_workflow(workflow_id).await?;
        let workstep = self.require_workstep(workstep_id).await?;

        if workstep.workflow_id != *workflow_id {
            return Err(DomainError::NotFound(format!(
                "workstep does not belong to workflow: {workstep_id}"
            ))
            .into());
        }
        if workflow.status != WorkflowStatus::Draft {
            return Err(DomainError::StateConflict(
                "cannot delete worksteps of a non-draft workflow prototype".into(),
            )
            .into());
        }

        let mut remaining = self.storage.list_worksteps(workflow_id).await?;
        remaining.retain(|w| w.id != *workstep_id);
        remaining.sort_by_key(|w| w.cardinality);
        for (i, sibling) in remaining.iter_mut().enumerate() {
            sibling.cardinality = i as i32 + 1;
        }

        self.storage
            .replace_worksteps(workflow_id, remaining)
            .await?;
        tracing::info!(workflow_id = %workflow_id, workstep_id = %workstep_id, "deleted workstep");
        Ok(())
    }

    /// Generate a proof for a workstep; permitted while the workstep is
    /// `init` or `running`.
    pub async fn execute_workstep(
        &self,
        token: &str,
        workflow_id: &Uuid,
        workstep_id: &Uuid,
        payload: &ProtocolMessagePayload,
    ) -> Result<Value> {
        let mut workstep = self.require_workstep(workstep_id).await?;

        if workstep.workflow_id != *workflow_id {
            return Err(DomainError::NotFound(format!(
                "workstep does not belong to workflow: {workstep_id}"
            ))
            .into());
        }
        if !matches!(
            workstep.status,
            WorkstepStatus::Init | WorkstepStatus::Running
        ) {
            return Err(DomainError::StateConflict(format!(
                "cannot execute workstep in status {:?}",
                workstep.status
            ))
            .into());
        }

        let prover_id = workstep.prover_id.ok_or_else(|| {
            DomainError::StateConflict("workstep has no provisioned prover".into())
        })?;

        let witness = payload.witness.clone().unwrap_or(Value::Null);
        let response = self
            .privacy
            .prove(token, &prover_id.to_string(), witness)
            .await?;

        if workstep.status == WorkstepStatus::Init {
            workstep.status = WorkstepStatus::Running;
            self.storage.update_workstep(workstep).await?;
        }

        Ok(response.proof)
    }

    // ── Deployment machinery ─────────────────────────────────────────

    /// Provision a prover for a workstep and move it to
    /// `pending_deployment`. Idempotent across redeliveries.
    pub async fn deploy_workstep(&self, token: &str, workstep_id: &Uuid) -> Result<bool> {
        let mut workstep = self.require_workstep(workstep_id).await?;

        match workstep.status {
            WorkstepStatus::Deployed => return Ok(true),
            WorkstepStatus::PendingDeployment => return Ok(true),
            WorkstepStatus::Draft => {}
            _ => {
                return Err(DomainError::StateConflict(format!(
                    "cannot deploy workstep in status {:?}",
                    workstep.status
                ))
                .into())
            }
        }

        let name = workstep
            .name
            .clone()
            .unwrap_or_else(|| format!("workstep {}", workstep.cardinality));
        let params = prover_params_factory(&name, &workstep.id.to_string(), None);

        let prover = self.privacy.create_prover(token, params).await?;
        // tolerate duplicate provisioning by recording only the first id
        if workstep.prover_id.is_none() {
            workstep.prover_id = prover.id;
        }
        workstep.prover = Some(prover);
        workstep.status = WorkstepStatus::PendingDeployment;
        self.storage.update_workstep(workstep.clone()).await?;

        self.publish(
            subject::SUBJECT_WORKSTEP_FINALIZE_DEPLOY,
            json!({ "workstep_id": workstep.id }),
        )?;

        tracing::debug!(workstep_id = %workstep_id, prover_id = ?workstep.prover_id, "workstep pending deployment");
        Ok(true)
    }

    /// Finalize a pending workstep deployment once the external prover has
    /// compiled; returns `false` while compilation is still outstanding.
    pub async fn finalize_workstep_deploy(&self, token: &str, workstep_id: &Uuid) -> Result<bool> {
        let mut workstep = self.require_workstep(workstep_id).await?;

        match workstep.status {
            WorkstepStatus::Deployed => return Ok(true),
            WorkstepStatus::PendingDeployment => {}
            _ => return Ok(false),
        }

        let Some(prover_id) = workstep.prover_id else {
            return Ok(false);
        };

        if workstep.require_finalized_deploy {
            match self
                .privacy
                .fetch_prover(token, &prover_id.to_string())
                .await
            {
                Ok(prover) => {
                    let provisioned = prover
                        .status
                        .as_deref()
                        .map(|s| s == "provisioned")
                        .unwrap_or(false)
                        || prover.artifacts.is_some();
                    if !provisioned {
                        return Ok(false);
                    }
                    workstep.prover = Some(prover);
                }
                Err(err) => {
                    // compilation failed; reset so the workstep can be
                    // redeployed, and surface the error
                    tracing::warn!(workstep_id = %workstep_id, error = %err, "prover compilation failed; resetting workstep to draft");
                    workstep.status = WorkstepStatus::Draft;
                    workstep.prover_id = None;
                    workstep.prover = None;
                    self.storage.update_workstep(workstep).await?;
                    return Ok(false);
                }
            }
        }

        workstep.status = WorkstepStatus::Deployed;
        self.storage.update_workstep(workstep).await?;
        tracing::debug!(workstep_id = %workstep_id, "deployed workstep");
        Ok(true)
    }

    /// Finalize a workflow deployment once every workstep is deployed;
    /// returns `false` while any workstep is still pending.
    pub async fn finalize_workflow_deploy(&self, workflow_id: &Uuid) -> Result<bool> {
        let mut workflow = self.require_workflow(workflow_id).await?;
        if workflow.status == WorkflowStatus::Deployed {
            return Ok(true);
        }

        let worksteps = self.storage.list_worksteps(workflow_id).await?;
        for workstep in &worksteps {
            if workstep.status != WorkstepStatus::Deployed {
                tracing::debug!(
                    workflow_id = %workflow_id,
                    workstep_id = %workstep.id,
                    "waiting on workstep for pending workflow deployment"
                );
                return Ok(false);
            }
        }

        workflow.status = WorkflowStatus::Deployed;
        workflow.deployed_at = Some(Utc::now());
        self.storage.update_workflow(workflow).await?;
        tracing::info!(workflow_id = %workflow_id, "deployed workflow");
        Ok(true)
    }

    // ── Instance derivation ──────────────────────────────────────────

    /// Materialize a workflow instance from the deployed prototype serving
    /// the given mapping type.
    pub async fn instantiate_workflow(
        &self,
        mapping_type: &str,
        identifier: Option<Uuid>,
    ) -> Result<WorkflowInstance> {
        let prototype = self
            .resolve_prototype_for_type(mapping_type)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!(
                    "no deployed workflow prototype for mapping type: {mapping_type}"
                ))
            })?;

        let worksteps = self.storage.list_worksteps(&prototype.id).await?;
        let instance = WorkflowInstance::from_prototype(&prototype, &worksteps, identifier)?;
        tracing::debug!(
            workflow_id = %prototype.id,
            instance_id = %instance.id,
            mapping_type,
            "materialized workflow instance"
        );
        Ok(instance)
    }

    /// Find the deployed prototype for a mapping type: through the
    /// workgroups of mappings with that type, falling back to prototypes
    /// named after the type.
    pub async fn resolve_prototype_for_type(&self, mapping_type: &str) -> Result<Option<Workflow>> {
        let mut candidates: Vec<Workflow> = Vec::new();

        for mapping in self.storage.list_mappings_by_type(mapping_type).await? {
            let Some(workgroup_id) = mapping.workgroup_id else {
                continue;
            };
            let workflows = self
                .storage
                .list_workflows(WorkflowFilter {
                    workgroup_id: Some(workgroup_id),
                    prototypes_only: true,
                    ..Default::default()
                })
                .await?;
            candidates.extend(
                workflows
                    .into_iter()
                    .filter(|w| w.status == WorkflowStatus::Deployed),
            );
        }

        if candidates.is_empty() {
            let workflows = self
                .storage
                .list_workflows(WorkflowFilter {
                    prototypes_only: true,
                    ..Default::default()
                })
                .await?;
            candidates.extend(workflows.into_iter().filter(|w| {
                w.status == WorkflowStatus::Deployed && w.name.as_deref() == Some(mapping_type)
            }));
        }

        candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(candidates.into_iter().next())
    }

    // ── Mappings ─────────────────────────────────────────────────────

    pub async fn create_mapping(&self, mut mapping: Mapping) -> Result<Mapping> {
        mapping.validate()?;
        mapping.enrich_ref()?;
        restamp_mapping_ownership(&mut mapping);

        self.storage.insert_mapping(mapping.clone()).await?;
        tracing::info!(mapping_id = %mapping.id, mapping_type = ?mapping.mapping_type, "created mapping");
        Ok(mapping)
    }

    pub async fn get_mapping(&self, id: &Uuid) -> Result<Option<Mapping>> {
        self.storage.get_mapping(id).await
    }

    pub async fn list_mappings(
        &self,
        organization_id: Option<Uuid>,
        workgroup_id: Option<Uuid>,
    ) -> Result<Vec<Mapping>> {
        self.storage.list_mappings(organization_id, workgroup_id).await
    }

    /// Wholesale update: name, description and type are taken from the
    /// patch, the ref is recomputed, and all prior models and fields are
    /// replaced atomically.
    pub async fn update_mapping(&self, id: &Uuid, patch: Mapping) -> Result<Mapping> {
        let mut mapping = self
            .storage
            .get_mapping(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("mapping not found: {id}")))?;

        patch.validate()?;

        mapping.name = patch.name;
        mapping.description = patch.description;
        mapping.mapping_type = patch.mapping_type;
        mapping.version = patch.version;
        mapping.models = patch.models;
        mapping.enrich_ref()?;
        restamp_mapping_ownership(&mut mapping);

        self.storage.replace_mapping(mapping.clone()).await?;
        tracing::info!(mapping_id = %id, "updated mapping");
        Ok(mapping)
    }

    pub async fn delete_mapping(&self, id: &Uuid) -> Result<()> {
        if !self.storage.delete_mapping(id).await? {
            return Err(DomainError::NotFound(format!("mapping not found: {id}")).into());
        }
        tracing::info!(mapping_id = %id, "deleted mapping");
        Ok(())
    }

    // ── Internal helpers ─────────────────────────────────────────────

    async fn require_workflow(&self, id: &Uuid) -> Result<Workflow> {
        self.storage
            .get_workflow(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("workflow not found: {id}")).into())
    }

    async fn require_workstep(&self, id: &Uuid) -> Result<Workstep> {
        self.storage
            .get_workstep(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("workstep not found: {id}")).into())
    }

    fn publish(&self, subject: &str, payload: Value) -> Result<()> {
        self.bus
            .publish(subject, payload.to_string().into_bytes())
            .map_err(|err| crate::error::ProxyError::Server(err.to_string()))
    }
}

/// Stamp model and field foreign keys after deserializing client input
fn restamp_mapping_ownership(mapping: &mut Mapping) {
    for model in &mut mapping.models {
        model.mapping_id = mapping.id;
        for field in &mut model.fields {
            field.mapping_model_id = model.id;
        }
    }
}
