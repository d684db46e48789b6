//! Workflows, worksteps and their prover material
//!
//! A workflow prototype is a versioned template of a sequenced business
//! process; deploying it provisions a zk prover per workstep. A workflow
//! instance is a running occurrence of a prototype, created on the first
//! message touching a baseline thread. Prototypes and instances share one
//! entity; an instance is distinguished by its non-null parent pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{DomainError, Result};
use crate::participant::Participant;

/// Workflow lifecycle states
///
/// Prototypes move `draft → pending_deployment → deployed → deprecated`
/// with no reverse transitions; instances move `init → running → completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    PendingDeployment,
    Deployed,
    Deprecated,
    Init,
    Running,
    Completed,
}

impl WorkflowStatus {
    /// Whether `next` is a legal successor of `self` for a prototype
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Draft, PendingDeployment)
                | (Draft, Deployed)
                | (PendingDeployment, Deployed)
                | (Deployed, Deprecated)
                | (Init, Running)
                | (Running, Completed)
        )
    }
}

/// Workstep lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkstepStatus {
    Draft,
    PendingDeployment,
    Deployed,
    Init,
    Running,
    Completed,
}

/// Circuit material bound to a workstep at first deploy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prover {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proving_scheme: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Prover {
    /// Copy carrying only the parameters a counterparty needs to compile
    /// the same circuit; identifiers and status are local concerns.
    pub fn sanitized(&self) -> Prover {
        Prover {
            id: None,
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            provider: self.provider.clone(),
            proving_scheme: self.proving_scheme.clone(),
            curve: self.curve.clone(),
            artifacts: self.artifacts.clone(),
            status: None,
        }
    }
}

/// Parameters submitted to the privacy service when provisioning a prover
pub fn prover_params_factory(name: &str, identifier: &str, store_id: Option<&str>) -> Value {
    let mut params = json!({
        "curve": "BN256",
        "identifier": identifier,
        "name": name,
        "provider": "gnark",
        "proving_scheme": "groth16",
    });

    if let Some(store_id) = store_id {
        params["store_id"] = json!(store_id);
    }

    params
}

/// A workflow prototype or instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup_id: Option<Uuid>,

    /// Parent prototype; set only on instances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,

    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub status: WorkflowStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<Participant>,

    /// Shield contract address anchoring commitments for this workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shield: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, workgroup_id: Option<Uuid>, version: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workgroup_id,
            workflow_id: None,
            name: Some(name.into()),
            description: None,
            version,
            status: WorkflowStatus::Draft,
            participants: Vec::new(),
            shield: None,
            deployed_at: None,
            created_at: Utc::now(),
        }
    }

    /// A prototype has no parent
    pub fn is_prototype(&self) -> bool {
        self.workflow_id.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(DomainError::Validation("name is required".into()));
        }
        if self.is_prototype() && self.participants.is_empty() {
            return Err(DomainError::Validation(
                "workflow prototype requires at least one participant".into(),
            ));
        }
        Ok(())
    }

    /// Clone this prototype as a new draft with the given version
    ///
    /// Worksteps are cloned separately by the registry; the new prototype
    /// keeps the participant list and drops deployment state.
    pub fn clone_as_version(&self, version: &str) -> Result<Workflow> {
        if !self.is_prototype() {
            return Err(DomainError::StateConflict(
                "cannot version a workflow instance".into(),
            ));
        }
        if self.status == WorkflowStatus::Draft {
            return Err(DomainError::StateConflict(
                "cannot version a draft workflow prototype".into(),
            ));
        }

        let mut clone = self.clone();
        clone.id = Uuid::new_v4();
        clone.status = WorkflowStatus::Draft;
        clone.version = Some(version.to_string());
        clone.deployed_at = None;
        clone.created_at = Utc::now();
        Ok(clone)
    }
}

/// One step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workstep {
    pub id: Uuid,

    pub workflow_id: Uuid,

    /// Parent prototype workstep; set only on instances
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workstep_id: Option<Uuid>,

    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 1-based position within the workflow; immutable after deploy
    pub cardinality: i32,

    pub status: WorkstepStatus,

    #[serde(default)]
    pub require_finalized_deploy: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prover_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prover: Option<Prover>,

    pub created_at: DateTime<Utc>,
}

impl Workstep {
    pub fn new(workflow_id: Uuid, name: impl Into<String>, cardinality: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            workstep_id: None,
            name: Some(name.into()),
            description: None,
            cardinality,
            status: WorkstepStatus::Draft,
            require_finalized_deploy: false,
            prover_id: None,
            prover: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_prototype(&self) -> bool {
        self.workstep_id.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cardinality < 1 {
            return Err(DomainError::Validation(
                "workstep cardinality must be a 1-based position".into(),
            ));
        }
        Ok(())
    }
}

/// Assert that the given worksteps form a contiguous 1-based cardinality
/// sequence with no gaps or duplicates.
pub fn assert_contiguous_cardinalities(worksteps: &[Workstep]) -> Result<()> {
    let mut cardinalities: Vec<i32> = worksteps.iter().map(|w| w.cardinality).collect();
    cardinalities.sort_unstable();

    for (i, cardinality) in cardinalities.iter().enumerate() {
        let expected = (i + 1) as i32;
        if *cardinality != expected {
            return Err(DomainError::Invariant(format!(
                "workstep cardinalities must form 1..{}; found {} at position {}",
                worksteps.len(),
                cardinality,
                expected
            )));
        }
    }

    Ok(())
}

/// Running occurrence of a workflow prototype, as cached and synchronized
/// between counterparties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,

    /// Parent prototype
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Synchronized instances arrive without a status and start at `init`
    #[serde(default = "instance_status_default")]
    pub status: WorkflowStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<Participant>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub shield: Option<String>,

    #[serde(default)]
    pub worksteps: Vec<WorkstepInstance>,
}

fn instance_status_default() -> WorkflowStatus {
    WorkflowStatus::Init
}

/// Workstep occurrence within a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkstepInstance {
    pub id: Uuid,

    /// Parent prototype workstep
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workstep_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub cardinality: i32,

    pub status: WorkstepStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prover_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prover: Option<Prover>,
}

impl WorkflowInstance {
    /// Derive an instance from a prototype and its worksteps
    ///
    /// Participants are copied from the prototype at instantiation; every
    /// workstep is re-identified and reset to `init`.
    pub fn from_prototype(
        prototype: &Workflow,
        worksteps: &[Workstep],
        id: Option<Uuid>,
    ) -> Result<WorkflowInstance> {
        if !prototype.is_prototype() {
            return Err(DomainError::StateConflict(
                "cannot instantiate a workflow instance from another instance".into(),
            ));
        }
        assert_contiguous_cardinalities(worksteps)?;

        let mut instances: Vec<WorkstepInstance> = worksteps
            .iter()
            .map(|w| WorkstepInstance {
                id: Uuid::new_v4(),
                workstep_id: Some(w.id),
                name: w.name.clone(),
                cardinality: w.cardinality,
                status: WorkstepStatus::Init,
                prover_id: w.prover_id,
                prover: w.prover.clone(),
            })
            .collect();
        instances.sort_by_key(|w| w.cardinality);

        Ok(WorkflowInstance {
            id: id.unwrap_or_else(Uuid::new_v4),
            workflow_id: Some(prototype.id),
            name: prototype.name.clone(),
            status: WorkflowStatus::Init,
            participants: prototype.participants.clone(),
            shield: prototype.shield.clone(),
            worksteps: instances,
        })
    }

    /// The workstep messages are currently verified and proven against.
    ///
    /// Policy: the highest-cardinality workstep. An explicit per-instance
    /// cursor would replace this method.
    pub fn current_workstep(&self) -> Option<&WorkstepInstance> {
        self.worksteps.iter().max_by_key(|w| w.cardinality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prototype_with_steps(n: i32) -> (Workflow, Vec<Workstep>) {
        let mut workflow = Workflow::new("wf", Some(Uuid::new_v4()), Some("0.1".into()));
        workflow.participants.push(Participant::new("0xa"));
        workflow.participants.push(Participant::new("0xb"));

        let worksteps = (1..=n)
            .map(|i| Workstep::new(workflow.id, format!("s{i}"), i))
            .collect();
        (workflow, worksteps)
    }

    #[test]
    fn test_status_transitions_one_way() {
        use WorkflowStatus::*;
        assert!(Draft.can_transition_to(Deployed));
        assert!(Deployed.can_transition_to(Deprecated));
        assert!(!Deployed.can_transition_to(Draft));
        assert!(!Deprecated.can_transition_to(Deployed));
        assert!(!Completed.can_transition_to(Running));
    }

    #[test]
    fn test_contiguous_cardinalities() {
        let (_, worksteps) = prototype_with_steps(3);
        assert!(assert_contiguous_cardinalities(&worksteps).is_ok());
    }

    #[test]
    fn test_cardinality_gap_rejected() {
        let (workflow, mut worksteps) = prototype_with_steps(3);
        worksteps[2].cardinality = 5;
        assert!(assert_contiguous_cardinalities(&worksteps).is_err());

        let duplicate = Workstep::new(workflow.id, "dup", 2);
        worksteps[2] = duplicate;
        assert!(assert_contiguous_cardinalities(&worksteps).is_err());
    }

    #[test]
    fn test_instance_copies_participants() {
        let (mut workflow, mut worksteps) = prototype_with_steps(2);
        workflow.status = WorkflowStatus::Deployed;
        worksteps[0].prover_id = Some(Uuid::new_v4());

        let instance = WorkflowInstance::from_prototype(&workflow, &worksteps, None).unwrap();
        assert_eq!(instance.workflow_id, Some(workflow.id));
        assert_eq!(instance.participants, workflow.participants);
        assert_eq!(instance.worksteps.len(), 2);
        assert!(instance
            .worksteps
            .iter()
            .all(|w| w.status == WorkstepStatus::Init));
        assert_eq!(instance.worksteps[0].prover_id, worksteps[0].prover_id);
    }

    #[test]
    fn test_current_workstep_is_highest_cardinality() {
        let (mut workflow, worksteps) = prototype_with_steps(3);
        workflow.status = WorkflowStatus::Deployed;
        let instance = WorkflowInstance::from_prototype(&workflow, &worksteps, None).unwrap();

        let current = instance.current_workstep().unwrap();
        assert_eq!(current.cardinality, 3);
    }

    #[test]
    fn test_instance_deserializes_from_sync_object() {
        // the wire shape broadcast on a fresh context carries no status
        let raw = json!({
            "id": Uuid::new_v4(),
            "participants": [{"address": "0xa"}],
            "shield": "0xshield",
            "worksteps": [{"id": Uuid::new_v4(), "cardinality": 1, "status": "init"}],
        });

        let instance: WorkflowInstance = serde_json::from_value(raw).unwrap();
        assert_eq!(instance.status, WorkflowStatus::Init);
        assert_eq!(instance.worksteps.len(), 1);
        assert_eq!(instance.shield.as_deref(), Some("0xshield"));
    }

    #[test]
    fn test_version_clone_resets_to_draft() {
        let (mut workflow, _) = prototype_with_steps(1);
        workflow.status = WorkflowStatus::Deployed;
        workflow.deployed_at = Some(Utc::now());

        let clone = workflow.clone_as_version("0.2").unwrap();
        assert_ne!(clone.id, workflow.id);
        assert_eq!(clone.status, WorkflowStatus::Draft);
        assert_eq!(clone.version.as_deref(), Some("0.2"));
        assert!(clone.deployed_at.is_none());
        assert_eq!(clone.participants, workflow.participants);
    }

    #[test]
    fn test_version_requires_non_draft() {
        let (workflow, _) = prototype_with_steps(1);
        assert!(workflow.clone_as_version("0.2").is_err());
    }

    #[test]
    fn test_prover_params_factory() {
        let params = prover_params_factory("wf step 1", "abc", None);
        assert_eq!(params["curve"], "BN256");
        assert_eq!(params["proving_scheme"], "groth16");
        assert!(params.get("store_id").is_none());

        let params = prover_params_factory("wf step 1", "abc", Some("store-1"));
        assert_eq!(params["store_id"], "store-1");
    }

    #[test]
    fn test_prover_sanitized_drops_local_state() {
        let prover = Prover {
            id: Some(Uuid::new_v4()),
            identifier: Some("abc".into()),
            proving_scheme: Some("groth16".into()),
            status: Some("provisioned".into()),
            ..Default::default()
        };

        let sanitized = prover.sanitized();
        assert!(sanitized.id.is_none());
        assert!(sanitized.status.is_none());
        assert_eq!(sanitized.identifier.as_deref(), Some("abc"));
    }
}
