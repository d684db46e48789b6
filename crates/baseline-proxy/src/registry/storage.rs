//! Registry storage trait definitions

use crate::error::Result;
use async_trait::async_trait;
use baseline_types::{Mapping, Workflow, Workgroup, Workstep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Filter for workflow listings
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub workgroup_id: Option<Uuid>,
    /// Only prototypes (no parent pointer)
    pub prototypes_only: bool,
    /// Only instances (parent pointer set)
    pub instances_only: bool,
}

/// One entry in a prototype's version lineage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: Uuid,
    /// First prototype in the lineage
    pub root_workflow_id: Uuid,
    pub workflow_id: Uuid,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage for workgroups and their participant rows
#[async_trait]
pub trait WorkgroupStorage: Send + Sync {
    async fn get_workgroup(&self, id: &Uuid) -> Result<Option<Workgroup>>;

    async fn list_workgroups(&self) -> Result<Vec<Workgroup>>;

    /// Create or update a workgroup, replacing its participant rows
    async fn upsert_workgroup(&self, workgroup: Workgroup) -> Result<()>;
}

/// Storage for workflow prototypes
#[async_trait]
pub trait WorkflowStorage: Send + Sync {
    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>>;

    async fn list_workflows(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>>;

    async fn insert_workflow(&self, workflow: Workflow) -> Result<()>;

    async fn update_workflow(&self, workflow: Workflow) -> Result<()>;

    /// Delete a workflow and cascade to its worksteps
    async fn delete_workflow(&self, id: &Uuid) -> Result<bool>;

    async fn insert_workflow_version(&self, version: WorkflowVersion) -> Result<()>;

    async fn list_workflow_versions(&self, root_workflow_id: &Uuid)
        -> Result<Vec<WorkflowVersion>>;

    /// Resolve the lineage root for a workflow id
    async fn find_workflow_version_root(&self, workflow_id: &Uuid) -> Result<Option<Uuid>>;
}

/// Storage for worksteps
#[async_trait]
pub trait WorkstepStorage: Send + Sync {
    async fn get_workstep(&self, id: &Uuid) -> Result<Option<Workstep>>;

    /// Worksteps of a workflow, ordered by cardinality ascending
    async fn list_worksteps(&self, workflow_id: &Uuid) -> Result<Vec<Workstep>>;

    async fn insert_workstep(&self, workstep: Workstep) -> Result<()>;

    async fn update_workstep(&self, workstep: Workstep) -> Result<()>;

    async fn delete_workstep(&self, id: &Uuid) -> Result<bool>;

    /// Replace every workstep of a workflow in one transaction
    async fn replace_worksteps(&self, workflow_id: &Uuid, worksteps: Vec<Workstep>) -> Result<()>;
}

/// Storage for mappings, their models and fields
///
/// A mapping is always read and written whole; updates are wholesale
/// replacements of models and fields executed inside one transaction.
#[async_trait]
pub trait MappingStorage: Send + Sync {
    async fn get_mapping(&self, id: &Uuid) -> Result<Option<Mapping>>;

    async fn list_mappings(
        &self,
        organization_id: Option<Uuid>,
        workgroup_id: Option<Uuid>,
    ) -> Result<Vec<Mapping>>;

    async fn list_mappings_by_type(&self, mapping_type: &str) -> Result<Vec<Mapping>>;

    async fn insert_mapping(&self, mapping: Mapping) -> Result<()>;

    /// Wholesale replacement of a mapping and all of its models/fields
    async fn replace_mapping(&self, mapping: Mapping) -> Result<()>;

    async fn delete_mapping(&self, id: &Uuid) -> Result<bool>;
}

/// Combined registry storage
pub trait RegistryStorage:
    WorkgroupStorage + WorkflowStorage + WorkstepStorage + MappingStorage + Send + Sync
{
}

impl<T> RegistryStorage for T where
    T: WorkgroupStorage + WorkflowStorage + WorkstepStorage + MappingStorage + Send + Sync
{
}
