//! In-memory registry storage
//!
//! Suitable for development and tests; production deployments use the
//! postgres backend behind the same traits.

use super::storage::{
    MappingStorage, WorkflowFilter, WorkflowStorage, WorkflowVersion, WorkgroupStorage,
    WorkstepStorage,
};
use crate::error::Result;
use async_trait::async_trait;
use baseline_types::{Mapping, Workflow, Workgroup, Workstep};
use dashmap::DashMap;
use uuid::Uuid;

/// In-memory registry backend
#[derive(Default)]
pub struct InMemoryRegistryStorage {
    workgroups: DashMap<Uuid, Workgroup>,
    workflows: DashMap<Uuid, Workflow>,
    versions: DashMap<Uuid, Vec<WorkflowVersion>>,
    worksteps: DashMap<Uuid, Workstep>,
    mappings: DashMap<Uuid, Mapping>,
}

impl InMemoryRegistryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkgroupStorage for InMemoryRegistryStorage {
    async fn get_workgroup(&self, id: &Uuid) -> Result<Option<Workgroup>> {
        Ok(self.workgroups.get(id).map(|w| w.clone()))
    }

    async fn list_workgroups(&self) -> Result<Vec<Workgroup>> {
        let mut workgroups: Vec<Workgroup> =
            self.workgroups.iter().map(|w| w.value().clone()).collect();
        workgroups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(workgroups)
    }

    async fn upsert_workgroup(&self, workgroup: Workgroup) -> Result<()> {
        self.workgroups.insert(workgroup.id, workgroup);
        Ok(())
    }
}

#[async_trait]
impl WorkflowStorage for InMemoryRegistryStorage {
    async fn get_workflow(&self, id: &Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.get(id).map(|w| w.clone()))
    }

    async fn list_workflows(&self, filter: WorkflowFilter) -> Result<Vec<Workflow>> {
        let mut workflows: Vec<Workflow> = self
            .workflows
            .iter()
            .map(|w| w.value().clone())
            .filter(|w| {
                if let Some(workgroup_id) = filter.workgroup_id {
                    if w.workgroup_id != Some(workgroup_id) {
                        return false;
                    }
                }
                if filter.prototypes_only && !w.is_prototype() {
                    return false;
                }
                if filter.instances_only && w.is_prototype() {
                    return false;
                }
                true
            })
            .collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(workflows)
    }

    async fn insert_workflow(&self, workflow: Workflow) -> Result<()> {
        self.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn update_workflow(&self, workflow: Workflow) -> Result<()> {
        self.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn delete_workflow(&self, id: &Uuid) -> Result<bool> {
        let removed = self.workflows.remove(id).is_some();
        if removed {
            self.worksteps.retain(|_, w| w.workflow_id != *id);
        }
        Ok(removed)
    }

    async fn insert_workflow_version(&self, version: WorkflowVersion) -> Result<()> {
        self.versions
            .entry(version.root_workflow_id)
            .or_default()
            .push(version);
        Ok(())
    }

    async fn list_workflow_versions(
        &self,
        root_workflow_id: &Uuid,
    ) -> Result<Vec<WorkflowVersion>> {
        let mut versions = self
            .versions
            .get(root_workflow_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(versions)
    }

    async fn find_workflow_version_root(&self, workflow_id: &Uuid) -> Result<Option<Uuid>> {
        for entry in self.versions.iter() {
            if entry.value().iter().any(|v| v.workflow_id == *workflow_id) {
                return Ok(Some(*entry.key()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl WorkstepStorage for InMemoryRegistryStorage {
    async fn get_workstep(&self, id: &Uuid) -> Result<Option<Workstep>> {
        Ok(self.worksteps.get(id).map(|w| w.clone()))
    }

    async fn list_worksteps(&self, workflow_id: &Uuid) -> Result<Vec<Workstep>> {
        let mut worksteps: Vec<Workstep> = self
            .worksteps
            .iter()
            .map(|w| w.value().clone())
            .filter(|w| w.workflow_id == *workflow_id)
            .collect();
        worksteps.sort_by_key(|w| w.cardinality);
        Ok(worksteps)
    }

    async fn insert_workstep(&self, workstep: Workstep) -> Result<()> {
        self.worksteps.insert(workstep.id, workstep);
        Ok(())
    }

    async fn update_workstep(&self, workstep: Workstep) -> Result<()> {
        self.worksteps.insert(workstep.id, workstep);
        Ok(())
    }

    async fn delete_workstep(&self, id: &Uuid) -> Result<bool> {
        Ok(self.worksteps.remove(id).is_some())
    }

    async fn replace_worksteps(&self, workflow_id: &Uuid, worksteps: Vec<Workstep>) -> Result<()> {
        self.worksteps.retain(|_, w| w.workflow_id != *workflow_id);
        for workstep in worksteps {
            self.worksteps.insert(workstep.id, workstep);
        }
        Ok(())
    }
}

#[async_trait]
impl MappingStorage for InMemoryRegistryStorage {
    async fn get_mapping(&self, id: &Uuid) -> Result<Option<Mapping>> {
        Ok(self.mappings.get(id).map(|m| m.clone()))
    }

    async fn list_mappings(
        &self,
        organization_id: Option<Uuid>,
        workgroup_id: Option<Uuid>,
    ) -> Result<Vec<Mapping>> {
        let mut mappings: Vec<Mapping> = self
            .mappings
            .iter()
            .map(|m| m.value().clone())
            .filter(|m| {
                if let Some(organization_id) = organization_id {
                    if m.organization_id != Some(organization_id) {
                        return false;
                    }
                }
                if let Some(workgroup_id) = workgroup_id {
                    if m.workgroup_id != Some(workgroup_id) {
                        return false;
                    }
                }
                true
            })
            .collect();
        mappings.sort_by(|a, b| b.mapping_type.cmp(&a.mapping_type));
        Ok(mappings)
    }

    async fn list_mappings_by_type(&self, mapping_type: &str) -> Result<Vec<Mapping>> {
        Ok(self
            .mappings
            .iter()
            .map(|m| m.value().clone())
            .filter(|m| m.mapping_type.as_deref() == Some(mapping_type))
            .collect())
    }

    async fn insert_mapping(&self, mapping: Mapping) -> Result<()> {
        self.mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn replace_mapping(&self, mapping: Mapping) -> Result<()> {
        self.mappings.insert(mapping.id, mapping);
        Ok(())
    }

    async fn delete_mapping(&self, id: &Uuid) -> Result<bool> {
        Ok(self.mappings.remove(id).is_some())
    }
}
