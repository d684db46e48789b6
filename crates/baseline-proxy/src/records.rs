//! Record, context and workflow-instance caches
//!
//! Cache layout:
//!
//! - `baseline.record.{baselineID}` → serialized [`BaselineRecord`]
//! - `baseline.record.id.{internalID}` → baselineID (secondary index)
//! - `baseline.record.mutex.{baselineID}` → named mutex for the pair
//! - `baseline.context.{baselineID}` → serialized [`BaselineContext`]
//! - `baseline.workflow.{workflowID}` → serialized [`WorkflowInstance`]
//! - `baseline.workflow.baseline.{baselineID}` → workflowID (alias)
//!
//! Every update to a record and its context happens under the record mutex:
//! acquire, read-modify-write both, release. Pipelines that must couple a
//! cache write with a system-of-record call hold the same guard across the
//! call so redeliveries cannot create duplicate objects.

use crate::error::Result;
use crate::kv::{KvStore, MutexRegistry};
use baseline_types::{BaselineContext, BaselineRecord, WorkflowInstance};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

pub struct RecordStore {
    kv: Arc<KvStore>,
    locks: Arc<MutexRegistry>,
}

fn record_key(baseline_id: &Uuid) -> String {
    format!("baseline.record.{baseline_id}")
}

fn record_id_key(internal_id: &str) -> String {
    format!("baseline.record.id.{internal_id}")
}

fn record_mutex_key(baseline_id: &Uuid) -> String {
    format!("baseline.record.mutex.{baseline_id}")
}

fn context_key(baseline_id: &Uuid) -> String {
    format!("baseline.context.{baseline_id}")
}

fn workflow_key(workflow_id: &Uuid) -> String {
    format!("baseline.workflow.{workflow_id}")
}

fn workflow_alias_key(baseline_id: &Uuid) -> String {
    format!("baseline.workflow.baseline.{baseline_id}")
}

impl RecordStore {
    pub fn new(kv: Arc<KvStore>, locks: Arc<MutexRegistry>) -> Self {
        Self { kv, locks }
    }

    /// Acquire the mutex guarding a record/context pair
    pub async fn lock_record(&self, baseline_id: &Uuid) -> OwnedMutexGuard<()> {
        self.locks.lock(&record_mutex_key(baseline_id)).await
    }

    /// Cache a record (and optionally its context), acquiring the record
    /// mutex. Assigns a fresh baseline id when the record has none.
    pub async fn cache_record(
        &self,
        record: &mut BaselineRecord,
        mut context: Option<&mut BaselineContext>,
    ) -> Result<()> {
        let baseline_id = ensure_baseline_id(record, context.as_deref_mut());

        let _guard = self.lock_record(&baseline_id).await;
        self.cache_record_locked(record, context)
    }

    /// Cache a record while the caller already holds the record mutex
    pub fn cache_record_locked(
        &self,
        record: &mut BaselineRecord,
        mut context: Option<&mut BaselineContext>,
    ) -> Result<()> {
        let baseline_id = ensure_baseline_id(record, context.as_deref_mut());

        if let Some(internal_id) = record.id.as_deref() {
            self.kv
                .set(record_id_key(internal_id), baseline_id.to_string());
            tracing::debug!(
                baseline_id = %baseline_id,
                internal_id,
                "mapped system of record id to baseline id"
            );
        }

        self.kv
            .set(record_key(&baseline_id), serde_json::to_string(record)?);

        if let Some(context) = context {
            context.attach(record);
            self.kv
                .set(context_key(&baseline_id), serde_json::to_string(context)?);
        }

        Ok(())
    }

    pub fn lookup_record(&self, baseline_id: &Uuid) -> Option<BaselineRecord> {
        let raw = self.kv.get(&record_key(baseline_id))?;
        serde_json::from_str(&raw).ok()
    }

    /// Look up a record via the internal system-of-record id index
    pub fn lookup_record_by_internal_id(&self, internal_id: &str) -> Option<BaselineRecord> {
        let baseline_id = self.kv.get(&record_id_key(internal_id))?;
        let baseline_id = Uuid::parse_str(&baseline_id).ok()?;
        self.lookup_record(&baseline_id)
    }

    pub fn lookup_context(&self, baseline_id: &Uuid) -> Option<BaselineContext> {
        let raw = self.kv.get(&context_key(baseline_id))?;
        serde_json::from_str(&raw).ok()
    }

    /// Cache a workflow instance under its own id
    pub fn cache_workflow(&self, workflow: &WorkflowInstance) -> Result<()> {
        self.kv
            .set(workflow_key(&workflow.id), serde_json::to_string(workflow)?);
        Ok(())
    }

    /// Additionally index a cached workflow under a baseline id; both keys
    /// resolve to the same cached object.
    pub fn cache_workflow_for_baseline(&self, baseline_id: &Uuid, workflow_id: &Uuid) {
        self.kv
            .set(workflow_alias_key(baseline_id), workflow_id.to_string());
    }

    pub fn lookup_workflow(&self, workflow_id: &Uuid) -> Option<WorkflowInstance> {
        let raw = self.kv.get(&workflow_key(workflow_id))?;
        serde_json::from_str(&raw).ok()
    }

    pub fn lookup_workflow_by_baseline_id(&self, baseline_id: &Uuid) -> Option<WorkflowInstance> {
        let workflow_id = self.kv.get(&workflow_alias_key(baseline_id))?;
        let workflow_id = Uuid::parse_str(&workflow_id).ok()?;
        self.lookup_workflow(&workflow_id)
    }

    /// Resolve the workflow instance governing a baseline thread: by
    /// explicit identifier, by baseline-id alias, then via the context.
    pub fn resolve_workflow(
        &self,
        baseline_id: &Uuid,
        identifier: Option<&Uuid>,
    ) -> Option<WorkflowInstance> {
        if let Some(identifier) = identifier {
            if let Some(workflow) = self.lookup_workflow(identifier) {
                return Some(workflow);
            }
        }

        if let Some(workflow) = self.lookup_workflow_by_baseline_id(baseline_id) {
            return Some(workflow);
        }

        let context = self.lookup_context(baseline_id)?;
        let workflow_id = context.workflow_id?;
        self.lookup_workflow(&workflow_id)
    }
}

/// Resolve (or assign) the baseline id shared by a record and its context
fn ensure_baseline_id(
    record: &mut BaselineRecord,
    context: Option<&mut BaselineContext>,
) -> Uuid {
    let baseline_id = record
        .baseline_id
        .or_else(|| context.as_deref().and_then(|c| c.baseline_id))
        .unwrap_or_else(Uuid::new_v4);

    record.baseline_id = Some(baseline_id);
    if let Some(context) = context {
        context.baseline_id.get_or_insert(baseline_id);
    }
    baseline_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use baseline_types::{Participant, WorkflowStatus};

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(KvStore::new()), Arc::new(MutexRegistry::new()))
    }

    fn instance(id: Uuid) -> WorkflowInstance {
        WorkflowInstance {
            id,
            workflow_id: Some(Uuid::new_v4()),
            name: Some("wf".into()),
            status: WorkflowStatus::Init,
            participants: vec![Participant::new("0xa")],
            shield: None,
            worksteps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_cache_assigns_baseline_id() {
        let store = store();
        let mut record = BaselineRecord {
            record_type: Some("purchase_order".into()),
            ..Default::default()
        };

        store.cache_record(&mut record, None).await.unwrap();
        let baseline_id = record.baseline_id.expect("baseline id assigned");
        assert!(store.lookup_record(&baseline_id).is_some());
    }

    #[tokio::test]
    async fn test_internal_id_index() {
        let store = store();
        let mut record = BaselineRecord {
            id: Some("sor-1".into()),
            record_type: Some("purchase_order".into()),
            ..Default::default()
        };

        store.cache_record(&mut record, None).await.unwrap();

        let found = store.lookup_record_by_internal_id("sor-1").unwrap();
        assert_eq!(found.baseline_id, record.baseline_id);
        assert_eq!(found.id.as_deref(), Some("sor-1"));
    }

    #[tokio::test]
    async fn test_context_owns_records() {
        let store = store();
        let baseline_id = Uuid::new_v4();
        let mut context = BaselineContext::new(Some(baseline_id), Some(Uuid::new_v4()));
        let mut record = BaselineRecord {
            baseline_id: Some(baseline_id),
            record_type: Some("purchase_order".into()),
            ..Default::default()
        };

        store
            .cache_record(&mut record, Some(&mut context))
            .await
            .unwrap();

        let cached = store.lookup_context(&baseline_id).unwrap();
        assert_eq!(cached.records.len(), 1);
        assert_eq!(cached.records[0].context_id, Some(context.id));
    }

    #[tokio::test]
    async fn test_workflow_dual_key_resolution() {
        let store = store();
        let workflow = instance(Uuid::new_v4());
        let baseline_id = Uuid::new_v4();

        store.cache_workflow(&workflow).unwrap();
        store.cache_workflow_for_baseline(&baseline_id, &workflow.id);

        let by_id = store.lookup_workflow(&workflow.id).unwrap();
        let by_baseline = store.lookup_workflow_by_baseline_id(&baseline_id).unwrap();
        assert_eq!(by_id.id, by_baseline.id);

        // after re-caching an updated instance, both keys see the update
        let mut updated = workflow.clone();
        updated.status = WorkflowStatus::Running;
        store.cache_workflow(&updated).unwrap();
        assert_eq!(
            store
                .lookup_workflow_by_baseline_id(&baseline_id)
                .unwrap()
                .status,
            WorkflowStatus::Running
        );
    }

    #[tokio::test]
    async fn test_resolve_workflow_fallback_order() {
        let store = store();
        let workflow = instance(Uuid::new_v4());
        store.cache_workflow(&workflow).unwrap();

        let baseline_id = Uuid::new_v4();

        // no identifier, no alias: resolved via context
        let mut context = BaselineContext::new(Some(baseline_id), Some(workflow.id));
        let mut record = BaselineRecord {
            baseline_id: Some(baseline_id),
            ..Default::default()
        };
        store
            .cache_record(&mut record, Some(&mut context))
            .await
            .unwrap();

        let resolved = store.resolve_workflow(&baseline_id, None).unwrap();
        assert_eq!(resolved.id, workflow.id);

        // explicit identifier wins
        let other = instance(Uuid::new_v4());
        store.cache_workflow(&other).unwrap();
        let resolved = store.resolve_workflow(&baseline_id, Some(&other.id)).unwrap();
        assert_eq!(resolved.id, other.id);
    }
}
