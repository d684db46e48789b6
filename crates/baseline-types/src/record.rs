//! Baseline records and contexts
//!
//! A `BaselineRecord` bridges an object in the internal system of record and
//! a shared baseline thread. A `BaselineContext` binds that thread to a
//! workflow instance and owns its records. The workflow is referenced by ID
//! and resolved lazily; the pair is never serialized as a cycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// Bridge between an internal system-of-record object and a baseline thread
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BaselineRecord {
    /// Shared thread identifier; immutable once assigned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<Uuid>,

    /// Internal system-of-record identifier; immutable once set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<Uuid>,

    /// Mapping type of the underlying business object
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
}

impl BaselineRecord {
    /// Set the internal system-of-record id exactly once
    pub fn set_internal_id(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        match &self.id {
            None => {
                self.id = Some(id);
                Ok(())
            }
            Some(existing) if *existing == id => Ok(()),
            Some(existing) => Err(DomainError::Invariant(format!(
                "record internal id is immutable; {existing} cannot become {id}"
            ))),
        }
    }
}

/// Binds a baseline thread to a workflow instance and owns its records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineContext {
    pub id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,

    #[serde(default)]
    pub records: Vec<BaselineRecord>,
}

impl BaselineContext {
    pub fn new(baseline_id: Option<Uuid>, workflow_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            baseline_id,
            workflow_id,
            records: Vec::new(),
        }
    }

    pub fn contains(&self, record: &BaselineRecord) -> bool {
        self.records
            .iter()
            .any(|r| r.baseline_id == record.baseline_id && r.id == record.id)
    }

    /// Attach a record to this context, stamping its `context_id`
    pub fn attach(&mut self, record: &mut BaselineRecord) {
        record.context_id = Some(self.id);
        if !self.contains(record) {
            self.records.push(record.clone());
        }
    }
}
