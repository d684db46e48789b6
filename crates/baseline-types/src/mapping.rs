//! Declarative schema mappings
//!
//! A mapping connects one business-object type to a set of field-level
//! bindings in the system of record. Its `ref` is derived, never supplied:
//! the lowercase-hex SHA-256 of `{organization_id}.{type}`, recomputed on
//! every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// Derive the read-only mapping ref for an organization and type
pub fn mapping_ref(organization_id: &Uuid, mapping_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{organization_id}.{mapping_type}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Schema translation for one system-of-record object type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub mapping_type: Option<String>,

    pub organization_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Derived `SHA256(organization_id.type)`; rejected on input
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub mapping_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_mapping_id: Option<Uuid>,

    #[serde(default)]
    pub models: Vec<MappingModel>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// One model within a mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingModel {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(default = "Uuid::nil")]
    pub mapping_id: Uuid,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_model_id: Option<Uuid>,

    #[serde(default)]
    pub fields: Vec<MappingField>,
}

/// One field binding within a mapping model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingField {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(default = "Uuid::nil")]
    pub mapping_model_id: Uuid,

    pub name: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,

    #[serde(default)]
    pub is_primary_key: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_field_id: Option<Uuid>,
}

impl Mapping {
    /// Validate an inbound mapping; the ref is read-only and must not be
    /// provided by the caller.
    pub fn validate(&self) -> Result<()> {
        if self.mapping_ref.is_some() {
            return Err(DomainError::Validation(
                "mapping ref must not be provided".into(),
            ));
        }
        if self
            .mapping_type
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(DomainError::Validation("type is required".into()));
        }
        Ok(())
    }

    /// Recompute the derived ref from the organization id and type
    pub fn enrich_ref(&mut self) -> Result<()> {
        let organization_id = self
            .organization_id
            .ok_or_else(|| DomainError::Validation("organization_id is required".into()))?;
        let mapping_type = self
            .mapping_type
            .as_deref()
            .ok_or_else(|| DomainError::Validation("type is required".into()))?;

        self.mapping_ref = Some(mapping_ref(&organization_id, mapping_type));
        Ok(())
    }
}
