//! Workgroups and their participants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, Result};

/// One organization participating in a workgroup
///
/// The address is the globally unique organization identifier and the
/// primary key across every cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub address: Option<String>,

    /// Messaging endpoint, resolved lazily from the on-chain registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Participant {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A set of organizations sharing workflows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workgroup {
    pub id: Uuid,

    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing)]
    pub organization_id: Option<Uuid>,

    /// Membership is a set; duplicate addresses are rejected on add
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<Participant>,

    pub created_at: DateTime<Utc>,
}

impl Workgroup {
    pub fn new(name: impl Into<String>, organization_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Some(name.into()),
            description: None,
            organization_id,
            participants: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(DomainError::Validation("name is required".into()));
        }
        Ok(())
    }

    /// Add a participant address; duplicates are a state conflict
    pub fn add_participant(&mut self, participant: Participant) -> Result<()> {
        let address = participant
            .address
            .as_deref()
            .ok_or_else(|| DomainError::Validation("participant address is required".into()))?;

        if self.contains_participant(address) {
            return Err(DomainError::StateConflict(format!(
                "participant already present in workgroup: {address}"
            )));
        }

        self.participants.push(participant);
        Ok(())
    }

    pub fn remove_participant(&mut self, address: &str) -> Result<()> {
        let before = self.participants.len();
        self.participants
            .retain(|p| p.address.as_deref() != Some(address));
        if self.participants.len() == before {
            return Err(DomainError::NotFound(format!(
                "participant not present in workgroup: {address}"
            )));
        }
        Ok(())
    }

    pub fn contains_participant(&self, address: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.address.as_deref() == Some(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_is_a_set() {
        let mut wg = Workgroup::new("procurement", None);
        wg.add_participant(Participant::new("0xa")).unwrap();
        wg.add_participant(Participant::new("0xb")).unwrap();

        let err = wg.add_participant(Participant::new("0xa")).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert_eq!(wg.participants.len(), 2);
    }

    #[test]
    fn test_remove_participant() {
        let mut wg = Workgroup::new("procurement", None);
        wg.add_participant(Participant::new("0xa")).unwrap();

        wg.remove_participant("0xa").unwrap();
        assert!(wg.participants.is_empty());
        assert!(wg.remove_participant("0xa").is_err());
    }

    #[test]
    fn test_validate_requires_name() {
        let mut wg = Workgroup::new("  ", None);
        assert!(wg.validate().is_err());
        wg.name = Some("orders".into());
        assert!(wg.validate().is_ok());
    }
}
