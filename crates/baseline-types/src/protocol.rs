//! Protocol message wire types
//!
//! A `ProtocolMessage` is the unit of exchange between proxies. The opcode
//! drives the inbound state machine: `BASELINE` carries a proven state
//! transition, `SYNC` refreshes a prover or workflow definition, and `JOIN`
//! is reserved for workgroup admission.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `SYNC` payload type carrying raw prover parameters
pub const PAYLOAD_TYPE_CIRCUIT: &str = "circuit";

/// `SYNC` payload type carrying a serialized workflow instance
pub const PAYLOAD_TYPE_WORKFLOW: &str = "workflow";

/// Protocol message opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    #[serde(rename = "BASELINE")]
    Baseline,
    #[serde(rename = "JOIN")]
    Join,
    #[serde(rename = "SYNC")]
    Sync,
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Baseline => write!(f, "BASELINE"),
            Opcode::Join => write!(f, "JOIN"),
            Opcode::Sync => write!(f, "SYNC"),
        }
    }
}

/// Payload of a protocol message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolMessagePayload {
    /// The business object (or sync object) being exchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,

    /// Payload discriminator; for `SYNC` one of `circuit` | `workflow`
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<String>,

    /// Public+private circuit inputs; `BASELINE` messages carry
    /// `Document.Preimage` and `Document.Hash`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<Value>,

    /// The zk proof attached by the sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Value>,
}

/// A baseline protocol message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcode: Option<Opcode>,

    /// Workflow identifier the message refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// Shield contract anchoring the workflow commitments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shield: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    /// Mapping type of the underlying business object
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ProtocolMessagePayload>,
}

impl ProtocolMessage {
    /// Clone this message addressed to a single recipient
    pub fn for_recipient(&self, recipient: &str) -> ProtocolMessage {
        let mut msg = self.clone();
        msg.recipient = Some(recipient.to_string());
        msg
    }
}

/// Outbound envelope accepted at the system-of-record edge
///
/// `id` is the internal system-of-record identifier of the business object;
/// `baseline_id` is present only when the caller already knows the shared
/// thread it belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Explicit recipient override; defaults to the workflow participants
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<super::participant::Participant>,

    /// Errors accumulated while handling the message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
