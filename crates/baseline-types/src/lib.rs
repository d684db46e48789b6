//! Domain types for the baseline protocol proxy
//!
//! This crate defines the entities exchanged between a proxy, its internal
//! system of record, and counterparty organizations:
//!
//! - **ProtocolMessage**: the unit of wire exchange (`BASELINE`, `SYNC`,
//!   `JOIN`)
//! - **Workgroup / Workflow / Workstep**: the shared process model and its
//!   prototype/instance lifecycle
//! - **BaselineRecord / BaselineContext**: the bridge between an internal
//!   record and a shared baseline thread
//! - **Mapping**: declarative schema translation for one object type
//! - **witness**: the MiMC-over-BN256 hashing used to populate proof
//!   witnesses
//!
//! Cyclic relationships (context ↔ record, record → workflow) are
//! represented by IDs only; callers resolve them lazily through their
//! stores.

#![deny(unsafe_code)]

pub mod error;
pub mod mapping;
pub mod participant;
pub mod protocol;
pub mod record;
pub mod witness;
pub mod workflow;

pub use error::{DomainError, Result};
pub use mapping::{Mapping, MappingField, MappingModel};
pub use participant::{Participant, Workgroup};
pub use protocol::{
    Message, Opcode, ProtocolMessage, ProtocolMessagePayload, PAYLOAD_TYPE_CIRCUIT,
    PAYLOAD_TYPE_WORKFLOW,
};
pub use record::{BaselineContext, BaselineRecord};
pub use witness::DocumentWitness;
pub use workflow::{
    Prover, Workflow, WorkflowInstance, WorkflowStatus, Workstep, WorkstepInstance, WorkstepStatus,
};
