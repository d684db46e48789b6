//! Baseline protocol proxy daemon
//!
//! A per-organization node mediating business-object exchange between an
//! internal system of record and counterparty organizations. Outbound
//! writes become signed, zero-knowledge-proven protocol messages fanned out
//! to workflow participants; inbound messages are verified and applied to
//! the system of record. Canonical data never leaves the organization.
//!
//! The daemon wires together:
//!
//! - the durable [`baseline_bus::MessageBus`] subjects and their handlers
//!   (inbound pipeline, dispatcher, invitation dispatcher, deployment loop)
//! - the [`records::RecordStore`] and [`directory::CounterpartyDirectory`]
//!   caches
//! - the [`registry::WorkflowRegistry`] over memory or postgres storage
//! - a thin axum HTTP edge for resource CRUD and the objects endpoints

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod kv;
pub mod pipeline;
pub mod records;
pub mod registry;
pub mod server;

pub use config::ProxyConfig;
pub use context::ProxyContext;
pub use error::{ApiError, ProxyError, Result};
pub use server::Server;
