//! RPC clients for the services the baseline proxy consumes
//!
//! Each collaborator is modeled as a trait so the daemon takes
//! `Arc<dyn …>` handles and tests substitute recording mocks:
//!
//! - [`IdentityClient`]: vends short-lived access JWTs from a refresh token
//! - [`VaultClient`]: stores and retrieves verifiable credentials
//! - [`PrivacyClient`]: compiles provers, generates and verifies proofs
//! - [`ChainClient`]: executes registry contract calls (`getOrg`)
//! - [`SorClient`]: CRUDs business objects in the system of record
//!
//! The HTTP implementations follow the upstream REST conventions; every
//! call is authorized by a bearer access token except the system of record,
//! which is reached over its own pre-configured channel.

#![deny(unsafe_code)]

mod chain;
mod error;
mod ident;
mod privacy;
mod sor;
mod vault;

pub use chain::{ChainClient, HttpChainClient};
pub use error::{ClientError, Result};
pub use ident::{AccessToken, HttpIdentityClient, IdentityClient};
pub use privacy::{HttpPrivacyClient, PrivacyClient, ProveResponse, VerifyResponse};
pub use sor::{
    object_id, HttpSorClient, SorClient, BUSINESS_OBJECT_STATUS_ERROR,
    BUSINESS_OBJECT_STATUS_SUCCESS,
};
pub use vault::{HttpVaultClient, Secret, SecretRef, VaultClient};
