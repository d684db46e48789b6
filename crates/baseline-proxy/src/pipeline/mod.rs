//! Message pipelines
//!
//! One consumer per durable subject:
//!
//! - [`InboundPipeline`] consumes `baseline.inbound` and applies verified
//!   protocol messages to the system of record
//! - [`OutboundPipeline`] turns system-of-record writes into proven
//!   `BASELINE` messages fanned out per recipient
//! - [`Dispatcher`] consumes `baseline.protocolmessage.outbound` and
//!   delivers to counterparty messaging endpoints
//! - [`InviteDispatcher`] consumes `baseline.invitation.outbound`
//! - the deploy handlers drive the workstep/workflow deployment loop

mod deploy;
mod dispatch;
mod inbound;
mod invite;
mod outbound;

pub use deploy::{WorkflowDeployHandler, WorkstepDeployHandler, WorkstepFinalizeDeployHandler};
pub use dispatch::{Dispatcher, HttpPeerGateway, PeerGateway};
pub use inbound::InboundPipeline;
pub use invite::InviteDispatcher;
pub use outbound::OutboundPipeline;
