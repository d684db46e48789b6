//! Invitation dispatcher
//!
//! Consumes `baseline.invitation.outbound`. Delivery of workgroup-join
//! invitations to the identity service is not wired yet; messages are
//! validated and acknowledged.

use async_trait::async_trait;
use baseline_bus::{Delivery, Disposition, MessageHandler};
use serde_json::Value;

#[derive(Default)]
pub struct InviteDispatcher;

impl InviteDispatcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageHandler for InviteDispatcher {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        tracing::debug!(
            bytes = delivery.payload.len(),
            subject = %delivery.subject,
            "consuming dispatch invitation message"
        );

        let invitation: Value = match serde_json::from_slice(&delivery.payload) {
            Ok(invitation) => invitation,
            Err(err) => {
                tracing::warn!(error = %err, "failed to unmarshal dispatch invitation message");
                return Disposition::Term;
            }
        };

        // TODO: deliver the invitation through the identity service
        tracing::debug!(?invitation, "invitation dispatch not yet implemented");
        Disposition::Ack
    }
}
