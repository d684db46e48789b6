//! Subject names and consumer defaults
//!
//! All durable subjects live under the `baseline.>` namespace. The bare
//! `baseline` subject is the non-durable entry point for traffic from
//! remote peers; it is relayed into `baseline.inbound` so peer delivery is
//! decoupled from local processing.

use std::time::Duration;

/// Non-durable subject receiving traffic from remote peers
pub const SUBJECT_BASELINE: &str = "baseline";

/// Durable subject feeding the inbound pipeline
pub const SUBJECT_INBOUND: &str = "baseline.inbound";

/// Durable subject feeding the protocol-message dispatcher
pub const SUBJECT_PROTOCOL_MESSAGE_OUTBOUND: &str = "baseline.protocolmessage.outbound";

/// Durable subject feeding the invitation dispatcher
pub const SUBJECT_INVITATION_OUTBOUND: &str = "baseline.invitation.outbound";

/// Durable subject driving workflow deployment finalization
pub const SUBJECT_WORKFLOW_DEPLOY: &str = "baseline.workflow.deploy";

/// Durable subject driving workstep deployment
pub const SUBJECT_WORKSTEP_DEPLOY: &str = "baseline.workstep.deploy";

/// Durable subject driving workstep deployment finalization
pub const SUBJECT_WORKSTEP_FINALIZE_DEPLOY: &str = "baseline.workstep.deploy.finalize";

/// Every durable subject, in subscription order
pub const DURABLE_SUBJECTS: [&str; 6] = [
    SUBJECT_INBOUND,
    SUBJECT_PROTOCOL_MESSAGE_OUTBOUND,
    SUBJECT_INVITATION_OUTBOUND,
    SUBJECT_WORKFLOW_DEPLOY,
    SUBJECT_WORKSTEP_DEPLOY,
    SUBJECT_WORKSTEP_FINALIZE_DEPLOY,
];

/// Per-subject consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Redelivery timeout for an outstanding delivery
    pub ack_wait: Duration,

    /// Maximum unacknowledged deliveries in flight
    pub max_in_flight: usize,

    /// Delivery attempts after which a message is dead-lettered
    pub max_deliveries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(30),
            max_in_flight: 2048,
            max_deliveries: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stream_contract() {
        let cfg = ConsumerConfig::default();
        assert_eq!(cfg.ack_wait, Duration::from_secs(30));
        assert_eq!(cfg.max_in_flight, 2048);
        assert_eq!(cfg.max_deliveries, 10);
    }

    #[test]
    fn test_durable_subjects_share_namespace() {
        for subject in DURABLE_SUBJECTS {
            assert!(subject.starts_with("baseline."));
        }
    }
}
