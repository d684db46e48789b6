//! Pipeline integration tests: inbound apply, outbound baselining and
//! dispatch, against in-memory storage and recording doubles.

mod support;

use baseline_bus::{
    subject::{SUBJECT_INBOUND, SUBJECT_PROTOCOL_MESSAGE_OUTBOUND},
    ConsumerConfig, Delivery, Disposition, MessageHandler,
};
use baseline_proxy::pipeline::{Dispatcher, InboundPipeline, OutboundPipeline};
use baseline_types::{
    Mapping, Message, Opcode, Participant, ProtocolMessage, ProtocolMessagePayload, Workflow,
    WorkflowInstance, WorkflowStatus, Workgroup, Workstep, WorkstepInstance, WorkstepStatus,
    PAYLOAD_TYPE_WORKFLOW,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{harness, MockPeerGateway, TestHarness, ORG_ADDRESS, PEER_ADDRESS, PEER_ENDPOINT};
use uuid::Uuid;

/// Collects everything published on a subject
struct CaptureHandler {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl CaptureHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(Vec::new()),
        })
    }

    fn protocol_messages(&self) -> Vec<ProtocolMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_slice(raw).unwrap())
            .collect()
    }
}

#[async_trait::async_trait]
impl MessageHandler for CaptureHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        self.messages.lock().unwrap().push(delivery.payload.clone());
        Disposition::Ack
    }
}

fn quick_config(max_deliveries: u32) -> ConsumerConfig {
    ConsumerConfig {
        ack_wait: Duration::from_millis(500),
        max_in_flight: 16,
        max_deliveries,
    }
}

async fn wait_until<F: Fn() -> bool>(predicate: F) {
    for _ in 0..100 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

/// Drive a purchase-order prototype through creation and deployment
async fn deployed_prototype(harness: &TestHarness) -> (Workflow, Workstep) {
    let ctx = &harness.ctx;
    let organization_id = ctx.organization_id().unwrap();

    let mut workgroup = Workgroup::new("buyers", Some(organization_id));
    workgroup
        .add_participant(Participant::new(ORG_ADDRESS))
        .unwrap();
    workgroup
        .add_participant(Participant::new(PEER_ADDRESS))
        .unwrap();
    let workgroup = ctx.registry.create_workgroup(workgroup).await.unwrap();

    let mut mapping: Mapping = serde_json::from_value(json!({
        "name": "PO",
        "type": "purchase_order",
        "workgroup_id": workgroup.id,
    }))
    .unwrap();
    mapping.organization_id = Some(organization_id);
    ctx.registry.create_mapping(mapping).await.unwrap();

    let mut workflow = Workflow::new("purchase_order", Some(workgroup.id), Some("0.1".into()));
    workflow.participants = workgroup.participants.clone();
    workflow.shield = Some("0xshield".into());
    let workflow = ctx.registry.create_workflow(workflow).await.unwrap();

    let workstep = ctx
        .registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "s1", 0))
        .await
        .unwrap();

    ctx.registry.deploy_workflow(&workflow.id).await.unwrap();
    assert!(ctx
        .registry
        .deploy_workstep("token", &workstep.id)
        .await
        .unwrap());
    assert!(ctx
        .registry
        .finalize_workstep_deploy("token", &workstep.id)
        .await
        .unwrap());
    assert!(ctx
        .registry
        .finalize_workflow_deploy(&workflow.id)
        .await
        .unwrap());

    let workflow = ctx.registry.get_workflow(&workflow.id).await.unwrap().unwrap();
    let workstep = ctx.registry.get_workstep(&workstep.id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Deployed);
    assert_eq!(workstep.status, WorkstepStatus::Deployed);
    (workflow, workstep)
}

/// A cached workflow instance backed by a provisioned prover
fn cached_instance(harness: &TestHarness) -> WorkflowInstance {
    let instance = WorkflowInstance {
        id: Uuid::new_v4(),
        workflow_id: Some(Uuid::new_v4()),
        name: Some("purchase_order".into()),
        status: WorkflowStatus::Init,
        participants: vec![Participant::new(PEER_ADDRESS)],
        shield: Some("0xshield".into()),
        worksteps: vec![WorkstepInstance {
            id: Uuid::new_v4(),
            workstep_id: None,
            name: Some("s1".into()),
            cardinality: 1,
            status: WorkstepStatus::Init,
            prover_id: Some(Uuid::new_v4()),
            prover: None,
        }],
    };
    harness.ctx.records.cache_workflow(&instance).unwrap();
    instance
}

fn baseline_message(baseline_id: Uuid, identifier: Uuid) -> ProtocolMessage {
    ProtocolMessage {
        baseline_id: Some(baseline_id),
        opcode: Some(Opcode::Baseline),
        identifier: Some(identifier),
        sender: Some(PEER_ADDRESS.into()),
        recipient: Some(ORG_ADDRESS.into()),
        shield: Some("0xshield".into()),
        signature: None,
        message_type: Some("purchase_order".into()),
        payload: Some(ProtocolMessagePayload {
            object: Some(json!({"total": 100})),
            payload_type: Some("purchase_order".into()),
            witness: Some(json!({"Document.Hash": "1", "Document.Preimage": "2"})),
            proof: Some(json!("proof-material")),
        }),
    }
}

fn delivery(message: &ProtocolMessage) -> Delivery {
    Delivery {
        subject: SUBJECT_INBOUND.into(),
        payload: serde_json::to_vec(message).unwrap(),
        deliveries: 1,
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_baseline_creates_record_then_updates() {
    let harness = harness();
    let instance = cached_instance(&harness);
    let pipeline = InboundPipeline::new(harness.ctx.clone());

    let baseline_id = Uuid::new_v4();
    let message = baseline_message(baseline_id, instance.id);

    // first delivery creates the business object
    assert_eq!(pipeline.handle(&delivery(&message)).await, Disposition::Ack);
    assert_eq!(harness.sor.created.lock().unwrap().len(), 1);

    let record = harness.ctx.records.lookup_record(&baseline_id).unwrap();
    assert_eq!(record.id.as_deref(), Some("sor-obj-1"));

    let context = harness.ctx.records.lookup_context(&baseline_id).unwrap();
    assert_eq!(context.baseline_id, Some(baseline_id));

    // replaying the same message updates instead of creating again
    assert_eq!(pipeline.handle(&delivery(&message)).await, Disposition::Ack);
    assert_eq!(harness.sor.created.lock().unwrap().len(), 1);

    let updated = harness.sor.updated.lock().unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].0, "sor-obj-1");
}

#[tokio::test]
async fn test_inbound_baseline_bad_proof_dead_letters() {
    let harness = harness();
    let instance = cached_instance(&harness);
    harness.privacy.verify_result.store(false, Ordering::SeqCst);

    let pipeline = Arc::new(InboundPipeline::new(harness.ctx.clone()));
    harness
        .ctx
        .bus
        .subscribe(SUBJECT_INBOUND, quick_config(4), 1, pipeline);

    let message = baseline_message(Uuid::new_v4(), instance.id);
    harness
        .ctx
        .bus
        .publish(SUBJECT_INBOUND, serde_json::to_vec(&message).unwrap())
        .unwrap();

    let bus = harness.ctx.bus.clone();
    wait_until(|| bus.dead_letters(SUBJECT_INBOUND).len() == 1).await;

    let stats = bus.stats(SUBJECT_INBOUND);
    assert_eq!(stats.delivered, 4);
    // the system of record is never touched on a rejected proof
    assert!(harness.sor.created.lock().unwrap().is_empty());
    assert!(harness.sor.updated.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_inbound_malformed_and_unknown_opcode_terminate() {
    let harness = harness();
    let pipeline = InboundPipeline::new(harness.ctx.clone());

    let malformed = Delivery {
        subject: SUBJECT_INBOUND.into(),
        payload: b"not json".to_vec(),
        deliveries: 1,
    };
    assert_eq!(pipeline.handle(&malformed).await, Disposition::Term);

    let unknown_opcode = Delivery {
        subject: SUBJECT_INBOUND.into(),
        payload: br#"{"opcode":"NOPE","payload":{}}"#.to_vec(),
        deliveries: 1,
    };
    assert_eq!(pipeline.handle(&unknown_opcode).await, Disposition::Term);

    let missing_opcode = Delivery {
        subject: SUBJECT_INBOUND.into(),
        payload: br#"{"payload":{}}"#.to_vec(),
        deliveries: 1,
    };
    assert_eq!(pipeline.handle(&missing_opcode).await, Disposition::Term);
}

#[tokio::test]
async fn test_inbound_sync_workflow_caches_under_both_keys() {
    let harness = harness();
    let pipeline = InboundPipeline::new(harness.ctx.clone());

    let workflow_id = Uuid::new_v4();
    let baseline_id = Uuid::new_v4();
    let message = ProtocolMessage {
        baseline_id: Some(baseline_id),
        opcode: Some(Opcode::Sync),
        identifier: Some(workflow_id),
        message_type: Some("purchase_order".into()),
        payload: Some(ProtocolMessagePayload {
            object: Some(json!({
                "id": workflow_id,
                "status": "init",
                "participants": [{"address": PEER_ADDRESS}],
                "shield": "0xshield",
                "worksteps": [{
                    "id": Uuid::new_v4(),
                    "name": "s1",
                    "cardinality": 1,
                    "status": "init",
                    "prover": {"identifier": "abc", "proving_scheme": "groth16", "curve": "BN256"}
                }],
            })),
            payload_type: Some(PAYLOAD_TYPE_WORKFLOW.into()),
            witness: None,
            proof: None,
        }),
        ..Default::default()
    };

    assert_eq!(pipeline.handle(&delivery(&message)).await, Disposition::Ack);

    // a prover was provisioned per workstep
    assert_eq!(harness.privacy.created.lock().unwrap().len(), 1);

    let by_id = harness.ctx.records.lookup_workflow(&workflow_id).unwrap();
    let by_baseline = harness
        .ctx
        .records
        .lookup_workflow_by_baseline_id(&baseline_id)
        .unwrap();
    assert_eq!(by_id.id, by_baseline.id);
    assert!(by_id.worksteps[0].prover_id.is_some());
}

#[tokio::test]
async fn test_inbound_sync_unknown_payload_type_is_noop() {
    let harness = harness();
    let pipeline = InboundPipeline::new(harness.ctx.clone());

    let message = ProtocolMessage {
        opcode: Some(Opcode::Sync),
        payload: Some(ProtocolMessagePayload {
            object: Some(json!({})),
            payload_type: Some("bogus".into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    assert_eq!(pipeline.handle(&delivery(&message)).await, Disposition::Ack);
    assert!(harness.privacy.created.lock().unwrap().is_empty());
}

// ── Outbound ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_outbound_create_baselines_and_fans_out() {
    let harness = harness();
    deployed_prototype(&harness).await;

    let capture = CaptureHandler::new();
    harness.ctx.bus.subscribe(
        SUBJECT_PROTOCOL_MESSAGE_OUTBOUND,
        quick_config(10),
        1,
        capture.clone(),
    );

    let pipeline = OutboundPipeline::new(harness.ctx.clone());
    let mut message = Message {
        id: Some("sor-1".into()),
        message_type: Some("purchase_order".into()),
        payload: Some(json!({"total": 100})),
        ..Default::default()
    };

    let protocol_message = pipeline.baseline_outbound(&mut message).await.unwrap();

    assert_eq!(protocol_message.opcode, Some(Opcode::Baseline));
    assert!(protocol_message.baseline_id.is_some());
    assert_eq!(protocol_message.shield.as_deref(), Some("0xshield"));

    let payload = protocol_message.payload.as_ref().unwrap();
    let witness = payload.witness.as_ref().unwrap();
    assert!(witness.get("Document.Hash").is_some());
    assert!(witness.get("Document.Preimage").is_some());
    assert_eq!(payload.proof, Some(json!("proof-material")));

    // the internal id now resolves to the baseline thread
    let record = harness
        .ctx
        .records
        .lookup_record_by_internal_id("sor-1")
        .unwrap();
    assert_eq!(record.baseline_id, protocol_message.baseline_id);

    // one SYNC(workflow) and one BASELINE for the peer; self is skipped
    let capture_handle = capture.clone();
    wait_until(move || capture_handle.messages.lock().unwrap().len() == 2).await;

    let published = capture.protocol_messages();
    assert!(published
        .iter()
        .all(|m| m.recipient.as_deref() == Some(PEER_ADDRESS)));
    let opcodes: Vec<Opcode> = published.iter().filter_map(|m| m.opcode).collect();
    assert!(opcodes.contains(&Opcode::Sync));
    assert!(opcodes.contains(&Opcode::Baseline));

    // the system of record observed a success status
    let statuses = harness.sor.statuses.lock().unwrap();
    let (id, status) = statuses.last().unwrap();
    assert_eq!(id, "sor-1");
    assert_eq!(status["status"], "success");
    assert_eq!(status["type"], "purchase_order");
}

#[tokio::test]
async fn test_outbound_requires_id_type_and_payload() {
    let harness = harness();
    let pipeline = OutboundPipeline::new(harness.ctx.clone());

    let mut message = Message::default();
    let errors = pipeline.baseline_outbound(&mut message).await.unwrap_err();
    assert_eq!(errors, vec!["id is required".to_string()]);

    let mut message = Message {
        id: Some("sor-1".into()),
        ..Default::default()
    };
    let errors = pipeline.baseline_outbound(&mut message).await.unwrap_err();
    assert_eq!(errors, vec!["type is required".to_string()]);

    let mut message = Message {
        id: Some("sor-1".into()),
        message_type: Some("purchase_order".into()),
        ..Default::default()
    };
    let errors = pipeline.baseline_outbound(&mut message).await.unwrap_err();
    assert_eq!(errors, vec!["payload is required".to_string()]);
}

#[tokio::test]
async fn test_outbound_without_prototype_reports_error_status() {
    let harness = harness();
    let pipeline = OutboundPipeline::new(harness.ctx.clone());

    let mut message = Message {
        id: Some("sor-1".into()),
        message_type: Some("unmapped_type".into()),
        payload: Some(json!({"total": 1})),
        ..Default::default()
    };

    let errors = pipeline.baseline_outbound(&mut message).await.unwrap_err();
    assert!(!errors.is_empty());

    let statuses = harness.sor.statuses.lock().unwrap();
    let (id, status) = statuses.last().unwrap();
    assert_eq!(id, "sor-1");
    assert_eq!(status["status"], "error");
}

#[tokio::test]
async fn test_outbound_witness_is_stable_across_runs() {
    let harness = harness();
    deployed_prototype(&harness).await;
    let pipeline = OutboundPipeline::new(harness.ctx.clone());

    let mut first = Message {
        id: Some("sor-1".into()),
        message_type: Some("purchase_order".into()),
        payload: Some(json!({"total": 100})),
        ..Default::default()
    };
    let mut second = Message {
        id: Some("sor-1".into()),
        baseline_id: None,
        message_type: Some("purchase_order".into()),
        payload: Some(json!({"total": 100})),
        ..Default::default()
    };

    let a = pipeline.baseline_outbound(&mut first).await.unwrap();
    let b = pipeline.baseline_outbound(&mut second).await.unwrap();

    let witness_a = a.payload.unwrap().witness.unwrap();
    let witness_b = b.payload.unwrap().witness.unwrap();
    assert_eq!(witness_a, witness_b);
}

// ── Dispatcher ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_dispatch_resolves_endpoint_and_publishes() {
    let harness = harness();
    let gateway = MockPeerGateway::new(Some("vc-bearer"));
    let dispatcher = Dispatcher::new(harness.ctx.clone(), gateway.clone());

    let message = baseline_message(Uuid::new_v4(), Uuid::new_v4());
    let message = message.for_recipient(PEER_ADDRESS);
    let delivery = Delivery {
        subject: SUBJECT_PROTOCOL_MESSAGE_OUTBOUND.into(),
        payload: serde_json::to_vec(&message).unwrap(),
        deliveries: 1,
    };

    assert_eq!(dispatcher.handle(&delivery).await, Disposition::Ack);

    // endpoint resolved via the registry and cached
    assert_eq!(*harness.chain.calls.lock().unwrap(), 1);
    let cached = harness
        .ctx
        .directory
        .lookup_organization(PEER_ADDRESS)
        .unwrap();
    assert_eq!(cached.url.as_deref(), Some(PEER_ENDPOINT));

    // raw bytes published to the peer's `baseline` subject
    let published = gateway.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    let (endpoint, subject, payload) = &published[0];
    assert_eq!(endpoint, PEER_ENDPOINT);
    assert_eq!(subject, "baseline");
    assert_eq!(payload, &delivery.payload);
}

#[tokio::test]
async fn test_dispatch_requires_recipient() {
    let harness = harness();
    let gateway = MockPeerGateway::new(Some("vc-bearer"));
    let dispatcher = Dispatcher::new(harness.ctx.clone(), gateway);

    let mut message = baseline_message(Uuid::new_v4(), Uuid::new_v4());
    message.recipient = None;
    let delivery = Delivery {
        subject: SUBJECT_PROTOCOL_MESSAGE_OUTBOUND.into(),
        payload: serde_json::to_vec(&message).unwrap(),
        deliveries: 1,
    };

    assert_eq!(dispatcher.handle(&delivery).await, Disposition::Term);
}

#[tokio::test]
async fn test_dispatch_unresolvable_endpoint_naks() {
    let harness = harness();
    let gateway = MockPeerGateway::new(Some("vc-bearer"));
    let dispatcher = Dispatcher::new(harness.ctx.clone(), gateway.clone());

    let message = baseline_message(Uuid::new_v4(), Uuid::new_v4()).for_recipient("0xunknown");
    let delivery = Delivery {
        subject: SUBJECT_PROTOCOL_MESSAGE_OUTBOUND.into(),
        payload: serde_json::to_vec(&message).unwrap(),
        deliveries: 1,
    };

    assert_eq!(dispatcher.handle(&delivery).await, Disposition::Nak);
    assert!(gateway.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dispatch_credential_failure_naks() {
    let harness = harness();
    let gateway = MockPeerGateway::new(None);
    let dispatcher = Dispatcher::new(harness.ctx.clone(), gateway.clone());

    let message = baseline_message(Uuid::new_v4(), Uuid::new_v4()).for_recipient(PEER_ADDRESS);
    let delivery = Delivery {
        subject: SUBJECT_PROTOCOL_MESSAGE_OUTBOUND.into(),
        payload: serde_json::to_vec(&message).unwrap(),
        deliveries: 1,
    };

    assert_eq!(dispatcher.handle(&delivery).await, Disposition::Nak);
    assert!(gateway.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dispatch_publish_failure_naks_then_recovers() {
    let harness = harness();
    let gateway = MockPeerGateway::new(Some("vc-bearer"));
    gateway.fail_publish.store(true, Ordering::SeqCst);
    let dispatcher = Dispatcher::new(harness.ctx.clone(), gateway.clone());

    let message = baseline_message(Uuid::new_v4(), Uuid::new_v4()).for_recipient(PEER_ADDRESS);
    let delivery = Delivery {
        subject: SUBJECT_PROTOCOL_MESSAGE_OUTBOUND.into(),
        payload: serde_json::to_vec(&message).unwrap(),
        deliveries: 1,
    };

    assert_eq!(dispatcher.handle(&delivery).await, Disposition::Nak);

    // redelivery succeeds once the peer is reachable again
    gateway.fail_publish.store(false, Ordering::SeqCst);
    assert_eq!(dispatcher.handle(&delivery).await, Disposition::Ack);
    assert_eq!(gateway.published.lock().unwrap().len(), 1);
}
