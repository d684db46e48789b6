//! Workflow registry integration tests: the prototype lifecycle, the
//! deployment loop driven end-to-end over the bus, and mapping updates.

mod support;

use baseline_bus::{subject, ConsumerConfig};
use baseline_proxy::pipeline::{
    WorkflowDeployHandler, WorkstepDeployHandler, WorkstepFinalizeDeployHandler,
};
use baseline_proxy::registry::{WorkflowPatch, WorkstepPatch};
use baseline_types::{
    Mapping, Participant, Workflow, WorkflowStatus, Workgroup, Workstep, WorkstepStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{harness, TestHarness, ORG_ADDRESS, PEER_ADDRESS};
use uuid::Uuid;

async fn wait_until<F>(predicate: F)
where
    F: Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool>>>,
{
    for _ in 0..100 {
        if predicate().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within timeout");
}

async fn draft_prototype(harness: &TestHarness) -> Workflow {
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

    let mut workflow = Workflow::new("A", Some(workgroup.id), Some("0.1".into()));
    workflow.participants = workgroup.participants.clone();
    ctx.registry.create_workflow(workflow).await.unwrap()
}

#[tokio::test]
async fn test_prototype_lifecycle_with_deployment_loop() {
    let harness = harness();
    let ctx = harness.ctx.clone();

    // subscribe the deployment loop consumers
    let config = ConsumerConfig {
        ack_wait: Duration::from_millis(500),
        max_in_flight: 16,
        max_deliveries: 10,
    };
    ctx.bus.subscribe(
        subject::SUBJECT_WORKSTEP_DEPLOY,
        config.clone(),
        2,
        Arc::new(WorkstepDeployHandler::new(ctx.clone())),
    );
    ctx.bus.subscribe(
        subject::SUBJECT_WORKSTEP_FINALIZE_DEPLOY,
        config.clone(),
        2,
        Arc::new(WorkstepFinalizeDeployHandler::new(ctx.clone())),
    );
    ctx.bus.subscribe(
        subject::SUBJECT_WORKFLOW_DEPLOY,
        config,
        2,
        Arc::new(WorkflowDeployHandler::new(ctx.clone())),
    );

    // create: draft prototype
    let workflow = draft_prototype(&harness).await;
    assert_eq!(workflow.status, WorkflowStatus::Draft);

    // append a workstep at cardinality 1
    let workstep = ctx
        .registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "s1", 1))
        .await
        .unwrap();
    assert_eq!(workstep.cardinality, 1);
    assert_eq!(workstep.status, WorkstepStatus::Draft);

    // deploy fans out and the loop converges on `deployed`
    let pending = ctx.registry.deploy_workflow(&workflow.id).await.unwrap();
    assert_eq!(pending.status, WorkflowStatus::PendingDeployment);

    let registry = ctx.registry.clone();
    let workflow_id = workflow.id;
    wait_until(move || {
        let registry = registry.clone();
        Box::pin(async move {
            registry
                .get_workflow(&workflow_id)
                .await
                .unwrap()
                .map(|w| w.status == WorkflowStatus::Deployed)
                .unwrap_or(false)
        })
    })
    .await;

    let deployed = ctx
        .registry
        .get_workflow(&workflow.id)
        .await
        .unwrap()
        .unwrap();
    assert!(deployed.deployed_at.is_some());

    let workstep = ctx
        .registry
        .get_workstep(&workstep.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(workstep.status, WorkstepStatus::Deployed);
    assert!(workstep.prover_id.is_some());

    // version: cloned worksteps, status reset to draft
    let clone = ctx
        .registry
        .version_workflow(&workflow.id, "0.2", None, None)
        .await
        .unwrap();
    assert_eq!(clone.status, WorkflowStatus::Draft);
    assert_eq!(clone.version.as_deref(), Some("0.2"));
    assert_ne!(clone.id, workflow.id);

    let cloned_steps = ctx.registry.list_worksteps(&clone.id).await.unwrap();
    assert_eq!(cloned_steps.len(), 1);
    assert_eq!(cloned_steps[0].cardinality, 1);
    assert_eq!(cloned_steps[0].status, WorkstepStatus::Draft);
    assert!(cloned_steps[0].prover_id.is_none());

    let versions = ctx
        .registry
        .list_workflow_versions(&workflow.id)
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(
        versions.last().unwrap().version.as_deref(),
        Some("0.2")
    );
}

#[tokio::test]
async fn test_version_requires_non_draft_prototype() {
    let harness = harness();
    let workflow = draft_prototype(&harness).await;

    let err = harness
        .ctx
        .registry
        .version_workflow(&workflow.id, "0.2", None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("draft"));
}

#[tokio::test]
async fn test_delete_refused_for_non_draft() {
    let harness = harness();
    let ctx = harness.ctx.clone();
    let workflow = draft_prototype(&harness).await;

    ctx.registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "s1", 0))
        .await
        .unwrap();
    ctx.registry.deploy_workflow(&workflow.id).await.unwrap();

    let err = ctx.registry.delete_workflow(&workflow.id).await.unwrap_err();
    assert!(err.to_string().contains("draft"));

    // draft prototypes delete cleanly, cascading worksteps
    let other = draft_prototype(&harness).await;
    let workstep = ctx
        .registry
        .add_workstep(&other.id, Workstep::new(other.id, "s1", 0))
        .await
        .unwrap();
    ctx.registry.delete_workflow(&other.id).await.unwrap();
    assert!(ctx.registry.get_workflow(&other.id).await.unwrap().is_none());
    assert!(ctx
        .registry
        .get_workstep(&workstep.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_workstep_guards() {
    let harness = harness();
    let ctx = harness.ctx.clone();
    let workflow = draft_prototype(&harness).await;

    let first = ctx
        .registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "s1", 0))
        .await
        .unwrap();
    assert_eq!(first.cardinality, 1);

    // cardinality re-use is a conflict
    let err = ctx
        .registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "dup", 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cardinality"));

    // cardinality gaps are rejected
    let err = ctx
        .registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "gap", 5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cardinality"));

    // status is immutable through the update path
    let err = ctx
        .registry
        .update_workstep(
            &workflow.id,
            &first.id,
            WorkstepPatch {
                status: Some(WorkstepStatus::Deployed),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("status"));

    // worksteps cannot be added once the prototype leaves draft
    ctx.registry.deploy_workflow(&workflow.id).await.unwrap();
    let err = ctx
        .registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "late", 0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("non-draft"));
}

#[tokio::test]
async fn test_delete_workstep_resequences_cardinalities() {
    let harness = harness();
    let ctx = harness.ctx.clone();
    let workflow = draft_prototype(&harness).await;

    let mut steps = Vec::new();
    for name in ["s1", "s2", "s3"] {
        steps.push(
            ctx.registry
                .add_workstep(&workflow.id, Workstep::new(workflow.id, name, 0))
                .await
                .unwrap(),
        );
    }

    ctx.registry
        .delete_workstep(&workflow.id, &steps[1].id)
        .await
        .unwrap();

    let remaining = ctx.registry.list_worksteps(&workflow.id).await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(
        remaining.iter().map(|w| w.cardinality).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(remaining[1].name.as_deref(), Some("s3"));
}

#[tokio::test]
async fn test_workflow_update_cannot_regress_status() {
    let harness = harness();
    let ctx = harness.ctx.clone();
    let workflow = draft_prototype(&harness).await;

    ctx.registry
        .add_workstep(&workflow.id, Workstep::new(workflow.id, "s1", 0))
        .await
        .unwrap();
    ctx.registry.deploy_workflow(&workflow.id).await.unwrap();

    let err = ctx
        .registry
        .update_workflow(
            &workflow.id,
            WorkflowPatch {
                status: Some(WorkflowStatus::Draft),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("status"));
}

#[tokio::test]
async fn test_mapping_wholesale_update() {
    let harness = harness();
    let ctx = harness.ctx.clone();
    let organization_id = ctx.organization_id().unwrap();

    let mut mapping: Mapping = serde_json::from_value(json!({
        "name": "PO",
        "type": "purchase_order",
        "workgroup_id": Uuid::new_v4(),
        "models": [{
            "type": "PurchaseOrder",
            "fields": [
                {"name": "id", "is_primary_key": true},
                {"name": "total"},
            ],
        }],
    }))
    .unwrap();
    mapping.organization_id = Some(organization_id);

    let created = ctx.registry.create_mapping(mapping).await.unwrap();
    let original_ref = created.mapping_ref.clone().unwrap();
    assert_eq!(original_ref.len(), 64);
    assert_eq!(created.models.len(), 1);
    assert_eq!(created.models[0].fields.len(), 2);
    assert_eq!(created.models[0].mapping_id, created.id);

    // wholesale update replaces every model and recomputes the ref
    let patch: Mapping = serde_json::from_value(json!({
        "name": "PO v2",
        "type": "purchase_order_v2",
        "models": [
            {"type": "PurchaseOrder", "fields": [{"name": "id"}]},
            {"type": "LineItem", "fields": [{"name": "sku"}, {"name": "qty"}]},
        ],
    }))
    .unwrap();

    let updated = ctx.registry.update_mapping(&created.id, patch).await.unwrap();
    assert_eq!(updated.models.len(), 2);
    assert_ne!(updated.mapping_ref.as_deref(), Some(original_ref.as_str()));

    let fetched = ctx.registry.get_mapping(&created.id).await.unwrap().unwrap();
    assert_eq!(fetched.models.len(), 2);
    assert!(fetched
        .models
        .iter()
        .all(|model| model.mapping_id == created.id));

    // an invalid patch (client-supplied ref) leaves the mapping intact
    let bad_patch: Mapping = serde_json::from_value(json!({
        "name": "PO v3",
        "type": "purchase_order_v3",
        "ref": "deadbeef",
        "models": [],
    }))
    .unwrap();
    assert!(ctx
        .registry
        .update_mapping(&created.id, bad_patch)
        .await
        .is_err());

    let unchanged = ctx.registry.get_mapping(&created.id).await.unwrap().unwrap();
    assert_eq!(unchanged.models.len(), 2);
    assert_eq!(unchanged.mapping_type.as_deref(), Some("purchase_order_v2"));
}

#[tokio::test]
async fn test_create_workflow_requires_participants() {
    let harness = harness();

    let workflow = Workflow::new("empty", Some(Uuid::new_v4()), Some("0.1".into()));
    let err = harness
        .ctx
        .registry
        .create_workflow(workflow)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("participant"));
}
