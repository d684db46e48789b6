//! HTTP edge
//!
//! A thin front door over the pipelines and the registry. Every resource
//! handler requires an organization subject (401) matching the configured
//! organization (403); validation failures render 422 with an error list;
//! unimplemented BPI endpoints render 501.

mod auth;
mod bpi;
mod config;
mod credentials;
mod mappings;
mod objects;
mod workflows;
mod workgroups;
mod worksteps;

pub use auth::authorized_organization_id;

use crate::context::ProxyContext;
use crate::pipeline::OutboundPipeline;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ProxyContext>,
    pub outbound: Arc<OutboundPipeline>,
}

impl AppState {
    pub fn new(ctx: Arc<ProxyContext>) -> Self {
        let outbound = Arc::new(OutboundPipeline::new(ctx.clone()));
        Self { ctx, outbound }
    }
}

/// Create the public API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // system of record proxy objects
        .route("/objects", post(objects::create_object))
        .route("/objects/:id", put(objects::update_object))
        // backward compatible aliases
        .route("/business_objects", post(objects::create_object))
        .route("/business_objects/:id", put(objects::update_object))
        // config
        .route("/config", get(config::config_details))
        .route("/config", put(config::update_config))
        // credentials
        .route("/credentials", post(credentials::issue_credential))
        // workgroups
        .route("/workgroups", get(workgroups::list_workgroups))
        .route("/workgroups", post(workgroups::create_workgroup))
        .route("/workgroups/:id", get(workgroups::workgroup_details))
        // workflows
        .route("/workflows", get(workflows::list_workflows))
        .route("/workflows", post(workflows::create_workflow))
        .route("/workflows/:id", get(workflows::workflow_details))
        .route("/workflows/:id", put(workflows::update_workflow))
        .route("/workflows/:id", delete(workflows::delete_workflow))
        .route("/workflows/:id/deploy", post(workflows::deploy_workflow))
        .route("/workflows/:id/versions", get(workflows::list_workflow_versions))
        .route("/workflows/:id/versions", post(workflows::version_workflow))
        // worksteps
        .route("/worksteps", get(worksteps::list_all_worksteps))
        .route("/workflows/:id/worksteps", get(worksteps::list_worksteps))
        .route("/workflows/:id/worksteps", post(worksteps::create_workstep))
        .route(
            "/workflows/:id/worksteps/:workstep_id",
            get(worksteps::workstep_details),
        )
        .route(
            "/workflows/:id/worksteps/:workstep_id",
            put(worksteps::update_workstep),
        )
        .route(
            "/workflows/:id/worksteps/:workstep_id",
            delete(worksteps::delete_workstep),
        )
        .route(
            "/workflows/:id/worksteps/:workstep_id/execute",
            post(worksteps::execute_workstep),
        )
        // mappings
        .route("/mappings", get(mappings::list_mappings))
        .route("/mappings", post(mappings::create_mapping))
        .route("/mappings/:id", put(mappings::update_mapping))
        .route("/mappings/:id", delete(mappings::delete_mapping))
        // BPI abstraction layer (unimplemented)
        .route("/protocol_messages", post(bpi::unimplemented_handler))
        .route("/bpi_accounts", get(bpi::unimplemented_handler))
        .route("/bpi_accounts/:id", get(bpi::unimplemented_handler))
        .route("/bpi_accounts", post(bpi::unimplemented_handler))
        .route("/subjects", get(bpi::unimplemented_handler))
        .route("/subjects/:id", get(bpi::unimplemented_handler))
        .route("/subjects", post(bpi::unimplemented_handler))
        .route("/subjects/:id", put(bpi::unimplemented_handler));

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    if state.ctx.config.server.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
