pub mod allocations;
pub mod auth;
pub mod error;
pub mod nodes;
pub mod remote;
pub mod servers;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::daemon::DaemonClient;
use crate::db::DbPool;
use crate::services::{
    CommandDispatcher, ConfigSynchronizer, DeployTokens, HostResolver,
};
use crate::types::HealthResponse;
use auth::{Authorizer, KeyAuthorizer};

pub struct AppState {
    pub db: DbPool,
    pub sync: ConfigSynchronizer,
    pub dispatcher: CommandDispatcher,
    pub resolver: Arc<dyn HostResolver>,
    pub deploy_tokens: DeployTokens,
    pub authorizer: Arc<dyn Authorizer>,
    /// Whether the panel itself serves TLS. Fixed at startup.
    pub secured: bool,
}

impl AppState {
    pub fn new(
        settings: &Settings,
        db: DbPool,
        resolver: Arc<dyn HostResolver>,
    ) -> anyhow::Result<Self> {
        let daemon = DaemonClient::new(settings.daemon_timeouts)?;
        let secured = settings.is_secured();

        Ok(Self {
            sync: ConfigSynchronizer::new(
                db.clone(),
                daemon.clone(),
                resolver.clone(),
                settings.panel_url.clone(),
                secured,
            ),
            dispatcher: CommandDispatcher::new(db.clone(), daemon),
            db,
            resolver,
            deploy_tokens: DeployTokens::default(),
            authorizer: Arc::new(KeyAuthorizer::new(
                &settings.admin_key,
                settings.console_key.as_deref(),
            )),
            secured,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Node management
        .route("/api/nodes/validate", post(nodes::validate_address))
        .route("/api/nodes", post(nodes::create_node).get(nodes::list_nodes))
        .route("/api/nodes/:id", get(nodes::get_node).delete(nodes::delete_node))
        .route("/api/nodes/:id/settings", patch(nodes::update_settings))
        .route("/api/nodes/:id/limits", patch(nodes::update_limits))
        .route("/api/nodes/:id/token/reset", post(nodes::reset_token))
        .route("/api/nodes/:id/sync", post(nodes::sync_node))
        .route("/api/nodes/:id/configuration", get(nodes::get_configuration))
        .route("/api/nodes/:id/bootstrap", post(nodes::bootstrap))
        .route("/api/nodes/:id/system", post(nodes::refresh_system_information))
        // Allocations
        .route(
            "/api/nodes/:id/allocations",
            post(allocations::create_allocations).get(allocations::list_allocations),
        )
        .route(
            "/api/nodes/:id/allocations/:allocation_id",
            axum::routing::delete(allocations::delete_allocation),
        )
        // Server management
        .route("/api/servers", post(servers::create_server).get(servers::list_servers))
        .route("/api/servers/:id", get(servers::get_server).delete(servers::delete_server))
        .route("/api/servers/:id/build", patch(servers::update_build))
        .route("/api/servers/:id/allocation", patch(servers::change_primary_allocation))
        .route("/api/servers/:id/command", post(servers::send_command))
        // Daemon-facing
        .route("/api/remote/servers", get(remote::list_servers))
        .route(
            "/api/application/nodes/:id/configuration",
            get(remote::bootstrap_configuration),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            secured: state.secured,
        }),
    )
}
