use axum::{
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::auth::{bearer, DaemonNode};
use super::error::ApiError;
use super::AppState;
use crate::db::execute_async;
use crate::services::{allocations, server_registry};
use crate::types::{RemoteServer, RemoteServersResponse};

/// GET /api/remote/servers - Servers the calling daemon should host
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    DaemonNode(node_id): DaemonNode,
) -> Result<Json<RemoteServersResponse>, ApiError> {
    let data = execute_async(&state.db, move |conn| {
        let servers = server_registry::list_servers(conn, Some(node_id))?;
        let mut data = Vec::with_capacity(servers.len());
        for server in servers {
            let addresses = allocations::list_server_allocations(conn, server.server_id)?
                .iter()
                .map(|a| a.address())
                .collect();
            data.push(RemoteServer {
                uuid: server.server_id,
                name: server.name,
                memory: server.resources.memory,
                disk: server.resources.disk,
                cpu: server.resources.cpu,
                allocations: addresses,
            });
        }
        Ok(data)
    })
    .await?;

    Ok(Json(RemoteServersResponse { data }))
}

/// Bearer credential presented by a daemon being bootstrapped.
pub struct InstallToken(String);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for InstallToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        bearer(parts)
            .map(|t| InstallToken(t.to_string()))
            .ok_or_else(|| ApiError::unauthorized("missing install token"))
    }
}

/// GET /api/application/nodes/:id/configuration - Configuration fetch during bootstrap
pub async fn bootstrap_configuration(
    State(state): State<Arc<AppState>>,
    InstallToken(token): InstallToken,
    Path(node_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.deploy_tokens.authorizes(&token, node_id) {
        warn!("Rejected install token for node {}", node_id);
        return Err(ApiError::unauthorized("invalid or expired install token"));
    }

    let yaml = state.sync.render(node_id).await?;
    info!("Served bootstrap configuration for node {}", node_id);
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}
