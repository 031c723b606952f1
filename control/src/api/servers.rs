use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::auth::{require_settings, Operator};
use super::error::ApiError;
use super::AppState;
use crate::db::execute_async;
use crate::model::ResourceUsage;
use crate::services::allocations;
use crate::services::server_registry::{self, NewServer};
use crate::types::{
    ChangePrimaryAllocationRequest, CreateServerRequest, DispatchCommandRequest,
    ListServersQuery, ListServersResponse, ServerResponse, UpdateServerBuildRequest,
};

async fn server_response(state: &AppState, server_id: Uuid) -> Result<ServerResponse, ApiError> {
    let response = execute_async(&state.db, move |conn| {
        let server = server_registry::get_server(conn, server_id)?;
        let allocations = allocations::list_server_allocations(conn, server_id)?;
        Ok(ServerResponse {
            server,
            allocations,
        })
    })
    .await?;
    Ok(response)
}

/// POST /api/servers - Place a server on a node
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Json(req): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    require_settings(&state, &operator)?;

    info!(
        "Creating server: name={}, node_id={}, memory={}",
        req.name, req.node_id, req.memory
    );

    let new = NewServer {
        node_id: req.node_id,
        name: req.name,
        resources: ResourceUsage {
            memory: req.memory,
            disk: req.disk,
            cpu: req.cpu,
        },
        allocation_id: req.allocation_id,
        additional_allocations: req.additional_allocations,
    };
    let server = execute_async(&state.db, move |conn| server_registry::create_server(conn, &new))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(server_response(&state, server.server_id).await?),
    ))
}

/// GET /api/servers - List servers, optionally for one node
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    _operator: Operator,
    Query(query): Query<ListServersQuery>,
) -> Result<Json<ListServersResponse>, ApiError> {
    let servers = execute_async(&state.db, move |conn| {
        server_registry::list_servers(conn, query.node_id)
    })
    .await?;
    Ok(Json(ListServersResponse { servers }))
}

/// GET /api/servers/:id - Get a server with its allocations
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    _operator: Operator,
    Path(server_id): Path<Uuid>,
) -> Result<Json<ServerResponse>, ApiError> {
    Ok(Json(server_response(&state, server_id).await?))
}

/// PATCH /api/servers/:id/build - Resize a server
pub async fn update_build(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(server_id): Path<Uuid>,
    Json(req): Json<UpdateServerBuildRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    require_settings(&state, &operator)?;

    let resources = ResourceUsage {
        memory: req.memory,
        disk: req.disk,
        cpu: req.cpu,
    };
    execute_async(&state.db, move |conn| {
        server_registry::update_build(conn, server_id, &resources)
    })
    .await?;

    Ok(Json(server_response(&state, server_id).await?))
}

/// PATCH /api/servers/:id/allocation - Make another held allocation the primary one
pub async fn change_primary_allocation(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(server_id): Path<Uuid>,
    Json(req): Json<ChangePrimaryAllocationRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    require_settings(&state, &operator)?;

    execute_async(&state.db, move |conn| {
        server_registry::change_primary_allocation(conn, server_id, req.allocation_id)
    })
    .await?;

    Ok(Json(server_response(&state, server_id).await?))
}

/// DELETE /api/servers/:id - Delete a server and release its allocations
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(server_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_settings(&state, &operator)?;

    info!("Deleting server: {}", server_id);
    execute_async(&state.db, move |conn| server_registry::delete_server(conn, server_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/servers/:id/command - Send a console command
pub async fn send_command(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(server_id): Path<Uuid>,
    Json(req): Json<DispatchCommandRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.authorizer.can_control_console(&operator, server_id) {
        return Err(ApiError::forbidden("operator may not control this console"));
    }

    state.dispatcher.dispatch(server_id, &req.command).await?;
    Ok(StatusCode::NO_CONTENT)
}
