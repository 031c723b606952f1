use axum::{
    extract::{Path, State},
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
use crate::services::allocations;
use crate::types::{CreateAllocationsRequest, ListAllocationsResponse};

/// POST /api/nodes/:id/allocations - Add IP/port allocations to a node
pub async fn create_allocations(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
    Json(req): Json<CreateAllocationsRequest>,
) -> Result<(StatusCode, Json<ListAllocationsResponse>), ApiError> {
    require_settings(&state, &operator)?;

    let ports = allocations::parse_ports(&req.ports)?;
    let alias = req.alias.filter(|a| !a.trim().is_empty());

    let created = execute_async(&state.db, move |conn| {
        allocations::create_allocations(conn, node_id, &req.ip, &ports, alias.as_deref())
    })
    .await?;

    info!("Created {} allocation(s) on node {}", created.len(), node_id);
    Ok((
        StatusCode::CREATED,
        Json(ListAllocationsResponse {
            allocations: created,
        }),
    ))
}

/// GET /api/nodes/:id/allocations - List a node's allocations
pub async fn list_allocations(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<Json<ListAllocationsResponse>, ApiError> {
    require_settings(&state, &operator)?;

    let allocations = execute_async(&state.db, move |conn| {
        crate::services::node_registry::get_node(conn, node_id)?;
        allocations::list_allocations(conn, node_id)
    })
    .await?;
    Ok(Json(ListAllocationsResponse { allocations }))
}

/// DELETE /api/nodes/:id/allocations/:allocation_id - Remove an unassigned allocation
pub async fn delete_allocation(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path((node_id, allocation_id)): Path<(Uuid, i64)>,
) -> Result<StatusCode, ApiError> {
    require_settings(&state, &operator)?;

    execute_async(&state.db, move |conn| {
        allocations::delete_allocation(conn, node_id, allocation_id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
