use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::auth::{require_settings, Operator};
use super::error::ApiError;
use super::AppState;
use crate::db::execute_async;
use crate::error::ControlError;
use crate::model::{Dimension, Node, ResourceLimit, ResourceLimits, SystemInformation};
use crate::services::bootstrap::{self, INSTALL_TOKEN_TTL};
use crate::services::capacity::{self, DimensionLimit};
use crate::services::node_registry::{self, NodeSettings};
use crate::services::{eligibility, token_manager, SyncOutcome};
use crate::types::{
    BootstrapRequest, BootstrapResponse, CreateNodeRequest, CreateNodeResponse, ListNodesResponse,
    NodeMutationResponse, ResetTokenResponse, SyncReport, UpdateNodeLimitsRequest,
    UpdateNodeSettingsRequest, ValidateAddressRequest, ValidateAddressResponse,
};

fn outcome_status(outcome: &SyncOutcome) -> StatusCode {
    if outcome.is_synced() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    }
}

/// Absent keeps the current value; `null` or a blank string clears it.
fn merge_clearable(submitted: Option<Option<String>>, current: Option<String>) -> Option<String> {
    match submitted {
        None => current,
        Some(value) => value.filter(|v| !v.trim().is_empty()),
    }
}

fn normalized_limit(dimension: Dimension, limit: DimensionLimit) -> Result<ResourceLimit, ControlError> {
    capacity::validate_limit(dimension, limit)?;
    Ok(limit.normalize())
}

/// POST /api/nodes/validate - Check DNS and TLS eligibility of an address
pub async fn validate_address(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Json(req): Json<ValidateAddressRequest>,
) -> Result<Json<ValidateAddressResponse>, ApiError> {
    require_settings(&state, &operator)?;

    let report =
        eligibility::validate(state.resolver.as_ref(), req.address.trim(), state.secured).await;
    Ok(Json(ValidateAddressResponse {
        default_scheme: report.default_scheme(),
        is_literal_ip: report.is_literal_ip,
        dns_resolved: report.dns_resolved,
        resolved_ip: report.resolved_ip,
        tls_eligible: report.tls_eligible,
    }))
}

/// POST /api/nodes - Register a node and issue its daemon token
pub async fn create_node(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Json(req): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<CreateNodeResponse>), ApiError> {
    require_settings(&state, &operator)?;

    let fqdn = req.fqdn.trim().to_string();
    let report = eligibility::validate(state.resolver.as_ref(), &fqdn, state.secured).await;
    let scheme = req.scheme.unwrap_or_else(|| report.default_scheme());
    eligibility::check_scheme(&report, scheme, state.secured)?;

    let settings = NodeSettings {
        name: req
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| node_registry::default_node_name(&fqdn)),
        description: req.description,
        fqdn,
        scheme,
        daemon_listen: req.daemon_listen,
        daemon_sftp: req.daemon_sftp,
        daemon_sftp_alias: req.daemon_sftp_alias,
        upload_size: req.upload_size,
        public: req.public,
        maintenance_mode: req.maintenance_mode,
        tags: req.tags,
    };
    settings.validate()?;

    let mut limits = ResourceLimits::default();
    for (dimension, limit) in [
        (Dimension::Memory, req.memory),
        (Dimension::Disk, req.disk),
        (Dimension::Cpu, req.cpu),
    ] {
        limits.set(dimension, normalized_limit(dimension, limit)?);
    }

    info!(
        "Registering node: fqdn={}, scheme={}, dns_resolved={}",
        settings.fqdn, settings.scheme, report.dns_resolved
    );

    let (node, token) = execute_async(&state.db, move |conn| {
        node_registry::create_node(conn, &settings, &limits)
    })
    .await?;

    info!("Node registered: node_id={}", node.node_id);

    Ok((
        StatusCode::CREATED,
        Json(CreateNodeResponse {
            token_fingerprint: token_manager::fingerprint(&token),
            token_id: token.token_id,
            node,
        }),
    ))
}

/// GET /api/nodes - List all nodes
pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    operator: Operator,
) -> Result<Json<ListNodesResponse>, ApiError> {
    require_settings(&state, &operator)?;

    let nodes = execute_async(&state.db, move |conn| node_registry::list_nodes(conn)).await?;
    Ok(Json(ListNodesResponse { nodes }))
}

/// GET /api/nodes/:id - Get one node
pub async fn get_node(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<Json<Node>, ApiError> {
    require_settings(&state, &operator)?;

    let node = execute_async(&state.db, move |conn| node_registry::get_node(conn, node_id)).await?;
    Ok(Json(node))
}

/// PATCH /api/nodes/:id/settings - Edit a node and push the new configuration
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
    Json(req): Json<UpdateNodeSettingsRequest>,
) -> Result<(StatusCode, Json<NodeMutationResponse>), ApiError> {
    require_settings(&state, &operator)?;

    let secured = state.secured;
    let (mut node, outcome) = state
        .sync
        .apply(node_id, move |conn| {
            let current = node_registry::get_node(conn, node_id)?;
            let settings = NodeSettings {
                name: req.name.unwrap_or(current.name),
                description: merge_clearable(req.description, current.description),
                fqdn: req.fqdn.map(|f| f.trim().to_string()).unwrap_or(current.fqdn),
                scheme: req.scheme.unwrap_or(current.scheme),
                daemon_listen: req.daemon_listen.unwrap_or(current.daemon_listen),
                daemon_sftp: req.daemon_sftp.unwrap_or(current.daemon_sftp),
                daemon_sftp_alias: merge_clearable(
                    req.daemon_sftp_alias,
                    current.daemon_sftp_alias,
                ),
                upload_size: req.upload_size.unwrap_or(current.upload_size),
                public: req.public.unwrap_or(current.public),
                maintenance_mode: req.maintenance_mode.unwrap_or(current.maintenance_mode),
                tags: req.tags.unwrap_or(current.tags),
            };
            settings.validate()?;
            eligibility::check_address_scheme(&settings.fqdn, settings.scheme, secured)?;
            node_registry::update_settings(conn, node_id, &settings)
        })
        .await?;
    node.config_drift = !outcome.is_synced();

    info!("Node {} settings updated (synced={})", node_id, outcome.is_synced());

    Ok((
        outcome_status(&outcome),
        Json(NodeMutationResponse {
            node,
            sync: SyncReport::from(&outcome),
        }),
    ))
}

/// PATCH /api/nodes/:id/limits - Edit resource limits and push the new configuration
pub async fn update_limits(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
    Json(req): Json<UpdateNodeLimitsRequest>,
) -> Result<(StatusCode, Json<NodeMutationResponse>), ApiError> {
    require_settings(&state, &operator)?;

    let (mut node, outcome) = state
        .sync
        .apply(node_id, move |conn| {
            let mut limits = node_registry::get_node(conn, node_id)?.limits;
            for (dimension, submitted) in [
                (Dimension::Memory, req.memory),
                (Dimension::Disk, req.disk),
                (Dimension::Cpu, req.cpu),
            ] {
                if let Some(limit) = submitted {
                    limits.set(dimension, normalized_limit(dimension, limit)?);
                }
            }
            node_registry::update_limits(conn, node_id, &limits)
        })
        .await?;
    node.config_drift = !outcome.is_synced();

    Ok((
        outcome_status(&outcome),
        Json(NodeMutationResponse {
            node,
            sync: SyncReport::from(&outcome),
        }),
    ))
}

/// DELETE /api/nodes/:id - Delete a node that owns no servers
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_settings(&state, &operator)?;

    info!("Deleting node: {}", node_id);
    execute_async(&state.db, move |conn| node_registry::delete_node(conn, node_id)).await?;
    state.sync.forget(node_id);
    state.deploy_tokens.revoke_node(node_id);

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/nodes/:id/token/reset - Rotate the daemon token and push it
pub async fn reset_token(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ResetTokenResponse>), ApiError> {
    require_settings(&state, &operator)?;

    let (token, outcome) = state.sync.rotate_token(node_id).await?;
    Ok((
        outcome_status(&outcome),
        Json(ResetTokenResponse {
            node_id,
            token_fingerprint: token_manager::fingerprint(&token),
            token_id: token.token_id,
            sync: SyncReport::from(&outcome),
        }),
    ))
}

/// POST /api/nodes/:id/sync - Push the current configuration
pub async fn sync_node(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<Json<SyncReport>, ApiError> {
    require_settings(&state, &operator)?;

    match state.sync.push(node_id).await? {
        SyncOutcome::Synced => Ok(Json(SyncReport::from(&SyncOutcome::Synced))),
        SyncOutcome::Drift { cause } => {
            Err(ControlError::ConfigurationDrift { node_id, cause }.into())
        }
    }
}

/// GET /api/nodes/:id/configuration - Rendered daemon configuration (YAML)
pub async fn get_configuration(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_settings(&state, &operator)?;

    let yaml = state.sync.render(node_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}

/// POST /api/nodes/:id/bootstrap - One-line daemon install command
pub async fn bootstrap(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
    req: Option<Json<BootstrapRequest>>,
) -> Result<Json<BootstrapResponse>, ApiError> {
    require_settings(&state, &operator)?;

    let req = req.map(|Json(r)| r).unwrap_or_default();
    execute_async(&state.db, move |conn| node_registry::get_node(conn, node_id)).await?;

    let command = bootstrap::generate_bootstrap_command(
        &state.deploy_tokens,
        state.sync.panel_url(),
        node_id,
        state.secured,
        req.container_runtime,
    );
    Ok(Json(BootstrapResponse {
        command,
        expires_in_secs: INSTALL_TOKEN_TTL.as_secs(),
    }))
}

/// POST /api/nodes/:id/system - Refresh cached daemon system information
pub async fn refresh_system_information(
    State(state): State<Arc<AppState>>,
    operator: Operator,
    Path(node_id): Path<Uuid>,
) -> Result<Json<SystemInformation>, ApiError> {
    require_settings(&state, &operator)?;

    let info = state.sync.refresh_system_information(node_id).await?;
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_clearable() {
        let current = Some("rack 4".to_string());
        assert_eq!(merge_clearable(None, current.clone()), current);
        assert_eq!(merge_clearable(Some(None), current.clone()), None);
        assert_eq!(merge_clearable(Some(Some("  ".to_string())), current.clone()), None);
        assert_eq!(
            merge_clearable(Some(Some("rack 5".to_string())), current),
            Some("rack 5".to_string())
        );
    }
}
