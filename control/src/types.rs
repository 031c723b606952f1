use serde::{Deserialize, Deserializer, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::daemon::DaemonError;
use crate::model::{Allocation, Node, Scheme, Server};
use crate::services::capacity::DimensionLimit;
use crate::services::SyncOutcome;

fn default_daemon_listen() -> u16 {
    8080
}

fn default_daemon_sftp() -> u16 {
    2022
}

fn default_upload_size() -> u32 {
    256
}

fn default_true() -> bool {
    true
}

fn default_unlimited() -> DimensionLimit {
    DimensionLimit::Unlimited
}

/// Tell an explicit `null` (`Some(None)`) apart from an absent field (`None`).
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ============================================================================
// Node Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateAddressRequest {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateAddressResponse {
    pub is_literal_ip: bool,
    pub dns_resolved: bool,
    pub resolved_ip: Option<IpAddr>,
    pub tls_eligible: bool,
    pub default_scheme: Scheme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub fqdn: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to what the address is eligible for.
    #[serde(default)]
    pub scheme: Option<Scheme>,
    #[serde(default = "default_daemon_listen")]
    pub daemon_listen: u16,
    #[serde(default = "default_daemon_sftp")]
    pub daemon_sftp: u16,
    #[serde(default)]
    pub daemon_sftp_alias: Option<String>,
    #[serde(default = "default_upload_size")]
    pub upload_size: u32,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_unlimited")]
    pub memory: DimensionLimit,
    #[serde(default = "default_unlimited")]
    pub disk: DimensionLimit,
    #[serde(default = "default_unlimited")]
    pub cpu: DimensionLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeResponse {
    pub node: Node,
    pub token_id: String,
    pub token_fingerprint: String,
}

/// Partial update of a node's settings; absent fields keep their value.
///
/// `description` and `daemon_sftp_alias` are cleared by `null` or an empty string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeSettingsRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub description: Option<Option<String>>,
    pub fqdn: Option<String>,
    pub scheme: Option<Scheme>,
    pub daemon_listen: Option<u16>,
    pub daemon_sftp: Option<u16>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub daemon_sftp_alias: Option<Option<String>>,
    pub upload_size: Option<u32>,
    pub public: Option<bool>,
    pub maintenance_mode: Option<bool>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNodeLimitsRequest {
    pub memory: Option<DimensionLimit>,
    pub disk: Option<DimensionLimit>,
    pub cpu: Option<DimensionLimit>,
}

/// Machine-readable outcome of a configuration push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// `synced` or `configuration_drift`
    pub outcome: String,
    pub cause: Option<String>,
    pub message: Option<String>,
}

impl SyncReport {
    pub fn drifted(cause: &DaemonError) -> Self {
        Self {
            outcome: "configuration_drift".to_string(),
            cause: Some(cause.kind().code().to_string()),
            message: Some(cause.to_string()),
        }
    }
}

impl From<&SyncOutcome> for SyncReport {
    fn from(outcome: &SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Synced => Self {
                outcome: "synced".to_string(),
                cause: None,
                message: None,
            },
            SyncOutcome::Drift { cause } => Self::drifted(cause),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMutationResponse {
    pub node: Node,
    pub sync: SyncReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetTokenResponse {
    pub node_id: Uuid,
    pub token_id: String,
    pub token_fingerprint: String,
    pub sync: SyncReport,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapRequest {
    #[serde(default)]
    pub container_runtime: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapResponse {
    pub command: String,
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<Node>,
}

// ============================================================================
// Allocation Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAllocationsRequest {
    pub ip: String,
    /// Comma-separated ports and ranges, e.g. `25565,25570-25580`.
    pub ports: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAllocationsResponse {
    pub allocations: Vec<Allocation>,
}

// ============================================================================
// Server Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub node_id: Uuid,
    pub name: String,
    pub memory: i64,
    pub disk: i64,
    pub cpu: i64,
    pub allocation_id: i64,
    #[serde(default)]
    pub additional_allocations: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateServerBuildRequest {
    pub memory: i64,
    pub disk: i64,
    pub cpu: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePrimaryAllocationRequest {
    pub allocation_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponse {
    pub server: Server,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListServersResponse {
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListServersQuery {
    pub node_id: Option<Uuid>,
}

// ============================================================================
// Remote (daemon-facing) Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServer {
    pub uuid: Uuid,
    pub name: String,
    pub memory: i64,
    pub disk: i64,
    pub cpu: i64,
    pub allocations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteServersResponse {
    pub data: Vec<RemoteServer>,
}

// ============================================================================
// Common Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub secured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub request_id: Uuid,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_patch_distinguishes_null_from_absent() {
        let req: UpdateNodeSettingsRequest =
            serde_json::from_str(r#"{"description": null, "name": "beta"}"#).unwrap();
        assert_eq!(req.description, Some(None));
        assert_eq!(req.daemon_sftp_alias, None);

        let req: UpdateNodeSettingsRequest =
            serde_json::from_str(r#"{"daemon_sftp_alias": "sftp.example.com"}"#).unwrap();
        assert_eq!(
            req.daemon_sftp_alias,
            Some(Some("sftp.example.com".to_string()))
        );
        assert_eq!(req.description, None);
    }
}
