use thiserror::Error;
use uuid::Uuid;

use crate::daemon::DaemonError;
use crate::model::Dimension;

/// Result type for control plane operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Failure of a command dispatched to a running server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command text is empty")]
    EmptyCommand,

    #[error("node {0} is under maintenance")]
    NodeUnderMaintenance(Uuid),

    /// The daemon (or the server behind it) could not be reached.
    #[error("server {0} is offline")]
    ServerOffline(Uuid),

    #[error(transparent)]
    Daemon(DaemonError),
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("capacity denied for {dimension}: {reason}")]
    CapacityDenied { dimension: Dimension, reason: String },

    #[error("address not eligible: {0}")]
    EligibilityDenied(String),

    #[error("node {node_id} still owns {servers} server(s)")]
    NodeHasServers { node_id: Uuid, servers: i64 },

    #[error("allocation conflict: {0}")]
    AllocationConflict(String),

    /// A push failed after local state had already changed.
    #[error("node {node_id} configuration drifted: {cause}")]
    ConfigurationDrift { node_id: Uuid, cause: DaemonError },

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ControlError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn capacity_denied(dimension: Dimension, reason: impl Into<String>) -> Self {
        Self::CapacityDenied {
            dimension,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code surfaced to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::NotFound { .. } => "not_found",
            ControlError::Invalid { .. } => "invalid",
            ControlError::CapacityDenied { .. } => "capacity_denied",
            ControlError::EligibilityDenied(_) => "eligibility_denied",
            ControlError::NodeHasServers { .. } => "node_has_servers",
            ControlError::AllocationConflict(_) => "allocation_conflict",
            ControlError::ConfigurationDrift { .. } => "configuration_drift",
            ControlError::Daemon(e) => e.kind().code(),
            ControlError::Command(e) => match e {
                CommandError::EmptyCommand => "empty_command",
                CommandError::NodeUnderMaintenance(_) => "node_under_maintenance",
                CommandError::ServerOffline(_) => "server_offline",
                CommandError::Daemon(d) => d.kind().code(),
            },
            ControlError::Storage(_)
            | ControlError::Pool(_)
            | ControlError::Join(_)
            | ControlError::Serialization(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(e: serde_json::Error) -> Self {
        ControlError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ControlError {
    fn from(e: serde_yaml::Error) -> Self {
        ControlError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_offline_code_differs_from_unreachable() {
        let offline = ControlError::from(CommandError::ServerOffline(Uuid::nil()));
        let unreachable = ControlError::from(DaemonError::Unreachable("refused".to_string()));
        assert_eq!(offline.code(), "server_offline");
        assert_eq!(unreachable.code(), "unreachable");
    }

    #[test]
    fn test_drift_code_differs_from_blocking_errors() {
        let drift = ControlError::ConfigurationDrift {
            node_id: Uuid::nil(),
            cause: DaemonError::Timeout,
        };
        let blocked = ControlError::NodeHasServers {
            node_id: Uuid::nil(),
            servers: 2,
        };
        let denied = ControlError::capacity_denied(Dimension::Memory, "full");
        assert_ne!(drift.code(), blocked.code());
        assert_ne!(drift.code(), denied.code());
    }
}
