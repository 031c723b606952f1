use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::daemon::{DaemonClient, DaemonError, DaemonTarget};
use crate::db::{execute_async, DbPool};
use crate::error::{ControlError, Result};
use crate::model::{AuthToken, Node, SystemInformation};
use crate::services::eligibility::{self, HostResolver};
use crate::services::node_locks::NodeLocks;
use crate::services::{node_registry, token_manager};

/// Configuration document a daemon runs with.
///
/// Field order here is the key order of the rendered YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    pub debug: bool,
    pub uuid: Uuid,
    pub token_id: String,
    pub token: String,
    pub api: ApiSection,
    pub system: SystemSection,
    pub limits: LimitsSection,
    pub allowed_mounts: Vec<String>,
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSection {
    pub host: String,
    pub port: u16,
    pub ssl: SslSection,
    pub upload_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SslSection {
    pub enabled: bool,
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSection {
    pub data: String,
    pub sftp: SftpSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SftpSection {
    pub bind_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    pub memory: i64,
    pub memory_overallocate: i64,
    pub disk: i64,
    pub disk_overallocate: i64,
    pub cpu: i64,
    pub cpu_overallocate: i64,
}

impl NodeConfiguration {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Build the configuration document for a node from its current record.
pub fn render_configuration(node: &Node, token: &AuthToken, panel_url: &str) -> NodeConfiguration {
    NodeConfiguration {
        debug: false,
        uuid: node.node_id,
        token_id: token.token_id.clone(),
        token: token.secret.clone(),
        api: ApiSection {
            host: "0.0.0.0".to_string(),
            port: node.daemon_listen,
            ssl: SslSection {
                enabled: node.scheme == crate::model::Scheme::Https,
                cert: format!("/etc/letsencrypt/live/{}/fullchain.pem", node.fqdn),
                key: format!("/etc/letsencrypt/live/{}/privkey.pem", node.fqdn),
            },
            upload_limit: node.upload_size,
        },
        system: SystemSection {
            data: node.daemon_base.clone(),
            sftp: SftpSection {
                bind_port: node.daemon_sftp,
            },
        },
        limits: LimitsSection {
            memory: node.limits.memory.limit,
            memory_overallocate: node.limits.memory.overallocate,
            disk: node.limits.disk.limit,
            disk_overallocate: node.limits.disk.overallocate,
            cpu: node.limits.cpu.limit,
            cpu_overallocate: node.limits.cpu.overallocate,
        },
        allowed_mounts: Vec::new(),
        remote: panel_url.trim_end_matches('/').to_string(),
    }
}

/// Result of pushing configuration to a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    /// Local state committed but the daemon did not take it.
    Drift { cause: DaemonError },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }
}

/// Keeps node daemons in step with the panel's record of them.
pub struct ConfigSynchronizer {
    db: DbPool,
    daemon: DaemonClient,
    resolver: Arc<dyn HostResolver>,
    locks: NodeLocks,
    panel_url: String,
    secured: bool,
}

impl ConfigSynchronizer {
    pub fn new(
        db: DbPool,
        daemon: DaemonClient,
        resolver: Arc<dyn HostResolver>,
        panel_url: String,
        secured: bool,
    ) -> Self {
        Self {
            db,
            daemon,
            resolver,
            locks: NodeLocks::new(),
            panel_url,
            secured,
        }
    }

    pub fn panel_url(&self) -> &str {
        &self.panel_url
    }

    async fn load(&self, node_id: Uuid) -> Result<(Node, AuthToken)> {
        execute_async(&self.db, move |conn| {
            let node = node_registry::get_node(conn, node_id)?;
            let token = token_manager::current(conn, node_id)?;
            Ok((node, token))
        })
        .await
    }

    /// Render the YAML configuration for a node.
    pub async fn render(&self, node_id: Uuid) -> Result<String> {
        let (node, token) = self.load(node_id).await?;
        render_configuration(&node, &token, &self.panel_url).to_yaml()
    }

    /// Push the node's current configuration to its daemon.
    ///
    /// Refused before any I/O when the node cannot be addressed.
    pub async fn push(&self, node_id: Uuid) -> Result<SyncOutcome> {
        let _guard = self.locks.acquire(node_id).await;
        let (node, token) = self.load(node_id).await?;
        let target = self.prepare(&node, &token).await?;
        self.deliver(&node, &target, &token).await
    }

    /// Apply a local mutation to a node, then push the result.
    ///
    /// The mutation is committed whether or not the push succeeds. A node the
    /// mutation left unaddressable is flagged drifted like any failed push.
    pub async fn apply<F, T>(&self, node_id: Uuid, mutate: F) -> Result<(T, SyncOutcome)>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.locks.acquire(node_id).await;
        let value = execute_async(&self.db, mutate).await?;
        let (node, token) = self.load(node_id).await?;
        let outcome = match self.prepare(&node, &token).await {
            Ok(target) => self.deliver(&node, &target, &token).await?,
            Err(e) => {
                self.flag_drift(node_id, DaemonError::Unaddressable(e.to_string()))
                    .await?
            }
        };
        Ok((value, outcome))
    }

    /// Replace a node's daemon token and hand the new one to the daemon.
    ///
    /// The push authenticates with the token the daemon still holds. Nothing
    /// is rotated when the node cannot be addressed; once rotated, the new
    /// token stays committed even if the push fails.
    pub async fn rotate_token(&self, node_id: Uuid) -> Result<(AuthToken, SyncOutcome)> {
        let _guard = self.locks.acquire(node_id).await;
        let (node, held) = self.load(node_id).await?;
        let target = self.prepare(&node, &held).await?;

        let rotation =
            execute_async(&self.db, move |conn| token_manager::reset(conn, node_id)).await?;
        let outcome = self.deliver(&node, &target, &rotation.current).await?;
        Ok((rotation.current, outcome))
    }

    /// Remove lock state for a node that no longer exists.
    pub fn forget(&self, node_id: Uuid) {
        self.locks.forget(node_id);
    }

    /// Check addressing and build the daemon target. No daemon I/O.
    async fn prepare(&self, node: &Node, credentials: &AuthToken) -> Result<DaemonTarget> {
        // Addressing is re-checked on every push; earlier reports may be stale.
        let report = eligibility::validate(self.resolver.as_ref(), &node.fqdn, self.secured).await;
        eligibility::check_scheme(&report, node.scheme, self.secured)?;
        DaemonTarget::new(node, credentials)
    }

    async fn deliver(
        &self,
        node: &Node,
        target: &DaemonTarget,
        document_token: &AuthToken,
    ) -> Result<SyncOutcome> {
        let document = render_configuration(node, document_token, &self.panel_url);
        let node_id = node.node_id;

        match self.daemon.update_configuration(target, &document).await {
            Ok(()) => {
                execute_async(&self.db, move |conn| {
                    node_registry::set_config_drift(conn, node_id, false)
                })
                .await?;
                info!(
                    "Pushed configuration to node {} (token fingerprint={})",
                    node_id,
                    token_manager::fingerprint(document_token)
                );
                Ok(SyncOutcome::Synced)
            }
            Err(cause) => self.flag_drift(node_id, cause).await,
        }
    }

    async fn flag_drift(&self, node_id: Uuid, cause: DaemonError) -> Result<SyncOutcome> {
        execute_async(&self.db, move |conn| {
            node_registry::set_config_drift(conn, node_id, true)
        })
        .await?;
        warn!(
            "Configuration push to node {} failed ({}): {}",
            node_id,
            cause.kind().code(),
            cause
        );
        Ok(SyncOutcome::Drift { cause })
    }

    /// Fetch and cache the daemon's system information.
    pub async fn refresh_system_information(&self, node_id: Uuid) -> Result<SystemInformation> {
        let (node, token) = self.load(node_id).await?;
        let target = DaemonTarget::new(&node, &token)?;
        let info = self
            .daemon
            .system_information(&target)
            .await
            .map_err(ControlError::from)?;

        let cached = info.clone();
        execute_async(&self.db, move |conn| {
            node_registry::record_system_info(conn, node_id, &cached)
        })
        .await?;
        Ok(info)
    }
}
