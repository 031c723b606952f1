use tracing::{debug, info};
use uuid::Uuid;

use crate::daemon::{DaemonClient, DaemonError, DaemonTarget};
use crate::db::{execute_async, DbPool};
use crate::error::{CommandError, Result};
use crate::services::{node_registry, server_registry, token_manager};

/// Forwards console commands to the daemon hosting a server.
///
/// Fire-and-forget: nothing is retried and no panel state changes.
pub struct CommandDispatcher {
    db: DbPool,
    daemon: DaemonClient,
}

impl CommandDispatcher {
    pub fn new(db: DbPool, daemon: DaemonClient) -> Self {
        Self { db, daemon }
    }

    pub async fn dispatch(&self, server_id: Uuid, command: &str) -> Result<()> {
        if command.trim().is_empty() {
            return Err(CommandError::EmptyCommand.into());
        }

        let (node, token) = execute_async(&self.db, move |conn| {
            let server = server_registry::get_server(conn, server_id)?;
            let node = node_registry::get_node(conn, server.node_id)?;
            let token = token_manager::current(conn, node.node_id)?;
            Ok((node, token))
        })
        .await?;

        if node.maintenance_mode {
            return Err(CommandError::NodeUnderMaintenance(node.node_id).into());
        }

        let target = DaemonTarget::new(&node, &token)?;
        debug!("Dispatching command to server {} on node {}", server_id, node.node_id);

        self.daemon
            .send_commands(&target, server_id, &[command.to_string()])
            .await
            .map_err(|e| match e {
                DaemonError::Unreachable(_) => CommandError::ServerOffline(server_id),
                other => CommandError::Daemon(other),
            })?;

        info!("Command accepted by server {}", server_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::tests::fast_client;
    use crate::db::test_pool;
    use crate::error::ControlError;
    use crate::model::{ResourceUsage, Scheme};
    use crate::services::allocations;
    use crate::services::node_registry::tests::{limits, settings};
    use crate::services::node_registry::NodeSettings;
    use crate::services::server_registry::NewServer;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_on(pool: &DbPool, port: u16, maintenance_mode: bool) -> (Uuid, Uuid) {
        let settings = NodeSettings {
            scheme: Scheme::Http,
            daemon_listen: port,
            maintenance_mode,
            ..settings("127.0.0.1")
        };
        execute_async(pool, move |conn| {
            let (node, _) = node_registry::create_node(conn, &settings, &limits(0, 0))?;
            let ports = allocations::parse_ports("25565")?;
            let alloc = allocations::create_allocations(conn, node.node_id, "10.0.0.5", &ports, None)?;
            let server = server_registry::create_server(
                conn,
                &NewServer {
                    node_id: node.node_id,
                    name: "survival".to_string(),
                    resources: ResourceUsage {
                        memory: 1024,
                        disk: 2048,
                        cpu: 100,
                    },
                    allocation_id: alloc[0].allocation_id,
                    additional_allocations: vec![],
                },
            )?;
            Ok((node.node_id, server.server_id))
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_command_reaches_daemon_verbatim() {
        let (_dir, pool) = test_pool();
        let daemon = MockServer::start().await;
        let (_, server_id) = server_on(&pool, daemon.address().port(), false).await;
        Mock::given(method("POST"))
            .and(path(format!("/api/servers/{}/commands", server_id)))
            .and(body_json(serde_json::json!({ "commands": ["  say hello "] })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&daemon)
            .await;

        CommandDispatcher::new(pool, fast_client())
            .dispatch(server_id, "  say hello ")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bad_gateway_means_server_offline() {
        let (_dir, pool) = test_pool();
        let daemon = MockServer::start().await;
        let (node_id, server_id) = server_on(&pool, daemon.address().port(), false).await;
        Mock::given(path(format!("/api/servers/{}/commands", server_id)))
            .respond_with(ResponseTemplate::new(502))
            .mount(&daemon)
            .await;

        let before = execute_async(&pool, move |conn| node_registry::get_node(conn, node_id))
            .await
            .unwrap();
        let err = CommandDispatcher::new(pool.clone(), fast_client())
            .dispatch(server_id, "stop")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Command(CommandError::ServerOffline(id)) if id == server_id
        ));

        let after = execute_async(&pool, move |conn| node_registry::get_node(conn, node_id))
            .await
            .unwrap();
        assert_eq!(before.updated_at, after.updated_at);
        assert_eq!(before.config_drift, after.config_drift);
    }

    #[tokio::test]
    async fn test_other_daemon_errors_pass_through() {
        let (_dir, pool) = test_pool();
        let daemon = MockServer::start().await;
        let (_, server_id) = server_on(&pool, daemon.address().port(), false).await;
        Mock::given(path(format!("/api/servers/{}/commands", server_id)))
            .respond_with(ResponseTemplate::new(403))
            .mount(&daemon)
            .await;

        let err = CommandDispatcher::new(pool, fast_client())
            .dispatch(server_id, "stop")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "auth_rejected");
    }

    #[tokio::test]
    async fn test_refused_before_io() {
        let (_dir, pool) = test_pool();
        let daemon = MockServer::start().await;
        let (_, server_id) = server_on(&pool, daemon.address().port(), true).await;
        let dispatcher = CommandDispatcher::new(pool, fast_client());

        assert!(matches!(
            dispatcher.dispatch(server_id, "   ").await,
            Err(ControlError::Command(CommandError::EmptyCommand))
        ));
        assert!(matches!(
            dispatcher.dispatch(server_id, "stop").await,
            Err(ControlError::Command(CommandError::NodeUnderMaintenance(_)))
        ));
        assert!(daemon.received_requests().await.unwrap().is_empty());
    }
}
