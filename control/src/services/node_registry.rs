use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use crate::db::uuid_column;
use crate::error::{ControlError, Result};
use crate::model::{
    unix_now, AuthToken, Node, ResourceLimit, ResourceLimits, ResourceUsage, Scheme,
    SystemInformation,
};
use crate::services::token_manager;

pub const DEFAULT_DAEMON_BASE: &str = "/var/lib/pelican/volumes";

const NODE_COLUMNS: &str = "node_id, name, description, fqdn, scheme, daemon_listen, daemon_sftp,
    daemon_sftp_alias, daemon_base, upload_size, public, maintenance_mode, tags,
    memory, memory_overallocate, disk, disk_overallocate, cpu, cpu_overallocate,
    config_drift, system_info, system_info_at, created_at, updated_at";

/// Operator-editable node fields (everything except limits and identity).
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub name: String,
    pub description: Option<String>,
    pub fqdn: String,
    pub scheme: Scheme,
    pub daemon_listen: u16,
    pub daemon_sftp: u16,
    pub daemon_sftp_alias: Option<String>,
    pub upload_size: u32,
    pub public: bool,
    pub maintenance_mode: bool,
    pub tags: Vec<String>,
}

pub const UPLOAD_SIZE_MAX: u32 = 1024;

impl NodeSettings {
    /// Check field-level constraints. Addressing rules are checked separately.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::invalid("name", "must not be empty"));
        }
        let fqdn = self.fqdn.trim();
        if fqdn.is_empty() {
            return Err(ControlError::invalid("fqdn", "must not be empty"));
        }
        if fqdn.contains("://") || fqdn.contains('/') || fqdn.chars().any(char::is_whitespace) {
            return Err(ControlError::invalid(
                "fqdn",
                "must be a bare hostname or IP address",
            ));
        }
        if self.daemon_listen == 0 {
            return Err(ControlError::invalid("daemon_listen", "port must not be 0"));
        }
        if self.daemon_sftp == 0 {
            return Err(ControlError::invalid("daemon_sftp", "port must not be 0"));
        }
        if !(1..=UPLOAD_SIZE_MAX).contains(&self.upload_size) {
            return Err(ControlError::invalid(
                "upload_size",
                format!("must be between 1 and {} MiB", UPLOAD_SIZE_MAX),
            ));
        }
        Ok(())
    }
}

/// Name for a node registered without one: the first label of its FQDN,
/// unless that label is numeric (an IP address), in which case the whole address.
pub fn default_node_name(fqdn: &str) -> String {
    let fqdn = fqdn.trim();
    match fqdn.split('.').next() {
        Some(label) if !label.is_empty() && !label.chars().all(|c| c.is_ascii_digit()) => {
            label.to_string()
        }
        _ => fqdn.to_string(),
    }
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let scheme: String = row.get(4)?;
    let tags: String = row.get(12)?;
    let system_info: Option<String> = row.get(20)?;

    Ok(Node {
        node_id: uuid_column(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        fqdn: row.get(3)?,
        scheme: scheme.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        daemon_listen: row.get(5)?,
        daemon_sftp: row.get(6)?,
        daemon_sftp_alias: row.get(7)?,
        daemon_base: row.get(8)?,
        upload_size: row.get(9)?,
        public: row.get(10)?,
        maintenance_mode: row.get(11)?,
        // Tags and system info are advisory; a corrupt value reads as empty.
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        limits: ResourceLimits {
            memory: ResourceLimit {
                limit: row.get(13)?,
                overallocate: row.get(14)?,
            },
            disk: ResourceLimit {
                limit: row.get(15)?,
                overallocate: row.get(16)?,
            },
            cpu: ResourceLimit {
                limit: row.get(17)?,
                overallocate: row.get(18)?,
            },
        },
        config_drift: row.get(19)?,
        system_info: system_info.and_then(|s| serde_json::from_str(&s).ok()),
        system_info_at: row.get(21)?,
        created_at: row.get(22)?,
        updated_at: row.get(23)?,
    })
}

/// Register a node and issue its first daemon token in one transaction.
pub fn create_node(
    conn: &mut Connection,
    settings: &NodeSettings,
    limits: &ResourceLimits,
) -> Result<(Node, AuthToken)> {
    let node_id = Uuid::new_v4();
    let now = unix_now();
    let tags = serde_json::to_string(&settings.tags)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO nodes (node_id, name, description, fqdn, scheme, daemon_listen, daemon_sftp,
            daemon_sftp_alias, daemon_base, upload_size, public, maintenance_mode, tags,
            memory, memory_overallocate, disk, disk_overallocate, cpu, cpu_overallocate,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)",
        rusqlite::params![
            node_id.to_string(),
            settings.name,
            settings.description,
            settings.fqdn,
            settings.scheme.as_str(),
            settings.daemon_listen,
            settings.daemon_sftp,
            settings.daemon_sftp_alias,
            DEFAULT_DAEMON_BASE,
            settings.upload_size,
            settings.public,
            settings.maintenance_mode,
            tags,
            limits.memory.limit,
            limits.memory.overallocate,
            limits.disk.limit,
            limits.disk.overallocate,
            limits.cpu.limit,
            limits.cpu.overallocate,
            now,
        ],
    )?;
    let token = token_manager::issue(&tx, node_id)?;
    let node = get_node(&tx, node_id)?;
    tx.commit()?;

    Ok((node, token))
}

/// Get a node by ID
pub fn get_node(conn: &Connection, node_id: Uuid) -> Result<Node> {
    let sql = format!("SELECT {} FROM nodes WHERE node_id = ?1", NODE_COLUMNS);
    conn.query_row(&sql, rusqlite::params![node_id.to_string()], node_from_row)
        .optional()?
        .ok_or_else(|| ControlError::not_found("node", node_id))
}

/// List all nodes
pub fn list_nodes(conn: &Connection) -> Result<Vec<Node>> {
    let sql = format!("SELECT {} FROM nodes ORDER BY created_at, name", NODE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let nodes = stmt
        .query_map([], node_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(nodes)
}

fn expect_updated(rows: usize, node_id: Uuid) -> Result<()> {
    if rows == 0 {
        return Err(ControlError::not_found("node", node_id));
    }
    Ok(())
}

pub fn update_settings(conn: &Connection, node_id: Uuid, settings: &NodeSettings) -> Result<Node> {
    let tags = serde_json::to_string(&settings.tags)?;
    let rows = conn.execute(
        "UPDATE nodes SET name = ?1, description = ?2, fqdn = ?3, scheme = ?4, daemon_listen = ?5,
            daemon_sftp = ?6, daemon_sftp_alias = ?7, upload_size = ?8, public = ?9,
            maintenance_mode = ?10, tags = ?11, updated_at = ?12
         WHERE node_id = ?13",
        rusqlite::params![
            settings.name,
            settings.description,
            settings.fqdn,
            settings.scheme.as_str(),
            settings.daemon_listen,
            settings.daemon_sftp,
            settings.daemon_sftp_alias,
            settings.upload_size,
            settings.public,
            settings.maintenance_mode,
            tags,
            unix_now(),
            node_id.to_string(),
        ],
    )?;
    expect_updated(rows, node_id)?;
    get_node(conn, node_id)
}

/// Persist already-normalized limits.
pub fn update_limits(conn: &Connection, node_id: Uuid, limits: &ResourceLimits) -> Result<Node> {
    let rows = conn.execute(
        "UPDATE nodes SET memory = ?1, memory_overallocate = ?2, disk = ?3, disk_overallocate = ?4,
            cpu = ?5, cpu_overallocate = ?6, updated_at = ?7
         WHERE node_id = ?8",
        rusqlite::params![
            limits.memory.limit,
            limits.memory.overallocate,
            limits.disk.limit,
            limits.disk.overallocate,
            limits.cpu.limit,
            limits.cpu.overallocate,
            unix_now(),
            node_id.to_string(),
        ],
    )?;
    expect_updated(rows, node_id)?;
    get_node(conn, node_id)
}

pub fn set_config_drift(conn: &Connection, node_id: Uuid, drifted: bool) -> Result<()> {
    let rows = conn.execute(
        "UPDATE nodes SET config_drift = ?1 WHERE node_id = ?2",
        rusqlite::params![drifted, node_id.to_string()],
    )?;
    expect_updated(rows, node_id)
}

/// Cache the system information last reported by the node's daemon.
pub fn record_system_info(conn: &Connection, node_id: Uuid, info: &SystemInformation) -> Result<()> {
    let rows = conn.execute(
        "UPDATE nodes SET system_info = ?1, system_info_at = ?2 WHERE node_id = ?3",
        rusqlite::params![serde_json::to_string(info)?, unix_now(), node_id.to_string()],
    )?;
    expect_updated(rows, node_id)
}

/// Sum of resources claimed by all servers on a node.
pub fn node_usage(conn: &Connection, node_id: Uuid) -> Result<ResourceUsage> {
    let usage = conn.query_row(
        "SELECT COALESCE(SUM(memory), 0), COALESCE(SUM(disk), 0), COALESCE(SUM(cpu), 0)
         FROM servers WHERE node_id = ?1",
        rusqlite::params![node_id.to_string()],
        |row| {
            Ok(ResourceUsage {
                memory: row.get(0)?,
                disk: row.get(1)?,
                cpu: row.get(2)?,
            })
        },
    )?;
    Ok(usage)
}

pub fn count_servers(conn: &Connection, node_id: Uuid) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM servers WHERE node_id = ?1",
        rusqlite::params![node_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Delete a node. Refused while the node still owns servers.
pub fn delete_node(conn: &mut Connection, node_id: Uuid) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let servers = count_servers(&tx, node_id)?;
    if servers > 0 {
        return Err(ControlError::NodeHasServers { node_id, servers });
    }
    let rows = tx.execute(
        "DELETE FROM nodes WHERE node_id = ?1",
        rusqlite::params![node_id.to_string()],
    )?;
    expect_updated(rows, node_id)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_connection;

    pub(crate) fn settings(fqdn: &str) -> NodeSettings {
        NodeSettings {
            name: "alpha".to_string(),
            description: None,
            fqdn: fqdn.to_string(),
            scheme: Scheme::Https,
            daemon_listen: 8080,
            daemon_sftp: 2022,
            daemon_sftp_alias: None,
            upload_size: 256,
            public: true,
            maintenance_mode: false,
            tags: vec!["eu".to_string(), "ssd".to_string()],
        }
    }

    pub(crate) fn limits(memory: i64, overallocate: i64) -> ResourceLimits {
        ResourceLimits {
            memory: ResourceLimit {
                limit: memory,
                overallocate,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get_node() {
        let mut conn = test_connection();
        let (node, token) =
            create_node(&mut conn, &settings("alpha.example.com"), &limits(8192, 10)).unwrap();

        let fetched = get_node(&conn, node.node_id).unwrap();
        assert_eq!(fetched.fqdn, "alpha.example.com");
        assert_eq!(fetched.scheme, Scheme::Https);
        assert_eq!(fetched.tags, vec!["eu", "ssd"]);
        assert_eq!(fetched.limits.memory.limit, 8192);
        assert_eq!(fetched.daemon_base, DEFAULT_DAEMON_BASE);
        assert!(!fetched.config_drift);
        assert_eq!(token.node_id, node.node_id);
        assert_eq!(token_manager::current(&conn, node.node_id).unwrap(), token);
    }

    #[test]
    fn test_update_settings_and_limits() {
        let mut conn = test_connection();
        let (node, _) =
            create_node(&mut conn, &settings("alpha.example.com"), &limits(0, 0)).unwrap();

        let mut changed = settings("beta.example.com");
        changed.maintenance_mode = true;
        let updated = update_settings(&conn, node.node_id, &changed).unwrap();
        assert_eq!(updated.fqdn, "beta.example.com");
        assert!(updated.maintenance_mode);

        let updated = update_limits(&conn, node.node_id, &limits(2048, 50)).unwrap();
        assert_eq!(updated.limits.memory.overallocate, 50);
    }

    #[test]
    fn test_drift_and_system_info() {
        let mut conn = test_connection();
        let (node, _) =
            create_node(&mut conn, &settings("alpha.example.com"), &limits(0, 0)).unwrap();

        set_config_drift(&conn, node.node_id, true).unwrap();
        assert!(get_node(&conn, node.node_id).unwrap().config_drift);

        let info = SystemInformation {
            version: Some("1.11.0".to_string()),
            cpu_count: Some(8),
            architecture: Some("amd64".to_string()),
            kernel_version: Some("6.1.0".to_string()),
            os: Some("linux".to_string()),
        };
        record_system_info(&conn, node.node_id, &info).unwrap();
        let fetched = get_node(&conn, node.node_id).unwrap();
        assert_eq!(fetched.system_info, Some(info));
        assert!(fetched.system_info_at.is_some());
    }

    #[test]
    fn test_delete_removes_token() {
        let mut conn = test_connection();
        let (node, _) =
            create_node(&mut conn, &settings("alpha.example.com"), &limits(0, 0)).unwrap();
        delete_node(&mut conn, node.node_id).unwrap();

        assert!(matches!(
            get_node(&conn, node.node_id),
            Err(ControlError::NotFound { .. })
        ));
        assert!(token_manager::current(&conn, node.node_id).is_err());
    }

    #[test]
    fn test_settings_validation() {
        assert!(settings("alpha.example.com").validate().is_ok());

        let mut bad = settings("https://alpha.example.com");
        assert!(matches!(
            bad.validate(),
            Err(ControlError::Invalid { field: "fqdn", .. })
        ));

        bad = settings("alpha.example.com");
        bad.upload_size = 0;
        assert!(bad.validate().is_err());
        bad.upload_size = UPLOAD_SIZE_MAX + 1;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_default_node_name() {
        assert_eq!(default_node_name("alpha.example.com"), "alpha");
        assert_eq!(default_node_name("203.0.113.5"), "203.0.113.5");
        assert_eq!(default_node_name("localhost"), "localhost");
    }

    #[test]
    fn test_missing_node_is_not_found() {
        let conn = test_connection();
        assert!(matches!(
            set_config_drift(&conn, Uuid::new_v4(), true),
            Err(ControlError::NotFound { .. })
        ));
    }
}
