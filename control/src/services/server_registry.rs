use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::info;
use uuid::Uuid;

use crate::db::uuid_column;
use crate::error::{ControlError, Result};
use crate::model::{unix_now, Dimension, ResourceUsage, Server};
use crate::services::{allocations, capacity, node_registry};

const SERVER_COLUMNS: &str = "server_id, node_id, name, memory, disk, cpu, allocation_id, created_at";

/// A server to be placed on a node.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub node_id: Uuid,
    pub name: String,
    pub resources: ResourceUsage,
    pub allocation_id: i64,
    pub additional_allocations: Vec<i64>,
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        server_id: uuid_column(row, 0)?,
        node_id: uuid_column(row, 1)?,
        name: row.get(2)?,
        resources: ResourceUsage {
            memory: row.get(3)?,
            disk: row.get(4)?,
            cpu: row.get(5)?,
        },
        allocation_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn validate_resources(resources: &ResourceUsage) -> Result<()> {
    for dimension in Dimension::ALL {
        if resources.get(dimension) < 0 {
            return Err(ControlError::invalid(
                "resources",
                format!("{} must not be negative", dimension),
            ));
        }
    }
    Ok(())
}

/// Place a server on its node.
///
/// Capacity evaluation, allocation claims and the insert share one immediate
/// transaction, so two concurrent placements cannot both squeeze under the
/// same ceiling. A denied placement leaves no trace.
pub fn create_server(conn: &mut Connection, new: &NewServer) -> Result<Server> {
    if new.name.trim().is_empty() {
        return Err(ControlError::invalid("name", "must not be empty"));
    }
    validate_resources(&new.resources)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let node = node_registry::get_node(&tx, new.node_id)?;

    let mut claimed = vec![new.allocation_id];
    claimed.extend(
        new.additional_allocations
            .iter()
            .copied()
            .filter(|id| *id != new.allocation_id),
    );
    claimed.sort_unstable();
    claimed.dedup();

    for allocation_id in &claimed {
        let allocation = allocations::get_allocation(&tx, *allocation_id)?;
        if allocation.node_id != node.node_id {
            return Err(ControlError::AllocationConflict(format!(
                "allocation {} belongs to another node",
                allocation_id
            )));
        }
        if let Some(owner) = allocation.server_id {
            return Err(ControlError::AllocationConflict(format!(
                "allocation {} is already assigned to server {}",
                allocation_id, owner
            )));
        }
    }

    let usage = node_registry::node_usage(&tx, node.node_id)?;
    capacity::check_all(&node.limits, &usage, &new.resources)?;

    let server_id = Uuid::new_v4();
    tx.execute(
        "INSERT INTO servers (server_id, node_id, name, memory, disk, cpu, allocation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            server_id.to_string(),
            node.node_id.to_string(),
            new.name.trim(),
            new.resources.memory,
            new.resources.disk,
            new.resources.cpu,
            new.allocation_id,
            unix_now(),
        ],
    )?;

    for allocation_id in &claimed {
        let rows = tx.execute(
            "UPDATE allocations SET server_id = ?1 WHERE allocation_id = ?2 AND server_id IS NULL",
            rusqlite::params![server_id.to_string(), allocation_id],
        )?;
        if rows != 1 {
            return Err(ControlError::AllocationConflict(format!(
                "allocation {} was claimed concurrently",
                allocation_id
            )));
        }
    }

    let server = get_server(&tx, server_id)?;
    tx.commit()?;

    info!(
        "Placed server {} on node {} (memory={}, disk={}, cpu={})",
        server.server_id,
        server.node_id,
        server.resources.memory,
        server.resources.disk,
        server.resources.cpu
    );
    Ok(server)
}

/// Get a server by ID
pub fn get_server(conn: &Connection, server_id: Uuid) -> Result<Server> {
    let sql = format!("SELECT {} FROM servers WHERE server_id = ?1", SERVER_COLUMNS);
    conn.query_row(&sql, rusqlite::params![server_id.to_string()], server_from_row)
        .optional()?
        .ok_or_else(|| ControlError::not_found("server", server_id))
}

/// List servers, optionally only those on one node
pub fn list_servers(conn: &Connection, node_id: Option<Uuid>) -> Result<Vec<Server>> {
    let servers = match node_id {
        Some(node_id) => {
            let sql = format!(
                "SELECT {} FROM servers WHERE node_id = ?1 ORDER BY created_at, name",
                SERVER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![node_id.to_string()], server_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        None => {
            let sql = format!("SELECT {} FROM servers ORDER BY created_at, name", SERVER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], server_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };
    Ok(servers)
}

/// Change the resources a server claims. Growth is capacity-checked; shrinking always succeeds.
pub fn update_build(
    conn: &mut Connection,
    server_id: Uuid,
    resources: &ResourceUsage,
) -> Result<Server> {
    validate_resources(resources)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let server = get_server(&tx, server_id)?;
    let node = node_registry::get_node(&tx, server.node_id)?;
    let usage = node_registry::node_usage(&tx, node.node_id)?;

    for dimension in Dimension::ALL {
        let delta = resources.get(dimension) - server.resources.get(dimension);
        if delta <= 0 {
            continue;
        }
        if let capacity::Capacity::Denied(reason) =
            capacity::check(&node.limits, &usage, dimension, delta)
        {
            return Err(ControlError::capacity_denied(dimension, reason));
        }
    }

    tx.execute(
        "UPDATE servers SET memory = ?1, disk = ?2, cpu = ?3 WHERE server_id = ?4",
        rusqlite::params![
            resources.memory,
            resources.disk,
            resources.cpu,
            server_id.to_string()
        ],
    )?;
    let updated = get_server(&tx, server_id)?;
    tx.commit()?;
    Ok(updated)
}

/// Make one of the server's own allocations its primary.
pub fn change_primary_allocation(
    conn: &Connection,
    server_id: Uuid,
    allocation_id: i64,
) -> Result<Server> {
    let server = get_server(conn, server_id)?;
    let allocation = allocations::get_allocation(conn, allocation_id)?;
    if allocation.server_id != Some(server.server_id) {
        return Err(ControlError::AllocationConflict(format!(
            "allocation {} is not assigned to server {}",
            allocation_id, server_id
        )));
    }

    conn.execute(
        "UPDATE servers SET allocation_id = ?1 WHERE server_id = ?2",
        rusqlite::params![allocation_id, server_id.to_string()],
    )?;
    get_server(conn, server_id)
}

/// Delete a server, releasing its allocations
pub fn delete_server(conn: &Connection, server_id: Uuid) -> Result<()> {
    let rows = conn.execute(
        "DELETE FROM servers WHERE server_id = ?1",
        rusqlite::params![server_id.to_string()],
    )?;
    if rows == 0 {
        return Err(ControlError::not_found("server", server_id));
    }
    Ok(())
}
