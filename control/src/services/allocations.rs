use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeSet;
use std::net::IpAddr;
use uuid::Uuid;

use crate::db::uuid_column;
use crate::error::{ControlError, Result};
use crate::model::Allocation;
use crate::services::node_registry;

pub const PORT_FLOOR: u16 = 1024;
pub const PORT_RANGE_LIMIT: usize = 1000;

fn allocation_from_row(row: &Row<'_>) -> rusqlite::Result<Allocation> {
    let server_id: Option<String> = row.get(5)?;
    Ok(Allocation {
        allocation_id: row.get(0)?,
        node_id: uuid_column(row, 1)?,
        ip: row.get(2)?,
        port: row.get(3)?,
        alias: row.get(4)?,
        server_id: server_id.and_then(|s| Uuid::parse_str(&s).ok()),
    })
}

fn parse_port(raw: &str) -> Result<u16> {
    let port: u16 = raw
        .trim()
        .parse()
        .map_err(|_| ControlError::invalid("ports", format!("'{}' is not a port", raw.trim())))?;
    if port < PORT_FLOOR {
        return Err(ControlError::invalid(
            "ports",
            format!("port {} is below {}", port, PORT_FLOOR),
        ));
    }
    Ok(port)
}

/// Expand a port specification such as `25565,25570-25580` into sorted ports.
pub fn parse_ports(spec: &str) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse_port(start)?, parse_port(end)?);
                if start > end {
                    return Err(ControlError::invalid(
                        "ports",
                        format!("range {} has its start after its end", part),
                    ));
                }
                let count = usize::from(end - start) + 1;
                if count > PORT_RANGE_LIMIT {
                    return Err(ControlError::invalid(
                        "ports",
                        format!(
                            "range {} spans {} ports, at most {} allowed",
                            part, count, PORT_RANGE_LIMIT
                        ),
                    ));
                }
                ports.extend(start..=end);
            }
            None => {
                ports.insert(parse_port(part)?);
            }
        }
    }

    if ports.is_empty() {
        return Err(ControlError::invalid("ports", "no ports given"));
    }
    Ok(ports)
}

/// Create allocations on a node, skipping any that already exist.
///
/// Returns only the allocations that were newly created.
pub fn create_allocations(
    conn: &mut Connection,
    node_id: Uuid,
    ip: &str,
    ports: &BTreeSet<u16>,
    alias: Option<&str>,
) -> Result<Vec<Allocation>> {
    let ip: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| ControlError::invalid("ip", format!("'{}' is not an IP address", ip)))?;
    let ip = ip.to_string();

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    node_registry::get_node(&tx, node_id)?;

    let mut created = Vec::new();
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO allocations (node_id, ip, port, alias) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for port in ports {
            let rows = stmt.execute(rusqlite::params![node_id.to_string(), ip, port, alias])?;
            if rows == 1 {
                created.push(Allocation {
                    allocation_id: tx.last_insert_rowid(),
                    node_id,
                    ip: ip.clone(),
                    port: *port,
                    alias: alias.map(str::to_string),
                    server_id: None,
                });
            }
        }
    }
    tx.commit()?;

    Ok(created)
}

pub fn get_allocation(conn: &Connection, allocation_id: i64) -> Result<Allocation> {
    conn.query_row(
        "SELECT allocation_id, node_id, ip, port, alias, server_id
         FROM allocations WHERE allocation_id = ?1",
        rusqlite::params![allocation_id],
        allocation_from_row,
    )
    .optional()?
    .ok_or_else(|| ControlError::not_found("allocation", allocation_id))
}

pub fn list_allocations(conn: &Connection, node_id: Uuid) -> Result<Vec<Allocation>> {
    let mut stmt = conn.prepare(
        "SELECT allocation_id, node_id, ip, port, alias, server_id
         FROM allocations WHERE node_id = ?1 ORDER BY ip, port",
    )?;
    let allocations = stmt
        .query_map(rusqlite::params![node_id.to_string()], allocation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(allocations)
}

pub fn list_server_allocations(conn: &Connection, server_id: Uuid) -> Result<Vec<Allocation>> {
    let mut stmt = conn.prepare(
        "SELECT allocation_id, node_id, ip, port, alias, server_id
         FROM allocations WHERE server_id = ?1 ORDER BY ip, port",
    )?;
    let allocations = stmt
        .query_map(rusqlite::params![server_id.to_string()], allocation_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(allocations)
}

/// Delete an unassigned allocation.
pub fn delete_allocation(conn: &Connection, node_id: Uuid, allocation_id: i64) -> Result<()> {
    let allocation = get_allocation(conn, allocation_id)?;
    if allocation.node_id != node_id {
        return Err(ControlError::not_found("allocation", allocation_id));
    }
    if let Some(server_id) = allocation.server_id {
        return Err(ControlError::AllocationConflict(format!(
            "allocation {} is assigned to server {}",
            allocation_id, server_id
        )));
    }
    conn.execute(
        "DELETE FROM allocations WHERE allocation_id = ?1 AND server_id IS NULL",
        rusqlite::params![allocation_id],
    )?;
    Ok(())
}
