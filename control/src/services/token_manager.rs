use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::db::uuid_column;
use crate::error::{ControlError, Result};
use crate::model::{unix_now, AuthToken};

pub const TOKEN_ID_LENGTH: usize = 16;
pub const TOKEN_LENGTH: usize = 64;

/// Outcome of a token reset: the token now in force and the one it replaced.
///
/// The replaced token is only handed to the follow-up configuration push,
/// which must authenticate with the credentials the daemon still holds.
#[derive(Debug, Clone)]
pub struct Rotation {
    pub current: AuthToken,
    pub previous: Option<AuthToken>,
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn ensure_node(conn: &Connection, node_id: Uuid) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM nodes WHERE node_id = ?1",
            rusqlite::params![node_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(ControlError::not_found("node", node_id)),
    }
}

/// Store a fresh token for `node_id`, replacing any previous one.
///
/// The single-row upsert is what guarantees there is never more than one
/// valid token per node.
fn store_new(conn: &Connection, node_id: Uuid) -> Result<AuthToken> {
    let token = AuthToken {
        node_id,
        token_id: random_string(TOKEN_ID_LENGTH),
        secret: random_string(TOKEN_LENGTH),
        issued_at: unix_now(),
    };

    conn.execute(
        "INSERT INTO node_tokens (node_id, token_id, secret, issued_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(node_id) DO UPDATE SET
            token_id = excluded.token_id,
            secret = excluded.secret,
            issued_at = excluded.issued_at",
        rusqlite::params![
            node_id.to_string(),
            token.token_id,
            token.secret,
            token.issued_at
        ],
    )?;

    Ok(token)
}

/// Issue a token for a node. Used at registration time.
pub fn issue(conn: &Connection, node_id: Uuid) -> Result<AuthToken> {
    ensure_node(conn, node_id)?;
    let token = store_new(conn, node_id)?;
    info!(
        "Issued daemon token for node {} (token_id={}, fingerprint={})",
        node_id,
        token.token_id,
        fingerprint(&token)
    );
    Ok(token)
}

/// Replace a node's token, returning both the new and the superseded token.
pub fn reset(conn: &mut Connection, node_id: Uuid) -> Result<Rotation> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_node(&tx, node_id)?;
    let previous = find(&tx, node_id)?;
    let current = store_new(&tx, node_id)?;
    tx.commit()?;

    info!(
        "Reset daemon token for node {} (token_id={}, fingerprint={})",
        node_id,
        current.token_id,
        fingerprint(&current)
    );
    Ok(Rotation { current, previous })
}

fn find(conn: &Connection, node_id: Uuid) -> Result<Option<AuthToken>> {
    let token = conn
        .query_row(
            "SELECT node_id, token_id, secret, issued_at FROM node_tokens WHERE node_id = ?1",
            rusqlite::params![node_id.to_string()],
            |row| {
                Ok(AuthToken {
                    node_id: uuid_column(row, 0)?,
                    token_id: row.get(1)?,
                    secret: row.get(2)?,
                    issued_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(token)
}

/// The token currently in force for a node.
pub fn current(conn: &Connection, node_id: Uuid) -> Result<AuthToken> {
    find(conn, node_id)?.ok_or_else(|| ControlError::not_found("daemon token", node_id))
}

/// Check a presented credential pair against the node's current token.
pub fn validate(conn: &Connection, node_id: Uuid, token_id: &str, secret: &str) -> Result<bool> {
    Ok(match find(conn, node_id)? {
        Some(token) => token.token_id == token_id && secrets_match(&token.secret, secret),
        None => false,
    })
}

/// Resolve a presented credential pair to the node it belongs to.
pub fn authenticate(conn: &Connection, token_id: &str, secret: &str) -> Result<Option<Uuid>> {
    let row: Option<(Uuid, String)> = conn
        .query_row(
            "SELECT node_id, secret FROM node_tokens WHERE token_id = ?1",
            rusqlite::params![token_id],
            |row| Ok((uuid_column(row, 0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(node_id, stored)| secrets_match(&stored, secret).then_some(node_id)))
}

/// Short SHA-256 fingerprint of a token secret, safe to log and display.
pub fn fingerprint(token: &AuthToken) -> String {
    let digest = Sha256::digest(token.secret.as_bytes());
    hex::encode(&digest[..8])
}

fn secrets_match(stored: &str, presented: &str) -> bool {
    // Compare digests so the comparison time does not depend on the secret.
    let a = Sha256::digest(stored.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
