use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::db::execute_async;
use crate::services::token_manager;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorRole {
    Admin,
    Console,
}

/// An authenticated operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operator {
    pub role: OperatorRole,
}

/// Decides what an operator may do.
pub trait Authorizer: Send + Sync {
    fn identify(&self, api_key: &str) -> Option<Operator>;
    fn can_control_console(&self, operator: &Operator, server_id: Uuid) -> bool;
    fn can_update_settings(&self, operator: &Operator) -> bool;
}

/// Static key authorizer: an admin key with full access and an optional
/// console key that may only send console commands.
pub struct KeyAuthorizer {
    admin: [u8; 32],
    console: Option<[u8; 32]>,
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl KeyAuthorizer {
    pub fn new(admin_key: &str, console_key: Option<&str>) -> Self {
        Self {
            admin: digest(admin_key),
            console: console_key.map(digest),
        }
    }
}

impl Authorizer for KeyAuthorizer {
    fn identify(&self, api_key: &str) -> Option<Operator> {
        let presented = digest(api_key);
        if digests_match(&self.admin, &presented) {
            return Some(Operator {
                role: OperatorRole::Admin,
            });
        }
        match &self.console {
            Some(console) if digests_match(console, &presented) => Some(Operator {
                role: OperatorRole::Console,
            }),
            _ => None,
        }
    }

    fn can_control_console(&self, _operator: &Operator, _server_id: Uuid) -> bool {
        true
    }

    fn can_update_settings(&self, operator: &Operator) -> bool {
        operator.role == OperatorRole::Admin
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing x-api-key header"))?;

        state
            .authorizer
            .identify(key)
            .ok_or_else(|| ApiError::unauthorized("unknown API key"))
    }
}

/// Reject operators who may not change panel state.
pub fn require_settings(state: &AppState, operator: &Operator) -> Result<(), ApiError> {
    if state.authorizer.can_update_settings(operator) {
        Ok(())
    } else {
        Err(ApiError::forbidden("operator may not update settings"))
    }
}

pub(crate) fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// A node daemon authenticated with `Bearer <token_id>.<secret>`.
#[derive(Debug, Clone, Copy)]
pub struct DaemonNode(pub Uuid);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for DaemonNode {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let credential = bearer(parts).ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
        let (token_id, secret) = credential
            .split_once('.')
            .map(|(id, secret)| (id.to_string(), secret.to_string()))
            .ok_or_else(|| ApiError::unauthorized("malformed daemon credential"))?;

        let node_id = execute_async(&state.db, move |conn| {
            token_manager::authenticate(conn, &token_id, &secret)
        })
        .await?;

        node_id
            .map(DaemonNode)
            .ok_or_else(|| ApiError::unauthorized("invalid daemon credential"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roles() {
        let auth = KeyAuthorizer::new("admin-key", Some("console-key"));
        let admin = auth.identify("admin-key").unwrap();
        let console = auth.identify("console-key").unwrap();

        assert!(auth.can_update_settings(&admin));
        assert!(!auth.can_update_settings(&console));
        assert!(auth.can_control_console(&console, Uuid::nil()));
        assert!(auth.identify("nope").is_none());
    }

    #[test]
    fn test_console_key_optional() {
        let auth = KeyAuthorizer::new("admin-key", None);
        assert!(auth.identify("").is_none());
        assert_eq!(
            auth.identify("admin-key"),
            Some(Operator {
                role: OperatorRole::Admin
            })
        );
    }
}
