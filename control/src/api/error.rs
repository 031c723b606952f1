use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::daemon::{DaemonError, DaemonErrorKind};
use crate::error::{CommandError, ControlError};
use crate::types::ErrorResponse;

/// JSON error returned by every operator and remote endpoint.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn daemon_status(err: &DaemonError) -> StatusCode {
    match err.kind() {
        DaemonErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let code = err.code();
        let message = err.to_string();

        match &err {
            ControlError::NotFound { entity, id } => ApiError::new(StatusCode::NOT_FOUND, code, message)
                .with_details(json!({ "entity": entity, "id": id })),
            ControlError::Invalid { field, .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
                    .with_details(json!({ "field": field }))
            }
            ControlError::CapacityDenied { dimension, .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
                    .with_details(json!({ "dimension": dimension }))
            }
            ControlError::EligibilityDenied(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
            }
            ControlError::NodeHasServers { servers, .. } => {
                ApiError::new(StatusCode::CONFLICT, code, message)
                    .with_details(json!({ "servers": servers }))
            }
            ControlError::AllocationConflict(_) => ApiError::new(StatusCode::CONFLICT, code, message),
            ControlError::ConfigurationDrift { node_id, cause } => {
                ApiError::new(StatusCode::BAD_GATEWAY, code, message).with_details(json!({
                    "node_id": node_id,
                    "cause": cause.kind().code(),
                }))
            }
            ControlError::Daemon(e) => ApiError::new(daemon_status(e), code, message),
            ControlError::Command(e) => match e {
                CommandError::EmptyCommand => {
                    ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, code, message)
                }
                CommandError::NodeUnderMaintenance(_) => {
                    ApiError::new(StatusCode::CONFLICT, code, message)
                }
                CommandError::ServerOffline(_) => ApiError::new(StatusCode::BAD_GATEWAY, code, message),
                CommandError::Daemon(d) => ApiError::new(daemon_status(d), code, message),
            },
            ControlError::Storage(_)
            | ControlError::Pool(_)
            | ControlError::Join(_)
            | ControlError::Serialization(_) => {
                error!("Internal error: {}", err);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, code, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code.to_string(),
            request_id: Uuid::new_v4(),
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Dimension;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ControlError, StatusCode, &str)> = vec![
            (
                ControlError::capacity_denied(Dimension::Memory, "full"),
                StatusCode::UNPROCESSABLE_ENTITY,
                "capacity_denied",
            ),
            (
                ControlError::NodeHasServers {
                    node_id: Uuid::nil(),
                    servers: 1,
                },
                StatusCode::CONFLICT,
                "node_has_servers",
            ),
            (
                CommandError::ServerOffline(Uuid::nil()).into(),
                StatusCode::BAD_GATEWAY,
                "server_offline",
            ),
            (
                DaemonError::AuthRejected(401).into(),
                StatusCode::BAD_GATEWAY,
                "auth_rejected",
            ),
            (DaemonError::Timeout.into(), StatusCode::GATEWAY_TIMEOUT, "timeout"),
            (
                ControlError::not_found("node", Uuid::nil()),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
        ];

        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.code, code);
        }
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let api = ApiError::from(ControlError::Serialization("secret path".to_string()));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, "internal error");
    }
}
