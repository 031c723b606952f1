use serde::Serialize;
use thiserror::Error;

/// Classified failure of a call to a node daemon.
///
/// Raw transport errors never leave the daemon client; every failure is
/// mapped to one of these kinds exactly once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaemonError {
    #[error("daemon request timed out")]
    Timeout,

    #[error("daemon is unreachable: {0}")]
    Unreachable(String),

    #[error("daemon rejected the panel's credentials (HTTP {0})")]
    AuthRejected(u16),

    #[error("daemon refused the request (HTTP {status}): {body}")]
    DaemonRejected { status: u16, body: String },

    #[error("daemon returned a malformed response: {0}")]
    MalformedResponse(String),

    /// The panel could not address the daemon, so nothing was sent.
    #[error("daemon cannot be addressed: {0}")]
    Unaddressable(String),
}

/// Coarse kind of a [`DaemonError`], used in structured outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonErrorKind {
    Timeout,
    Unreachable,
    AuthRejected,
    DaemonRejected,
    MalformedResponse,
    Unaddressable,
}

impl DaemonErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            DaemonErrorKind::Timeout => "timeout",
            DaemonErrorKind::Unreachable => "unreachable",
            DaemonErrorKind::AuthRejected => "auth_rejected",
            DaemonErrorKind::DaemonRejected => "daemon_rejected",
            DaemonErrorKind::MalformedResponse => "malformed_response",
            DaemonErrorKind::Unaddressable => "unaddressable",
        }
    }
}

impl DaemonError {
    pub fn kind(&self) -> DaemonErrorKind {
        match self {
            DaemonError::Timeout => DaemonErrorKind::Timeout,
            DaemonError::Unreachable(_) => DaemonErrorKind::Unreachable,
            DaemonError::AuthRejected(_) => DaemonErrorKind::AuthRejected,
            DaemonError::DaemonRejected { .. } => DaemonErrorKind::DaemonRejected,
            DaemonError::MalformedResponse(_) => DaemonErrorKind::MalformedResponse,
            DaemonError::Unaddressable(_) => DaemonErrorKind::Unaddressable,
        }
    }

    /// Classify a non-2xx daemon response.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            502..=504 => DaemonError::Unreachable(format!("gateway returned HTTP {}", status)),
            401 | 403 => DaemonError::AuthRejected(status),
            _ => DaemonError::DaemonRejected { status, body },
        }
    }

    /// Classify a transport-level failure from reqwest.
    ///
    /// Only the classification is kept; callers log the raw error.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return DaemonError::Timeout;
        }
        if err.is_decode() {
            return DaemonError::MalformedResponse("response body could not be decoded".to_string());
        }
        if err.is_connect() {
            return DaemonError::Unreachable("connection failed".to_string());
        }
        DaemonError::Unreachable("request could not be completed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_statuses_are_unreachable() {
        for status in [502, 503, 504] {
            assert_eq!(
                DaemonError::from_status(status, String::new()).kind(),
                DaemonErrorKind::Unreachable
            );
        }
    }

    #[test]
    fn test_auth_statuses_are_auth_rejected() {
        assert_eq!(
            DaemonError::from_status(401, String::new()),
            DaemonError::AuthRejected(401)
        );
        assert_eq!(
            DaemonError::from_status(403, String::new()),
            DaemonError::AuthRejected(403)
        );
    }

    #[test]
    fn test_other_statuses_keep_code_and_body() {
        let err = DaemonError::from_status(409, "server is busy".to_string());
        assert_eq!(
            err,
            DaemonError::DaemonRejected {
                status: 409,
                body: "server is busy".to_string()
            }
        );
        assert_eq!(
            DaemonError::from_status(500, String::new()).kind(),
            DaemonErrorKind::DaemonRejected
        );
    }
}
