use serde::Deserialize;
use serde_json::Value;

/// Error body returned by the control plane.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub request_id: Option<String>,
    pub details: Option<Value>,
}
