mod error;

pub use error::{DaemonError, DaemonErrorKind};

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ControlError;
use crate::model::{AuthToken, Node, SystemInformation};

/// Longest daemon error body kept in a classified error.
const MAX_ERROR_BODY: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

/// Where a daemon lives and the credential to present to it.
#[derive(Clone)]
pub struct DaemonTarget {
    node_id: Uuid,
    base_url: Url,
    secret: String,
}

impl DaemonTarget {
    pub fn new(node: &Node, token: &AuthToken) -> Result<Self, ControlError> {
        let base_url = Url::parse(&node.daemon_url()).map_err(|e| {
            ControlError::invalid("fqdn", format!("cannot address daemon at {}: {}", node.fqdn, e))
        })?;
        Ok(Self {
            node_id: node.node_id,
            base_url,
            secret: token.secret.clone(),
        })
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

/// Raw successful daemon response.
#[derive(Debug, Clone)]
pub struct DaemonResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl DaemonResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DaemonError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| DaemonError::MalformedResponse(e.to_string()))
    }
}

/// Authenticated HTTP client for node daemons.
///
/// Every failure is classified into a [`DaemonError`]; nothing is retried.
#[derive(Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    user_agent: String,
}

impl DaemonClient {
    pub fn new(timeouts: DaemonTimeouts) -> anyhow::Result<Self> {
        use anyhow::Context;

        let http = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .context("Failed to build daemon HTTP client")?;

        Ok(Self {
            http,
            user_agent: format!("fleet-control/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Send one request to a daemon.
    pub async fn send(
        &self,
        target: &DaemonTarget,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<DaemonResponse, DaemonError> {
        let url = target
            .base_url
            .join(path)
            .map_err(|e| DaemonError::Unreachable(format!("invalid daemon path {}: {}", path, e)))?;
        let request_id = Uuid::new_v4().to_string();

        let mut req = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(&target.secret)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .header("x-request-id", &request_id);
        if let Some(b) = body {
            req = req.json(b);
        }

        debug!(
            "Daemon {} {} (node={}, request_id={})",
            method, url, target.node_id, request_id
        );

        let resp = req.send().await.map_err(|e| {
            let err = DaemonError::from_transport(&e);
            warn!("Daemon {} {} failed ({}): {}", method, url, err.kind().code(), e);
            err
        })?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| {
            let err = DaemonError::from_transport(&e);
            warn!("Daemon {} {} body read failed ({}): {}", method, url, err.kind().code(), e);
            err
        })?;

        if status.is_success() {
            return Ok(DaemonResponse {
                status: status.as_u16(),
                body: bytes.to_vec(),
            });
        }

        let mut body_text = String::from_utf8_lossy(&bytes).to_string();
        if body_text.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body_text.is_char_boundary(cut) {
                cut -= 1;
            }
            body_text.truncate(cut);
        }
        let err = DaemonError::from_status(status.as_u16(), body_text);
        warn!(
            "Daemon {} {} returned {} (request_id={}): {}",
            method,
            url,
            status.as_u16(),
            request_id,
            err
        );
        Err(err)
    }

    /// Push a rendered configuration document to the daemon.
    pub async fn update_configuration<T: Serialize>(
        &self,
        target: &DaemonTarget,
        configuration: &T,
    ) -> Result<(), DaemonError> {
        let body = serde_json::to_value(configuration)
            .map_err(|e| DaemonError::MalformedResponse(format!("unserializable config: {}", e)))?;
        self.send(target, Method::POST, "/api/update", Some(&body))
            .await
            .map(|_| ())
    }

    /// Fetch the daemon's view of its host.
    pub async fn system_information(
        &self,
        target: &DaemonTarget,
    ) -> Result<SystemInformation, DaemonError> {
        self.send(target, Method::GET, "/api/system", None)
            .await?
            .json()
    }

    /// Submit console commands to one server on the daemon.
    pub async fn send_commands(
        &self,
        target: &DaemonTarget,
        server_id: Uuid,
        commands: &[String],
    ) -> Result<(), DaemonError> {
        let path = format!("/api/servers/{}/commands", server_id);
        let body = serde_json::json!({ "commands": commands });
        self.send(target, Method::POST, &path, Some(&body))
            .await
            .map(|_| ())
    }
}
