use fleet_control::build_app;
use fleet_control::config::Settings;
use fleet_control::daemon::DaemonTimeouts;
use fleet_control::services::SystemResolver;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ADMIN_KEY: &str = "admin-test-key";
pub const CONSOLE_KEY: &str = "console-test-key";

/// A control plane served in-process on an ephemeral port.
pub struct TestPanel {
    pub addr: SocketAddr,
    pub http: reqwest::Client,
    server: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestPanel {
    pub async fn start() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let settings = Settings {
            bind: addr,
            db_path: Some(temp_dir.path().join("control.db")),
            panel_url: format!("http://{}", addr),
            tls: None,
            admin_key: ADMIN_KEY.to_string(),
            console_key: Some(CONSOLE_KEY.to_string()),
            daemon_timeouts: DaemonTimeouts {
                connect: Duration::from_secs(1),
                request: Duration::from_secs(2),
            },
            log_level: "debug".to_string(),
        };

        let app = build_app(&settings, Arc::new(SystemResolver)).expect("Failed to build app");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        Self {
            addr,
            http: reqwest::Client::new(),
            server,
            _temp_dir: temp_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("x-api-key", ADMIN_KEY)
    }

    pub fn console(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("x-api-key", CONSOLE_KEY)
    }

    /// Register a node pointing at a mock daemon and return its JSON.
    pub async fn create_node(&self, daemon: &MockServer, extra: Value) -> Value {
        let mut body = json!({
            "fqdn": "127.0.0.1",
            "scheme": "http",
            "daemon_listen": daemon.address().port(),
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                body.insert(k.clone(), v.clone());
            }
        }

        let resp = self
            .admin(Method::POST, "/api/nodes")
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json::<Value>().await.unwrap()["node"].clone()
    }

    /// Create allocations and return their ids in port order.
    pub async fn create_allocations(&self, node_id: &str, ports: &str) -> Vec<i64> {
        let resp = self
            .admin(Method::POST, &format!("/api/nodes/{}/allocations", node_id))
            .json(&json!({ "ip": "127.0.0.1", "ports": ports }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = resp.json::<Value>().await.unwrap();
        body["allocations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["allocation_id"].as_i64().unwrap())
            .collect()
    }

    pub async fn create_server(
        &self,
        node_id: &str,
        allocation_id: i64,
        memory: i64,
    ) -> reqwest::Response {
        self.admin(Method::POST, "/api/servers")
            .json(&json!({
                "node_id": node_id,
                "name": "survival",
                "memory": memory,
                "disk": 1024,
                "cpu": 100,
                "allocation_id": allocation_id,
            }))
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestPanel {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// A mock daemon that accepts configuration pushes.
pub async fn accepting_daemon() -> MockServer {
    let daemon = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/update"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "applied": true })))
        .mount(&daemon)
        .await;
    daemon
}

/// Bodies of every configuration push the daemon received, in order.
pub async fn received_configurations(daemon: &MockServer) -> Vec<Value> {
    daemon
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/api/update")
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

pub fn daemon_credential(config: &Value) -> String {
    format!(
        "Bearer {}.{}",
        config["token_id"].as_str().unwrap(),
        config["token"].as_str().unwrap()
    )
}
