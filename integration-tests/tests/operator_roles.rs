use crate::common::{accepting_daemon, TestPanel};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_missing_key_unauthorized() {
    let panel = TestPanel::start().await;

    let resp = panel.http.get(panel.url("/api/nodes")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = panel
        .http
        .get(panel.url("/api/nodes"))
        .header("x-api-key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Health stays open.
    let body = panel
        .http
        .get(panel.url("/health"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["secured"], false);
}

#[tokio::test]
async fn test_console_key_limited_to_commands() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/api/servers/[0-9a-f-]+/commands$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&daemon)
        .await;

    let node = panel.create_node(&daemon, json!({})).await;
    let node_id = node["node_id"].as_str().unwrap().to_string();

    let resp = panel
        .console(Method::PATCH, &format!("/api/nodes/{}/settings", node_id))
        .json(&json!({ "name": "renamed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["error_code"], "forbidden");

    let allocations = panel.create_allocations(&node_id, "25565").await;
    let resp = panel.create_server(&node_id, allocations[0], 512).await;
    let server_id = resp.json::<Value>().await.unwrap()["server"]["server_id"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = panel
        .console(Method::POST, &format!("/api/servers/{}/command", server_id))
        .json(&json!({ "command": "list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let node = panel
        .admin(Method::GET, &format!("/api/nodes/{}", node_id))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_ne!(node["name"], "renamed");
}
