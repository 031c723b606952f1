use crate::common::{accepting_daemon, received_configurations, TestPanel};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

#[tokio::test]
async fn test_node_lifecycle() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;

    let node = panel.create_node(&daemon, json!({ "name": "alpha" })).await;
    let node_id = node["node_id"].as_str().unwrap().to_string();
    assert_eq!(node["name"], "alpha");
    assert_eq!(node["scheme"], "http");
    assert_eq!(node["config_drift"], false);

    let listed = panel
        .admin(Method::GET, "/api/nodes")
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(listed["nodes"].as_array().unwrap().len(), 1);

    // Settings edit is pushed to the daemon.
    let resp = panel
        .admin(Method::PATCH, &format!("/api/nodes/{}/settings", node_id))
        .json(&json!({ "upload_size": 512 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["sync"]["outcome"], "synced");
    assert_eq!(body["node"]["upload_size"], 512);

    let pushed = received_configurations(&daemon).await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["api"]["upload_limit"], 512);
    assert_eq!(pushed[0]["uuid"], node_id.as_str());

    // The rendered document matches what was pushed.
    let yaml = panel
        .admin(Method::GET, &format!("/api/nodes/{}/configuration", node_id))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(yaml.contains("upload_limit: 512"));
    assert!(yaml.contains(&format!("http://{}", panel.addr)));

    let resp = panel
        .admin(Method::DELETE, &format!("/api/nodes/{}", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = panel
        .admin(Method::GET, &format!("/api/nodes/{}", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["error_code"], "not_found");
}

#[tokio::test]
async fn test_delete_blocked_while_servers_exist() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;

    let node = panel.create_node(&daemon, json!({})).await;
    let node_id = node["node_id"].as_str().unwrap();
    let allocations = panel.create_allocations(node_id, "25565").await;
    let resp = panel.create_server(node_id, allocations[0], 1024).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = panel
        .admin(Method::DELETE, &format!("/api/nodes/{}", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["error_code"], "node_has_servers");
    assert_eq!(body["details"]["servers"], 1);

    // Node is untouched.
    let resp = panel
        .admin(Method::GET, &format!("/api/nodes/{}", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_node_settings_rejected() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;

    let resp = panel
        .admin(Method::POST, "/api/nodes")
        .json(&json!({
            "fqdn": "127.0.0.1",
            "scheme": "http",
            "daemon_listen": daemon.address().port(),
            "upload_size": 4096,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["error_code"], "invalid");
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn test_optional_settings_can_be_cleared() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;
    let node = panel
        .create_node(
            &daemon,
            json!({ "description": "rack 4", "daemon_sftp_alias": "sftp.example.com" }),
        )
        .await;
    let node_id = node["node_id"].as_str().unwrap().to_string();
    assert_eq!(node["description"], "rack 4");

    // Absent fields are kept.
    let resp = panel
        .admin(Method::PATCH, &format!("/api/nodes/{}/settings", node_id))
        .json(&json!({ "name": "renamed" }))
        .send()
        .await
        .unwrap();
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["node"]["description"], "rack 4");
    assert_eq!(body["node"]["daemon_sftp_alias"], "sftp.example.com");

    let resp = panel
        .admin(Method::PATCH, &format!("/api/nodes/{}/settings", node_id))
        .json(&json!({ "description": null, "daemon_sftp_alias": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.json::<Value>().await.unwrap();
    assert!(body["node"]["description"].is_null());
    assert!(body["node"]["daemon_sftp_alias"].is_null());
    assert_eq!(body["node"]["name"], "renamed");
}
