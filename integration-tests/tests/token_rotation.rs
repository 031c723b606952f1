use crate::common::{accepting_daemon, daemon_credential, received_configurations, TestPanel};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_concurrent_resets_leave_one_valid_token() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;
    let node = panel.create_node(&daemon, json!({})).await;
    let node_id = node["node_id"].as_str().unwrap().to_string();

    let resets = (0..5).map(|_| {
        panel
            .admin(Method::POST, &format!("/api/nodes/{}/token/reset", node_id))
            .send()
    });
    let responses = futures::future::join_all(resets).await;
    for resp in responses {
        let resp = resp.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.json::<Value>().await.unwrap();
        assert_eq!(body["sync"]["outcome"], "synced");
    }

    let pushed = received_configurations(&daemon).await;
    assert_eq!(pushed.len(), 5);

    // Only the credential the daemon received last authenticates.
    let (last, earlier) = pushed.split_last().unwrap();
    let resp = panel
        .http
        .get(panel.url("/api/remote/servers"))
        .header("authorization", daemon_credential(last))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    for config in earlier {
        let resp = panel
            .http
            .get(panel.url("/api/remote/servers"))
            .header("authorization", daemon_credential(config))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    let current = panel
        .admin(Method::GET, &format!("/api/nodes/{}/configuration", node_id))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(current.contains(last["token"].as_str().unwrap()));
}

#[tokio::test]
async fn test_remote_listing_reports_node_servers() {
    let panel = TestPanel::start().await;
    let daemon = accepting_daemon().await;
    let node = panel.create_node(&daemon, json!({})).await;
    let node_id = node["node_id"].as_str().unwrap().to_string();
    let allocations = panel.create_allocations(&node_id, "25565-25566").await;
    let resp = panel.create_server(&node_id, allocations[1], 512).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Any push hands the daemon its current credential.
    let resp = panel
        .admin(Method::POST, &format!("/api/nodes/{}/sync", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let pushed = received_configurations(&daemon).await;

    let body = panel
        .http
        .get(panel.url("/api/remote/servers"))
        .header("authorization", daemon_credential(&pushed[0]))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["memory"], 512);
    assert_eq!(data[0]["allocations"], json!(["127.0.0.1:25566"]));
}

#[tokio::test]
async fn test_reset_with_unreachable_daemon_keeps_new_token() {
    let panel = TestPanel::start().await;
    let daemon = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/update"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&daemon)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/update"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&daemon)
        .await;

    let node = panel.create_node(&daemon, json!({})).await;
    let node_id = node["node_id"].as_str().unwrap().to_string();

    // Learn the credential the daemon holds before the reset.
    let resp = panel
        .admin(Method::POST, &format!("/api/nodes/{}/sync", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = panel
        .admin(Method::POST, &format!("/api/nodes/{}/token/reset", node_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body = resp.json::<Value>().await.unwrap();
    assert_eq!(body["sync"]["outcome"], "configuration_drift");
    assert_eq!(body["sync"]["cause"], "unreachable");

    let pushed = received_configurations(&daemon).await;
    assert_eq!(pushed.len(), 2);
    let (held, rotated) = (&pushed[0], &pushed[1]);
    assert_eq!(rotated["token_id"], body["token_id"]);

    let resp = panel
        .http
        .get(panel.url("/api/remote/servers"))
        .header("authorization", daemon_credential(held))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = panel
        .http
        .get(panel.url("/api/remote/servers"))
        .header("authorization", daemon_credential(rotated))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let node = panel
        .admin(Method::GET, &format!("/api/nodes/{}", node_id))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(node["config_drift"], true);
}
