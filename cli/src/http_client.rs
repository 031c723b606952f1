use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Method, StatusCode, Url};
use std::io::Write;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::ErrorResponse;

#[derive(Clone)]
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
    api_key: Option<String>,
    user_agent: String,
    retries: u32,
}

impl Client {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid base URL")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            http,
            api_key,
            user_agent: format!("fleetctl/{}", env!("CARGO_PKG_VERSION")),
            retries,
        })
    }

    pub fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).with_context(|| {
            format!(
                "Failed to join base_url={} with path={}",
                self.base_url, path
            )
        })
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header("user-agent", &self.user_agent)
            .header("x-request-id", Uuid::new_v4().to_string());
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let bytes = self.send_json_bytes(method, path, body).await?;
        print_bytes(&bytes)?;
        Ok(())
    }

    pub async fn send_json_bytes(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let url = self.build_url(path)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut req = self.request(method.clone(), url.clone());
            if let Some(b) = &body {
                req = req.json(b);
            }

            debug!("HTTP {} {} (attempt {})", method, url, attempt);
            let resp = req.send().await.context("Request failed")?;
            let status = resp.status();

            if status.is_success() {
                let bytes = resp.bytes().await.unwrap_or_default().to_vec();
                return Ok(bytes);
            }

            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let bytes = resp.bytes().await.unwrap_or_default();

            // Retry handling: 429, and GET/DELETE on 5xx.
            if attempt <= self.retries && should_retry(&method, status) {
                tokio::time::sleep(retry_sleep(status, retry_after)).await;
                continue;
            }

            return Err(render_error(&method, &url, status, &bytes));
        }
    }

    /// Stream a response body into a file.
    pub async fn download_to_file(&self, path: &str, out_path: &std::path::Path) -> Result<()> {
        let url = self.build_url(path)?;

        debug!("HTTP(download) GET {}", url);
        let resp = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .context("Request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let bytes = resp.bytes().await.unwrap_or_default();
            return Err(render_error(&Method::GET, &url, status, &bytes));
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create dir {:?}", parent))?;
        }

        let mut file = std::fs::File::create(out_path)
            .with_context(|| format!("Failed to create {:?}", out_path))?;

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Stream read failed")?;
            file.write_all(&chunk).context("file write failed")?;
        }
        Ok(())
    }
}

fn render_error(method: &Method, url: &Url, status: StatusCode, bytes: &[u8]) -> anyhow::Error {
    match serde_json::from_slice::<ErrorResponse>(bytes) {
        Ok(e) => anyhow::anyhow!(
            "HTTP {} {} failed: status={} error_code={:?} error={:?} request_id={:?} details={}",
            method,
            url,
            status.as_u16(),
            e.error_code,
            e.error,
            e.request_id,
            e.details
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string())
        ),
        Err(_) => anyhow::anyhow!(
            "HTTP {} {} failed: status={} body={}",
            method,
            url,
            status.as_u16(),
            String::from_utf8_lossy(bytes)
        ),
    }
}

fn should_retry(method: &Method, status: StatusCode) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status.is_server_error() {
        return matches!(*method, Method::GET | Method::DELETE);
    }
    false
}

fn retry_sleep(status: StatusCode, retry_after: Option<u64>) -> Duration {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Duration::from_secs(retry_after.unwrap_or(1));
    }
    Duration::from_millis(300)
}

pub fn print_bytes(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        println!("{}", r#"{"success":true}"#);
        return Ok(());
    }
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(bytes) {
        println!("{}", serde_json::to_string_pretty(&v)?);
    } else {
        println!("{}", String::from_utf8_lossy(bytes));
    }
    Ok(())
}
