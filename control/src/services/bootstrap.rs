use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

pub const INSTALL_TOKEN_TTL: Duration = Duration::from_secs(10 * 60);
const INSTALL_TOKEN_LENGTH: usize = 48;

struct InstallToken {
    node_id: Uuid,
    expires_at: Instant,
}

/// Short-lived install tokens, kept in memory only.
///
/// A token authorizes fetching one node's rendered configuration and nothing
/// else. Tokens do not survive a restart.
pub struct DeployTokens {
    ttl: Duration,
    tokens: Mutex<HashMap<String, InstallToken>>,
}

impl Default for DeployTokens {
    fn default() -> Self {
        Self::with_ttl(INSTALL_TOKEN_TTL)
    }
}

impl DeployTokens {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self, node_id: Uuid) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(INSTALL_TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let now = Instant::now();

        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.retain(|_, t| t.expires_at > now);
        tokens.insert(
            token.clone(),
            InstallToken {
                node_id,
                expires_at: now + self.ttl,
            },
        );
        token
    }

    /// Whether `token` is a live install token for `node_id`.
    pub fn authorizes(&self, token: &str, node_id: Uuid) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens
            .get(token)
            .map(|t| t.node_id == node_id && t.expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Drop every install token issued for a node.
    pub fn revoke_node(&self, node_id: Uuid) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.retain(|_, t| t.node_id != node_id);
    }
}

/// Build the one-line shell command that configures a node's daemon.
pub fn bootstrap_command(
    panel_url: &str,
    install_token: &str,
    node_id: Uuid,
    panel_secured: bool,
    use_container_runtime: bool,
) -> String {
    let mut configure = format!(
        "wings configure --panel-url {} --token {} --node {}",
        panel_url.trim_end_matches('/'),
        install_token,
        node_id
    );
    if !panel_secured {
        configure.push_str(" --allow-insecure");
    }

    if use_container_runtime {
        format!(
            "docker compose exec -it $(docker ps --filter \"name=wings\" --format \"{{{{.Names}}}}\") {}",
            configure
        )
    } else {
        format!("cd /etc/pelican && sudo {}", configure)
    }
}

/// Issue an install token and wrap it in a bootstrap command.
pub fn generate_bootstrap_command(
    tokens: &DeployTokens,
    panel_url: &str,
    node_id: Uuid,
    panel_secured: bool,
    use_container_runtime: bool,
) -> String {
    let token = tokens.issue(node_id);
    info!(
        "Generated bootstrap command for node {} (container_runtime={})",
        node_id, use_container_runtime
    );
    bootstrap_command(panel_url, &token, node_id, panel_secured, use_container_runtime)
}
