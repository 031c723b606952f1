mod config;
mod error;
mod http_client;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use reqwest::Method;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use config::{default_config_path, Config};
use http_client::{print_bytes, Client};

#[derive(Parser, Debug)]
#[command(name = "fleetctl")]
#[command(about = "Operator CLI for the fleet control plane", long_about = None)]
struct Cli {
    /// Control plane base URL
    #[arg(long, env = "FLEETCTL_BASE_URL")]
    base_url: Option<String>,

    /// Operator API key
    #[arg(long, env = "FLEETCTL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Config file path
    #[arg(long, env = "FLEETCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Retries for 429 and idempotent 5xx responses
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save base URL and API key to the config file
    Login {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: String,
    },
    /// Check control plane health
    Health,
    #[command(subcommand)]
    Nodes(NodeCommand),
    #[command(subcommand)]
    Allocations(AllocationCommand),
    #[command(subcommand)]
    Servers(ServerCommand),
}

#[derive(ClapArgs, Debug, Default)]
struct LimitArgs {
    /// Memory limit in MiB: `unlimited`, `LIMIT` or `LIMIT:OVERALLOCATE`
    #[arg(long)]
    memory: Option<String>,
    /// Disk limit in MiB: `unlimited`, `LIMIT` or `LIMIT:OVERALLOCATE`
    #[arg(long)]
    disk: Option<String>,
    /// CPU limit in percent: `unlimited`, `LIMIT` or `LIMIT:OVERALLOCATE`
    #[arg(long)]
    cpu: Option<String>,
}

#[derive(Subcommand, Debug)]
enum NodeCommand {
    List,
    Get { node_id: Uuid },
    /// Report DNS and TLS eligibility of an address
    Validate { address: String },
    Create {
        #[arg(long)]
        fqdn: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// http or https (defaults to what the address is eligible for)
        #[arg(long)]
        scheme: Option<String>,
        #[arg(long)]
        daemon_listen: Option<u16>,
        #[arg(long)]
        daemon_sftp: Option<u16>,
        #[arg(long)]
        upload_size: Option<u32>,
        #[arg(long)]
        private: bool,
        #[arg(long)]
        maintenance: bool,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[command(flatten)]
        limits: LimitArgs,
    },
    /// Patch node settings with a JSON object
    Update {
        node_id: Uuid,
        #[arg(long)]
        json: String,
    },
    Limits {
        node_id: Uuid,
        #[command(flatten)]
        limits: LimitArgs,
    },
    Delete { node_id: Uuid },
    ResetToken { node_id: Uuid },
    Sync { node_id: Uuid },
    /// Print or save the rendered daemon configuration
    Configuration {
        node_id: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a one-line daemon install command
    Bootstrap {
        node_id: Uuid,
        #[arg(long)]
        docker: bool,
    },
    /// Refresh the daemon's system information
    System { node_id: Uuid },
}

#[derive(Subcommand, Debug)]
enum AllocationCommand {
    List { node_id: Uuid },
    Create {
        node_id: Uuid,
        #[arg(long)]
        ip: String,
        /// e.g. `25565,25570-25580`
        #[arg(long)]
        ports: String,
        #[arg(long)]
        alias: Option<String>,
    },
    Delete { node_id: Uuid, allocation_id: i64 },
}

#[derive(Subcommand, Debug)]
enum ServerCommand {
    List {
        #[arg(long)]
        node: Option<Uuid>,
    },
    Get { server_id: Uuid },
    Create {
        #[arg(long)]
        node: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        memory: i64,
        #[arg(long)]
        disk: i64,
        #[arg(long)]
        cpu: i64,
        #[arg(long)]
        allocation: i64,
        #[arg(long = "additional-allocation")]
        additional: Vec<i64>,
    },
    Build {
        server_id: Uuid,
        #[arg(long)]
        memory: i64,
        #[arg(long)]
        disk: i64,
        #[arg(long)]
        cpu: i64,
    },
    /// Change the primary allocation
    Allocation {
        server_id: Uuid,
        #[arg(long)]
        allocation_id: i64,
    },
    Delete { server_id: Uuid },
    /// Send a console command
    Command { server_id: Uuid, text: String },
}

/// Parse `unlimited`, `LIMIT` or `LIMIT:OVERALLOCATE` into a limit body.
fn parse_limit(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") {
        return Ok(json!({ "mode": "unlimited" }));
    }
    let (limit, overallocate) = match raw.split_once(':') {
        Some((l, o)) => (l, o),
        None => (raw, "0"),
    };
    let limit: i64 = limit
        .trim()
        .parse()
        .with_context(|| format!("Invalid limit '{}'", raw))?;
    let overallocate: i64 = overallocate
        .trim()
        .parse()
        .with_context(|| format!("Invalid overallocate in '{}'", raw))?;
    Ok(json!({ "mode": "limited", "limit": limit, "overallocate": overallocate }))
}

fn limits_body(limits: &LimitArgs) -> Result<serde_json::Map<String, Value>> {
    let mut body = serde_json::Map::new();
    for (key, value) in [
        ("memory", &limits.memory),
        ("disk", &limits.disk),
        ("cpu", &limits.cpu),
    ] {
        if let Some(raw) = value {
            body.insert(key.to_string(), parse_limit(raw)?);
        }
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = Config::load(&config_path)?;

    if let Command::Login { base_url, api_key } = &cli.command {
        cfg.base_url = Some(base_url.clone());
        cfg.api_key = Some(api_key.clone());
        cfg.save(&config_path)?;
        println!("Saved credentials to {:?}", config_path);
        return Ok(());
    }

    let base_url = cli
        .base_url
        .clone()
        .or(cfg.base_url.clone())
        .context("No base URL; pass --base-url or run `fleetctl login`")?;
    let api_key = cli.api_key.clone().or(cfg.api_key.clone());
    let client = Client::new(
        &base_url,
        api_key,
        Duration::from_secs(cli.timeout_secs),
        cli.retries,
    )?;

    match cli.command {
        Command::Login { .. } => Ok(()),
        Command::Health => client.send_json(Method::GET, "/health", None).await,
        Command::Nodes(cmd) => run_nodes(&client, cmd).await,
        Command::Allocations(cmd) => run_allocations(&client, cmd).await,
        Command::Servers(cmd) => run_servers(&client, cmd).await,
    }
}

async fn run_nodes(client: &Client, cmd: NodeCommand) -> Result<()> {
    match cmd {
        NodeCommand::List => client.send_json(Method::GET, "/api/nodes", None).await,
        NodeCommand::Get { node_id } => {
            client
                .send_json(Method::GET, &format!("/api/nodes/{}", node_id), None)
                .await
        }
        NodeCommand::Validate { address } => {
            client
                .send_json(
                    Method::POST,
                    "/api/nodes/validate",
                    Some(json!({ "address": address })),
                )
                .await
        }
        NodeCommand::Create {
            fqdn,
            name,
            description,
            scheme,
            daemon_listen,
            daemon_sftp,
            upload_size,
            private,
            maintenance,
            tags,
            limits,
        } => {
            let mut body = limits_body(&limits)?;
            body.insert("fqdn".to_string(), json!(fqdn));
            body.insert("public".to_string(), json!(!private));
            body.insert("maintenance_mode".to_string(), json!(maintenance));
            body.insert("tags".to_string(), json!(tags));
            for (key, value) in [
                ("name", name.map(Value::from)),
                ("description", description.map(Value::from)),
                ("scheme", scheme.map(Value::from)),
                ("daemon_listen", daemon_listen.map(Value::from)),
                ("daemon_sftp", daemon_sftp.map(Value::from)),
                ("upload_size", upload_size.map(Value::from)),
            ] {
                if let Some(v) = value {
                    body.insert(key.to_string(), v);
                }
            }
            client
                .send_json(Method::POST, "/api/nodes", Some(Value::Object(body)))
                .await
        }
        NodeCommand::Update { node_id, json } => {
            let body: Value = serde_json::from_str(&json).context("--json is not valid JSON")?;
            client
                .send_json(
                    Method::PATCH,
                    &format!("/api/nodes/{}/settings", node_id),
                    Some(body),
                )
                .await
        }
        NodeCommand::Limits { node_id, limits } => {
            let body = limits_body(&limits)?;
            client
                .send_json(
                    Method::PATCH,
                    &format!("/api/nodes/{}/limits", node_id),
                    Some(Value::Object(body)),
                )
                .await
        }
        NodeCommand::Delete { node_id } => {
            client
                .send_json(Method::DELETE, &format!("/api/nodes/{}", node_id), None)
                .await
        }
        NodeCommand::ResetToken { node_id } => {
            client
                .send_json(
                    Method::POST,
                    &format!("/api/nodes/{}/token/reset", node_id),
                    None,
                )
                .await
        }
        NodeCommand::Sync { node_id } => {
            client
                .send_json(Method::POST, &format!("/api/nodes/{}/sync", node_id), None)
                .await
        }
        NodeCommand::Configuration { node_id, out } => {
            let path = format!("/api/nodes/{}/configuration", node_id);
            match out {
                Some(out) => client.download_to_file(&path, &out).await,
                None => {
                    let bytes = client.send_json_bytes(Method::GET, &path, None).await?;
                    print_bytes(&bytes)
                }
            }
        }
        NodeCommand::Bootstrap { node_id, docker } => {
            client
                .send_json(
                    Method::POST,
                    &format!("/api/nodes/{}/bootstrap", node_id),
                    Some(json!({ "container_runtime": docker })),
                )
                .await
        }
        NodeCommand::System { node_id } => {
            client
                .send_json(Method::POST, &format!("/api/nodes/{}/system", node_id), None)
                .await
        }
    }
}

async fn run_allocations(client: &Client, cmd: AllocationCommand) -> Result<()> {
    match cmd {
        AllocationCommand::List { node_id } => {
            client
                .send_json(
                    Method::GET,
                    &format!("/api/nodes/{}/allocations", node_id),
                    None,
                )
                .await
        }
        AllocationCommand::Create {
            node_id,
            ip,
            ports,
            alias,
        } => {
            client
                .send_json(
                    Method::POST,
                    &format!("/api/nodes/{}/allocations", node_id),
                    Some(json!({ "ip": ip, "ports": ports, "alias": alias })),
                )
                .await
        }
        AllocationCommand::Delete {
            node_id,
            allocation_id,
        } => {
            client
                .send_json(
                    Method::DELETE,
                    &format!("/api/nodes/{}/allocations/{}", node_id, allocation_id),
                    None,
                )
                .await
        }
    }
}

async fn run_servers(client: &Client, cmd: ServerCommand) -> Result<()> {
    match cmd {
        ServerCommand::List { node } => {
            let path = match node {
                Some(node_id) => format!("/api/servers?node_id={}", node_id),
                None => "/api/servers".to_string(),
            };
            client.send_json(Method::GET, &path, None).await
        }
        ServerCommand::Get { server_id } => {
            client
                .send_json(Method::GET, &format!("/api/servers/{}", server_id), None)
                .await
        }
        ServerCommand::Create {
            node,
            name,
            memory,
            disk,
            cpu,
            allocation,
            additional,
        } => {
            client
                .send_json(
                    Method::POST,
                    "/api/servers",
                    Some(json!({
                        "node_id": node,
                        "name": name,
                        "memory": memory,
                        "disk": disk,
                        "cpu": cpu,
                        "allocation_id": allocation,
                        "additional_allocations": additional,
                    })),
                )
                .await
        }
        ServerCommand::Build {
            server_id,
            memory,
            disk,
            cpu,
        } => {
            client
                .send_json(
                    Method::PATCH,
                    &format!("/api/servers/{}/build", server_id),
                    Some(json!({ "memory": memory, "disk": disk, "cpu": cpu })),
                )
                .await
        }
        ServerCommand::Allocation {
            server_id,
            allocation_id,
        } => {
            client
                .send_json(
                    Method::PATCH,
                    &format!("/api/servers/{}/allocation", server_id),
                    Some(json!({ "allocation_id": allocation_id })),
                )
                .await
        }
        ServerCommand::Delete { server_id } => {
            client
                .send_json(Method::DELETE, &format!("/api/servers/{}", server_id), None)
                .await
        }
        ServerCommand::Command { server_id, text } => {
            client
                .send_json(
                    Method::POST,
                    &format!("/api/servers/{}/command", server_id),
                    Some(json!({ "command": text })),
                )
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit_forms() {
        assert_eq!(parse_limit("unlimited").unwrap(), json!({ "mode": "unlimited" }));
        assert_eq!(
            parse_limit("8192").unwrap(),
            json!({ "mode": "limited", "limit": 8192, "overallocate": 0 })
        );
        assert_eq!(
            parse_limit("8192:-1").unwrap(),
            json!({ "mode": "limited", "limit": 8192, "overallocate": -1 })
        );
        assert!(parse_limit("lots").is_err());
    }

    #[test]
    fn test_cli_parses_node_create() {
        let cli = Cli::try_parse_from([
            "fleetctl",
            "--base-url",
            "http://panel:8080",
            "nodes",
            "create",
            "--fqdn",
            "alpha.example.com",
            "--memory",
            "8192:10",
            "--tag",
            "eu",
        ])
        .unwrap();
        match cli.command {
            Command::Nodes(NodeCommand::Create { fqdn, limits, tags, .. }) => {
                assert_eq!(fqdn, "alpha.example.com");
                assert_eq!(limits.memory.as_deref(), Some("8192:10"));
                assert_eq!(tags, vec!["eu"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
