use clap::Parser;
use reqwest::Url;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::daemon::DaemonTimeouts;

pub const REQUEST_TIMEOUT_RANGE: RangeInclusive<u64> = 15..=60;
pub const CONNECT_TIMEOUT_RANGE: RangeInclusive<u64> = 5..=60;

#[derive(Parser, Debug, Clone)]
#[command(name = "fleet-control")]
#[command(about = "Control plane for a fleet of game-server nodes", long_about = None)]
pub struct Args {
    /// Bind address for the HTTP(S) server
    #[arg(long, env = "FLEET_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Database file path
    #[arg(long, env = "FLEET_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Public URL daemons use to reach the panel
    #[arg(long, env = "FLEET_PANEL_URL")]
    pub panel_url: Option<String>,

    /// TLS certificate (PEM). Serving TLS marks the panel as secured.
    #[arg(long, env = "FLEET_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, env = "FLEET_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Operator key with full access
    #[arg(long, env = "FLEET_ADMIN_KEY", hide_env_values = true)]
    pub admin_key: String,

    /// Operator key limited to server consoles
    #[arg(long, env = "FLEET_CONSOLE_KEY", hide_env_values = true)]
    pub console_key: Option<String>,

    /// Daemon request timeout in seconds (15-60)
    #[arg(long, env = "FLEET_DAEMON_TIMEOUT", default_value_t = 15)]
    pub daemon_timeout: u64,

    /// Daemon connect timeout in seconds (5-60)
    #[arg(long, env = "FLEET_DAEMON_CONNECT_TIMEOUT", default_value_t = 5)]
    pub daemon_connect_timeout: u64,

    /// Log level
    #[arg(long, env = "FLEET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),

    #[error("invalid panel URL '{url}': {reason}")]
    InvalidPanelUrl { url: String, reason: String },

    #[error("{name} must be between {min} and {max} seconds, got {value}")]
    TimeoutOutOfRange {
        name: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("TLS needs both a certificate and a key")]
    IncompleteTls,

    #[error("{0} must not be empty")]
    EmptyKey(&'static str),
}

#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub db_path: Option<PathBuf>,
    pub panel_url: String,
    pub tls: Option<TlsFiles>,
    pub admin_key: String,
    pub console_key: Option<String>,
    pub daemon_timeouts: DaemonTimeouts,
    pub log_level: String,
}

impl Settings {
    /// The panel is secured iff it serves TLS itself.
    pub fn is_secured(&self) -> bool {
        self.tls.is_some()
    }
}

fn timeout_in_range(
    name: &'static str,
    value: u64,
    range: RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    if !range.contains(&value) {
        return Err(ConfigError::TimeoutOutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(Duration::from_secs(value))
}

impl TryFrom<Args> for Settings {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let bind: SocketAddr = args
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(args.bind.clone()))?;

        let tls = match (args.tls_cert, args.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles { cert, key }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let panel_url = match args.panel_url {
            Some(url) => url,
            None => {
                let scheme = if tls.is_some() { "https" } else { "http" };
                format!("{}://{}", scheme, bind)
            }
        };
        let parsed = Url::parse(&panel_url).map_err(|e| ConfigError::InvalidPanelUrl {
            url: panel_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidPanelUrl {
                url: panel_url,
                reason: "scheme must be http or https".to_string(),
            });
        }

        if args.admin_key.trim().is_empty() {
            return Err(ConfigError::EmptyKey("admin key"));
        }
        let console_key = args.console_key.filter(|k| !k.trim().is_empty());

        let daemon_timeouts = DaemonTimeouts {
            connect: timeout_in_range(
                "daemon connect timeout",
                args.daemon_connect_timeout,
                CONNECT_TIMEOUT_RANGE,
            )?,
            request: timeout_in_range(
                "daemon request timeout",
                args.daemon_timeout,
                REQUEST_TIMEOUT_RANGE,
            )?,
        };

        Ok(Settings {
            bind,
            db_path: args.db_path,
            panel_url: panel_url.trim_end_matches('/').to_string(),
            tls,
            admin_key: args.admin_key,
            console_key,
            daemon_timeouts,
            log_level: args.log_level,
        })
    }
}
