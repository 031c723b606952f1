use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Node
// ============================================================================

/// How the panel talks to a node's daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(format!("unknown scheme: {}", other)),
        }
    }
}

/// A resource dimension tracked per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Memory,
    Disk,
    Cpu,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Memory, Dimension::Disk, Dimension::Cpu];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Memory => "memory",
            Dimension::Disk => "disk",
            Dimension::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limit for one dimension. `limit == 0` or `overallocate == -1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub limit: i64,
    pub overallocate: i64,
}

impl ResourceLimit {
    pub fn is_unlimited(&self) -> bool {
        self.limit == 0 || self.overallocate == -1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory: ResourceLimit,
    pub disk: ResourceLimit,
    pub cpu: ResourceLimit,
}

impl ResourceLimits {
    pub fn get(&self, dimension: Dimension) -> ResourceLimit {
        match dimension {
            Dimension::Memory => self.memory,
            Dimension::Disk => self.disk,
            Dimension::Cpu => self.cpu,
        }
    }

    pub fn set(&mut self, dimension: Dimension, value: ResourceLimit) {
        match dimension {
            Dimension::Memory => self.memory = value,
            Dimension::Disk => self.disk = value,
            Dimension::Cpu => self.cpu = value,
        }
    }
}

/// Memory/disk/CPU figures, either claimed by a server or summed over a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory: i64,
    pub disk: i64,
    pub cpu: i64,
}

impl ResourceUsage {
    pub fn get(&self, dimension: Dimension) -> i64 {
        match dimension {
            Dimension::Memory => self.memory,
            Dimension::Disk => self.disk,
            Dimension::Cpu => self.cpu,
        }
    }
}

/// Last system information reported by a daemon. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemInformation {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub kernel_version: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub fqdn: String,
    pub scheme: Scheme,
    pub daemon_listen: u16,
    pub daemon_sftp: u16,
    pub daemon_sftp_alias: Option<String>,
    pub daemon_base: String,
    pub upload_size: u32,
    pub public: bool,
    pub maintenance_mode: bool,
    pub tags: Vec<String>,
    pub limits: ResourceLimits,
    pub config_drift: bool,
    pub system_info: Option<SystemInformation>,
    pub system_info_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Node {
    /// Base URL of the node's daemon API.
    pub fn daemon_url(&self) -> String {
        if self.fqdn.parse::<Ipv6Addr>().is_ok() {
            format!("{}://[{}]:{}", self.scheme, self.fqdn, self.daemon_listen)
        } else {
            format!("{}://{}:{}", self.scheme, self.fqdn, self.daemon_listen)
        }
    }
}

// ============================================================================
// Servers and allocations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub server_id: Uuid,
    pub node_id: Uuid,
    pub name: String,
    pub resources: ResourceUsage,
    pub allocation_id: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub allocation_id: i64,
    pub node_id: Uuid,
    pub ip: String,
    pub port: u16,
    pub alias: Option<String>,
    pub server_id: Option<Uuid>,
}

impl Allocation {
    pub fn address(&self) -> String {
        let host = self.alias.as_deref().unwrap_or(&self.ip);
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// The credential pair a daemon uses to authenticate the panel (and vice versa).
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub node_id: Uuid,
    pub token_id: String,
    pub secret: String,
    pub issued_at: i64,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("node_id", &self.node_id)
            .field("token_id", &self.token_id)
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
