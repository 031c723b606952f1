use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::model::Scheme;

const DNS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Forward name resolution, abstracted so tests can pin answers.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's `getaddrinfo` through tokio.
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibilityReport {
    pub is_literal_ip: bool,
    pub dns_resolved: bool,
    pub resolved_ip: Option<IpAddr>,
    pub tls_eligible: bool,
}

impl EligibilityReport {
    /// Scheme to preselect for a new node at this address.
    pub fn default_scheme(&self) -> Scheme {
        if self.tls_eligible {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }
}

pub fn is_literal_ip(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok()
}

/// Determine DNS resolvability and TLS admissibility of a node address.
///
/// Advisory only; callers that act on the result must re-run it.
pub async fn validate(
    resolver: &dyn HostResolver,
    address: &str,
    control_plane_secured: bool,
) -> EligibilityReport {
    if is_literal_ip(address) {
        return EligibilityReport {
            is_literal_ip: true,
            dns_resolved: false,
            resolved_ip: None,
            tls_eligible: false,
        };
    }

    let resolved_ip = match tokio::time::timeout(DNS_LOOKUP_TIMEOUT, resolver.lookup(address)).await
    {
        Ok(Ok(addrs)) => addrs.into_iter().next(),
        Ok(Err(e)) => {
            debug!("DNS lookup for {} failed: {}", address, e);
            None
        }
        Err(_) => {
            warn!("DNS lookup for {} timed out", address);
            None
        }
    };

    EligibilityReport {
        is_literal_ip: false,
        dns_resolved: resolved_ip.is_some(),
        resolved_ip,
        tls_eligible: control_plane_secured,
    }
}

/// Enforce the node addressing invariant for a chosen scheme.
pub fn check_scheme(
    report: &EligibilityReport,
    scheme: Scheme,
    control_plane_secured: bool,
) -> Result<(), ControlError> {
    if control_plane_secured && scheme == Scheme::Http {
        return Err(ControlError::EligibilityDenied(
            "a secured panel can only reach daemons over https".to_string(),
        ));
    }
    if report.is_literal_ip && scheme == Scheme::Https {
        return Err(ControlError::EligibilityDenied(
            "an IP address cannot be used with https".to_string(),
        ));
    }
    Ok(())
}

/// Scheme check for a stored address. Only literal-ness matters here, so no lookup is made.
pub fn check_address_scheme(
    address: &str,
    scheme: Scheme,
    control_plane_secured: bool,
) -> Result<(), ControlError> {
    let report = EligibilityReport {
        is_literal_ip: is_literal_ip(address),
        dns_resolved: false,
        resolved_ip: None,
        tls_eligible: false,
    };
    check_scheme(&report, scheme, control_plane_secured)
}
