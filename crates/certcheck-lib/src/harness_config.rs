//! Harness configuration
//!
//! Certificate validity and subject organization are fixed; everything here only
//! decides where the endpoints listen and how their certificates reach the TLS layer.

use certcheck_server_https::DEFAULT_GRACE_PERIOD;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default address of the endpoint with a matching SAN
pub const DEFAULT_VALID_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8000);

/// Default address of the endpoint without SAN entries
pub const DEFAULT_NOSAN_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8001);

/// Hostname the valid endpoint's certificate is issued for by default
pub const DEFAULT_DNS_NAME: &str = "example.com";

/// How issued certificates are handed to the listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CertDelivery {
    /// DER material passed to rustls directly, nothing touches the disk
    #[default]
    Memory,

    /// PEM files in temporary storage, removed when the endpoint stops
    TempFiles,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub valid_addr: SocketAddr,
    pub nosan_addr: SocketAddr,

    /// SAN entries for the valid endpoint. The no-SAN endpoint ignores these.
    pub dns_names: Vec<String>,

    pub cert_delivery: CertDelivery,

    /// Time in-flight connections get to finish after shutdown
    pub grace_period: Duration,

    /// Where `TempFiles` delivery writes; the system temp directory when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            valid_addr: DEFAULT_VALID_ADDR,
            nosan_addr: DEFAULT_NOSAN_ADDR,
            dns_names: vec![DEFAULT_DNS_NAME.to_string()],
            cert_delivery: CertDelivery::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            temp_dir: None,
        }
    }
}

impl HarnessConfig {
    /// Reject configurations that would leave the harness without two distinct endpoints
    pub fn validate(&self) -> Result<(), String> {
        if self.dns_names.is_empty() {
            return Err("the valid endpoint needs at least one DNS name".to_string());
        }

        if let Some(name) = self.dns_names.iter().find(|n| n.trim().is_empty()) {
            return Err(format!("invalid empty DNS name {:?}", name));
        }

        // Port 0 lets the OS pick, so identical addresses are fine there
        if self.valid_addr == self.nosan_addr && self.valid_addr.port() != 0 {
            return Err(format!(
                "both endpoints are configured to listen on {}",
                self.valid_addr
            ));
        }

        Ok(())
    }
}
