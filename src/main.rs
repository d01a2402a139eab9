//! certcheck - TLS certificate-validation test harness
//!
//! Serves one endpoint with a properly SAN'd self-signed certificate and one without
//! SAN, so TLS clients can be checked for correct hostname validation.

use anyhow::{Context, Result};
use certcheck_lib::{
    shutdown_signal, CertDelivery, Harness, HarnessConfig, DEFAULT_DNS_NAME, DEFAULT_NOSAN_ADDR,
    DEFAULT_VALID_ADDR,
};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// certcheck - HTTPS endpoints for testing certificate validation
#[derive(Parser, Debug)]
#[command(name = "certcheck")]
#[command(about = "HTTPS endpoints for testing certificate validation")]
#[command(version)]
#[command(long_about = r#"
Starts two HTTPS endpoints, each with a freshly generated self-signed certificate
valid for one hour. Every request gets an empty 200 OK.

  valid  certificate with SAN entries for --dns-name (default example.com)
  nosan  certificate without any SAN extension

A correct client trusting the certificate accepts the first and rejects the second.

EXAMPLES:
  # Defaults: 0.0.0.0:8000 (valid) and 0.0.0.0:8001 (nosan)
  certcheck

  # Local only, extra name, PEM files on disk
  certcheck --valid-addr 127.0.0.1:8443 --nosan-addr 127.0.0.1:8444 \
    --dns-name example.com --dns-name localhost --cert-delivery temp-files

ENVIRONMENT VARIABLES:
  CERTCHECK_VALID_ADDR      Listen address of the valid endpoint
  CERTCHECK_NOSAN_ADDR      Listen address of the no-SAN endpoint
  CERTCHECK_DNS_NAMES       Comma-separated SAN entries
  CERTCHECK_CERT_DELIVERY   memory | temp-files
  CERTCHECK_GRACE_PERIOD    Shutdown grace period in seconds
  RUST_LOG                  Log filter, overrides --verbose
"#)]
struct Cli {
    /// Listen address of the endpoint with a matching SAN
    #[arg(long, env = "CERTCHECK_VALID_ADDR", default_value_t = DEFAULT_VALID_ADDR)]
    valid_addr: SocketAddr,

    /// Listen address of the endpoint without SAN
    #[arg(long, env = "CERTCHECK_NOSAN_ADDR", default_value_t = DEFAULT_NOSAN_ADDR)]
    nosan_addr: SocketAddr,

    /// DNS name for the valid certificate's SAN (repeatable)
    #[arg(
        long = "dns-name",
        env = "CERTCHECK_DNS_NAMES",
        value_delimiter = ',',
        default_value = DEFAULT_DNS_NAME
    )]
    dns_names: Vec<String>,

    /// How certificates reach the TLS listeners
    #[arg(long, env = "CERTCHECK_CERT_DELIVERY", value_enum, default_value_t = Delivery::Memory)]
    cert_delivery: Delivery,

    /// Directory for temp-files delivery (system temp dir if not set)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Seconds in-flight connections get to finish on shutdown
    #[arg(long, env = "CERTCHECK_GRACE_PERIOD", default_value = "5")]
    grace_period: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Delivery {
    /// Keep certificate and key in memory
    Memory,
    /// Write PEM files to temporary storage, removed on shutdown
    TempFiles,
}

impl From<Delivery> for CertDelivery {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Memory => CertDelivery::Memory,
            Delivery::TempFiles => CertDelivery::TempFiles,
        }
    }
}

impl Cli {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            valid_addr: self.valid_addr,
            nosan_addr: self.nosan_addr,
            dns_names: self.dns_names.clone(),
            cert_delivery: self.cert_delivery.into(),
            grace_period: Duration::from_secs(self.grace_period),
            temp_dir: self.temp_dir.clone(),
        }
    }
}

/// Setup logging; RUST_LOG wins over the verbose flag
fn setup_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    // Only fails if a provider is already installed, which is fine
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    // Installed before any temp file exists so an early signal still cleans up
    let signal = shutdown_signal();

    let harness = Harness::start(cli.harness_config())
        .await
        .context("Failed to start certificate test servers")?;

    info!("Servers running. Hit ctrl-c to shutdown.");
    info!("  - valid (SAN {:?}): {}", cli.dns_names, harness.valid_addr());
    info!("  - nosan (no SAN): {}", harness.nosan_addr());

    let reports = harness
        .run_until(signal)
        .await
        .context("Certificate test servers failed")?;

    for report in &reports {
        if let Err(e) = &report.shutdown {
            warn!("[{}] {}", report.kind, e);
        }
    }

    info!("✅ Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["certcheck"]).unwrap();
        let config = cli.harness_config();

        assert_eq!(config.valid_addr, DEFAULT_VALID_ADDR);
        assert_eq!(config.nosan_addr, DEFAULT_NOSAN_ADDR);
        assert_eq!(config.dns_names, vec!["example.com".to_string()]);
        assert_eq!(config.cert_delivery, CertDelivery::Memory);
        assert_eq!(config.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn test_cli_repeated_dns_names_and_delivery() {
        let cli = Cli::try_parse_from([
            "certcheck",
            "--dns-name",
            "example.com",
            "--dns-name",
            "localhost",
            "--cert-delivery",
            "temp-files",
            "--grace-period",
            "1",
        ])
        .unwrap();
        let config = cli.harness_config();

        assert_eq!(config.dns_names, vec!["example.com", "localhost"]);
        assert_eq!(config.cert_delivery, CertDelivery::TempFiles);
        assert_eq!(config.grace_period, Duration::from_secs(1));
    }
}
