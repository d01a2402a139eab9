//! One harness endpoint: certificate, listener and lifecycle
//!
//! An endpoint moves through `Initializing → Serving → ShuttingDown → Stopped` and
//! owns its certificate material (and temp files) until it reaches `Stopped`.

use crate::harness::HarnessError;
use crate::harness_config::{CertDelivery, HarnessConfig};
use certcheck_cert::{EphemeralPemFiles, IssuedCertificate};
use certcheck_server_https::{
    HttpsServer, HttpsServerConfig, ShutdownError, ShutdownListener, TlsMaterial,
};
use rustls::pki_types::CertificateDer;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Which certificate policy an endpoint serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointKind {
    /// Certificate with SAN entries for the configured DNS names
    Valid,
    /// Certificate without any SAN extension
    NoSan,
}

impl EndpointKind {
    pub fn name(&self) -> &'static str {
        match self {
            EndpointKind::Valid => "valid",
            EndpointKind::NoSan => "nosan",
        }
    }

    fn dns_names<'a>(&self, configured: &'a [String]) -> &'a [String] {
        match self {
            EndpointKind::Valid => configured,
            EndpointKind::NoSan => &[],
        }
    }

    fn bind_addr(&self, config: &HarnessConfig) -> SocketAddr {
        match self {
            EndpointKind::Valid => config.valid_addr,
            EndpointKind::NoSan => config.nosan_addr,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Initializing,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Final word from an endpoint once it has stopped
#[derive(Debug)]
pub struct EndpointReport {
    pub kind: EndpointKind,
    pub local_addr: SocketAddr,
    /// Drain problems; logged, never fatal
    pub shutdown: Result<(), ShutdownError>,
}

impl EndpointReport {
    pub fn is_clean(&self) -> bool {
        self.shutdown.is_ok()
    }
}

pub(crate) struct Endpoint {
    kind: EndpointKind,
    server: HttpsServer,
    certificate: CertificateDer<'static>,
    pem_files: Option<EphemeralPemFiles>,
    state: watch::Sender<EndpointState>,
}

impl Endpoint {
    /// Issue the certificate, hand it to the TLS layer and bind
    ///
    /// Anything acquired before a failure is released when this returns.
    pub(crate) async fn start(
        kind: EndpointKind,
        config: &HarnessConfig,
        state: watch::Sender<EndpointState>,
    ) -> Result<Self, HarnessError> {
        state.send_replace(EndpointState::Initializing);

        let issued = certcheck_cert::issue(kind.dns_names(&config.dns_names))
            .map_err(|source| HarnessError::Certificate {
                endpoint: kind,
                source,
            })?;

        debug!(
            "[{}] Issued certificate serial={} dns_names={:?}",
            kind,
            issued.serial_hex(),
            issued.dns_names
        );

        let (material, pem_files) = Self::deliver(kind, config, &issued)?;

        let server_config = HttpsServerConfig {
            grace_period: config.grace_period,
            ..HttpsServerConfig::new(kind.bind_addr(config))
        };
        let server = HttpsServer::bind(server_config, material)
            .await
            .map_err(|source| HarnessError::Server {
                endpoint: kind,
                source,
            })?;

        state.send_replace(EndpointState::Serving);
        info!("[{}] Serving on {}", kind, server.local_addr());

        Ok(Self {
            kind,
            server,
            certificate: issued.cert_der,
            pem_files,
            state,
        })
    }

    fn deliver(
        kind: EndpointKind,
        config: &HarnessConfig,
        issued: &IssuedCertificate,
    ) -> Result<(TlsMaterial, Option<EphemeralPemFiles>), HarnessError> {
        match config.cert_delivery {
            CertDelivery::Memory => Ok((
                TlsMaterial::in_memory(issued.cert_der.clone(), issued.key_der.clone_key()),
                None,
            )),
            CertDelivery::TempFiles => {
                let files = match &config.temp_dir {
                    Some(dir) => EphemeralPemFiles::persist_in(dir, issued),
                    None => EphemeralPemFiles::persist(issued),
                }
                .map_err(|source| HarnessError::Certificate {
                    endpoint: kind,
                    source,
                })?;

                let material = TlsMaterial::pem_files(files.cert_path(), files.key_path());
                Ok((material, Some(files)))
            }
        }
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub(crate) fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Serve until `shutdown` fires, drain, and release the certificate material
    pub(crate) async fn run(self, shutdown: ShutdownListener) -> EndpointReport {
        let Self {
            kind,
            server,
            certificate: _,
            pem_files,
            state,
        } = self;

        let local_addr = server.local_addr();
        let mut signalled = shutdown.clone();

        let serve = server.serve(shutdown);
        tokio::pin!(serve);

        let outcome = tokio::select! {
            biased;

            _ = signalled.wait() => {
                state.send_replace(EndpointState::ShuttingDown);
                info!("[{}] Shutting down...", kind);
                serve.await
            }
            outcome = &mut serve => outcome,
        };

        if let Err(e) = &outcome {
            warn!("[{}] Shutdown error: {}", kind, e);
        }

        if let Some(files) = pem_files {
            if let Err(e) = files.close() {
                warn!("[{}] Failed to remove temporary PEM files: {}", kind, e);
            }
        }

        state.send_replace(EndpointState::Stopped);
        info!("[{}] Stopped", kind);

        EndpointReport {
            kind,
            local_addr,
            shutdown: outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nosan_ignores_configured_names() {
        let names = vec!["example.com".to_string()];

        assert_eq!(EndpointKind::Valid.dns_names(&names), names.as_slice());
        assert!(EndpointKind::NoSan.dns_names(&names).is_empty());
    }

    #[test]
    fn test_endpoint_names() {
        assert_eq!(EndpointKind::Valid.to_string(), "valid");
        assert_eq!(EndpointKind::NoSan.to_string(), "nosan");
    }

    #[tokio::test]
    async fn test_start_and_run_reports_state_transitions() {
        let config = HarnessConfig {
            valid_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let (state_tx, state_rx) = watch::channel(EndpointState::Initializing);

        let endpoint = Endpoint::start(EndpointKind::Valid, &config, state_tx)
            .await
            .unwrap();
        assert_eq!(*state_rx.borrow(), EndpointState::Serving);
        assert!(!endpoint.certificate().is_empty());

        let shutdown = certcheck_server_https::Shutdown::new();
        let task = tokio::spawn(endpoint.run(shutdown.listener()));
        shutdown.trigger();

        let report = task.await.unwrap();
        assert_eq!(report.kind, EndpointKind::Valid);
        assert!(report.is_clean());
        assert_eq!(*state_rx.borrow(), EndpointState::Stopped);
    }
}
