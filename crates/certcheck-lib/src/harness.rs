//! Two-endpoint harness with coordinated startup and shutdown

use crate::endpoint::{Endpoint, EndpointKind, EndpointReport, EndpointState};
use crate::harness_config::HarnessConfig;
use certcheck_cert::SelfSignedError;
use certcheck_server_https::{HttpsServerError, Shutdown};
use rustls::pki_types::CertificateDer;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("[{endpoint}] Certificate error")]
    Certificate {
        endpoint: EndpointKind,
        #[source]
        source: SelfSignedError,
    },

    #[error("[{endpoint}] Server error")]
    Server {
        endpoint: EndpointKind,
        #[source]
        source: HttpsServerError,
    },

    #[error("Endpoint failed: {reason}")]
    EndpointFailed { reason: String },
}

struct EndpointHandle {
    local_addr: SocketAddr,
    certificate: CertificateDer<'static>,
    state: watch::Receiver<EndpointState>,
}

impl EndpointHandle {
    fn new(endpoint: &Endpoint, state: watch::Receiver<EndpointState>) -> Self {
        Self {
            local_addr: endpoint.local_addr(),
            certificate: endpoint.certificate().clone(),
            state,
        }
    }
}

/// Both endpoints, serving
///
/// Dropping a `Harness` without calling [`Harness::shutdown`] aborts the endpoint
/// tasks; temporary PEM files are still removed when their owners drop.
pub struct Harness {
    valid: EndpointHandle,
    nosan: EndpointHandle,
    shutdown: Shutdown,
    tasks: JoinSet<EndpointReport>,
}

impl Harness {
    /// Issue both certificates, bind both listeners and start serving
    ///
    /// Fails as a whole: if either endpoint cannot start, whatever the other one
    /// acquired is released before this returns.
    pub async fn start(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate().map_err(HarnessError::Config)?;

        let (valid_tx, valid_rx) = watch::channel(EndpointState::Initializing);
        let (nosan_tx, nosan_rx) = watch::channel(EndpointState::Initializing);

        let (valid, nosan) = tokio::try_join!(
            Endpoint::start(EndpointKind::Valid, &config, valid_tx),
            Endpoint::start(EndpointKind::NoSan, &config, nosan_tx),
        )?;

        let shutdown = Shutdown::new();
        let valid_handle = EndpointHandle::new(&valid, valid_rx);
        let nosan_handle = EndpointHandle::new(&nosan, nosan_rx);

        let mut tasks = JoinSet::new();
        for endpoint in [valid, nosan] {
            tasks.spawn(endpoint.run(shutdown.listener()));
        }

        Ok(Self {
            valid: valid_handle,
            nosan: nosan_handle,
            shutdown,
            tasks,
        })
    }

    fn handle(&self, kind: EndpointKind) -> &EndpointHandle {
        match kind {
            EndpointKind::Valid => &self.valid,
            EndpointKind::NoSan => &self.nosan,
        }
    }

    pub fn valid_addr(&self) -> SocketAddr {
        self.valid.local_addr
    }

    pub fn nosan_addr(&self) -> SocketAddr {
        self.nosan.local_addr
    }

    pub fn local_addr(&self, kind: EndpointKind) -> SocketAddr {
        self.handle(kind).local_addr
    }

    /// DER of the certificate an endpoint presents
    pub fn certificate(&self, kind: EndpointKind) -> &CertificateDer<'static> {
        &self.handle(kind).certificate
    }

    pub fn state(&self, kind: EndpointKind) -> EndpointState {
        *self.handle(kind).state.borrow()
    }

    /// Receiver that follows an endpoint through its lifecycle
    pub fn state_watch(&self, kind: EndpointKind) -> watch::Receiver<EndpointState> {
        self.handle(kind).state.clone()
    }

    /// Stop accepting on both endpoints and wait for them to drain
    ///
    /// Drain problems are reported per endpoint in the returned reports. Only an
    /// endpoint task that panicked is an error here.
    pub async fn shutdown(mut self) -> Result<Vec<EndpointReport>, HarnessError> {
        self.shutdown.trigger();

        let mut reports = Vec::with_capacity(2);
        let mut failure = None;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Endpoint task failed: {}", e);
                    failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if let Some(reason) = failure {
            return Err(HarnessError::EndpointFailed { reason });
        }

        reports.sort_by_key(|report| report.kind);
        info!("All endpoints stopped");
        Ok(reports)
    }

    /// Serve until `signal` resolves, then shut down
    ///
    /// A failing signal listener is logged and treated as a shutdown request. An
    /// endpoint that stops on its own takes the other one down with it.
    pub async fn run_until<F>(mut self, signal: F) -> Result<Vec<EndpointReport>, HarnessError>
    where
        F: Future<Output = io::Result<()>>,
    {
        let early_exit = tokio::select! {
            result = signal => {
                match result {
                    Ok(()) => info!("Shutdown signal received, stopping servers..."),
                    Err(err) => error!("Error listening for shutdown signal: {}", err),
                }
                None
            }
            joined = self.tasks.join_next() => Some(match joined {
                Some(Ok(report)) => format!("{} endpoint stopped unexpectedly", report.kind),
                Some(Err(e)) => format!("endpoint task failed: {}", e),
                None => "no endpoint is running".to_string(),
            }),
        };

        match early_exit {
            None => self.shutdown().await,
            Some(reason) => {
                error!("{}, stopping servers...", reason);
                // Whatever the remaining endpoint reports, the early exit is the failure
                let _ = self.shutdown().await;
                Err(HarnessError::EndpointFailed { reason })
            }
        }
    }
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C on platforms without Unix signals)
///
/// On unix the handlers are installed when this is called, not when the future is
/// first polled, so a signal arriving in between is not lost. Must be called inside a
/// tokio runtime.
pub fn shutdown_signal() -> impl Future<Output = io::Result<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = signal(SignalKind::terminate())
            .and_then(|sigterm| Ok((sigterm, signal(SignalKind::interrupt())?)));

        async move {
            let (mut sigterm, mut sigint) = handlers?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
            }
            Ok(())
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
    }
}
