//! HTTPS listener with TLS termination and a no-op request handler
//!
//! The listener exists so clients can complete a TLS handshake and inspect the
//! certificate. Every HTTP request gets an empty `200 OK`.
use crate::shutdown::ShutdownListener;
use rustls::crypto::CryptoProvider;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Default time in-flight connections get to finish after shutdown
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default time a client gets to finish the handshake and send its request head
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const MAX_REQUEST_HEAD: usize = 8192;

const EMPTY_OK_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

#[derive(Debug, Error)]
pub enum HttpsServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

/// Problems seen while draining connections. Never fatal.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("{remaining} connection(s) still open after the {grace:?} grace period were aborted")]
    GracePeriodElapsed { remaining: usize, grace: Duration },

    #[error("{count} connection task(s) panicked")]
    ConnectionPanicked { count: usize },
}

/// Certificate and key handed to the listener
#[derive(Debug)]
pub enum TlsMaterial {
    /// DER material passed straight to rustls
    InMemory {
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    },

    /// PEM files read back at bind time
    PemFiles { cert_path: PathBuf, key_path: PathBuf },
}

impl TlsMaterial {
    pub fn in_memory(cert: CertificateDer<'static>, private_key: PrivateKeyDer<'static>) -> Self {
        TlsMaterial::InMemory {
            cert_chain: vec![cert],
            private_key,
        }
    }

    pub fn pem_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        TlsMaterial::PemFiles {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    fn load(self) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), HttpsServerError> {
        match self {
            TlsMaterial::InMemory {
                cert_chain,
                private_key,
            } => Ok((cert_chain, private_key)),
            TlsMaterial::PemFiles {
                cert_path,
                key_path,
            } => {
                debug!("Loading TLS certificate from: {}", cert_path.display());
                let certs = load_certs(&cert_path)?;

                debug!("Loading TLS private key from: {}", key_path.display());
                let key = load_private_key(&key_path)?;

                Ok((certs, key))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpsServerConfig {
    pub bind_addr: SocketAddr,
    pub grace_period: Duration,

    /// Applies separately to the TLS handshake and to reading the request head
    pub request_timeout: Duration,
}

impl HttpsServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            grace_period: DEFAULT_GRACE_PERIOD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// A bound HTTPS listener, ready to serve
pub struct HttpsServer {
    config: HttpsServerConfig,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
}

/// Load TLS certificates from a PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, HttpsServerError> {
    let file = File::open(path)
        .map_err(|e| HttpsServerError::TlsError(format!("Failed to open cert file: {}", e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HttpsServerError::TlsError(format!("Failed to parse certs: {}", e)))?;

    if certs.is_empty() {
        return Err(HttpsServerError::TlsError(format!(
            "No certificate found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load a private key from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, HttpsServerError> {
    let file = File::open(path)
        .map_err(|e| HttpsServerError::TlsError(format!("Failed to open key file: {}", e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| HttpsServerError::TlsError(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| HttpsServerError::TlsError("No private key found".to_string()))
}

/// Use the process-wide provider when one is installed, ring otherwise
fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()))
}

fn tls_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, HttpsServerError> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpsServerError::TlsError(format!("Unsupported protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HttpsServerError::TlsError(format!("Invalid cert/key: {}", e)))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

impl HttpsServer {
    /// Load the TLS material and bind the listening socket
    pub async fn bind(
        config: HttpsServerConfig,
        material: TlsMaterial,
    ) -> Result<Self, HttpsServerError> {
        let (certs, key) = material.load()?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config(certs, key)?));

        let bind_addr = config.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| HttpsServerError::BindError {
                address: bind_addr.ip().to_string(),
                port: bind_addr.port(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!("HTTPS server listening on {}", local_addr);

        Ok(Self {
            config,
            listener,
            acceptor,
            local_addr,
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires, then drain in-flight connections
    ///
    /// Connections still running when the grace period runs out are aborted and
    /// reported through the returned error.
    pub async fn serve(self, mut shutdown: ShutdownListener) -> Result<(), ShutdownError> {
        let Self {
            config,
            listener,
            acceptor,
            local_addr,
        } = self;

        let mut connections = JoinSet::new();
        let mut accepted: u64 = 0;
        let request_timeout = config.request_timeout;
        let mut panicked = 0;

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    debug!("Shutdown signalled for {}", local_addr);
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            accepted += 1;
                            let acceptor = acceptor.clone();
                            connections.spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, peer_addr, acceptor, request_timeout).await
                                {
                                    debug!("HTTPS connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept HTTPS connection: {}", e);
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if matches!(&finished, Err(e) if e.is_panic()) {
                        panicked += 1;
                    }
                }
            }
        }

        // No new connections from here on
        drop(listener);

        info!(
            "HTTPS server on {} stopped accepting ({} connections accepted, {} in flight)",
            local_addr,
            accepted,
            connections.len()
        );

        drain(connections, config.grace_period, panicked).await
    }
}

async fn drain(
    mut connections: JoinSet<()>,
    grace: Duration,
    mut panicked: usize,
) -> Result<(), ShutdownError> {
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            next = connections.join_next() => match next {
                None => break,
                Some(Err(e)) if e.is_panic() => panicked += 1,
                Some(_) => {}
            },
            _ = &mut deadline => {
                let remaining = connections.len();
                warn!("Aborting {} connection(s) after {:?} grace period", remaining, grace);
                connections.shutdown().await;
                return Err(ShutdownError::GracePeriodElapsed { remaining, grace });
            }
        }
    }

    if panicked > 0 {
        return Err(ShutdownError::ConnectionPanicked { count: panicked });
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    request_timeout: Duration,
) -> Result<(), HttpsServerError> {
    debug!("New HTTPS connection from {}", peer_addr);

    // TLS handshake. A client rejecting our certificate ends up here.
    let mut tls_stream = match timeout(request_timeout, acceptor.accept(stream)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            debug!("TLS handshake failed from {}: {}", peer_addr, e);
            return Err(HttpsServerError::TlsError(format!(
                "Handshake failed: {}",
                e
            )));
        }
        Err(_) => {
            debug!("TLS handshake timed out from {}", peer_addr);
            return Err(HttpsServerError::TlsError(format!(
                "Handshake timed out after {:?}",
                request_timeout
            )));
        }
    };

    debug!("TLS handshake completed for {}", peer_addr);

    let n = timeout(request_timeout, read_request_head(&mut tls_stream))
        .await
        .map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "request head timed out")
        })??;
    if n == 0 {
        return Ok(()); // Connection closed right after the handshake
    }

    tls_stream.write_all(EMPTY_OK_RESPONSE).await?;
    tls_stream.flush().await?;
    let _ = tls_stream.shutdown().await;

    Ok(())
}

/// Read until the end of the request head, EOF, or the buffer limit
async fn read_request_head<S>(stream: &mut S) -> std::io::Result<usize>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; MAX_REQUEST_HEAD];
    let mut filled = 0;

    while filled < buffer.len() {
        let n = stream.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;

        if buffer[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_server_config_defaults() {
        let config = HttpsServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 8443)));
        assert_eq!(config.bind_addr.port(), 8443);
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_read_request_head_stops_at_blank_line() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let mut input: &[u8] = request;

        let n = read_request_head(&mut input).await.unwrap();
        assert_eq!(n, request.len());
    }

    #[tokio::test]
    async fn test_read_request_head_handles_eof() {
        let mut input: &[u8] = b"";
        assert_eq!(read_request_head(&mut input).await.unwrap(), 0);

        let mut partial: &[u8] = b"GET / HT";
        assert_eq!(read_request_head(&mut partial).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_read_request_head_is_bounded() {
        let oversized = vec![b'a'; MAX_REQUEST_HEAD * 2];
        let mut input: &[u8] = &oversized;

        assert_eq!(
            read_request_head(&mut input).await.unwrap(),
            MAX_REQUEST_HEAD
        );
    }

    #[tokio::test]
    async fn test_missing_pem_files_are_tls_errors() {
        let dir = std::env::temp_dir().join("certcheck-missing-material");
        let material = TlsMaterial::pem_files(dir.join("cert.pem"), dir.join("key.pem"));

        let config = HttpsServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));

        match HttpsServer::bind(config, material).await {
            Err(HttpsServerError::TlsError(msg)) => assert!(msg.contains("cert file")),
            Err(other) => panic!("expected TLS error, got {}", other),
            Ok(_) => panic!("bind should fail without certificate files"),
        }
    }

    #[tokio::test]
    async fn test_drain_with_no_connections_is_clean() {
        let connections = JoinSet::new();
        assert!(drain(connections, Duration::from_millis(10), 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_connections() {
        let mut connections = JoinSet::new();
        connections.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let result = drain(connections, Duration::from_millis(50), 0).await;
        assert!(matches!(
            result,
            Err(ShutdownError::GracePeriodElapsed { remaining: 1, .. })
        ));
    }
}
