//! HTTPS listener used by the certificate check harness
//!
//! Binds a TLS listener from in-memory or file-backed material, answers every request
//! with an empty `200 OK`, and drains gracefully on a shared shutdown signal.

pub mod server;
pub mod shutdown;

pub use server::{
    HttpsServer, HttpsServerConfig, HttpsServerError, ShutdownError, TlsMaterial,
    DEFAULT_GRACE_PERIOD, DEFAULT_REQUEST_TIMEOUT,
};
pub use shutdown::{Shutdown, ShutdownListener};
