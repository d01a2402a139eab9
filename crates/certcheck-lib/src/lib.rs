//! Certificate-validation test harness
//!
//! Runs two HTTPS endpoints side by side, each presenting a freshly issued
//! self-signed certificate:
//!
//! - **valid**: SAN entries for the configured DNS names (default `example.com`)
//! - **nosan**: no SAN extension at all, so hostname checks must fail
//!
//! Clients under test point at both and are expected to accept the first (once it is
//! trusted) and reject the second. Every request on either endpoint gets an empty
//! `200 OK`.
//!
//! # Example
//!
//! ```no_run
//! use certcheck_lib::{shutdown_signal, Harness, HarnessConfig};
//!
//! # async fn run() -> Result<(), certcheck_lib::HarnessError> {
//! let signal = shutdown_signal();
//! let harness = Harness::start(HarnessConfig::default()).await?;
//! println!("valid: {}, nosan: {}", harness.valid_addr(), harness.nosan_addr());
//!
//! for report in harness.run_until(signal).await? {
//!     if let Err(e) = report.shutdown {
//!         eprintln!("[{}] {}", report.kind, e);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod harness;
pub mod harness_config;

pub use endpoint::{EndpointKind, EndpointReport, EndpointState};
pub use harness::{shutdown_signal, Harness, HarnessError};
pub use harness_config::{
    CertDelivery, HarnessConfig, DEFAULT_DNS_NAME, DEFAULT_NOSAN_ADDR, DEFAULT_VALID_ADDR,
};

pub use certcheck_cert::{SelfSignedError, SUBJECT_ORGANIZATION, VALIDITY_WINDOW};
pub use certcheck_server_https::{HttpsServerError, ShutdownError, DEFAULT_GRACE_PERIOD};
