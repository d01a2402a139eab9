//! Ephemeral certificate issuance for TLS validation testing
//!
//! Issues short-lived self-signed leaf certificates, with or without a SAN extension,
//! and optionally materializes them as temporary PEM files that are removed on drop.

pub mod self_signed;
pub mod storage;

pub use self_signed::{
    issue, issue_to, GenerationStage, IssuedCertificate, SelfSignedError, SUBJECT_ORGANIZATION,
    VALIDITY_WINDOW,
};
pub use storage::EphemeralPemFiles;
