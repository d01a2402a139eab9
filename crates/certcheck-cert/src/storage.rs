//! Ephemeral PEM files for TLS stacks that only accept file paths
//!
//! The files live exactly as long as the [`EphemeralPemFiles`] value: dropping it, on any
//! path including unwinding, removes both from disk.

use crate::self_signed::{IssuedCertificate, SelfSignedError};
use std::io;
use std::path::Path;
use tempfile::TempPath;
use tracing::{debug, trace};

const CERT_PREFIX: &str = "certcheck-cert";
const KEY_PREFIX: &str = "certcheck-key";

/// Certificate and key PEM files in temporary storage
#[derive(Debug)]
pub struct EphemeralPemFiles {
    cert: TempPath,
    key: TempPath,
}

impl EphemeralPemFiles {
    /// Write `issued` into two new files under the system temp directory
    pub fn persist(issued: &IssuedCertificate) -> Result<Self, SelfSignedError> {
        Self::persist_in(std::env::temp_dir(), issued)
    }

    /// Write `issued` into two new files under `dir`
    pub fn persist_in(
        dir: impl AsRef<Path>,
        issued: &IssuedCertificate,
    ) -> Result<Self, SelfSignedError> {
        let dir = dir.as_ref();

        let mut cert_file = tempfile::Builder::new()
            .prefix(CERT_PREFIX)
            .suffix(".pem")
            .tempfile_in(dir)?;
        let mut key_file = tempfile::Builder::new()
            .prefix(KEY_PREFIX)
            .suffix(".pem")
            .tempfile_in(dir)?;

        issued.write_pem(cert_file.as_file_mut(), key_file.as_file_mut())?;

        // Readers open these by path right after we return
        cert_file.as_file().sync_all()?;
        key_file.as_file().sync_all()?;

        let files = Self {
            cert: cert_file.into_temp_path(),
            key: key_file.into_temp_path(),
        };

        debug!(
            "Persisted certificate {} to {} and {}",
            issued.serial_hex(),
            files.cert_path().display(),
            files.key_path().display()
        );

        Ok(files)
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert
    }

    pub fn key_path(&self) -> &Path {
        &self.key
    }

    /// Remove both files now, reporting the first removal error
    pub fn close(self) -> io::Result<()> {
        let Self { cert, key } = self;
        trace!("Removing {} and {}", cert.display(), key.display());

        let cert_result = cert.close();
        let key_result = key.close();
        cert_result.and(key_result)
    }
}
