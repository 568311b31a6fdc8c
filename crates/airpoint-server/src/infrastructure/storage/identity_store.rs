//! File-backed persistence of the server identity.
//!
//! Two files live in the identity directory:
//!
//! | File           | Content                      |
//! |----------------|------------------------------|
//! | `identity.key` | PKCS#8 PEM private key (0600) |
//! | `identity.crt` | PEM self-signed certificate  |
//!
//! The first call with an empty directory generates and writes both.  Every
//! later call, in this process or the next, loads them and checks that the
//! certificate still binds the key.  A directory holding only one of the two
//! is treated as damaged, not as empty: regenerating would silently change
//! the public key every client knows the server by.  A first-time write that
//! fails part way removes what it wrote, so the directory is left empty
//! rather than damaged.

use std::io::Write;
use std::path::{Path, PathBuf};

use airpoint_core::{CryptoContext, Identity, KeyProvisioningError};
use tracing::{debug, info, warn};

pub const KEY_FILE: &str = "identity.key";
pub const CERT_FILE: &str = "identity.crt";

/// Loads or creates the server identity in one directory.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(KEY_FILE)
    }

    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(CERT_FILE)
    }

    /// Returns the persisted identity, generating and persisting one first
    /// if the directory holds none.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProvisioningError::Incomplete`] when only one of the two
    /// files exists, the parse and mismatch variants when the files are
    /// unusable, and [`KeyProvisioningError::Io`] for file-system failures.
    pub fn ensure_identity(&self, ctx: &CryptoContext) -> Result<Identity, KeyProvisioningError> {
        let key_path = self.key_path();
        let cert_path = self.certificate_path();

        match (key_path.exists(), cert_path.exists()) {
            (true, true) => {
                let key_pem = read(&key_path)?;
                let cert_pem = read(&cert_path)?;
                let identity = Identity::from_pem(&key_pem, &cert_pem)?;
                debug!(dir = %self.dir.display(), "loaded persisted identity");
                Ok(identity)
            }
            (false, false) => {
                let identity = Identity::generate(ctx)?;
                self.persist(&identity)?;
                info!(dir = %self.dir.display(), "generated new server identity");
                Ok(identity)
            }
            (true, false) => Err(KeyProvisioningError::Incomplete { missing: cert_path }),
            (false, true) => Err(KeyProvisioningError::Incomplete { missing: key_path }),
        }
    }

    fn persist(&self, identity: &Identity) -> Result<(), KeyProvisioningError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| KeyProvisioningError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let key_pem = identity.private_key_pem()?;
        let key_path = self.key_path();
        write_private(&key_path, key_pem.as_bytes())?;

        let cert_path = self.certificate_path();
        if let Err(source) = std::fs::write(&cert_path, identity.certificate_pem()) {
            // A lone key file would read as a damaged identity on every
            // later start.
            discard(&key_path);
            return Err(KeyProvisioningError::Io {
                path: cert_path,
                source,
            });
        }
        Ok(())
    }
}

/// Removes a file written by a failed `persist`.
fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), "could not remove partial identity file: {e}");
    }
}

fn read(path: &Path) -> Result<String, KeyProvisioningError> {
    std::fs::read_to_string(path).map_err(|source| KeyProvisioningError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `contents` to a new file readable only by the owner.
fn write_private(path: &Path, contents: &[u8]) -> Result<(), KeyProvisioningError> {
    let io_err = |source: std::io::Error| KeyProvisioningError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;
    let written = file.write_all(contents).and_then(|()| file.sync_all());
    if let Err(e) = written {
        drop(file);
        discard(path);
        return Err(io_err(e));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
