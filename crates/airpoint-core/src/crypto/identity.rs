//! Long-lived server identity: a P-256 keypair and a self-signed certificate.
//!
//! The identity is created once, on first start, and reloaded on every start
//! after that so the public key advertised on the LAN never changes.  This
//! module only knows how to generate, serialise, and validate the material;
//! where it is persisted is the server's storage adapter's business.
//!
//! # Encodings
//!
//! | Item        | Encoding                                        |
//! |-------------|-------------------------------------------------|
//! | Private key | PKCS#8 PEM                                      |
//! | Certificate | X.509 PEM, ECDSA-SHA256, `CN=127.0.0.1`         |
//! | Public key  | SubjectPublicKeyInfo DER, base64 on the wire    |

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::pkcs8::{der::Document, DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use zeroize::Zeroizing;

use super::context::CryptoContext;

/// The identity could not be created or loaded.
///
/// Any variant is fatal for server startup: a server without a usable
/// identity must not advertise itself.
#[derive(Debug, Error)]
pub enum KeyProvisioningError {
    /// Keypair or certificate generation failed.
    #[error("identity generation failed: {0}")]
    Generation(String),

    /// The persisted private key could not be parsed.
    #[error("persisted private key is malformed: {0}")]
    MalformedKey(String),

    /// The persisted certificate could not be parsed.
    #[error("persisted certificate is malformed: {0}")]
    MalformedCertificate(String),

    /// The certificate does not carry the persisted key's public half.
    #[error("persisted certificate does not bind the persisted public key")]
    CertificateMismatch,

    /// Only part of the identity material exists on disk.
    #[error("identity material is incomplete: {missing} is missing")]
    Incomplete { missing: PathBuf },

    /// No directory could be determined to persist the identity in.
    #[error("could not determine a directory for identity storage")]
    NoStorageDir,

    /// A file-system error occurred reading or writing identity material.
    #[error("I/O error accessing identity at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The server's keypair and the certificate binding it.
///
/// Immutable once built; share it behind an `Arc`.
pub struct Identity {
    secret: SecretKey,
    public: PublicKey,
    public_der: Vec<u8>,
    certificate_pem: String,
}

impl Identity {
    /// Generates a fresh P-256 keypair from `ctx`'s generator and a
    /// self-signed certificate for it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProvisioningError::Generation`] if key or certificate
    /// generation fails.
    pub fn generate(ctx: &CryptoContext) -> Result<Self, KeyProvisioningError> {
        let secret = ctx.with_random(|mut rng| SecretKey::random(&mut rng));
        let pkcs8 = secret
            .to_pkcs8_der()
            .map_err(|e| KeyProvisioningError::Generation(e.to_string()))?;
        let key_pair = KeyPair::try_from(pkcs8.as_bytes())
            .map_err(|e| KeyProvisioningError::Generation(e.to_string()))?;
        let certificate_pem = self_signed_certificate(ctx, &key_pair)?;
        Self::from_parts(secret, certificate_pem)
    }

    /// Rebuilds an identity from its persisted PEM encodings.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProvisioningError::MalformedKey`] or
    /// [`KeyProvisioningError::MalformedCertificate`] when either document
    /// cannot be parsed, and [`KeyProvisioningError::CertificateMismatch`]
    /// when the certificate belongs to a different key.
    pub fn from_pem(key_pem: &str, certificate_pem: &str) -> Result<Self, KeyProvisioningError> {
        let secret = SecretKey::from_pkcs8_pem(key_pem)
            .map_err(|e| KeyProvisioningError::MalformedKey(e.to_string()))?;
        let identity = Self::from_parts(secret, certificate_pem.to_string())?;
        identity.verify_certificate_binding()?;
        Ok(identity)
    }

    fn from_parts(secret: SecretKey, certificate_pem: String) -> Result<Self, KeyProvisioningError> {
        let public = secret.public_key();
        let public_der = public
            .to_public_key_der()
            .map_err(|e| KeyProvisioningError::Generation(e.to_string()))?
            .as_bytes()
            .to_vec();
        Ok(Self {
            secret,
            public,
            public_der,
            certificate_pem,
        })
    }

    /// The certificate DER embeds the SubjectPublicKeyInfo verbatim, so a
    /// byte search is enough to tell whether it was issued for this key.
    fn verify_certificate_binding(&self) -> Result<(), KeyProvisioningError> {
        let (label, document) = Document::from_pem(&self.certificate_pem)
            .map_err(|e| KeyProvisioningError::MalformedCertificate(e.to_string()))?;
        if label != "CERTIFICATE" {
            return Err(KeyProvisioningError::MalformedCertificate(format!(
                "unexpected PEM label {label:?}"
            )));
        }

        let spki = self.public_der.as_slice();
        let bound = document
            .as_bytes()
            .windows(spki.len())
            .any(|window| window == spki);
        if bound {
            Ok(())
        } else {
            Err(KeyProvisioningError::CertificateMismatch)
        }
    }

    /// PKCS#8 PEM encoding of the private key, for persistence only.
    ///
    /// # Errors
    ///
    /// Returns [`KeyProvisioningError::Generation`] if encoding fails.
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, KeyProvisioningError> {
        self.secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyProvisioningError::Generation(e.to_string()))
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// SubjectPublicKeyInfo DER of the public key.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Base64 of [`Self::public_key_der`], the form used in advertisements
    /// and in the session handshake.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(&self.public_der)
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Issues a self-signed certificate for `key_pair`, valid from one day ago
/// for the context's configured lifetime.
fn self_signed_certificate(
    ctx: &CryptoContext,
    key_pair: &KeyPair,
) -> Result<String, KeyProvisioningError> {
    let generation = |e: rcgen::Error| KeyProvisioningError::Generation(e.to_string());

    let subject = ctx.certificate_subject();
    let mut params = CertificateParams::new(vec![subject.to_string()]).map_err(generation)?;

    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, subject);
    params.distinguished_name = name;

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(1);
    params.not_after = now + Duration::days(ctx.certificate_lifetime_days());

    let mut serial = [0u8; 8];
    ctx.fill_bytes(&mut serial);
    serial[0] &= 0x7F; // keep the DER integer positive
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    let certificate = params.self_signed(key_pair).map_err(generation)?;
    Ok(certificate.pem())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
