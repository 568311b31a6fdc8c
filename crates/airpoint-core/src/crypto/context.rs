//! Explicit cryptographic context.
//!
//! Everything that needs randomness or certificate parameters receives a
//! `&CryptoContext` instead of reaching for process-wide state: identity key
//! pairs, certificate serials, and pairing codes are all drawn from its
//! generator.  Production code builds one with [`CryptoContext::new`] (OS
//! randomness); tests can inject a seeded generator with
//! [`CryptoContext::with_rng`] to make identities and pairing codes
//! reproducible.

use std::sync::Mutex;

use rand::{rngs::OsRng, CryptoRng, RngCore};

/// Subject and SAN written into the self-signed certificate.
pub const DEFAULT_CERTIFICATE_SUBJECT: &str = "127.0.0.1";

/// Validity of a freshly generated certificate, counted from issuance.
pub const DEFAULT_CERTIFICATE_LIFETIME_DAYS: i64 = 730;

/// A cryptographically secure generator that can live behind a trait object.
pub trait SecureRng: RngCore + CryptoRng + Send {}

impl<R> SecureRng for R where R: RngCore + CryptoRng + Send {}

/// Random source and certificate parameters shared by the identity store,
/// the key-exchange engine, and pairing code generation.
pub struct CryptoContext {
    rng: Mutex<Box<dyn SecureRng>>,
    certificate_subject: String,
    certificate_lifetime_days: i64,
}

impl CryptoContext {
    /// Creates a context backed by the operating system's CSPRNG.
    pub fn new() -> Self {
        Self::with_rng(OsRng)
    }

    /// Creates a context backed by the supplied generator.
    pub fn with_rng<R>(rng: R) -> Self
    where
        R: RngCore + CryptoRng + Send + 'static,
    {
        Self {
            rng: Mutex::new(Box::new(rng)),
            certificate_subject: DEFAULT_CERTIFICATE_SUBJECT.to_string(),
            certificate_lifetime_days: DEFAULT_CERTIFICATE_LIFETIME_DAYS,
        }
    }

    /// Overrides the certificate subject (common name and SAN).
    pub fn with_certificate_subject(mut self, subject: impl Into<String>) -> Self {
        self.certificate_subject = subject.into();
        self
    }

    pub fn certificate_subject(&self) -> &str {
        &self.certificate_subject
    }

    pub fn certificate_lifetime_days(&self) -> i64 {
        self.certificate_lifetime_days
    }

    /// Runs `f` with exclusive access to the generator.
    pub fn with_random<T>(&self, f: impl FnOnce(&mut dyn SecureRng) -> T) -> T {
        // A panic while holding the lock cannot leave the generator in a
        // state that is unsafe to keep drawing from.
        let mut guard = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut **guard)
    }

    /// Fills `dest` with random bytes.
    pub fn fill_bytes(&self, dest: &mut [u8]) {
        self.with_random(|rng| rng.fill_bytes(dest));
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("certificate_subject", &self.certificate_subject)
            .field("certificate_lifetime_days", &self.certificate_lifetime_days)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_fill_bytes_produces_non_zero_output() {
        // Arrange
        let ctx = CryptoContext::new();
        let mut buf = [0u8; 32];

        // Act
        ctx.fill_bytes(&mut buf);

        // Assert
        assert_ne!(buf, [0u8; 32], "32 random bytes must not all be zero");
    }

    #[test]
    fn test_seeded_contexts_produce_identical_streams() {
        // Arrange
        let a = CryptoContext::with_rng(StdRng::seed_from_u64(7));
        let b = CryptoContext::with_rng(StdRng::seed_from_u64(7));
        let mut buf_a = [0u8; 16];
        let mut buf_b = [0u8; 16];

        // Act
        a.fill_bytes(&mut buf_a);
        b.fill_bytes(&mut buf_b);

        // Assert
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn test_default_certificate_parameters() {
        let ctx = CryptoContext::default();
        assert_eq!(ctx.certificate_subject(), "127.0.0.1");
        assert_eq!(ctx.certificate_lifetime_days(), 730);
    }

    #[test]
    fn test_with_certificate_subject_overrides_subject() {
        let ctx = CryptoContext::new().with_certificate_subject("airpoint.local");
        assert_eq!(ctx.certificate_subject(), "airpoint.local");
    }
}
