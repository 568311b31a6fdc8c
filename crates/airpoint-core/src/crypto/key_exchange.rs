//! Pairing key exchange and the encrypted session channel.
//!
//! Both ends of a pairing hold three inputs: their own identity, the other
//! side's public key, and the pairing code a human carried from one screen to
//! the other.  From those, each side derives on its own:
//!
//! - the AES-256 key, as the raw ECDH P-256 shared secret between its own
//!   private key and the peer's public key, and
//! - the 32-byte GCM nonce, as SHA-256 of the pairing code.
//!
//! No key material is exchanged beyond the public keys.
//!
//! # Nonce reuse
//!
//! The nonce is fixed for the lifetime of a [`PairingContext`]: every message
//! in both directions is sealed under the same key and nonce.  This matches
//! the deployed wire behaviour and is kept for interoperability, but it voids
//! GCM's confidentiality and integrity guarantees across messages; see
//! DESIGN.md before relying on it beyond a trusted LAN.

use aes_gcm::aead::{consts::U32, Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::{ecdh, pkcs8::DecodePublicKey, PublicKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{context::CryptoContext, identity::Identity, pairing_code::generate_pairing_code};

/// Length of the digest-derived nonce in bytes.
pub const NONCE_LEN: usize = 32;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 256-bit nonce, as produced by the pairing digest.
type SessionCipher = AesGcm<Aes256, U32>;

/// The peer's public key could not be used for agreement.
#[derive(Debug, Error, PartialEq)]
pub enum HandshakeError {
    /// The key was not valid base64.
    #[error("peer public key is not valid base64: {0}")]
    InvalidEncoding(String),

    /// The decoded bytes are not a P-256 SubjectPublicKeyInfo.
    #[error("peer public key is not a P-256 public key: {0}")]
    InvalidKey(String),

    /// The agreed secret could not be turned into a cipher.
    #[error("key agreement failed: {0}")]
    Agreement(String),
}

/// A message could not be decrypted under the session context.
///
/// Callers treat every variant the same way: the session is no longer
/// decryptable.
#[derive(Debug, Error, PartialEq)]
pub enum DecryptionError {
    #[error("ciphertext is not valid base64")]
    InvalidEncoding,

    #[error("ciphertext is shorter than the {TAG_LEN}-byte authentication tag")]
    Truncated,

    /// Wrong key, wrong nonce, or tampered data.
    #[error("authentication tag mismatch")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

/// A message could not be encrypted.
#[derive(Debug, Error, PartialEq)]
#[error("encryption failed")]
pub struct EncryptionError;

/// Derives the per-pairing nonce from the pairing code.
///
/// Deterministic: the same code always yields the same bytes, on any engine.
pub fn derive_nonce(pairing_code: &str) -> [u8; NONCE_LEN] {
    Sha256::digest(pairing_code.as_bytes()).into()
}

/// Key-exchange engine bound to one identity.
///
/// The server builds one from its persisted identity; a client builds one
/// from an ephemeral identity.  The engine itself holds no per-peer state;
/// [`KeyExchangeEngine::pair_with`] hands out a fresh [`PairingContext`] for
/// each peer.
#[derive(Debug, Clone)]
pub struct KeyExchangeEngine {
    ctx: Arc<CryptoContext>,
    identity: Arc<Identity>,
}

impl KeyExchangeEngine {
    pub fn new(ctx: Arc<CryptoContext>, identity: Arc<Identity>) -> Self {
        Self { ctx, identity }
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    /// Base64 SubjectPublicKeyInfo of the engine's identity.
    pub fn public_key_base64(&self) -> String {
        self.identity.public_key_base64()
    }

    /// Produces a new random pairing code from the engine's random source.
    pub fn generate_pairing_code(&self) -> String {
        generate_pairing_code(&self.ctx)
    }

    /// Derives the shared session context with the holder of
    /// `peer_public_key_base64`, who must know the same `pairing_code`.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError`] if the peer key is not valid base64, is not
    /// a P-256 SubjectPublicKeyInfo, or the agreed secret cannot key a cipher.
    pub fn pair_with(
        &self,
        pairing_code: &str,
        peer_public_key_base64: &str,
    ) -> Result<PairingContext, HandshakeError> {
        let der = STANDARD
            .decode(peer_public_key_base64.trim())
            .map_err(|e| HandshakeError::InvalidEncoding(e.to_string()))?;
        let peer = PublicKey::from_public_key_der(&der)
            .map_err(|e| HandshakeError::InvalidKey(e.to_string()))?;

        let shared = ecdh::diffie_hellman(
            self.identity.secret_key().to_nonzero_scalar(),
            peer.as_affine(),
        );
        let mut key = [0u8; 32];
        key.copy_from_slice(shared.raw_secret_bytes().as_slice());

        let context = PairingContext::new(pairing_code, key);
        key.zeroize();
        if context.is_ok() {
            debug!("derived pairing context for peer key of {} bytes", der.len());
        }
        context
    }
}

/// Shared key and nonce for one paired session.
///
/// Owned by the session that created it; both directions of the session use
/// the same context.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PairingContext {
    #[zeroize(skip)]
    pairing_code: String,
    nonce: [u8; NONCE_LEN],
    key: [u8; 32],
    #[zeroize(skip)]
    cipher: SessionCipher,
}

impl PairingContext {
    fn new(pairing_code: &str, key: [u8; 32]) -> Result<Self, HandshakeError> {
        let cipher = SessionCipher::new_from_slice(&key)
            .map_err(|e| HandshakeError::Agreement(e.to_string()))?;
        Ok(Self {
            pairing_code: pairing_code.to_string(),
            nonce: derive_nonce(pairing_code),
            key,
            cipher,
        })
    }

    pub fn pairing_code(&self) -> &str {
        &self.pairing_code
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Seals `plaintext`, returning `ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError`] if the plaintext exceeds the cipher's
    /// length limit.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        self.cipher
            .encrypt(Nonce::<U32>::from_slice(&self.nonce), plaintext)
            .map_err(|_| EncryptionError)
    }

    /// Opens `ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionError::Truncated`] for input shorter than a tag and
    /// [`DecryptionError::Authentication`] when the tag does not verify.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if ciphertext.len() < TAG_LEN {
            return Err(DecryptionError::Truncated);
        }
        self.cipher
            .decrypt(Nonce::<U32>::from_slice(&self.nonce), ciphertext)
            .map_err(|_| DecryptionError::Authentication)
    }

    /// Encrypts a text message into its base64 wire form.
    ///
    /// # Errors
    ///
    /// See [`Self::encrypt`].
    pub fn encrypt_to_base64(&self, plaintext: &str) -> Result<String, EncryptionError> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Decrypts a base64 wire message back into text.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionError`] for bad base64, a failed tag check, or a
    /// plaintext that is not UTF-8.
    pub fn decrypt_from_base64(&self, ciphertext: &str) -> Result<String, DecryptionError> {
        let bytes = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| DecryptionError::InvalidEncoding)?;
        let plaintext = self.decrypt(&bytes)?;
        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }
}

impl std::fmt::Debug for PairingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingContext").finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_engine(ctx: &Arc<CryptoContext>) -> KeyExchangeEngine {
        let identity = Identity::generate(ctx).expect("identity");
        KeyExchangeEngine::new(Arc::clone(ctx), Arc::new(identity))
    }

    fn make_pair(code_a: &str, code_b: &str) -> (PairingContext, PairingContext) {
        let ctx = Arc::new(CryptoContext::new());
        let server = make_engine(&ctx);
        let client = make_engine(&ctx);
        let server_side = server
            .pair_with(code_a, &client.public_key_base64())
            .unwrap();
        let client_side = client
            .pair_with(code_b, &server.public_key_base64())
            .unwrap();
        (server_side, client_side)
    }

    #[test]
    fn test_derive_nonce_is_deterministic() {
        assert_eq!(derive_nonce("aB3fK9"), derive_nonce("aB3fK9"));
    }

    #[test]
    fn test_derive_nonce_differs_for_different_codes() {
        assert_ne!(derive_nonce("aB3fK9"), derive_nonce("ab3fk9"));
    }

    #[test]
    fn test_derive_nonce_matches_sha256_of_code() {
        // SHA-256("abc") from FIPS 180-2 appendix B.1
        let expected: [u8; 32] = [
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
            0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
            0xf2, 0x00, 0x15, 0xad,
        ];
        assert_eq!(derive_nonce("abc"), expected);
    }

    #[test]
    fn test_both_sides_derive_same_nonce_on_separate_engines() {
        let (server_side, client_side) = make_pair("q3Vk1", "q3Vk1");
        assert_eq!(server_side.nonce(), client_side.nonce());
    }

    #[test]
    fn test_round_trip_across_sides() {
        // Arrange
        let (server_side, client_side) = make_pair("q3Vk1", "q3Vk1");

        // Act
        let sealed = client_side.encrypt(b"move 12 -4").unwrap();
        let opened = server_side.decrypt(&sealed).unwrap();

        // Assert
        assert_eq!(opened, b"move 12 -4");
    }

    #[test]
    fn test_ciphertext_carries_tag() {
        let (server_side, _) = make_pair("q3Vk1", "q3Vk1");
        let sealed = server_side.encrypt(b"abc").unwrap();
        assert_eq!(sealed.len(), 3 + TAG_LEN);
    }

    #[test]
    fn test_round_trip_empty_plaintext() {
        let (server_side, client_side) = make_pair("x", "x");
        let sealed = server_side.encrypt(b"").unwrap();
        assert_eq!(client_side.decrypt(&sealed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decrypt_fails_with_different_pairing_code() {
        // Arrange: both sides agree on the key but not on the code
        let (server_side, client_side) = make_pair("q3Vk1", "q3Vk2");

        // Act
        let sealed = client_side.encrypt(b"hello").unwrap();
        let result = server_side.decrypt(&sealed);

        // Assert
        assert_eq!(result, Err(DecryptionError::Authentication));
    }

    #[test]
    fn test_decrypt_fails_with_different_peer_key() {
        // Arrange
        let ctx = Arc::new(CryptoContext::new());
        let server = make_engine(&ctx);
        let client = make_engine(&ctx);
        let intruder = make_engine(&ctx);
        let server_side = server
            .pair_with("code", &intruder.public_key_base64())
            .unwrap();
        let client_side = client.pair_with("code", &server.public_key_base64()).unwrap();

        // Act
        let sealed = client_side.encrypt(b"hello").unwrap();

        // Assert
        assert_eq!(
            server_side.decrypt(&sealed),
            Err(DecryptionError::Authentication)
        );
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let (server_side, client_side) = make_pair("k", "k");
        let mut sealed = client_side.encrypt(b"hello").unwrap();
        sealed[0] ^= 0x01;
        assert_eq!(
            server_side.decrypt(&sealed),
            Err(DecryptionError::Authentication)
        );
    }

    #[test]
    fn test_decrypt_rejects_truncated_input() {
        let (server_side, _) = make_pair("k", "k");
        assert_eq!(
            server_side.decrypt(&[0u8; TAG_LEN - 1]),
            Err(DecryptionError::Truncated)
        );
    }

    #[test]
    fn test_decrypt_from_base64_rejects_bad_encoding() {
        let (server_side, _) = make_pair("k", "k");
        assert_eq!(
            server_side.decrypt_from_base64("%%%not-base64%%%"),
            Err(DecryptionError::InvalidEncoding)
        );
    }

    #[test]
    fn test_decrypt_from_base64_rejects_non_utf8_plaintext() {
        let (server_side, client_side) = make_pair("k", "k");
        let sealed = STANDARD.encode(client_side.encrypt(&[0xFF, 0xFE]).unwrap());
        assert_eq!(
            server_side.decrypt_from_base64(&sealed),
            Err(DecryptionError::InvalidUtf8)
        );
    }

    #[test]
    fn test_base64_round_trip() {
        let (server_side, client_side) = make_pair("aB3fK9", "aB3fK9");
        let wire = client_side.encrypt_to_base64("ping").unwrap();
        assert_eq!(server_side.decrypt_from_base64(&wire).unwrap(), "ping");
    }

    #[test]
    fn test_pair_with_rejects_invalid_base64() {
        let ctx = Arc::new(CryptoContext::new());
        let engine = make_engine(&ctx);
        let result = engine.pair_with("code", "***");
        assert!(matches!(result, Err(HandshakeError::InvalidEncoding(_))));
    }

    #[test]
    fn test_pair_with_rejects_non_key_bytes() {
        let ctx = Arc::new(CryptoContext::new());
        let engine = make_engine(&ctx);
        let result = engine.pair_with("code", &STANDARD.encode(b"definitely not a key"));
        assert!(matches!(result, Err(HandshakeError::InvalidKey(_))));
    }

    #[test]
    fn test_pair_with_tolerates_trailing_whitespace() {
        let ctx = Arc::new(CryptoContext::new());
        let server = make_engine(&ctx);
        let client = make_engine(&ctx);
        let key = format!("{}\r\n", client.public_key_base64());
        assert!(server.pair_with("code", &key).is_ok());
    }

    #[test]
    fn test_generate_pairing_code_is_not_empty() {
        let ctx = Arc::new(CryptoContext::new());
        let engine = make_engine(&ctx);
        assert!(!engine.generate_pairing_code().is_empty());
    }
}
