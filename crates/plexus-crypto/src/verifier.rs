//! The trusted keyring.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{CryptoError, CryptoResult};
use crate::keypair::PublicKey;
use crate::signature::Signature;

/// Key identifier (first 8 bytes of the public key).
pub type KeyId = [u8; 8];

/// A set of trusted public keys.
///
/// # Example
///
/// ```
/// use plexus_crypto::{KeyPair, SignatureVerifier};
///
/// let keypair = KeyPair::generate();
/// let mut verifier = SignatureVerifier::new();
/// verifier.add_trusted_key(keypair.export_public_key());
///
/// let signature = keypair.sign(b"checksum");
/// assert!(verifier.verify_any(b"checksum", &signature).is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    trusted_keys: HashMap<KeyId, PublicKey>,
}

impl SignatureVerifier {
    /// Create an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every keyring file, one hex public key per line.
    ///
    /// Blank lines and lines starting with `#` are skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first unreadable file or malformed key.
    pub fn from_keyring_files<P: AsRef<Path>>(paths: &[P]) -> CryptoResult<Self> {
        let mut verifier = Self::new();
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|e| CryptoError::io(path, &e))?;
            let mut added = 0usize;
            for line in text.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                verifier.add_trusted_key(PublicKey::from_hex(line)?);
                added = added.saturating_add(1);
            }
            debug!(keyring = %path.display(), keys = added, "Loaded keyring file");
        }
        Ok(verifier)
    }

    /// Trust a key, returning its id.
    pub fn add_trusted_key(&mut self, key: PublicKey) -> KeyId {
        let id = key.key_id();
        self.trusted_keys.insert(id, key);
        id
    }

    /// Whether a key id is trusted.
    #[must_use]
    pub fn is_trusted(&self, key_id: &KeyId) -> bool {
        self.trusted_keys.contains_key(key_id)
    }

    /// Number of trusted keys.
    #[must_use]
    pub fn trusted_key_count(&self) -> usize {
        self.trusted_keys.len()
    }

    /// Verify with the key named by `key_id`.
    ///
    /// # Errors
    ///
    /// Fails when the key is not trusted or the signature does not verify.
    pub fn verify(&self, key_id: &KeyId, message: &[u8], signature: &Signature) -> CryptoResult<()> {
        let key = self.trusted_keys.get(key_id).ok_or_else(|| {
            CryptoError::InvalidPublicKey(format!("key {} not trusted", hex::encode(key_id)))
        })?;
        key.verify(message, signature)
    }

    /// Verify with whichever trusted key signed the message.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SignatureVerificationFailed`] when no key matches.
    pub fn verify_any(&self, message: &[u8], signature: &Signature) -> CryptoResult<KeyId> {
        self.trusted_keys
            .iter()
            .find(|(_, key)| key.verify(message, signature).is_ok())
            .map(|(id, _)| *id)
            .ok_or(CryptoError::SignatureVerificationFailed)
    }
}
