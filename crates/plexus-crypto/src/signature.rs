//! Detached Ed25519 signatures over plugin checksums.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// An Ed25519 signature (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignatureLength`] unless the slice is 64 bytes.
    pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; 64] =
            slice
                .try_into()
                .map_err(|_| CryptoError::InvalidSignatureLength {
                    expected: 64,
                    actual: slice.len(),
                })?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Base64 encoding, the on-disk signature file format.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parse a base64 signature.
    ///
    /// # Errors
    ///
    /// Returns an error for bad base64 or a wrong length.
    pub fn from_base64(s: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|_| CryptoError::InvalidBase64Encoding)?;
        Self::try_from_slice(&bytes)
    }

    /// Read a detached signature file containing one base64 signature.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Io`] if the file cannot be read, or a decode error.
    pub fn read_file(path: impl AsRef<Path>) -> CryptoResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CryptoError::io(path, &e))?;
        Self::from_base64(&text)
    }

    /// Verify against a message and raw public key.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid key or a failed verification.
    pub fn verify(&self, message: &[u8], public_key: &[u8; 32]) -> CryptoResult<()> {
        let key = VerifyingKey::from_bytes(public_key)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        key.verify(message, &DalekSignature::from_bytes(&self.0))
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", hex::encode(&self.0[..8]))
    }
}

impl From<DalekSignature> for Signature {
    fn from(sig: DalekSignature) -> Self {
        Self(sig.to_bytes())
    }
}

impl Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    #[test]
    fn test_signature_file() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"checksum");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.sig");
        std::fs::write(&path, format!("{}\n", sig.to_base64())).unwrap();

        let read = Signature::read_file(&path).unwrap();
        assert_eq!(read, sig);
        assert!(read.verify(b"checksum", keypair.public_key_bytes()).is_ok());
        assert!(read.verify(b"other", keypair.public_key_bytes()).is_err());
    }

    #[test]
    fn test_invalid_length() {
        assert!(matches!(
            Signature::try_from_slice(&[0u8; 10]),
            Err(CryptoError::InvalidSignatureLength { actual: 10, .. })
        ));
    }
}
