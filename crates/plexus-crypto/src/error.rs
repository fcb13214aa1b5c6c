//! Cryptographic error types.

use thiserror::Error;

/// Errors raised while hashing, signing or verifying plugins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Key material had the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Signature had the wrong length.
    #[error("invalid signature length: expected {expected}, got {actual}")]
    InvalidSignatureLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Public key bytes are not a valid Ed25519 point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The signature did not verify against any trusted key.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Trust is enforced and the plugin carries no signature.
    #[error("plugin {plugin} is not signed and plugin trust is enabled")]
    MissingSignature {
        /// Plugin path or name.
        plugin: String,
    },

    /// Input was not valid hex.
    #[error("invalid hex encoding")]
    InvalidHexEncoding,

    /// Input was not valid base64.
    #[error("invalid base64 encoding")]
    InvalidBase64Encoding,

    /// Unknown trust level name.
    #[error("unknown trust level: {0}")]
    UnknownTrustLevel(String),

    /// Reading a plugin, signature or keyring file failed.
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

impl CryptoError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
