//! Plugin trust levels.
//!
//! A plugin is signed by producing a detached signature over its BLAKE3
//! checksum. Whether a missing or invalid signature blocks loading depends
//! on the configured [`TrustLevel`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CryptoError, CryptoResult};
use crate::hash::ContentHash;
use crate::signature::Signature;
use crate::verifier::SignatureVerifier;

/// How strictly plugin signatures are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Signatures are never checked.
    Disabled,
    /// Every plugin must carry a valid signature.
    #[default]
    Enabled,
    /// Unsigned plugins load with a warning; bad signatures still fail.
    Warn,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::Warn => "warn",
        })
    }
}

impl FromStr for TrustLevel {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "0" => Ok(Self::Disabled),
            "enabled" | "1" => Ok(Self::Enabled),
            "warn" | "2" => Ok(Self::Warn),
            other => Err(CryptoError::UnknownTrustLevel(other.to_string())),
        }
    }
}

/// Applies a [`TrustLevel`] against a keyring.
#[derive(Debug, Clone, Default)]
pub struct PluginSigner {
    trust: TrustLevel,
    verifier: SignatureVerifier,
}

impl PluginSigner {
    /// Create a signer.
    #[must_use]
    pub fn new(trust: TrustLevel, verifier: SignatureVerifier) -> Self {
        Self { trust, verifier }
    }

    /// A signer that never checks anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(TrustLevel::Disabled, SignatureVerifier::new())
    }

    /// The configured trust level.
    #[must_use]
    pub fn trust_level(&self) -> TrustLevel {
        self.trust
    }

    /// Check a plugin's signature over its checksum.
    ///
    /// Returns whether the plugin is considered signed.
    ///
    /// # Errors
    ///
    /// With [`TrustLevel::Enabled`], a missing or invalid signature fails.
    /// With [`TrustLevel::Warn`], only an invalid signature fails.
    pub fn verify_plugin(
        &self,
        plugin: &str,
        checksum: &ContentHash,
        signature: Option<&Signature>,
    ) -> CryptoResult<bool> {
        match (self.trust, signature) {
            (TrustLevel::Disabled, _) => Ok(false),
            (TrustLevel::Enabled, None) => Err(CryptoError::MissingSignature {
                plugin: plugin.to_string(),
            }),
            (TrustLevel::Warn, None) => {
                warn!(plugin, "Loading unsigned plugin");
                Ok(false)
            },
            (TrustLevel::Enabled | TrustLevel::Warn, Some(sig)) => {
                self.verifier.verify_any(checksum.as_bytes(), sig)?;
                Ok(true)
            },
        }
    }
}
