//! Plexus Crypto - Integrity and trust checks for plugin binaries.
//!
//! This crate provides:
//! - BLAKE3 checksums of plugin executables
//! - Ed25519 key pairs and detached signatures over those checksums
//! - A verifier holding the trusted keyring
//! - Trust levels deciding whether an unsigned or badly signed plugin loads
//!
//! # Example
//!
//! ```
//! use plexus_crypto::{ContentHash, KeyPair, PluginSigner, SignatureVerifier, TrustLevel};
//!
//! let keypair = KeyPair::generate();
//! let checksum = ContentHash::hash(b"plugin binary");
//! let signature = keypair.sign(checksum.as_bytes());
//!
//! let mut verifier = SignatureVerifier::new();
//! verifier.add_trusted_key(keypair.export_public_key());
//!
//! let signer = PluginSigner::new(TrustLevel::Enabled, verifier);
//! assert!(signer.verify_plugin("plugin", &checksum, Some(&signature)).unwrap());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod hash;
mod keypair;
mod signature;
mod trust;
mod verifier;

pub use error::{CryptoError, CryptoResult};
pub use hash::ContentHash;
pub use keypair::{KeyPair, PublicKey};
pub use signature::Signature;
pub use trust::{PluginSigner, TrustLevel};
pub use verifier::{KeyId, SignatureVerifier};
