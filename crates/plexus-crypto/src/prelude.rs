//! Prelude module - commonly used types for convenient import.
//!
//! Use `use plexus_crypto::prelude::*;` to import all essential types.

// Errors
pub use crate::{CryptoError, CryptoResult};

// Keys and signatures
pub use crate::{KeyId, KeyPair, PublicKey, Signature, SignatureVerifier};

// Plugin integrity
pub use crate::{ContentHash, PluginSigner, TrustLevel};
