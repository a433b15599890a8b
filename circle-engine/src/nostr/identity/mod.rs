//! Long-lived Nostr identity.
//!
//! The identity key signs kind 443 KeyPackages, kind 10051 relay lists and
//! the NIP-59 seal around Welcomes. It never signs MLS content: every group
//! gets its own leaf signing key (see [`crate::mls`]).

mod keypair;

pub use keypair::IdentityKeypair;

use thiserror::Error;

/// Errors from identity key handling.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Secret bytes are not a valid secp256k1 scalar.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The nsec string could not be parsed.
    #[error("Invalid nsec: {0}")]
    InvalidNsec(String),

    /// Bech32 encoding failed.
    #[error("Bech32 encoding failed: {0}")]
    Bech32(String),

    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),
}
