//! secp256k1 key handling for kind 445 signers.
//!
//! Each kind 445 event is signed with a fresh [`EphemeralKeypair`] so that
//! no two group messages share a pubkey.

use std::sync::LazyLock;

use nostr::secp256k1::{
    rand::rngs::OsRng, schnorr::Signature, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey,
};

use crate::nostr::error::{NostrError, Result};
use crate::secret::SecretBytes;

/// Shared secp256k1 context.
///
/// Building a context precomputes signing and verification tables, so it
/// is created once and reused. It holds no secret state.
pub static SECP: LazyLock<Secp256k1<nostr::secp256k1::All>> = LazyLock::new(Secp256k1::new);

/// A keypair that signs exactly one Nostr event.
///
/// # Security
///
/// - The secret lives in a [`SecretBytes`] and is wiped on drop
/// - Never persisted, never reused across events
///
/// # Example
///
/// ```
/// use circle_engine::nostr::EphemeralKeypair;
///
/// let a = EphemeralKeypair::generate();
/// let b = EphemeralKeypair::generate();
/// assert_ne!(a.pubkey_hex(), b.pubkey_hex());
/// ```
pub struct EphemeralKeypair {
    secret: SecretBytes,
    pubkey_bytes: [u8; 32],
}

impl EphemeralKeypair {
    /// Generates a new random keypair from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let keypair = Keypair::new(&SECP, &mut OsRng);
        let mut secret_bytes = keypair.secret_key().secret_bytes();
        let pubkey_bytes = keypair.x_only_public_key().0.serialize();

        Self {
            secret: SecretBytes::from_array(&mut secret_bytes),
            pubkey_bytes,
        }
    }

    /// Creates a keypair from an existing secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid secret key.
    pub fn from_secret(secret: SecretBytes) -> Result<Self> {
        let pubkey_bytes = xonly_pubkey(&secret)?;
        Ok(Self {
            secret,
            pubkey_bytes,
        })
    }

    /// Public key as 64 hex characters.
    #[must_use]
    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey_bytes)
    }

    /// Public key as raw bytes.
    #[must_use]
    pub const fn pubkey_bytes(&self) -> [u8; 32] {
        self.pubkey_bytes
    }

    /// Signs a 32-byte digest, returning the hex signature.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<String> {
        schnorr_sign(&self.secret, digest).map(hex::encode)
    }
}

impl std::fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("pubkey", &self.pubkey_hex())
            .finish_non_exhaustive()
    }
}

/// Derives the x-only public key for a secret.
///
/// # Errors
///
/// Returns an error if the secret is zero or not below the curve order.
pub(crate) fn xonly_pubkey(secret: &SecretBytes) -> Result<[u8; 32]> {
    secret.expose_scoped(|bytes| {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| NostrError::KeyDerivation(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&SECP, &secret_key);
        Ok(keypair.x_only_public_key().0.serialize())
    })
}

/// Generates a secret that is a valid secp256k1 scalar.
#[cfg(test)]
pub(crate) fn generate_secret() -> SecretBytes {
    let keypair = Keypair::new(&SECP, &mut OsRng);
    let mut bytes = keypair.secret_key().secret_bytes();
    SecretBytes::from_array(&mut bytes)
}

/// BIP-340 Schnorr signature over `digest`.
///
/// # Errors
///
/// Returns an error if the secret is not a valid key.
pub(crate) fn schnorr_sign(secret: &SecretBytes, digest: &[u8; 32]) -> Result<[u8; 64]> {
    secret.expose_scoped(|bytes| {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| NostrError::Signing(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&SECP, &secret_key);
        Ok(SECP
            .sign_schnorr(&Message::from_digest(*digest), &keypair)
            .serialize())
    })
}

/// Verifies a BIP-340 Schnorr signature. Malformed keys or signatures fail.
#[must_use]
pub(crate) fn schnorr_verify(pubkey: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool {
    let Ok(pubkey) = XOnlyPublicKey::from_slice(pubkey) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    SECP.verify_schnorr(&signature, &Message::from_digest(*digest), &pubkey)
        .is_ok()
}
