//! Persistent identity keypair.

use nostr::prelude::ToBech32;
use nostr::secp256k1::{Keypair, Message, SecretKey as Secp256k1SecretKey};
use nostr::{Keys, PublicKey, SecretKey};

use super::IdentityError;
use crate::nostr::keys::SECP;
use crate::secret::SecretBytes;

/// The user's Nostr identity (nsec/npub).
///
/// # Security
///
/// - Secret bytes live in a [`SecretBytes`] and are wiped on drop
/// - Reconstructed `Keys` are short-lived and never stored
/// - Debug output never includes secret material
///
/// # Example
///
/// ```
/// use circle_engine::nostr::identity::IdentityKeypair;
///
/// let keypair = IdentityKeypair::generate();
/// let nsec = keypair.export_nsec().unwrap();
/// let restored = IdentityKeypair::from_nsec(&nsec).unwrap();
/// assert_eq!(keypair.pubkey_hex(), restored.pubkey_hex());
/// ```
pub struct IdentityKeypair {
    secret: SecretBytes,
    pubkey_bytes: [u8; 32],
}

impl IdentityKeypair {
    /// Generates a new random identity.
    #[must_use]
    pub fn generate() -> Self {
        let keys = Keys::generate();
        let mut secret_bytes = keys.secret_key().secret_bytes();
        Self {
            secret: SecretBytes::from_array(&mut secret_bytes),
            pubkey_bytes: keys.public_key().to_bytes(),
        }
    }

    /// Restores an identity from raw secret bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid secret key.
    pub fn from_secret(secret: SecretBytes) -> Result<Self, IdentityError> {
        let pubkey_bytes = secret.expose_scoped(|bytes| {
            let secret_key = Secp256k1SecretKey::from_slice(bytes)
                .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
            let keypair = Keypair::from_secret_key(&SECP, &secret_key);
            Ok::<_, IdentityError>(keypair.x_only_public_key().0.serialize())
        })?;

        Ok(Self {
            secret,
            pubkey_bytes,
        })
    }

    /// Imports an identity from a NIP-19 `nsec1...` string.
    ///
    /// # Errors
    ///
    /// Returns an error if the nsec is malformed.
    pub fn from_nsec(nsec: &str) -> Result<Self, IdentityError> {
        let keys = Keys::parse(nsec).map_err(|e| IdentityError::InvalidNsec(e.to_string()))?;
        let mut secret_bytes = keys.secret_key().secret_bytes();
        Ok(Self {
            secret: SecretBytes::from_array(&mut secret_bytes),
            pubkey_bytes: keys.public_key().to_bytes(),
        })
    }

    /// Exports the secret key as nsec for user-initiated backup.
    ///
    /// # Errors
    ///
    /// Returns an error if bech32 encoding fails.
    pub fn export_nsec(&self) -> Result<String, IdentityError> {
        self.secret.expose_scoped(|bytes| {
            let secret_key = SecretKey::from_slice(bytes)
                .map_err(|e| IdentityError::KeyDerivation(e.to_string()))?;
            secret_key
                .to_bech32()
                .map_err(|e| IdentityError::Bech32(e.to_string()))
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

    /// Public key as a `nostr` type.
    ///
    /// # Errors
    ///
    /// Returns an error if the cached bytes are not a valid x-only key.
    pub fn public_key(&self) -> Result<PublicKey, IdentityError> {
        PublicKey::from_slice(&self.pubkey_bytes)
            .map_err(|e| IdentityError::KeyDerivation(e.to_string()))
    }

    /// Public key as `npub1...`.
    ///
    /// # Errors
    ///
    /// Returns an error if bech32 encoding fails.
    pub fn npub(&self) -> Result<String, IdentityError> {
        self.public_key()?
            .to_bech32()
            .map_err(|e| IdentityError::Bech32(e.to_string()))
    }

    /// Signs a 32-byte digest with BIP-340 Schnorr.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be reconstructed.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<String, IdentityError> {
        self.secret.expose_scoped(|bytes| {
            let secret_key = Secp256k1SecretKey::from_slice(bytes)
                .map_err(|e| IdentityError::Signing(e.to_string()))?;
            let keypair = Keypair::from_secret_key(&SECP, &secret_key);
            let signature = SECP.sign_schnorr(&Message::from_digest(*digest), &keypair);
            Ok(hex::encode(signature.serialize()))
        })
    }

    /// Builds short-lived `nostr::Keys` for signing events and NIP-59 seals.
    ///
    /// `Keys` does not zeroize its secret; drop it as soon as the call is done.
    pub(crate) fn to_keys(&self) -> Result<Keys, IdentityError> {
        self.secret.expose_scoped(|bytes| {
            SecretKey::from_slice(bytes)
                .map(Keys::new)
                .map_err(|e| IdentityError::KeyDerivation(e.to_string()))
        })
    }
}

impl std::fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("pubkey", &self.pubkey_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_64_char_pubkey() {
        let keypair = IdentityKeypair::generate();
        assert_eq!(keypair.pubkey_hex().len(), 64);
    }

    #[test]
    fn nsec_roundtrip() {
        let keypair = IdentityKeypair::generate();
        let nsec = keypair.export_nsec().unwrap();
        assert!(nsec.starts_with("nsec1"));
        let restored = IdentityKeypair::from_nsec(&nsec).unwrap();
        assert_eq!(keypair.pubkey_bytes(), restored.pubkey_bytes());
    }

    #[test]
    fn from_nsec_rejects_garbage() {
        assert!(matches!(
            IdentityKeypair::from_nsec("nsec1notakey"),
            Err(IdentityError::InvalidNsec(_))
        ));
    }

    #[test]
    fn from_secret_rejects_zero() {
        let result = IdentityKeypair::from_secret(SecretBytes::from_array(&mut [0u8; 32]));
        assert!(matches!(result, Err(IdentityError::KeyDerivation(_))));
    }

    #[test]
    fn from_secret_matches_keys() {
        let keys = Keys::generate();
        let mut bytes = keys.secret_key().secret_bytes();
        let keypair = IdentityKeypair::from_secret(SecretBytes::from_array(&mut bytes)).unwrap();
        assert_eq!(keypair.pubkey_hex(), keys.public_key().to_hex());
    }

    #[test]
    fn npub_has_prefix() {
        let keypair = IdentityKeypair::generate();
        assert!(keypair.npub().unwrap().starts_with("npub1"));
    }

    #[test]
    fn sign_verifies_under_pubkey() {
        use nostr::secp256k1::{schnorr::Signature, XOnlyPublicKey};

        let keypair = IdentityKeypair::generate();
        let digest = [0x11u8; 32];
        let sig_hex = keypair.sign(&digest).unwrap();
        let signature = Signature::from_slice(&hex::decode(sig_hex).unwrap()).unwrap();
        let pubkey = XOnlyPublicKey::from_slice(&keypair.pubkey_bytes()).unwrap();
        assert!(SECP
            .verify_schnorr(&signature, &Message::from_digest(digest), &pubkey)
            .is_ok());
    }

    #[test]
    fn to_keys_matches_pubkey() {
        let keypair = IdentityKeypair::generate();
        let keys = keypair.to_keys().unwrap();
        assert_eq!(keys.public_key().to_hex(), keypair.pubkey_hex());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let keypair = IdentityKeypair::generate();
        let nsec = keypair.export_nsec().unwrap();
        let debug = format!("{keypair:?}");
        assert!(debug.contains(&keypair.pubkey_hex()));
        assert!(!debug.contains(&nsec));
    }
}
