//! NIP-44 encryption of kind 445 content.
//!
//! Marmot keys group message content with the epoch's MLS exporter secret
//! (label `"nostr"`): the secret is taken as a Nostr secret key and the
//! serialized `MLSMessage` is NIP-44 v2 encrypted from that key to its own
//! public key. MDK produces content this way, so [`decrypt_group_content`]
//! opens anything MDK wrote and vice versa.

use nostr::nips::nip44::{self, Version};
use nostr::{Keys, SecretKey};
use zeroize::Zeroizing;

use crate::nostr::error::{NostrError, Result};
use crate::secret::SecretBytes;

fn exporter_keys(exporter_secret: &SecretBytes) -> Result<Keys> {
    exporter_secret.expose_scoped(|bytes| {
        SecretKey::from_slice(bytes)
            .map(Keys::new)
            .map_err(|e| NostrError::KeyDerivation(e.to_string()))
    })
}

/// Encrypts serialized MLS bytes under an exporter secret.
///
/// # Known Gap
///
/// `nostr::Keys` does not zeroize its internal copy of the secret key.
///
/// # Errors
///
/// Returns an error if the secret is not a valid secp256k1 scalar or
/// encryption fails (for example, empty plaintext).
pub fn encrypt_group_content(plaintext: &[u8], exporter_secret: &SecretBytes) -> Result<String> {
    let keys = exporter_keys(exporter_secret)?;
    nip44::encrypt(keys.secret_key(), &keys.public_key(), plaintext, Version::V2)
        .map_err(|e| NostrError::Encryption(e.to_string()))
}

/// Decrypts kind 445 content under an exporter secret.
///
/// # Errors
///
/// Returns an error if the payload is malformed or the MAC does not verify.
pub fn decrypt_group_content(
    ciphertext: &str,
    exporter_secret: &SecretBytes,
) -> Result<Zeroizing<Vec<u8>>> {
    let keys = exporter_keys(exporter_secret)?;
    nip44::decrypt_to_bytes(keys.secret_key(), &keys.public_key(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| NostrError::Decryption(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretBytes {
        let mut key = [0u8; 32];
        key[0] = 0x42;
        key[31] = 0x42;
        SecretBytes::from_array(&mut key)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        let ciphertext = encrypt_group_content(b"Hello, circle!", &key).unwrap();
        assert_eq!(
            decrypt_group_content(&ciphertext, &key).unwrap().as_slice(),
            b"Hello, circle!"
        );
    }

    #[test]
    fn matches_self_addressed_nip44() {
        let key = test_key();
        let keys = exporter_keys(&key).unwrap();
        let ciphertext =
            nip44::encrypt(keys.secret_key(), &keys.public_key(), b"mls", Version::V2).unwrap();
        assert_eq!(decrypt_group_content(&ciphertext, &key).unwrap().as_slice(), b"mls");
    }

    #[test]
    fn encrypt_produces_different_ciphertext_each_time() {
        let key = test_key();
        let ct1 = encrypt_group_content(b"Test message", &key).unwrap();
        let ct2 = encrypt_group_content(b"Test message", &key).unwrap();
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let ciphertext = encrypt_group_content(b"secret", &test_key()).unwrap();
        let result = decrypt_group_content(&ciphertext, &SecretBytes::random());
        assert!(matches!(result, Err(NostrError::Decryption(_))));
    }

    #[test]
    fn encrypt_empty_payload_fails() {
        assert!(encrypt_group_content(b"", &test_key()).is_err());
    }

    #[test]
    fn decrypt_rejects_invalid_payload() {
        let result = decrypt_group_content("not base64!!!", &test_key());
        assert!(matches!(result, Err(NostrError::Decryption(_))));
    }
}
