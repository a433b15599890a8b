//! Explicit per-login session context.
//!
//! A [`SessionContext`] is created once at startup (or login) and passed to
//! every engine entry point that needs the identity or the storage key.
//! Dropping it, or calling [`SessionContext::logout`], wipes both.

use zeroize::Zeroize;

use super::buffer::{SecretBytes, SECRET_LEN};
use super::error::{Result, SecretError};
use super::keyring::{Keyring, STORAGE_KEY_ENTRY};
use crate::nostr::identity::IdentityKeypair;

/// Identity and storage key for one logged-in user.
pub struct SessionContext {
    identity: IdentityKeypair,
    storage_key: SecretBytes,
}

impl SessionContext {
    /// Opens a session, loading the storage key from the keyring.
    ///
    /// A new storage key is generated and persisted on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring fails or holds a malformed key.
    pub fn open(identity: IdentityKeypair, keyring: &dyn Keyring) -> Result<Self> {
        let storage_key = match keyring.get(STORAGE_KEY_ENTRY)? {
            Some(stored) => SecretBytes::from_slice(&stored)
                .ok_or(SecretError::InvalidStorageKey(stored.len()))?,
            None => {
                let key = SecretBytes::random();
                key.expose_scoped(|bytes| keyring.set(STORAGE_KEY_ENTRY, bytes))?;
                log::info!("generated new storage encryption key");
                key
            }
        };

        Ok(Self {
            identity,
            storage_key,
        })
    }

    /// Builds a session from already-loaded parts.
    #[must_use]
    pub const fn new(identity: IdentityKeypair, storage_key: SecretBytes) -> Self {
        Self {
            identity,
            storage_key,
        }
    }

    /// The user's Nostr identity.
    #[must_use]
    pub const fn identity(&self) -> &IdentityKeypair {
        &self.identity
    }

    /// The storage encryption key.
    pub(crate) const fn storage_key(&self) -> &SecretBytes {
        &self.storage_key
    }

    /// The SQLCipher key, formatted as a raw-key pragma literal.
    pub(crate) fn storage_key_literal(&self) -> zeroize::Zeroizing<String> {
        let mut encoded = hex::encode(self.storage_key.expose());
        let literal = zeroize::Zeroizing::new(format!("x'{encoded}'"));
        encoded.zeroize();
        debug_assert_eq!(literal.len(), SECRET_LEN * 2 + 3);
        literal
    }

    /// Ends the session. Secrets are wiped as the context drops.
    pub fn logout(self) {
        log::info!("session closed");
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("identity", &self.identity.pubkey_hex())
            .finish_non_exhaustive()
    }
}
