//! Platform keyring seam.
//!
//! The keyring only ever holds the storage encryption key. Implementations
//! are supplied by the platform layer (Keychain, Keystore, Secret Service).

use zeroize::Zeroizing;

use super::error::Result;

/// Keyring entry holding the storage encryption key.
pub const STORAGE_KEY_ENTRY: &str = "circle.storage.key";

/// Opaque byte-blob storage backed by the OS keyring.
///
/// Implementations must be `Send + Sync` and must never log values.
pub trait Keyring: Send + Sync {
    /// Reads the blob stored under `entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring cannot be read.
    fn get(&self, entry: &str) -> Result<Option<Zeroizing<Vec<u8>>>>;

    /// Stores `value` under `entry`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring cannot be written.
    fn set(&self, entry: &str, value: &[u8]) -> Result<()>;

    /// Removes `entry`. Removing a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring cannot be written.
    fn delete(&self, entry: &str) -> Result<()>;
}

/// In-memory keyring for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Default)]
pub struct MemoryKeyring {
    entries: std::sync::RwLock<std::collections::HashMap<String, Zeroizing<Vec<u8>>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryKeyring {
    /// Creates an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Keyring for MemoryKeyring {
    fn get(&self, entry: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| super::SecretError::Keyring(e.to_string()))?;
        Ok(entries.get(entry).cloned())
    }

    fn set(&self, entry: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| super::SecretError::Keyring(e.to_string()))?;
        entries.insert(entry.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    fn delete(&self, entry: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| super::SecretError::Keyring(e.to_string()))?;
        entries.remove(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_keyring_roundtrip() {
        let keyring = MemoryKeyring::new();
        keyring.set("entry", &[1, 2, 3]).unwrap();
        let value = keyring.get("entry").unwrap().unwrap();
        assert_eq!(value.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn memory_keyring_missing_entry_is_none() {
        let keyring = MemoryKeyring::new();
        assert!(keyring.get("missing").unwrap().is_none());
    }

    #[test]
    fn memory_keyring_delete_is_idempotent() {
        let keyring = MemoryKeyring::new();
        keyring.set("entry", &[1]).unwrap();
        keyring.delete("entry").unwrap();
        keyring.delete("entry").unwrap();
        assert!(keyring.get("entry").unwrap().is_none());
    }
}
