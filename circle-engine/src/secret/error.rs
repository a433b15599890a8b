//! Error types for secret handling.

use thiserror::Error;

/// Errors raised while loading or persisting secret material.
#[derive(Error, Debug)]
pub enum SecretError {
    /// The platform keyring failed.
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// A stored key has the wrong shape.
    #[error("Invalid storage key: expected 32 bytes, got {0}")]
    InvalidStorageKey(usize),
}

/// Result type for secret operations.
pub type Result<T> = std::result::Result<T, SecretError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_keyring() {
        let err = SecretError::Keyring("locked".to_string());
        assert_eq!(err.to_string(), "Keyring error: locked");
    }

    #[test]
    fn error_display_invalid_storage_key() {
        let err = SecretError::InvalidStorageKey(16);
        assert_eq!(
            err.to_string(),
            "Invalid storage key: expected 32 bytes, got 16"
        );
    }
}
