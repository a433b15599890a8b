//! Error types for Nostr event encoding and decoding.

use thiserror::Error;

use super::identity::IdentityError;

/// Errors that can occur while building or parsing Nostr events.
///
/// Failures on the *receive* path of group messages are never reported
/// through the detailed variants: they collapse into [`NostrError::Rejected`]
/// so that callers cannot tell a wrong MAC from a wrong group.
#[derive(Error, Debug)]
pub enum NostrError {
    /// Encryption operation failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Event signing failed.
    #[error("Event signing failed: {0}")]
    Signing(String),

    /// Serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid event structure or content.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Hex encoding/decoding error.
    #[error("Hex encoding error: {0}")]
    HexError(String),

    /// Gift wrapping failed.
    #[error("Gift wrap failed: {0}")]
    GiftWrap(String),

    /// Gift unwrapping failed.
    #[error("Gift unwrap failed: {0}")]
    GiftUnwrap(String),

    /// A kind 443 KeyPackage event is malformed or inconsistent.
    #[error("Invalid key package event: {0}")]
    KeyPackage(String),

    /// Identity key operation failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Received group message is not a valid event for this device.
    #[error("Event rejected")]
    Rejected,
}

/// Result type for Nostr operations.
pub type Result<T> = std::result::Result<T, NostrError>;

impl From<hex::FromHexError> for NostrError {
    fn from(e: hex::FromHexError) -> Self {
        Self::HexError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_encryption() {
        let err = NostrError::Encryption("cipher failed".to_string());
        assert_eq!(err.to_string(), "Encryption failed: cipher failed");
    }

    #[test]
    fn error_display_decryption() {
        let err = NostrError::Decryption("invalid mac".to_string());
        assert_eq!(err.to_string(), "Decryption failed: invalid mac");
    }

    #[test]
    fn error_display_rejected_has_no_detail() {
        assert_eq!(NostrError::Rejected.to_string(), "Event rejected");
    }

    #[test]
    fn error_display_key_package() {
        let err = NostrError::KeyPackage("missing ciphersuite tag".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid key package event: missing ciphersuite tag"
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err: NostrError = json_err.into();
        assert!(matches!(err, NostrError::Serialization(_)));
    }

    #[test]
    fn error_from_hex() {
        let hex_err = hex::decode("zz").unwrap_err();
        let err: NostrError = hex_err.into();
        assert!(matches!(err, NostrError::HexError(_)));
    }

    #[test]
    fn error_from_identity_is_transparent() {
        let err: NostrError = IdentityError::Signing("bad".to_string()).into();
        assert_eq!(err.to_string(), "Signing failed: bad");
    }
}
