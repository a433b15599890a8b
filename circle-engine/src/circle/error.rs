//! Error types for circle management operations.
//!
//! [`CircleError`] is the one error type the public API returns. Lower
//! layers convert into it at the orchestration boundary.

use thiserror::Error;

use crate::location::LocationError;
use crate::mls::MlsError;
use crate::nostr::NostrError;
use crate::storage::StorageError;

/// Error type for circle operations.
#[derive(Error, Debug)]
pub enum CircleError {
    /// Malformed or untrusted wire input.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Stale, malformed or replayed member credential.
    #[error("Invalid key package: {0}")]
    KeyPackageInvalid(String),

    /// Out-of-order or stale group message.
    #[error("Epoch mismatch: expected {expected}, got {actual}")]
    EpochMismatch {
        /// Epoch the group is at.
        expected: u64,
        /// Epoch the message claims.
        actual: u64,
    },

    /// The circle has no joined group state on this device.
    #[error("Unknown group")]
    UnknownGroup,

    /// Decryption or verification of group content failed.
    #[error("Cryptographic failure")]
    CryptoFailure,

    /// A received event was not valid for us. Deliberately uninformative.
    #[error("Event rejected")]
    EventRejected,

    /// The local member may not perform this change.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Durable storage failed. No partial state was committed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Circle not found.
    #[error("Circle not found: {0}")]
    NotFound(String),

    /// Invalid data provided.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Circle already exists.
    #[error("Circle already exists: {0}")]
    AlreadyExists(String),

    /// Membership state conflict.
    #[error("Membership conflict: {0}")]
    MembershipConflict(String),

    /// A commit is staged and must be finalized or discarded first.
    #[error("Pending commit: {0}")]
    PendingCommit(String),

    /// Other MLS engine failure.
    #[error("MLS error: {0}")]
    Mls(String),
}

/// Result type alias for circle operations.
pub type Result<T> = std::result::Result<T, CircleError>;

impl From<MlsError> for CircleError {
    fn from(err: MlsError) -> Self {
        match err {
            MlsError::KeyPackageInvalid(reason) => Self::KeyPackageInvalid(reason),
            MlsError::InvalidInput(reason) => Self::InvalidData(reason),
            MlsError::GroupNotFound => Self::UnknownGroup,
            other @ (MlsError::Mdk(_) | MlsError::Storage(_)) => Self::Mls(other.to_string()),
        }
    }
}

impl From<NostrError> for CircleError {
    fn from(err: NostrError) -> Self {
        match err {
            NostrError::Rejected => Self::EventRejected,
            NostrError::KeyPackage(reason) => Self::KeyPackageInvalid(reason),
            NostrError::InvalidEvent(reason)
            | NostrError::GiftUnwrap(reason)
            | NostrError::Decryption(reason) => Self::InvalidEvent(reason),
            other => Self::Mls(other.to_string()),
        }
    }
}

impl From<LocationError> for CircleError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::InvalidGeohash => Self::InvalidEvent(err.to_string()),
            LocationError::InvalidCoordinates { .. } | LocationError::InvalidPayload(_) => {
                Self::InvalidData(err.to_string())
            }
        }
    }
}
