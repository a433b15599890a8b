//! MLS engine errors.

use thiserror::Error;

/// Errors produced by the MLS engine.
#[derive(Debug, Error)]
pub enum MlsError {
    /// MDK rejected the operation or its input.
    #[error("MDK error: {0}")]
    Mdk(String),

    /// KeyPackage event is malformed for MDK.
    #[error("Invalid key package: {0}")]
    KeyPackageInvalid(String),

    /// Input could not be parsed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No group state for this id.
    #[error("Group not found")]
    GroupNotFound,

    /// MDK storage could not be opened.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result alias for MLS operations.
pub type Result<T> = std::result::Result<T, MlsError>;

/// Extension trait for mapping MDK errors to [`MlsError`].
pub(crate) trait MdkResultExt<T> {
    fn map_mdk_err(self) -> Result<T>;
}

impl<T, E: std::fmt::Display> MdkResultExt<T> for std::result::Result<T, E> {
    fn map_mdk_err(self) -> Result<T> {
        self.map_err(|e| MlsError::Mdk(e.to_string()))
    }
}
