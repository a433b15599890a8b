//! Location encoder errors.

use thiserror::Error;

/// Errors from coordinate and geohash validation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocationError {
    /// Latitude or longitude is not finite or out of range.
    #[error("Invalid coordinates: lat {lat}, lon {lon}")]
    InvalidCoordinates {
        /// Offending latitude.
        lat: f64,
        /// Offending longitude.
        lon: f64,
    },

    /// Geohash is empty, too long, or uses characters outside the alphabet.
    #[error("Invalid geohash")]
    InvalidGeohash,

    /// Payload could not be (de)serialized.
    #[error("Invalid location payload: {0}")]
    InvalidPayload(String),
}

/// Result alias for location operations.
pub type Result<T> = std::result::Result<T, LocationError>;
