//! Location privacy encoder.
//!
//! Rounds coordinates and encodes them as a geohash at a caller-selected
//! [`PrecisionTier`]. Device metadata never leaves this module in serialized
//! form, and every payload carries an expiry.
//!
//! ```
//! use chrono::Utc;
//! use circle_engine::location::{truncate_for_tag, LocationPayload, PrecisionTier};
//!
//! let payload = LocationPayload::new(37.7749, -122.4194, PrecisionTier::Exact, Utc::now()).unwrap();
//! assert_eq!(payload.geohash.len(), 12);
//! assert_eq!(truncate_for_tag(&payload.geohash, PrecisionTier::Exact).unwrap().len(), 5);
//! ```

mod error;
mod privacy;
mod types;

pub use error::{LocationError, Result};
pub use privacy::{
    decode_bounds, encode, round_coordinate, truncate_for_tag, validate_charset,
    validate_coordinates, GeohashBounds, GEOHASH_ALPHABET, MAX_GEOHASH_LEN,
};
pub use types::{EncryptOptions, LocationPayload, LocationSettings, PrecisionTier};
