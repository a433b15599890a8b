//! Coordinate validation, rounding and geohash encoding.

use crate::location::error::{LocationError, Result};
use crate::location::types::PrecisionTier;
use crate::nostr::MAX_GEOHASH_TAG_LEN;

/// Geohash base32 alphabet. Excludes `a`, `i`, `l` and `o`.
pub const GEOHASH_ALPHABET: &str = "0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest geohash the `geohash` crate produces.
pub const MAX_GEOHASH_LEN: usize = 12;

/// Checks that coordinates are finite and in range. Poles, the date line
/// and (0, 0) are valid.
///
/// # Errors
///
/// Returns [`LocationError::InvalidCoordinates`] otherwise.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<()> {
    let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
    let lon_ok = lon.is_finite() && (-180.0..=180.0).contains(&lon);
    if lat_ok && lon_ok {
        Ok(())
    } else {
        Err(LocationError::InvalidCoordinates { lat, lon })
    }
}

/// Rounds a coordinate to the tier's decimal places.
///
/// ```
/// use circle_engine::location::{round_coordinate, PrecisionTier};
///
/// assert_eq!(round_coordinate(37.7749295, PrecisionTier::Street), 37.7749);
/// ```
#[must_use]
pub fn round_coordinate(coord: f64, tier: PrecisionTier) -> f64 {
    let multiplier = 10_f64.powi(tier.decimal_places());
    (coord * multiplier).round() / multiplier
}

/// Encodes a point as a geohash of exactly `tier.geohash_len()` characters.
///
/// # Errors
///
/// Returns [`LocationError::InvalidCoordinates`] for invalid input.
///
/// ```
/// use circle_engine::location::{encode, PrecisionTier};
///
/// assert_eq!(encode(37.7749, -122.4194, PrecisionTier::City).unwrap(), "9q8yy");
/// ```
pub fn encode(lat: f64, lon: f64, tier: PrecisionTier) -> Result<String> {
    validate_coordinates(lat, lon)?;
    geohash::encode(geohash::Coord { x: lon, y: lat }, tier.geohash_len())
        .map_err(|_| LocationError::InvalidCoordinates { lat, lon })
}

/// True if `geohash` is 1 to 12 characters from [`GEOHASH_ALPHABET`].
///
/// Upper-case letters are rejected along with `a`, `i`, `l` and `o`.
#[must_use]
pub fn validate_charset(geohash: &str) -> bool {
    !geohash.is_empty()
        && geohash.len() <= MAX_GEOHASH_LEN
        && geohash.chars().all(|c| GEOHASH_ALPHABET.contains(c))
}

/// Shortens a geohash for a public `g` tag: to the tier's length, and never
/// beyond [`MAX_GEOHASH_TAG_LEN`].
///
/// # Errors
///
/// Returns [`LocationError::InvalidGeohash`] if the input fails
/// [`validate_charset`]. Invalid input is never silently truncated.
pub fn truncate_for_tag(geohash: &str, tier: PrecisionTier) -> Result<String> {
    if !validate_charset(geohash) {
        return Err(LocationError::InvalidGeohash);
    }
    let len = geohash.len().min(tier.geohash_len()).min(MAX_GEOHASH_TAG_LEN);
    Ok(geohash[..len].to_string())
}

/// Bounding box of a geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeohashBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl GeohashBounds {
    /// True if the point lies in the cell, edges included.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Decodes a geohash to its cell bounds.
///
/// # Errors
///
/// Returns [`LocationError::InvalidGeohash`] for invalid input.
pub fn decode_bounds(geohash: &str) -> Result<GeohashBounds> {
    if !validate_charset(geohash) {
        return Err(LocationError::InvalidGeohash);
    }
    let rect = geohash::decode_bbox(geohash).map_err(|_| LocationError::InvalidGeohash)?;
    Ok(GeohashBounds {
        min_lat: rect.min().y,
        min_lon: rect.min().x,
        max_lat: rect.max().y,
        max_lon: rect.max().x,
    })
}
