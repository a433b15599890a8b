//! Location data types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::location::error::{LocationError, Result};
use crate::location::privacy::{encode, round_coordinate, validate_coordinates};

/// How much location detail leaves the device.
///
/// | Tier | Geohash length | Decimal places | Approximate cell |
/// |------|----------------|----------------|------------------|
/// | Region | 1 | 0 | ±2500 km |
/// | City | 5 | 2 | ±2.4 km |
/// | Neighborhood | 6 | 3 | ±610 m |
/// | Street | 7 | 4 | ±76 m |
/// | Building | 8 | 4 | ±19 m |
/// | Exact | 12 | 5 | ±2 cm |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionTier {
    /// Continent-scale.
    Region,
    /// City-scale.
    City,
    /// Neighborhood-scale.
    Neighborhood,
    /// Street-scale.
    #[default]
    Street,
    /// Building-scale.
    Building,
    /// Full geohash precision.
    Exact,
}

impl PrecisionTier {
    /// Every tier, coarsest first.
    pub const ALL: [Self; 6] = [
        Self::Region,
        Self::City,
        Self::Neighborhood,
        Self::Street,
        Self::Building,
        Self::Exact,
    ];

    /// Geohash characters produced at this tier.
    #[must_use]
    pub const fn geohash_len(self) -> usize {
        match self {
            Self::Region => 1,
            Self::City => 5,
            Self::Neighborhood => 6,
            Self::Street => 7,
            Self::Building => 8,
            Self::Exact => 12,
        }
    }

    /// Decimal places kept in the carried coordinates.
    #[must_use]
    pub const fn decimal_places(self) -> i32 {
        match self {
            Self::Region => 0,
            Self::City => 2,
            Self::Neighborhood => 3,
            Self::Street | Self::Building => 4,
            Self::Exact => 5,
        }
    }
}

/// The inner location content carried in a kind 9 rumor.
///
/// Device metadata is never serialized.
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use circle_engine::location::{LocationPayload, PrecisionTier};
///
/// let payload = LocationPayload::new(37.774_929_5, -122.419_415_5, PrecisionTier::City, Utc::now()).unwrap();
/// assert_eq!(payload.latitude, 37.77);
/// assert_eq!(payload.geohash.len(), 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationPayload {
    /// Rounded latitude.
    pub latitude: f64,
    /// Rounded longitude.
    pub longitude: f64,
    /// Geohash of the raw point at the tier's length.
    pub geohash: String,
    /// Tier used for rounding and the geohash.
    pub precision: PrecisionTier,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// When the sample stops being meaningful.
    pub expires_at: DateTime<Utc>,

    /// Sensor accuracy in meters.
    #[serde(skip)]
    pub accuracy: Option<f64>,
    /// Altitude in meters.
    #[serde(skip)]
    pub altitude: Option<f64>,
    /// Speed in meters/second.
    #[serde(skip)]
    pub speed: Option<f64>,
    /// Heading in degrees.
    #[serde(skip)]
    pub heading: Option<f64>,
    /// Device identifier.
    #[serde(skip)]
    pub device_id: Option<String>,
}

impl LocationPayload {
    /// Default lifetime of a location sample.
    pub const DEFAULT_TTL_HOURS: i64 = 24;

    /// Builds a payload from raw coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::InvalidCoordinates`] for non-finite or
    /// out-of-range input.
    pub fn new(lat: f64, lon: f64, precision: PrecisionTier, now: DateTime<Utc>) -> Result<Self> {
        Self::with_ttl(lat, lon, precision, now, Duration::hours(Self::DEFAULT_TTL_HOURS))
    }

    /// Builds a payload with an explicit lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::InvalidCoordinates`] for invalid input.
    pub fn with_ttl(
        lat: f64,
        lon: f64,
        precision: PrecisionTier,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        validate_coordinates(lat, lon)?;
        let geohash = encode(lat, lon, precision)?;
        Ok(Self {
            latitude: round_coordinate(lat, precision),
            longitude: round_coordinate(lon, precision),
            geohash,
            precision,
            timestamp: now,
            expires_at: now + ttl,
            accuracy: None,
            altitude: None,
            speed: None,
            heading: None,
            device_id: None,
        })
    }

    /// True once `now` is past `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LocationError::InvalidPayload(e.to_string()))
    }

    /// Parses a payload and re-validates its coordinates and geohash.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the content is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let payload: Self =
            serde_json::from_str(json).map_err(|e| LocationError::InvalidPayload(e.to_string()))?;
        validate_coordinates(payload.latitude, payload.longitude)?;
        if !crate::location::privacy::validate_charset(&payload.geohash) {
            return Err(LocationError::InvalidGeohash);
        }
        Ok(payload)
    }
}

/// User preferences for location sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationSettings {
    /// Tier applied to outgoing samples.
    pub precision: PrecisionTier,
    /// Minutes between samples (5-60).
    pub update_interval_minutes: u32,
    /// Whether outgoing events carry a coarse `g` tag relays can see.
    pub include_geohash_in_events: bool,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            precision: PrecisionTier::default(),
            update_interval_minutes: 5,
            include_geohash_in_events: false,
        }
    }
}

/// Per-call options for `encrypt_location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncryptOptions {
    /// Tier for the encrypted payload.
    pub precision: PrecisionTier,
    /// Attach a public `g` tag.
    pub include_geohash_tag: bool,
}

impl EncryptOptions {
    /// Options with the given tier and no `g` tag.
    #[must_use]
    pub const fn with_precision(precision: PrecisionTier) -> Self {
        Self {
            precision,
            include_geohash_tag: false,
        }
    }

    /// Enables the `g` tag.
    #[must_use]
    pub const fn geohash_tag(mut self, include: bool) -> Self {
        self.include_geohash_tag = include;
        self
    }
}

impl From<&LocationSettings> for EncryptOptions {
    fn from(settings: &LocationSettings) -> Self {
        Self {
            precision: settings.precision,
            include_geohash_tag: settings.include_geohash_in_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered_coarse_to_fine() {
        let lengths: Vec<usize> = PrecisionTier::ALL.iter().map(|t| t.geohash_len()).collect();
        assert!(lengths.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(PrecisionTier::Region.geohash_len(), 1);
        assert_eq!(PrecisionTier::Exact.geohash_len(), 12);
    }

    #[test]
    fn payload_rounds_to_tier() {
        let now = Utc::now();
        let exact = LocationPayload::new(37.774_929_5, -122.419_415_5, PrecisionTier::Exact, now).unwrap();
        assert_eq!(exact.latitude, 37.774_93);
        assert_eq!(exact.longitude, -122.419_42);
        assert_eq!(exact.geohash.len(), 12);

        let region = LocationPayload::new(37.774_929_5, -122.419_415_5, PrecisionTier::Region, now).unwrap();
        assert_eq!(region.latitude, 38.0);
        assert_eq!(region.geohash, "9");
    }

    #[test]
    fn payload_expires_after_24_hours() {
        let now = Utc::now();
        let payload = LocationPayload::new(1.0, 2.0, PrecisionTier::City, now).unwrap();
        assert_eq!(payload.expires_at - payload.timestamp, Duration::hours(24));
        assert!(!payload.is_expired_at(now));
        assert!(payload.is_expired_at(now + Duration::hours(25)));
    }

    #[test]
    fn payload_rejects_invalid_coordinates() {
        let now = Utc::now();
        for (lat, lon) in [(f64::NAN, 0.0), (0.0, f64::INFINITY), (90.1, 0.0), (0.0, -180.5)] {
            assert!(matches!(
                LocationPayload::new(lat, lon, PrecisionTier::City, now),
                Err(LocationError::InvalidCoordinates { .. })
            ));
        }
    }

    #[test]
    fn payload_json_excludes_device_metadata() {
        let mut payload = LocationPayload::new(37.7749, -122.4194, PrecisionTier::Street, Utc::now()).unwrap();
        payload.device_id = Some("secret-device-id".to_string());
        payload.altitude = Some(100.0);
        payload.speed = Some(5.5);
        payload.heading = Some(270.0);
        payload.accuracy = Some(10.0);

        let json = payload.to_json().unwrap();
        for field in ["device_id", "secret-device-id", "altitude", "speed", "heading", "accuracy"] {
            assert!(!json.contains(field), "{field} leaked");
        }
        assert!(json.contains("\"precision\":\"street\""));
    }

    #[test]
    fn payload_from_json_rejects_bad_geohash() {
        let payload = LocationPayload::new(37.7749, -122.4194, PrecisionTier::Street, Utc::now()).unwrap();
        let json = payload.to_json().unwrap().replace(&payload.geohash, "9q8ya");
        assert_eq!(LocationPayload::from_json(&json).unwrap_err(), LocationError::InvalidGeohash);
    }

    #[test]
    fn settings_default_keeps_geohash_private() {
        let settings = LocationSettings::default();
        assert!(!settings.include_geohash_in_events);
        let options = EncryptOptions::from(&settings);
        assert!(!options.include_geohash_tag);
        assert_eq!(options.precision, PrecisionTier::Street);
    }
}
