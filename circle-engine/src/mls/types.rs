//! Shared MLS types.
//!
//! Group state types come from MDK. This module adds the engine-wide
//! policy and the group configuration used when creating circles.

use chrono::Duration;

use crate::location::PrecisionTier;
use crate::secret::DEFAULT_EXPORTER_RETENTION_EPOCHS;

pub use mdk_core::prelude::{
    GroupId, GroupResult, MessageProcessingResult, NostrGroupConfigData, NostrGroupDataUpdate,
    UpdateGroupResult,
};

pub use mdk_core::prelude::group_types::Group as MlsGroup;
pub use mdk_core::prelude::group_types::GroupExporterSecret;
pub use mdk_core::prelude::welcome_types::Welcome as MlsWelcome;

/// Hex encoding of an MLS group id, for logs-free storage keys and the
/// host API.
#[must_use]
pub fn group_id_to_hex(id: &GroupId) -> String {
    hex::encode(id.as_slice())
}

/// Parses a hex MLS group id.
///
/// # Errors
///
/// Returns an error if the input is not hex or is empty.
pub fn group_id_from_hex(value: &str) -> Result<GroupId, hex::FromHexError> {
    let bytes = hex::decode(value)?;
    if bytes.is_empty() {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    Ok(GroupId::from_slice(&bytes))
}

/// Configuration for a new group.
#[derive(Debug, Clone, Default)]
pub struct GroupConfig {
    /// Name of the circle.
    pub name: String,
    /// Optional description.
    pub description: String,
    /// Relay URLs for group messages.
    pub relays: Vec<String>,
    /// Admins (hex pubkeys). The creator is always added.
    pub admins: Vec<String>,
}

impl GroupConfig {
    /// Creates a configuration with a name.
    ///
    /// ```
    /// use circle_engine::mls::GroupConfig;
    ///
    /// let config = GroupConfig::new("Smith Family")
    ///     .with_description("Family circle")
    ///     .with_relay("wss://relay.example.com");
    /// assert_eq!(config.relays.len(), 1);
    /// ```
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a relay URL.
    #[must_use]
    pub fn with_relay(mut self, relay: impl Into<String>) -> Self {
        self.relays.push(relay.into());
        self
    }

    /// Adds several relay URLs.
    #[must_use]
    pub fn with_relays(mut self, relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.relays.extend(relays.into_iter().map(Into::into));
        self
    }

    /// Adds an admin pubkey.
    #[must_use]
    pub fn with_admin(mut self, admin_pubkey: impl Into<String>) -> Self {
        self.admins.push(admin_pubkey.into());
        self
    }
}

/// Engine-wide policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Past epochs whose exporter secrets are kept for late messages.
    pub exporter_retention_epochs: u64,
    /// Oldest kind 443 event we accept when adding a member.
    pub key_package_lifetime: Duration,
    /// NIP-40 lifetime of kind 445 events.
    pub message_expiration: Duration,
    /// Finest tier whose geohash may appear in a public `g` tag.
    pub max_geohash_tag_tier: PrecisionTier,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exporter_retention_epochs: DEFAULT_EXPORTER_RETENTION_EPOCHS,
            key_package_lifetime: Duration::days(90),
            message_expiration: Duration::hours(24),
            max_geohash_tag_tier: PrecisionTier::City,
        }
    }
}

impl EngineConfig {
    /// Sets the retention window.
    #[must_use]
    pub const fn with_exporter_retention(mut self, epochs: u64) -> Self {
        self.exporter_retention_epochs = epochs;
        self
    }

    /// Sets the KeyPackage lifetime.
    #[must_use]
    pub const fn with_key_package_lifetime(mut self, lifetime: Duration) -> Self {
        self.key_package_lifetime = lifetime;
        self
    }

    /// Sets the message expiration.
    #[must_use]
    pub const fn with_message_expiration(mut self, expiration: Duration) -> Self {
        self.message_expiration = expiration;
        self
    }
}

/// A group member as seen in the current epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    /// Identity pubkey (hex).
    pub pubkey: String,
    /// Listed in the group's admins.
    pub is_admin: bool,
}
