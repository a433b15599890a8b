//! Core types for circle management.
//!
//! This module defines the data structures for circles (groups of people
//! who share locations), contacts (locally-stored member profiles), and
//! the ready-to-publish results of lifecycle operations.
//!
//! # Privacy Model
//!
//! User profiles are stored locally on each device, never published to
//! Nostr relays. This prevents relay-level correlation of usernames with
//! invitation patterns.

use crate::location::PrecisionTier;
use crate::mls::GroupId;
use crate::nostr::ApplicationRumor;

/// Type of circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CircleType {
    /// Multi-member location sharing circle (e.g., family).
    #[default]
    LocationSharing,
    /// Direct 1:1 location sharing.
    DirectShare,
}

/// Membership status in a circle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MembershipStatus {
    /// Invitation received, not yet responded.
    Pending,
    /// User accepted and joined the circle.
    Accepted,
    /// User declined the invitation.
    Declined,
}

impl MembershipStatus {
    /// Returns whether the circle should be visible in the UI.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

/// A circle (group of people who share locations).
///
/// This is the application-level representation of a group, containing
/// metadata stored locally on the device.
#[derive(Clone, PartialEq, Eq)]
pub struct Circle {
    /// MLS group ID. Never published.
    pub mls_group_id: GroupId,
    /// Nostr group ID (32 bytes, used in h-tags for routing).
    pub nostr_group_id: [u8; 32],
    /// User-facing display name (local only).
    pub display_name: String,
    /// Type of circle.
    pub circle_type: CircleType,
    /// Relay URLs for publishing and receiving group messages.
    pub relays: Vec<String>,
    /// When the circle was created (Unix timestamp).
    pub created_at: i64,
    /// When the circle was last updated (Unix timestamp).
    pub updated_at: i64,
}

impl std::fmt::Debug for Circle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circle")
            .field("mls_group_id", &"<redacted>")
            .field("nostr_group_id", &hex::encode(self.nostr_group_id))
            .field("display_name", &self.display_name)
            .field("circle_type", &self.circle_type)
            .field("relays", &self.relays)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Membership state in a circle.
///
/// Tracks the user's relationship with a circle, including invitation
/// state and who invited them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleMembership {
    /// MLS group ID this membership belongs to.
    pub mls_group_id: GroupId,
    /// Current membership status.
    pub status: MembershipStatus,
    /// Public key (hex) of who invited us, if known.
    pub inviter_pubkey: Option<String>,
    /// When we were invited (Unix timestamp).
    pub invited_at: i64,
    /// When we responded to the invitation (Unix timestamp).
    pub responded_at: Option<i64>,
}

/// Local contact information.
///
/// **Privacy Note**: This is stored only on the user's device, never
/// synced to Nostr relays. Each user assigns their own display names
/// and avatars to contacts, similar to phone contacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Nostr public key (hex), the only identifier visible on relays.
    pub pubkey: String,
    /// Locally assigned display name.
    pub display_name: Option<String>,
    /// Local file path to avatar image.
    pub avatar_path: Option<String>,
    /// Optional notes about this contact.
    pub notes: Option<String>,
    /// When this contact was created (Unix timestamp).
    pub created_at: i64,
    /// When this contact was last updated (Unix timestamp).
    pub updated_at: i64,
}

/// A circle member with resolved local contact info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleMember {
    /// Nostr public key (hex), always available.
    pub pubkey: String,
    /// Display name from local Contact, if set.
    pub display_name: Option<String>,
    /// Avatar path from local Contact, if set.
    pub avatar_path: Option<String>,
    /// Whether this member is a group admin.
    pub is_admin: bool,
}

/// Circle with its membership and member list.
#[derive(Debug, Clone)]
pub struct CircleWithMembers {
    /// The circle.
    pub circle: Circle,
    /// User's membership in this circle.
    pub membership: CircleMembership,
    /// Members with resolved contact info. Empty while an invitation is
    /// pending.
    pub members: Vec<CircleMember>,
}

/// Pending invitation to join a circle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    /// MLS group ID.
    pub mls_group_id: GroupId,
    /// Circle name.
    pub circle_name: String,
    /// Public key (hex) of who invited us.
    pub inviter_pubkey: String,
    /// Number of members in the circle, including us.
    pub member_count: usize,
    /// When we were invited (Unix timestamp).
    pub invited_at: i64,
}

/// Configuration for creating a new circle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircleConfig {
    /// Circle name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Type of circle.
    pub circle_type: CircleType,
    /// Relay URLs for the circle.
    pub relays: Vec<String>,
    /// Admins besides the creator (hex pubkeys).
    pub admins: Vec<String>,
}

impl CircleConfig {
    /// Creates a new circle configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            circle_type: CircleType::default(),
            relays: Vec::new(),
            admins: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the circle type.
    #[must_use]
    pub const fn with_type(mut self, circle_type: CircleType) -> Self {
        self.circle_type = circle_type;
        self
    }

    /// Adds a relay URL.
    #[must_use]
    pub fn with_relay(mut self, relay: impl Into<String>) -> Self {
        self.relays.push(relay.into());
        self
    }

    /// Adds multiple relay URLs.
    #[must_use]
    pub fn with_relays(mut self, relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.relays.extend(relays.into_iter().map(Into::into));
        self
    }

    /// Grants admin rights to another member.
    #[must_use]
    pub fn with_admin(mut self, admin_pubkey: impl Into<String>) -> Self {
        self.admins.push(admin_pubkey.into());
        self
    }
}

/// Changes to a circle's group data. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDataUpdate {
    /// New circle name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New relay set.
    pub relays: Option<Vec<String>>,
    /// New admin set. Must not be empty.
    pub admins: Option<Vec<String>>,
}

impl GroupDataUpdate {
    /// Renames the circle.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replaces the relay set.
    #[must_use]
    pub fn with_relays(mut self, relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.relays = Some(relays.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the admin set.
    #[must_use]
    pub fn with_admins(mut self, admins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.admins = Some(admins.into_iter().map(Into::into).collect());
        self
    }
}

/// A member's key package with their inbox relay list.
///
/// Used when adding members to a circle. The inbox relays come from the
/// member's kind 10051 relay list and receive the gift-wrapped Welcome.
/// When empty, the `relays` tag of the key package is used instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKeyPackage {
    /// The key package event (kind 443) as JSON.
    pub key_package_event_json: String,
    /// Relay URLs where the Welcome should be sent (from kind 10051).
    pub inbox_relays: Vec<String>,
}

impl MemberKeyPackage {
    /// Wraps a key package event with the member's inbox relays.
    #[must_use]
    pub fn new(key_package_event_json: impl Into<String>, inbox_relays: Vec<String>) -> Self {
        Self {
            key_package_event_json: key_package_event_json.into(),
            inbox_relays,
        }
    }
}

/// A gift-wrapped Welcome ready for publishing.
///
/// Contains the kind 1059 gift-wrapped event along with recipient
/// information needed for relay publishing.
#[derive(Debug, Clone)]
pub struct GiftWrappedWelcome {
    /// The recipient's Nostr public key (hex).
    pub recipient_pubkey: String,
    /// Relay URLs to publish this Welcome to (recipient's inbox relays).
    pub recipient_relays: Vec<String>,
    /// The gift-wrapped event (kind 1059), ready to publish.
    pub event: nostr::Event,
}

/// A freshly generated key package, ready to publish.
#[derive(Debug, Clone)]
pub struct KeyPackageData {
    /// Owner identity (hex).
    pub pubkey: String,
    /// Signed kind 443 event JSON.
    pub event_json: String,
    /// Relays the package is published to.
    pub relays: Vec<String>,
    /// Reference Welcomes use to address this package.
    pub key_package_ref: String,
}

/// Result of circle creation.
#[derive(Debug)]
pub struct CircleCreationResult {
    /// The created circle, already active for the creator.
    pub circle: CircleWithMembers,
    /// Welcome events to publish to each member's inbox relays.
    pub welcome_events: Vec<GiftWrappedWelcome>,
}

/// A staged group change ready to publish.
///
/// The change only takes effect locally once
/// [`finalize_pending_commit`](crate::circle::CircleManager::finalize_pending_commit)
/// is called after a successful publish.
#[derive(Debug, Clone)]
pub struct EvolutionUpdate {
    /// Kind 445 event carrying the commit.
    pub evolution_event_json: String,
    /// Circle relays to publish the commit to.
    pub relays: Vec<String>,
    /// Welcomes for added members, to publish after the commit.
    pub welcome_events: Vec<GiftWrappedWelcome>,
}

/// What to publish after leaving a circle.
#[derive(Debug, Clone)]
pub struct LeaveResult {
    /// Kind 445 event carrying our self-remove proposal.
    pub evolution_event_json: String,
    /// The circle's relays as they were before local state was deleted.
    pub relays: Vec<String>,
}

/// A location update ready to publish.
#[derive(Debug, Clone)]
pub struct EncryptedLocation {
    /// Signed kind 445 event JSON.
    pub event_json: String,
    /// Circle relays to publish to.
    pub relays: Vec<String>,
}

/// A location update received from a circle member.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedLocation {
    /// Circle the update belongs to.
    pub mls_group_id: GroupId,
    /// Sender identity (hex).
    pub sender_pubkey: String,
    /// Rounded latitude.
    pub latitude: f64,
    /// Rounded longitude.
    pub longitude: f64,
    /// Geohash at the sender's precision.
    pub geohash: String,
    /// Sender's precision tier.
    pub precision: PrecisionTier,
    /// When the location was recorded (Unix timestamp).
    pub timestamp: i64,
    /// When the update expires (Unix timestamp).
    pub expires_at: i64,
    /// Epoch the update was sent in.
    pub epoch: u64,
}

/// Outcome of processing a kind 445 event.
#[derive(Debug, Clone)]
pub enum GroupEventOutcome {
    /// An application message. Group state is unchanged.
    Application {
        /// Circle the message belongs to.
        mls_group_id: GroupId,
        /// Sender identity (hex).
        sender_pubkey: String,
        /// Epoch the message was sent in.
        epoch: u64,
        /// The inner unsigned event.
        rumor: ApplicationRumor,
    },
    /// Another member's commit was applied.
    CommitApplied {
        /// Circle that advanced.
        mls_group_id: GroupId,
        /// The new epoch.
        epoch: u64,
    },
    /// A commit removed us. Local state for the circle has been deleted.
    Evicted {
        /// Circle we were removed from.
        mls_group_id: GroupId,
    },
    /// A member asked to leave and we are not an admin. The proposal waits
    /// for an admin's commit.
    ProposalQueued {
        /// Circle the proposal belongs to.
        mls_group_id: GroupId,
    },
    /// A member asked to leave and, as an admin, we committed the removal.
    /// Publish the commit, then finalize it like any other staged change.
    ProposalCommitStaged {
        /// Circle the proposal belongs to.
        mls_group_id: GroupId,
        /// The staged removal.
        evolution: EvolutionUpdate,
    },
    /// Our own commit came back from a relay.
    OwnCommitEcho {
        /// Circle the commit belongs to.
        mls_group_id: GroupId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_circle() -> Circle {
        Circle {
            mls_group_id: GroupId::from_slice(&[0xAB; 32]),
            nostr_group_id: [0x42; 32],
            display_name: "Test Circle".to_string(),
            circle_type: CircleType::LocationSharing,
            relays: vec!["wss://relay.example.com".to_string()],
            created_at: 1000,
            updated_at: 2000,
        }
    }

    #[test]
    fn circle_type_default() {
        assert_eq!(CircleType::default(), CircleType::LocationSharing);
    }

    #[test]
    fn membership_status_is_visible() {
        assert!(MembershipStatus::Pending.is_visible());
        assert!(MembershipStatus::Accepted.is_visible());
        assert!(!MembershipStatus::Declined.is_visible());
    }

    #[test]
    fn circle_config_builder() {
        let config = CircleConfig::new("Test Circle")
            .with_description("A test circle")
            .with_type(CircleType::DirectShare)
            .with_relay("wss://relay1.example.com")
            .with_relays(["wss://relay2.example.com", "wss://relay3.example.com"])
            .with_admin("ab".repeat(32));

        assert_eq!(config.name, "Test Circle");
        assert_eq!(config.description, Some("A test circle".to_string()));
        assert_eq!(config.circle_type, CircleType::DirectShare);
        assert_eq!(config.relays.len(), 3);
        assert_eq!(config.admins.len(), 1);
    }

    #[test]
    fn circle_config_new_defaults() {
        let config = CircleConfig::new("My Circle");
        assert_eq!(config.name, "My Circle");
        assert!(config.description.is_none());
        assert_eq!(config.circle_type, CircleType::LocationSharing);
        assert!(config.relays.is_empty());
        assert!(config.admins.is_empty());
    }

    #[test]
    fn group_data_update_builder() {
        let update = GroupDataUpdate::default()
            .with_name("Renamed")
            .with_relays(["wss://a.example"]);

        assert_eq!(update.name.as_deref(), Some("Renamed"));
        assert_eq!(update.relays, Some(vec!["wss://a.example".to_string()]));
        assert!(update.description.is_none());
        assert!(update.admins.is_none());
    }

    #[test]
    fn circle_debug_redacts_mls_group_id() {
        let debug_str = format!("{:?}", test_circle());
        assert!(debug_str.contains("<redacted>"));
        assert!(debug_str.contains("Test Circle"));
        assert!(debug_str.contains("42424242"));
        assert!(!debug_str.contains("abababab"));
    }

    #[test]
    fn membership_debug_does_not_show_group_id() {
        let membership = CircleMembership {
            mls_group_id: GroupId::from_slice(&[0xDE; 32]),
            status: MembershipStatus::Pending,
            inviter_pubkey: Some("inviter123".to_string()),
            invited_at: 5000,
            responded_at: None,
        };

        let debug_str = format!("{membership:?}");
        assert!(!debug_str.contains("dede"));
        assert!(debug_str.contains("Pending"));
        assert!(debug_str.contains("inviter123"));
    }

    #[test]
    fn invitation_debug_does_not_show_group_id() {
        let invitation = Invitation {
            mls_group_id: GroupId::from_slice(&[0x11; 32]),
            circle_name: "Family Circle".to_string(),
            inviter_pubkey: "pubkey456".to_string(),
            member_count: 5,
            invited_at: 9000,
        };

        let debug_str = format!("{invitation:?}");
        assert!(!debug_str.contains("1111"));
        assert!(debug_str.contains("Family Circle"));
        assert!(debug_str.contains("member_count: 5"));
    }
}
