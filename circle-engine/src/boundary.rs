//! Boundary adapter.
//!
//! Closed enums are converted to and from strings here and nowhere else:
//! the SQLite layer and the FFI DTOs below go through [`WireName`], and
//! internal code branches on the enums themselves.

use serde::{Deserialize, Serialize};

use crate::circle::{
    CircleType, CircleWithMembers, DecryptedLocation, Invitation, MembershipStatus,
};
use crate::location::PrecisionTier;
use crate::mls::group_id_to_hex;
use crate::storage::CommitState;

/// A closed enum with a stable string form.
pub trait WireName: Sized + Copy + 'static {
    /// Every variant.
    const VARIANTS: &'static [Self];

    /// The stable name.
    fn wire_name(self) -> &'static str;

    /// Parses a stable name. Unknown names give `None`.
    #[must_use]
    fn from_wire_name(name: &str) -> Option<Self> {
        Self::VARIANTS
            .iter()
            .copied()
            .find(|variant| variant.wire_name() == name)
    }
}

impl WireName for CircleType {
    const VARIANTS: &'static [Self] = &[Self::LocationSharing, Self::DirectShare];

    fn wire_name(self) -> &'static str {
        match self {
            Self::LocationSharing => "location_sharing",
            Self::DirectShare => "direct_share",
        }
    }
}

impl WireName for MembershipStatus {
    const VARIANTS: &'static [Self] = &[Self::Pending, Self::Accepted, Self::Declined];

    fn wire_name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }
}

impl WireName for PrecisionTier {
    const VARIANTS: &'static [Self] = &Self::ALL;

    fn wire_name(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::City => "city",
            Self::Neighborhood => "neighborhood",
            Self::Street => "street",
            Self::Building => "building",
            Self::Exact => "exact",
        }
    }
}

impl WireName for CommitState {
    const VARIANTS: &'static [Self] = &[Self::Staged, Self::Finalized, Self::Discarded];

    fn wire_name(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Finalized => "finalized",
            Self::Discarded => "discarded",
        }
    }
}

/// A circle member as exposed over FFI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    /// Identity (hex).
    pub pubkey: String,
    /// Local display name.
    pub display_name: Option<String>,
    /// Local avatar path.
    pub avatar_path: Option<String>,
    /// Admin flag.
    pub is_admin: bool,
}

/// A circle as exposed over FFI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleDto {
    /// MLS group id (hex). Local handle only.
    pub mls_group_id: String,
    /// Published group id (hex).
    pub nostr_group_id: String,
    /// Display name.
    pub display_name: String,
    /// [`CircleType`] wire name.
    pub circle_type: String,
    /// Circle relays.
    pub relays: Vec<String>,
    /// [`MembershipStatus`] wire name.
    pub membership_status: String,
    /// Members.
    pub members: Vec<MemberDto>,
    /// Unix timestamp.
    pub created_at: i64,
    /// Unix timestamp.
    pub updated_at: i64,
}

impl From<&CircleWithMembers> for CircleDto {
    fn from(value: &CircleWithMembers) -> Self {
        let circle = &value.circle;
        Self {
            mls_group_id: group_id_to_hex(&circle.mls_group_id),
            nostr_group_id: hex::encode(circle.nostr_group_id),
            display_name: circle.display_name.clone(),
            circle_type: circle.circle_type.wire_name().to_string(),
            relays: circle.relays.clone(),
            membership_status: value.membership.status.wire_name().to_string(),
            members: value
                .members
                .iter()
                .map(|member| MemberDto {
                    pubkey: member.pubkey.clone(),
                    display_name: member.display_name.clone(),
                    avatar_path: member.avatar_path.clone(),
                    is_admin: member.is_admin,
                })
                .collect(),
            created_at: circle.created_at,
            updated_at: circle.updated_at,
        }
    }
}

/// A pending invitation as exposed over FFI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationDto {
    /// MLS group id (hex).
    pub mls_group_id: String,
    /// Circle name.
    pub circle_name: String,
    /// Inviter identity (hex).
    pub inviter_pubkey: String,
    /// Member count including us.
    pub member_count: usize,
    /// Unix timestamp.
    pub invited_at: i64,
}

impl From<&Invitation> for InvitationDto {
    fn from(value: &Invitation) -> Self {
        Self {
            mls_group_id: group_id_to_hex(&value.mls_group_id),
            circle_name: value.circle_name.clone(),
            inviter_pubkey: value.inviter_pubkey.clone(),
            member_count: value.member_count,
            invited_at: value.invited_at,
        }
    }
}

/// A received location as exposed over FFI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedLocationDto {
    /// MLS group id (hex).
    pub mls_group_id: String,
    /// Sender identity (hex).
    pub sender_pubkey: String,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Geohash.
    pub geohash: String,
    /// [`PrecisionTier`] wire name.
    pub precision: String,
    /// Unix timestamp.
    pub timestamp: i64,
    /// Unix timestamp.
    pub expires_at: i64,
}

impl From<&DecryptedLocation> for DecryptedLocationDto {
    fn from(value: &DecryptedLocation) -> Self {
        Self {
            mls_group_id: group_id_to_hex(&value.mls_group_id),
            sender_pubkey: value.sender_pubkey.clone(),
            latitude: value.latitude,
            longitude: value.longitude,
            geohash: value.geohash.clone(),
            precision: value.precision.wire_name().to_string(),
            timestamp: value.timestamp,
            expires_at: value.expires_at,
        }
    }
}
