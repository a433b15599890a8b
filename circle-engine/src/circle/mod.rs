//! Circle management for location sharing.
//!
//! A circle is an MLS group whose messages travel over Nostr relays. This
//! module ties the group engine, the event codec and the encrypted store
//! into one lifecycle API.
//!
//! # Architecture
//!
//! ```text
//! CircleManager (high-level API)
//!     ├── MlsEngine (MDK group state, its own SQLCipher database)
//!     ├── nostr codec (kind 443/444/445/1059/10051 events)
//!     └── CircleStorage (SQLCipher database)
//! ```
//!
//! # Privacy Model
//!
//! - **No public profiles**: User profiles (kind 0) are never published to relays
//! - **Local contacts**: Display names and avatars are stored only on the device
//! - **Pubkey-only identity**: Relays only see ephemeral pubkeys and the group tag
//!
//! # Types
//!
//! - [`Circle`]: A group of people sharing locations
//! - [`Contact`]: Locally-stored profile for a pubkey
//! - [`CircleMember`]: A member with resolved contact info
//! - [`Invitation`]: A pending invitation to join a circle
//! - [`EvolutionUpdate`]: A staged commit ready to publish

mod error;
mod manager;
pub mod types;

pub use error::{CircleError, Result};
pub use manager::CircleManager;
pub use types::{
    Circle, CircleConfig, CircleCreationResult, CircleMember, CircleMembership, CircleType,
    CircleWithMembers, Contact, DecryptedLocation, EncryptedLocation, EvolutionUpdate,
    GiftWrappedWelcome, GroupDataUpdate, GroupEventOutcome, Invitation, KeyPackageData,
    LeaveResult, MemberKeyPackage, MembershipStatus,
};
