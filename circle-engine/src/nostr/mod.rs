//! Nostr event codec for Marmot circles.
//!
//! # Architecture
//!
//! ```text
//! location JSON → ApplicationRumor (kind 9, unsigned, ["t","location"])
//!                          ↓
//!                   MLS application message + NIP-44 (MDK)
//!                          ↓
//!                   GroupMessageEvent (kind 445, ephemeral key, h/expiration/g)
//! ```
//!
//! Welcomes (444) are never signed; they travel as NIP-59 gift wraps.
//! KeyPackages (443) and relay lists (10051) are signed by the identity key.
//!
//! # Security
//!
//! - A fresh ephemeral keypair signs every kind 445 event
//! - Only `nostr_group_id` appears on the wire, never the MLS group id
//! - NIP-40 expiration lets relays drop stale events
//! - The receive path rejects with one opaque error regardless of stage

mod error;
mod event;
mod giftwrap;
mod key_package;
mod keys;
mod relay_list;
mod rumor;
mod signing;
mod tags;

pub mod encryption;
pub mod identity;

pub use error::{NostrError, Result};
pub use event::{
    decrypt_with_candidates, verify_group_message, GroupMessageEvent, VerifiedGroupMessage,
    KIND_GROUP_MESSAGE, MAX_GEOHASH_TAG_LEN,
};
pub use giftwrap::{
    unwrap_welcome, wrap_welcome, UnwrappedWelcome, WelcomeRumor, KIND_GIFT_WRAP, KIND_WELCOME,
};
pub use identity::{IdentityError, IdentityKeypair};
pub use key_package::{
    build_key_package_event, parse_key_package_event, KeyPackageEventFields,
    ParsedKeyPackageEvent, KIND_KEY_PACKAGE,
};
pub use keys::EphemeralKeypair;
pub use relay_list::{build_relay_list_event, parse_relay_list_event, KIND_RELAY_LIST};
pub use rumor::{ApplicationRumor, KIND_APPLICATION, LOCATION_TOPIC};
pub use signing::sign_identity_event;
pub use tags::{has_tag, tag_value, tag_values, TagBuilder};
