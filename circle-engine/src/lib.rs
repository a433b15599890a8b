//! Secure Circle Engine
//!
//! End-to-end encrypted group location sharing: MLS group key agreement
//! carried over Nostr events, with all local state in an encrypted store.
//!
//! # Modules
//!
//! - [`circle`]: The high-level lifecycle API ([`circle::CircleManager`])
//! - [`mls`]: MDK-backed group state, KeyPackages, Welcomes and commits
//! - [`nostr`]: Identity keys and the event codec
//! - [`location`]: Precision tiers and geohash obfuscation
//! - [`secret`]: Zeroizing key material and the storage key
//! - [`storage`]: The SQLCipher database
//! - [`boundary`]: String forms of closed enums for foreign callers

pub mod boundary;
pub mod circle;
pub mod location;
pub mod mls;
pub mod nostr;
pub mod secret;
pub mod storage;
