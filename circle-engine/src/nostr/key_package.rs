//! Kind 443 KeyPackage events (MIP-00).
//!
//! MDK produces the content (the serialized KeyPackage) and the tags, which
//! repeat the protocol version, ciphersuite and extension ids so relays and
//! clients can filter without decoding the content. This module signs them
//! with the identity key and checks incoming events before MDK sees them.

use nostr::{Event, JsonUtil, Timestamp};

use crate::nostr::error::{NostrError, Result};
use crate::nostr::identity::IdentityKeypair;
use crate::nostr::signing::{sign_identity_event, tag_vectors};
use crate::nostr::tags::{tag_value, tag_values, TagBuilder};

/// Kind for KeyPackage events.
pub const KIND_KEY_PACKAGE: u16 = 443;

/// Tag values advertised alongside a KeyPackage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPackageEventFields {
    /// `mls_protocol_version`, "1.0".
    pub protocol_version: String,
    /// `mls_ciphersuite` id.
    pub ciphersuite: String,
    /// `mls_extensions` ids.
    pub extensions: Vec<String>,
    /// Inbox relays where Welcomes for this KeyPackage should be sent.
    pub relays: Vec<String>,
}

/// A verified kind 443 event, content not yet decoded.
#[derive(Debug, Clone)]
pub struct ParsedKeyPackageEvent {
    /// The verified event, as MDK consumes it.
    pub event: Event,
    /// Event id (hex).
    pub event_id: String,
    /// Author identity pubkey (hex).
    pub author_pubkey: String,
    /// Serialized KeyPackage.
    pub content: String,
    /// Tag values.
    pub fields: KeyPackageEventFields,
    /// Creation time (unix seconds).
    pub created_at: u64,
}

/// Signs a kind 443 event with the identity key.
///
/// `tags` are the ones MDK produced for `content`; an `alt` tag is added
/// when missing.
///
/// # Errors
///
/// Returns an error if a tag is malformed or signing fails.
pub fn build_key_package_event(
    identity: &IdentityKeypair,
    content: String,
    mut tags: Vec<Vec<String>>,
) -> Result<Event> {
    if tag_value(&tags, "alt").is_none() {
        tags.push(TagBuilder::alt_tag("MLS KeyPackage"));
    }
    sign_identity_event(identity, KIND_KEY_PACKAGE, content, tags, Timestamp::now())
}

/// Parses and verifies a kind 443 event.
///
/// # Errors
///
/// Returns [`NostrError::KeyPackage`] if the JSON, kind, signature or tags are
/// invalid.
pub fn parse_key_package_event(json: &str) -> Result<ParsedKeyPackageEvent> {
    let event = Event::from_json(json).map_err(|e| NostrError::KeyPackage(e.to_string()))?;

    if event.kind.as_u16() != KIND_KEY_PACKAGE {
        return Err(NostrError::KeyPackage(format!(
            "expected kind {KIND_KEY_PACKAGE}, got {}",
            event.kind.as_u16()
        )));
    }
    event
        .verify()
        .map_err(|e| NostrError::KeyPackage(format!("signature: {e}")))?;

    let tags = tag_vectors(&event);
    let protocol_version = tag_value(&tags, "mls_protocol_version")
        .ok_or_else(|| NostrError::KeyPackage("missing mls_protocol_version tag".to_string()))?
        .to_string();
    let ciphersuite = tag_value(&tags, "mls_ciphersuite")
        .ok_or_else(|| NostrError::KeyPackage("missing mls_ciphersuite tag".to_string()))?
        .to_string();
    let extensions = tag_values(&tags, "mls_extensions")
        .into_iter()
        .map(str::to_string)
        .collect();
    let relays = tag_values(&tags, "relays")
        .into_iter()
        .map(str::to_string)
        .collect();

    Ok(ParsedKeyPackageEvent {
        event_id: event.id.to_hex(),
        author_pubkey: event.pubkey.to_hex(),
        content: event.content.clone(),
        fields: KeyPackageEventFields {
            protocol_version,
            ciphersuite,
            extensions,
            relays,
        },
        created_at: event.created_at.as_u64(),
        event,
    })
}
