//! Kind 445 group message events.
//!
//! The outer transport envelope for every MLS message. It is signed by a
//! keypair generated for this event alone, tagged with the published
//! `nostr_group_id`, and expires after 24 hours.
//!
//! # Structure
//!
//! ```json
//! {
//!   "id": "...",           // SHA256 of serialized event
//!   "pubkey": "...",       // Ephemeral public key
//!   "created_at": 123456,
//!   "kind": 445,
//!   "tags": [["h", "..."], ["expiration", "..."], ["alt", "..."]],
//!   "content": "...",      // NIP-44 encrypted MLS message
//!   "sig": "..."
//! }
//! ```
//!
//! # Receive ordering
//!
//! [`verify_group_message`] checks, in this order and before any secret is
//! touched: kind, known `h` tag, expiration, id and signature. Only a
//! verified event may be handed to [`decrypt_with_candidates`]. Every
//! failure yields the same [`NostrError::Rejected`].

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use nostr::JsonUtil;
use zeroize::Zeroizing;

use crate::nostr::encryption::decrypt_group_content;
use crate::nostr::error::{NostrError, Result};
use crate::nostr::keys::{schnorr_verify, EphemeralKeypair};
use crate::nostr::tags::{tag_value, TagBuilder};
use crate::secret::SecretBytes;

/// Event kind for Marmot group messages.
pub const KIND_GROUP_MESSAGE: u16 = 445;

/// Longest geohash ever placed in a public `g` tag (~2.4 km cells).
pub const MAX_GEOHASH_TAG_LEN: usize = 5;

/// Calculates the NIP-01 event id: SHA256 of
/// `[0, pubkey, created_at, kind, tags, content]`.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub(crate) fn calculate_event_id(
    pubkey: &str,
    created_at: i64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String> {
    let serialized = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))?;
    Ok(hex::encode(Sha256::digest(serialized.as_bytes())))
}

/// A signed kind 445 event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMessageEvent {
    /// Event ID (hex SHA256).
    pub id: String,
    /// Single-use public key (hex).
    pub pubkey: String,
    /// Unix timestamp.
    pub created_at: i64,
    /// Always 445.
    pub kind: u16,
    /// `h`, `expiration`, `alt` and optionally `g`.
    pub tags: Vec<Vec<String>>,
    /// NIP-44 encrypted `MLSMessage` (base64).
    pub content: String,
    /// Schnorr signature (hex).
    pub sig: String,
}

impl GroupMessageEvent {
    /// Wraps already encrypted content and signs it with a fresh
    /// ephemeral key, which is dropped on return.
    ///
    /// A `geohash_tag` longer than [`MAX_GEOHASH_TAG_LEN`] is truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn seal(
        nostr_group_id: &[u8; 32],
        content: String,
        geohash_tag: Option<&str>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        let keypair = EphemeralKeypair::generate();
        Self::sign(
            &hex::encode(nostr_group_id),
            content,
            geohash_tag,
            created_at,
            expires_at,
            &keypair,
        )
    }

    fn sign(
        nostr_group_id: &str,
        content: String,
        geohash_tag: Option<&str>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        keypair: &EphemeralKeypair,
    ) -> Result<Self> {
        let pubkey = keypair.pubkey_hex();
        let created_at = created_at.timestamp();

        let mut tags = vec![
            TagBuilder::h_tag(nostr_group_id),
            TagBuilder::expiration_tag(expires_at),
            TagBuilder::alt_tag("Encrypted group message"),
        ];
        if let Some(geohash) = geohash_tag {
            let end = geohash
                .char_indices()
                .nth(MAX_GEOHASH_TAG_LEN)
                .map_or(geohash.len(), |(index, _)| index);
            tags.push(TagBuilder::geohash_tag(&geohash[..end]));
        }

        let id = calculate_event_id(&pubkey, created_at, KIND_GROUP_MESSAGE, &tags, &content)?;
        let mut id_bytes = [0u8; 32];
        hex::decode_to_slice(&id, &mut id_bytes)?;
        let sig = keypair.sign(&id_bytes)?;

        Ok(Self {
            id,
            pubkey,
            created_at,
            kind: KIND_GROUP_MESSAGE,
            tags,
            content,
            sig,
        })
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(NostrError::from)
    }

    /// Parses from JSON without verifying.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(NostrError::from)
    }

    /// Converts to a `nostr` event for MDK.
    ///
    /// # Errors
    ///
    /// Returns an error if the event does not parse as a Nostr event.
    pub fn to_nostr_event(&self) -> Result<nostr::Event> {
        nostr::Event::from_json(self.to_json()?)
            .map_err(|e| NostrError::InvalidEvent(e.to_string()))
    }

    /// The `h` tag value.
    #[must_use]
    pub fn nostr_group_id(&self) -> Option<&str> {
        tag_value(&self.tags, "h")
    }

    /// The NIP-40 expiration, if present and well-formed.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        tag_value(&self.tags, "expiration")
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// True if the event carries an expiration that is before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match tag_value(&self.tags, "expiration") {
            None => false,
            Some(_) => self.expires_at().map_or(true, |expiry| now > expiry),
        }
    }

    /// The `g` tag value.
    #[must_use]
    pub fn geohash(&self) -> Option<&str> {
        tag_value(&self.tags, "g")
    }

    /// Verifies the id with a constant-time comparison, then the signature.
    ///
    /// # Errors
    ///
    /// Returns an error if either check fails.
    pub fn verify_signature(&self) -> Result<()> {
        let calculated_id = calculate_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if !bool::from(calculated_id.as_bytes().ct_eq(self.id.as_bytes())) {
            return Err(NostrError::InvalidEvent("Event ID mismatch".to_string()));
        }

        let mut id_bytes = [0u8; 32];
        hex::decode_to_slice(&self.id, &mut id_bytes)?;
        let pubkey = hex::decode(&self.pubkey)?;
        let sig = hex::decode(&self.sig)?;

        if schnorr_verify(&pubkey, &id_bytes, &sig) {
            Ok(())
        } else {
            Err(NostrError::InvalidEvent("Invalid signature".to_string()))
        }
    }
}

/// A group message that passed every public receive check.
pub struct VerifiedGroupMessage<G> {
    /// Whatever the resolver returned for the `h` tag.
    pub group: G,
    /// The verified event. Its content is still encrypted.
    pub event: GroupMessageEvent,
}

/// Runs the public receive checks on a kind 445 JSON event.
///
/// `resolve` maps the `h` tag to a locally known group; it must not touch
/// secrets.
///
/// # Errors
///
/// Returns [`NostrError::Rejected`] for every failure.
pub fn verify_group_message<G>(
    json: &str,
    now: DateTime<Utc>,
    resolve: impl FnOnce(&[u8; 32]) -> Option<G>,
) -> Result<VerifiedGroupMessage<G>> {
    let reject = |stage: &str| {
        log::debug!("group message rejected at {stage} stage");
        NostrError::Rejected
    };

    let event = GroupMessageEvent::from_json(json).map_err(|_| reject("parse"))?;

    if event.kind != KIND_GROUP_MESSAGE {
        return Err(reject("kind"));
    }

    let mut nostr_group_id = [0u8; 32];
    event
        .nostr_group_id()
        .and_then(|h| hex::decode_to_slice(h, &mut nostr_group_id).ok())
        .ok_or_else(|| reject("group"))?;
    let group = resolve(&nostr_group_id).ok_or_else(|| reject("group"))?;

    if event.is_expired_at(now) {
        return Err(reject("expiration"));
    }

    event.verify_signature().map_err(|_| reject("signature"))?;

    Ok(VerifiedGroupMessage { group, event })
}

/// Tries each `(epoch, exporter_secret)` in order until one decrypts.
pub fn decrypt_with_candidates<'a>(
    ciphertext: &str,
    candidates: impl IntoIterator<Item = (u64, &'a SecretBytes)>,
) -> Option<(u64, Zeroizing<Vec<u8>>)> {
    candidates.into_iter().find_map(|(epoch, secret)| {
        decrypt_group_content(ciphertext, secret)
            .ok()
            .map(|plaintext| (epoch, plaintext))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::encryption::encrypt_group_content;
    use chrono::Duration;

    const GROUP: [u8; 32] = [0xAB; 32];

    fn sealed(secret: &SecretBytes) -> GroupMessageEvent {
        let now = Utc::now();
        let content = encrypt_group_content(b"mls-message", secret).unwrap();
        GroupMessageEvent::seal(&GROUP, content, None, now, now + Duration::hours(24)).unwrap()
    }

    fn verify(json: &str, known: [u8; 32]) -> Result<VerifiedGroupMessage<()>> {
        verify_group_message(json, Utc::now(), |id| (id == &known).then_some(()))
    }

    #[test]
    fn seal_produces_kind_445_with_required_tags() {
        let event = sealed(&SecretBytes::random());
        assert_eq!(event.kind, KIND_GROUP_MESSAGE);
        assert_eq!(event.nostr_group_id(), Some(hex::encode(GROUP).as_str()));
        let expiry = event.expires_at().unwrap();
        let delta = expiry.timestamp() - event.created_at;
        assert_eq!(delta, 86_400);
        assert!(event.geohash().is_none());
    }

    #[test]
    fn seal_keeps_content_unchanged() {
        let now = Utc::now();
        let event = GroupMessageEvent::seal(
            &GROUP,
            "opaque-content".to_string(),
            None,
            now,
            now + Duration::hours(1),
        )
        .unwrap();
        assert_eq!(event.content, "opaque-content");
    }

    #[test]
    fn seal_truncates_geohash_tag() {
        let now = Utc::now();
        let event = GroupMessageEvent::seal(
            &GROUP,
            "x".to_string(),
            Some("9q8yyz8r"),
            now,
            now + Duration::hours(24),
        )
        .unwrap();
        assert_eq!(event.geohash(), Some("9q8yy"));
    }

    #[test]
    fn seal_uses_fresh_pubkey_each_time() {
        let secret = SecretBytes::random();
        let a = sealed(&secret);
        let b = sealed(&secret);
        assert_ne!(a.pubkey, b.pubkey);
    }

    #[test]
    fn sealed_event_verifies() {
        assert!(sealed(&SecretBytes::random()).verify_signature().is_ok());
    }

    #[test]
    fn sealed_event_converts_for_mdk() {
        let event = sealed(&SecretBytes::random());
        let converted = event.to_nostr_event().unwrap();
        assert_eq!(converted.id.to_hex(), event.id);
        assert_eq!(converted.kind.as_u16(), KIND_GROUP_MESSAGE);
        assert!(converted.verify().is_ok());
    }

    #[test]
    fn verify_rejects_tampered_content() {
        let mut event = sealed(&SecretBytes::random());
        event.content.push('A');
        assert!(event.verify_signature().is_err());
    }

    #[test]
    fn verify_rejects_forged_id() {
        let secret = SecretBytes::random();
        let mut event = sealed(&secret);
        let other = sealed(&secret);
        event.id = other.id;
        assert!(event.verify_signature().is_err());
    }

    #[test]
    fn verify_rejects_malformed_pubkey() {
        let mut event = sealed(&SecretBytes::random());
        event.pubkey = "zz".to_string();
        assert!(event.verify_signature().is_err());
    }

    #[test]
    fn verified_event_decrypts_under_its_epoch() {
        let secret = SecretBytes::random();
        let json = sealed(&secret).to_json().unwrap();
        let verified = verify(&json, GROUP).unwrap();
        let (epoch, payload) =
            decrypt_with_candidates(&verified.event.content, [(7, &secret)]).unwrap();
        assert_eq!(epoch, 7);
        assert_eq!(payload.as_slice(), b"mls-message");
    }

    #[test]
    fn verify_rejects_wrong_kind() {
        let mut event = sealed(&SecretBytes::random());
        event.kind = 1;
        let result = verify(&event.to_json().unwrap(), GROUP);
        assert!(matches!(result, Err(NostrError::Rejected)));
    }

    #[test]
    fn verify_rejects_unknown_group() {
        let json = sealed(&SecretBytes::random()).to_json().unwrap();
        let result = verify_group_message(&json, Utc::now(), |_| None::<()>);
        assert!(matches!(result, Err(NostrError::Rejected)));
    }

    #[test]
    fn verify_rejects_expired() {
        let json = sealed(&SecretBytes::random()).to_json().unwrap();
        let later = Utc::now() + Duration::hours(25);
        let result = verify_group_message(&json, later, |_| Some(()));
        assert!(matches!(result, Err(NostrError::Rejected)));
    }

    #[test]
    fn verify_rejects_tampered_id_like_wrong_group() {
        let event = sealed(&SecretBytes::random());

        let mut tampered = event.clone();
        let flipped = if tampered.id.starts_with('0') { "1" } else { "0" };
        tampered.id.replace_range(0..1, flipped);
        let tampered_err = verify(&tampered.to_json().unwrap(), GROUP)
            .err()
            .unwrap();

        let wrong_group_err = verify(&event.to_json().unwrap(), [0u8; 32]).err().unwrap();

        assert_eq!(tampered_err.to_string(), wrong_group_err.to_string());
        assert!(matches!(tampered_err, NostrError::Rejected));
    }

    #[test]
    fn wrong_exporter_secret_does_not_decrypt() {
        let event = sealed(&SecretBytes::random());
        let random = SecretBytes::random();
        assert!(decrypt_with_candidates(&event.content, [(0, &random)]).is_none());
    }

    #[test]
    fn verify_rejects_garbage_json() {
        let result = verify("{not json", GROUP);
        assert!(matches!(result, Err(NostrError::Rejected)));
    }

    #[test]
    fn decrypt_with_candidates_tries_older_epochs() {
        let old = SecretBytes::random();
        let current = SecretBytes::random();
        let ciphertext = encrypt_group_content(b"late message", &old).unwrap();
        let (epoch, plaintext) =
            decrypt_with_candidates(&ciphertext, [(5, &current), (4, &old)]).unwrap();
        assert_eq!(epoch, 4);
        assert_eq!(plaintext.as_slice(), b"late message");
    }

    #[test]
    fn missing_expiration_is_not_expired() {
        let mut event = sealed(&SecretBytes::random());
        event.tags.retain(|tag| tag[0] != "expiration");
        assert!(!event.is_expired_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn malformed_expiration_counts_as_expired() {
        let mut event = sealed(&SecretBytes::random());
        for tag in &mut event.tags {
            if tag[0] == "expiration" {
                tag[1] = "soon".to_string();
            }
        }
        assert!(event.is_expired_at(Utc::now()));
    }
}
