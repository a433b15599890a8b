//! Inner application rumors (kind 9).
//!
//! A rumor is an unsigned event carried inside an MLS application message.
//! Authentication comes from the sender's MLS leaf signature, so the rumor
//! has no `sig` field at all. It must also never carry tags that identify
//! the group: if the outer encryption were ever defeated, the inner payload
//! alone should not say which circle it came from.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::nostr::error::{NostrError, Result};
use crate::nostr::event::calculate_event_id;
use crate::nostr::tags::{tag_value, TagBuilder};

/// Kind for application messages inside MLS (MIP-03).
pub const KIND_APPLICATION: u16 = 9;

/// `t` tag value marking a location rumor.
pub const LOCATION_TOPIC: &str = "location";

/// Tags that would tie a rumor to a group or a recipient.
const GROUP_IDENTIFYING_TAGS: &[&str] = &["h", "p"];

/// An unsigned inner event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRumor {
    /// NIP-01 event id (hex).
    pub id: String,
    /// Author's identity pubkey (hex).
    pub pubkey: String,
    /// Unix timestamp.
    pub created_at: i64,
    /// Event kind.
    pub kind: u16,
    /// Event tags.
    pub tags: Vec<Vec<String>>,
    /// Event content.
    pub content: String,
}

impl ApplicationRumor {
    /// Builds a rumor and computes its id.
    ///
    /// # Errors
    ///
    /// Returns an error if a tag would identify the group.
    pub fn new(
        author_pubkey: &str,
        kind: u16,
        tags: Vec<Vec<String>>,
        content: String,
        created_at: i64,
    ) -> Result<Self> {
        check_tags(&tags)?;
        let id = calculate_event_id(author_pubkey, created_at, kind, &tags, &content)?;
        Ok(Self {
            id,
            pubkey: author_pubkey.to_string(),
            created_at,
            kind,
            tags,
            content,
        })
    }

    /// Builds a kind 9 location rumor around a serialized payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the id cannot be computed.
    pub fn location(author_pubkey: &str, payload_json: String, created_at: i64) -> Result<Self> {
        Self::new(
            author_pubkey,
            KIND_APPLICATION,
            vec![TagBuilder::topic_tag(LOCATION_TOPIC)],
            payload_json,
            created_at,
        )
    }

    /// True for kind 9 rumors tagged as location updates.
    #[must_use]
    pub fn is_location(&self) -> bool {
        self.kind == KIND_APPLICATION && tag_value(&self.tags, "t") == Some(LOCATION_TOPIC)
    }

    /// Checks the id and the tag policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the id does not match or a forbidden tag is present.
    pub fn verify(&self) -> Result<()> {
        check_tags(&self.tags)?;
        let expected = calculate_event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if bool::from(expected.as_bytes().ct_eq(self.id.as_bytes())) {
            Ok(())
        } else {
            Err(NostrError::InvalidEvent("Rumor ID mismatch".to_string()))
        }
    }

    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(NostrError::from)
    }

    /// Parses and verifies a rumor from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or [`Self::verify`] fails.
    pub fn from_json(json: &str) -> Result<Self> {
        let rumor: Self = serde_json::from_str(json)?;
        rumor.verify()?;
        Ok(rumor)
    }
}

fn check_tags(tags: &[Vec<String>]) -> Result<()> {
    for tag in tags {
        if let Some(name) = tag.first() {
            if GROUP_IDENTIFYING_TAGS.contains(&name.as_str()) {
                return Err(NostrError::InvalidEvent(format!(
                    "Inner rumor must not carry a '{name}' tag"
                )));
            }
        }
    }
    Ok(())
}
