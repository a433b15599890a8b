//! Identity-signed events (kinds 443 and 10051).

use nostr::{Event, EventBuilder, Kind, Tag, Timestamp};

use crate::nostr::error::{NostrError, Result};
use crate::nostr::identity::IdentityKeypair;
use crate::secret::policy;

/// Signs an event with the identity key.
///
/// # Panics
///
/// Panics if `kind` is 444. Welcomes are rumors and are never signed.
///
/// # Errors
///
/// Returns an error if a tag is malformed or signing fails.
pub fn sign_identity_event(
    identity: &IdentityKeypair,
    kind: u16,
    content: String,
    tags: Vec<Vec<String>>,
    created_at: Timestamp,
) -> Result<Event> {
    policy::ensure_unsigned_kind(kind);

    let tags = tags
        .into_iter()
        .map(|tag| Tag::parse(tag).map_err(|e| NostrError::InvalidEvent(e.to_string())))
        .collect::<Result<Vec<_>>>()?;

    let keys = identity.to_keys()?;
    EventBuilder::new(Kind::from(kind), content)
        .tags(tags)
        .custom_created_at(created_at)
        .sign_with_keys(&keys)
        .map_err(|e| NostrError::Signing(e.to_string()))
}

/// Tag values of an event as plain string vectors.
pub(crate) fn tag_vectors(event: &Event) -> Vec<Vec<String>> {
    event.tags.iter().map(|tag| tag.as_slice().to_vec()).collect()
}
