//! Kind 10051 KeyPackage relay lists.

use nostr::{Event, JsonUtil, Timestamp};

use crate::nostr::error::{NostrError, Result};
use crate::nostr::identity::IdentityKeypair;
use crate::nostr::signing::{sign_identity_event, tag_vectors};
use crate::nostr::tags::TagBuilder;

/// Kind for inbox relay lists.
pub const KIND_RELAY_LIST: u16 = 10051;

/// Signs a relay list advertising where KeyPackages and Welcomes are read.
///
/// # Errors
///
/// Returns an error if signing fails.
pub fn build_relay_list_event(identity: &IdentityKeypair, relays: &[String]) -> Result<Event> {
    let tags = relays.iter().map(|url| TagBuilder::relay_tag(url)).collect();
    sign_identity_event(identity, KIND_RELAY_LIST, String::new(), tags, Timestamp::now())
}

/// Parses a relay list, returning `(author_pubkey_hex, relays)`.
///
/// # Errors
///
/// Returns [`NostrError::InvalidEvent`] if the JSON, kind or signature is
/// invalid.
pub fn parse_relay_list_event(json: &str) -> Result<(String, Vec<String>)> {
    let event = Event::from_json(json).map_err(|e| NostrError::InvalidEvent(e.to_string()))?;
    if event.kind.as_u16() != KIND_RELAY_LIST {
        return Err(NostrError::InvalidEvent(format!(
            "expected kind {KIND_RELAY_LIST}, got {}",
            event.kind.as_u16()
        )));
    }
    event
        .verify()
        .map_err(|e| NostrError::InvalidEvent(e.to_string()))?;

    let relays = tag_vectors(&event)
        .into_iter()
        .filter(|tag| tag.first().map(String::as_str) == Some("relay"))
        .filter_map(|tag| tag.get(1).cloned())
        .collect();
    Ok((event.pubkey.to_hex(), relays))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_list_preserves_order() {
        let identity = IdentityKeypair::generate();
        let relays = vec![
            "wss://b.example".to_string(),
            "wss://a.example".to_string(),
        ];
        let event = build_relay_list_event(&identity, &relays).unwrap();
        let (author, parsed) = parse_relay_list_event(&event.as_json()).unwrap();
        assert_eq!(author, identity.pubkey_hex());
        assert_eq!(parsed, relays);
    }

    #[test]
    fn empty_relay_list_is_valid() {
        let identity = IdentityKeypair::generate();
        let event = build_relay_list_event(&identity, &[]).unwrap();
        let (_, parsed) = parse_relay_list_event(&event.as_json()).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_relay_list_event("not json"),
            Err(NostrError::InvalidEvent(_))
        ));
    }
}
