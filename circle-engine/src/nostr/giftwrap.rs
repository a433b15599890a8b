//! NIP-59 gift wrap for Welcome rumors (kind 444).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ Gift Wrap (kind 1059) - PUBLIC                      │
//! │ • ephemeral key, randomized timestamp, p-tag only   │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │ Seal (kind 13) - NIP-44, signed by identity   │  │
//! │  │  ┌─────────────────────────────────────────┐  │  │
//! │  │  │ Rumor (kind 444) - UNSIGNED             │  │  │
//! │  │  └─────────────────────────────────────────┘  │  │
//! │  └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! A Welcome rumor is represented by [`WelcomeRumor`], which has no signing
//! method. The only identity-signing path, [`sign_identity_event`], panics
//! on kind 444.
//!
//! [`sign_identity_event`]: crate::nostr::sign_identity_event

use nostr::nips::nip59::UnwrappedGift;
use nostr::{Event, EventBuilder, PublicKey, Timestamp, UnsignedEvent};

use crate::nostr::error::{NostrError, Result};
use crate::nostr::identity::IdentityKeypair;
use crate::nostr::tags::{tag_value, tag_values};

/// Kind for Welcome rumors.
pub const KIND_WELCOME: u16 = 444;

/// Kind for gift wraps.
pub const KIND_GIFT_WRAP: u16 = 1059;

/// An unsigned kind 444 rumor.
#[derive(Debug, Clone)]
pub struct WelcomeRumor(UnsignedEvent);

impl WelcomeRumor {
    /// Wraps a kind 444 rumor, as MDK produces them for new members.
    ///
    /// # Errors
    ///
    /// Returns an error if the rumor is not kind 444.
    pub fn from_rumor(rumor: UnsignedEvent) -> Result<Self> {
        if rumor.kind.as_u16() != KIND_WELCOME {
            return Err(NostrError::GiftUnwrap(format!(
                "Gift wrap does not contain a kind {KIND_WELCOME} Welcome, got {}",
                rumor.kind.as_u16()
            )));
        }
        Ok(Self(rumor))
    }

    /// The rumor as MDK consumes it.
    #[must_use]
    pub const fn as_unsigned(&self) -> &UnsignedEvent {
        &self.0
    }

    /// Serialized MLS Welcome.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.0.content
    }

    /// Pubkey the rumor claims as author.
    #[must_use]
    pub const fn author(&self) -> PublicKey {
        self.0.pubkey
    }

    /// Referenced KeyPackage event id.
    #[must_use]
    pub fn key_package_event_id(&self) -> Option<String> {
        let tags = self.tag_vectors();
        tag_value(&tags, "e").map(str::to_string)
    }

    /// Circle relays advertised to the joiner.
    #[must_use]
    pub fn relays(&self) -> Vec<String> {
        let tags = self.tag_vectors();
        tag_values(&tags, "relays")
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.0.created_at
    }

    fn tag_vectors(&self) -> Vec<Vec<String>> {
        self.0
            .tags
            .iter()
            .map(|tag| tag.as_slice().to_vec())
            .collect()
    }
}

/// Result of unwrapping a gift-wrapped Welcome.
#[derive(Debug, Clone)]
pub struct UnwrappedWelcome {
    /// Sender's identity, authenticated by the seal signature.
    pub sender_pubkey: PublicKey,
    /// Id of the kind 1059 wrapper.
    pub wrapper_event_id: String,
    /// The Welcome rumor.
    pub rumor: WelcomeRumor,
}

/// Gift-wraps a Welcome rumor to `recipient`.
///
/// # Errors
///
/// Returns an error if the identity key is invalid or encryption fails.
pub async fn wrap_welcome(
    sender: &IdentityKeypair,
    recipient: &PublicKey,
    rumor: WelcomeRumor,
) -> Result<Event> {
    let keys = sender.to_keys()?;
    EventBuilder::gift_wrap(&keys, recipient, rumor.0, std::iter::empty())
        .await
        .map_err(|e| NostrError::GiftWrap(e.to_string()))
}

/// Unwraps a kind 1059 event addressed to `recipient`.
///
/// # Errors
///
/// Returns an error if the event is not a gift wrap, is not for us, fails
/// seal verification, or does not contain a kind 444 rumor.
pub async fn unwrap_welcome(recipient: &IdentityKeypair, gift_wrap: &Event) -> Result<UnwrappedWelcome> {
    if gift_wrap.kind.as_u16() != KIND_GIFT_WRAP {
        return Err(NostrError::GiftUnwrap(format!(
            "Event is not a gift wrap (kind {KIND_GIFT_WRAP}), got {}",
            gift_wrap.kind.as_u16()
        )));
    }

    let keys = recipient.to_keys()?;
    let unwrapped = UnwrappedGift::from_gift_wrap(&keys, gift_wrap)
        .await
        .map_err(|e| NostrError::GiftUnwrap(e.to_string()))?;

    if unwrapped.rumor.pubkey != unwrapped.sender {
        return Err(NostrError::GiftUnwrap(
            "Rumor author does not match seal signer".to_string(),
        ));
    }

    Ok(UnwrappedWelcome {
        sender_pubkey: unwrapped.sender,
        wrapper_event_id: gift_wrap.id.to_hex(),
        rumor: WelcomeRumor::from_rumor(unwrapped.rumor)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nostr::tags::TagBuilder;
    use nostr::{Kind, Tag, Timestamp};

    fn rumor_from(sender: &IdentityKeypair) -> WelcomeRumor {
        let tags = [
            TagBuilder::event_tag(&"ab".repeat(32)),
            TagBuilder::relays_tag(&["wss://circle.example".to_string()]),
        ]
        .into_iter()
        .map(|tag| Tag::parse(tag).unwrap())
        .collect::<Vec<_>>();
        let rumor = UnsignedEvent::new(
            sender.public_key().unwrap(),
            Timestamp::now(),
            Kind::from(KIND_WELCOME),
            tags,
            "deadbeef".to_string(),
        );
        WelcomeRumor::from_rumor(rumor).unwrap()
    }

    #[test]
    fn from_rumor_rejects_other_kinds() {
        let sender = IdentityKeypair::generate();
        let rumor = UnsignedEvent::new(
            sender.public_key().unwrap(),
            Timestamp::now(),
            Kind::from(9u16),
            Vec::<Tag>::new(),
            String::new(),
        );
        assert!(matches!(
            WelcomeRumor::from_rumor(rumor),
            Err(NostrError::GiftUnwrap(msg)) if msg.contains("444")
        ));
    }

    #[test]
    fn rumor_exposes_tags() {
        let sender = IdentityKeypair::generate();
        let rumor = rumor_from(&sender);
        assert_eq!(rumor.key_package_event_id(), Some("ab".repeat(32)));
        assert_eq!(rumor.relays(), vec!["wss://circle.example".to_string()]);
        assert_eq!(rumor.author().to_hex(), sender.pubkey_hex());
        assert_eq!(rumor.content(), "deadbeef");
    }

    #[tokio::test]
    async fn wrap_hides_sender_and_unwrap_recovers_rumor() {
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();

        let wrapped = wrap_welcome(&sender, &recipient.public_key().unwrap(), rumor_from(&sender))
            .await
            .unwrap();
        assert_eq!(wrapped.kind.as_u16(), KIND_GIFT_WRAP);
        assert_ne!(wrapped.pubkey.to_hex(), sender.pubkey_hex());

        let unwrapped = unwrap_welcome(&recipient, &wrapped).await.unwrap();
        assert_eq!(unwrapped.sender_pubkey.to_hex(), sender.pubkey_hex());
        assert_eq!(unwrapped.rumor.content(), "deadbeef");
        assert_eq!(unwrapped.wrapper_event_id, wrapped.id.to_hex());
    }

    #[tokio::test]
    async fn unwrap_fails_for_wrong_recipient() {
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();
        let stranger = IdentityKeypair::generate();

        let wrapped = wrap_welcome(&sender, &recipient.public_key().unwrap(), rumor_from(&sender))
            .await
            .unwrap();

        let result = unwrap_welcome(&stranger, &wrapped).await;
        assert!(matches!(result, Err(NostrError::GiftUnwrap(_))));
    }

    #[tokio::test]
    async fn unwrap_rejects_non_gift_wrap() {
        let identity = IdentityKeypair::generate();
        let event = crate::nostr::sign_identity_event(
            &identity,
            10051,
            String::new(),
            vec![],
            Timestamp::now(),
        )
        .unwrap();
        let result = unwrap_welcome(&identity, &event).await;
        assert!(matches!(result, Err(NostrError::GiftUnwrap(msg)) if msg.contains("1059")));
    }
}
