//! Tag builders and lookups for the event kinds the engine emits.
//!
//! - `h`: published group identifier (`nostr_group_id`, never the MLS id)
//! - `expiration`: NIP-40 expiry
//! - `g`: optional coarse geohash
//! - `t`: inner-rumor topic (`location`)
//! - `e`, `relays`, `relay`: Welcome and relay-list references
//! - `mls_*`: KeyPackage protocol metadata (MIP-00)

use chrono::{DateTime, Utc};

/// Builder for Nostr event tags.
///
/// # Example
///
/// ```
/// use circle_engine::nostr::TagBuilder;
///
/// assert_eq!(TagBuilder::h_tag("abc123"), vec!["h", "abc123"]);
/// assert_eq!(TagBuilder::topic_tag("location"), vec!["t", "location"]);
/// ```
pub struct TagBuilder;

impl TagBuilder {
    /// `["h", nostr_group_id]`
    #[must_use]
    pub fn h_tag(nostr_group_id: &str) -> Vec<String> {
        vec!["h".to_string(), nostr_group_id.to_string()]
    }

    /// `["expiration", unix_seconds]`
    #[must_use]
    pub fn expiration_tag(expires_at: DateTime<Utc>) -> Vec<String> {
        vec!["expiration".to_string(), expires_at.timestamp().to_string()]
    }

    /// `["g", geohash]`. Callers validate and truncate first.
    #[must_use]
    pub fn geohash_tag(geohash: &str) -> Vec<String> {
        vec!["g".to_string(), geohash.to_string()]
    }

    /// `["alt", description]` (NIP-31).
    #[must_use]
    pub fn alt_tag(description: &str) -> Vec<String> {
        vec!["alt".to_string(), description.to_string()]
    }

    /// `["t", topic]`
    #[must_use]
    pub fn topic_tag(topic: &str) -> Vec<String> {
        vec!["t".to_string(), topic.to_string()]
    }

    /// `["e", event_id]`
    #[must_use]
    pub fn event_tag(event_id: &str) -> Vec<String> {
        vec!["e".to_string(), event_id.to_string()]
    }

    /// `["relays", url, url, ...]`
    #[must_use]
    pub fn relays_tag(relays: &[String]) -> Vec<String> {
        std::iter::once("relays".to_string())
            .chain(relays.iter().cloned())
            .collect()
    }

    /// `["relay", url]` for kind 10051.
    #[must_use]
    pub fn relay_tag(url: &str) -> Vec<String> {
        vec!["relay".to_string(), url.to_string()]
    }

    /// `["mls_protocol_version", version]`
    #[must_use]
    pub fn protocol_version_tag(version: &str) -> Vec<String> {
        vec!["mls_protocol_version".to_string(), version.to_string()]
    }

    /// `["mls_ciphersuite", id]`
    #[must_use]
    pub fn ciphersuite_tag(ciphersuite: &str) -> Vec<String> {
        vec!["mls_ciphersuite".to_string(), ciphersuite.to_string()]
    }

    /// `["mls_extensions", id, id, ...]`
    #[must_use]
    pub fn extensions_tag(extensions: &[String]) -> Vec<String> {
        std::iter::once("mls_extensions".to_string())
            .chain(extensions.iter().cloned())
            .collect()
    }
}

/// Returns the first value of the first tag named `name`.
#[must_use]
pub fn tag_value<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a str> {
    find_tag(tags, name).and_then(|tag| tag.get(1).map(String::as_str))
}

/// Returns every value after the name of the first tag named `name`.
#[must_use]
pub fn tag_values<'a>(tags: &'a [Vec<String>], name: &str) -> Vec<&'a str> {
    find_tag(tags, name)
        .map(|tag| tag.iter().skip(1).map(String::as_str).collect())
        .unwrap_or_default()
}

/// Returns true if any tag is named `name`.
#[must_use]
pub fn has_tag(tags: &[Vec<String>], name: &str) -> bool {
    find_tag(tags, name).is_some()
}

fn find_tag<'a>(tags: &'a [Vec<String>], name: &str) -> Option<&'a Vec<String>> {
    tags.iter()
        .find(|tag| tag.first().map(String::as_str) == Some(name))
}
