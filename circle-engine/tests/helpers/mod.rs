//! Reusable helpers for circle integration tests.
//!
//! Every [`Party`] is a separate user with their own identity and their
//! own data directory. Nothing is mocked: KeyPackages, Welcomes and group
//! messages go through the real engine and codec, as JSON.

#![allow(dead_code)]

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use circle_engine::circle::{CircleConfig, CircleManager, MemberKeyPackage};
use circle_engine::mls::{EngineConfig, GroupId};
use circle_engine::nostr::IdentityKeypair;
use circle_engine::secret::{SecretBytes, SessionContext};
use circle_engine::storage::StorageConfig;
use nostr::JsonUtil;
use tempfile::TempDir;

pub const RELAY: &str = "wss://relay.test.com";

/// Atomic counter for unique test directory names.
static HELPER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Creates a unique temporary directory path for test isolation.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let id = HELPER_COUNTER.fetch_add(1, Ordering::SeqCst);
    env::temp_dir().join(format!(
        "circle_engine_test_{}_{}_{}",
        prefix,
        std::process::id(),
        id
    ))
}

/// Removes a temporary test directory. Ignores errors silently.
pub fn cleanup_dir(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

/// One user: an identity and a manager over its own store.
pub struct Party {
    pub session: SessionContext,
    pub manager: CircleManager,
    _dir: TempDir,
}

impl Party {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("should create temp dir");
        let session = SessionContext::new(IdentityKeypair::generate(), SecretBytes::random());
        let manager = CircleManager::open_unencrypted(
            &session,
            &StorageConfig::new(dir.path()),
            EngineConfig::default(),
        )
        .expect("should create manager");
        Self {
            session,
            manager,
            _dir: dir,
        }
    }

    pub fn pubkey(&self) -> String {
        self.session.identity().pubkey_hex()
    }

    /// Publishes a fresh KeyPackage and returns it as an invitee entry.
    pub fn key_package(&self) -> MemberKeyPackage {
        let data = self
            .manager
            .create_key_package(&self.session, &[RELAY.to_string()])
            .expect("should create key package");
        MemberKeyPackage::new(data.event_json, Vec::new())
    }

    /// Receives a gift-wrapped Welcome and accepts it.
    pub async fn join(&self, wrapped_json: &str) -> GroupId {
        let invitation = self
            .manager
            .process_gift_wrapped_invitation(&self.session, wrapped_json, None)
            .await
            .expect("should process invitation");
        self.manager
            .accept_invitation(&invitation.mls_group_id)
            .expect("should accept invitation");
        invitation.mls_group_id
    }
}

/// Alice created a circle, Bob joined it.
pub struct TwoPartyCircle {
    pub alice: Party,
    pub bob: Party,
    pub group_id: GroupId,
}

/// Sets up a complete two-party circle.
///
/// 1. Bob publishes a KeyPackage
/// 2. Alice creates the circle with it and gift-wraps the Welcome
/// 3. Bob unwraps, verifies and accepts the Welcome
pub async fn setup_two_party_circle() -> TwoPartyCircle {
    let alice = Party::new();
    let bob = Party::new();

    let config = CircleConfig::new("Family")
        .with_description("Integration test circle")
        .with_relay(RELAY);
    let created = alice
        .manager
        .create_circle(&alice.session, &[bob.key_package()], &config)
        .await
        .expect("should create circle");

    let welcome = created
        .welcome_events
        .first()
        .expect("should have a welcome for bob");
    let group_id = bob.join(&welcome.event.as_json()).await;
    assert_eq!(group_id, created.circle.circle.mls_group_id);

    TwoPartyCircle {
        alice,
        bob,
        group_id,
    }
}
