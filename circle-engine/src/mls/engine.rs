//! MLS engine backed by MDK.
//!
//! [`MlsEngine`] wraps MDK and exposes the group operations circles need.
//! Everything MLS (TreeKEM, the key schedule, framing, the Marmot group
//! data extension, Welcome construction) happens inside MDK; this layer
//! converts between hex strings and MDK types and keeps MDK's types from
//! leaking into the rest of the crate.

use std::path::Path;

use mdk_core::prelude::*;
use mdk_core::MDK;
use mdk_sqlite_storage::MdkSqliteStorage;
use nostr::prelude::*;

use super::error::{MdkResultExt, MlsError, Result};
use super::types::{GroupConfig, GroupMember, MlsGroup, MlsWelcome};
use crate::secret::{ExporterSecret, SecretBytes};

/// Content and tags of a kind 443 event, before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPackageBundle {
    /// Serialized KeyPackage, as MDK encodes it for the event content.
    pub content: String,
    /// Event tags (`mls_protocol_version`, `mls_ciphersuite`, ...).
    pub tags: Vec<Vec<String>>,
}

/// MLS group engine for one device.
pub struct MlsEngine {
    mdk: MDK<MdkSqliteStorage>,
}

impl MlsEngine {
    /// Opens the MDK database at `db_path`, encrypted with `storage_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// database cannot be opened with this key.
    pub fn open(db_path: &Path, storage_key: &SecretBytes) -> Result<Self> {
        ensure_parent_dir(db_path)?;
        let config = storage_key.expose_scoped(|key| mdk_sqlite_storage::EncryptionConfig::new(*key));
        let storage = MdkSqliteStorage::new_with_key(db_path, config)
            .map_err(|e| MlsError::Storage(format!("Failed to initialize MDK storage: {e}")))?;
        Ok(Self {
            mdk: MDK::new(storage),
        })
    }

    /// Opens an unencrypted MDK database. For tests only.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn open_unencrypted(db_path: &Path) -> Result<Self> {
        ensure_parent_dir(db_path)?;
        let storage = MdkSqliteStorage::new_unencrypted(db_path)
            .map_err(|e| MlsError::Storage(format!("Failed to initialize MDK storage: {e}")))?;
        Ok(Self {
            mdk: MDK::new(storage),
        })
    }

    /// Generates a KeyPackage for `pubkey_hex`. MDK keeps the private half.
    ///
    /// # Errors
    ///
    /// Returns an error if the pubkey is invalid or MDK fails.
    pub fn create_key_package(&self, pubkey_hex: &str, relays: &[String]) -> Result<KeyPackageBundle> {
        let pubkey = parse_pubkey(pubkey_hex)?;
        let (content, tags) = self
            .mdk
            .create_key_package_for_event(&pubkey, parse_relays(relays))
            .map_mdk_err()?;

        Ok(KeyPackageBundle {
            content,
            tags: tags.into_iter().map(|tag| tag.as_slice().to_vec()).collect(),
        })
    }

    /// Creates a group with the creator as sole admin plus `config.admins`.
    ///
    /// The creator's own commit is left pending; call
    /// [`merge_pending_commit`](Self::merge_pending_commit) to activate it.
    ///
    /// # Errors
    ///
    /// Returns an error if any key package is rejected or MDK fails.
    pub fn create_group(
        &self,
        creator_pubkey: &str,
        member_key_packages: Vec<Event>,
        config: GroupConfig,
    ) -> Result<GroupResult> {
        let creator = parse_pubkey(creator_pubkey)?;

        let mut admins = vec![creator];
        for admin in &config.admins {
            let admin = parse_pubkey(admin)?;
            if !admins.contains(&admin) {
                admins.push(admin);
            }
        }

        let mdk_config = NostrGroupConfigData::new(
            config.name,
            config.description,
            None,
            None,
            None,
            parse_relays(&config.relays),
            admins,
        );

        self.mdk
            .create_group(&creator, member_key_packages, mdk_config)
            .map_mdk_err()
    }

    /// Stages a commit adding the members behind `key_packages`.
    ///
    /// # Errors
    ///
    /// Returns an error if we are not an admin or a key package is invalid.
    pub fn add_members(&self, group_id: &GroupId, key_packages: &[Event]) -> Result<UpdateGroupResult> {
        self.mdk.add_members(group_id, key_packages).map_mdk_err()
    }

    /// Stages a commit removing `member_pubkeys` (hex).
    ///
    /// # Errors
    ///
    /// Returns an error if a pubkey is invalid or we are not an admin.
    pub fn remove_members(
        &self,
        group_id: &GroupId,
        member_pubkeys: &[String],
    ) -> Result<UpdateGroupResult> {
        let pubkeys = member_pubkeys
            .iter()
            .map(|pubkey| parse_pubkey(pubkey))
            .collect::<Result<Vec<_>>>()?;
        self.mdk.remove_members(group_id, &pubkeys).map_mdk_err()
    }

    /// Stages a commit rotating our leaf key material.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK fails.
    pub fn self_update(&self, group_id: &GroupId) -> Result<UpdateGroupResult> {
        self.mdk.self_update(group_id).map_mdk_err()
    }

    /// Stages a commit changing the group data extension.
    ///
    /// # Errors
    ///
    /// Returns an error if we are not an admin or the update is invalid.
    pub fn update_group_data(
        &self,
        group_id: &GroupId,
        update: NostrGroupDataUpdate,
    ) -> Result<UpdateGroupResult> {
        self.mdk.update_group_data(group_id, update).map_mdk_err()
    }

    /// Creates our self-remove proposal.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK fails.
    pub fn leave_group(&self, group_id: &GroupId) -> Result<UpdateGroupResult> {
        self.mdk.leave_group(group_id).map_mdk_err()
    }

    /// Applies our pending commit.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no pending commit.
    pub fn merge_pending_commit(&self, group_id: &GroupId) -> Result<()> {
        self.mdk.merge_pending_commit(group_id).map_mdk_err()
    }

    /// Drops our pending commit, keeping the current epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK fails.
    pub fn clear_pending_commit(&self, group_id: &GroupId) -> Result<()> {
        self.mdk.clear_pending_commit(group_id).map_mdk_err()
    }

    /// Stores a Welcome rumor as a pending invitation.
    ///
    /// # Errors
    ///
    /// Returns an error if the Welcome does not match one of our key
    /// packages.
    pub fn process_welcome(
        &self,
        wrapper_event_id: &EventId,
        rumor: &UnsignedEvent,
    ) -> Result<MlsWelcome> {
        self.mdk.process_welcome(wrapper_event_id, rumor).map_mdk_err()
    }

    /// Joins the group behind a pending Welcome.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK fails.
    pub fn accept_welcome(&self, welcome: &MlsWelcome) -> Result<()> {
        self.mdk.accept_welcome(welcome).map_mdk_err()
    }

    /// Marks a pending Welcome as declined.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK fails.
    pub fn decline_welcome(&self, welcome: &MlsWelcome) -> Result<()> {
        self.mdk.decline_welcome(welcome).map_mdk_err()
    }

    /// Finds the pending Welcome for `group_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK storage fails.
    pub fn pending_welcome(&self, group_id: &GroupId) -> Result<Option<MlsWelcome>> {
        Ok(self
            .mdk
            .get_pending_welcomes()
            .map_mdk_err()?
            .into_iter()
            .find(|welcome| &welcome.mls_group_id == group_id))
    }

    /// Encrypts `rumor` into a kind 445 event for the current epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is unknown or inactive.
    pub fn create_message(&self, group_id: &GroupId, rumor: UnsignedEvent) -> Result<Event> {
        self.mdk.create_message(group_id, rumor).map_mdk_err()
    }

    /// Processes a kind 445 event: application message, proposal or commit.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK cannot decrypt or verify the event.
    pub fn process_message(&self, event: &Event) -> Result<MessageProcessingResult> {
        self.mdk.process_message(event).map_mdk_err()
    }

    /// Group state for `group_id`, if we hold any.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK storage fails.
    pub fn get_group(&self, group_id: &GroupId) -> Result<Option<MlsGroup>> {
        self.mdk.get_group(group_id).map_mdk_err()
    }

    /// Group state for `group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MlsError::GroupNotFound`] if we hold none.
    pub fn require_group(&self, group_id: &GroupId) -> Result<MlsGroup> {
        self.get_group(group_id)?.ok_or(MlsError::GroupNotFound)
    }

    /// Members of the current epoch, with their admin flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is unknown.
    pub fn get_members(&self, group_id: &GroupId) -> Result<Vec<GroupMember>> {
        let group = self.require_group(group_id)?;
        let members = self.mdk.get_members(group_id).map_mdk_err()?;

        Ok(members
            .into_iter()
            .map(|pubkey| GroupMember {
                is_admin: group.admin_pubkeys.contains(&pubkey),
                pubkey: pubkey.to_hex(),
            })
            .collect())
    }

    /// Relays from the group data extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is unknown.
    pub fn get_relays(&self, group_id: &GroupId) -> Result<Vec<String>> {
        Ok(self
            .mdk
            .get_relays(group_id)
            .map_mdk_err()?
            .into_iter()
            .map(|relay| relay.to_string())
            .collect())
    }

    /// Exporter secret of the current epoch.
    ///
    /// # Errors
    ///
    /// Returns an error if the group is unknown.
    pub fn exporter_secret(&self, group_id: &GroupId) -> Result<ExporterSecret> {
        let exporter = self.mdk.exporter_secret(group_id).map_mdk_err()?;
        let secret = SecretBytes::from_slice(&exporter.secret[..])
            .ok_or_else(|| MlsError::Mdk("exporter secret has wrong length".to_string()))?;
        Ok(ExporterSecret::new(exporter.epoch, secret))
    }
}

impl std::fmt::Debug for MlsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlsEngine")
            .field("mdk", &"<MDK instance>")
            .finish()
    }
}

fn ensure_parent_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MlsError::Storage(format!(
                "Failed to create data directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    Ok(())
}

fn parse_pubkey(pubkey_hex: &str) -> Result<PublicKey> {
    PublicKey::from_hex(pubkey_hex)
        .map_err(|e| MlsError::InvalidInput(format!("Invalid pubkey: {e}")))
}

fn parse_relays(relays: &[String]) -> Vec<RelayUrl> {
    relays
        .iter()
        .filter_map(|relay| RelayUrl::parse(relay).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (MlsEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        let engine = MlsEngine::open_unencrypted(&dir.path().join("mls.db")).unwrap();
        (engine, dir)
    }

    fn signed_key_package(engine: &MlsEngine, keys: &Keys) -> Event {
        let bundle = engine
            .create_key_package(&keys.public_key().to_hex(), &["wss://relay.test.com".to_string()])
            .unwrap();
        let tags: Vec<Tag> = bundle
            .tags
            .iter()
            .map(|tag| Tag::parse(tag).unwrap())
            .collect();
        EventBuilder::new(Kind::MlsKeyPackage, bundle.content)
            .tags(tags)
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn key_package_carries_marmot_tags() {
        let (engine, _dir) = engine();
        let keys = Keys::generate();
        let bundle = engine
            .create_key_package(&keys.public_key().to_hex(), &["wss://relay.test.com".to_string()])
            .unwrap();

        assert!(!bundle.content.is_empty());
        let names: Vec<&str> = bundle.tags.iter().filter_map(|t| t.first()).map(String::as_str).collect();
        assert!(names.contains(&"mls_protocol_version"));
        assert!(names.contains(&"mls_ciphersuite"));
    }

    #[test]
    fn key_package_rejects_bad_pubkey() {
        let (engine, _dir) = engine();
        let result = engine.create_key_package("not-hex", &[]);
        assert!(matches!(result, Err(MlsError::InvalidInput(_))));
    }

    #[test]
    fn creator_is_admin_after_merge() {
        let (alice, _a) = engine();
        let (bob, _b) = engine();
        let alice_keys = Keys::generate();
        let bob_keys = Keys::generate();

        let result = alice
            .create_group(
                &alice_keys.public_key().to_hex(),
                vec![signed_key_package(&bob, &bob_keys)],
                GroupConfig::new("Family").with_relay("wss://relay.test.com"),
            )
            .unwrap();
        let group_id = result.group.mls_group_id.clone();
        alice.merge_pending_commit(&group_id).unwrap();

        let members = alice.get_members(&group_id).unwrap();
        assert_eq!(members.len(), 2);
        let creator = members
            .iter()
            .find(|m| m.pubkey == alice_keys.public_key().to_hex())
            .unwrap();
        assert!(creator.is_admin);
        assert_eq!(result.welcome_rumors.len(), 1);
    }

    #[test]
    fn exporter_secret_changes_with_epoch() {
        let (alice, _a) = engine();
        let (bob, _b) = engine();
        let alice_keys = Keys::generate();

        let result = alice
            .create_group(
                &alice_keys.public_key().to_hex(),
                vec![signed_key_package(&bob, &Keys::generate())],
                GroupConfig::new("Family"),
            )
            .unwrap();
        let group_id = result.group.mls_group_id.clone();
        alice.merge_pending_commit(&group_id).unwrap();
        let before = alice.exporter_secret(&group_id).unwrap();

        alice.self_update(&group_id).unwrap();
        alice.merge_pending_commit(&group_id).unwrap();
        let after = alice.exporter_secret(&group_id).unwrap();

        assert_eq!(after.epoch(), before.epoch() + 1);
        assert!(!after.secret().ct_eq(before.secret()));
    }

    #[test]
    fn unknown_group_is_not_found() {
        let (engine, _dir) = engine();
        let result = engine.require_group(&GroupId::from_slice(&[1, 2, 3]));
        assert!(matches!(result, Err(MlsError::GroupNotFound)));
    }

    #[test]
    fn debug_hides_mdk_state() {
        let (engine, _dir) = engine();
        assert!(format!("{engine:?}").contains("<MDK instance>"));
    }
}
