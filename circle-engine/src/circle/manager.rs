//! High-level circle management API.
//!
//! [`CircleManager`] composes the MDK-backed MLS engine, the Nostr codec
//! and the encrypted store into the circle lifecycle:
//!
//! ```text
//! creator:  create_circle ──► Active ──► leave_circle ──► Left
//! invitee:  process_gift_wrapped_invitation ──► Pending ──► accept ──► Active
//!                                                   └─────► decline (terminal)
//! ```
//!
//! # Two-phase commits
//!
//! Membership changes are staged, not applied. MDK keeps the commit as its
//! pending commit and the pre-commit epoch stays authoritative until the
//! caller confirms the evolution event was published and calls
//! [`CircleManager::finalize_pending_commit`], which merges it. A failed
//! publish is followed by [`CircleManager::discard_pending_commit`].
//! Staged commits survive restarts; [`CircleManager::staged_commits`] lists
//! them for recovery.
//!
//! # Receiving
//!
//! Every kind 445 event passes the public checks (kind, `h` tag,
//! expiration, id, signature) and must decrypt under one of the retained
//! exporter secrets before MDK sees it. Group membership changes, including
//! our own removal, are only acted on after MDK has verified the commit.
//!
//! # Concurrency
//!
//! Each group has its own `RwLock`. Anything that may change MLS state
//! (commits, staging, processing received events, leaving) takes it
//! exclusively. The lock is never held across an `.await`, and it is
//! released once the group's local state is deleted.
//!
//! # Privacy Model
//!
//! - User profiles (kind 0) are never published to relays
//! - Contact info (display names, avatars) is stored locally only
//! - Every kind 445 event is signed by a key used for that event alone

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use nostr::{Event, EventBuilder, JsonUtil, Kind, PublicKey, RelayUrl, Tag, Timestamp, UnsignedEvent};

use super::error::{CircleError, Result};
use super::types::{
    Circle, CircleConfig, CircleCreationResult, CircleMember, CircleMembership, CircleType,
    CircleWithMembers, Contact, DecryptedLocation, EncryptedLocation, EvolutionUpdate,
    GiftWrappedWelcome, GroupDataUpdate, GroupEventOutcome, Invitation, KeyPackageData,
    LeaveResult, MemberKeyPackage, MembershipStatus,
};
use crate::location::{truncate_for_tag, EncryptOptions, LocationPayload};
use crate::mls::{
    EngineConfig, GroupConfig, GroupId, GroupMember, MessageProcessingResult, MlsEngine,
    MlsError, NostrGroupDataUpdate, UpdateGroupResult,
};
use crate::nostr::{
    build_key_package_event, build_relay_list_event, decrypt_with_candidates,
    parse_key_package_event, unwrap_welcome, verify_group_message, wrap_welcome,
    ApplicationRumor, GroupMessageEvent, NostrError, WelcomeRumor,
};
use crate::secret::{policy, EpochScoped, SessionContext};
use crate::storage::{CircleStorage, CommitState, ProcessedOutcome, StorageConfig, StorageError};

fn lock_error(err: impl std::fmt::Display) -> CircleError {
    CircleError::Storage(StorageError::Lock(err.to_string()))
}

fn short_id(nostr_group_id: &[u8; 32]) -> String {
    hex::encode(&nostr_group_id[..4])
}

/// MDK rejecting a member's key package content.
fn key_package_error(err: MlsError) -> CircleError {
    match err {
        MlsError::Mdk(reason) => CircleError::KeyPackageInvalid(reason),
        other => other.into(),
    }
}

/// High-level API for circle management.
///
/// # Example
///
/// ```ignore
/// use circle_engine::circle::CircleManager;
/// use circle_engine::mls::EngineConfig;
/// use circle_engine::storage::StorageConfig;
///
/// let manager = CircleManager::open(&session, &StorageConfig::new(data_dir), EngineConfig::default())?;
/// let circles = manager.get_visible_circles()?;
/// ```
pub struct CircleManager {
    engine: MlsEngine,
    storage: CircleStorage,
    config: EngineConfig,
    own_pubkey: String,
    own_pubkey_bytes: [u8; 32],
    group_locks: Mutex<HashMap<Vec<u8>, Arc<RwLock<()>>>>,
}

impl CircleManager {
    /// Opens the circle store and the MDK database, both keyed by the
    /// session's storage key.
    ///
    /// # Errors
    ///
    /// Returns an error if either database cannot be opened with the key.
    pub fn open(
        session: &SessionContext,
        storage_config: &StorageConfig,
        engine_config: EngineConfig,
    ) -> Result<Self> {
        let storage = CircleStorage::open(storage_config, session)?;
        let engine = MlsEngine::open(&storage_config.mls_database_path(), session.storage_key())?;
        log::info!("circle store opened");
        Ok(Self::with_parts(session, engine, storage, engine_config))
    }

    /// Creates a manager over unencrypted databases.
    ///
    /// # Warning
    ///
    /// Group secrets are stored in plaintext. Only for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn open_unencrypted(
        session: &SessionContext,
        storage_config: &StorageConfig,
        engine_config: EngineConfig,
    ) -> Result<Self> {
        let storage = CircleStorage::open_unencrypted(storage_config)?;
        let engine = MlsEngine::open_unencrypted(&storage_config.mls_database_path())?;
        Ok(Self::with_parts(session, engine, storage, engine_config))
    }

    fn with_parts(
        session: &SessionContext,
        engine: MlsEngine,
        storage: CircleStorage,
        config: EngineConfig,
    ) -> Self {
        let identity = session.identity();
        Self {
            engine,
            storage,
            config,
            own_pubkey: identity.pubkey_hex(),
            own_pubkey_bytes: identity.pubkey_bytes(),
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The engine policy in effect.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ==================== Key Material ====================

    /// Creates a KeyPackage and signs its kind 443 event. MDK keeps the
    /// private half for a single future Welcome.
    ///
    /// # Arguments
    ///
    /// * `session` - The logged-in identity
    /// * `relays` - Inbox relays where Welcomes for this package should be sent
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    pub fn create_key_package(
        &self,
        session: &SessionContext,
        relays: &[String],
    ) -> Result<KeyPackageData> {
        self.check_session(session)?;
        let identity = session.identity();

        let bundle = self.engine.create_key_package(&self.own_pubkey, relays)?;
        let event = build_key_package_event(identity, bundle.content, bundle.tags)?;
        log::info!("key package created");

        Ok(KeyPackageData {
            pubkey: self.own_pubkey.clone(),
            event_json: event.as_json(),
            relays: relays.to_vec(),
            key_package_ref: event.id.to_hex(),
        })
    }

    /// Builds the signed kind 10051 inbox relay list.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn create_relay_list_event(
        &self,
        session: &SessionContext,
        relays: &[String],
    ) -> Result<String> {
        Ok(build_relay_list_event(session.identity(), relays)?.as_json())
    }

    // ==================== Circle Lifecycle ====================

    /// Creates a new circle with the owners of `members` as initial members.
    ///
    /// The circle is active for the creator immediately. One gift-wrapped
    /// Welcome per member is returned, addressed to that member's inbox
    /// relays; the caller publishes them.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::KeyPackageInvalid`] if any package is invalid,
    /// expired or already consumed. Nothing is stored in that case.
    pub async fn create_circle(
        &self,
        session: &SessionContext,
        members: &[MemberKeyPackage],
        config: &CircleConfig,
    ) -> Result<CircleCreationResult> {
        self.check_session(session)?;
        let now = Utc::now();
        let packages = self.validated_packages(members, now)?;

        let mut group_config = GroupConfig::new(&config.name)
            .with_relays(config.relays.iter().cloned())
            .with_description(config.description.clone().unwrap_or_default());
        for admin in &config.admins {
            group_config = group_config.with_admin(admin);
        }

        let created = self
            .engine
            .create_group(
                &self.own_pubkey,
                packages.iter().map(|p| p.event.clone()).collect(),
                group_config,
            )
            .map_err(key_package_error)?;
        let mls_group_id = created.group.mls_group_id.clone();
        self.engine.merge_pending_commit(&mls_group_id)?;

        let welcome_events = self
            .wrap_welcomes(session, created.welcome_rumors, &packages)
            .await?;

        let exporter = self.engine.exporter_secret(&mls_group_id)?;
        let circle = Circle {
            mls_group_id: mls_group_id.clone(),
            nostr_group_id: created.group.nostr_group_id,
            display_name: config.name.clone(),
            circle_type: config.circle_type,
            relays: config.relays.clone(),
            created_at: now.timestamp(),
            updated_at: now.timestamp(),
        };
        let membership = CircleMembership {
            mls_group_id: mls_group_id.clone(),
            status: MembershipStatus::Accepted,
            inviter_pubkey: None,
            invited_at: now.timestamp(),
            responded_at: Some(now.timestamp()),
        };
        let used: Vec<String> = packages.iter().map(|p| p.event_id.clone()).collect();

        self.storage.create_circle(
            &circle,
            &membership,
            &exporter,
            &used,
            self.config.exporter_retention_epochs,
        )?;
        log::info!(
            "circle {} created with {} invited members",
            short_id(&circle.nostr_group_id),
            packages.len()
        );

        let members = self.resolve_members(self.engine.get_members(&mls_group_id)?)?;
        Ok(CircleCreationResult {
            circle: CircleWithMembers {
                circle,
                membership,
                members,
            },
            welcome_events,
        })
    }

    /// Leaves a circle.
    ///
    /// Local state is deleted before this returns, whether or not the
    /// caller manages to publish the returned event. The relays in the
    /// result are the circle's own; never publish the event elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown circle. If the
    /// leave event cannot be built the error is returned after deletion.
    pub fn leave_circle(&self, mls_group_id: &GroupId) -> Result<LeaveResult> {
        let (circle, event_json) = {
            let lock = self.group_lock(mls_group_id)?;
            let _guard = lock.write().map_err(lock_error)?;

            let circle = self
                .storage
                .get_circle(mls_group_id)?
                .ok_or_else(|| CircleError::NotFound("circle".to_string()))?;

            let event_json = self
                .engine
                .leave_group(mls_group_id)
                .map_err(CircleError::from)
                .and_then(|result| {
                    self.restamp(&circle.nostr_group_id, &result.evolution_event, None, Utc::now())
                })
                .and_then(|event| event.to_json().map_err(CircleError::from));

            self.storage.delete_circle(mls_group_id)?;
            (circle, event_json)
        };
        self.release_group_lock(mls_group_id)?;
        log::info!("left circle {}", short_id(&circle.nostr_group_id));

        Ok(LeaveResult {
            evolution_event_json: event_json?,
            relays: circle.relays,
        })
    }

    // ==================== Member Management ====================

    /// Stages a commit adding the owners of `members` and gift-wraps their
    /// Welcomes.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::PendingCommit`] while another commit is
    /// staged, [`CircleError::Unauthorized`] if we are not an admin, or
    /// [`CircleError::KeyPackageInvalid`] for a bad package. If wrapping
    /// fails the staged commit is discarded.
    pub async fn add_members(
        &self,
        session: &SessionContext,
        mls_group_id: &GroupId,
        members: &[MemberKeyPackage],
    ) -> Result<EvolutionUpdate> {
        self.check_session(session)?;
        let packages = self.validated_packages(members, Utc::now())?;
        let used: Vec<String> = packages.iter().map(|p| p.event_id.clone()).collect();
        let events: Vec<Event> = packages.iter().map(|p| p.event.clone()).collect();

        let staged = self.stage(mls_group_id, &used, true, |engine, id| {
            engine.add_members(id, &events).map_err(key_package_error)
        })?;

        match self
            .wrap_welcomes(session, staged.welcomes, &packages)
            .await
        {
            Ok(welcome_events) => Ok(EvolutionUpdate {
                evolution_event_json: staged.event_json,
                relays: staged.relays,
                welcome_events,
            }),
            Err(err) => {
                self.discard_pending_commit(mls_group_id)?;
                Err(err)
            }
        }
    }

    /// Stages a commit removing members.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::PendingCommit`] while another commit is
    /// staged, [`CircleError::NotFound`] if a pubkey is not a member, or
    /// [`CircleError::Unauthorized`] if we are not an admin.
    pub fn remove_members(
        &self,
        mls_group_id: &GroupId,
        member_pubkeys: &[String],
    ) -> Result<EvolutionUpdate> {
        self.stage(mls_group_id, &[], true, |engine, id| {
            let current = engine.get_members(id)?;
            if let Some(missing) = member_pubkeys
                .iter()
                .find(|pubkey| !current.iter().any(|member| &member.pubkey == *pubkey))
            {
                return Err(CircleError::NotFound(format!("member {missing}")));
            }
            Ok(engine.remove_members(id, member_pubkeys)?)
        })
        .map(StagedEvolution::without_welcomes)
    }

    /// Stages a commit replacing our leaf key material. Should follow
    /// every join, and run periodically.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::PendingCommit`] while another commit is staged.
    pub fn rotate_signing_key(&self, mls_group_id: &GroupId) -> Result<EvolutionUpdate> {
        self.stage(mls_group_id, &[], false, |engine, id| Ok(engine.self_update(id)?))
            .map(StagedEvolution::without_welcomes)
    }

    /// Stages a commit changing the group data (name, description, relays,
    /// admins).
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::PendingCommit`] while another commit is
    /// staged, [`CircleError::Unauthorized`] if we are not an admin, or
    /// [`CircleError::InvalidData`] for an empty admin set or a bad relay.
    pub fn update_group_data(
        &self,
        mls_group_id: &GroupId,
        update: &GroupDataUpdate,
    ) -> Result<EvolutionUpdate> {
        let data = group_data_update(update)?;
        self.stage(mls_group_id, &[], true, |engine, id| {
            Ok(engine.update_group_data(id, data)?)
        })
        .map(StagedEvolution::without_welcomes)
    }

    /// Merges the staged commit after its evolution event was published.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] if no commit is staged.
    pub fn finalize_pending_commit(&self, mls_group_id: &GroupId) -> Result<()> {
        let lock = self.group_lock(mls_group_id)?;
        let _guard = lock.write().map_err(lock_error)?;

        let staged = self
            .storage
            .pending_commit(mls_group_id)?
            .is_some_and(|record| record.state == CommitState::Staged);
        if !staged {
            return Err(CircleError::NotFound("no staged commit".to_string()));
        }
        let circle = self
            .storage
            .get_circle(mls_group_id)?
            .ok_or_else(|| CircleError::NotFound("circle".to_string()))?;

        let before = self.snapshot(mls_group_id)?;
        self.engine.merge_pending_commit(mls_group_id)?;
        let after = self.snapshot(mls_group_id)?;
        let exporter = self.engine.exporter_secret(mls_group_id)?;

        let now = Utc::now();
        let circle = refreshed_circle(circle, &before.name, &after, now);
        self.storage.finalize_commit(
            &circle,
            &exporter,
            self.config.exporter_retention_epochs,
            now.timestamp(),
        )?;
        log::info!(
            "commit finalized for circle {} at epoch {}",
            short_id(&circle.nostr_group_id),
            exporter.epoch()
        );
        Ok(())
    }

    /// Abandons the staged commit; the pre-commit epoch stays in force.
    /// Returns whether a commit was staged.
    ///
    /// # Errors
    ///
    /// Returns an error if MDK or the database operation fails.
    pub fn discard_pending_commit(&self, mls_group_id: &GroupId) -> Result<bool> {
        let lock = self.group_lock(mls_group_id)?;
        let _guard = lock.write().map_err(lock_error)?;

        let staged = self
            .storage
            .pending_commit(mls_group_id)?
            .is_some_and(|record| record.state == CommitState::Staged);
        if !staged {
            return Ok(false);
        }

        self.engine.clear_pending_commit(mls_group_id)?;
        let discarded = self
            .storage
            .discard_commit(mls_group_id, Utc::now().timestamp())?;
        log::info!("staged commit discarded");
        Ok(discarded)
    }

    /// Circles with a staged commit awaiting finalize or discard.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn staged_commits(&self) -> Result<Vec<GroupId>> {
        Ok(self.storage.staged_commits()?)
    }

    // ==================== Invitation Handling ====================

    /// Unwraps a gift-wrapped Welcome, hands it to MDK and stores it as a
    /// pending invitation. Group membership is unchanged until
    /// [`Self::accept_invitation`].
    ///
    /// # Arguments
    ///
    /// * `session` - The logged-in identity the gift wrap is addressed to
    /// * `wrapped_event_json` - The kind 1059 event
    /// * `display_name` - Local name for the circle; defaults to the group name
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidEvent`] if the wrap, the Welcome or the
    /// sender binding does not verify, and [`CircleError::AlreadyExists`] if
    /// the invitation or circle is already known.
    pub async fn process_gift_wrapped_invitation(
        &self,
        session: &SessionContext,
        wrapped_event_json: &str,
        display_name: Option<&str>,
    ) -> Result<Invitation> {
        self.check_session(session)?;
        let event = Event::from_json(wrapped_event_json)
            .map_err(|e| CircleError::InvalidEvent(e.to_string()))?;
        let wrapper_event_id = event.id.to_hex();
        if self.storage.has_welcome_wrapper(&wrapper_event_id)? {
            return Err(CircleError::AlreadyExists("invitation".to_string()));
        }

        let unwrapped = unwrap_welcome(session.identity(), &event).await?;
        let welcome = self
            .engine
            .process_welcome(&event.id, unwrapped.rumor.as_unsigned())
            .map_err(|e| CircleError::InvalidEvent(format!("welcome rejected: {e}")))?;

        if welcome.welcomer != unwrapped.sender_pubkey {
            self.engine.decline_welcome(&welcome)?;
            return Err(CircleError::InvalidEvent(
                "welcome sender does not match seal signer".to_string(),
            ));
        }
        if self.storage.get_circle(&welcome.mls_group_id)?.is_some() {
            return Err(CircleError::AlreadyExists("circle".to_string()));
        }

        let now = Utc::now().timestamp();
        let mut relays: Vec<String> = welcome.group_relays.iter().map(ToString::to_string).collect();
        if relays.is_empty() {
            relays = unwrapped.rumor.relays();
        }
        let inviter_pubkey = unwrapped.sender_pubkey.to_hex();
        let circle = Circle {
            mls_group_id: welcome.mls_group_id.clone(),
            nostr_group_id: welcome.nostr_group_id,
            display_name: display_name.map_or_else(|| welcome.group_name.clone(), str::to_string),
            circle_type: CircleType::default(),
            relays,
            created_at: now,
            updated_at: now,
        };
        let membership = CircleMembership {
            mls_group_id: circle.mls_group_id.clone(),
            status: MembershipStatus::Pending,
            inviter_pubkey: Some(inviter_pubkey.clone()),
            invited_at: now,
            responded_at: None,
        };

        self.storage.store_invitation(
            &circle,
            &membership,
            &wrapper_event_id,
            welcome.member_count,
        )?;
        log::info!("invitation stored");

        Ok(Invitation {
            mls_group_id: circle.mls_group_id,
            circle_name: circle.display_name,
            inviter_pubkey,
            member_count: welcome.member_count as usize,
            invited_at: now,
        })
    }

    /// Gets all pending invitations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_pending_invitations(&self) -> Result<Vec<Invitation>> {
        let circles = self.storage.get_all_circles()?;
        let mut invitations = Vec::new();

        for circle in circles {
            let Some(membership) = self.storage.get_membership(&circle.mls_group_id)? else {
                continue;
            };
            if membership.status != MembershipStatus::Pending {
                continue;
            }
            let member_count = self
                .storage
                .pending_welcome(&circle.mls_group_id)?
                .map_or(0, |pending| pending.member_count as usize);

            invitations.push(Invitation {
                mls_group_id: circle.mls_group_id,
                circle_name: circle.display_name,
                inviter_pubkey: membership.inviter_pubkey.unwrap_or_default(),
                member_count,
                invited_at: membership.invited_at,
            });
        }

        Ok(invitations)
    }

    /// Accepts an invitation and joins the circle.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown invitation and
    /// [`CircleError::MembershipConflict`] if it was already answered.
    pub fn accept_invitation(&self, mls_group_id: &GroupId) -> Result<CircleWithMembers> {
        self.require_pending(mls_group_id)?;

        {
            let lock = self.group_lock(mls_group_id)?;
            let _guard = lock.write().map_err(lock_error)?;

            let welcome = self
                .engine
                .pending_welcome(mls_group_id)?
                .ok_or_else(|| CircleError::NotFound("invitation".to_string()))?;
            let circle = self
                .storage
                .get_circle(mls_group_id)?
                .ok_or_else(|| CircleError::NotFound("circle".to_string()))?;

            self.engine.accept_welcome(&welcome)?;
            let exporter = self.engine.exporter_secret(mls_group_id)?;
            let now = Utc::now();
            let circle = refreshed_circle(
                circle,
                &welcome.group_name,
                &self.snapshot(mls_group_id)?,
                now,
            );
            self.storage.accept_invitation(
                &circle,
                &exporter,
                self.config.exporter_retention_epochs,
                now.timestamp(),
            )?;
            log::info!("invitation accepted at epoch {}", exporter.epoch());
        }

        self.get_circle(mls_group_id)?
            .ok_or_else(|| CircleError::NotFound("circle".to_string()))
    }

    /// Declines an invitation. MDK forgets the Welcome; the circle stays
    /// listed as declined.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::NotFound`] for an unknown invitation and
    /// [`CircleError::MembershipConflict`] if it was already answered.
    pub fn decline_invitation(&self, mls_group_id: &GroupId) -> Result<()> {
        self.require_pending(mls_group_id)?;

        {
            let lock = self.group_lock(mls_group_id)?;
            let _guard = lock.write().map_err(lock_error)?;

            if let Some(welcome) = self.engine.pending_welcome(mls_group_id)? {
                self.engine.decline_welcome(&welcome)?;
            }
            self.storage
                .decline_invitation(mls_group_id, Utc::now().timestamp())?;
        }
        self.release_group_lock(mls_group_id)?;
        log::info!("invitation declined");
        Ok(())
    }

    // ==================== Location ====================

    /// Encrypts a location update for a circle.
    ///
    /// The payload is reduced to `options.precision`. With
    /// `options.include_geohash_tag` a public `g` tag is attached, never
    /// finer than the configured maximum tag tier.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::InvalidData`] for invalid coordinates and
    /// [`CircleError::UnknownGroup`] if the circle is not joined.
    pub fn encrypt_location(
        &self,
        mls_group_id: &GroupId,
        latitude: f64,
        longitude: f64,
        options: &EncryptOptions,
    ) -> Result<EncryptedLocation> {
        let now = Utc::now();
        let payload = LocationPayload::with_ttl(
            latitude,
            longitude,
            options.precision,
            now,
            self.config.message_expiration,
        )?;
        let geohash_tag = if options.include_geohash_tag {
            Some(truncate_for_tag(
                &payload.geohash,
                options.precision.min(self.config.max_geohash_tag_tier),
            )?)
        } else {
            None
        };

        let lock = self.group_lock(mls_group_id)?;
        let _guard = lock.write().map_err(lock_error)?;

        let circle = self.require_active(mls_group_id)?;
        let group = self.engine.require_group(mls_group_id)?;
        let rumor = ApplicationRumor::location(&self.own_pubkey, payload.to_json()?, now.timestamp())?;
        let message = self
            .engine
            .create_message(mls_group_id, unsigned_rumor(&rumor)?)?;
        let event = self.restamp(&group.nostr_group_id, &message, geohash_tag.as_deref(), now)?;

        self.storage.record_processed(
            mls_group_id,
            &event.id,
            &ProcessedOutcome::Application {
                sender_pubkey: self.own_pubkey.clone(),
                epoch: group.epoch,
                rumor,
            },
            now.timestamp(),
            (now - self.config.message_expiration).timestamp(),
        )?;

        log::debug!("location encrypted at {:?} precision", options.precision);
        Ok(EncryptedLocation {
            event_json: event.to_json()?,
            relays: circle.relays,
        })
    }

    /// Decrypts a location update.
    ///
    /// Returns `None` for a valid group message that is not a location
    /// (a chat message, or a commit, which is applied on the way).
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::EventRejected`] for any event that is not
    /// valid for us, without saying why.
    pub fn decrypt_location(&self, event_json: &str) -> Result<Option<DecryptedLocation>> {
        let GroupEventOutcome::Application {
            mls_group_id,
            sender_pubkey,
            epoch,
            rumor,
        } = self.process_group_event(event_json)?
        else {
            return Ok(None);
        };
        if !rumor.is_location() {
            return Ok(None);
        }

        let payload = LocationPayload::from_json(&rumor.content)?;
        if payload.is_expired_at(Utc::now()) {
            log::debug!("group message rejected at payload expiration stage");
            return Err(CircleError::EventRejected);
        }

        Ok(Some(DecryptedLocation {
            mls_group_id,
            sender_pubkey,
            latitude: payload.latitude,
            longitude: payload.longitude,
            geohash: payload.geohash,
            precision: payload.precision,
            timestamp: payload.timestamp.timestamp(),
            expires_at: payload.expires_at.timestamp(),
            epoch,
        }))
    }

    // ==================== Receiving ====================

    /// Processes any kind 445 event received for one of our circles.
    ///
    /// Application messages leave the group state untouched. Commits from
    /// other members are applied once MDK has verified them; one that
    /// arrives while we have a commit staged wins, and ours is discarded.
    /// Processing the same event twice yields the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CircleError::EventRejected`] if the event fails any public
    /// check, does not decrypt or does not verify, and
    /// [`CircleError::EpochMismatch`] for a message from a retained past
    /// epoch that MDK can no longer process.
    pub fn process_group_event(&self, event_json: &str) -> Result<GroupEventOutcome> {
        let now = Utc::now();
        let verified = verify_group_message(event_json, now, |nostr_group_id| {
            match self.storage.find_group_by_nostr_id(nostr_group_id) {
                Ok(found) => found,
                Err(err) => {
                    log::warn!("group lookup failed: {err}");
                    None
                }
            }
        })?;
        let mls_group_id = verified.group;
        let event = verified.event;

        if let Some(outcome) = self.storage.processed_outcome(&event.id)? {
            return Ok(replayed_outcome(mls_group_id, outcome));
        }
        if self.storage.own_commit_state(&event.id)?.is_some() {
            return Ok(GroupEventOutcome::OwnCommitEcho { mls_group_id });
        }

        let outcome = {
            let lock = self.group_lock(&mls_group_id)?;
            let _guard = lock.write().map_err(lock_error)?;
            self.process_verified(&mls_group_id, &event, now)?
        };

        if let GroupEventOutcome::Evicted { .. } = outcome {
            self.release_group_lock(&mls_group_id)?;
        }
        Ok(outcome)
    }

    /// Gates a verified event on the exporter ring, then lets MDK decrypt
    /// and verify it. Runs under the group write lock.
    fn process_verified(
        &self,
        mls_group_id: &GroupId,
        event: &GroupMessageEvent,
        now: DateTime<Utc>,
    ) -> Result<GroupEventOutcome> {
        let ring = self
            .storage
            .exporter_ring(mls_group_id, self.config.exporter_retention_epochs)?
            .ok_or(CircleError::EventRejected)?;
        let current_epoch = ring.current().epoch();
        let candidates = ring
            .iter_newest_first()
            .map(|exporter| (exporter.epoch(), exporter.secret()));
        let Some((gate_epoch, _)) = decrypt_with_candidates(&event.content, candidates) else {
            log::debug!("group message rejected at decryption stage");
            return Err(CircleError::EventRejected);
        };

        let stale = || {
            if gate_epoch < current_epoch {
                CircleError::EpochMismatch {
                    expected: current_epoch,
                    actual: gate_epoch,
                }
            } else {
                CircleError::EventRejected
            }
        };

        let nostr_event = event
            .to_nostr_event()
            .map_err(|_| CircleError::EventRejected)?;
        let before = self.snapshot(mls_group_id)?;
        let processed = self.engine.process_message(&nostr_event).map_err(|err| {
            log::debug!("group message rejected at mls stage: {err}");
            stale()
        })?;

        let forget_before = (now - self.config.message_expiration).timestamp();
        match processed {
            MessageProcessingResult::ApplicationMessage(message) => {
                let created_at = i64::try_from(message.created_at.as_u64())
                    .map_err(|_| CircleError::EventRejected)?;
                let tags = message
                    .tags
                    .iter()
                    .map(|tag| tag.as_slice().to_vec())
                    .collect();
                let sender_pubkey = message.pubkey.to_hex();
                let rumor = ApplicationRumor::new(
                    &sender_pubkey,
                    message.kind.as_u16(),
                    tags,
                    message.content,
                    created_at,
                )
                .map_err(|_| {
                    log::debug!("group message rejected at rumor stage");
                    CircleError::EventRejected
                })?;

                let outcome = ProcessedOutcome::Application {
                    sender_pubkey,
                    epoch: gate_epoch,
                    rumor,
                };
                self.storage.record_processed(
                    mls_group_id,
                    &event.id,
                    &outcome,
                    now.timestamp(),
                    forget_before,
                )?;
                log::debug!("application message received at epoch {gate_epoch}");
                Ok(replayed_outcome(mls_group_id.clone(), outcome))
            }
            MessageProcessingResult::Commit { .. } => {
                self.apply_commit(mls_group_id, &event.id, &before, now)
            }
            MessageProcessingResult::Proposal(result) => {
                self.stage_auto_commit(mls_group_id, &event.id, result, now)
            }
            MessageProcessingResult::PendingProposal { .. } => {
                self.storage.record_processed(
                    mls_group_id,
                    &event.id,
                    &ProcessedOutcome::ProposalQueued,
                    now.timestamp(),
                    forget_before,
                )?;
                log::info!("proposal queued for an admin commit");
                Ok(GroupEventOutcome::ProposalQueued {
                    mls_group_id: mls_group_id.clone(),
                })
            }
            MessageProcessingResult::Unprocessable { .. } => {
                log::debug!("group message rejected at mls stage: unprocessable");
                Err(stale())
            }
            MessageProcessingResult::ExternalJoinProposal { .. }
            | MessageProcessingResult::IgnoredProposal { .. }
            | MessageProcessingResult::PreviouslyFailed => {
                log::debug!("group message rejected at mls stage: not applicable");
                Err(CircleError::EventRejected)
            }
        }
    }

    /// Records a commit MDK has verified and merged. If it removed us, the
    /// circle's local state is deleted instead.
    fn apply_commit(
        &self,
        mls_group_id: &GroupId,
        event_id: &str,
        before: &GroupSnapshot,
        now: DateTime<Utc>,
    ) -> Result<GroupEventOutcome> {
        let still_member = match self.engine.get_members(mls_group_id) {
            Ok(members) => members.iter().any(|member| member.pubkey == self.own_pubkey),
            Err(MlsError::GroupNotFound) => false,
            Err(err) => return Err(err.into()),
        };
        if !still_member {
            self.storage.delete_circle(mls_group_id)?;
            log::info!("removed from circle {} by a commit", short_id(&before.nostr_group_id));
            return Ok(GroupEventOutcome::Evicted {
                mls_group_id: mls_group_id.clone(),
            });
        }

        let circle = self
            .storage
            .get_circle(mls_group_id)?
            .ok_or_else(|| CircleError::NotFound("circle".to_string()))?;
        let exporter = self.engine.exporter_secret(mls_group_id)?;
        let circle = refreshed_circle(circle, &before.name, &self.snapshot(mls_group_id)?, now);
        let epoch = exporter.epoch();

        let discarded = self.storage.apply_received_commit(
            &circle,
            &exporter,
            self.config.exporter_retention_epochs,
            event_id,
            &ProcessedOutcome::CommitApplied { epoch },
            now.timestamp(),
        )?;
        if discarded {
            if let Err(err) = self.engine.clear_pending_commit(mls_group_id) {
                log::debug!("no pending commit left to clear: {err}");
            }
            log::warn!("staged commit discarded in favour of a competing commit");
        }
        log::info!(
            "commit applied for circle {} at epoch {epoch}",
            short_id(&circle.nostr_group_id)
        );
        Ok(GroupEventOutcome::CommitApplied {
            mls_group_id: mls_group_id.clone(),
            epoch,
        })
    }

    /// MDK commits a member's self-removal proposal on behalf of an admin.
    /// The commit is staged like any other local change.
    fn stage_auto_commit(
        &self,
        mls_group_id: &GroupId,
        event_id: &str,
        result: UpdateGroupResult,
        now: DateTime<Utc>,
    ) -> Result<GroupEventOutcome> {
        let circle = self
            .storage
            .get_circle(mls_group_id)?
            .ok_or_else(|| CircleError::NotFound("circle".to_string()))?;
        let group = self.engine.require_group(mls_group_id)?;
        let evolution = self.restamp(&circle.nostr_group_id, &result.evolution_event, None, now)?;
        let event_json = evolution.to_json()?;

        if let Err(err) = self.storage.stage_commit(
            mls_group_id,
            group.epoch,
            &evolution.id,
            &event_json,
            &[],
            now.timestamp(),
        ) {
            self.engine.clear_pending_commit(mls_group_id)?;
            return Err(match err {
                StorageError::InvalidData(reason) => CircleError::PendingCommit(reason),
                other => other.into(),
            });
        }
        self.storage.record_processed(
            mls_group_id,
            event_id,
            &ProcessedOutcome::ProposalQueued,
            now.timestamp(),
            (now - self.config.message_expiration).timestamp(),
        )?;
        log::info!(
            "self-removal committed for circle {}, awaiting publish",
            short_id(&circle.nostr_group_id)
        );

        Ok(GroupEventOutcome::ProposalCommitStaged {
            mls_group_id: mls_group_id.clone(),
            evolution: EvolutionUpdate {
                evolution_event_json: event_json,
                relays: circle.relays,
                welcome_events: Vec::new(),
            },
        })
    }

    // ==================== Queries ====================

    /// Retrieves a circle with its members.
    ///
    /// Returns `None` if the circle doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_circle(&self, mls_group_id: &GroupId) -> Result<Option<CircleWithMembers>> {
        let Some(circle) = self.storage.get_circle(mls_group_id)? else {
            return Ok(None);
        };

        let membership = self
            .storage
            .get_membership(mls_group_id)?
            .ok_or_else(|| CircleError::NotFound("membership".to_string()))?;

        let members = self.get_members(mls_group_id)?;

        Ok(Some(CircleWithMembers {
            circle,
            membership,
            members,
        }))
    }

    /// Retrieves all circles.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_circles(&self) -> Result<Vec<CircleWithMembers>> {
        let circles = self.storage.get_all_circles()?;
        let mut result = Vec::with_capacity(circles.len());

        for circle in circles {
            if let Some(membership) = self.storage.get_membership(&circle.mls_group_id)? {
                let members = self.get_members(&circle.mls_group_id)?;
                result.push(CircleWithMembers {
                    circle,
                    membership,
                    members,
                });
            }
        }

        Ok(result)
    }

    /// Retrieves visible circles (excludes declined invitations).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_visible_circles(&self) -> Result<Vec<CircleWithMembers>> {
        let circles = self.get_circles()?;
        Ok(circles
            .into_iter()
            .filter(|c| c.membership.status.is_visible())
            .collect())
    }

    /// Gets members of a joined circle with resolved contact info.
    ///
    /// Empty for a pending or declined invitation: a Welcome only says how
    /// many members there are.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_members(&self, mls_group_id: &GroupId) -> Result<Vec<CircleMember>> {
        let joined = self
            .storage
            .get_membership(mls_group_id)?
            .is_some_and(|membership| membership.status == MembershipStatus::Accepted);
        if !joined {
            return Ok(Vec::new());
        }

        match self.engine.get_members(mls_group_id) {
            Ok(members) => self.resolve_members(members),
            Err(MlsError::GroupNotFound) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve_members(&self, members: Vec<GroupMember>) -> Result<Vec<CircleMember>> {
        members
            .into_iter()
            .map(|member| {
                let contact = self.storage.get_contact(&member.pubkey)?;
                Ok(CircleMember {
                    display_name: contact.as_ref().and_then(|c| c.display_name.clone()),
                    avatar_path: contact.as_ref().and_then(|c| c.avatar_path.clone()),
                    pubkey: member.pubkey,
                    is_admin: member.is_admin,
                })
            })
            .collect()
    }

    // ==================== Contact Management ====================

    /// Sets or updates a contact.
    ///
    /// Contact information is stored locally only and never synced to relays.
    ///
    /// # Errors
    ///
    /// Returns an error if saving the contact fails.
    pub fn set_contact(
        &self,
        pubkey: &str,
        display_name: Option<&str>,
        avatar_path: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Contact> {
        let now = Utc::now().timestamp();

        let existing = self.storage.get_contact(pubkey)?;
        let created_at = existing.as_ref().map_or(now, |c| c.created_at);

        let contact = Contact {
            pubkey: pubkey.to_string(),
            display_name: display_name.map(ToString::to_string),
            avatar_path: avatar_path.map(ToString::to_string),
            notes: notes.map(ToString::to_string),
            created_at,
            updated_at: now,
        };

        self.storage.save_contact(&contact)?;
        Ok(contact)
    }

    /// Gets a contact by pubkey.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_contact(&self, pubkey: &str) -> Result<Option<Contact>> {
        Ok(self.storage.get_contact(pubkey)?)
    }

    /// Gets all contacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_all_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.storage.get_all_contacts()?)
    }

    /// Deletes a contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_contact(&self, pubkey: &str) -> Result<()> {
        Ok(self.storage.delete_contact(pubkey)?)
    }

    // ==================== Internals ====================

    fn group_lock(&self, mls_group_id: &GroupId) -> Result<Arc<RwLock<()>>> {
        let mut locks = self.group_locks.lock().map_err(lock_error)?;
        Ok(Arc::clone(
            locks.entry(mls_group_id.as_slice().to_vec()).or_default(),
        ))
    }

    /// Forgets the lock of a group whose local state is gone. A lock some
    /// other caller still holds stays in place.
    fn release_group_lock(&self, mls_group_id: &GroupId) -> Result<()> {
        let mut locks = self.group_locks.lock().map_err(lock_error)?;
        if locks
            .get(mls_group_id.as_slice())
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(mls_group_id.as_slice());
        }
        Ok(())
    }

    fn check_session(&self, session: &SessionContext) -> Result<()> {
        if session.identity().pubkey_hex() == self.own_pubkey {
            Ok(())
        } else {
            Err(CircleError::Unauthorized(
                "session identity does not own this store".to_string(),
            ))
        }
    }

    /// The circle, if we are an accepted member.
    fn require_active(&self, mls_group_id: &GroupId) -> Result<Circle> {
        let accepted = self
            .storage
            .get_membership(mls_group_id)?
            .is_some_and(|membership| membership.status == MembershipStatus::Accepted);
        if !accepted {
            return Err(CircleError::UnknownGroup);
        }
        self.storage
            .get_circle(mls_group_id)?
            .ok_or(CircleError::UnknownGroup)
    }

    fn require_pending(&self, mls_group_id: &GroupId) -> Result<()> {
        let membership = self
            .storage
            .get_membership(mls_group_id)?
            .ok_or_else(|| CircleError::NotFound("invitation".to_string()))?;

        if membership.status != MembershipStatus::Pending {
            return Err(CircleError::MembershipConflict(format!(
                "Invitation already responded: {:?}",
                membership.status
            )));
        }
        Ok(())
    }

    fn snapshot(&self, mls_group_id: &GroupId) -> Result<GroupSnapshot> {
        let group = self.engine.require_group(mls_group_id)?;
        Ok(GroupSnapshot {
            name: group.name,
            nostr_group_id: group.nostr_group_id,
            relays: self.engine.get_relays(mls_group_id)?,
        })
    }

    /// Parses, verifies and replay-checks remote KeyPackage events. Inbox
    /// relays given by the caller take precedence over the package's
    /// relays tag.
    fn validated_packages(
        &self,
        members: &[MemberKeyPackage],
        now: DateTime<Utc>,
    ) -> Result<Vec<ValidatedPackage>> {
        let oldest = (now - self.config.key_package_lifetime).timestamp();
        let mut packages: Vec<ValidatedPackage> = Vec::with_capacity(members.len());

        for member in members {
            let parsed = parse_key_package_event(&member.key_package_event_json)?;

            if i64::try_from(parsed.created_at).map_or(true, |created| created < oldest) {
                return Err(CircleError::KeyPackageInvalid(
                    "key package expired".to_string(),
                ));
            }
            if parsed.author_pubkey == self.own_pubkey {
                return Err(CircleError::KeyPackageInvalid(
                    "key package belongs to this device".to_string(),
                ));
            }
            if self.storage.is_key_package_used(&parsed.event_id)?
                || packages.iter().any(|seen| seen.event_id == parsed.event_id)
            {
                return Err(CircleError::KeyPackageInvalid(
                    "key package already used".to_string(),
                ));
            }

            let inbox_relays = if member.inbox_relays.is_empty() {
                parsed.fields.relays.clone()
            } else {
                member.inbox_relays.clone()
            };
            packages.push(ValidatedPackage {
                event_id: parsed.event_id,
                event: parsed.event,
                inbox_relays,
            });
        }

        Ok(packages)
    }

    /// Builds a commit under the group write lock and stages it.
    fn stage(
        &self,
        mls_group_id: &GroupId,
        used_key_packages: &[String],
        admin_only: bool,
        build: impl FnOnce(&MlsEngine, &GroupId) -> Result<UpdateGroupResult>,
    ) -> Result<StagedEvolution> {
        let lock = self.group_lock(mls_group_id)?;
        let _guard = lock.write().map_err(lock_error)?;

        if let Some(record) = self.storage.pending_commit(mls_group_id)? {
            if record.state == CommitState::Staged {
                return Err(CircleError::PendingCommit(
                    "finalize or discard the staged commit first".to_string(),
                ));
            }
        }

        let circle = self.require_active(mls_group_id)?;
        let group = self.engine.require_group(mls_group_id)?;
        if admin_only {
            let own = PublicKey::from_hex(&self.own_pubkey)
                .map_err(|e| CircleError::InvalidData(e.to_string()))?;
            if !group.admin_pubkeys.contains(&own) {
                return Err(CircleError::Unauthorized(
                    "only admins can change this circle".to_string(),
                ));
            }
        }

        let result = build(&self.engine, mls_group_id)?;
        let now = Utc::now();
        let staged = self
            .restamp(&group.nostr_group_id, &result.evolution_event, None, now)
            .and_then(|event| {
                let event_json = event.to_json()?;
                self.storage.stage_commit(
                    mls_group_id,
                    group.epoch,
                    &event.id,
                    &event_json,
                    used_key_packages,
                    now.timestamp(),
                )?;
                Ok(event_json)
            });
        let event_json = match staged {
            Ok(event_json) => event_json,
            Err(err) => {
                self.engine.clear_pending_commit(mls_group_id)?;
                return Err(err);
            }
        };
        log::info!(
            "commit staged for circle {} at epoch {}",
            short_id(&group.nostr_group_id),
            group.epoch
        );

        Ok(StagedEvolution {
            event_json,
            relays: circle.relays,
            welcomes: result.welcome_rumors.unwrap_or_default(),
        })
    }

    /// Re-signs a kind 445 event produced by MDK with a fresh ephemeral
    /// key and our tags. The encrypted content is carried over untouched.
    fn restamp(
        &self,
        nostr_group_id: &[u8; 32],
        mdk_event: &Event,
        geohash_tag: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<GroupMessageEvent> {
        let expires_at = now + self.config.message_expiration;
        let event = GroupMessageEvent::seal(
            nostr_group_id,
            mdk_event.content.clone(),
            geohash_tag,
            now,
            expires_at,
        )?;

        let mut signer = [0u8; 32];
        hex::decode_to_slice(&event.pubkey, &mut signer).map_err(NostrError::from)?;
        policy::ensure_key_separation(&self.own_pubkey_bytes, &signer);
        Ok(event)
    }

    /// Gift-wraps one Welcome per recipient, concurrently. Each rumor names
    /// the key package it answers in its `e` tag.
    async fn wrap_welcomes(
        &self,
        session: &SessionContext,
        rumors: Vec<UnsignedEvent>,
        packages: &[ValidatedPackage],
    ) -> Result<Vec<GiftWrappedWelcome>> {
        let identity = session.identity();

        let wraps = rumors.into_iter().map(|rumor| async move {
            let rumor = WelcomeRumor::from_rumor(rumor)?;
            let package = rumor
                .key_package_event_id()
                .and_then(|id| packages.iter().find(|p| p.event_id == id))
                .ok_or_else(|| {
                    CircleError::InvalidData("welcome for an unknown key package".to_string())
                })?;
            let recipient = package.event.pubkey;
            let event = wrap_welcome(identity, &recipient, rumor).await?;
            Ok::<_, CircleError>(GiftWrappedWelcome {
                recipient_pubkey: recipient.to_hex(),
                recipient_relays: package.inbox_relays.clone(),
                event,
            })
        });

        let wrapped = try_join_all(wraps).await?;
        if !wrapped.is_empty() {
            log::debug!("{} welcomes gift-wrapped", wrapped.len());
        }
        Ok(wrapped)
    }
}

impl std::fmt::Debug for CircleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A member's kind 443 event that passed validation.
struct ValidatedPackage {
    event_id: String,
    event: Event,
    inbox_relays: Vec<String>,
}

/// Group data as MDK reports it for the current epoch.
struct GroupSnapshot {
    name: String,
    nostr_group_id: [u8; 32],
    relays: Vec<String>,
}

/// A commit staged by [`CircleManager::stage`], before Welcomes are wrapped.
struct StagedEvolution {
    event_json: String,
    relays: Vec<String>,
    welcomes: Vec<UnsignedEvent>,
}

impl StagedEvolution {
    fn without_welcomes(self) -> EvolutionUpdate {
        EvolutionUpdate {
            evolution_event_json: self.event_json,
            relays: self.relays,
            welcome_events: Vec::new(),
        }
    }
}

fn group_data_update(update: &GroupDataUpdate) -> Result<NostrGroupDataUpdate> {
    let mut data = NostrGroupDataUpdate::new();
    if let Some(name) = &update.name {
        data = data.name(name.clone());
    }
    if let Some(description) = &update.description {
        data = data.description(description.clone());
    }
    if let Some(relays) = &update.relays {
        let relays = relays
            .iter()
            .map(|relay| {
                RelayUrl::parse(relay)
                    .map_err(|e| CircleError::InvalidData(format!("relay {relay}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        data = data.relays(relays);
    }
    if let Some(admins) = &update.admins {
        if admins.is_empty() {
            return Err(CircleError::InvalidData(
                "a circle needs at least one admin".to_string(),
            ));
        }
        let admins = admins
            .iter()
            .map(|admin| {
                PublicKey::from_hex(admin)
                    .map_err(|e| CircleError::InvalidData(format!("admin {admin}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        data = data.admins(admins);
    }
    Ok(data)
}

/// The unsigned kind 9 event MDK encrypts.
fn unsigned_rumor(rumor: &ApplicationRumor) -> Result<UnsignedEvent> {
    let author =
        PublicKey::from_hex(&rumor.pubkey).map_err(|e| CircleError::InvalidData(e.to_string()))?;
    let created_at = u64::try_from(rumor.created_at)
        .map_err(|_| CircleError::InvalidData("negative timestamp".to_string()))?;
    let tags = rumor
        .tags
        .iter()
        .map(|tag| Tag::parse(tag).map_err(|e| CircleError::InvalidData(e.to_string())))
        .collect::<Result<Vec<_>>>()?;

    Ok(EventBuilder::new(Kind::from(rumor.kind), rumor.content.clone())
        .tags(tags)
        .custom_created_at(Timestamp::from(created_at))
        .build(author))
}

fn replayed_outcome(mls_group_id: GroupId, outcome: ProcessedOutcome) -> GroupEventOutcome {
    match outcome {
        ProcessedOutcome::Application {
            sender_pubkey,
            epoch,
            rumor,
        } => GroupEventOutcome::Application {
            mls_group_id,
            sender_pubkey,
            epoch,
            rumor,
        },
        ProcessedOutcome::CommitApplied { epoch } => GroupEventOutcome::CommitApplied {
            mls_group_id,
            epoch,
        },
        ProcessedOutcome::ProposalQueued => GroupEventOutcome::ProposalQueued { mls_group_id },
    }
}

/// Carries group data changes into the local circle row. A display name
/// the user never customized follows the group name.
fn refreshed_circle(
    mut circle: Circle,
    previous_name: &str,
    next: &GroupSnapshot,
    now: DateTime<Utc>,
) -> Circle {
    circle.nostr_group_id = next.nostr_group_id;
    if !next.relays.is_empty() {
        circle.relays.clone_from(&next.relays);
    }
    if circle.display_name == previous_name {
        circle.display_name.clone_from(&next.name);
    }
    circle.updated_at = now.timestamp();
    circle
}
