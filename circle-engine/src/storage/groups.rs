//! Pending commits, pending Welcomes, exporter secrets and processed events.
//!
//! Every transition that touches more than one table runs in a single
//! transaction so a crash never leaves a half-recorded epoch behind.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::circles::{set_membership_status, upsert_circle, upsert_membership};
use super::error::{Result, StorageError};
use super::{group_id_from_blob, CircleStorage, CommitState};
use crate::boundary::WireName;
use crate::circle::{Circle, CircleMembership, MembershipStatus};
use crate::mls::GroupId;
use crate::nostr::ApplicationRumor;
use crate::secret::{EpochScoped, EpochSecretRing, ExporterSecret, SecretBytes};

/// A locally produced commit and where it is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommitRecord {
    /// Lifecycle state.
    pub state: CommitState,
    /// Epoch the group was at when the commit was staged.
    pub epoch: u64,
    /// Id of the kind 445 event carrying the commit.
    pub event_id: String,
    /// Signed kind 445 event carrying the commit.
    pub event_json: String,
    /// Member key package events the commit consumes.
    pub key_package_event_ids: Vec<String>,
    /// When the commit was staged (Unix timestamp).
    pub created_at: i64,
    /// When it was finalized or discarded (Unix timestamp).
    pub resolved_at: Option<i64>,
}

/// An invitation waiting for accept or decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWelcomeRecord {
    /// Id of the kind 1059 gift wrap that carried the Welcome.
    pub wrapper_event_id: String,
    /// Members in the group, including us.
    pub member_count: u32,
    /// When the Welcome arrived (Unix timestamp).
    pub received_at: i64,
}

/// What processing a kind 445 event produced, kept so that the same event
/// yields the same result again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessedOutcome {
    /// An application message.
    Application {
        /// Sender identity (hex).
        sender_pubkey: String,
        /// Epoch the message was sent in.
        epoch: u64,
        /// The inner unsigned event.
        rumor: ApplicationRumor,
    },
    /// A commit moved the group to `epoch`.
    CommitApplied {
        /// The new epoch.
        epoch: u64,
    },
    /// A proposal was stored for a later commit.
    ProposalQueued,
}

fn epoch_column(epoch: u64) -> Result<i64> {
    i64::try_from(epoch).map_err(|_| StorageError::InvalidData(format!("Epoch out of range: {epoch}")))
}

fn epoch_from_column(epoch: i64) -> Result<u64> {
    u64::try_from(epoch).map_err(|_| StorageError::InvalidData(format!("Invalid epoch: {epoch}")))
}

fn ensure_new_circle(conn: &Connection, mls_group_id: &GroupId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM circles WHERE mls_group_id = ?1)",
        params![mls_group_id.as_slice()],
        |row| row.get(0),
    )?;
    if exists {
        return Err(StorageError::InvalidData("Circle already exists".to_string()));
    }
    Ok(())
}

fn mark_used(conn: &Connection, key_package_event_ids: &[String], now: i64) -> Result<()> {
    for event_id in key_package_event_ids {
        conn.execute(
            "INSERT OR IGNORE INTO used_key_packages (key_package_event_id, used_at) VALUES (?1, ?2)",
            params![event_id, now],
        )?;
    }
    Ok(())
}

/// Marks a staged commit discarded. Returns whether one was staged.
fn discard_staged(conn: &Connection, mls_group_id: &GroupId, now: i64) -> Result<bool> {
    let rows = conn.execute(
        r"
        UPDATE pending_commits
        SET state = ?2, resolved_at = ?3
        WHERE mls_group_id = ?1 AND state = ?4
        ",
        params![
            mls_group_id.as_slice(),
            CommitState::Discarded.wire_name(),
            now,
            CommitState::Staged.wire_name(),
        ],
    )?;
    Ok(rows > 0)
}

fn load_exporters(conn: &Connection, mls_group_id: &GroupId) -> Result<Vec<ExporterSecret>> {
    let mut stmt =
        conn.prepare("SELECT epoch, secret FROM exporter_secrets WHERE mls_group_id = ?1")?;
    let rows = stmt
        .query_map(params![mls_group_id.as_slice()], |row| {
            Ok((row.get::<_, i64>(0)?, Zeroizing::new(row.get::<_, Vec<u8>>(1)?)))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(epoch, bytes)| {
            let secret = SecretBytes::from_slice(&bytes)
                .ok_or_else(|| StorageError::InvalidData("Invalid exporter secret".to_string()))?;
            Ok(ExporterSecret::new(epoch_from_column(epoch)?, secret))
        })
        .collect()
}

/// Adds `exporter` to the group's ring if it is newer than the current
/// epoch, then rewrites the retained rows.
fn retain_exporter(
    conn: &Connection,
    mls_group_id: &GroupId,
    exporter: &ExporterSecret,
    retention: u64,
) -> Result<()> {
    let ring = match EpochSecretRing::from_entries(retention, load_exporters(conn, mls_group_id)?) {
        None => EpochSecretRing::new(retention, exporter.duplicate()),
        Some(ring) if exporter.epoch() > ring.current().epoch() => ring.advanced(exporter.duplicate()),
        Some(ring) => ring,
    };

    conn.execute(
        "DELETE FROM exporter_secrets WHERE mls_group_id = ?1",
        params![mls_group_id.as_slice()],
    )?;
    for entry in ring.iter_newest_first() {
        let epoch = epoch_column(entry.epoch())?;
        entry.secret().expose_scoped(|bytes| {
            conn.execute(
                "INSERT INTO exporter_secrets (mls_group_id, epoch, secret) VALUES (?1, ?2, ?3)",
                params![mls_group_id.as_slice(), epoch, bytes.as_slice()],
            )
        })?;
    }
    Ok(())
}

fn insert_processed(
    conn: &Connection,
    mls_group_id: &GroupId,
    event_id: &str,
    outcome: &ProcessedOutcome,
    now: i64,
) -> Result<()> {
    let json = serde_json::to_string(outcome)
        .map_err(|e| StorageError::InvalidData(format!("Failed to serialize outcome: {e}")))?;
    conn.execute(
        r"
        INSERT OR REPLACE INTO processed_events (event_id, mls_group_id, outcome, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ",
        params![event_id, mls_group_id.as_slice(), json, now],
    )?;
    Ok(())
}

fn resolve_welcome(conn: &Connection, mls_group_id: &GroupId, now: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE pending_welcomes SET resolved_at = ?2 WHERE mls_group_id = ?1 AND resolved_at IS NULL",
        params![mls_group_id.as_slice(), now],
    )?;
    if rows == 0 {
        return Err(StorageError::NotFound("Pending welcome not found".to_string()));
    }
    Ok(())
}

impl CircleStorage {
    /// Persists a newly created circle: metadata, membership, the first
    /// exporter secret and the consumed key package events.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidData`] if the circle already exists.
    pub fn create_circle(
        &self,
        circle: &Circle,
        membership: &CircleMembership,
        exporter: &ExporterSecret,
        key_package_event_ids: &[String],
        retention: u64,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        ensure_new_circle(&tx, &circle.mls_group_id)?;
        upsert_circle(&tx, circle)?;
        upsert_membership(&tx, membership)?;
        retain_exporter(&tx, &circle.mls_group_id, exporter, retention)?;
        mark_used(&tx, key_package_event_ids, circle.created_at)?;

        tx.commit()?;
        Ok(())
    }

    /// Stages a locally produced commit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidData`] if a commit is already staged.
    pub fn stage_commit(
        &self,
        mls_group_id: &GroupId,
        epoch: u64,
        event_id: &str,
        event_json: &str,
        key_package_event_ids: &[String],
        now: i64,
    ) -> Result<()> {
        let ids_json = serde_json::to_string(key_package_event_ids)
            .map_err(|e| StorageError::InvalidData(format!("Failed to serialize ids: {e}")))?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let staged: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_commits WHERE mls_group_id = ?1 AND state = ?2)",
            params![mls_group_id.as_slice(), CommitState::Staged.wire_name()],
            |row| row.get(0),
        )?;
        if staged {
            return Err(StorageError::InvalidData("A commit is already staged".to_string()));
        }

        tx.execute(
            r"
            INSERT INTO pending_commits
                (mls_group_id, state, epoch, event_id, event_json, key_package_event_ids, created_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
            ON CONFLICT(mls_group_id) DO UPDATE SET
                state = excluded.state,
                epoch = excluded.epoch,
                event_id = excluded.event_id,
                event_json = excluded.event_json,
                key_package_event_ids = excluded.key_package_event_ids,
                created_at = excluded.created_at,
                resolved_at = NULL
            ",
            params![
                mls_group_id.as_slice(),
                CommitState::Staged.wire_name(),
                epoch_column(epoch)?,
                event_id,
                event_json,
                ids_json,
                now,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Loads the most recent commit record for a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is corrupt.
    pub fn pending_commit(&self, mls_group_id: &GroupId) -> Result<Option<PendingCommitRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r"
                SELECT state, epoch, event_id, event_json, key_package_event_ids, created_at, resolved_at
                FROM pending_commits
                WHERE mls_group_id = ?1
                ",
                params![mls_group_id.as_slice()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((state, epoch, event_id, event_json, ids, created_at, resolved_at)) = row else {
            return Ok(None);
        };

        let state = CommitState::from_wire_name(&state)
            .ok_or_else(|| StorageError::InvalidData(format!("Invalid commit state: {state}")))?;
        let key_package_event_ids: Vec<String> = serde_json::from_str(&ids)
            .map_err(|e| StorageError::InvalidData(format!("Invalid ids JSON: {e}")))?;

        Ok(Some(PendingCommitRecord {
            state,
            epoch: epoch_from_column(epoch)?,
            event_id,
            event_json,
            key_package_event_ids,
            created_at,
            resolved_at,
        }))
    }

    /// Marks the staged commit finalized, records the new exporter secret
    /// and the refreshed circle metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no commit is staged.
    pub fn finalize_commit(
        &self,
        circle: &Circle,
        exporter: &ExporterSecret,
        retention: u64,
        now: i64,
    ) -> Result<()> {
        let id = &circle.mls_group_id;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let ids: String = tx
            .query_row(
                "SELECT key_package_event_ids FROM pending_commits WHERE mls_group_id = ?1 AND state = ?2",
                params![id.as_slice(), CommitState::Staged.wire_name()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound("No staged commit".to_string()))?;
        let key_package_event_ids: Vec<String> = serde_json::from_str(&ids)
            .map_err(|e| StorageError::InvalidData(format!("Invalid ids JSON: {e}")))?;

        upsert_circle(&tx, circle)?;
        retain_exporter(&tx, id, exporter, retention)?;
        mark_used(&tx, &key_package_event_ids, now)?;
        tx.execute(
            "UPDATE pending_commits SET state = ?2, resolved_at = ?3 WHERE mls_group_id = ?1",
            params![id.as_slice(), CommitState::Finalized.wire_name(), now],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Discards a staged commit. Returns whether one was staged.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn discard_commit(&self, mls_group_id: &GroupId, now: i64) -> Result<bool> {
        let conn = self.lock()?;
        discard_staged(&conn, mls_group_id, now)
    }

    /// Groups that currently have a staged commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn staged_commits(&self) -> Result<Vec<GroupId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT mls_group_id FROM pending_commits WHERE state = ?1 ORDER BY created_at ASC",
        )?;
        let ids = stmt
            .query_map(params![CommitState::Staged.wire_name()], |row| {
                row.get::<_, Vec<u8>>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.into_iter().map(group_id_from_blob).collect()
    }

    /// Records another member's commit: refreshed metadata, the new
    /// exporter secret and the event's outcome. Any commit we had staged
    /// for the same group is discarded; returns whether one was.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn apply_received_commit(
        &self,
        circle: &Circle,
        exporter: &ExporterSecret,
        retention: u64,
        event_id: &str,
        outcome: &ProcessedOutcome,
        now: i64,
    ) -> Result<bool> {
        let id = &circle.mls_group_id;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        upsert_circle(&tx, circle)?;
        retain_exporter(&tx, id, exporter, retention)?;
        insert_processed(&tx, id, event_id, outcome, now)?;
        let discarded = discard_staged(&tx, id, now)?;

        tx.commit()?;
        Ok(discarded)
    }

    /// Records a verified invitation: circle metadata, a pending
    /// membership and the Welcome's wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidData`] if the circle already exists.
    pub fn store_invitation(
        &self,
        circle: &Circle,
        membership: &CircleMembership,
        wrapper_event_id: &str,
        member_count: u32,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        ensure_new_circle(&tx, &circle.mls_group_id)?;
        upsert_circle(&tx, circle)?;
        upsert_membership(&tx, membership)?;
        tx.execute(
            r"
            INSERT INTO pending_welcomes (mls_group_id, wrapper_event_id, member_count, received_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, NULL)
            ",
            params![
                circle.mls_group_id.as_slice(),
                wrapper_event_id,
                member_count,
                membership.invited_at,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Loads an unresolved invitation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending_welcome(&self, mls_group_id: &GroupId) -> Result<Option<PendingWelcomeRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                r"
                SELECT wrapper_event_id, member_count, received_at
                FROM pending_welcomes
                WHERE mls_group_id = ?1 AND resolved_at IS NULL
                ",
                params![mls_group_id.as_slice()],
                |row| {
                    Ok(PendingWelcomeRecord {
                        wrapper_event_id: row.get(0)?,
                        member_count: row.get(1)?,
                        received_at: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Whether a gift wrap with this id has already been handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn has_welcome_wrapper(&self, wrapper_event_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pending_welcomes WHERE wrapper_event_id = ?1)",
            params![wrapper_event_id],
            |row| row.get(0),
        )?)
    }

    /// Joins an invited circle: records the first exporter secret, marks
    /// the membership accepted and resolves the Welcome.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no pending Welcome.
    pub fn accept_invitation(
        &self,
        circle: &Circle,
        exporter: &ExporterSecret,
        retention: u64,
        now: i64,
    ) -> Result<()> {
        let id = &circle.mls_group_id;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        resolve_welcome(&tx, id, now)?;
        upsert_circle(&tx, circle)?;
        retain_exporter(&tx, id, exporter, retention)?;
        set_membership_status(&tx, id, MembershipStatus::Accepted, now)?;

        tx.commit()?;
        Ok(())
    }

    /// Declines an invitation. The circle row stays with a declined
    /// membership.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no pending Welcome.
    pub fn decline_invitation(&self, mls_group_id: &GroupId, now: i64) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        resolve_welcome(&tx, mls_group_id, now)?;
        set_membership_status(&tx, mls_group_id, MembershipStatus::Declined, now)?;

        tx.commit()?;
        Ok(())
    }

    /// Whether a member key package event has already been consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn is_key_package_used(&self, key_package_event_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM used_key_packages WHERE key_package_event_id = ?1)",
            params![key_package_event_id],
            |row| row.get(0),
        )?)
    }

    /// The group's retained exporter secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn exporter_ring(
        &self,
        mls_group_id: &GroupId,
        retention: u64,
    ) -> Result<Option<EpochSecretRing<ExporterSecret>>> {
        let conn = self.lock()?;
        Ok(EpochSecretRing::from_entries(retention, load_exporters(&conn, mls_group_id)?))
    }

    /// Adds a newer exporter secret to the group's ring and erases secrets
    /// that fall out of the window.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn retain_exporter_secret(
        &self,
        mls_group_id: &GroupId,
        exporter: &ExporterSecret,
        retention: u64,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        retain_exporter(&tx, mls_group_id, exporter, retention)?;
        tx.commit()?;
        Ok(())
    }

    /// The stored outcome of an already handled event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is corrupt.
    pub fn processed_outcome(&self, event_id: &str) -> Result<Option<ProcessedOutcome>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT outcome FROM processed_events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| StorageError::InvalidData(format!("Invalid outcome JSON: {e}")))
        })
        .transpose()
    }

    /// Stores an event's outcome and forgets outcomes recorded before
    /// `forget_before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn record_processed(
        &self,
        mls_group_id: &GroupId,
        event_id: &str,
        outcome: &ProcessedOutcome,
        now: i64,
        forget_before: i64,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_processed(&tx, mls_group_id, event_id, outcome, now)?;
        tx.execute(
            "DELETE FROM processed_events WHERE created_at < ?1",
            params![forget_before],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Finds our own staged or resolved commit by its event id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is corrupt.
    pub fn own_commit_state(&self, event_id: &str) -> Result<Option<CommitState>> {
        let conn = self.lock()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM pending_commits WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;

        state
            .map(|state| {
                CommitState::from_wire_name(&state)
                    .ok_or_else(|| StorageError::InvalidData(format!("Invalid commit state: {state}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circle::CircleType;

    fn group_id() -> GroupId {
        GroupId::from_slice(&[0x5A; 16])
    }

    fn circle() -> Circle {
        Circle {
            mls_group_id: group_id(),
            nostr_group_id: [0x42; 32],
            display_name: "Family".to_string(),
            circle_type: CircleType::LocationSharing,
            relays: vec!["wss://relay.example.com".to_string()],
            created_at: 1_000,
            updated_at: 1_000,
        }
    }

    fn membership(status: MembershipStatus) -> CircleMembership {
        CircleMembership {
            mls_group_id: group_id(),
            status,
            inviter_pubkey: None,
            invited_at: 1_000,
            responded_at: None,
        }
    }

    fn exporter(epoch: u64) -> ExporterSecret {
        ExporterSecret::new(epoch, SecretBytes::random())
    }

    fn epochs(storage: &CircleStorage, retention: u64) -> Vec<u64> {
        storage
            .exporter_ring(&group_id(), retention)
            .unwrap()
            .map(|ring| ring.iter_newest_first().map(EpochScoped::epoch).collect())
            .unwrap_or_default()
    }

    fn created() -> CircleStorage {
        let storage = CircleStorage::in_memory().unwrap();
        storage
            .create_circle(
                &circle(),
                &membership(MembershipStatus::Accepted),
                &exporter(0),
                &["kp-a".to_string()],
                2,
            )
            .unwrap();
        storage
    }

    #[test]
    fn create_circle_persists_exporter_and_used_packages() {
        let storage = created();

        assert_eq!(epochs(&storage, 2), vec![0]);
        assert!(storage.is_key_package_used("kp-a").unwrap());
        assert!(!storage.is_key_package_used("kp-b").unwrap());
        assert_eq!(
            storage.find_group_by_nostr_id(&[0x42; 32]).unwrap(),
            Some(group_id())
        );
    }

    #[test]
    fn create_circle_twice_fails() {
        let storage = created();
        let result = storage.create_circle(
            &circle(),
            &membership(MembershipStatus::Accepted),
            &exporter(0),
            &[],
            2,
        );
        assert!(matches!(result, Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn staged_commit_lifecycle() {
        let storage = created();
        storage
            .stage_commit(&group_id(), 0, "evt-1", "{}", &["kp-c".to_string()], 2_000)
            .unwrap();

        assert_eq!(storage.staged_commits().unwrap(), vec![group_id()]);
        let record = storage.pending_commit(&group_id()).unwrap().unwrap();
        assert_eq!(record.state, CommitState::Staged);
        assert_eq!(record.event_id, "evt-1");
        assert!(!storage.is_key_package_used("kp-c").unwrap());
        assert_eq!(
            storage.own_commit_state("evt-1").unwrap(),
            Some(CommitState::Staged)
        );

        storage.finalize_commit(&circle(), &exporter(1), 2, 3_000).unwrap();

        let record = storage.pending_commit(&group_id()).unwrap().unwrap();
        assert_eq!(record.state, CommitState::Finalized);
        assert_eq!(record.resolved_at, Some(3_000));
        assert!(storage.is_key_package_used("kp-c").unwrap());
        assert!(storage.staged_commits().unwrap().is_empty());
        assert_eq!(epochs(&storage, 2), vec![1, 0]);
    }

    #[test]
    fn second_stage_is_refused() {
        let storage = created();
        storage.stage_commit(&group_id(), 0, "evt-1", "{}", &[], 2_000).unwrap();
        let result = storage.stage_commit(&group_id(), 0, "evt-2", "{}", &[], 2_001);
        assert!(matches!(result, Err(StorageError::InvalidData(_))));
    }

    #[test]
    fn discard_keeps_exporter_ring() {
        let storage = created();
        storage.stage_commit(&group_id(), 0, "evt-1", "{}", &[], 2_000).unwrap();

        assert!(storage.discard_commit(&group_id(), 2_500).unwrap());
        assert!(!storage.discard_commit(&group_id(), 2_600).unwrap());

        let record = storage.pending_commit(&group_id()).unwrap().unwrap();
        assert_eq!(record.state, CommitState::Discarded);
        assert_eq!(epochs(&storage, 2), vec![0]);

        let result = storage.finalize_commit(&circle(), &exporter(1), 2, 3_000);
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn received_commit_discards_staged_commit() {
        let storage = created();
        storage.stage_commit(&group_id(), 0, "evt-1", "{}", &[], 2_000).unwrap();

        let outcome = ProcessedOutcome::CommitApplied { epoch: 1 };
        let discarded = storage
            .apply_received_commit(&circle(), &exporter(1), 2, "evt-theirs", &outcome, 2_100)
            .unwrap();

        assert!(discarded);
        assert_eq!(
            storage.pending_commit(&group_id()).unwrap().unwrap().state,
            CommitState::Discarded
        );
        assert_eq!(storage.processed_outcome("evt-theirs").unwrap(), Some(outcome));
    }

    #[test]
    fn exporter_ring_drops_epochs_past_retention() {
        let storage = created();
        for epoch in 1..=4 {
            storage
                .retain_exporter_secret(&group_id(), &exporter(epoch), 2)
                .unwrap();
        }
        assert_eq!(epochs(&storage, 2), vec![4, 3, 2]);

        let rows: i64 = storage
            .lock()
            .unwrap()
            .query_row("SELECT count(*) FROM exporter_secrets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 3);
    }

    #[test]
    fn exporter_ring_ignores_stale_epoch() {
        let storage = created();
        storage.retain_exporter_secret(&group_id(), &exporter(3), 2).unwrap();
        storage.retain_exporter_secret(&group_id(), &exporter(1), 2).unwrap();
        assert_eq!(epochs(&storage, 2), vec![3]);
    }

    #[test]
    fn processed_outcomes_are_forgotten_after_cutoff() {
        let storage = created();
        storage
            .record_processed(&group_id(), "old", &ProcessedOutcome::ProposalQueued, 1_000, 0)
            .unwrap();
        storage
            .record_processed(&group_id(), "new", &ProcessedOutcome::ProposalQueued, 5_000, 2_000)
            .unwrap();

        assert!(storage.processed_outcome("old").unwrap().is_none());
        assert_eq!(
            storage.processed_outcome("new").unwrap(),
            Some(ProcessedOutcome::ProposalQueued)
        );
    }

    #[test]
    fn invitation_accept_and_replay_guard() {
        let storage = CircleStorage::in_memory().unwrap();
        storage
            .store_invitation(&circle(), &membership(MembershipStatus::Pending), "wrap-1", 3)
            .unwrap();

        let pending = storage.pending_welcome(&group_id()).unwrap().unwrap();
        assert_eq!(pending.member_count, 3);
        assert!(storage.has_welcome_wrapper("wrap-1").unwrap());
        assert!(storage.find_group_by_nostr_id(&[0x42; 32]).unwrap().is_none());

        storage.accept_invitation(&circle(), &exporter(1), 2, 2_000).unwrap();

        assert!(storage.pending_welcome(&group_id()).unwrap().is_none());
        assert!(storage.has_welcome_wrapper("wrap-1").unwrap());
        assert_eq!(
            storage.get_membership(&group_id()).unwrap().unwrap().status,
            MembershipStatus::Accepted
        );
        assert_eq!(epochs(&storage, 2), vec![1]);
    }

    #[test]
    fn decline_resolves_welcome() {
        let storage = CircleStorage::in_memory().unwrap();
        storage
            .store_invitation(&circle(), &membership(MembershipStatus::Pending), "wrap-1", 2)
            .unwrap();

        storage.decline_invitation(&group_id(), 2_000).unwrap();

        assert!(storage.pending_welcome(&group_id()).unwrap().is_none());
        assert_eq!(
            storage.get_membership(&group_id()).unwrap().unwrap().status,
            MembershipStatus::Declined
        );
        let again = storage.decline_invitation(&group_id(), 2_100);
        assert!(matches!(again, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn accept_without_welcome_fails() {
        let storage = created();
        let result = storage.accept_invitation(&circle(), &exporter(1), 2, 2_000);
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn delete_circle_removes_group_rows() {
        let storage = created();
        storage.stage_commit(&group_id(), 0, "evt-1", "{}", &[], 2_000).unwrap();
        storage
            .record_processed(&group_id(), "evt-2", &ProcessedOutcome::ProposalQueued, 2_000, 0)
            .unwrap();

        storage.delete_circle(&group_id()).unwrap();

        assert!(storage.pending_commit(&group_id()).unwrap().is_none());
        assert!(storage.exporter_ring(&group_id(), 2).unwrap().is_none());
        assert!(storage.processed_outcome("evt-2").unwrap().is_none());
        assert!(storage.staged_commits().unwrap().is_empty());
    }
}
