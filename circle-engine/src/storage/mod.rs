//! Encrypted store for circles and group state.
//!
//! MDK keeps the MLS group state in its own database. This SQLCipher
//! database holds everything else the engine persists:
//!
//! - `circles`, `circle_memberships`, `contacts`: app-level metadata
//! - `pending_commits`: the staged / finalized / discarded commit machine
//! - `pending_welcomes`: Welcomes waiting for accept or decline
//! - `exporter_secrets`: the retained window of exporter secrets
//! - `processed_events`: outcomes of kind 445 events already handled
//! - `used_key_packages`: member key package events already consumed
//!
//! # Security
//!
//! The database is keyed with the session storage key as a raw SQLCipher
//! key and probed before use, so a wrong key fails at open. Unencrypted
//! constructors exist only under the `test-utils` feature.

// SQLite operations need to hold the lock for the duration of the operation.
#![allow(clippy::significant_drop_tightening)]

mod circles;
mod config;
mod error;
mod groups;

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use zeroize::Zeroizing;

use crate::mls::GroupId;
use crate::secret::SessionContext;

pub use config::{StorageConfig, DATABASE_FILE_NAME, MLS_DATABASE_FILE_NAME};
pub use error::{Result, StorageError};
pub use groups::{PendingCommitRecord, PendingWelcomeRecord, ProcessedOutcome};

/// Lifecycle of a locally produced commit.
///
/// ```text
/// Staged ──finalize──► Finalized
///    └────discard────► Discarded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitState {
    /// Computed and persisted, not yet confirmed published.
    Staged,
    /// Published and installed as the group state.
    Finalized,
    /// Abandoned; the pre-commit state stays authoritative.
    Discarded,
}

/// `SQLite`-based storage for circle data.
///
/// Thread-safe wrapper around a single connection. Every multi-row state
/// transition runs in one transaction.
pub struct CircleStorage {
    conn: Mutex<Connection>,
}

impl CircleStorage {
    /// Opens (or creates) the encrypted database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KeyRejected`] if the session key does not
    /// open an existing database, or another error if initialization fails.
    pub fn open(config: &StorageConfig, session: &SessionContext) -> Result<Self> {
        config.ensure_data_dir()?;
        let conn = Connection::open(config.database_path())?;
        apply_key(&conn, &session.storage_key_literal())?;
        Self::with_connection(conn)
    }

    /// Opens a database without encryption.
    ///
    /// # Warning
    ///
    /// Group secrets are stored in plaintext. Only for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn open_unencrypted(config: &StorageConfig) -> Result<Self> {
        config.ensure_data_dir()?;
        Self::with_connection(Connection::open(config.database_path())?)
    }

    /// Creates an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }
}

impl std::fmt::Debug for CircleStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircleStorage").finish_non_exhaustive()
    }
}

/// Keys the connection and checks that the key opens the file.
fn apply_key(conn: &Connection, key_literal: &str) -> Result<()> {
    let pragma = Zeroizing::new(format!("PRAGMA key = \"{key_literal}\";"));
    conn.execute_batch(&pragma)?;
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|_| StorageError::KeyRejected)?;
    Ok(())
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Deleted secrets are overwritten, not left in free pages
        PRAGMA secure_delete = ON;

        -- Circle metadata (app-level, not MLS state)
        CREATE TABLE IF NOT EXISTS circles (
            mls_group_id BLOB PRIMARY KEY,
            nostr_group_id BLOB NOT NULL,
            display_name TEXT NOT NULL,
            circle_type TEXT NOT NULL DEFAULT 'location_sharing',
            relays TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS circles_nostr_group_id ON circles(nostr_group_id);

        -- Membership state (pending/accepted/declined invitations)
        CREATE TABLE IF NOT EXISTS circle_memberships (
            mls_group_id BLOB PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending',
            inviter_pubkey TEXT,
            invited_at INTEGER NOT NULL,
            responded_at INTEGER,
            FOREIGN KEY (mls_group_id) REFERENCES circles(mls_group_id)
        );

        -- Local contact storage (never synced to relays)
        CREATE TABLE IF NOT EXISTS contacts (
            pubkey TEXT PRIMARY KEY,
            display_name TEXT,
            avatar_path TEXT,
            notes TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Locally produced commits awaiting publish confirmation
        CREATE TABLE IF NOT EXISTS pending_commits (
            mls_group_id BLOB PRIMARY KEY,
            state TEXT NOT NULL,
            epoch INTEGER NOT NULL,
            event_id TEXT NOT NULL,
            event_json TEXT NOT NULL,
            key_package_event_ids TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            resolved_at INTEGER,
            FOREIGN KEY (mls_group_id) REFERENCES circles(mls_group_id)
        );

        -- Welcomes awaiting accept or decline (resolved rows block replays)
        CREATE TABLE IF NOT EXISTS pending_welcomes (
            mls_group_id BLOB PRIMARY KEY,
            wrapper_event_id TEXT NOT NULL UNIQUE,
            member_count INTEGER NOT NULL,
            received_at INTEGER NOT NULL,
            resolved_at INTEGER,
            FOREIGN KEY (mls_group_id) REFERENCES circles(mls_group_id)
        );

        -- Exporter secrets of the current and retained epochs
        CREATE TABLE IF NOT EXISTS exporter_secrets (
            mls_group_id BLOB NOT NULL,
            epoch INTEGER NOT NULL,
            secret BLOB NOT NULL,
            PRIMARY KEY (mls_group_id, epoch),
            FOREIGN KEY (mls_group_id) REFERENCES circles(mls_group_id)
        );

        -- Kind 445 events already handled, for idempotent reprocessing
        CREATE TABLE IF NOT EXISTS processed_events (
            event_id TEXT PRIMARY KEY,
            mls_group_id BLOB NOT NULL,
            outcome TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (mls_group_id) REFERENCES circles(mls_group_id)
        );
        CREATE INDEX IF NOT EXISTS processed_events_created_at ON processed_events(created_at);

        -- Member key package events already consumed by a commit
        CREATE TABLE IF NOT EXISTS used_key_packages (
            key_package_event_id TEXT PRIMARY KEY,
            used_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn group_id_from_blob(bytes: Vec<u8>) -> Result<GroupId> {
    if bytes.is_empty() {
        return Err(StorageError::InvalidData("Empty mls_group_id".to_string()));
    }
    Ok(GroupId::from_slice(&bytes))
}
