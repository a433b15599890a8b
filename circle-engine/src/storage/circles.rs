//! Circle metadata, memberships and contacts.
//!
//! Everything here is app-level data stored only on the device.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{Result, StorageError};
use super::{group_id_from_blob, CircleStorage};
use crate::boundary::WireName;
use crate::circle::{Circle, CircleMembership, CircleType, Contact, MembershipStatus};
use crate::mls::GroupId;

const CIRCLE_COLUMNS: &str =
    "mls_group_id, nostr_group_id, display_name, circle_type, relays, created_at, updated_at";

/// Raw `circles` row before text columns are parsed.
struct CircleRow {
    mls_group_id: Vec<u8>,
    nostr_group_id: Vec<u8>,
    display_name: String,
    circle_type: String,
    relays: String,
    created_at: i64,
    updated_at: i64,
}

impl CircleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mls_group_id: row.get(0)?,
            nostr_group_id: row.get(1)?,
            display_name: row.get(2)?,
            circle_type: row.get(3)?,
            relays: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_circle(self) -> Result<Circle> {
        let nostr_group_id: [u8; 32] = self
            .nostr_group_id
            .try_into()
            .map_err(|_| StorageError::InvalidData("Invalid nostr_group_id length".to_string()))?;

        let circle_type = CircleType::from_wire_name(&self.circle_type).ok_or_else(|| {
            StorageError::InvalidData(format!("Invalid circle_type: {}", self.circle_type))
        })?;

        let relays: Vec<String> = serde_json::from_str(&self.relays)
            .map_err(|e| StorageError::InvalidData(format!("Invalid relays JSON: {e}")))?;

        Ok(Circle {
            mls_group_id: group_id_from_blob(self.mls_group_id)?,
            nostr_group_id,
            display_name: self.display_name,
            circle_type,
            relays,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(super) fn upsert_circle(conn: &Connection, circle: &Circle) -> Result<()> {
    let relays_json = serde_json::to_string(&circle.relays)
        .map_err(|e| StorageError::InvalidData(format!("Failed to serialize relays: {e}")))?;

    conn.execute(
        r"
        INSERT INTO circles (mls_group_id, nostr_group_id, display_name, circle_type, relays, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(mls_group_id) DO UPDATE SET
            nostr_group_id = excluded.nostr_group_id,
            display_name = excluded.display_name,
            circle_type = excluded.circle_type,
            relays = excluded.relays,
            updated_at = excluded.updated_at
        ",
        params![
            circle.mls_group_id.as_slice(),
            circle.nostr_group_id.as_slice(),
            circle.display_name,
            circle.circle_type.wire_name(),
            relays_json,
            circle.created_at,
            circle.updated_at,
        ],
    )?;
    Ok(())
}

pub(super) fn upsert_membership(conn: &Connection, membership: &CircleMembership) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO circle_memberships (mls_group_id, status, inviter_pubkey, invited_at, responded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(mls_group_id) DO UPDATE SET
            status = excluded.status,
            inviter_pubkey = excluded.inviter_pubkey,
            responded_at = excluded.responded_at
        ",
        params![
            membership.mls_group_id.as_slice(),
            membership.status.wire_name(),
            membership.inviter_pubkey,
            membership.invited_at,
            membership.responded_at,
        ],
    )?;
    Ok(())
}

pub(super) fn set_membership_status(
    conn: &Connection,
    mls_group_id: &GroupId,
    status: MembershipStatus,
    responded_at: i64,
) -> Result<()> {
    let rows = conn.execute(
        r"
        UPDATE circle_memberships
        SET status = ?2, responded_at = ?3
        WHERE mls_group_id = ?1
        ",
        params![
            mls_group_id.as_slice(),
            status.wire_name(),
            responded_at
        ],
    )?;

    if rows == 0 {
        return Err(StorageError::NotFound("Membership not found".to_string()));
    }
    Ok(())
}

impl CircleStorage {
    /// Saves a circle, updating it if the group id already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save_circle(&self, circle: &Circle) -> Result<()> {
        let conn = self.lock()?;
        upsert_circle(&conn, circle)
    }

    /// Retrieves a circle by its MLS group ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn get_circle(&self, mls_group_id: &GroupId) -> Result<Option<Circle>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE mls_group_id = ?1"),
            params![mls_group_id.as_slice()],
            CircleRow::read,
        )
        .optional()?
        .map(CircleRow::into_circle)
        .transpose()
    }

    /// Retrieves all circles, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn get_all_circles(&self) -> Result<Vec<Circle>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CIRCLE_COLUMNS} FROM circles ORDER BY updated_at DESC"
        ))?;

        let rows = stmt
            .query_map([], CircleRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(CircleRow::into_circle).collect()
    }

    /// Finds the joined group routed by `nostr_group_id`.
    ///
    /// Only accepted memberships match; pending and declined invitations
    /// have no group state to process messages with.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_group_by_nostr_id(&self, nostr_group_id: &[u8; 32]) -> Result<Option<GroupId>> {
        let conn = self.lock()?;
        conn.query_row(
            r"
            SELECT c.mls_group_id
            FROM circles c
            JOIN circle_memberships m ON m.mls_group_id = c.mls_group_id
            WHERE c.nostr_group_id = ?1 AND m.status = ?2
            ",
            params![
                nostr_group_id.as_slice(),
                MembershipStatus::Accepted.wire_name()
            ],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .map(group_id_from_blob)
        .transpose()
    }

    /// Deletes a circle and every row that belongs to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_circle(&self, mls_group_id: &GroupId) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = mls_group_id.as_slice();

        for table in [
            "pending_welcomes",
            "pending_commits",
            "exporter_secrets",
            "processed_events",
            "circle_memberships",
            "circles",
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE mls_group_id = ?1"), params![id])?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Saves membership state, updating it if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save_membership(&self, membership: &CircleMembership) -> Result<()> {
        let conn = self.lock()?;
        upsert_membership(&conn, membership)
    }

    /// Retrieves membership state for a circle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a row is corrupt.
    pub fn get_membership(&self, mls_group_id: &GroupId) -> Result<Option<CircleMembership>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                r"
                SELECT status, inviter_pubkey, invited_at, responded_at
                FROM circle_memberships
                WHERE mls_group_id = ?1
                ",
                params![mls_group_id.as_slice()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(status, inviter_pubkey, invited_at, responded_at)| {
            let status = MembershipStatus::from_wire_name(&status)
                .ok_or_else(|| StorageError::InvalidData(format!("Invalid status: {status}")))?;
            Ok(CircleMembership {
                mls_group_id: *mls_group_id,
                status,
                inviter_pubkey,
                invited_at,
                responded_at,
            })
        })
        .transpose()
    }

    /// Updates the membership status for a circle.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no membership exists.
    pub fn update_membership_status(
        &self,
        mls_group_id: &GroupId,
        status: MembershipStatus,
        responded_at: i64,
    ) -> Result<()> {
        let conn = self.lock()?;
        set_membership_status(&conn, mls_group_id, status, responded_at)
    }

    /// Saves a contact, updating it if the pubkey already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn save_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT INTO contacts (pubkey, display_name, avatar_path, notes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(pubkey) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_path = excluded.avatar_path,
                notes = excluded.notes,
                updated_at = excluded.updated_at
            ",
            params![
                contact.pubkey,
                contact.display_name,
                contact.avatar_path,
                contact.notes,
                contact.created_at,
                contact.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Retrieves a contact by pubkey.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_contact(&self, pubkey: &str) -> Result<Option<Contact>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                r"
                SELECT pubkey, display_name, avatar_path, notes, created_at, updated_at
                FROM contacts
                WHERE pubkey = ?1
                ",
                params![pubkey],
                read_contact,
            )
            .optional()?)
    }

    /// Retrieves all contacts ordered by display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_all_contacts(&self) -> Result<Vec<Contact>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT pubkey, display_name, avatar_path, notes, created_at, updated_at
            FROM contacts
            ORDER BY display_name ASC
            ",
        )?;
        let contacts = stmt
            .query_map([], read_contact)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    /// Deletes a contact. Deleting a missing contact is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_contact(&self, pubkey: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM contacts WHERE pubkey = ?1", params![pubkey])?;
        Ok(())
    }
}

fn read_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        pubkey: row.get(0)?,
        display_name: row.get(1)?,
        avatar_path: row.get(2)?,
        notes: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
