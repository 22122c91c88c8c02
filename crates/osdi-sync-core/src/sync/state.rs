//! Persisted links between local and remote records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::rc::Rc;
use tracing::debug;

use super::results::{StatusCode, SyncStatus};
use crate::error::DatabaseError;
use crate::model::{EntityKind, SyncOrigin};
use crate::storage::{format_ts, parse_ts, Database};

/// One link between a local and a remote record within a sync profile.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    /// Surrogate row id; `None` until first saved.
    pub id: Option<i64>,
    pub entity_type: EntityKind,
    pub sync_profile_id: i64,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub sync_origin: Option<SyncOrigin>,
    pub sync_status: Option<SyncStatus>,
    pub sync_time: Option<DateTime<Utc>>,
    pub local_pre_sync_modified_time: Option<DateTime<Utc>>,
    pub local_post_sync_modified_time: Option<DateTime<Utc>>,
    pub remote_pre_sync_modified_time: Option<DateTime<Utc>>,
    pub remote_post_sync_modified_time: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(entity_type: EntityKind, sync_profile_id: i64) -> Self {
        Self {
            id: None,
            entity_type,
            sync_profile_id,
            local_id: None,
            remote_id: None,
            sync_origin: None,
            sync_status: None,
            sync_time: None,
            local_pre_sync_modified_time: None,
            local_post_sync_modified_time: None,
            remote_pre_sync_modified_time: None,
            remote_post_sync_modified_time: None,
        }
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Both sides are known.
    pub fn is_linked(&self) -> bool {
        self.local_id.is_some() && self.remote_id.is_some()
    }

    pub fn id_for(&self, side: SyncOrigin) -> Option<&str> {
        match side {
            SyncOrigin::Local => self.local_id.as_deref(),
            SyncOrigin::Remote => self.remote_id.as_deref(),
        }
    }

    pub fn set_id_for(&mut self, side: SyncOrigin, id: Option<String>) {
        match side {
            SyncOrigin::Local => self.local_id = id,
            SyncOrigin::Remote => self.remote_id = id,
        }
    }

    pub fn post_sync_time(&self, side: SyncOrigin) -> Option<DateTime<Utc>> {
        match side {
            SyncOrigin::Local => self.local_post_sync_modified_time,
            SyncOrigin::Remote => self.remote_post_sync_modified_time,
        }
    }

    /// The last attempt ended in an error status.
    pub fn last_attempt_failed(&self) -> bool {
        self.sync_status.is_some_and(|s| s.is_error())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let entity: String = row.get(1)?;
        let origin: Option<String> = row.get(5)?;
        let status: Option<String> = row.get(6)?;
        let ts = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
            Ok(row.get::<_, Option<String>>(idx)?.as_deref().and_then(parse_ts))
        };
        Ok(Self {
            id: Some(row.get(0)?),
            entity_type: entity.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
            })?,
            sync_profile_id: row.get(2)?,
            local_id: row.get(3)?,
            remote_id: row.get(4)?,
            sync_origin: origin.and_then(|o| o.parse().ok()),
            sync_status: status.as_deref().and_then(SyncStatus::parse),
            sync_time: ts(7)?,
            local_pre_sync_modified_time: ts(8)?,
            local_post_sync_modified_time: ts(9)?,
            remote_pre_sync_modified_time: ts(10)?,
            remote_post_sync_modified_time: ts(11)?,
        })
    }
}

const SELECT: &str = "SELECT id, entity_type, sync_profile_id, local_id, remote_id, sync_origin,
        sync_status, sync_time, local_pre_sync_modified_time, local_post_sync_modified_time,
        remote_pre_sync_modified_time, remote_post_sync_modified_time
    FROM sync_state";

/// Lookups and writes for [`SyncState`] rows.
#[derive(Clone)]
pub struct SyncStateRepository {
    db: Rc<Database>,
}

impl SyncStateRepository {
    pub fn new(db: Rc<Database>) -> Self {
        Self { db }
    }

    fn find_one(
        &self,
        column: &str,
        kind: EntityKind,
        id: &str,
        profile_id: i64,
    ) -> Result<Option<SyncState>, DatabaseError> {
        let sql = format!("{SELECT} WHERE entity_type = ?1 AND {column} = ?2 AND sync_profile_id = ?3");
        let state = self
            .db
            .conn()
            .query_row(&sql, params![kind.as_str(), id, profile_id], SyncState::from_row)
            .optional()?;
        Ok(state)
    }

    pub fn find_for_local(
        &self,
        kind: EntityKind,
        local_id: &str,
        profile_id: i64,
    ) -> Result<Option<SyncState>, DatabaseError> {
        self.find_one("local_id", kind, local_id, profile_id)
    }

    pub fn find_for_remote(
        &self,
        kind: EntityKind,
        remote_id: &str,
        profile_id: i64,
    ) -> Result<Option<SyncState>, DatabaseError> {
        self.find_one("remote_id", kind, remote_id, profile_id)
    }

    /// The saved state for a local id, or a fresh unsaved one carrying it.
    pub fn get_for_local(
        &self,
        kind: EntityKind,
        local_id: &str,
        profile_id: i64,
    ) -> Result<SyncState, DatabaseError> {
        Ok(self
            .find_for_local(kind, local_id, profile_id)?
            .unwrap_or_else(|| {
                let mut state = SyncState::new(kind, profile_id);
                state.local_id = Some(local_id.to_string());
                state
            }))
    }

    /// The saved state for a remote id, or a fresh unsaved one carrying it.
    pub fn get_for_remote(
        &self,
        kind: EntityKind,
        remote_id: &str,
        profile_id: i64,
    ) -> Result<SyncState, DatabaseError> {
        Ok(self
            .find_for_remote(kind, remote_id, profile_id)?
            .unwrap_or_else(|| {
                let mut state = SyncState::new(kind, profile_id);
                state.remote_id = Some(remote_id.to_string());
                state
            }))
    }

    pub fn remote_id_for_local(
        &self,
        kind: EntityKind,
        local_id: &str,
        profile_id: i64,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .find_for_local(kind, local_id, profile_id)?
            .and_then(|s| s.remote_id))
    }

    pub fn local_id_for_remote(
        &self,
        kind: EntityKind,
        remote_id: &str,
        profile_id: i64,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .find_for_remote(kind, remote_id, profile_id)?
            .and_then(|s| s.local_id))
    }

    /// Insert or update. A second link for an already-linked id surfaces as
    /// [`DatabaseError::Conflict`].
    pub fn save(&self, state: &mut SyncState) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        let ts = |t: Option<DateTime<Utc>>| t.map(format_ts);
        let origin = state.sync_origin.map(|o| o.as_str());
        let status = state.sync_status.map(|s| s.as_str());
        let times = [
            ts(state.sync_time),
            ts(state.local_pre_sync_modified_time),
            ts(state.local_post_sync_modified_time),
            ts(state.remote_pre_sync_modified_time),
            ts(state.remote_post_sync_modified_time),
        ];

        match state.id {
            Some(id) => {
                conn.execute(
                    "UPDATE sync_state SET entity_type = ?1, sync_profile_id = ?2, local_id = ?3,
                        remote_id = ?4, sync_origin = ?5, sync_status = ?6, sync_time = ?7,
                        local_pre_sync_modified_time = ?8, local_post_sync_modified_time = ?9,
                        remote_pre_sync_modified_time = ?10, remote_post_sync_modified_time = ?11
                     WHERE id = ?12",
                    params![
                        state.entity_type.as_str(),
                        state.sync_profile_id,
                        state.local_id,
                        state.remote_id,
                        origin,
                        status,
                        times[0],
                        times[1],
                        times[2],
                        times[3],
                        times[4],
                        id,
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO sync_state (entity_type, sync_profile_id, local_id, remote_id,
                        sync_origin, sync_status, sync_time, local_pre_sync_modified_time,
                        local_post_sync_modified_time, remote_pre_sync_modified_time,
                        remote_post_sync_modified_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        state.entity_type.as_str(),
                        state.sync_profile_id,
                        state.local_id,
                        state.remote_id,
                        origin,
                        status,
                        times[0],
                        times[1],
                        times[2],
                        times[3],
                        times[4],
                    ],
                )?;
                state.id = Some(conn.last_insert_rowid());
            }
        }
        debug!(
            entity = %state.entity_type,
            local_id = ?state.local_id,
            remote_id = ?state.remote_id,
            "saved sync state"
        );
        Ok(())
    }

    /// Delete a saved state. Unsaved states are ignored.
    pub fn delete(&self, state: &SyncState) -> Result<bool, DatabaseError> {
        match state.id {
            Some(id) => Ok(self
                .db
                .conn()
                .execute("DELETE FROM sync_state WHERE id = ?1", params![id])?
                > 0),
            None => Ok(false),
        }
    }

    pub fn delete_for_local(
        &self,
        kind: EntityKind,
        local_id: &str,
        profile_id: i64,
    ) -> Result<bool, DatabaseError> {
        let removed = self.db.conn().execute(
            "DELETE FROM sync_state WHERE entity_type = ?1 AND local_id = ?2 AND sync_profile_id = ?3",
            params![kind.as_str(), local_id, profile_id],
        )?;
        Ok(removed > 0)
    }

    /// All states of one entity type and profile, by row id.
    pub fn list(&self, kind: EntityKind, profile_id: i64) -> Result<Vec<SyncState>, DatabaseError> {
        let mut stmt = self.db.conn().prepare(&format!(
            "{SELECT} WHERE entity_type = ?1 AND sync_profile_id = ?2 ORDER BY id"
        ))?;
        let states = stmt
            .query_map(params![kind.as_str(), profile_id], SyncState::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }

    pub fn count(&self, kind: EntityKind, profile_id: i64) -> Result<usize, DatabaseError> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM sync_state WHERE entity_type = ?1 AND sync_profile_id = ?2",
            params![kind.as_str(), profile_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repo() -> SyncStateRepository {
        SyncStateRepository::new(Rc::new(Database::open_memory().unwrap()))
    }

    #[test]
    fn get_returns_fresh_state_when_absent() {
        let repo = repo();
        let state = repo.get_for_local(EntityKind::Person, "7", 1).unwrap();
        assert!(!state.is_saved());
        assert_eq!(state.local_id.as_deref(), Some("7"));
        assert!(state.remote_id.is_none());
    }

    #[test]
    fn save_then_lookup_both_ways() {
        let repo = repo();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut state = SyncState::new(EntityKind::Person, 1);
        state.local_id = Some("7".into());
        state.remote_id = Some("abc".into());
        state.sync_origin = Some(SyncOrigin::Local);
        state.sync_status = Some(SyncStatus::Success);
        state.local_post_sync_modified_time = Some(at);
        repo.save(&mut state).unwrap();
        assert!(state.is_saved());

        let by_remote = repo.get_for_remote(EntityKind::Person, "abc", 1).unwrap();
        assert_eq!(by_remote, state);
        assert_eq!(
            repo.remote_id_for_local(EntityKind::Person, "7", 1).unwrap().as_deref(),
            Some("abc")
        );
        assert!(repo.find_for_local(EntityKind::Person, "7", 2).unwrap().is_none());
        assert!(repo.find_for_local(EntityKind::Tag, "7", 1).unwrap().is_none());
    }

    #[test]
    fn update_keeps_single_row() {
        let repo = repo();
        let mut state = SyncState::new(EntityKind::Tag, 1);
        state.local_id = Some("1".into());
        repo.save(&mut state).unwrap();
        state.remote_id = Some("r1".into());
        state.sync_status = Some(SyncStatus::SaveError);
        repo.save(&mut state).unwrap();

        assert_eq!(repo.count(EntityKind::Tag, 1).unwrap(), 1);
        let loaded = repo.get_for_local(EntityKind::Tag, "1", 1).unwrap();
        assert!(loaded.last_attempt_failed());
    }

    #[test]
    fn second_link_for_same_local_is_conflict() {
        let repo = repo();
        let mut first = SyncState::new(EntityKind::Person, 1);
        first.local_id = Some("7".into());
        first.remote_id = Some("a".into());
        repo.save(&mut first).unwrap();

        let mut second = SyncState::new(EntityKind::Person, 1);
        second.local_id = Some("7".into());
        second.remote_id = Some("b".into());
        assert!(matches!(repo.save(&mut second), Err(DatabaseError::Conflict(_))));
        assert!(!second.is_saved());
    }

    #[test]
    fn delete_removes_row() {
        let repo = repo();
        let mut state = SyncState::new(EntityKind::Person, 1);
        state.local_id = Some("7".into());
        repo.save(&mut state).unwrap();
        assert!(repo.delete(&state).unwrap());
        assert!(!repo.delete(&SyncState::new(EntityKind::Person, 1)).unwrap());

        repo.save(&mut SyncState { id: None, ..state }).unwrap();
        assert!(repo.delete_for_local(EntityKind::Person, "7", 1).unwrap());
        assert_eq!(repo.count(EntityKind::Person, 1).unwrap(), 0);
    }
}
