//! Process-wide persisted settings: batch horizons and run locks.
//!
//! Both live in the `kv` table as JSON so that several processes sharing one
//! database file see the same bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

use super::Database;
use crate::error::{CoreError, DatabaseError};
use crate::model::{EntityKind, SyncOrigin};

/// Marker written by a batch or queue run.
///
/// A marker with no `ended_at` means the run is in progress (or crashed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessLock {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ProcessLock {
    pub fn start(pid: u32, at: DateTime<Utc>) -> Self {
        Self {
            pid,
            started_at: at,
            ended_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }
}

/// Horizon bookkeeping for one (entity, direction) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonMark {
    /// Start time of the last completed run.
    pub last_run_started: Option<DateTime<Utc>>,
    /// Latest origin modification time that synced without error.
    pub latest_synced: Option<DateTime<Utc>>,
}

impl HorizonMark {
    /// Cutoff for the next run, `None` meaning "scan everything".
    pub fn horizon(&self, margin: Duration) -> Option<DateTime<Utc>> {
        self.latest_synced
            .or(self.last_run_started)
            .map(|at| at - margin)
    }

    /// Mark to persist after a run that started at `run_started`.
    pub fn advance(&self, run_started: DateTime<Utc>, latest: Option<DateTime<Utc>>) -> Self {
        let latest_synced = match (self.latest_synced, latest) {
            (Some(prev), Some(new)) => Some(prev.max(new)),
            (prev, new) => new.or(prev),
        };
        Self {
            last_run_started: Some(run_started),
            latest_synced,
        }
    }
}

/// Names of the process locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockName {
    Batch,
    Queue,
}

impl LockName {
    pub fn key(&self) -> &'static str {
        match self {
            LockName::Batch => "lock.batch",
            LockName::Queue => "lock.queue",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::Batch => "batch",
            LockName::Queue => "queue",
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    db: Rc<Database>,
}

impl Settings {
    pub fn new(db: Rc<Database>) -> Self {
        Self { db }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CoreError> {
        match self.db.kv_get(key)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(DatabaseError::CorruptValue {
                    key: key.to_string(),
                    value: raw,
                }
                .into()),
            },
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CoreError> {
        let raw = serde_json::to_string(value)?;
        self.db.kv_set(key, &raw)?;
        Ok(())
    }

    pub fn lock(&self, name: LockName) -> Result<Option<ProcessLock>, CoreError> {
        self.get_json(name.key())
    }

    pub fn set_lock(&self, name: LockName, lock: &ProcessLock) -> Result<(), CoreError> {
        self.set_json(name.key(), lock)
    }

    pub fn clear_lock(&self, name: LockName) -> Result<bool, DatabaseError> {
        self.db.kv_delete(name.key())
    }

    fn horizon_key(kind: EntityKind, direction: SyncOrigin) -> String {
        format!("horizon.{}.{}", kind.as_str(), direction.as_str())
    }

    pub fn horizon(&self, kind: EntityKind, direction: SyncOrigin) -> Result<HorizonMark, CoreError> {
        Ok(self
            .get_json(&Self::horizon_key(kind, direction))?
            .unwrap_or_default())
    }

    pub fn set_horizon(
        &self,
        kind: EntityKind,
        direction: SyncOrigin,
        mark: &HorizonMark,
    ) -> Result<(), CoreError> {
        self.set_json(&Self::horizon_key(kind, direction), mark)
    }

    /// Forget one horizon so the next pass scans every record.
    pub fn reset_horizon(&self, kind: EntityKind, direction: SyncOrigin) -> Result<bool, DatabaseError> {
        self.db.kv_delete(&Self::horizon_key(kind, direction))
    }
}
