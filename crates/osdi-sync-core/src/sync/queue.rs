//! Persistent queue of reactive sync tasks with debounce.
//!
//! Local writes enqueue a task per record; a burst of writes to the same
//! record collapses into one task whose ready time keeps moving forward.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::lock::{self, ProcessProbe, SystemProbe};
use super::registry::{EntitySync, Registry, SyncContext};
use super::single::DeletionKind;
use crate::error::{CoreError, DatabaseError};
use crate::model::EntityKind;
use crate::storage::{format_ts, parse_ts, Config, Database, LockName, Settings};

/// Failed tasks are retried until this many attempts.
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Sync,
    Delete,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Sync => "sync",
            QueueOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(QueueOperation::Sync),
            "delete" => Ok(QueueOperation::Delete),
            _ => Err(format!("Unknown queue operation: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub id: i64,
    pub kind: EntityKind,
    pub local_id: String,
    pub operation: QueueOperation,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub ready_at: DateTime<Utc>,
}

impl QueuedTask {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let conversion = |idx: usize, message: String| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
        };
        let kind: String = row.get(1)?;
        let operation: String = row.get(3)?;
        let ready_at: String = row.get(6)?;
        Ok(Self {
            id: row.get(0)?,
            kind: kind.parse().map_err(|e| conversion(1, e))?,
            local_id: row.get(2)?,
            operation: operation.parse().map_err(|e| conversion(3, e))?,
            attempts: row.get(4)?,
            last_error: row.get(5)?,
            ready_at: parse_ts(&ready_at)
                .ok_or_else(|| conversion(6, format!("bad timestamp '{ready_at}'")))?,
        })
    }
}

const SELECT: &str =
    "SELECT id, entity_type, local_id, operation, attempts, last_error, ready_at FROM sync_queue";

#[derive(Clone)]
pub struct TaskQueue {
    db: Rc<Database>,
    debounce: Duration,
}

impl TaskQueue {
    pub fn new(db: Rc<Database>, debounce: Duration) -> Self {
        Self { db, debounce }
    }

    /// Queue a task, or push back the ready time of an identical pending one.
    ///
    /// A deletion supersedes pending syncs of the same record.
    pub fn enqueue(
        &self,
        kind: EntityKind,
        local_id: &str,
        operation: QueueOperation,
    ) -> Result<i64, DatabaseError> {
        self.enqueue_at(kind, local_id, operation, Utc::now())
    }

    pub fn enqueue_at(
        &self,
        kind: EntityKind,
        local_id: &str,
        operation: QueueOperation,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.db.conn();
        let ready_at = format_ts(now + self.debounce);
        let stamp = format_ts(now);

        if operation == QueueOperation::Delete {
            conn.execute(
                "DELETE FROM sync_queue
                 WHERE entity_type = ?1 AND local_id = ?2 AND operation = 'sync' AND status = 'pending'",
                params![kind.as_str(), local_id],
            )?;
        }

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM sync_queue
                 WHERE entity_type = ?1 AND local_id = ?2 AND operation = ?3 AND status = 'pending'",
                params![kind.as_str(), local_id, operation.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE sync_queue SET ready_at = ?1, updated_at = ?2 WHERE id = ?3",
                    params![ready_at, stamp, id],
                )?;
                debug!(entity = %kind, local_id, %operation, "debounced queued task");
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO sync_queue (entity_type, local_id, operation, ready_at, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![kind.as_str(), local_id, operation.as_str(), ready_at, stamp],
                )?;
                debug!(entity = %kind, local_id, %operation, "queued task");
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Up to `limit` pending tasks whose debounce has elapsed, oldest first.
    pub fn drain_ready(&self, limit: usize) -> Result<Vec<QueuedTask>, DatabaseError> {
        self.drain_ready_at(limit, Utc::now())
    }

    pub fn drain_ready_at(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<QueuedTask>, DatabaseError> {
        let mut stmt = self.db.conn().prepare(&format!(
            "{SELECT} WHERE status = 'pending' AND ready_at <= ?1 ORDER BY ready_at, id LIMIT ?2"
        ))?;
        let tasks = stmt
            .query_map(params![format_ts(now), limit as i64], QueuedTask::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    pub fn complete(&self, id: i64) -> Result<(), DatabaseError> {
        self.db
            .conn()
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Record a failed attempt. The task is retried with a growing delay
    /// until [`MAX_ATTEMPTS`], then parked as failed.
    pub fn fail(&self, id: i64, message: &str) -> Result<(), DatabaseError> {
        let conn = self.db.conn();
        let attempts: u32 = conn.query_row(
            "SELECT attempts FROM sync_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let attempts = attempts + 1;
        let now = Utc::now();
        let status = if attempts >= MAX_ATTEMPTS { "failed" } else { "pending" };
        let retry_at = now + self.debounce + Duration::seconds(30 * i64::from(attempts));
        conn.execute(
            "UPDATE sync_queue
             SET attempts = ?1, last_error = ?2, status = ?3, ready_at = ?4, updated_at = ?5
             WHERE id = ?6",
            params![attempts, message, status, format_ts(retry_at), format_ts(now), id],
        )?;
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self.db.conn().query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Tasks that ran out of attempts.
    pub fn failed(&self) -> Result<Vec<QueuedTask>, DatabaseError> {
        let mut stmt = self
            .db
            .conn()
            .prepare(&format!("{SELECT} WHERE status = 'failed' ORDER BY id"))?;
        let tasks = stmt
            .query_map([], QueuedTask::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }
}

/// Runs ready queue tasks under the queue lock.
pub struct QueueProcessor {
    queue: TaskQueue,
    settings: Settings,
    syncers: BTreeMap<EntityKind, Box<dyn EntitySync>>,
    probe: Box<dyn ProcessProbe>,
    batch_size: usize,
    stale_lock_after: Duration,
}

impl QueueProcessor {
    pub fn new(queue: TaskQueue, settings: Settings, syncers: Vec<Box<dyn EntitySync>>) -> Self {
        Self {
            queue,
            settings,
            syncers: syncers.into_iter().map(|s| (s.kind(), s)).collect(),
            probe: Box::new(SystemProbe),
            batch_size: 50,
            stale_lock_after: Duration::hours(1),
        }
    }

    pub fn from_config(config: &Config, ctx: &SyncContext, registry: &Registry) -> Result<Self, CoreError> {
        let kinds = config.sync.enabled_kinds()?;
        let syncers = registry.build_all(&kinds, ctx)?;
        let queue = TaskQueue::new(Rc::clone(&ctx.db), config.debounce());
        Ok(Self::new(queue, Settings::new(Rc::clone(&ctx.db)), syncers)
            .with_batch_size(config.queue.batch_size)
            .with_stale_lock_after(config.stale_lock_after()))
    }

    pub fn with_probe(mut self, probe: impl ProcessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Process ready tasks. Returns `None` when another process holds the
    /// queue lock, otherwise the number of tasks completed.
    pub fn process_queue(&self) -> Result<Option<usize>, CoreError> {
        let Some(held) =
            lock::try_acquire(&self.settings, LockName::Queue, self.probe.as_ref(), self.stale_lock_after)?
        else {
            return Ok(None);
        };

        let outcome = self.process_ready();
        let released = lock::release(&self.settings, LockName::Queue, held);
        let done = outcome?;
        released?;
        Ok(Some(done))
    }

    fn process_ready(&self) -> Result<usize, CoreError> {
        let tasks = self.queue.drain_ready(self.batch_size)?;
        let mut done = 0;
        for task in tasks {
            match self.run_task(&task) {
                Ok(()) => {
                    self.queue.complete(task.id)?;
                    done += 1;
                }
                Err(message) => {
                    warn!(
                        entity = %task.kind,
                        local_id = %task.local_id,
                        operation = %task.operation,
                        attempt = task.attempts + 1,
                        "{message}"
                    );
                    self.queue.fail(task.id, &message)?;
                }
            }
        }
        if done > 0 {
            info!(done, "processed queued tasks");
        }
        Ok(done)
    }

    fn run_task(&self, task: &QueuedTask) -> Result<(), String> {
        let syncer = self
            .syncers
            .get(&task.kind)
            .ok_or_else(|| format!("entity type '{}' is not enabled", task.kind))?;

        match task.operation {
            QueueOperation::Sync => match syncer.sync_local_id(&task.local_id) {
                Ok(report) if report.is_error() => Err(match &report.detail {
                    Some(detail) => format!("{}: {detail}", report.message),
                    None => report.message,
                }),
                Ok(report) => {
                    debug!(entity = %task.kind, local_id = %task.local_id, status = %report.status, "queued sync done");
                    Ok(())
                }
                Err(err) if err.is_not_found() => {
                    debug!(entity = %task.kind, local_id = %task.local_id, "record gone before sync");
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            },
            QueueOperation::Delete => syncer
                .handle_local_deletion(&task.local_id, DeletionKind::Hard)
                .map(|_| ())
                .map_err(|err| err.to_string()),
        }
    }
}
