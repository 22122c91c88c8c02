//! Turns committed local writes into queued sync tasks.

use tracing::warn;

use super::queue::{QueueOperation, TaskQueue};
use crate::store::{ChangeKind, ChangeListener, LocalChange, WriteContext};

/// Enqueues a task for every user write to the local CRM.
///
/// Writes made by the sync engine are ignored so a synced record does not
/// bounce straight back to the remote.
pub struct QueueingListener {
    queue: TaskQueue,
}

impl QueueingListener {
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }
}

impl ChangeListener for QueueingListener {
    fn on_local_change(&self, change: &LocalChange, ctx: &WriteContext) {
        if ctx.is_sync_engine() {
            return;
        }
        let operation = match change.change {
            ChangeKind::Created | ChangeKind::Updated => QueueOperation::Sync,
            ChangeKind::Deleted => QueueOperation::Delete,
        };
        if let Err(e) = self.queue.enqueue(change.kind, &change.local_id, operation) {
            warn!(
                entity = %change.kind,
                local_id = %change.local_id,
                %operation,
                error = %e,
                "could not queue local change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, EntityKind};
    use crate::storage::Database;
    use crate::store::{LocalCrm, ObjectStore};
    use chrono::{Duration, Utc};
    use std::rc::Rc;

    fn setup() -> (LocalCrm, TaskQueue) {
        let db = Rc::new(Database::open_memory().unwrap());
        let queue = TaskQueue::new(Rc::clone(&db), Duration::zero());
        let crm = LocalCrm::new(db);
        crm.set_listener(Rc::new(QueueingListener::new(queue.clone())));
        (crm, queue)
    }

    #[test]
    fn user_writes_are_queued() {
        let (crm, queue) = setup();
        let mut contact = Contact::new("Ada", "Lovelace", "ada@example.org");
        crm.save(&mut contact, &WriteContext::user()).unwrap();
        contact.first_name.set(Some("Augusta".into()));
        crm.save(&mut contact, &WriteContext::user()).unwrap();

        let ready = queue.drain_ready_at(10, Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].kind, EntityKind::Person);
        assert_eq!(ready[0].operation, QueueOperation::Sync);
    }

    #[test]
    fn engine_writes_are_ignored() {
        let (crm, queue) = setup();
        let mut contact = Contact::new("Ada", "Lovelace", "ada@example.org");
        crm.save(&mut contact, &WriteContext::sync_engine(1)).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn deletes_queue_a_delete_task() {
        let (crm, queue) = setup();
        let mut contact = Contact::new("Ada", "Lovelace", "ada@example.org");
        crm.save(&mut contact, &WriteContext::sync_engine(1)).unwrap();
        let id = contact.id.clone().unwrap();
        ObjectStore::<Contact>::delete(&crm, &id, &WriteContext::user()).unwrap();

        let ready = queue.drain_ready_at(10, Utc::now() + Duration::seconds(1)).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].operation, QueueOperation::Delete);
        assert_eq!(ready[0].local_id, id);
    }
}
