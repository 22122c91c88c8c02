//! Cursor threading one sync attempt through match, map and write.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::results::{ErrorDetail, ResultStack, StageResult, StatusCode, SyncStatus};
use super::state::SyncState;
use crate::model::{Entity, EntityKind, SyncObject, SyncOrigin};

/// One local/remote pairing under construction.
///
/// The origin object is always present; the target is bound by the saved
/// sync state, by the matcher, or created by the mapper.
#[derive(Debug, Clone)]
pub struct LocalRemotePair<E: Entity> {
    pub local: Option<E::Local>,
    pub remote: Option<E::Remote>,
    pub origin: SyncOrigin,
    pub sync_state: Option<SyncState>,
    pub results: ResultStack,
    local_pre_sync: Option<DateTime<Utc>>,
    remote_pre_sync: Option<DateTime<Utc>>,
}

impl<E: Entity> LocalRemotePair<E> {
    pub fn new_from_local(local: E::Local) -> Self {
        Self {
            local_pre_sync: local.modified_date(),
            local: Some(local),
            remote: None,
            origin: SyncOrigin::Local,
            sync_state: None,
            results: ResultStack::default(),
            remote_pre_sync: None,
        }
    }

    pub fn new_from_remote(remote: E::Remote) -> Self {
        Self {
            remote_pre_sync: remote.modified_date(),
            remote: Some(remote),
            local: None,
            origin: SyncOrigin::Remote,
            sync_state: None,
            results: ResultStack::default(),
            local_pre_sync: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    pub fn target(&self) -> SyncOrigin {
        self.origin.opposite()
    }

    /// Bind the local object, remembering its modification time as found.
    pub fn bind_local(&mut self, local: Option<E::Local>) {
        self.local_pre_sync = local.as_ref().and_then(SyncObject::modified_date);
        self.local = local;
    }

    pub fn bind_remote(&mut self, remote: Option<E::Remote>) {
        self.remote_pre_sync = remote.as_ref().and_then(SyncObject::modified_date);
        self.remote = remote;
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local.as_ref().and_then(SyncObject::id)
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote.as_ref().and_then(SyncObject::id)
    }

    pub fn id_for(&self, side: SyncOrigin) -> Option<&str> {
        match side {
            SyncOrigin::Local => self.local_id(),
            SyncOrigin::Remote => self.remote_id(),
        }
    }

    pub fn origin_id(&self) -> Option<&str> {
        self.id_for(self.origin)
    }

    pub fn has_target(&self) -> bool {
        match self.target() {
            SyncOrigin::Local => self.local.is_some(),
            SyncOrigin::Remote => self.remote.is_some(),
        }
    }

    /// Whether the target exists in its store (as opposed to being staged
    /// for creation).
    pub fn target_is_loaded(&self) -> bool {
        self.id_for(self.target()).is_some()
    }

    pub fn modified_date(&self, side: SyncOrigin) -> Option<DateTime<Utc>> {
        match side {
            SyncOrigin::Local => self.local.as_ref().and_then(SyncObject::modified_date),
            SyncOrigin::Remote => self.remote.as_ref().and_then(SyncObject::modified_date),
        }
    }

    pub fn origin_modified_date(&self) -> Option<DateTime<Utc>> {
        self.modified_date(self.origin)
    }

    /// Modification time of one side when it was bound to this pair.
    pub fn pre_sync_modified_date(&self, side: SyncOrigin) -> Option<DateTime<Utc>> {
        match side {
            SyncOrigin::Local => self.local_pre_sync,
            SyncOrigin::Remote => self.remote_pre_sync,
        }
    }

    pub fn push(&mut self, result: impl Into<StageResult>) {
        self.results.push(result);
    }

    /// Terminal status of the attempt, once it has one.
    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.results.last_sync().map(|r| r.status)
    }

    pub fn is_error(&self) -> bool {
        self.results.last_sync().is_some_and(|r| r.is_error())
            || self.results.last().is_some_and(StageResult::is_error)
    }

    pub fn message(&self) -> &str {
        self.results
            .last_sync()
            .map(|r| r.message.as_str())
            .or_else(|| self.results.last().map(StageResult::message))
            .unwrap_or("")
    }

    /// The most specific error detail recorded by any stage.
    pub fn detail(&self) -> Option<&ErrorDetail> {
        self.results.last_detail()
    }

    pub fn report(&self) -> SyncReport {
        SyncReport {
            kind: E::KIND,
            origin: self.origin,
            local_id: self.local_id().map(str::to_string),
            remote_id: self.remote_id().map(str::to_string),
            status: self.sync_status().unwrap_or(SyncStatus::Error),
            message: self.message().to_string(),
            detail: self.detail().map(ToString::to_string),
            origin_modified: self.origin_modified_date(),
        }
    }
}

/// Entity-independent summary of one finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub kind: EntityKind,
    pub origin: SyncOrigin,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub status: SyncStatus,
    pub message: String,
    pub detail: Option<String>,
    /// Origin modification time the attempt worked from.
    pub origin_modified: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LocalTag, RemoteTag};
    use crate::sync::results::{Caller, SyncResult};
    use chrono::TimeZone;

    struct TagEntity;

    impl Entity for TagEntity {
        const KIND: EntityKind = EntityKind::Tag;
        type Local = LocalTag;
        type Remote = RemoteTag;
    }

    fn loaded_tag(id: &str, at: DateTime<Utc>) -> LocalTag {
        let mut tag = LocalTag::new("volunteer");
        tag.set_id(id.into());
        tag.set_modified_date(at);
        tag.mark_saved();
        tag
    }

    #[test]
    fn pair_from_local_has_no_target() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let pair: LocalRemotePair<TagEntity> = LocalRemotePair::new_from_local(loaded_tag("3", at));
        assert_eq!(pair.origin, SyncOrigin::Local);
        assert_eq!(pair.target(), SyncOrigin::Remote);
        assert_eq!(pair.origin_id(), Some("3"));
        assert!(!pair.has_target());
        assert_eq!(pair.pre_sync_modified_date(SyncOrigin::Local), Some(at));
        assert!(!pair.is_error());
    }

    #[test]
    fn report_carries_terminal_status() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut pair: LocalRemotePair<TagEntity> =
            LocalRemotePair::new_from_local(loaded_tag("3", at));
        pair.push(SyncResult::new(
            SyncStatus::SkippedChanges,
            "remote tags cannot be renamed",
            Caller::new("mapper", EntityKind::Tag),
        ));

        let report = pair.report();
        assert_eq!(report.status, SyncStatus::SkippedChanges);
        assert_eq!(report.local_id.as_deref(), Some("3"));
        assert_eq!(report.origin_modified, Some(at));
        assert!(!report.is_error());
        assert_eq!(pair.message(), "remote tags cannot be renamed");
    }
}
