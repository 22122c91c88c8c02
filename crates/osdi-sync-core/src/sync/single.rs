//! One-record sync: resolve the counterpart, gate, map, write, record.
//!
//! Every attempt runs the same state machine:
//!
//! 1. resolve the target from the saved [`SyncState`] or through the
//!    [`Matcher`] (a dangling saved link is dropped and matching retried),
//! 2. check eligibility,
//! 3. map the origin onto the target and write it when something changed,
//! 4. record the outcome on the sync state.
//!
//! No per-record failure escapes: each one ends the attempt with an error
//! status on the returned [`LocalRemotePair`].

use chrono::Utc;
use std::rc::Rc;
use tracing::{debug, info, warn};

use super::eligibility::{AlwaysEligible, Eligibility, EligibilityRule};
use super::mapper::Mapper;
use super::matcher::Matcher;
use super::pair::LocalRemotePair;
use super::results::{
    Caller, EligibilityResult, EligibilityStatus, ErrorDetail, FetchMatchResult, FetchMatchStatus,
    MapStatus, MatchStatus, SaveResult, SaveStatus, StatusCode, SyncResult, SyncStatus,
};
use super::state::{SyncState, SyncStateRepository};
use crate::error::{DatabaseError, StoreError};
use crate::model::{Entity, SyncObject, SyncOrigin};
use crate::store::{ObjectStore, WriteContext};

/// How a local record went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionKind {
    /// The row is gone.
    Hard,
    /// The row is flagged deleted but kept.
    Soft,
}

pub struct SingleSyncer<E: Entity> {
    local: Rc<dyn ObjectStore<E::Local>>,
    remote: Rc<dyn ObjectStore<E::Remote>>,
    states: SyncStateRepository,
    matcher: Box<dyn Matcher<E>>,
    mapper: Box<dyn Mapper<E>>,
    eligibility: Box<dyn EligibilityRule<E>>,
    profile_id: i64,
    propagate_deletions: bool,
}

impl<E: Entity> SingleSyncer<E> {
    pub fn new(
        local: Rc<dyn ObjectStore<E::Local>>,
        remote: Rc<dyn ObjectStore<E::Remote>>,
        states: SyncStateRepository,
        matcher: impl Matcher<E> + 'static,
        mapper: impl Mapper<E> + 'static,
        profile_id: i64,
    ) -> Self {
        Self {
            local,
            remote,
            states,
            matcher: Box::new(matcher),
            mapper: Box::new(mapper),
            eligibility: Box::new(AlwaysEligible),
            profile_id,
            propagate_deletions: false,
        }
    }

    pub fn with_eligibility(mut self, rule: impl EligibilityRule<E> + 'static) -> Self {
        self.eligibility = Box::new(rule);
        self
    }

    /// Delete the remote counterpart when the local record is hard-deleted.
    pub fn propagating_deletions(mut self) -> Self {
        self.propagate_deletions = true;
        self
    }

    pub fn profile_id(&self) -> i64 {
        self.profile_id
    }

    pub fn states(&self) -> &SyncStateRepository {
        &self.states
    }

    pub fn local_store(&self) -> &Rc<dyn ObjectStore<E::Local>> {
        &self.local
    }

    pub fn remote_store(&self) -> &Rc<dyn ObjectStore<E::Remote>> {
        &self.remote
    }

    fn caller(&self, component: &'static str) -> Caller {
        Caller::new(component, E::KIND)
    }

    fn load_state(&self, side: SyncOrigin, id: &str) -> Result<SyncState, DatabaseError> {
        match side {
            SyncOrigin::Local => self.states.get_for_local(E::KIND, id, self.profile_id),
            SyncOrigin::Remote => self.states.get_for_remote(E::KIND, id, self.profile_id),
        }
    }

    /// Fetch a local record by id and sync it if it changed.
    ///
    /// # Errors
    /// Returns an error when the record cannot be fetched or does not exist.
    pub fn sync_local_id(&self, id: &str) -> Result<LocalRemotePair<E>, StoreError> {
        let local = self
            .local
            .fetch(id)?
            .ok_or_else(|| StoreError::not_found(format!("local {}", E::KIND), id))?;
        Ok(self.sync_from_local_if_needed(local))
    }

    /// Fetch a remote record by id and sync it if it changed.
    ///
    /// # Errors
    /// Returns an error when the record cannot be fetched or does not exist.
    pub fn sync_remote_id(&self, id: &str) -> Result<LocalRemotePair<E>, StoreError> {
        let remote = self
            .remote
            .fetch(id)?
            .ok_or_else(|| StoreError::not_found(format!("remote {}", E::KIND), id))?;
        Ok(self.sync_from_remote_if_needed(remote))
    }

    pub fn sync_from_local_if_needed(&self, local: E::Local) -> LocalRemotePair<E> {
        self.sync_if_needed(LocalRemotePair::new_from_local(local))
    }

    pub fn sync_from_remote_if_needed(&self, remote: E::Remote) -> LocalRemotePair<E> {
        self.sync_if_needed(LocalRemotePair::new_from_remote(remote))
    }

    /// Skip the attempt when the last successful sync already saw the
    /// origin's current modification time.
    fn sync_if_needed(&self, mut pair: LocalRemotePair<E>) -> LocalRemotePair<E> {
        let caller = self.caller("syncer");
        let origin = pair.origin;
        let Some(origin_id) = pair.origin_id().map(str::to_string) else {
            pair.push(SyncResult::new(
                SyncStatus::Error,
                "origin object has no id",
                caller,
            ));
            return pair;
        };

        let state = match self.load_state(origin, &origin_id) {
            Ok(state) => state,
            Err(err) => {
                warn!(entity = %E::KIND, %origin, id = %origin_id, error = %err, "could not load sync state");
                pair.push(
                    SyncResult::new(SyncStatus::Error, "could not load sync state", caller)
                        .with_detail(StoreError::from(err)),
                );
                return pair;
            }
        };

        let already_synced = state.is_saved()
            && !state.last_attempt_failed()
            && matches!(
                (state.post_sync_time(origin), pair.origin_modified_date()),
                (Some(post), Some(modified)) if post >= modified
            );
        pair.sync_state = Some(state);
        if already_synced {
            debug!(entity = %E::KIND, %origin, id = %origin_id, "no sync needed");
            pair.push(SyncResult::new(
                SyncStatus::NoSyncNeeded,
                "already synced",
                caller,
            ));
            return pair;
        }

        self.match_and_sync_if_eligible(&mut pair);
        pair
    }

    /// Run the full state machine on `pair`, regardless of modification times.
    pub fn match_and_sync_if_eligible(&self, pair: &mut LocalRemotePair<E>) {
        let caller = self.caller("syncer");

        let fetched = self.fetch_old_or_find_new_match(pair);
        if fetched.is_error() {
            let detail = fetched
                .detail
                .clone()
                .unwrap_or_else(|| ErrorDetail::Message(fetched.message.clone()));
            pair.push(fetched);
            pair.push(
                SyncResult::new(SyncStatus::Error, "error finding match", caller).with_detail(detail),
            );
            self.finalize(pair);
            return;
        }
        pair.push(fetched);

        let eligibility = self.get_sync_eligibility(pair);
        let status = eligibility.status;
        let message = eligibility.message.clone();
        let detail = eligibility.detail.clone();
        pair.push(eligibility);
        match status {
            EligibilityStatus::Eligible => {}
            EligibilityStatus::Ineligible => {
                pair.push(SyncResult::new(SyncStatus::NoSyncNeeded, message, caller));
                self.finalize(pair);
                return;
            }
            EligibilityStatus::Error => {
                let mut result =
                    SyncResult::new(SyncStatus::Error, "error checking eligibility", caller);
                if let Some(detail) = detail {
                    result = result.with_detail(detail);
                }
                pair.push(result);
                self.finalize(pair);
                return;
            }
        }

        let written = self.one_way_map_and_write(pair);
        pair.push(written);
        self.finalize(pair);
    }

    /// Bind the target from the saved link, or find and link a new one.
    pub fn fetch_old_or_find_new_match(&self, pair: &mut LocalRemotePair<E>) -> FetchMatchResult {
        let caller = self.caller("fetch_match");
        let origin = pair.origin;
        let target = pair.target();
        let Some(origin_id) = pair.origin_id().map(str::to_string) else {
            return FetchMatchResult::new(FetchMatchStatus::Error, "origin object has no id", caller);
        };

        let mut state = match pair.sync_state.take() {
            Some(state) => state,
            None => match self.load_state(origin, &origin_id) {
                Ok(state) => state,
                Err(err) => {
                    return FetchMatchResult::new(
                        FetchMatchStatus::Error,
                        "could not load sync state",
                        caller,
                    )
                    .with_detail(StoreError::from(err))
                }
            },
        };

        if let Some(target_id) = state.id_for(target).map(str::to_string) {
            match self.fetch_target(pair, &target_id) {
                Ok(true) => {
                    pair.sync_state = Some(state);
                    return FetchMatchResult::new(
                        FetchMatchStatus::FetchedSavedMatch,
                        "fetched saved match",
                        caller,
                    );
                }
                Ok(false) => {
                    info!(
                        entity = %E::KIND,
                        side = %target,
                        id = %target_id,
                        "saved match no longer exists, dropping link"
                    );
                    if let Err(err) = self.states.delete(&state) {
                        pair.sync_state = Some(state);
                        return FetchMatchResult::new(
                            FetchMatchStatus::Error,
                            "could not delete stale sync state",
                            caller,
                        )
                        .with_detail(StoreError::from(err));
                    }
                    state = SyncState::new(E::KIND, self.profile_id);
                    state.set_id_for(origin, Some(origin_id));
                }
                Err(err) => {
                    pair.sync_state = Some(state);
                    return FetchMatchResult::new(
                        FetchMatchStatus::Error,
                        "could not fetch saved match",
                        caller,
                    )
                    .with_detail(err);
                }
            }
        }
        pair.sync_state = Some(state);

        let matched = self.matcher.try_to_find_match_for(pair);
        let status = matched.status;
        let message = matched.message.clone();
        let detail = matched.detail.clone();
        pair.push(matched);

        match status {
            MatchStatus::FoundMatch => self.link_new_match(pair, caller),
            MatchStatus::NoMatch => {
                FetchMatchResult::new(FetchMatchStatus::NoMatchFound, "no match found", caller)
            }
            _ => {
                let mut result = FetchMatchResult::new(FetchMatchStatus::Error, message, caller);
                if let Some(detail) = detail {
                    result = result.with_detail(detail);
                }
                result
            }
        }
    }

    /// Bind the saved target. `Ok(false)` means the link dangles.
    fn fetch_target(&self, pair: &mut LocalRemotePair<E>, id: &str) -> Result<bool, StoreError> {
        match pair.target() {
            SyncOrigin::Remote => match self.remote.fetch(id) {
                Ok(Some(remote)) => {
                    pair.bind_remote(Some(remote));
                    Ok(true)
                }
                Ok(None) => Ok(false),
                Err(err) if err.is_not_found() => Ok(false),
                Err(err) => Err(err),
            },
            SyncOrigin::Local => match self.local.fetch(id) {
                Ok(Some(local)) => {
                    pair.bind_local(Some(local));
                    Ok(true)
                }
                Ok(None) => Ok(false),
                Err(err) if err.is_not_found() => Ok(false),
                Err(err) => Err(err),
            },
        }
    }

    fn unbind_target(pair: &mut LocalRemotePair<E>) {
        match pair.target() {
            SyncOrigin::Remote => pair.bind_remote(None),
            SyncOrigin::Local => pair.bind_local(None),
        }
    }

    /// Persist the link to a freshly matched target.
    ///
    /// A target already linked to another origin record is an integrity
    /// error; the target is unbound so nothing gets written.
    fn link_new_match(&self, pair: &mut LocalRemotePair<E>, caller: Caller) -> FetchMatchResult {
        let origin = pair.origin;
        let target = pair.target();
        let Some(target_id) = pair.id_for(target).map(str::to_string) else {
            Self::unbind_target(pair);
            return FetchMatchResult::new(FetchMatchStatus::Error, "matched object has no id", caller);
        };

        let existing = match target {
            SyncOrigin::Local => self.states.find_for_local(E::KIND, &target_id, self.profile_id),
            SyncOrigin::Remote => self.states.find_for_remote(E::KIND, &target_id, self.profile_id),
        };
        let conflict = match existing {
            Ok(Some(other)) if other.id_for(origin) != pair.origin_id() => Some(format!(
                "{target} {} {target_id} is already linked to {origin} {}",
                E::KIND,
                other.id_for(origin).unwrap_or("(none)")
            )),
            Ok(_) => None,
            Err(err) => {
                Self::unbind_target(pair);
                return FetchMatchResult::new(
                    FetchMatchStatus::Error,
                    "could not check existing links",
                    caller,
                )
                .with_detail(StoreError::from(err));
            }
        };
        if let Some(message) = conflict {
            warn!(entity = %E::KIND, side = %target, id = %target_id, "{message}");
            Self::unbind_target(pair);
            return FetchMatchResult::new(FetchMatchStatus::Error, message.clone(), caller)
                .with_detail(ErrorDetail::Message(message));
        }

        let saved = match pair.sync_state.as_mut() {
            Some(state) => {
                state.set_id_for(target, Some(target_id.clone()));
                state.sync_origin = Some(origin);
                let saved = self.states.save(state);
                if saved.is_err() {
                    state.set_id_for(target, None);
                }
                saved
            }
            None => Err(DatabaseError::QueryFailed("pair has no sync state".into())),
        };
        if let Err(err) = saved {
            warn!(entity = %E::KIND, side = %target, id = %target_id, error = %err, "could not record new match");
            Self::unbind_target(pair);
            return FetchMatchResult::new(
                FetchMatchStatus::Error,
                "could not record new match",
                caller,
            )
            .with_detail(StoreError::from(err));
        }

        debug!(entity = %E::KIND, %origin, side = %target, id = %target_id, "linked new match");
        FetchMatchResult::new(FetchMatchStatus::FoundNewMatch, "found new match", caller)
    }

    pub fn get_sync_eligibility(&self, pair: &LocalRemotePair<E>) -> EligibilityResult {
        let caller = self.caller("eligibility");
        match self.eligibility.check(pair) {
            Ok(Eligibility::Eligible) => {
                EligibilityResult::new(EligibilityStatus::Eligible, "eligible", caller)
            }
            Ok(Eligibility::Ineligible(reason)) => {
                EligibilityResult::new(EligibilityStatus::Ineligible, reason, caller)
            }
            Err(err) => EligibilityResult::new(
                EligibilityStatus::Error,
                "eligibility check failed",
                caller,
            )
            .with_detail(err),
        }
    }

    fn target_is_altered(pair: &LocalRemotePair<E>) -> bool {
        match pair.target() {
            SyncOrigin::Remote => pair.remote.as_ref().is_some_and(SyncObject::is_altered),
            SyncOrigin::Local => pair.local.as_ref().is_some_and(SyncObject::is_altered),
        }
    }

    /// Map the origin onto the target and write the target if it changed.
    pub fn one_way_map_and_write(&self, pair: &mut LocalRemotePair<E>) -> SyncResult {
        let caller = self.caller("syncer");

        let mapped = self.mapper.map_one_way(pair);
        let status = mapped.status;
        let message = mapped.message.clone();
        let detail = mapped.detail.clone();
        pair.push(mapped);
        match status {
            MapStatus::Success => {}
            MapStatus::SkippedAllChanges => {
                return SyncResult::new(SyncStatus::SkippedChanges, message, caller);
            }
            MapStatus::Error => {
                let mut result = SyncResult::new(SyncStatus::Error, "error mapping", caller);
                if let Some(detail) = detail {
                    result = result.with_detail(detail);
                }
                return result;
            }
        }

        let creating = !pair.target_is_loaded();
        if !creating && !Self::target_is_altered(pair) {
            return SyncResult::new(SyncStatus::NoChangesToWrite, "no changes to write", caller);
        }

        let ctx = WriteContext::sync_engine(self.profile_id);
        let saved = match pair.target() {
            SyncOrigin::Remote => match pair.remote.as_mut() {
                Some(remote) => self.remote.save(remote, &ctx),
                None => Err(StoreError::Invalid("no remote target to write".into())),
            },
            SyncOrigin::Local => match pair.local.as_mut() {
                Some(local) => self.local.save(local, &ctx),
                None => Err(StoreError::Invalid("no local target to write".into())),
            },
        };

        let save_caller = self.caller("writer");
        match saved {
            Ok(()) => {
                pair.push(SaveResult::new(SaveStatus::Success, "saved", save_caller));
                let message = if creating { "wrote new record" } else { "wrote changes" };
                SyncResult::new(SyncStatus::Success, message, caller)
            }
            Err(err) => {
                warn!(
                    entity = %E::KIND,
                    side = %pair.target(),
                    id = ?pair.id_for(pair.target()),
                    error = %err,
                    "write rejected"
                );
                pair.push(
                    SaveResult::new(SaveStatus::Error, "save failed", save_caller)
                        .with_detail(err.clone()),
                );
                SyncResult::new(SyncStatus::SaveError, "error saving", caller).with_detail(err)
            }
        }
    }

    /// Record the terminal status and both sides' modification times.
    ///
    /// A state that was never saved and links nothing is left alone.
    fn finalize(&self, pair: &mut LocalRemotePair<E>) {
        let status = pair.sync_status().unwrap_or(SyncStatus::Error);
        let origin = pair.origin;
        let local_id = pair.local_id().map(str::to_string);
        let remote_id = pair.remote_id().map(str::to_string);
        let local_pre = pair.pre_sync_modified_date(SyncOrigin::Local);
        let remote_pre = pair.pre_sync_modified_date(SyncOrigin::Remote);
        let local_post = pair.modified_date(SyncOrigin::Local);
        let remote_post = pair.modified_date(SyncOrigin::Remote);

        let Some(state) = pair.sync_state.as_mut() else {
            return;
        };
        if local_id.is_some() {
            state.local_id = local_id;
        }
        if remote_id.is_some() {
            state.remote_id = remote_id;
        }
        if !state.is_saved() && !state.is_linked() {
            debug!(entity = %E::KIND, %origin, %status, "nothing linked, sync state not recorded");
            return;
        }

        state.sync_profile_id = self.profile_id;
        state.sync_origin = Some(origin);
        state.sync_status = Some(status);
        state.sync_time = Some(Utc::now());
        state.local_pre_sync_modified_time = local_pre;
        state.local_post_sync_modified_time = local_post;
        state.remote_pre_sync_modified_time = remote_pre;
        state.remote_post_sync_modified_time = remote_post;

        let recorded = self.states.save(state);
        let (local_id, remote_id) = (state.local_id.clone(), state.remote_id.clone());
        match recorded {
            Ok(()) if status.is_error() => {
                warn!(entity = %E::KIND, %origin, ?local_id, ?remote_id, %status, "sync failed");
            }
            Ok(()) => {
                info!(entity = %E::KIND, %origin, ?local_id, ?remote_id, %status, "sync finished");
            }
            Err(err) => {
                warn!(entity = %E::KIND, %origin, ?local_id, ?remote_id, error = %err, "could not record sync state");
                pair.push(
                    SyncResult::new(
                        SyncStatus::Error,
                        "could not record sync state",
                        self.caller("syncer"),
                    )
                    .with_detail(StoreError::from(err)),
                );
            }
        }
    }

    /// React to a local record going away.
    ///
    /// Hard deletion drops the link (and, when deletions propagate, the
    /// remote counterpart first). Soft deletion keeps the link. Returns
    /// whether a link was removed.
    ///
    /// # Errors
    /// Returns an error if the remote delete or the state removal fails.
    pub fn handle_local_deletion(&self, local_id: &str, deletion: DeletionKind) -> Result<bool, StoreError> {
        if deletion == DeletionKind::Soft {
            debug!(entity = %E::KIND, local_id, "soft deletion keeps sync state");
            return Ok(false);
        }
        let Some(state) = self.states.find_for_local(E::KIND, local_id, self.profile_id)? else {
            return Ok(false);
        };

        if self.propagate_deletions {
            if let Some(remote_id) = state.remote_id.as_deref() {
                match self.remote.delete(remote_id, &WriteContext::sync_engine(self.profile_id)) {
                    Ok(()) => info!(entity = %E::KIND, local_id, remote_id, "deleted remote counterpart"),
                    Err(err) if err.is_not_found() => {
                        debug!(entity = %E::KIND, remote_id, "remote counterpart already gone")
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.states.delete(&state)?;
        Ok(true)
    }
}
