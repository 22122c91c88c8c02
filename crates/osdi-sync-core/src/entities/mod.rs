//! Per-entity matching, mapping and eligibility.
//!
//! Each submodule pairs one local record type with its OSDI resource and
//! provides the factory the [`Registry`](crate::sync::Registry) uses to
//! build its syncer.

pub mod donation;
pub mod person;
pub mod tag;
pub mod tagging;

pub use donation::Donation;
pub use person::Person;
pub use tag::Tag;
pub use tagging::Tagging;

use std::rc::Rc;

use crate::error::{MapError, MatchError};
use crate::model::{Entity, EntityKind};
use crate::store::local_crm::LocalRecord;
use crate::store::{ObjectStore, RemoteStore};
use crate::sync::registry::{SyncContext, SyncerFactory};
use crate::sync::state::SyncStateRepository;

/// Factory for the built-in syncer of `kind`.
pub fn factory_for(kind: EntityKind) -> SyncerFactory {
    match kind {
        EntityKind::Person => person::syncer,
        EntityKind::Tag => tag::syncer,
        EntityKind::Tagging => tagging::syncer,
        EntityKind::Donation => donation::syncer,
    }
}

pub type LocalStore<E> = Rc<dyn ObjectStore<<E as Entity>::Local>>;
pub type RemoteObjects<E> = Rc<dyn ObjectStore<<E as Entity>::Remote>>;

pub(crate) fn stores<E>(ctx: &SyncContext) -> (LocalStore<E>, RemoteObjects<E>)
where
    E: Entity,
    E::Local: LocalRecord,
{
    let local: LocalStore<E> = ctx.local.clone();
    let remote: RemoteObjects<E> = Rc::new(RemoteStore::<E::Remote>::new(Rc::clone(&ctx.remote)));
    (local, remote)
}

/// Translates ids of already-synced records between the two sides.
#[derive(Clone)]
pub(crate) struct IdTranslator {
    states: SyncStateRepository,
    profile_id: i64,
}

impl IdTranslator {
    pub(crate) fn new(ctx: &SyncContext) -> Self {
        Self {
            states: ctx.states(),
            profile_id: ctx.profile_id,
        }
    }

    pub(crate) fn remote_id(&self, kind: EntityKind, local_id: &str) -> Result<Option<String>, MatchError> {
        Ok(self.states.remote_id_for_local(kind, local_id, self.profile_id)?)
    }

    pub(crate) fn local_id(&self, kind: EntityKind, remote_id: &str) -> Result<Option<String>, MatchError> {
        Ok(self.states.local_id_for_remote(kind, remote_id, self.profile_id)?)
    }

    /// Remote id of a referenced record, or a missing-data error.
    pub(crate) fn require_remote(&self, kind: EntityKind, local_id: &str) -> Result<String, MatchError> {
        let local_id = reference(kind, local_id)?;
        self.remote_id(kind, local_id)?
            .ok_or_else(|| MatchError::MissingData(format!("{kind} not synced yet")))
    }

    pub(crate) fn require_local(&self, kind: EntityKind, remote_id: &str) -> Result<String, MatchError> {
        let remote_id = reference(kind, remote_id)?;
        self.local_id(kind, remote_id)?
            .ok_or_else(|| MatchError::MissingData(format!("{kind} not synced yet")))
    }

    /// Same lookups for mappers, reporting the field that could not be filled.
    pub(crate) fn map_remote(&self, kind: EntityKind, local_id: &str, field: &str) -> Result<String, MapError> {
        self.require_remote(kind, local_id).map_err(|e| map_error(e, field))
    }

    pub(crate) fn map_local(&self, kind: EntityKind, remote_id: &str, field: &str) -> Result<String, MapError> {
        self.require_local(kind, remote_id).map_err(|e| map_error(e, field))
    }
}

fn reference(kind: EntityKind, id: &str) -> Result<&str, MatchError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(MatchError::InvalidId(format!("{kind} reference is empty")));
    }
    Ok(id)
}

fn map_error(err: MatchError, field: &str) -> MapError {
    match err {
        MatchError::Store(err) => MapError::Store(err),
        other => MapError::Validation {
            field: field.to_string(),
            message: other.to_string(),
        },
    }
}
