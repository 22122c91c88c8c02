//! Startup-time table of per-entity syncers.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::rc::Rc;

use super::pair::SyncReport;
use super::single::{DeletionKind, SingleSyncer};
use super::state::SyncStateRepository;
use crate::entities;
use crate::error::{CoreError, StoreError};
use crate::model::{Entity, EntityKind, SyncOrigin};
use crate::storage::Database;
use crate::store::{LocalCrm, RemoteSystem};

/// Shared collaborators every syncer is built from.
#[derive(Clone)]
pub struct SyncContext {
    pub db: Rc<Database>,
    pub local: Rc<LocalCrm>,
    pub remote: Rc<dyn RemoteSystem>,
    pub profile_id: i64,
}

impl SyncContext {
    pub fn new(db: Rc<Database>, remote: Rc<dyn RemoteSystem>, profile_id: i64) -> Self {
        Self {
            local: Rc::new(LocalCrm::new(Rc::clone(&db))),
            db,
            remote,
            profile_id,
        }
    }

    pub fn states(&self) -> SyncStateRepository {
        SyncStateRepository::new(Rc::clone(&self.db))
    }
}

/// Entity-independent view of a [`SingleSyncer`].
pub trait EntitySync {
    fn kind(&self) -> EntityKind;

    fn sync_local_id(&self, id: &str) -> Result<SyncReport, StoreError>;

    fn sync_remote_id(&self, id: &str) -> Result<SyncReport, StoreError>;

    /// Sync every `origin` record modified after `since`, oldest first.
    ///
    /// Only listing the candidates can fail; per-record failures are
    /// reported in the returned reports.
    fn sync_modified_since(
        &self,
        origin: SyncOrigin,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncReport>, StoreError>;

    fn handle_local_deletion(&self, local_id: &str, deletion: DeletionKind) -> Result<bool, StoreError>;
}

impl<E: Entity> EntitySync for SingleSyncer<E> {
    fn kind(&self) -> EntityKind {
        E::KIND
    }

    fn sync_local_id(&self, id: &str) -> Result<SyncReport, StoreError> {
        Ok(SingleSyncer::sync_local_id(self, id)?.report())
    }

    fn sync_remote_id(&self, id: &str) -> Result<SyncReport, StoreError> {
        Ok(SingleSyncer::sync_remote_id(self, id)?.report())
    }

    fn sync_modified_since(
        &self,
        origin: SyncOrigin,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncReport>, StoreError> {
        let reports: Vec<SyncReport> = match origin {
            SyncOrigin::Local => self
                .local_store()
                .modified_since(since)?
                .into_iter()
                .map(|local| self.sync_from_local_if_needed(local).report())
                .collect(),
            SyncOrigin::Remote => self
                .remote_store()
                .modified_since(since)?
                .into_iter()
                .map(|remote| self.sync_from_remote_if_needed(remote).report())
                .collect(),
        };
        Ok(reports)
    }

    fn handle_local_deletion(&self, local_id: &str, deletion: DeletionKind) -> Result<bool, StoreError> {
        SingleSyncer::handle_local_deletion(self, local_id, deletion)
    }
}

pub type SyncerFactory = fn(&SyncContext) -> Box<dyn EntitySync>;

/// Factories keyed by entity kind, iterated in dependency order.
#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<EntityKind, SyncerFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in entity.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in EntityKind::ALL {
            registry.register(kind, entities::factory_for(kind));
        }
        registry
    }

    pub fn register(&mut self, kind: EntityKind, factory: SyncerFactory) {
        self.factories.insert(kind, factory);
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        self.factories.keys().copied().collect()
    }

    pub fn build(&self, kind: EntityKind, ctx: &SyncContext) -> Result<Box<dyn EntitySync>, CoreError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| CoreError::EntityNotEnabled(kind.to_string()))?;
        Ok(factory(ctx))
    }

    /// Syncers for `kinds`, in dependency order regardless of input order.
    pub fn build_all(
        &self,
        kinds: &[EntityKind],
        ctx: &SyncContext,
    ) -> Result<Vec<Box<dyn EntitySync>>, CoreError> {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        kinds.into_iter().map(|kind| self.build(kind, ctx)).collect()
    }
}
