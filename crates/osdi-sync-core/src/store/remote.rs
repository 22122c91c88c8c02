//! Remote side of the engine: a document-level [`RemoteSystem`] and the
//! typed [`RemoteStore`] adapter over it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::marker::PhantomData;
use std::rc::Rc;

use super::{Filter, ObjectStore, WriteContext};
use crate::error::StoreError;
use crate::model::{RemoteResource, ResourceType};
use crate::storage::format_ts;

/// Document-level access to an OSDI system.
///
/// Documents are flat JSON objects; see [`crate::model::remote`].
pub trait RemoteSystem {
    /// All documents of `resource` matching every filter, across pages.
    fn find(&self, resource: ResourceType, filters: &[Filter]) -> Result<Vec<Value>, StoreError>;

    fn fetch(&self, resource: ResourceType, id: &str) -> Result<Option<Value>, StoreError>;

    /// Create (no `id`) or update (`id` present), returning the stored document.
    fn save(&self, resource: ResourceType, doc: &Value) -> Result<Value, StoreError>;

    fn delete(&self, resource: ResourceType, id: &str) -> Result<(), StoreError>;
}

/// Typed [`ObjectStore`] over a [`RemoteSystem`].
pub struct RemoteStore<T> {
    system: Rc<dyn RemoteSystem>,
    _marker: PhantomData<T>,
}

impl<T> RemoteStore<T> {
    pub fn new(system: Rc<dyn RemoteSystem>) -> Self {
        Self {
            system,
            _marker: PhantomData,
        }
    }
}

impl<T: RemoteResource> ObjectStore<T> for RemoteStore<T> {
    fn fetch(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.system
            .fetch(T::RESOURCE, id)?
            .map(|doc| T::from_document(&doc))
            .transpose()
    }

    fn find(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        self.system
            .find(T::RESOURCE, filters)?
            .iter()
            .map(T::from_document)
            .collect()
    }

    fn modified_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<T>, StoreError> {
        let filters: Vec<Filter> = since
            .map(|at| Filter::gt("modified_date", format_ts(at)))
            .into_iter()
            .collect();
        let mut objects = self.find(&filters)?;
        objects.sort_by(|a, b| a.modified_date().cmp(&b.modified_date()));
        Ok(objects)
    }

    fn save(&self, object: &mut T, _ctx: &WriteContext) -> Result<(), StoreError> {
        let stored = T::from_document(&self.system.save(T::RESOURCE, &object.to_document())?)?;
        if let Some(id) = stored.id() {
            object.set_id(id.to_string());
        }
        if let Some(at) = stored.modified_date() {
            object.set_modified_date(at);
        }
        object.mark_saved();
        Ok(())
    }

    fn delete(&self, id: &str, _ctx: &WriteContext) -> Result<(), StoreError> {
        self.system.delete(T::RESOURCE, id)
    }
}
