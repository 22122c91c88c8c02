//! In-memory [`RemoteSystem`] for tests and dry runs.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::{Map, Value};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use uuid::Uuid;

use super::{Filter, RemoteSystem};
use crate::error::StoreError;
use crate::model::ResourceType;
use crate::storage::format_ts;

/// Keeps documents per collection in insertion order.
///
/// People carry a unique email constraint like the real API, so a write
/// that would duplicate an address fails with HTTP 400.
#[derive(Default)]
pub struct MemoryRemote {
    docs: RefCell<HashMap<ResourceType, Vec<Value>>>,
    last_stamp: Cell<Option<DateTime<Utc>>>,
    failing_values: RefCell<Vec<String>>,
    writes: Cell<usize>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `find` whose filters mention `value` fail with a transport error.
    pub fn fail_when_filtered_by(&self, value: &str) {
        self.failing_values.borrow_mut().push(value.to_string());
    }

    /// Number of successful creates, updates and deletes.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Snapshot of one collection.
    pub fn documents(&self, resource: ResourceType) -> Vec<Value> {
        self.docs
            .borrow()
            .get(&resource)
            .cloned()
            .unwrap_or_default()
    }

    fn next_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let stamp = match self.last_stamp.get() {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp.set(Some(stamp));
        stamp
    }

    fn check_unique_email(
        docs: &[Value],
        candidate: &Map<String, Value>,
        id: &str,
    ) -> Result<(), StoreError> {
        let Some(email) = candidate.get("email_address").and_then(Value::as_str) else {
            return Ok(());
        };
        let taken = docs.iter().any(|doc| {
            doc.get("id").and_then(Value::as_str) != Some(id)
                && doc
                    .get("email_address")
                    .and_then(Value::as_str)
                    .is_some_and(|other| other.eq_ignore_ascii_case(email))
        });
        if taken {
            return Err(StoreError::Api {
                status: 400,
                body: format!("duplicate email: {email}"),
            });
        }
        Ok(())
    }
}

impl RemoteSystem for MemoryRemote {
    fn find(&self, resource: ResourceType, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        if filters
            .iter()
            .any(|f| self.failing_values.borrow().contains(&f.value))
        {
            return Err(StoreError::Transport(format!(
                "simulated failure querying {resource}"
            )));
        }
        Ok(self
            .docs
            .borrow()
            .get(&resource)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| filters.iter().all(|f| f.matches(doc)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch(&self, resource: ResourceType, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.docs.borrow().get(&resource).and_then(|docs| {
            docs.iter()
                .find(|doc| doc.get("id").and_then(Value::as_str) == Some(id))
                .cloned()
        }))
    }

    fn save(&self, resource: ResourceType, doc: &Value) -> Result<Value, StoreError> {
        let incoming = doc
            .as_object()
            .ok_or_else(|| StoreError::Invalid(format!("{resource} document is not an object")))?;
        let mut docs = self.docs.borrow_mut();
        let collection = docs.entry(resource).or_default();

        let existing_id = incoming.get("id").and_then(Value::as_str).map(str::to_string);
        let (index, mut merged) = match &existing_id {
            Some(id) => {
                let index = collection
                    .iter()
                    .position(|d| d.get("id").and_then(Value::as_str) == Some(id.as_str()))
                    .ok_or_else(|| StoreError::not_found(resource.as_str(), id.as_str()))?;
                let current = collection[index].as_object().cloned().unwrap_or_default();
                (Some(index), current)
            }
            None => (None, Map::new()),
        };

        for (key, value) in incoming {
            merged.insert(key.clone(), value.clone());
        }
        let id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        merged.insert("id".into(), Value::String(id.clone()));

        if resource == ResourceType::People {
            Self::check_unique_email(collection, &merged, &id)?;
        }

        merged.insert(
            "modified_date".into(),
            Value::String(format_ts(self.next_stamp())),
        );
        let stored = Value::Object(merged);
        match index {
            Some(i) => collection[i] = stored.clone(),
            None => collection.push(stored.clone()),
        }
        self.writes.set(self.writes.get() + 1);
        Ok(stored)
    }

    fn delete(&self, resource: ResourceType, id: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.borrow_mut();
        let collection = docs.entry(resource).or_default();
        let before = collection.len();
        collection.retain(|d| d.get("id").and_then(Value::as_str) != Some(id));
        if collection.len() == before {
            return Err(StoreError::not_found(resource.as_str(), id));
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
