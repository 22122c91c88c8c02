//! Collaborator interfaces the sync engine consumes.
//!
//! The engine only talks to [`ObjectStore`] implementations: [`LocalCrm`] on
//! the local side and [`RemoteStore`] (over any [`RemoteSystem`]) on the
//! remote side.

mod hal;
pub mod local_crm;
pub mod memory_remote;
pub mod osdi;
pub mod remote;

pub use local_crm::LocalCrm;
pub use memory_remote::MemoryRemote;
pub use osdi::OsdiClient;
pub use remote::{RemoteStore, RemoteSystem};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{EntityKind, SyncObject};
use crate::storage::parse_ts;

/// Comparison operators understood by both stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// Equality ignoring ASCII case. Rendered as `eq` on the wire.
    EqIgnoreCase,
    Lt,
    Gt,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq | FilterOp::EqIgnoreCase => "eq",
            FilterOp::Lt => "lt",
            FilterOp::Gt => "gt",
        }
    }
}

/// One `[field, op, value]` condition. A filter list is a boolean AND.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn new(field: &str, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: &str, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn eq_ignore_case(field: &str, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::EqIgnoreCase, value)
    }

    pub fn lt(field: &str, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Lt, value)
    }

    pub fn gt(field: &str, value: impl Into<String>) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    /// Compare a stored value against this condition.
    ///
    /// Ordering compares timestamps when both sides parse as RFC 3339, then
    /// numbers, then plain text.
    pub fn matches_value(&self, actual: &str) -> bool {
        match self.op {
            FilterOp::Eq => actual == self.value,
            FilterOp::EqIgnoreCase => actual.eq_ignore_ascii_case(&self.value),
            FilterOp::Lt | FilterOp::Gt => {
                let ordering = match (parse_ts(actual), parse_ts(&self.value)) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => match (actual.parse::<f64>(), self.value.parse::<f64>()) {
                        (Ok(a), Ok(b)) => match a.partial_cmp(&b) {
                            Some(ordering) => ordering,
                            None => return false,
                        },
                        _ => actual.cmp(self.value.as_str()),
                    },
                };
                match self.op {
                    FilterOp::Lt => ordering.is_lt(),
                    _ => ordering.is_gt(),
                }
            }
        }
    }

    /// Evaluate against a flat JSON document. Missing fields never match.
    pub fn matches(&self, doc: &Value) -> bool {
        match doc.get(&self.field) {
            Some(Value::String(s)) => self.matches_value(s),
            Some(Value::Number(n)) => self.matches_value(&n.to_string()),
            Some(Value::Bool(b)) => self.matches_value(&b.to_string()),
            _ => false,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} '{}'",
            self.field,
            self.op.as_str(),
            self.value.replace('\'', "''")
        )
    }
}

/// Render filters as one OData-style query: `a eq 'x' and b gt 'y'`.
pub fn filter_query(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(Filter::to_string)
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Who performed a local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User,
    SyncEngine { profile_id: i64 },
}

/// Token threaded through every local write so listeners can tell user
/// edits from writes made by the sync engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteContext {
    pub actor: Actor,
    pub operation_id: Uuid,
}

impl WriteContext {
    pub fn user() -> Self {
        Self {
            actor: Actor::User,
            operation_id: Uuid::new_v4(),
        }
    }

    pub fn sync_engine(profile_id: i64) -> Self {
        Self {
            actor: Actor::SyncEngine { profile_id },
            operation_id: Uuid::new_v4(),
        }
    }

    pub fn is_sync_engine(&self) -> bool {
        matches!(self.actor, Actor::SyncEngine { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A committed local write.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalChange {
    pub kind: EntityKind,
    pub local_id: String,
    pub change: ChangeKind,
}

/// Observer of local writes, notified after each commit.
pub trait ChangeListener {
    fn on_local_change(&self, change: &LocalChange, ctx: &WriteContext);
}

/// Uniform access to one kind of object in one store.
pub trait ObjectStore<T: SyncObject> {
    fn fetch(&self, id: &str) -> Result<Option<T>, StoreError>;

    fn find(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError>;

    /// Objects modified strictly after `since` (everything when `None`),
    /// oldest first.
    fn modified_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<T>, StoreError>;

    /// Create (no id) or update (id present). On success the object carries
    /// its id and new modification time and has no altered fields.
    fn save(&self, object: &mut T, ctx: &WriteContext) -> Result<(), StoreError>;

    fn delete(&self, id: &str, ctx: &WriteContext) -> Result<(), StoreError>;
}
