//! Domain objects shared by the local and remote stores.
//!
//! Every synced object tracks its fields individually through [`Field`], so
//! the engine can tell whether a mapped target actually changed before it
//! issues a write.

pub mod local;
pub mod remote;

pub use local::{Contact, Contribution, EntityTag, LocalTag};
pub use remote::{
    EmailStatus, RemoteDonation, RemotePerson, RemoteResource, RemoteTag, RemoteTagging,
    ResourceType,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity types the engine knows how to sync.
///
/// Declaration order is dependency order: taggings and donations reference
/// people and tags, so those must be synced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Tag,
    Tagging,
    Donation,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Person,
        EntityKind::Tag,
        EntityKind::Tagging,
        EntityKind::Donation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Tag => "tag",
            EntityKind::Tagging => "tagging",
            EntityKind::Donation => "donation",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "person" | "people" => Ok(EntityKind::Person),
            "tag" | "tags" => Ok(EntityKind::Tag),
            "tagging" | "taggings" => Ok(EntityKind::Tagging),
            "donation" | "donations" => Ok(EntityKind::Donation),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// The authoritative side of one sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOrigin {
    Local,
    Remote,
}

impl SyncOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOrigin::Local => "local",
            SyncOrigin::Remote => "remote",
        }
    }

    pub fn opposite(&self) -> SyncOrigin {
        match self {
            SyncOrigin::Local => SyncOrigin::Remote,
            SyncOrigin::Remote => SyncOrigin::Local,
        }
    }
}

impl fmt::Display for SyncOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(SyncOrigin::Local),
            "remote" => Ok(SyncOrigin::Remote),
            _ => Err(format!("Unknown sync origin: {}", s)),
        }
    }
}

/// One tracked field of a synced object.
///
/// `original` is the value last loaded from (or saved to) the store; a field
/// of a never-loaded object has no original, so any `set` alters it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field<T> {
    current: T,
    original: Option<T>,
    touched: bool,
}

impl<T: Clone + PartialEq> Field<T> {
    /// Field as read from a store.
    pub fn loaded(value: T) -> Self {
        Self {
            original: Some(value.clone()),
            current: value,
            touched: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    pub fn set(&mut self, value: T) {
        self.current = value;
        self.touched = true;
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn is_altered(&self) -> bool {
        self.touched && self.original.as_ref() != Some(&self.current)
    }

    /// Accept the current value as the stored one.
    pub fn mark_saved(&mut self) {
        self.original = Some(self.current.clone());
        self.touched = false;
    }
}

/// Behaviour shared by every local and remote domain object.
pub trait SyncObject: Clone + Default + fmt::Debug + 'static {
    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: String);
    /// Modification time as reported by the owning store.
    fn modified_date(&self) -> Option<DateTime<Utc>>;
    fn set_modified_date(&mut self, at: DateTime<Utc>);

    /// Names of fields whose value differs from the stored one.
    fn altered_fields(&self) -> Vec<&'static str>;
    fn is_touched(&self) -> bool;
    fn mark_saved(&mut self);

    /// Whether the object exists in its store.
    fn is_loaded(&self) -> bool {
        self.id().is_some()
    }

    fn is_altered(&self) -> bool {
        !self.altered_fields().is_empty()
    }
}

/// Implements [`SyncObject`] for a struct with `id: Option<String>`,
/// `modified_date: Option<DateTime<Utc>>` and the listed [`Field`]s.
macro_rules! sync_object {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::model::SyncObject for $ty {
            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }

            fn modified_date(&self) -> Option<chrono::DateTime<chrono::Utc>> {
                self.modified_date
            }

            fn set_modified_date(&mut self, at: chrono::DateTime<chrono::Utc>) {
                self.modified_date = Some(at);
            }

            fn altered_fields(&self) -> Vec<&'static str> {
                let mut altered = Vec::new();
                $(
                    if self.$field.is_altered() {
                        altered.push(stringify!($field));
                    }
                )+
                altered
            }

            fn is_touched(&self) -> bool {
                false $(|| self.$field.is_touched())+
            }

            fn mark_saved(&mut self) {
                $(self.$field.mark_saved();)+
            }
        }
    };
}

pub(crate) use sync_object;

/// Pairs a local type with its remote counterpart.
pub trait Entity: 'static {
    const KIND: EntityKind;
    type Local: SyncObject;
    type Remote: RemoteResource;
}

/// Trim and drop empty strings.
pub fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
