//! Remote OSDI resources.
//!
//! Remote stores exchange flat JSON documents whose keys double as filter
//! field names (`email_address`, `modified_date`, `person_id`, ...). The HTTP
//! client translates between these and the OSDI wire format.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

use super::{sync_object, Field, SyncObject};
use crate::error::StoreError;
use crate::storage::{format_ts, parse_ts};

/// OSDI collections the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    People,
    Tags,
    Taggings,
    Donations,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::People => "people",
            ResourceType::Tags => "tags",
            ResourceType::Taggings => "taggings",
            ResourceType::Donations => "donations",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote object that round-trips through a flat JSON document.
pub trait RemoteResource: SyncObject {
    const RESOURCE: ResourceType;

    fn from_document(doc: &Value) -> Result<Self, StoreError>;

    /// Writable fields plus `id` when present.
    fn to_document(&self) -> Value;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmailStatus {
    #[default]
    Subscribed,
    Unsubscribed,
    Bouncing,
    SpamComplaint,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Subscribed => "subscribed",
            EmailStatus::Unsubscribed => "unsubscribed",
            EmailStatus::Bouncing => "bouncing",
            EmailStatus::SpamComplaint => "spam complaint",
        }
    }

    /// Anything but `subscribed` stops mail.
    pub fn is_suppressed(&self) -> bool {
        *self != EmailStatus::Subscribed
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribed" => Ok(EmailStatus::Subscribed),
            "unsubscribed" => Ok(EmailStatus::Unsubscribed),
            "bouncing" => Ok(EmailStatus::Bouncing),
            "spam complaint" | "spam_complaint" => Ok(EmailStatus::SpamComplaint),
            _ => Err(format!("Unknown email status: {}", s)),
        }
    }
}

fn doc_object(doc: &Value, resource: ResourceType) -> Result<&Map<String, Value>, StoreError> {
    doc.as_object()
        .ok_or_else(|| StoreError::Invalid(format!("{resource} document is not an object")))
}

fn opt_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn req_str(obj: &Map<String, Value>, key: &str, resource: ResourceType) -> Result<String, StoreError> {
    opt_str(obj, key).ok_or_else(|| StoreError::Invalid(format!("{resource} document missing '{key}'")))
}

fn opt_ts(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    opt_str(obj, key).and_then(|s| parse_ts(&s))
}

fn with_id(id: Option<&str>, mut fields: Value) -> Value {
    if let (Some(id), Some(obj)) = (id, fields.as_object_mut()) {
        obj.insert("id".into(), Value::String(id.to_string()));
    }
    fields
}

/// An OSDI person.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemotePerson {
    pub id: Option<String>,
    pub given_name: Field<Option<String>>,
    pub family_name: Field<Option<String>>,
    pub email_address: Field<Option<String>>,
    pub email_status: Field<EmailStatus>,
    pub phone_number: Field<Option<String>>,
    pub address_line: Field<Option<String>>,
    pub locality: Field<Option<String>>,
    pub region: Field<Option<String>>,
    pub postal_code: Field<Option<String>>,
    pub country: Field<Option<String>>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(RemotePerson {
    given_name,
    family_name,
    email_address,
    email_status,
    phone_number,
    address_line,
    locality,
    region,
    postal_code,
    country,
});

impl RemotePerson {
    pub fn new(given_name: &str, family_name: &str, email_address: &str) -> Self {
        let mut person = Self::default();
        person.given_name.set(Some(given_name.to_string()));
        person.family_name.set(Some(family_name.to_string()));
        person.email_address.set(Some(email_address.to_string()));
        person.email_status.set(EmailStatus::Subscribed);
        person
    }
}

impl RemoteResource for RemotePerson {
    const RESOURCE: ResourceType = ResourceType::People;

    fn from_document(doc: &Value) -> Result<Self, StoreError> {
        let obj = doc_object(doc, Self::RESOURCE)?;
        let email_status = match opt_str(obj, "email_status") {
            Some(s) => s.parse().map_err(StoreError::Invalid)?,
            None => EmailStatus::default(),
        };
        Ok(Self {
            id: Some(req_str(obj, "id", Self::RESOURCE)?),
            given_name: Field::loaded(opt_str(obj, "given_name")),
            family_name: Field::loaded(opt_str(obj, "family_name")),
            email_address: Field::loaded(opt_str(obj, "email_address")),
            email_status: Field::loaded(email_status),
            phone_number: Field::loaded(opt_str(obj, "phone_number")),
            address_line: Field::loaded(opt_str(obj, "address_line")),
            locality: Field::loaded(opt_str(obj, "locality")),
            region: Field::loaded(opt_str(obj, "region")),
            postal_code: Field::loaded(opt_str(obj, "postal_code")),
            country: Field::loaded(opt_str(obj, "country")),
            modified_date: opt_ts(obj, "modified_date"),
        })
    }

    fn to_document(&self) -> Value {
        with_id(
            self.id(),
            json!({
                "given_name": self.given_name.get(),
                "family_name": self.family_name.get(),
                "email_address": self.email_address.get(),
                "email_status": self.email_status.get().as_str(),
                "phone_number": self.phone_number.get(),
                "address_line": self.address_line.get(),
                "locality": self.locality.get(),
                "region": self.region.get(),
                "postal_code": self.postal_code.get(),
                "country": self.country.get(),
            }),
        )
    }
}

/// An OSDI tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteTag {
    pub id: Option<String>,
    pub name: Field<String>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(RemoteTag { name });

impl RemoteTag {
    pub fn new(name: &str) -> Self {
        let mut tag = Self::default();
        tag.name.set(name.to_string());
        tag
    }
}

impl RemoteResource for RemoteTag {
    const RESOURCE: ResourceType = ResourceType::Tags;

    fn from_document(doc: &Value) -> Result<Self, StoreError> {
        let obj = doc_object(doc, Self::RESOURCE)?;
        Ok(Self {
            id: Some(req_str(obj, "id", Self::RESOURCE)?),
            name: Field::loaded(req_str(obj, "name", Self::RESOURCE)?),
            modified_date: opt_ts(obj, "modified_date"),
        })
    }

    fn to_document(&self) -> Value {
        with_id(self.id(), json!({ "name": self.name.get() }))
    }
}

/// An OSDI tagging: one person carrying one tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteTagging {
    pub id: Option<String>,
    pub person_id: Field<String>,
    pub tag_id: Field<String>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(RemoteTagging { person_id, tag_id });

impl RemoteTagging {
    pub fn new(person_id: &str, tag_id: &str) -> Self {
        let mut tagging = Self::default();
        tagging.person_id.set(person_id.to_string());
        tagging.tag_id.set(tag_id.to_string());
        tagging
    }
}

impl RemoteResource for RemoteTagging {
    const RESOURCE: ResourceType = ResourceType::Taggings;

    fn from_document(doc: &Value) -> Result<Self, StoreError> {
        let obj = doc_object(doc, Self::RESOURCE)?;
        Ok(Self {
            id: Some(req_str(obj, "id", Self::RESOURCE)?),
            person_id: Field::loaded(req_str(obj, "person_id", Self::RESOURCE)?),
            tag_id: Field::loaded(req_str(obj, "tag_id", Self::RESOURCE)?),
            modified_date: opt_ts(obj, "modified_date"),
        })
    }

    fn to_document(&self) -> Value {
        with_id(
            self.id(),
            json!({ "person_id": self.person_id.get(), "tag_id": self.tag_id.get() }),
        )
    }
}

/// An OSDI donation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteDonation {
    pub id: Option<String>,
    pub person_id: Field<String>,
    /// Decimal amount with two fraction digits.
    pub amount: Field<String>,
    pub currency: Field<String>,
    pub created_date: Field<Option<DateTime<Utc>>>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(RemoteDonation {
    person_id,
    amount,
    currency,
    created_date,
});

impl RemoteResource for RemoteDonation {
    const RESOURCE: ResourceType = ResourceType::Donations;

    fn from_document(doc: &Value) -> Result<Self, StoreError> {
        let obj = doc_object(doc, Self::RESOURCE)?;
        Ok(Self {
            id: Some(req_str(obj, "id", Self::RESOURCE)?),
            person_id: Field::loaded(req_str(obj, "person_id", Self::RESOURCE)?),
            amount: Field::loaded(req_str(obj, "amount", Self::RESOURCE)?),
            currency: Field::loaded(opt_str(obj, "currency").unwrap_or_else(|| "USD".into())),
            created_date: Field::loaded(opt_ts(obj, "created_date")),
            modified_date: opt_ts(obj, "modified_date"),
        })
    }

    fn to_document(&self) -> Value {
        with_id(
            self.id(),
            json!({
                "person_id": self.person_id.get(),
                "amount": self.amount.get(),
                "currency": self.currency.get(),
                "created_date": (*self.created_date.get()).map(format_ts),
            }),
        )
    }
}
