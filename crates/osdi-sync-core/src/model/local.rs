//! Local CRM records.

use chrono::{DateTime, Utc};

use super::{sync_object, Field};

/// A person in the local CRM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contact {
    pub id: Option<String>,
    pub first_name: Field<Option<String>>,
    pub last_name: Field<Option<String>>,
    pub email: Field<Option<String>>,
    pub phone: Field<Option<String>>,
    pub street_address: Field<Option<String>>,
    pub city: Field<Option<String>>,
    pub state_province: Field<Option<String>>,
    pub postal_code: Field<Option<String>>,
    pub country: Field<Option<String>>,
    pub is_opt_out: Field<bool>,
    pub do_not_email: Field<bool>,
    /// Soft-deleted contacts stay in the table but are never synced.
    pub is_deleted: Field<bool>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(Contact {
    first_name,
    last_name,
    email,
    phone,
    street_address,
    city,
    state_province,
    postal_code,
    country,
    is_opt_out,
    do_not_email,
    is_deleted,
});

impl Contact {
    /// Unsaved contact with a name and email.
    pub fn new(first_name: &str, last_name: &str, email: &str) -> Self {
        let mut contact = Self::default();
        contact.first_name.set(Some(first_name.to_string()));
        contact.last_name.set(Some(last_name.to_string()));
        contact.email.set(Some(email.to_string()));
        contact
    }

    pub fn display_name(&self) -> String {
        [self.first_name.get(), self.last_name.get()]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A tag definition in the local CRM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalTag {
    pub id: Option<String>,
    pub name: Field<String>,
    pub description: Field<Option<String>>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(LocalTag { name, description });

impl LocalTag {
    pub fn new(name: &str) -> Self {
        let mut tag = Self::default();
        tag.name.set(name.to_string());
        tag
    }
}

/// Assignment of a tag to a contact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityTag {
    pub id: Option<String>,
    pub contact_id: Field<String>,
    pub tag_id: Field<String>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(EntityTag { contact_id, tag_id });

impl EntityTag {
    pub fn new(contact_id: &str, tag_id: &str) -> Self {
        let mut entity_tag = Self::default();
        entity_tag.contact_id.set(contact_id.to_string());
        entity_tag.tag_id.set(tag_id.to_string());
        entity_tag
    }
}

/// Contribution status that makes a local donation eligible for sync.
pub const COMPLETED: &str = "Completed";

/// A donation recorded in the local CRM.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contribution {
    pub id: Option<String>,
    pub contact_id: Field<String>,
    /// Decimal amount with two fraction digits, e.g. `"12.50"`.
    pub total_amount: Field<String>,
    pub currency: Field<String>,
    pub receive_date: Field<Option<DateTime<Utc>>>,
    pub financial_type: Field<String>,
    pub status: Field<String>,
    pub modified_date: Option<DateTime<Utc>>,
}

sync_object!(Contribution {
    contact_id,
    total_amount,
    currency,
    receive_date,
    financial_type,
    status,
});

impl Contribution {
    pub fn new(contact_id: &str, total_amount: &str, receive_date: DateTime<Utc>) -> Self {
        let mut contribution = Self::default();
        contribution.contact_id.set(contact_id.to_string());
        contribution.total_amount.set(total_amount.to_string());
        contribution.currency.set("USD".to_string());
        contribution.receive_date.set(Some(receive_date));
        contribution.financial_type.set("Donation".to_string());
        contribution.status.set(COMPLETED.to_string());
        contribution
    }

    pub fn is_completed(&self) -> bool {
        self.status.get() == COMPLETED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncObject;

    #[test]
    fn new_contact_is_altered_but_not_loaded() {
        let contact = Contact::new("Fizz", "Bang", "a@x.com");
        assert!(!contact.is_loaded());
        assert!(contact.is_altered());
        assert_eq!(
            contact.altered_fields(),
            vec!["first_name", "last_name", "email"]
        );
        assert_eq!(contact.display_name(), "Fizz Bang");
    }

    #[test]
    fn mark_saved_clears_alterations() {
        let mut tag = LocalTag::new("volunteer");
        tag.set_id("3".into());
        tag.mark_saved();
        assert!(tag.is_loaded());
        assert!(!tag.is_altered());
        tag.name.set("volunteer".into());
        assert!(tag.is_touched());
        assert!(!tag.is_altered());
    }

    #[test]
    fn contribution_defaults_to_completed() {
        let c = Contribution::new("1", "10.00", Utc::now());
        assert!(c.is_completed());
        assert_eq!(c.currency.get(), "USD");
    }
}
