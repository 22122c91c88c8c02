//! Contacts ↔ OSDI people.

use tracing::debug;

use super::{stores, LocalStore, RemoteObjects};
use crate::error::{MapError, MatchError, StoreError};
use crate::model::{clean, Contact, EmailStatus, Entity, EntityKind, RemotePerson};
use crate::store::{Filter, ObjectStore};
use crate::sync::eligibility::{Eligibility, EligibilityRule};
use crate::sync::mapper::{normalize_phone, MapAction, Mapper};
use crate::sync::matcher::{refine_or_fail, Matcher};
use crate::sync::pair::LocalRemotePair;
use crate::sync::registry::{EntitySync, SyncContext};
use crate::sync::single::SingleSyncer;

#[derive(Debug, Clone)]
pub struct Person;

impl Entity for Person {
    const KIND: EntityKind = EntityKind::Person;
    type Local = Contact;
    type Remote = RemotePerson;
}

pub(crate) fn syncer(ctx: &SyncContext) -> Box<dyn EntitySync> {
    let (local, remote) = stores::<Person>(ctx);
    Box::new(
        SingleSyncer::new(
            local.clone(),
            remote.clone(),
            ctx.states(),
            PersonMatcher::new(local, remote),
            PersonMapper,
            ctx.profile_id,
        )
        .with_eligibility(PersonEligibility),
    )
}

fn cleaned(value: &Option<String>) -> Option<String> {
    value.as_deref().and_then(clean)
}

fn required_email(value: &Option<String>) -> Result<String, MatchError> {
    cleaned(value).ok_or_else(|| MatchError::MissingData("no email address".into()))
}

fn same_email(a: &Option<String>, b: &Option<String>) -> bool {
    match (cleaned(a), cleaned(b)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(&b),
        (None, None) => true,
        _ => false,
    }
}

fn push_name(filters: &mut Vec<Filter>, field: &str, value: &Option<String>) {
    if let Some(name) = cleaned(value) {
        filters.push(Filter::eq_ignore_case(field, name));
    }
}

/// Matches people by email, narrowed by name when the email is shared.
pub struct PersonMatcher {
    local: LocalStore<Person>,
    remote: RemoteObjects<Person>,
}

impl PersonMatcher {
    pub fn new(local: LocalStore<Person>, remote: RemoteObjects<Person>) -> Self {
        Self { local, remote }
    }
}

impl Matcher<Person> for PersonMatcher {
    fn find_match_for_local(&self, contact: &Contact) -> Result<Option<RemotePerson>, MatchError> {
        let email = required_email(contact.email.get())?;
        let broad = self
            .remote
            .find(&[Filter::eq_ignore_case("email_address", email.as_str())])?;
        refine_or_fail(broad, || {
            let mut filters = vec![Filter::eq_ignore_case("email_address", email.as_str())];
            push_name(&mut filters, "given_name", contact.first_name.get());
            push_name(&mut filters, "family_name", contact.last_name.get());
            Ok(self.remote.find(&filters)?)
        })
    }

    fn find_match_for_remote(&self, person: &RemotePerson) -> Result<Option<Contact>, MatchError> {
        let email = required_email(person.email_address.get())?;
        let live = |extra: &[Filter]| -> Result<Vec<Contact>, StoreError> {
            let mut filters = vec![
                Filter::eq_ignore_case("email", email.as_str()),
                Filter::eq("is_deleted", "0"),
            ];
            filters.extend_from_slice(extra);
            self.local.find(&filters)
        };
        let broad = live(&[])?;
        refine_or_fail(broad, || {
            let mut names = Vec::new();
            push_name(&mut names, "first_name", person.given_name.get());
            push_name(&mut names, "last_name", person.family_name.get());
            Ok(live(&names)?)
        })
    }
}

/// Field mapping between contacts and people.
///
/// Email addresses compare case-insensitively and are only rewritten when
/// they differ otherwise. Subscription compares by suppression, so a
/// `bouncing` remote is not overwritten by a local opt-out.
pub struct PersonMapper;

impl Mapper<Person> for PersonMapper {
    fn map_local_to_remote(&self, contact: &Contact, person: &mut RemotePerson) -> Result<MapAction, MapError> {
        person.given_name.set(cleaned(contact.first_name.get()));
        person.family_name.set(cleaned(contact.last_name.get()));
        if !same_email(person.email_address.get(), contact.email.get()) {
            person.email_address.set(cleaned(contact.email.get()));
        }

        let suppressed = *contact.is_opt_out.get() || *contact.do_not_email.get();
        if person.email_status.get().is_suppressed() != suppressed {
            person.email_status.set(if suppressed {
                EmailStatus::Unsubscribed
            } else {
                EmailStatus::Subscribed
            });
        }

        let phone = contact.phone.get().as_deref().and_then(normalize_phone);
        if person.phone_number.get().as_deref().and_then(normalize_phone) != phone {
            person.phone_number.set(phone);
        }

        person.address_line.set(cleaned(contact.street_address.get()));
        person.locality.set(cleaned(contact.city.get()));
        person.region.set(cleaned(contact.state_province.get()));
        person.postal_code.set(cleaned(contact.postal_code.get()));
        person.country.set(cleaned(contact.country.get()));
        Ok(MapAction::Mapped)
    }

    fn map_remote_to_local(&self, person: &RemotePerson, contact: &mut Contact) -> Result<MapAction, MapError> {
        contact.first_name.set(cleaned(person.given_name.get()));
        contact.last_name.set(cleaned(person.family_name.get()));
        if !same_email(contact.email.get(), person.email_address.get()) {
            contact.email.set(cleaned(person.email_address.get()));
        }

        let suppressed = person.email_status.get().is_suppressed();
        let locally_suppressed = *contact.is_opt_out.get() || *contact.do_not_email.get();
        if locally_suppressed != suppressed {
            contact.is_opt_out.set(suppressed);
            if !suppressed {
                contact.do_not_email.set(false);
            }
        }

        let phone = person.phone_number.get().as_deref().and_then(normalize_phone);
        if contact.phone.get().as_deref().and_then(normalize_phone) != phone {
            contact.phone.set(phone);
        }

        contact.street_address.set(cleaned(person.address_line.get()));
        contact.city.set(cleaned(person.locality.get()));
        contact.state_province.set(cleaned(person.region.get()));
        contact.postal_code.set(cleaned(person.postal_code.get()));
        contact.country.set(cleaned(person.country.get()));
        Ok(MapAction::Mapped)
    }
}

/// Soft-deleted contacts never sync, whichever side changed.
pub struct PersonEligibility;

impl EligibilityRule<Person> for PersonEligibility {
    fn check(&self, pair: &LocalRemotePair<Person>) -> Result<Eligibility, StoreError> {
        match pair.local.as_ref() {
            Some(contact) if *contact.is_deleted.get() => {
                debug!(local_id = ?pair.local_id(), "contact is soft-deleted");
                Ok(Eligibility::Ineligible("contact is deleted".into()))
            }
            _ => Ok(Eligibility::Eligible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixture::Fixture;
    use crate::model::SyncObject;
    use crate::store::{ObjectStore, WriteContext};

    fn save_contact(fx: &Fixture, first: &str, last: &str, email: &str) -> Contact {
        let mut contact = Contact::new(first, last, email);
        fx.crm().save(&mut contact, &WriteContext::user()).unwrap();
        contact
    }

    #[test]
    fn local_match_by_email_ignores_case() {
        let fx = Fixture::new();
        let (local, remote) = fx.stores::<Person>();
        let mut person = RemotePerson::new("Ada", "Lovelace", "Ada@Example.org");
        remote.save(&mut person, &WriteContext::sync_engine(1)).unwrap();

        let matcher = PersonMatcher::new(local, remote);
        let contact = Contact::new("Ada", "Lovelace", "ada@example.org");
        let found = matcher.find_match_for_local(&contact).unwrap().unwrap();
        assert_eq!(found.id(), person.id());
    }

    #[test]
    fn missing_email_is_missing_data() {
        let fx = Fixture::new();
        let (local, remote) = fx.stores::<Person>();
        let matcher = PersonMatcher::new(local, remote);
        let contact = Contact::new("Ada", "Lovelace", "  ");
        assert!(matches!(
            matcher.find_match_for_local(&contact),
            Err(MatchError::MissingData(_))
        ));
    }

    #[test]
    fn shared_email_is_settled_by_name() {
        let fx = Fixture::new();
        let (local, remote) = fx.stores::<Person>();
        save_contact(&fx, "Ada", "Lovelace", "family@example.org");
        let byron = save_contact(&fx, "George", "Byron", "family@example.org");
        let matcher = PersonMatcher::new(local, remote);

        let found = matcher
            .find_match_for_remote(&RemotePerson::new("George", "Byron", "family@example.org"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), byron.id());

        let err = matcher
            .find_match_for_remote(&RemotePerson::new("Annabella", "Milbanke", "family@example.org"))
            .unwrap_err();
        assert_eq!(
            err,
            MatchError::Indeterminate("not unique, no match by name either".into())
        );
    }

    #[test]
    fn soft_deleted_contacts_are_not_candidates() {
        let fx = Fixture::new();
        let (local, remote) = fx.stores::<Person>();
        let contact = save_contact(&fx, "Ada", "Lovelace", "ada@example.org");
        fx.crm()
            .soft_delete_contact(contact.id().unwrap(), &WriteContext::user())
            .unwrap();
        let matcher = PersonMatcher::new(local, remote);
        let found = matcher
            .find_match_for_remote(&RemotePerson::new("Ada", "Lovelace", "ada@example.org"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn opt_out_maps_to_unsubscribed() {
        let mut contact = Contact::new(" Ada ", "Lovelace", "ada@example.org");
        contact.do_not_email.set(true);
        contact.phone.set(Some("(555) 010-2030".into()));
        let mut person = RemotePerson::default();
        PersonMapper.map_local_to_remote(&contact, &mut person).unwrap();

        assert_eq!(person.given_name.get().as_deref(), Some("Ada"));
        assert_eq!(*person.email_status.get(), EmailStatus::Unsubscribed);
        assert_eq!(person.phone_number.get().as_deref(), Some("5550102030"));
    }

    #[test]
    fn converged_mapping_alters_nothing() {
        let fx = Fixture::new();
        let (_, remote) = fx.stores::<Person>();
        let mut contact = Contact::new("Ada", "Lovelace", "ada@example.org");
        contact.city.set(Some("London".into()));
        let mut person = RemotePerson::default();
        PersonMapper.map_local_to_remote(&contact, &mut person).unwrap();
        remote.save(&mut person, &WriteContext::sync_engine(1)).unwrap();

        let mut stored = remote.fetch(person.id().unwrap()).unwrap().unwrap();
        stored.email_address.set(Some("ADA@example.org".into()));
        stored.mark_saved();
        PersonMapper.map_local_to_remote(&contact, &mut stored).unwrap();
        assert!(stored.altered_fields().is_empty());
    }

    #[test]
    fn remote_unsubscribe_sets_opt_out() {
        let mut person = RemotePerson::new("Ada", "Lovelace", "ada@example.org");
        person.email_status.set(EmailStatus::Unsubscribed);
        let mut contact = Contact::default();
        PersonMapper.map_remote_to_local(&person, &mut contact).unwrap();
        assert!(*contact.is_opt_out.get());
        assert_eq!(contact.email.get().as_deref(), Some("ada@example.org"));
    }

    #[test]
    fn soft_deleted_contact_is_ineligible() {
        let mut contact = Contact::new("Ada", "Lovelace", "ada@example.org");
        let pair = LocalRemotePair::<Person>::new_from_local(contact.clone());
        assert_eq!(PersonEligibility.check(&pair).unwrap(), Eligibility::Eligible);

        contact.is_deleted.set(true);
        let pair = LocalRemotePair::<Person>::new_from_local(contact);
        assert!(matches!(
            PersonEligibility.check(&pair).unwrap(),
            Eligibility::Ineligible(_)
        ));
    }
}
