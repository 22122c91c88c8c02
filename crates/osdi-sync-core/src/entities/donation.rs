//! Contributions ↔ OSDI donations.

use chrono::{DateTime, Utc};

use super::{stores, IdTranslator, LocalStore, RemoteObjects};
use crate::error::{MapError, MatchError, StoreError};
use crate::model::local::COMPLETED;
use crate::model::{Contribution, Entity, EntityKind, RemoteDonation, SyncObject, SyncOrigin};
use crate::store::{Filter, ObjectStore};
use crate::sync::eligibility::{Eligibility, EligibilityRule};
use crate::sync::mapper::{normalize_amount, MapAction, Mapper};
use crate::sync::matcher::{at_most_one, Matcher};
use crate::sync::pair::LocalRemotePair;
use crate::sync::registry::{EntitySync, SyncContext};
use crate::sync::single::SingleSyncer;

#[derive(Debug, Clone)]
pub struct Donation;

impl Entity for Donation {
    const KIND: EntityKind = EntityKind::Donation;
    type Local = Contribution;
    type Remote = RemoteDonation;
}

pub(crate) fn syncer(ctx: &SyncContext) -> Box<dyn EntitySync> {
    let (local, remote) = stores::<Donation>(ctx);
    let ids = IdTranslator::new(ctx);
    Box::new(
        SingleSyncer::new(
            local.clone(),
            remote.clone(),
            ctx.states(),
            DonationMatcher::new(local, remote, ids.clone()),
            DonationMapper::new(ids),
            ctx.profile_id,
        )
        .with_eligibility(DonationEligibility),
    )
}

/// What identifies a donation on both sides.
#[derive(Debug, PartialEq)]
struct Key {
    amount: String,
    date: DateTime<Utc>,
}

impl Key {
    fn new(amount: &str, date: &Option<DateTime<Utc>>) -> Result<Self, MatchError> {
        let amount = normalize_amount(amount).map_err(|e| MatchError::MissingData(e.to_string()))?;
        let date = (*date).ok_or_else(|| MatchError::MissingData("donation has no date".into()))?;
        Ok(Self { amount, date })
    }

    /// Candidates with unparseable amounts or no date never match.
    fn matches(&self, amount: &str, date: &Option<DateTime<Utc>>) -> bool {
        Key::new(amount, date).is_ok_and(|other| other == *self)
    }
}

pub struct DonationMatcher {
    local: LocalStore<Donation>,
    remote: RemoteObjects<Donation>,
    ids: IdTranslator,
}

impl DonationMatcher {
    pub(crate) fn new(local: LocalStore<Donation>, remote: RemoteObjects<Donation>, ids: IdTranslator) -> Self {
        Self { local, remote, ids }
    }
}

impl Matcher<Donation> for DonationMatcher {
    fn find_match_for_local(&self, contribution: &Contribution) -> Result<Option<RemoteDonation>, MatchError> {
        let key = Key::new(contribution.total_amount.get(), contribution.receive_date.get())?;
        let donor = self.ids.require_remote(EntityKind::Person, contribution.contact_id.get())?;
        let same: Vec<RemoteDonation> = self
            .remote
            .find(&[Filter::eq("person_id", donor)])?
            .into_iter()
            .filter(|d| key.matches(d.amount.get(), d.created_date.get()))
            .collect();
        at_most_one(same, "remote donations")
    }

    fn find_match_for_remote(&self, donation: &RemoteDonation) -> Result<Option<Contribution>, MatchError> {
        let key = Key::new(donation.amount.get(), donation.created_date.get())?;
        let donor = self.ids.require_local(EntityKind::Person, donation.person_id.get())?;
        let same: Vec<Contribution> = self
            .local
            .find(&[Filter::eq("contact_id", donor)])?
            .into_iter()
            .filter(|c| key.matches(c.total_amount.get(), c.receive_date.get()))
            .collect();
        at_most_one(same, "local contributions")
    }
}

/// Remote donations are write-once.
pub struct DonationMapper {
    ids: IdTranslator,
}

impl DonationMapper {
    pub(crate) fn new(ids: IdTranslator) -> Self {
        Self { ids }
    }
}

impl Mapper<Donation> for DonationMapper {
    fn map_local_to_remote(&self, contribution: &Contribution, donation: &mut RemoteDonation) -> Result<MapAction, MapError> {
        let person_id = self
            .ids
            .map_remote(EntityKind::Person, contribution.contact_id.get(), "person_id")?;
        let amount = normalize_amount(contribution.total_amount.get())?;
        let currency = contribution.currency.get().clone();
        let created = *contribution.receive_date.get();

        if donation.is_loaded() {
            let unchanged = *donation.person_id.get() == person_id
                && normalize_amount(donation.amount.get()).ok().as_ref() == Some(&amount)
                && donation.currency.get().eq_ignore_ascii_case(&currency)
                && *donation.created_date.get() == created;
            if !unchanged {
                return Ok(MapAction::SkipAllChanges("remote donations are immutable".into()));
            }
            return Ok(MapAction::Mapped);
        }

        donation.person_id.set(person_id);
        donation.amount.set(amount);
        donation.currency.set(currency);
        donation.created_date.set(created);
        Ok(MapAction::Mapped)
    }

    fn map_remote_to_local(&self, donation: &RemoteDonation, contribution: &mut Contribution) -> Result<MapAction, MapError> {
        let contact_id = self
            .ids
            .map_local(EntityKind::Person, donation.person_id.get(), "contact_id")?;
        contribution.contact_id.set(contact_id);
        contribution.total_amount.set(normalize_amount(donation.amount.get())?);
        contribution.currency.set(donation.currency.get().to_ascii_uppercase());
        contribution.receive_date.set(*donation.created_date.get());
        if !contribution.is_loaded() {
            contribution.financial_type.set("Donation".to_string());
            contribution.status.set(COMPLETED.to_string());
        }
        Ok(MapAction::Mapped)
    }
}

/// Only completed contributions go out; remote donations always come in.
pub struct DonationEligibility;

impl EligibilityRule<Donation> for DonationEligibility {
    fn check(&self, pair: &LocalRemotePair<Donation>) -> Result<Eligibility, StoreError> {
        if pair.origin != SyncOrigin::Local {
            return Ok(Eligibility::Eligible);
        }
        match pair.local.as_ref() {
            Some(contribution) if !contribution.is_completed() => Ok(Eligibility::Ineligible(format!(
                "contribution status is '{}'",
                contribution.status.get()
            ))),
            _ => Ok(Eligibility::Eligible),
        }
    }
}
