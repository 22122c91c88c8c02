//! Per-entity gate deciding whether a resolved pair should be synced.

use super::pair::LocalRemotePair;
use crate::error::StoreError;
use crate::model::Entity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(String),
}

pub trait EligibilityRule<E: Entity> {
    fn check(&self, pair: &LocalRemotePair<E>) -> Result<Eligibility, StoreError>;
}

/// The default rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEligible;

impl<E: Entity> EligibilityRule<E> for AlwaysEligible {
    fn check(&self, _pair: &LocalRemotePair<E>) -> Result<Eligibility, StoreError> {
        Ok(Eligibility::Eligible)
    }
}
