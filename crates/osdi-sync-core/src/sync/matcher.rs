//! Finding the counterpart of an unlinked origin object.

use tracing::debug;

use super::pair::LocalRemotePair;
use super::results::{Caller, ErrorDetail, MatchResult, MatchStatus};
use crate::error::MatchError;
use crate::model::{Entity, SyncOrigin};

/// Entity-specific lookup of a counterpart on the other side.
pub trait Matcher<E: Entity> {
    /// Remote counterpart of a local object, `Ok(None)` when there is none.
    fn find_match_for_local(&self, local: &E::Local) -> Result<Option<E::Remote>, MatchError>;

    /// Local counterpart of a remote object.
    fn find_match_for_remote(&self, remote: &E::Remote) -> Result<Option<E::Local>, MatchError>;

    /// Look up the counterpart of `pair`'s origin and bind it as the target.
    ///
    /// Never fails: every error becomes an error status on the result.
    fn try_to_find_match_for(&self, pair: &mut LocalRemotePair<E>) -> MatchResult {
        let caller = Caller::new("matcher", E::KIND);
        let found = match pair.origin {
            SyncOrigin::Local => {
                let lookup = match pair.local.as_ref() {
                    Some(local) => self.find_match_for_local(local),
                    None => Err(MatchError::MissingData("pair has no local origin".into())),
                };
                lookup.map(|remote| {
                    let found = remote.is_some();
                    if found {
                        pair.bind_remote(remote);
                    }
                    found
                })
            }
            SyncOrigin::Remote => {
                let lookup = match pair.remote.as_ref() {
                    Some(remote) => self.find_match_for_remote(remote),
                    None => Err(MatchError::MissingData("pair has no remote origin".into())),
                };
                lookup.map(|local| {
                    let found = local.is_some();
                    if found {
                        pair.bind_local(local);
                    }
                    found
                })
            }
        };

        match found {
            Ok(true) => MatchResult::new(MatchStatus::FoundMatch, "found match", caller),
            Ok(false) => MatchResult::new(MatchStatus::NoMatch, "no match", caller),
            Err(err) => {
                debug!(entity = %E::KIND, origin = %pair.origin, error = %err, "match failed");
                match_error_result(err, caller)
            }
        }
    }
}

fn match_error_result(err: MatchError, caller: Caller) -> MatchResult {
    match err {
        MatchError::Indeterminate(message) => {
            MatchResult::new(MatchStatus::ErrorIndeterminate, message, caller)
        }
        MatchError::MissingData(message) => {
            MatchResult::new(MatchStatus::ErrorMissingData, message, caller)
        }
        MatchError::InvalidId(message) => MatchResult::new(MatchStatus::ErrorInvalidId, message, caller),
        MatchError::Store(err) => {
            MatchResult::new(MatchStatus::ErrorMisc, "lookup failed", caller).with_detail(err)
        }
        MatchError::Misc(message) => MatchResult::new(MatchStatus::ErrorMisc, message.clone(), caller)
            .with_detail(ErrorDetail::Message(message)),
    }
}

/// Zero or one candidate; more than one is indeterminate.
pub fn at_most_one<T>(mut candidates: Vec<T>, what: &str) -> Result<Option<T>, MatchError> {
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        n => Err(MatchError::Indeterminate(format!("{n} candidate {what} found"))),
    }
}

/// Narrow an ambiguous lookup with a stricter one.
///
/// `broad` candidates decide the outcome when there are fewer than two;
/// otherwise `refine` runs and must yield exactly one candidate.
pub fn refine_or_fail<T>(
    broad: Vec<T>,
    refine: impl FnOnce() -> Result<Vec<T>, MatchError>,
) -> Result<Option<T>, MatchError> {
    if broad.len() < 2 {
        return Ok(broad.into_iter().next());
    }
    let mut refined = refine()?;
    match refined.len() {
        0 => Err(MatchError::Indeterminate(
            "not unique, no match by name either".into(),
        )),
        1 => Ok(refined.pop()),
        _ => Err(MatchError::Indeterminate("not unique even with name".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_rejects_ambiguity() {
        assert_eq!(at_most_one(Vec::<u8>::new(), "tags").unwrap(), None);
        assert_eq!(at_most_one(vec![1], "tags").unwrap(), Some(1));
        assert!(matches!(
            at_most_one(vec![1, 2], "tags"),
            Err(MatchError::Indeterminate(_))
        ));
    }

    #[test]
    fn refine_only_runs_on_ambiguity() {
        let result = refine_or_fail(vec![1], || panic!("refined a unique match"));
        assert_eq!(result.unwrap(), Some(1));
        assert_eq!(refine_or_fail(Vec::<u8>::new(), || Ok(vec![])).unwrap(), None);
    }

    #[test]
    fn refine_messages() {
        let none = refine_or_fail(vec![1, 2], || Ok(vec![])).unwrap_err();
        assert_eq!(none.to_string(), "not unique, no match by name either");
        let many = refine_or_fail(vec![1, 2, 3], || Ok(vec![1, 2])).unwrap_err();
        assert_eq!(many.to_string(), "not unique even with name");
        assert_eq!(refine_or_fail(vec![1, 2], || Ok(vec![2])).unwrap(), Some(2));
    }
}
