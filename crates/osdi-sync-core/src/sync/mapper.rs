//! Copying origin values onto the target.

use tracing::debug;

use super::pair::LocalRemotePair;
use super::results::{Caller, ErrorDetail, MapResult, MapStatus};
use crate::error::MapError;
use crate::model::{Entity, SyncOrigin};

/// What a mapper did with the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapAction {
    /// Origin values were staged on the target (possibly with no change).
    Mapped,
    /// The target cannot take these changes; nothing was staged.
    SkipAllChanges(String),
}

/// Entity-specific field transformation.
///
/// Implementations stage values with [`crate::model::Field::set`] so that a
/// converged target ends up touched but not altered.
pub trait Mapper<E: Entity> {
    fn map_local_to_remote(&self, local: &E::Local, remote: &mut E::Remote) -> Result<MapAction, MapError>;

    fn map_remote_to_local(&self, remote: &E::Remote, local: &mut E::Local) -> Result<MapAction, MapError>;

    /// Map the origin onto the target, creating a blank target when the pair
    /// has none. The target is only replaced when mapping succeeds.
    fn map_one_way(&self, pair: &mut LocalRemotePair<E>) -> MapResult {
        let caller = Caller::new("mapper", E::KIND);
        let action = match pair.origin {
            SyncOrigin::Local => {
                let mut target = pair.remote.clone().unwrap_or_default();
                let action = match pair.local.as_ref() {
                    Some(local) => self.map_local_to_remote(local, &mut target),
                    None => Err(MapError::Misc("pair has no local origin".into())),
                };
                if action == Ok(MapAction::Mapped) {
                    pair.remote = Some(target);
                }
                action
            }
            SyncOrigin::Remote => {
                let mut target = pair.local.clone().unwrap_or_default();
                let action = match pair.remote.as_ref() {
                    Some(remote) => self.map_remote_to_local(remote, &mut target),
                    None => Err(MapError::Misc("pair has no remote origin".into())),
                };
                if action == Ok(MapAction::Mapped) {
                    pair.local = Some(target);
                }
                action
            }
        };

        match action {
            Ok(MapAction::Mapped) => MapResult::new(MapStatus::Success, "mapped", caller),
            Ok(MapAction::SkipAllChanges(reason)) => {
                debug!(entity = %E::KIND, reason = %reason, "skipping all changes");
                MapResult::new(MapStatus::SkippedAllChanges, reason, caller)
            }
            Err(MapError::Store(err)) => {
                MapResult::new(MapStatus::Error, "mapping failed", caller).with_detail(err)
            }
            Err(MapError::Validation { field, message }) => {
                MapResult::new(MapStatus::Error, format!("cannot map {field}"), caller)
                    .with_detail(ErrorDetail::Validation { field, message })
            }
            Err(MapError::Misc(message)) => MapResult::new(MapStatus::Error, message.clone(), caller)
                .with_detail(ErrorDetail::Message(message)),
        }
    }
}

/// Normalize a decimal amount to two fraction digits, e.g. `"5"` to `"5.00"`.
pub fn normalize_amount(raw: &str) -> Result<String, MapError> {
    let value: f64 = raw.trim().parse().map_err(|_| MapError::Validation {
        field: "amount".into(),
        message: format!("'{raw}' is not a number"),
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(MapError::Validation {
            field: "amount".into(),
            message: format!("'{raw}' is not a valid amount"),
        });
    }
    Ok(format!("{value:.2}"))
}

/// Keep digits only, preserving a leading `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}
