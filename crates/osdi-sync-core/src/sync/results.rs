//! Typed outcomes of each sync stage.
//!
//! Every stage produces an [`Outcome`] over its own closed status enum.
//! Outcomes are pushed onto a [`ResultStack`] so later stages (and callers)
//! can inspect what happened before them.

use serde::Serialize;
use std::fmt;

use crate::error::StoreError;
use crate::model::EntityKind;

/// A closed set of status codes for one stage.
pub trait StatusCode: Copy + fmt::Debug + PartialEq {
    fn as_str(&self) -> &'static str;
    fn is_error(&self) -> bool;
}

macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $code:literal $(, error = $err:literal)?);+ $(;)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl StatusCode for $name {
            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }

            fn is_error(&self) -> bool {
                match self {
                    $($name::$variant => false $(|| $err)?),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

status_enum! {
    /// Outcome of looking for a counterpart.
    MatchStatus {
        FoundMatch => "FOUND_MATCH";
        NoMatch => "NO_MATCH";
        ErrorIndeterminate => "ERROR_INDETERMINATE", error = true;
        ErrorMissingData => "ERROR_MISSING_DATA", error = true;
        ErrorInvalidId => "ERROR_INVALID_ID", error = true;
        ErrorMisc => "ERROR_MISC", error = true;
    }
}

status_enum! {
    /// Outcome of resolving the target, from saved state or by matching.
    FetchMatchStatus {
        FetchedSavedMatch => "FETCHED_SAVED_MATCH";
        FoundNewMatch => "FOUND_NEW_MATCH";
        NoMatchFound => "NO_MATCH_FOUND";
        Error => "ERROR", error = true;
    }
}

status_enum! {
    EligibilityStatus {
        Eligible => "ELIGIBLE";
        Ineligible => "INELIGIBLE";
        Error => "ERROR", error = true;
    }
}

status_enum! {
    MapStatus {
        Success => "SUCCESS";
        SkippedAllChanges => "SKIPPED_ALL_CHANGES";
        Error => "ERROR", error = true;
    }
}

status_enum! {
    SaveStatus {
        Success => "SUCCESS";
        Error => "ERROR", error = true;
    }
}

status_enum! {
    /// Terminal outcome of one sync attempt.
    SyncStatus {
        Success => "SUCCESS";
        NoSyncNeeded => "NO_SYNC_NEEDED";
        NoChangesToWrite => "NO_CHANGES_TO_WRITE";
        SkippedChanges => "SKIPPED_CHANGES";
        SaveError => "SAVE_ERROR", error = true;
        Error => "ERROR", error = true;
    }
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::Success,
        SyncStatus::NoSyncNeeded,
        SyncStatus::NoChangesToWrite,
        SyncStatus::SkippedChanges,
        SyncStatus::SaveError,
        SyncStatus::Error,
    ];

    pub fn parse(code: &str) -> Option<SyncStatus> {
        Self::ALL.into_iter().find(|s| s.as_str() == code)
    }
}

/// Structured error payload attached to an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    /// A store or transport failure other than an API rejection.
    Store(StoreError),
    /// The remote API rejected the request.
    Api { status: u16, body: String },
    Validation { field: String, message: String },
    Message(String),
}

impl From<StoreError> for ErrorDetail {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Api { status, body } => ErrorDetail::Api { status, body },
            other => ErrorDetail::Store(other),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Store(err) => write!(f, "{err}"),
            ErrorDetail::Api { status, body } => write!(f, "HTTP {status}: {body}"),
            ErrorDetail::Validation { field, message } => write!(f, "{field}: {message}"),
            ErrorDetail::Message(message) => f.write_str(message),
        }
    }
}

/// The component that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub component: &'static str,
    pub entity: EntityKind,
}

impl Caller {
    pub fn new(component: &'static str, entity: EntityKind) -> Self {
        Self { component, entity }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.component)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<S> {
    pub status: S,
    pub message: String,
    pub detail: Option<ErrorDetail>,
    pub caller: Caller,
}

impl<S: StatusCode> Outcome<S> {
    pub fn new(status: S, message: impl Into<String>, caller: Caller) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
            caller,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<ErrorDetail>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}

impl<S: StatusCode> fmt::Display for Outcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.caller, self.status.as_str(), self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

pub type MatchResult = Outcome<MatchStatus>;
pub type FetchMatchResult = Outcome<FetchMatchStatus>;
pub type EligibilityResult = Outcome<EligibilityStatus>;
pub type MapResult = Outcome<MapStatus>;
pub type SaveResult = Outcome<SaveStatus>;
pub type SyncResult = Outcome<SyncStatus>;

/// Any stage outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    Match(MatchResult),
    FetchMatch(FetchMatchResult),
    Eligibility(EligibilityResult),
    Map(MapResult),
    Save(SaveResult),
    Sync(SyncResult),
}

impl StageResult {
    pub fn is_error(&self) -> bool {
        match self {
            StageResult::Match(r) => r.is_error(),
            StageResult::FetchMatch(r) => r.is_error(),
            StageResult::Eligibility(r) => r.is_error(),
            StageResult::Map(r) => r.is_error(),
            StageResult::Save(r) => r.is_error(),
            StageResult::Sync(r) => r.is_error(),
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            StageResult::Match(r) => r.status.as_str(),
            StageResult::FetchMatch(r) => r.status.as_str(),
            StageResult::Eligibility(r) => r.status.as_str(),
            StageResult::Map(r) => r.status.as_str(),
            StageResult::Save(r) => r.status.as_str(),
            StageResult::Sync(r) => r.status.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StageResult::Match(r) => &r.message,
            StageResult::FetchMatch(r) => &r.message,
            StageResult::Eligibility(r) => &r.message,
            StageResult::Map(r) => &r.message,
            StageResult::Save(r) => &r.message,
            StageResult::Sync(r) => &r.message,
        }
    }

    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            StageResult::Match(r) => r.detail.as_ref(),
            StageResult::FetchMatch(r) => r.detail.as_ref(),
            StageResult::Eligibility(r) => r.detail.as_ref(),
            StageResult::Map(r) => r.detail.as_ref(),
            StageResult::Save(r) => r.detail.as_ref(),
            StageResult::Sync(r) => r.detail.as_ref(),
        }
    }
}

macro_rules! impl_from_outcome {
    ($($status:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<Outcome<$status>> for StageResult {
                fn from(outcome: Outcome<$status>) -> Self {
                    StageResult::$variant(outcome)
                }
            }
        )+
    };
}

impl_from_outcome!(
    MatchStatus => Match,
    FetchMatchStatus => FetchMatch,
    EligibilityStatus => Eligibility,
    MapStatus => Map,
    SaveStatus => Save,
    SyncStatus => Sync,
);

/// Ordered outcomes of one attempt, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultStack {
    results: Vec<StageResult>,
}

impl ResultStack {
    pub fn push(&mut self, result: impl Into<StageResult>) {
        self.results.push(result.into());
    }

    pub fn last(&self) -> Option<&StageResult> {
        self.results.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.results.iter().any(StageResult::is_error)
    }

    /// Most recent error detail, if any stage recorded one.
    pub fn last_detail(&self) -> Option<&ErrorDetail> {
        self.results.iter().rev().find_map(StageResult::detail)
    }

    pub fn last_match(&self) -> Option<&MatchResult> {
        self.results.iter().rev().find_map(|r| match r {
            StageResult::Match(m) => Some(m),
            _ => None,
        })
    }

    pub fn last_fetch_match(&self) -> Option<&FetchMatchResult> {
        self.results.iter().rev().find_map(|r| match r {
            StageResult::FetchMatch(m) => Some(m),
            _ => None,
        })
    }

    pub fn last_map(&self) -> Option<&MapResult> {
        self.results.iter().rev().find_map(|r| match r {
            StageResult::Map(m) => Some(m),
            _ => None,
        })
    }

    pub fn last_sync(&self) -> Option<&SyncResult> {
        self.results.iter().rev().find_map(|r| match r {
            StageResult::Sync(s) => Some(s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> Caller {
        Caller::new("test", EntityKind::Person)
    }

    #[test]
    fn error_flags_follow_status_codes() {
        assert!(!MatchStatus::FoundMatch.is_error());
        assert!(!MatchStatus::NoMatch.is_error());
        assert!(MatchStatus::ErrorIndeterminate.is_error());
        assert!(!SyncStatus::SkippedChanges.is_error());
        assert!(!SyncStatus::NoSyncNeeded.is_error());
        assert!(SyncStatus::SaveError.is_error());
        assert!(EligibilityStatus::Error.is_error());
        assert!(!MapStatus::SkippedAllChanges.is_error());
    }

    #[test]
    fn sync_status_codes_parse_back() {
        for status in SyncStatus::ALL {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("MAYBE"), None);
    }

    #[test]
    fn api_errors_become_api_detail() {
        let detail: ErrorDetail = StoreError::Api {
            status: 400,
            body: "duplicate email".into(),
        }
        .into();
        assert_eq!(
            detail,
            ErrorDetail::Api {
                status: 400,
                body: "duplicate email".into()
            }
        );
        let detail: ErrorDetail = StoreError::Transport("reset".into()).into();
        assert!(matches!(detail, ErrorDetail::Store(_)));
    }

    #[test]
    fn stack_finds_latest_of_each_stage() {
        let mut stack = ResultStack::default();
        stack.push(MatchResult::new(MatchStatus::NoMatch, "none", caller()));
        stack.push(
            SaveResult::new(SaveStatus::Error, "rejected", caller())
                .with_detail(ErrorDetail::Message("boom".into())),
        );
        stack.push(SyncResult::new(SyncStatus::SaveError, "save failed", caller()));

        assert_eq!(stack.len(), 3);
        assert!(stack.has_error());
        assert_eq!(stack.last_match().unwrap().status, MatchStatus::NoMatch);
        assert_eq!(stack.last_sync().unwrap().status, SyncStatus::SaveError);
        assert_eq!(stack.last_detail(), Some(&ErrorDetail::Message("boom".into())));
        assert!(stack.last_map().is_none());
    }

    #[test]
    fn outcome_display_includes_caller_and_detail() {
        let outcome = SyncResult::new(SyncStatus::Error, "error finding match", caller())
            .with_detail(ErrorDetail::Message("two candidates".into()));
        assert_eq!(
            outcome.to_string(),
            "[person:test] ERROR error finding match (two candidates)"
        );
    }
}
