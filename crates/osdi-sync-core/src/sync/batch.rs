//! Horizon-driven batch runs over every enabled entity.

use chrono::{DateTime, Duration, Utc};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use super::lock::{self, ProcessProbe, SystemProbe};
use super::pair::SyncReport;
use super::registry::{EntitySync, Registry, SyncContext};
use crate::error::CoreError;
use crate::model::SyncOrigin;
use crate::storage::{Config, HorizonMark, LockName, Settings};

/// Per-entity tally of one batch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub synced: usize,
    pub failed: usize,
}

pub struct BatchSyncer {
    settings: Settings,
    syncers: Vec<Box<dyn EntitySync>>,
    probe: Box<dyn ProcessProbe>,
    horizon_margin: Duration,
    stale_lock_after: Duration,
    full_rescan: bool,
}

impl BatchSyncer {
    /// `syncers` run in the given order; build them with
    /// [`Registry::build_all`] to get dependency order.
    pub fn new(settings: Settings, syncers: Vec<Box<dyn EntitySync>>) -> Self {
        Self {
            settings,
            syncers,
            probe: Box::new(SystemProbe),
            horizon_margin: Duration::seconds(30),
            stale_lock_after: Duration::hours(1),
            full_rescan: false,
        }
    }

    /// Batch syncer for every entity enabled in `config`.
    pub fn from_config(config: &Config, ctx: &SyncContext, registry: &Registry) -> Result<Self, CoreError> {
        let kinds = config.sync.enabled_kinds()?;
        let syncers = registry.build_all(&kinds, ctx)?;
        Ok(Self::new(Settings::new(Rc::clone(&ctx.db)), syncers)
            .with_horizon_margin(config.horizon_margin())
            .with_stale_lock_after(config.stale_lock_after()))
    }

    pub fn with_probe(mut self, probe: impl ProcessProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_horizon_margin(mut self, margin: Duration) -> Self {
        self.horizon_margin = margin;
        self
    }

    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    /// Forget the stored horizons of the scanned entities once the lock is
    /// held, so the run considers every record.
    pub fn with_full_rescan(mut self, full: bool) -> Self {
        self.full_rescan = full;
        self
    }

    /// Sync remote records changed since the last run.
    ///
    /// Returns `None` when another batch run holds the lock, otherwise the
    /// number of records processed without error.
    pub fn batch_sync_from_remote(&self) -> Result<Option<usize>, CoreError> {
        self.run(SyncOrigin::Remote)
    }

    /// Sync local records changed since the last run.
    pub fn batch_sync_from_local(&self) -> Result<Option<usize>, CoreError> {
        self.run(SyncOrigin::Local)
    }

    pub fn run(&self, origin: SyncOrigin) -> Result<Option<usize>, CoreError> {
        let Some(held) =
            lock::try_acquire(&self.settings, LockName::Batch, self.probe.as_ref(), self.stale_lock_after)?
        else {
            return Ok(None);
        };

        let outcome = self.run_locked(origin);
        let released = lock::release(&self.settings, LockName::Batch, held);
        let count = outcome?;
        released?;
        Ok(Some(count))
    }

    fn run_locked(&self, origin: SyncOrigin) -> Result<usize, CoreError> {
        let run_started = Utc::now();
        let mut total = 0;

        for syncer in &self.syncers {
            let kind = syncer.kind();
            if self.full_rescan {
                self.settings.reset_horizon(kind, origin)?;
                info!(entity = %kind, %origin, "horizon reset for full rescan");
            }
            let mark = self.settings.horizon(kind, origin)?;
            let horizon = mark.horizon(self.horizon_margin);
            info!(entity = %kind, %origin, horizon = ?horizon, "batch pass starting");

            let reports = match syncer.sync_modified_since(origin, horizon) {
                Ok(reports) => reports,
                Err(err) => {
                    error!(entity = %kind, %origin, error = %err, "could not list candidates, horizon kept");
                    continue;
                }
            };

            let tally = tally(&reports);
            if let Some(next) = next_mark(&mark, run_started, &reports) {
                self.settings.set_horizon(kind, origin, &next)?;
            }
            info!(
                entity = %kind,
                %origin,
                synced = tally.synced,
                failed = tally.failed,
                "batch pass finished"
            );
            total += tally.synced;
        }

        Ok(total)
    }
}

fn tally(reports: &[SyncReport]) -> BatchTally {
    let mut tally = BatchTally::default();
    for report in reports {
        if report.is_error() {
            tally.failed += 1;
            warn!(
                entity = %report.kind,
                origin = %report.origin,
                local_id = ?report.local_id,
                remote_id = ?report.remote_id,
                status = %report.status,
                detail = ?report.detail,
                "{}",
                report.message
            );
        } else {
            tally.synced += 1;
            debug!(
                entity = %report.kind,
                origin = %report.origin,
                local_id = ?report.local_id,
                remote_id = ?report.remote_id,
                status = %report.status,
                "{}",
                report.message
            );
        }
    }
    tally
}

/// Horizon bookkeeping after a pass.
///
/// The latest synced time never passes the earliest failed record, so
/// failures stay above the next horizon and get retried. `None` keeps the
/// previous mark.
fn next_mark(
    previous: &HorizonMark,
    run_started: DateTime<Utc>,
    reports: &[SyncReport],
) -> Option<HorizonMark> {
    let first_failure = reports
        .iter()
        .filter(|r| r.is_error())
        .filter_map(|r| r.origin_modified)
        .min();
    let failed_any = reports.iter().any(SyncReport::is_error);

    let latest = reports
        .iter()
        .filter(|r| !r.is_error())
        .filter_map(|r| r.origin_modified)
        .filter(|at| first_failure.map_or(true, |fail| *at < fail))
        .max();

    if failed_any && latest.is_none() {
        return None;
    }
    Some(previous.advance(run_started, latest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use crate::sync::results::SyncStatus;
    use chrono::TimeZone;

    fn report(status: SyncStatus, minute: u32) -> SyncReport {
        SyncReport {
            kind: EntityKind::Person,
            origin: SyncOrigin::Remote,
            local_id: None,
            remote_id: None,
            status,
            message: String::new(),
            detail: None,
            origin_modified: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()),
        }
    }

    #[test]
    fn tally_counts_non_errors() {
        let reports = vec![
            report(SyncStatus::Success, 1),
            report(SyncStatus::NoSyncNeeded, 2),
            report(SyncStatus::Error, 3),
        ];
        assert_eq!(tally(&reports), BatchTally { synced: 2, failed: 1 });
    }

    #[test]
    fn horizon_stops_before_first_failure() {
        let run = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        let reports = vec![
            report(SyncStatus::Success, 1),
            report(SyncStatus::SaveError, 2),
            report(SyncStatus::Success, 3),
        ];
        let mark = next_mark(&HorizonMark::default(), run, &reports).unwrap();
        assert_eq!(
            mark.latest_synced,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap())
        );
        assert_eq!(mark.last_run_started, Some(run));
    }

    #[test]
    fn all_failures_keep_previous_mark() {
        let run = Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap();
        assert!(next_mark(&HorizonMark::default(), run, &[report(SyncStatus::Error, 1)]).is_none());
        let empty = next_mark(&HorizonMark::default(), run, &[]).unwrap();
        assert_eq!(empty.last_run_started, Some(run));
        assert_eq!(empty.latest_synced, None);
    }
}
