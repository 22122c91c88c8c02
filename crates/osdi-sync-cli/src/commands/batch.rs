use clap::{Subcommand, ValueEnum};
use osdi_sync_core::{BatchSyncer, Config, EntityKind, Registry, Settings, SyncOrigin};
use std::rc::Rc;
use tracing::{info, warn};

use crate::common::{open_context, open_settings, parse_entity, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum Direction {
    /// Push local changes to the remote
    Local,
    /// Pull remote changes into the local CRM
    Remote,
}

impl From<Direction> for SyncOrigin {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Local => SyncOrigin::Local,
            Direction::Remote => SyncOrigin::Remote,
        }
    }
}

#[derive(Subcommand)]
pub enum BatchAction {
    /// Run one batch pass
    Run {
        /// Which side's changes to sync
        #[arg(value_enum)]
        direction: Direction,
        /// Limit the run to one entity type (person, tag, tagging, donation)
        #[arg(long, value_parser = parse_entity)]
        entity: Option<EntityKind>,
        /// Forget the horizons first and scan everything
        #[arg(long)]
        full: bool,
    },
    /// Show the stored horizon of every entity and direction
    Horizons,
}

pub fn run(action: BatchAction, config: &Config) -> CliResult {
    match action {
        BatchAction::Run {
            direction,
            entity,
            full,
        } => {
            let ctx = open_context(config)?;
            let settings = Settings::new(Rc::clone(&ctx.db));

            let kinds = match entity {
                Some(kind) => vec![kind],
                None => config.sync.enabled_kinds()?,
            };
            let syncers = Registry::standard().build_all(&kinds, &ctx)?;
            let batch = BatchSyncer::new(settings, syncers)
                .with_horizon_margin(config.horizon_margin())
                .with_stale_lock_after(config.stale_lock_after())
                .with_full_rescan(full);

            let origin = SyncOrigin::from(direction);
            info!(%origin, full, entities = kinds.len(), "starting batch run");
            match batch.run(origin)? {
                Some(count) => println!("synced {count} record(s)"),
                None => {
                    warn!(%origin, "another batch run holds the lock");
                    println!("skipped: another batch run is in progress");
                }
            }
        }
        BatchAction::Horizons => {
            let settings = open_settings()?;
            for kind in EntityKind::ALL {
                for origin in [SyncOrigin::Local, SyncOrigin::Remote] {
                    let mark = settings.horizon(kind, origin)?;
                    let show = |at: Option<chrono::DateTime<chrono::Utc>>| {
                        at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
                    };
                    println!(
                        "{:<9} {:<6} latest_synced={} last_run={}",
                        kind.as_str(),
                        origin.as_str(),
                        show(mark.latest_synced),
                        show(mark.last_run_started)
                    );
                }
            }
        }
    }
    Ok(())
}
