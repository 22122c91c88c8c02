use chrono::Utc;
use clap::{Subcommand, ValueEnum};
use osdi_sync_core::storage::LockName;
use osdi_sync_core::sync::lock::{inspect, LockState};
use osdi_sync_core::sync::SystemProbe;
use osdi_sync_core::Config;
use tracing::warn;

use crate::common::{open_settings, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum LockArg {
    Batch,
    Queue,
}

impl From<LockArg> for LockName {
    fn from(arg: LockArg) -> Self {
        match arg {
            LockArg::Batch => LockName::Batch,
            LockArg::Queue => LockName::Queue,
        }
    }
}

#[derive(Subcommand)]
pub enum LockAction {
    /// Show both locks
    Status,
    /// Remove a lock marker left behind by a crashed run
    Clear {
        #[arg(value_enum)]
        name: LockArg,
    },
}

pub fn run(action: LockAction, config: &Config) -> CliResult {
    let settings = open_settings()?;
    match action {
        LockAction::Status => {
            let now = Utc::now();
            for name in [LockName::Batch, LockName::Queue] {
                let state = inspect(&settings, name, &SystemProbe, config.stale_lock_after(), now)?;
                match state {
                    LockState::Free => println!("{}: free", name.as_str()),
                    LockState::Held { lock, stale } => println!(
                        "{}: held by pid {} since {}{}",
                        name.as_str(),
                        lock.pid,
                        lock.started_at.to_rfc3339(),
                        if stale { " (stale)" } else { "" }
                    ),
                    LockState::Abandoned(lock) => println!(
                        "{}: abandoned by pid {} since {}",
                        name.as_str(),
                        lock.pid,
                        lock.started_at.to_rfc3339()
                    ),
                }
            }
        }
        LockAction::Clear { name } => {
            let name = LockName::from(name);
            if settings.clear_lock(name)? {
                warn!(lock = name.as_str(), "lock marker cleared by hand");
                println!("{}: cleared", name.as_str());
            } else {
                println!("{}: not set", name.as_str());
            }
        }
    }
    Ok(())
}
