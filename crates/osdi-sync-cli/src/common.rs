//! Helpers shared by the subcommands.

use std::rc::Rc;

use osdi_sync_core::store::RemoteSystem;
use osdi_sync_core::sync::SyncReport;
use osdi_sync_core::{Config, CoreError, Database, EntityKind, OsdiClient, Settings, SyncContext};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Database plus OSDI client for the configured profile.
pub fn open_context(config: &Config) -> Result<SyncContext, CoreError> {
    let db = Rc::new(Database::open()?);
    let remote: Rc<dyn RemoteSystem> = Rc::new(OsdiClient::from_config(&config.remote)?);
    Ok(SyncContext::new(db, remote, config.sync.profile_id))
}

/// Settings only; no remote needed.
pub fn open_settings() -> Result<Settings, CoreError> {
    Ok(Settings::new(Rc::new(Database::open()?)))
}

pub fn parse_entity(value: &str) -> Result<EntityKind, String> {
    value.parse()
}

pub fn print_report(report: &SyncReport, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{} {} -> local {} / remote {}: {} ({})",
        report.kind,
        report.origin,
        report.local_id.as_deref().unwrap_or("-"),
        report.remote_id.as_deref().unwrap_or("-"),
        report.status,
        report.message
    );
    if let Some(detail) = &report.detail {
        println!("  detail: {detail}");
    }
    Ok(())
}
