use clap::{ArgGroup, Args};
use osdi_sync_core::{Config, EntityKind, Registry};
use tracing::debug;

use crate::common::{open_context, parse_entity, print_report, CliResult};

#[derive(Args)]
#[command(group(ArgGroup::new("side").required(true).args(["local", "remote"])))]
pub struct SyncOneArgs {
    /// Entity type (person, tag, tagging, donation)
    #[arg(long, value_parser = parse_entity)]
    entity: EntityKind,
    /// Local record id
    #[arg(long)]
    local: Option<String>,
    /// Remote record id
    #[arg(long)]
    remote: Option<String>,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub fn run(args: SyncOneArgs, config: &Config) -> CliResult {
    let ctx = open_context(config)?;
    let syncer = Registry::standard().build(args.entity, &ctx)?;
    debug!(entity = %args.entity, local = ?args.local, remote = ?args.remote, "syncing one record");
    let report = match (args.local, args.remote) {
        (Some(id), _) => syncer.sync_local_id(&id)?,
        (None, Some(id)) => syncer.sync_remote_id(&id)?,
        (None, None) => return Err("one of --local or --remote is required".into()),
    };
    print_report(&report, args.json)?;
    if report.is_error() {
        return Err(format!("{} sync failed: {}", report.kind, report.message).into());
    }
    Ok(())
}
