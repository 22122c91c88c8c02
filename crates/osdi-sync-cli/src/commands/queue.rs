use clap::Subcommand;
use osdi_sync_core::sync::TaskQueue;
use osdi_sync_core::{Config, Database, QueueProcessor, Registry};
use std::rc::Rc;
use tracing::{debug, warn};

use crate::common::{open_context, CliResult};

#[derive(Subcommand)]
pub enum QueueAction {
    /// Run every task whose debounce has elapsed
    Process,
    /// Show pending and parked tasks
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(action: QueueAction, config: &Config) -> CliResult {
    match action {
        QueueAction::Process => {
            let ctx = open_context(config)?;
            let processor = QueueProcessor::from_config(config, &ctx, &Registry::standard())?;
            debug!("processing ready queue tasks");
            match processor.process_queue()? {
                Some(done) => println!("processed {done} task(s)"),
                None => {
                    warn!("another queue run holds the lock");
                    println!("skipped: another queue run is in progress");
                }
            }
        }
        QueueAction::Status { json } => {
            let queue = TaskQueue::new(Rc::new(Database::open()?), config.debounce());
            let pending = queue.pending_count()?;
            let failed = queue.failed()?;
            if json {
                let parked: Vec<serde_json::Value> = failed
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "entity": t.kind.as_str(),
                            "local_id": t.local_id,
                            "operation": t.operation.as_str(),
                            "attempts": t.attempts,
                            "last_error": t.last_error,
                        })
                    })
                    .collect();
                let out = serde_json::json!({ "pending": pending, "failed": parked });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("pending: {pending}");
                println!("failed: {}", failed.len());
                for task in &failed {
                    println!(
                        "  {} {} {} after {} attempt(s): {}",
                        task.kind,
                        task.operation,
                        task.local_id,
                        task.attempts,
                        task.last_error.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }
    Ok(())
}
