//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own data directory.

use chrono::{Duration, Utc};
use osdi_sync_core::storage::{HorizonMark, LockName, ProcessLock};
use osdi_sync_core::{Database, EntityKind, Settings, SyncOrigin};
use std::process::Command;
use std::rc::Rc;
use tempfile::TempDir;

/// Run the CLI with `OSDI_SYNC_HOME` pointed at `home`.
fn run_cli(home: &TempDir, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_osdi-sync"))
        .args(args)
        .env("OSDI_SYNC_HOME", home.path())
        .env_remove("OSDI_API_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

/// Settings over the database the CLI will open for `home`.
fn settings_in(home: &TempDir) -> Settings {
    let db = Database::open_at(&home.path().join("osdi-sync.db")).unwrap();
    Settings::new(Rc::new(db))
}

fn home() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn test_config_list_writes_defaults() {
    let home = home();
    let (code, stdout, _) = run_cli(&home, &["config", "list"]);
    assert_eq!(code, 0, "config list failed");
    assert!(stdout.contains("remote.endpoint = https://actionnetwork.org/api/v2"));
    assert!(stdout.contains("queue.debounce_secs = 3"));
    assert!(home.path().join("config.toml").exists());
}

#[test]
fn test_config_set_then_get() {
    let home = home();
    let (code, stdout, _) = run_cli(&home, &["config", "set", "sync.profile_id", "7"]);
    assert_eq!(code, 0, "config set failed");
    assert_eq!(stdout.trim(), "ok");

    let (code, stdout, _) = run_cli(&home, &["config", "get", "sync.profile_id"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "7");
}

#[test]
fn test_config_rejects_unknown_key() {
    let home = home();
    let (code, _, stderr) = run_cli(&home, &["config", "set", "sync.nonsense", "1"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_lock_status_on_fresh_home() {
    let home = home();
    let (code, stdout, _) = run_cli(&home, &["lock", "status"]);
    assert_eq!(code, 0, "lock status failed");
    assert!(stdout.contains("batch: free"));
    assert!(stdout.contains("queue: free"));

    let (code, stdout, _) = run_cli(&home, &["lock", "clear", "batch"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("batch: not set"));
}

#[test]
fn test_queue_status_is_empty() {
    let home = home();
    let (code, stdout, _) = run_cli(&home, &["queue", "status", "--json"]);
    assert_eq!(code, 0, "queue status failed");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["pending"], 0);
    assert_eq!(parsed["failed"], serde_json::json!([]));
}

#[test]
fn test_batch_without_token_fails() {
    let home = home();
    let (code, _, stderr) = run_cli(&home, &["batch", "run", "local"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("OSDI_API_TOKEN"), "stderr: {stderr}");
}

#[test]
fn test_sync_one_requires_a_side() {
    let home = home();
    let (code, _, _) = run_cli(&home, &["sync-one", "--entity", "person"]);
    assert_ne!(code, 0);
}

#[test]
fn test_full_batch_leaves_horizons_alone_while_locked() {
    let home = home();
    let mark = HorizonMark {
        last_run_started: Some(Utc::now()),
        latest_synced: Some(Utc::now() - Duration::minutes(5)),
    };
    {
        let settings = settings_in(&home);
        settings
            .set_horizon(EntityKind::Person, SyncOrigin::Local, &mark)
            .unwrap();
        // This test process is alive, so the marker counts as a running batch.
        settings
            .set_lock(LockName::Batch, &ProcessLock::start(std::process::id(), Utc::now()))
            .unwrap();
    }

    let output = Command::new(env!("CARGO_BIN_EXE_osdi-sync"))
        .args(["batch", "run", "local", "--entity", "person", "--full"])
        .env("OSDI_SYNC_HOME", home.path())
        .env("OSDI_API_TOKEN", "test-token")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}");
    assert!(stdout.contains("skipped"), "stdout: {stdout}");

    let settings = settings_in(&home);
    assert_eq!(
        settings.horizon(EntityKind::Person, SyncOrigin::Local).unwrap(),
        mark
    );
}
