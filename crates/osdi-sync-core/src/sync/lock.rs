//! Cross-process run locks with a liveness probe on the recorded pid.

use chrono::{DateTime, Duration, Utc};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::storage::{LockName, ProcessLock, Settings};

/// Answers whether a process id is still running.
pub trait ProcessProbe {
    fn current_pid(&self) -> u32;
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn is_alive(&self, pid: u32) -> bool {
        if pid == std::process::id() {
            return true;
        }
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), ProcessRefreshKind::new());
        system.process(pid).is_some()
    }
}

/// What a lock check found.
#[derive(Debug, Clone, PartialEq)]
pub enum LockState {
    /// No marker, or the last run recorded its end.
    Free,
    /// A run is in progress in a live process.
    Held { lock: ProcessLock, stale: bool },
    /// The recorded run never ended and its process is gone.
    Abandoned(ProcessLock),
}

/// Inspect a lock without changing it.
pub fn inspect(
    settings: &Settings,
    name: LockName,
    probe: &dyn ProcessProbe,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<LockState, CoreError> {
    match settings.lock(name)? {
        Some(lock) if lock.is_running() => {
            if probe.is_alive(lock.pid) {
                let stale = lock.age(now) > stale_after;
                Ok(LockState::Held { lock, stale })
            } else {
                Ok(LockState::Abandoned(lock))
            }
        }
        _ => Ok(LockState::Free),
    }
}

/// Record a new run for this process, unless a live run holds the lock.
///
/// Returns `None` when the lock is held. A marker left by a dead process is
/// replaced.
pub fn try_acquire(
    settings: &Settings,
    name: LockName,
    probe: &dyn ProcessProbe,
    stale_after: Duration,
) -> Result<Option<ProcessLock>, CoreError> {
    let now = Utc::now();
    match inspect(settings, name, probe, stale_after, now)? {
        LockState::Held { lock, stale } => {
            if stale {
                warn!(
                    lock = name.as_str(),
                    pid = lock.pid,
                    started_at = %lock.started_at,
                    minutes = lock.age(now).num_minutes(),
                    "previous run still holds the lock and looks stuck"
                );
            } else {
                info!(lock = name.as_str(), pid = lock.pid, "another run is in progress, skipping");
            }
            return Ok(None);
        }
        LockState::Abandoned(lock) => {
            warn!(
                lock = name.as_str(),
                pid = lock.pid,
                started_at = %lock.started_at,
                "previous run died without releasing the lock, taking over"
            );
        }
        LockState::Free => {}
    }

    let lock = ProcessLock::start(probe.current_pid(), now);
    settings.set_lock(name, &lock)?;
    Ok(Some(lock))
}

/// Record the end of a run started with [`try_acquire`].
pub fn release(settings: &Settings, name: LockName, mut lock: ProcessLock) -> Result<(), CoreError> {
    lock.ended_at = Some(Utc::now());
    settings.set_lock(name, &lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use std::rc::Rc;

    pub(crate) struct FakeProbe {
        pub pid: u32,
        pub alive: Vec<u32>,
    }

    impl ProcessProbe for FakeProbe {
        fn current_pid(&self) -> u32 {
            self.pid
        }

        fn is_alive(&self, pid: u32) -> bool {
            self.alive.contains(&pid)
        }
    }

    fn settings() -> Settings {
        Settings::new(Rc::new(Database::open_memory().unwrap()))
    }

    #[test]
    fn acquire_release_cycle() {
        let settings = settings();
        let probe = FakeProbe { pid: 10, alive: vec![10] };
        let lock = try_acquire(&settings, LockName::Batch, &probe, Duration::hours(1))
            .unwrap()
            .unwrap();
        assert_eq!(lock.pid, 10);
        assert!(try_acquire(&settings, LockName::Batch, &probe, Duration::hours(1))
            .unwrap()
            .is_none());

        release(&settings, LockName::Batch, lock).unwrap();
        let stored = settings.lock(LockName::Batch).unwrap().unwrap();
        assert!(stored.ended_at.is_some());
        assert!(try_acquire(&settings, LockName::Batch, &probe, Duration::hours(1))
            .unwrap()
            .is_some());
    }

    #[test]
    fn dead_holder_is_replaced() {
        let settings = settings();
        settings
            .set_lock(LockName::Queue, &ProcessLock::start(99, Utc::now()))
            .unwrap();
        let probe = FakeProbe { pid: 10, alive: vec![10] };
        let lock = try_acquire(&settings, LockName::Queue, &probe, Duration::hours(1))
            .unwrap()
            .unwrap();
        assert_eq!(lock.pid, 10);
    }

    #[test]
    fn old_live_lock_is_stale_but_held() {
        let settings = settings();
        let started = Utc::now() - Duration::hours(2);
        settings
            .set_lock(LockName::Batch, &ProcessLock::start(99, started))
            .unwrap();
        let probe = FakeProbe { pid: 10, alive: vec![99] };
        let state = inspect(&settings, LockName::Batch, &probe, Duration::hours(1), Utc::now()).unwrap();
        assert!(matches!(state, LockState::Held { stale: true, .. }));
        assert!(try_acquire(&settings, LockName::Batch, &probe, Duration::hours(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn system_probe_sees_own_process() {
        assert!(SystemProbe.is_alive(std::process::id()));
        assert_eq!(SystemProbe.current_pid(), std::process::id());
    }

    #[test]
    fn system_probe_reports_exited_process_as_dead() {
        let exe = std::env::current_exe().unwrap();
        let mut child = std::process::Command::new(exe)
            .arg("--list")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!SystemProbe.is_alive(pid));
    }

    #[test]
    fn exited_holder_is_abandoned_and_taken_over() {
        let exe = std::env::current_exe().unwrap();
        let mut child = std::process::Command::new(exe)
            .arg("--list")
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let settings = settings();
        settings
            .set_lock(LockName::Batch, &ProcessLock::start(pid, Utc::now()))
            .unwrap();
        let state = inspect(&settings, LockName::Batch, &SystemProbe, Duration::hours(1), Utc::now()).unwrap();
        assert!(matches!(state, LockState::Abandoned(lock) if lock.pid == pid));
        let lock = try_acquire(&settings, LockName::Batch, &SystemProbe, Duration::hours(1))
            .unwrap()
            .unwrap();
        assert_eq!(lock.pid, std::process::id());
    }
}
