use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ScanqError};
use crate::job::{Job, JobId, Phase};
use crate::store::local::atomic_write;

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "lock.json";
#[cfg(not(target_os = "linux"))]
const STALE_LOCK_MS: u64 = 6 * 60 * 60 * 1000; // 6 hours

/// Snapshot of the active job, rewritten after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub size_bytes: u64,
    pub phase: Phase,
    pub attempt_number: u32,
    pub started_at: u64,
    pub percent_complete: u8,
    /// Set while the job is parked on a timer. Absent means the job is
    /// actively being driven through its phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_wake_at: Option<u64>,
}

/// Terminal result of the most recently finished job. Kept until the next
/// finished job overwrites it so an observer attaching to an idle engine
/// still learns how the last submission ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum LastOutcome {
    #[serde(rename_all = "camelCase")]
    Completed {
        job_id: JobId,
        report: String,
        at: u64,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        job_id: JobId,
        message: String,
        at: u64,
    },
}

/// Everything the engine persists. Written as one JSON document so a
/// crash can never leave the queue and the active job out of step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub current: Option<JobRecord>,
    pub queue: Vec<Job>,
    pub rate_window: Vec<u64>,
    pub adaptive_delay_ms: Option<u64>,
    pub last_outcome: Option<LastOutcome>,
}

/// Owns the state file and the exclusive lock on its directory.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    _lock: DirLock,
}

impl StateStore {
    /// Open (creating if needed) the state directory and take its lock.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let lock = DirLock::acquire(dir)?;
        Ok(Self {
            path: dir.join(STATE_FILE),
            _lock: lock,
        })
    }

    pub fn load(&self) -> Result<PersistedState> {
        load_state_file(&self.path)
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| ScanqError::State(format!("state serialize: {e}")))?;
        atomic_write(&self.path, &data)
    }

    /// Read the persisted state without taking the lock, for read-only
    /// inspection while another process may be running.
    pub fn peek(dir: &Path) -> Result<PersistedState> {
        load_state_file(&dir.join(STATE_FILE))
    }
}

fn load_state_file(path: &Path) -> Result<PersistedState> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data).map_err(|e| {
            ScanqError::State(format!("corrupt state file {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
        Err(e) => Err(e.into()),
    }
}

/// A simple advisory lock stored in `lock.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    pid: u32,
    time: u64,
}

#[derive(Debug)]
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        match Self::create(&path) {
            Ok(()) => Ok(DirLock { path }),
            Err(ScanqError::Io(ref e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_lock_entry(&path);
                if let Some(entry) = &holder {
                    if lock_is_stale(entry) {
                        warn!(pid = entry.pid, "removing stale lock left by dead process");
                        fs::remove_file(&path)?;
                        Self::create(&path)?;
                        return Ok(DirLock { path });
                    }
                }
                Err(ScanqError::Locked(holder.map(|e| e.pid).unwrap_or(0)))
            }
            Err(e) => Err(e),
        }
    }

    fn create(path: &Path) -> Result<()> {
        let entry = LockEntry {
            pid: std::process::id(),
            time: SystemClock.now_ms(),
        };
        let data = serde_json::to_vec(&entry)
            .map_err(|e| ScanqError::State(format!("lock serialize: {e}")))?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        file.write_all(&data)?;
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_lock_entry(path: &Path) -> Option<LockEntry> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

#[cfg(target_os = "linux")]
fn lock_is_stale(entry: &LockEntry) -> bool {
    !Path::new(&format!("/proc/{}", entry.pid)).exists()
}

#[cfg(not(target_os = "linux"))]
fn lock_is_stale(entry: &LockEntry) -> bool {
    SystemClock.now_ms().saturating_sub(entry.time) > STALE_LOCK_MS
}
