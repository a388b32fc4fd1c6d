//! Stage ledger and run lock
//!
//! The ledger (`.tierflow/state.json`) records which stages have been applied
//! so that a partial run can prove its preconditions. The lock
//! (`.tierflow/lock.json`) keeps two runs from converging the same target at
//! once.

use crate::error::{PipelineError, Result};
use crate::stage::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const LEDGER_VERSION: u32 = 1;
const STATE_DIR: &str = ".tierflow";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";
const STALE_LOCK_HOURS: i64 = 1;

/// Persisted ledger contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub stages: BTreeMap<StageId, StageRecord>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            updated_at: Utc::now(),
            stages: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Applied,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Applied => write!(f, "applied"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Ledger bound to a project directory
///
/// A detached ledger keeps its history in memory only (dry runs).
#[derive(Debug, Clone)]
pub struct Ledger {
    root: Option<PathBuf>,
    state: LedgerState,
}

impl Ledger {
    /// Load `<project_root>/.tierflow/state.json`, empty if absent
    pub async fn load(project_root: impl AsRef<Path>) -> Result<Self> {
        let root = project_root.as_ref().to_path_buf();
        let path = root.join(STATE_DIR).join(STATE_FILE);

        let state = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            let state: LedgerState = serde_json::from_str(&content)?;
            if state.version > LEDGER_VERSION {
                return Err(PipelineError::Ledger(format!(
                    "ledger version {} is newer than supported version {}",
                    state.version, LEDGER_VERSION
                )));
            }
            tracing::debug!(stages = state.stages.len(), "Loaded ledger");
            state
        } else {
            tracing::debug!("Ledger not found, starting empty");
            LedgerState::default()
        };

        Ok(Self {
            root: Some(root),
            state,
        })
    }

    /// In-memory ledger with no history
    pub fn in_memory() -> Self {
        Self {
            root: None,
            state: LedgerState::default(),
        }
    }

    /// Copy that reads the same history but never writes
    pub fn detached(&self) -> Self {
        Self {
            root: None,
            state: self.state.clone(),
        }
    }

    pub fn is_applied(&self, id: StageId) -> bool {
        self.state
            .stages
            .get(&id)
            .is_some_and(|r| r.status == StageStatus::Applied)
    }

    pub fn record_of(&self, id: StageId) -> Option<&StageRecord> {
        self.state.stages.get(&id)
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn record(&mut self, id: StageId, status: StageStatus, message: Option<String>) {
        let now = Utc::now();
        self.state.stages.insert(
            id,
            StageRecord {
                status,
                recorded_at: now,
                message,
            },
        );
        self.state.updated_at = now;
    }

    /// Record and write through
    pub async fn record_and_save(
        &mut self,
        id: StageId,
        status: StageStatus,
        message: Option<String>,
    ) -> Result<()> {
        self.record(id, status, message);
        self.save().await
    }

    /// Write the ledger, keeping the previous file as a backup
    pub async fn save(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let dir = root.join(STATE_DIR);
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
        }

        let path = dir.join(STATE_FILE);
        let backup = dir.join(STATE_BACKUP);
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(&self.state)?;
        fs::write(&path, content).await?;
        tracing::debug!(stages = self.state.stages.len(), "Saved ledger");
        Ok(())
    }
}

/// Lock holder information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Acquire the run lock for a project
///
/// Fails with `Locked` while another run holds it. A lock older than one hour
/// is treated as left behind by a crashed run and taken over.
pub async fn acquire_lock(project_root: impl AsRef<Path>) -> Result<RunLock> {
    let dir = project_root.as_ref().join(STATE_DIR);
    if !dir.exists() {
        fs::create_dir_all(&dir).await?;
    }
    let lock_path = dir.join(LOCK_FILE);

    let info = LockInfo {
        holder: std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string()),
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let content = serde_json::to_string_pretty(&info)?;

    for _ in 0..2 {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .await
        {
            Ok(mut file) => {
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                tracing::debug!("Acquired run lock");
                return Ok(RunLock {
                    lock_path,
                    released: false,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let existing = fs::read_to_string(&lock_path).await?;
                let held: LockInfo = serde_json::from_str(&existing).map_err(|e| {
                    PipelineError::Locked(format!(
                        "unreadable lock file {} ({})",
                        lock_path.display(),
                        e
                    ))
                })?;

                let age = Utc::now().signed_duration_since(held.acquired_at);
                if age.num_hours() < STALE_LOCK_HOURS {
                    return Err(PipelineError::Locked(format!(
                        "held by {} (pid {}) since {}",
                        held.holder, held.pid, held.acquired_at
                    )));
                }

                tracing::warn!("Removing stale lock from {} (pid {})", held.holder, held.pid);
                fs::remove_file(&lock_path).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(PipelineError::Locked(format!(
        "could not take over {}",
        lock_path.display()
    )))
}

/// RAII guard for the run lock
pub struct RunLock {
    lock_path: PathBuf,
    released: bool,
}

impl RunLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released run lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
