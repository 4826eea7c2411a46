//! Applied-record ledger for fixlens
//!
//! Persists applied quickfix records to `.fixlens/ledger.json` so a revert can
//! be issued from a later session than the one that applied the fix.
//!
//! # Error Handling
//!
//! Reads are forgiving: a missing ledger is empty and a corrupt one is moved
//! aside to `ledger.json.corrupt` before starting over. Writes propagate their
//! errors; the engine logs them and keeps the in-memory record.

use crate::util::write_atomic;
use anyhow::Context;
use fixlens_core::quickfix::AppliedRecord;
use fixlens_core::RecordLedger;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};

pub const DEFAULT_STATE_DIR: &str = ".fixlens";
const LEDGER_FILE: &str = "ledger.json";
const LEDGER_VERSION: u32 = 1;
const LEDGER_LOCK_TIMEOUT_SECS: u64 = 5;
const LEDGER_LOCK_RETRY_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    records: Vec<AppliedRecord>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            records: Vec::new(),
        }
    }
}

/// On-disk store of applied-fix records for one workspace.
#[derive(Debug, Clone)]
pub struct Ledger {
    workspace: PathBuf,
    state_dir: PathBuf,
}

struct LedgerLock {
    file: std::fs::File,
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl Ledger {
    /// Ledger under `<workspace>/<state_dir>`.
    pub fn new(workspace: &Path, state_dir: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            state_dir: workspace.join(state_dir),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE)
    }

    fn ensure_dir(&self) -> anyhow::Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).with_context(|| {
                format!("Failed to create state dir {}", self.state_dir.display())
            })?;
        }
        self.ensure_state_ignored()
    }

    /// Keep the state directory out of version control.
    fn ensure_state_ignored(&self) -> anyhow::Result<()> {
        let Ok(relative) = self.state_dir.strip_prefix(&self.workspace) else {
            return Ok(());
        };
        let entry = format!("{}/", relative.display());

        let git_dir = self.workspace.join(".git");
        if git_dir.is_dir() {
            let info_exclude_path = git_dir.join("info").join("exclude");
            if let Some(parent) = info_exclude_path.parent() {
                let ready = fs::create_dir_all(parent).is_ok();
                if ready && append_ignore_entry(&info_exclude_path, &entry).is_ok() {
                    return Ok(());
                }
            }
        }

        let gitignore_path = self.workspace.join(".gitignore");
        if gitignore_path.exists() {
            append_ignore_entry(&gitignore_path, &entry)?;
        }
        Ok(())
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<LedgerLock> {
        if exclusive {
            self.ensure_dir()?;
        } else if !self.state_dir.exists() {
            return Err(anyhow::anyhow!("Ledger directory missing"));
        }

        let lock_path = self.state_dir.join(".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= StdDuration::from_secs(LEDGER_LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for ledger lock ({}s)",
                            LEDGER_LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(StdDuration::from_millis(LEDGER_LOCK_RETRY_MS));
                }
            }
        }

        Ok(LedgerLock { file })
    }

    /// Read the ledger without taking a lock. Corrupt content is moved aside.
    fn read_unlocked(&self) -> LedgerFile {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "failed to read ledger");
                }
                return LedgerFile::default();
            }
        };
        match serde_json::from_str::<LedgerFile>(&content) {
            Ok(ledger) => ledger,
            Err(err) => {
                preserve_corrupt_ledger(&path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "ledger was corrupted; a backup was saved and an empty ledger started"
                );
                LedgerFile::default()
            }
        }
    }
}

impl RecordLedger for Ledger {
    fn load(&self) -> anyhow::Result<Vec<AppliedRecord>> {
        if !self.path().exists() {
            return Ok(Vec::new());
        }
        let _lock = self.lock(false)?;
        Ok(self.read_unlocked().records)
    }

    fn save(&self, record: &AppliedRecord) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let mut ledger = self.read_unlocked();
        match ledger.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => ledger.records.push(record.clone()),
        }
        ledger.version = LEDGER_VERSION;

        let content = serde_json::to_string_pretty(&ledger)?;
        let path = self.path();
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("Failed to write ledger {}", path.display()))?;
        tracing::debug!(record = %record.id, issue = %record.issue_id, "ledger updated");
        Ok(())
    }
}

fn preserve_corrupt_ledger(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn append_ignore_entry(path: &Path, entry: &str) -> anyhow::Result<()> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let bare = entry.trim_end_matches('/');
    let already_present = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == bare
    });
    if already_present {
        return Ok(());
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    use std::io::Write;
    if !content.trim().is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# fixlens state")?;
    writeln!(file, "{}", entry)?;
    Ok(())
}
