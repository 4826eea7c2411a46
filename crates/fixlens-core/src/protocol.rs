use crate::issue::{ConfigurationId, IssueId};
use crate::marker::Marker;
use crate::quickfix::{AppliedRecord, CheckpointToken, RecordId};
use crate::text::ContentChange;
use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadScope {
    File(PathBuf),
    Configuration(ConfigurationId),
}

/// Change notification emitted by every Issue Store load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub generation: u64,
    pub scope: LoadScope,
    pub superseded: Vec<IssueId>,
    pub added: Vec<IssueId>,
    /// Every file that lost or gained issues
    pub files: Vec<PathBuf>,
}

/// Everything the reconciliation entry point reacts to.
#[derive(Debug, Clone)]
pub enum Event {
    StoreReloaded(StoreChange),
    DocumentOpened {
        path: PathBuf,
        version: i64,
        text: String,
    },
    DocumentChanged {
        path: PathBuf,
        version: i64,
        changes: Vec<ContentChange>,
    },
    DocumentSaved {
        path: PathBuf,
    },
    DocumentClosed {
        path: PathBuf,
    },
    FixApplied(AppliedRecord),
    FixReverted(AppliedRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    Conflict,
    InvalidState,
    CheckpointFailed,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Version-control collaborator used to checkpoint files before a fix.
///
/// Calls block; async callers dispatch them to a blocking worker.
pub trait VersionControl: Send + Sync {
    /// Record the current working-tree content of `file`.
    fn checkpoint(&self, file: &Path) -> Result<CheckpointToken>;

    /// Content captured by a checkpoint.
    fn checkpoint_content(&self, token: &CheckpointToken) -> Result<Vec<u8>>;

    /// Write the checkpointed content back to `file` and drop the checkpoint.
    fn restore(&self, file: &Path, token: &CheckpointToken) -> Result<()>;

    /// Drop a checkpoint that is no longer needed.
    fn release(&self, token: &CheckpointToken) -> Result<()>;
}

/// Diagnostics surface of the editor host, keyed by file.
pub trait DiagnosticSink: Send + Sync {
    /// Replace the complete diagnostic set for `file`.
    fn publish(&self, file: &Path, markers: &[Marker]);

    fn clear(&self, file: &Path);
}

/// Durable storage for applied-fix records.
pub trait RecordLedger: Send + Sync {
    fn load(&self) -> Result<Vec<AppliedRecord>>;

    /// Insert or replace the record with the same id.
    fn save(&self, record: &AppliedRecord) -> Result<()>;

    fn find(&self, id: RecordId) -> Result<Option<AppliedRecord>> {
        Ok(self.load()?.into_iter().find(|record| record.id == id))
    }
}
