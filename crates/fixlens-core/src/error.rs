//! Error taxonomy shared by the quickfix subsystem.

use crate::protocol::{ErrorCode, NoticeLevel};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FixError {
    /// Unknown issue, record or virtual document reference
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    /// On-disk content diverged from the analysis-time snapshot
    #[error("conflict in {}: {reason}", .file.display())]
    Conflict { file: PathBuf, reason: String },
    /// Illegal transition or concurrent request
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// No revert path could be recorded, nothing was mutated
    #[error("checkpoint failed for {}: {reason}", .file.display())]
    CheckpointFailed { file: PathBuf, reason: String },
    /// Read or write failure; the file state is unknown
    #[error("i/o failure on {}: {source}", .file.display())]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FixError {
    pub fn not_found(what: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub fn conflict(file: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            file: file.into(),
            reason: reason.into(),
        }
    }

    pub fn io(file: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            file: file.into(),
            source,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::CheckpointFailed { .. } => ErrorCode::CheckpointFailed,
            Self::Io { .. } => ErrorCode::Io,
        }
    }

    /// How loudly the host should surface this error.
    pub fn notice_level(&self) -> NoticeLevel {
        match self {
            Self::NotFound { .. } => NoticeLevel::Info,
            Self::InvalidState(_) => NoticeLevel::Warning,
            Self::Conflict { .. } | Self::CheckpointFailed { .. } | Self::Io { .. } => {
                NoticeLevel::Error
            }
        }
    }

    /// Returns a user-friendly message for display in the editor
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { what, id } => {
                format!("Nothing to do: {} {} no longer exists.", what, id)
            }
            Self::Conflict { file, reason } => format!(
                "Quickfix not applied: {} changed since the analysis ran ({}). Re-run the analysis and try again.",
                file.display(),
                reason
            ),
            Self::InvalidState(detail) => format!("Quickfix ignored: {}.", detail),
            Self::CheckpointFailed { file, reason } => format!(
                "Quickfix not applied: couldn't record a revert point for {} ({}). Try again.",
                file.display(),
                reason
            ),
            Self::Io { file, source } => format!(
                "Quickfix failed: couldn't access {} ({}). The file will be re-checked before the next action.",
                file.display(),
                source
            ),
        }
    }
}
