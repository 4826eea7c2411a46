//! Revert points for applied fixes.
//!
//! A checkpoint is taken before every mutation. Revert prefers restoring the
//! checkpoint byte-exactly, which is only safe while the file still holds
//! exactly checkpoint + fix. Otherwise the applied text is swapped back for
//! the original text in place, provided it is still where the fix put it.

use fixlens_adapters::util::{truncate, write_atomic};
use fixlens_core::quickfix::{AppliedRecord, CheckpointToken};
use fixlens_core::text::{span_at, substitute};
use fixlens_core::{FixError, VersionControl};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How a revert restored the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertPath {
    Checkpoint,
    Range,
}

#[derive(Clone, Default)]
pub struct RevisionGuard {
    vcs: Option<Arc<dyn VersionControl>>,
}

impl RevisionGuard {
    pub fn new(vcs: Option<Arc<dyn VersionControl>>) -> Self {
        Self { vcs }
    }

    /// Record a revert point for `file`. `None` when no version control is
    /// available; applying still proceeds with range restoration as the
    /// revert path.
    pub async fn checkpoint(&self, file: &Path) -> Result<Option<CheckpointToken>, FixError> {
        let Some(vcs) = self.vcs.clone() else {
            return Ok(None);
        };
        let path = file.to_path_buf();
        let result = tokio::task::spawn_blocking(move || vcs.checkpoint(&path)).await;
        match result {
            Ok(Ok(token)) => Ok(Some(token)),
            Ok(Err(err)) => Err(FixError::CheckpointFailed {
                file: file.to_path_buf(),
                reason: format!("{:#}", err),
            }),
            Err(err) => Err(FixError::CheckpointFailed {
                file: file.to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }

    /// Drop a checkpoint nobody will restore. Failures are only logged.
    pub async fn release(&self, token: &CheckpointToken) {
        let Some(vcs) = self.vcs.clone() else {
            return;
        };
        let owned = token.clone();
        match tokio::task::spawn_blocking(move || vcs.release(&owned)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%token, error = %format!("{:#}", err), "failed to release checkpoint"),
            Err(err) => tracing::warn!(%token, error = %err, "failed to release checkpoint"),
        }
    }

    /// Undo `record` on `file` (the absolute path of `record.file`).
    pub async fn revert(&self, file: &Path, record: &AppliedRecord) -> Result<RevertPath, FixError> {
        let current = tokio::fs::read(file)
            .await
            .map_err(|err| FixError::io(&record.file, err))?;

        if let (Some(vcs), Some(token)) = (self.vcs.clone(), record.checkpoint.clone()) {
            match self.restore_checkpoint(vcs, file, &current, record, &token).await {
                Ok(true) => return Ok(RevertPath::Checkpoint),
                Ok(false) => {
                    tracing::debug!(
                        record = %record.id,
                        "file changed since apply; reverting by range"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        record = %record.id,
                        error = %format!("{:#}", err),
                        "checkpoint restore failed; reverting by range"
                    );
                }
            }
        }

        self.revert_range(file, current, record).await?;
        if let Some(token) = &record.checkpoint {
            self.release(token).await;
        }
        Ok(RevertPath::Range)
    }

    /// Restore the checkpoint if the file is still exactly checkpoint + fix.
    async fn restore_checkpoint(
        &self,
        vcs: Arc<dyn VersionControl>,
        file: &Path,
        current: &[u8],
        record: &AppliedRecord,
        token: &CheckpointToken,
    ) -> anyhow::Result<bool> {
        let reader = Arc::clone(&vcs);
        let owned = token.clone();
        let original = tokio::task::spawn_blocking(move || reader.checkpoint_content(&owned)).await??;
        if post_apply_content(&original, record).as_deref() != Some(current) {
            return Ok(false);
        }

        let path: PathBuf = file.to_path_buf();
        let owned = token.clone();
        tokio::task::spawn_blocking(move || vcs.restore(&path, &owned)).await??;
        tracing::debug!(record = %record.id, %token, "restored checkpoint");
        Ok(true)
    }

    async fn revert_range(
        &self,
        file: &Path,
        current: Vec<u8>,
        record: &AppliedRecord,
    ) -> Result<(), FixError> {
        let text = String::from_utf8(current).map_err(|err| {
            FixError::io(&record.file, io::Error::new(io::ErrorKind::InvalidData, err))
        })?;
        let applied_len = record.new_text.chars().count();
        let span = span_at(&text, record.start, applied_len)
            .filter(|span| text[span.clone()] == record.new_text)
            .ok_or_else(|| {
                FixError::conflict(
                    &record.file,
                    format!(
                        "the applied text {:?} is no longer at {}",
                        truncate(&record.new_text, 40),
                        record.start
                    ),
                )
            })?;

        let restored = substitute(&text, span, &record.original_text);
        let path = file.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&path, restored.as_bytes()))
            .await
            .map_err(|err| FixError::io(&record.file, io::Error::other(err.to_string())))?
            .map_err(|err| FixError::io(&record.file, err))
    }
}

/// The content the file had right after `record` was applied on top of the
/// checkpointed `original`.
fn post_apply_content(original: &[u8], record: &AppliedRecord) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(original).ok()?;
    let span = span_at(text, record.start, record.original_text.chars().count())?;
    if text[span.clone()] != record.original_text {
        return None;
    }
    Some(substitute(text, span, &record.new_text).into_bytes())
}
