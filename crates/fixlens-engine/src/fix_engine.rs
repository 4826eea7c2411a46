//! The only component that writes quickfixes to real files.
//!
//! Apply order for one issue: in-flight reservation, state check, per-file
//! lock, validate, checkpoint, re-validate, substitute, atomic write, record.
//! Nothing touches the file before a revert path exists.

use crate::fixes::FixRegistry;
use crate::issue_store::IssueStore;
use crate::revision_guard::{RevertPath, RevisionGuard};
use chrono::Utc;
use fixlens_adapters::util::{resolve_repo_path_allow_new, truncate, write_atomic};
use fixlens_core::issue::{Issue, IssueId, Replacement};
use fixlens_core::quickfix::{AppliedRecord, FixState, QuickFix, RecordId};
use fixlens_core::text::{span_at, substitute};
use fixlens_core::{FixError, RecordLedger};
use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// File content whose fix range matched the snapshot.
#[derive(Debug, Clone)]
pub struct Validated {
    pub issue: Arc<Issue>,
    pub replacement: Replacement,
    /// Absolute path of the issue's file
    pub path: PathBuf,
    pub content: String,
    /// Byte span of the fix range in `content`
    pub span: Range<usize>,
}

impl Validated {
    pub fn substituted(&self) -> String {
        substitute(&self.content, self.span.clone(), &self.replacement.text)
    }
}

/// In-memory outcome of a fix.
#[derive(Debug, Clone)]
pub struct DryRun {
    pub validated: Validated,
    pub new_content: String,
}

pub struct FixEngine {
    root: PathBuf,
    store: Arc<IssueStore>,
    fixes: Arc<FixRegistry>,
    guard: RevisionGuard,
    ledger: Option<Arc<dyn RecordLedger>>,
    records: Mutex<HashMap<RecordId, AppliedRecord>>,
    file_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FixEngine {
    pub fn new(
        root: PathBuf,
        store: Arc<IssueStore>,
        fixes: Arc<FixRegistry>,
        guard: RevisionGuard,
        ledger: Option<Arc<dyn RecordLedger>>,
    ) -> Self {
        Self {
            root,
            store,
            fixes,
            guard,
            ledger,
            records: Mutex::new(HashMap::new()),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    fn records_map(&self) -> MutexGuard<'_, HashMap<RecordId, AppliedRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn file_lock(&self, file: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.file_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(file.to_path_buf()).or_default())
    }

    /// Absolute path of a workspace-relative issue file.
    pub fn resolve(&self, file: &Path) -> Result<PathBuf, FixError> {
        resolve_repo_path_allow_new(&self.root, file)
            .map(|resolved| resolved.absolute)
            .map_err(|reason| {
                FixError::InvalidState(format!("refusing to touch {}: {}", file.display(), reason))
            })
    }

    /// Re-read the file and check the fix range still holds the snapshot.
    pub async fn validate(&self, issue: &Arc<Issue>) -> Result<Validated, FixError> {
        let replacement = issue.replacement.clone().ok_or_else(|| {
            FixError::InvalidState(format!("issue {} has no quickfix", issue.id))
        })?;
        let path = self.resolve(&issue.file)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| FixError::io(&issue.file, err))?;
        let content = String::from_utf8(bytes).map_err(|err| {
            FixError::io(&issue.file, io::Error::new(io::ErrorKind::InvalidData, err))
        })?;

        let len = replacement.snapshot_len();
        let Some(span) = span_at(&content, replacement.start, len) else {
            return Err(FixError::conflict(
                &issue.file,
                format!(
                    "{} characters at {} run past the end of the file",
                    len, replacement.start
                ),
            ));
        };
        let found = &content[span.clone()];
        if found != replacement.snapshot {
            return Err(FixError::conflict(
                &issue.file,
                format!(
                    "expected {:?} at {}, found {:?}",
                    truncate(&replacement.snapshot, 60),
                    replacement.start,
                    truncate(found, 60)
                ),
            ));
        }

        Ok(Validated {
            issue: Arc::clone(issue),
            replacement,
            path,
            content,
            span,
        })
    }

    /// Validate and substitute without touching the file.
    pub async fn dry_run(&self, issue: &Arc<Issue>) -> Result<DryRun, FixError> {
        let validated = self.validate(issue).await?;
        let new_content = validated.substituted();
        Ok(DryRun {
            validated,
            new_content,
        })
    }

    pub async fn apply(&self, issue_id: &IssueId) -> Result<AppliedRecord, FixError> {
        let issue = self.store.lookup(issue_id)?;
        if !issue.has_quickfix() {
            return Err(FixError::InvalidState(format!(
                "issue {} has no quickfix",
                issue.id
            )));
        }
        let _in_flight = self.fixes.begin(issue_id)?;
        ensure_pending(&self.fixes.current(issue_id))?;

        let lock = self.file_lock(&issue.file);
        let _file_guard = lock.lock().await;

        self.validate_for_apply(&issue).await?;
        let checkpoint = self.guard.checkpoint(&self.resolve(&issue.file)?).await?;
        // The file may have moved while the checkpoint was taken.
        let validated = match self.validate_for_apply(&issue).await {
            Ok(validated) => validated,
            Err(err) => {
                if let Some(token) = &checkpoint {
                    self.guard.release(token).await;
                }
                return Err(err);
            }
        };

        let new_content = validated.substituted();
        let path = validated.path.clone();
        let written = tokio::task::spawn_blocking(move || write_atomic(&path, new_content.as_bytes()))
            .await
            .unwrap_or_else(|err| Err(io::Error::other(err.to_string())));
        if let Err(err) = written {
            if let Some(token) = &checkpoint {
                self.guard.release(token).await;
            }
            self.flag_for_revalidation(issue_id);
            return Err(FixError::io(&issue.file, err));
        }

        let record = AppliedRecord {
            id: RecordId::new(),
            issue_id: issue.id.clone(),
            file: issue.file.clone(),
            start: validated.replacement.start,
            original_text: validated.replacement.snapshot.clone(),
            new_text: validated.replacement.text.clone(),
            checkpoint,
            applied_at: Utc::now(),
            reverted_at: None,
        };
        self.records_map().insert(record.id, record.clone());
        self.persist(&record).await;
        self.fixes.update(issue_id, |fix| fix.applied(record.id))?;

        tracing::info!(
            issue = %issue.id,
            file = %issue.file.display(),
            record = %record.id,
            "quickfix applied"
        );
        Ok(record)
    }

    /// Validate under the file lock, recording the outcome on the QuickFix.
    async fn validate_for_apply(&self, issue: &Arc<Issue>) -> Result<Validated, FixError> {
        match self.validate(issue).await {
            Ok(validated) => Ok(validated),
            Err(FixError::Conflict { file, reason }) => {
                tracing::warn!(issue = %issue.id, file = %file.display(), %reason, "quickfix conflict");
                self.fixes
                    .update(&issue.id, |fix| fix.conflicted(reason.clone()))?;
                Err(FixError::Conflict { file, reason })
            }
            Err(err @ FixError::Io { .. }) => {
                self.flag_for_revalidation(&issue.id);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn flag_for_revalidation(&self, issue_id: &IssueId) {
        let _ = self
            .fixes
            .update(issue_id, |fix| Ok(fix.flagged_for_revalidation()));
    }

    async fn persist(&self, record: &AppliedRecord) {
        let Some(ledger) = self.ledger.clone() else {
            return;
        };
        let owned = record.clone();
        match tokio::task::spawn_blocking(move || ledger.save(&owned)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(record = %record.id, error = %format!("{:#}", err), "failed to persist applied record")
            }
            Err(err) => tracing::warn!(record = %record.id, error = %err, "failed to persist applied record"),
        }
    }

    /// Look a record up in memory, then in the ledger.
    pub async fn record(&self, id: RecordId) -> Result<AppliedRecord, FixError> {
        if let Some(record) = self.records_map().get(&id).cloned() {
            return Ok(record);
        }
        if let Some(ledger) = self.ledger.clone() {
            match tokio::task::spawn_blocking(move || ledger.find(id)).await {
                Ok(Ok(Some(record))) => {
                    let mut map = self.records_map();
                    return Ok(map.entry(record.id).or_insert(record).clone());
                }
                Ok(Ok(None)) => {}
                Ok(Err(err)) => tracing::warn!(record = %id, error = %err, "failed to read ledger"),
                Err(err) => tracing::warn!(record = %id, error = %err, "ledger read task failed"),
            }
        }
        Err(FixError::not_found("record", id))
    }

    pub async fn revert(&self, id: RecordId) -> Result<(AppliedRecord, RevertPath), FixError> {
        let record = self.record(id).await?;
        let lock = self.file_lock(&record.file);
        let _file_guard = lock.lock().await;

        // Re-read under the lock; a concurrent revert may have finished.
        let mut record = self.record(id).await?;
        if record.is_reverted() {
            return Err(FixError::InvalidState(format!(
                "record {} was already reverted",
                record.id
            )));
        }

        let path = self.resolve(&record.file)?;
        let how = self.guard.revert(&path, &record).await?;

        record.reverted_at = Some(Utc::now());
        self.records_map().insert(record.id, record.clone());
        self.persist(&record).await;

        let owns_fix = self
            .fixes
            .get(&record.issue_id)
            .is_some_and(|fix| fix.applied_record == Some(record.id));
        if owns_fix {
            self.fixes.update(&record.issue_id, |fix| fix.reverted())?;
        }

        tracing::info!(
            issue = %record.issue_id,
            file = %record.file.display(),
            record = %record.id,
            path = ?how,
            "quickfix reverted"
        );
        Ok((record, how))
    }

    /// Every known record, oldest first.
    pub fn records(&self) -> Vec<AppliedRecord> {
        let mut records: Vec<AppliedRecord> = self.records_map().values().cloned().collect();
        records.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then(a.id.cmp(&b.id)));
        records
    }

    /// Adopt records from an earlier session. Returns how many QuickFixes
    /// resume as `Applied`.
    ///
    /// Only the latest record of an issue counts, and only while it is
    /// outstanding, was made from the replacement the issue carries now, and
    /// its applied text is still on disk. Reverted records never carry over,
    /// so a fresh load can retry the fix.
    pub async fn restore(&self, records: Vec<AppliedRecord>) -> usize {
        let mut latest: HashMap<IssueId, AppliedRecord> = HashMap::new();
        {
            let mut map = self.records_map();
            for record in records {
                let newer = latest
                    .get(&record.issue_id)
                    .is_none_or(|seen| seen.applied_at <= record.applied_at);
                if newer {
                    latest.insert(record.issue_id.clone(), record.clone());
                }
                map.insert(record.id, record);
            }
        }

        let mut restored = 0;
        for (issue_id, record) in latest {
            if record.is_reverted() {
                continue;
            }
            let Ok(issue) = self.store.lookup(&issue_id) else {
                continue;
            };
            if !made_from(&issue, &record) {
                tracing::debug!(issue = %issue_id, record = %record.id, "record predates the loaded quickfix; not restored");
                continue;
            }
            if !self.still_applied(&record).await {
                tracing::debug!(issue = %issue_id, record = %record.id, "applied text no longer on disk; not restored");
                continue;
            }
            if let Ok(fix) = QuickFix::proposed(issue_id).applied(record.id) {
                self.fixes.seed(fix);
                restored += 1;
            }
        }
        restored
    }

    /// Whether the file still holds `record.new_text` where it was written.
    async fn still_applied(&self, record: &AppliedRecord) -> bool {
        let Ok(path) = self.resolve(&record.file) else {
            return false;
        };
        let lock = self.file_lock(&record.file);
        let _file_guard = lock.lock().await;
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            return false;
        };
        span_at(&content, record.start, record.new_text.chars().count())
            .is_some_and(|span| content[span] == record.new_text)
    }
}

/// Whether `record` applied the replacement `issue` carries.
fn made_from(issue: &Issue, record: &AppliedRecord) -> bool {
    issue.replacement.as_ref().is_some_and(|replacement| {
        replacement.start == record.start
            && replacement.snapshot == record.original_text
            && replacement.text == record.new_text
    })
}

fn ensure_pending(fix: &QuickFix) -> Result<(), FixError> {
    if fix.state.is_pending() {
        return Ok(());
    }
    let detail = match fix.state {
        FixState::Applied => format!("quickfix for {} is already applied", fix.issue_id),
        state => format!("quickfix for {} is {}", fix.issue_id, state),
    };
    Err(FixError::InvalidState(detail))
}
