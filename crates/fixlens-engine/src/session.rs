//! The quickfix subsystem as one explicitly constructed context object.
//!
//! `Session::reconcile` is the single entry point for everything that can
//! change: store reloads, editor document events and fix outcomes.

use crate::diff::{diff_texts, UnifiedDiff};
use crate::documents::DocumentStore;
use crate::fix_engine::FixEngine;
use crate::fixes::FixRegistry;
use crate::issue_store::IssueStore;
use crate::markers::{MarkerConfig, MarkerService};
use crate::revision_guard::RevisionGuard;
use crate::vdocs::{notice, VirtualDocuments};
use fixlens_adapters::cache::Ledger;
use fixlens_adapters::config::Config;
use fixlens_adapters::git_ops::GitVersionControl;
use fixlens_adapters::util::workspace_relative;
use fixlens_core::issue::{Issue, IssueId};
use fixlens_core::marker::Marker;
use fixlens_core::quickfix::{AppliedRecord, QuickFix, RecordId};
use fixlens_core::vdoc::VirtualDocId;
use fixlens_core::{
    DiagnosticSink, Event, FixError, LoadScope, RecordLedger, StoreChange, VersionControl,
};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(test)]
mod tests;

pub struct SessionOptions {
    pub root: PathBuf,
    pub sink: Arc<dyn DiagnosticSink>,
    pub vcs: Option<Arc<dyn VersionControl>>,
    pub ledger: Option<Arc<dyn RecordLedger>>,
    pub markers: MarkerConfig,
    pub preview_context_lines: usize,
}

impl SessionOptions {
    /// Bare options: no version control, no ledger, default markers.
    pub fn new(root: impl Into<PathBuf>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            root: root.into(),
            sink,
            vcs: None,
            ledger: None,
            markers: MarkerConfig::default(),
            preview_context_lines: 3,
        }
    }

    /// Options for a workspace as configured by its `fixlens.toml`.
    pub fn from_config(root: &Path, config: &Config, sink: Arc<dyn DiagnosticSink>) -> Self {
        let vcs: Option<Arc<dyn VersionControl>> = if config.uses_version_control() {
            GitVersionControl::discover(root).map(|git| Arc::new(git) as Arc<dyn VersionControl>)
        } else {
            None
        };
        if vcs.is_none() {
            tracing::debug!(root = %root.display(), "no version control; reverts use range restoration");
        }
        Self {
            root: root.to_path_buf(),
            sink,
            vcs,
            ledger: Some(Arc::new(Ledger::new(root, &config.state_dir))),
            markers: MarkerConfig::from(&config.diagnostics),
            preview_context_lines: config.preview.context_lines,
        }
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn RecordLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_markers(mut self, markers: MarkerConfig) -> Self {
        self.markers = markers;
        self
    }
}

pub struct Session {
    root: PathBuf,
    store: Arc<IssueStore>,
    docs: Arc<DocumentStore>,
    fixes: Arc<FixRegistry>,
    markers: MarkerService,
    engine: Arc<FixEngine>,
    vdocs: VirtualDocuments,
    ledger: Option<Arc<dyn RecordLedger>>,
    preview_context_lines: usize,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let store = Arc::new(IssueStore::new());
        let docs = Arc::new(DocumentStore::new());
        let fixes = Arc::new(FixRegistry::new());
        let markers = MarkerService::new(
            Arc::clone(&store),
            Arc::clone(&docs),
            Arc::clone(&fixes),
            options.sink,
            options.markers,
        );
        let engine = Arc::new(FixEngine::new(
            options.root.clone(),
            Arc::clone(&store),
            Arc::clone(&fixes),
            RevisionGuard::new(options.vcs),
            options.ledger.clone(),
        ));
        let vdocs = VirtualDocuments::new(Arc::clone(&store), Arc::clone(&fixes), Arc::clone(&engine));
        Self {
            root: options.root,
            store,
            docs,
            fixes,
            markers,
            engine,
            vdocs,
            ledger: options.ledger,
            preview_context_lines: options.preview_context_lines,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &IssueStore {
        &self.store
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.docs
    }

    fn relative(&self, path: &Path) -> PathBuf {
        workspace_relative(&self.root, path)
    }

    /// Replace the issues of `scope` and reconcile everything they touch.
    pub async fn load(&self, issues: Vec<Issue>, scope: LoadScope) -> Result<StoreChange, FixError> {
        let change = self.store.load(issues, scope)?;
        self.reconcile(Event::StoreReloaded(change.clone())).await;
        Ok(change)
    }

    /// Adopt applied records persisted by earlier sessions. Call once, after
    /// the first load, so restored states attach to loaded issues.
    pub async fn restore_records(&self) -> anyhow::Result<usize> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(0);
        };
        let records = tokio::task::spawn_blocking(move || ledger.load()).await??;
        let files: Vec<PathBuf> = records.iter().map(|r| r.file.clone()).collect();
        let restored = self.engine.restore(records).await;
        for file in files {
            self.vdocs.invalidate_file(&file);
        }
        self.refresh_open().await;
        tracing::debug!(restored, "applied records restored");
        Ok(restored)
    }

    pub async fn reconcile(&self, event: Event) {
        match event {
            Event::StoreReloaded(change) => {
                self.fixes.forget(&change.superseded);
                for file in &change.files {
                    self.docs.reset_baseline(file);
                    self.vdocs.invalidate_file(file);
                }
                join_all(change.files.iter().map(|file| self.markers.refresh(file))).await;
            }
            Event::DocumentOpened {
                path,
                version,
                text,
            } => {
                let path = self.relative(&path);
                self.docs.open(&path, version, text);
                self.markers.refresh(&path).await;
            }
            Event::DocumentChanged {
                path,
                version,
                changes,
            } => {
                let path = self.relative(&path);
                if self.docs.change(&path, version, &changes) {
                    self.markers.refresh(&path).await;
                }
            }
            Event::DocumentSaved { path } => {
                let path = self.relative(&path);
                self.vdocs.invalidate_file(&path);
                self.markers.refresh(&path).await;
            }
            Event::DocumentClosed { path } => {
                let path = self.relative(&path);
                self.docs.close(&path);
                self.markers.clear(&path);
            }
            Event::FixApplied(record) | Event::FixReverted(record) => {
                self.vdocs.invalidate_file(&record.file);
                self.markers.refresh(&record.file).await;
            }
        }
    }

    /// Recompute the markers of one file. `None` when it is not open.
    pub async fn refresh(&self, file: &Path) -> Option<Vec<Marker>> {
        self.markers.refresh(&self.relative(file)).await
    }

    pub async fn refresh_open(&self) {
        let open = self.docs.open_paths();
        join_all(open.iter().map(|file| self.markers.refresh(file))).await;
    }

    pub fn markers_for(&self, file: &Path) -> Vec<Marker> {
        self.markers.markers_for(&self.relative(file))
    }

    /// Resolve a `quickfix://` or `quickfixed://` URI.
    pub async fn provide_content(&self, uri: &str) -> String {
        match uri.parse::<VirtualDocId>() {
            Ok(id) => self.vdocs.provide_content(&id).await,
            Err(err) => notice("Unknown quickfix document", &err.user_message()),
        }
    }

    pub async fn preview(&self, issue_id: &IssueId) -> String {
        self.vdocs
            .provide_content(&VirtualDocId::preview(issue_id.clone()))
            .await
    }

    pub async fn result(&self, issue_id: &IssueId) -> String {
        self.vdocs
            .provide_content(&VirtualDocId::result(issue_id.clone()))
            .await
    }

    /// The pending fix of `issue_id` as a unified diff against the file.
    pub async fn preview_diff(&self, issue_id: &IssueId) -> Result<UnifiedDiff, FixError> {
        let issue = self.store.lookup(issue_id)?;
        let fix = self.fixes.current(issue_id);
        if !fix.state.is_pending() {
            return Err(FixError::InvalidState(format!(
                "quickfix for {} is {}",
                issue_id, fix.state
            )));
        }
        let dry = self.engine.dry_run(&issue).await?;
        let _ = self.fixes.update(issue_id, |fix| fix.previewed());
        Ok(diff_texts(
            &issue.file.to_string_lossy(),
            &dry.validated.content,
            &dry.new_content,
            self.preview_context_lines,
        ))
    }

    pub async fn apply(&self, issue_id: &IssueId) -> Result<AppliedRecord, FixError> {
        match self.engine.apply(issue_id).await {
            Ok(record) => {
                self.reconcile(Event::FixApplied(record.clone())).await;
                Ok(record)
            }
            Err(err) => {
                // A conflict or I/O failure changes what the documents show.
                if matches!(err, FixError::Conflict { .. } | FixError::Io { .. }) {
                    if let Ok(issue) = self.store.lookup(issue_id) {
                        self.vdocs.invalidate_file(&issue.file);
                    }
                }
                Err(err)
            }
        }
    }

    pub async fn revert(&self, record_id: RecordId) -> Result<AppliedRecord, FixError> {
        let (record, _) = self.engine.revert(record_id).await?;
        self.reconcile(Event::FixReverted(record.clone())).await;
        Ok(record)
    }

    pub fn records(&self) -> Vec<AppliedRecord> {
        self.engine.records()
    }

    pub fn quickfix(&self, issue_id: &IssueId) -> Option<Arc<QuickFix>> {
        self.store
            .lookup(issue_id)
            .ok()
            .filter(|issue| issue.has_quickfix())
            .map(|_| self.fixes.current(issue_id))
    }
}
