//! Diagnostics for open documents, kept in step with the issue store.
//!
//! A refresh snapshots the store generation and the document version,
//! computes markers on a blocking worker and publishes the full set only if
//! nothing moved in the meantime. A stale result is discarded and the
//! computation re-run; results are never merged.

use crate::documents::{DocumentSnapshot, DocumentStore};
use crate::fixes::FixRegistry;
use crate::issue_store::IssueStore;
use fixlens_adapters::config::DiagnosticsConfig;
use fixlens_core::issue::{Issue, IssueId, Severity};
use fixlens_core::marker::Marker;
use fixlens_core::text::{position_of, span_at, TextRange};
use fixlens_core::DiagnosticSink;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const MAX_REFRESH_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerConfig {
    pub min_severity: Severity,
    pub max_per_file: usize,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self::from(&DiagnosticsConfig::default())
    }
}

impl From<&DiagnosticsConfig> for MarkerConfig {
    fn from(config: &DiagnosticsConfig) -> Self {
        Self {
            min_severity: config.min_severity,
            max_per_file: config.max_per_file,
        }
    }
}

/// Project the issues of one document onto its current text.
///
/// `issues` must be position-ordered. Issues whose fix is applied, whose range
/// was touched by an edit, or whose span no longer fits the text produce no
/// marker.
pub fn compute_markers(
    issues: &[Arc<Issue>],
    doc: &DocumentSnapshot,
    applied: &HashSet<IssueId>,
    config: &MarkerConfig,
) -> Vec<Marker> {
    let mut markers = Vec::new();
    for issue in issues {
        if markers.len() >= config.max_per_file {
            break;
        }
        if issue.severity < config.min_severity || applied.contains(&issue.id) {
            continue;
        }
        let start = issue.start();
        let Some(span) = span_at(&doc.text, start, issue.length) else {
            continue;
        };
        let Some(end) = position_of(&doc.text, span.end) else {
            continue;
        };
        let range = TextRange::new(start, end);
        if doc.range_disturbed(range) {
            continue;
        }
        markers.push(Marker::from_issue(issue, range, doc.version));
    }
    markers
}

#[derive(Default)]
struct MarkerState {
    /// Bumped by every refresh start and every clear
    epochs: HashMap<PathBuf, u64>,
    published: HashMap<PathBuf, Vec<Marker>>,
}

pub struct MarkerService {
    store: Arc<IssueStore>,
    docs: Arc<DocumentStore>,
    fixes: Arc<FixRegistry>,
    sink: Arc<dyn DiagnosticSink>,
    config: MarkerConfig,
    state: Mutex<MarkerState>,
}

impl MarkerService {
    pub fn new(
        store: Arc<IssueStore>,
        docs: Arc<DocumentStore>,
        fixes: Arc<FixRegistry>,
        sink: Arc<dyn DiagnosticSink>,
        config: MarkerConfig,
    ) -> Self {
        Self {
            store,
            docs,
            fixes,
            sink,
            config,
            state: Mutex::new(MarkerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MarkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_epoch(&self, file: &Path) -> u64 {
        let mut state = self.state();
        let epoch = state.epochs.entry(file.to_path_buf()).or_insert(0);
        *epoch += 1;
        *epoch
    }

    /// Recompute and republish the markers of `file`.
    ///
    /// Returns the published set, or `None` when the document is not open or
    /// a newer refresh took over.
    pub async fn refresh(&self, file: &Path) -> Option<Vec<Marker>> {
        let epoch = self.begin_epoch(file);

        for attempt in 0..MAX_REFRESH_ATTEMPTS {
            // Closed documents were cleared on close.
            let doc = self.docs.snapshot(file)?;
            let version = doc.version;
            let generation = self.store.generation();
            let issues = self.store.list_for(file);
            let applied = self.fixes.applied_ids();
            let config = self.config.clone();

            let computed = tokio::task::spawn_blocking(move || {
                compute_markers(&issues, &doc, &applied, &config)
            })
            .await;
            let markers = match computed {
                Ok(markers) => markers,
                Err(err) => {
                    tracing::warn!(file = %file.display(), error = %err, "marker computation failed");
                    return None;
                }
            };

            let mut state = self.state();
            if state.epochs.get(file).copied() != Some(epoch) {
                tracing::debug!(file = %file.display(), "superseded by a newer refresh");
                return None;
            }
            let moved = self.store.generation() != generation
                || self.docs.version(file) != Some(version);
            if moved {
                tracing::debug!(file = %file.display(), attempt, "inputs moved during refresh; recomputing");
                continue;
            }
            if !self.docs.is_open(file) {
                return None;
            }

            self.sink.publish(file, &markers);
            state.published.insert(file.to_path_buf(), markers.clone());
            tracing::debug!(file = %file.display(), count = markers.len(), version, "markers published");
            return Some(markers);
        }

        tracing::warn!(file = %file.display(), "document kept changing; markers not refreshed");
        None
    }

    /// Remove every diagnostic of `file` and cancel refreshes in progress.
    pub fn clear(&self, file: &Path) {
        let mut state = self.state();
        *state.epochs.entry(file.to_path_buf()).or_insert(0) += 1;
        if state.published.remove(file).is_some() {
            tracing::debug!(file = %file.display(), "markers cleared");
        }
        self.sink.clear(file);
    }

    /// Markers last published for `file`.
    pub fn markers_for(&self, file: &Path) -> Vec<Marker> {
        self.state().published.get(file).cloned().unwrap_or_default()
    }

    pub fn config(&self) -> &MarkerConfig {
        &self.config
    }
}
