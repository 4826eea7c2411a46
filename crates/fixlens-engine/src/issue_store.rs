//! In-memory model of the current analysis results.
//!
//! Loads replace every issue of a scope (one file or one configuration) at
//! once. Each load bumps the store generation and broadcasts a `StoreChange`.

use fixlens_core::issue::{ConfigurationId, Issue, IssueId};
use fixlens_core::{FixError, LoadScope, StoreChange};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct StoreInner {
    generation: u64,
    by_id: HashMap<IssueId, Arc<Issue>>,
    /// Kept sorted by `(line, column, id)`
    by_file: HashMap<PathBuf, Vec<Arc<Issue>>>,
}

pub struct IssueStore {
    inner: Mutex<StoreInner>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for IssueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(StoreInner::default()),
            changes,
        }
    }

    fn inner(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive every `StoreChange` emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.inner().generation
    }

    /// Replace the issue set of `scope` with `issues`.
    pub fn load(&self, issues: Vec<Issue>, scope: LoadScope) -> Result<StoreChange, FixError> {
        let mut batch_ids = HashSet::with_capacity(issues.len());
        for issue in &issues {
            if !in_scope(issue, &scope) {
                return Err(FixError::InvalidState(format!(
                    "issue {} ({}) is outside the load scope",
                    issue.id,
                    issue.file.display()
                )));
            }
            if !batch_ids.insert(issue.id.clone()) {
                return Err(FixError::InvalidState(format!(
                    "duplicate issue id {} in load",
                    issue.id
                )));
            }
        }

        let change = {
            let mut inner = self.inner();

            let superseded: Vec<Arc<Issue>> = inner
                .by_id
                .values()
                .filter(|issue| in_scope(issue, &scope))
                .cloned()
                .collect();
            let superseded_ids: HashSet<&IssueId> = superseded.iter().map(|i| &i.id).collect();
            if let Some(clash) = issues
                .iter()
                .find(|i| inner.by_id.contains_key(&i.id) && !superseded_ids.contains(&i.id))
            {
                return Err(FixError::InvalidState(format!(
                    "issue id {} already belongs to another scope",
                    clash.id
                )));
            }

            let mut files: BTreeSet<PathBuf> = superseded.iter().map(|i| i.file.clone()).collect();
            files.extend(issues.iter().map(|i| i.file.clone()));

            for old in &superseded {
                inner.by_id.remove(&old.id);
            }
            let mut added = Vec::with_capacity(issues.len());
            for issue in issues {
                added.push(issue.id.clone());
                inner.by_id.insert(issue.id.clone(), Arc::new(issue));
            }

            for file in &files {
                let mut list: Vec<Arc<Issue>> = inner
                    .by_id
                    .values()
                    .filter(|issue| &issue.file == file)
                    .cloned()
                    .collect();
                sort_issues(&mut list);
                if list.is_empty() {
                    inner.by_file.remove(file);
                } else {
                    inner.by_file.insert(file.clone(), list);
                }
            }

            inner.generation += 1;
            let mut superseded: Vec<IssueId> = superseded.into_iter().map(|i| i.id.clone()).collect();
            superseded.sort();
            StoreChange {
                generation: inner.generation,
                scope,
                superseded,
                added,
                files: files.into_iter().collect(),
            }
        };

        tracing::debug!(
            generation = change.generation,
            superseded = change.superseded.len(),
            added = change.added.len(),
            "issue store reloaded"
        );
        // No subscribers is fine; the Session also routes the change itself.
        let _ = self.changes.send(change.clone());
        Ok(change)
    }

    pub fn lookup(&self, id: &IssueId) -> Result<Arc<Issue>, FixError> {
        self.inner()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| FixError::not_found("issue", id))
    }

    /// Issues of `path` ordered by position. Unknown files have none.
    pub fn list_for(&self, path: &Path) -> Vec<Arc<Issue>> {
        self.inner().by_file.get(path).cloned().unwrap_or_default()
    }

    pub fn configurations(&self) -> Vec<ConfigurationId> {
        let inner = self.inner();
        let set: BTreeSet<&ConfigurationId> =
            inner.by_id.values().map(|i| &i.configuration).collect();
        set.into_iter().cloned().collect()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.inner().by_file.keys().cloned().collect();
        files.sort();
        files
    }

    pub fn len(&self) -> usize {
        self.inner().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn in_scope(issue: &Issue, scope: &LoadScope) -> bool {
    match scope {
        LoadScope::File(path) => &issue.file == path,
        LoadScope::Configuration(id) => &issue.configuration == id,
    }
}

fn sort_issues(list: &mut [Arc<Issue>]) {
    list.sort_by(|a, b| {
        (a.line, a.column)
            .cmp(&(b.line, b.column))
            .then_with(|| a.id.cmp(&b.id))
    });
}
