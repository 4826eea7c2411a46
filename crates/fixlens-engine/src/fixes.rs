//! Current QuickFix state per issue.
//!
//! Each entry is an `Arc<QuickFix>` that is swapped, never mutated, so a
//! caller holding an older value still sees the state it was handed.

use fixlens_core::issue::IssueId;
use fixlens_core::quickfix::{FixState, QuickFix};
use fixlens_core::FixError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub struct FixRegistry {
    fixes: Mutex<HashMap<IssueId, Arc<QuickFix>>>,
    in_flight: Mutex<HashSet<IssueId>>,
}

/// Marks an apply as running until dropped.
pub struct InFlight<'a> {
    registry: &'a FixRegistry,
    issue_id: IssueId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.in_flight().remove(&self.issue_id);
    }
}

impl FixRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn fixes(&self) -> MutexGuard<'_, HashMap<IssueId, Arc<QuickFix>>> {
        self.fixes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<IssueId>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The QuickFix for `issue_id`, `Proposed` until something happened to it.
    pub fn current(&self, issue_id: &IssueId) -> Arc<QuickFix> {
        self.fixes()
            .entry(issue_id.clone())
            .or_insert_with(|| Arc::new(QuickFix::proposed(issue_id.clone())))
            .clone()
    }

    pub fn get(&self, issue_id: &IssueId) -> Option<Arc<QuickFix>> {
        self.fixes().get(issue_id).cloned()
    }

    /// Run a transition against the current value and swap in the result.
    pub fn update<F>(&self, issue_id: &IssueId, transition: F) -> Result<Arc<QuickFix>, FixError>
    where
        F: FnOnce(&QuickFix) -> Result<QuickFix, FixError>,
    {
        let mut fixes = self.fixes();
        let current = fixes
            .entry(issue_id.clone())
            .or_insert_with(|| Arc::new(QuickFix::proposed(issue_id.clone())));
        let next = Arc::new(transition(&**current)?);
        if next.state != current.state {
            tracing::debug!(issue = %issue_id, from = %current.state, to = %next.state, "quickfix transition");
        }
        *current = Arc::clone(&next);
        Ok(next)
    }

    /// Replace whatever is recorded for the issue.
    pub fn seed(&self, fix: QuickFix) {
        self.fixes().insert(fix.issue_id.clone(), Arc::new(fix));
    }

    /// Reserve the issue for one apply. A second caller gets `InvalidState`.
    pub fn begin(&self, issue_id: &IssueId) -> Result<InFlight<'_>, FixError> {
        if !self.in_flight().insert(issue_id.clone()) {
            return Err(FixError::InvalidState(format!(
                "an apply for {} is already in progress",
                issue_id
            )));
        }
        Ok(InFlight {
            registry: self,
            issue_id: issue_id.clone(),
        })
    }

    pub fn applied_ids(&self) -> HashSet<IssueId> {
        self.fixes()
            .values()
            .filter(|fix| fix.state == FixState::Applied)
            .map(|fix| fix.issue_id.clone())
            .collect()
    }

    /// Drop the QuickFixes of issues that no longer exist.
    pub fn forget(&self, issue_ids: &[IssueId]) {
        let mut fixes = self.fixes();
        for id in issue_ids {
            fixes.remove(id);
        }
    }
}
