//! QuickFix lifecycle and applied-fix records.
//!
//! ```text
//! Proposed --preview--> Previewed
//! Proposed|Previewed --apply(ok)--> Applied --revert--> Reverted
//! Proposed|Previewed --apply(conflict)--> Conflicted
//! ```
//!
//! Transitions return a fresh `QuickFix`; holders of an older value keep
//! seeing the state they were handed.

use crate::error::FixError;
use crate::issue::IssueId;
use crate::text::Position;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    Proposed,
    Previewed,
    Applied,
    Reverted,
    Conflicted,
}

impl FixState {
    pub fn can_transition_to(self, to: FixState) -> bool {
        use FixState::*;
        matches!(
            (self, to),
            (Proposed, Previewed)
                | (Previewed, Previewed)
                | (Proposed | Previewed, Applied)
                | (Proposed | Previewed, Conflicted)
                | (Applied, Reverted)
        )
    }

    /// Terminal for this QuickFix instance; only a new analysis run retries.
    pub fn is_terminal(self) -> bool {
        matches!(self, FixState::Conflicted | FixState::Reverted)
    }

    pub fn is_pending(self) -> bool {
        matches!(self, FixState::Proposed | FixState::Previewed)
    }

    pub fn label(self) -> &'static str {
        match self {
            FixState::Proposed => "proposed",
            FixState::Previewed => "previewed",
            FixState::Applied => "applied",
            FixState::Reverted => "reverted",
            FixState::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for FixState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = FixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| FixError::not_found("record", s))
    }
}

/// Opaque handle to a version-control checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointToken(String);

impl CheckpointToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derived view over an issue that carries a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickFix {
    pub issue_id: IssueId,
    pub state: FixState,
    /// Bumped on every transition
    pub revision: u64,
    pub applied_record: Option<RecordId>,
    pub conflict: Option<String>,
    /// Set after an I/O failure; the next action must re-validate first
    pub needs_revalidation: bool,
}

impl QuickFix {
    pub fn proposed(issue_id: IssueId) -> Self {
        Self {
            issue_id,
            state: FixState::Proposed,
            revision: 0,
            applied_record: None,
            conflict: None,
            needs_revalidation: false,
        }
    }

    pub fn transition(&self, to: FixState) -> Result<Self, FixError> {
        if !self.state.can_transition_to(to) {
            return Err(FixError::InvalidState(format!(
                "quickfix for {} cannot go from {} to {}",
                self.issue_id, self.state, to
            )));
        }
        Ok(Self {
            state: to,
            revision: self.revision + 1,
            needs_revalidation: false,
            ..self.clone()
        })
    }

    pub fn previewed(&self) -> Result<Self, FixError> {
        if self.state == FixState::Previewed {
            return Ok(self.clone());
        }
        self.transition(FixState::Previewed)
    }

    pub fn applied(&self, record: RecordId) -> Result<Self, FixError> {
        let mut next = self.transition(FixState::Applied)?;
        next.applied_record = Some(record);
        Ok(next)
    }

    pub fn conflicted(&self, reason: impl Into<String>) -> Result<Self, FixError> {
        let mut next = self.transition(FixState::Conflicted)?;
        next.conflict = Some(reason.into());
        Ok(next)
    }

    pub fn reverted(&self) -> Result<Self, FixError> {
        self.transition(FixState::Reverted)
    }

    /// Clear the revalidation flag after the file was read back successfully.
    pub fn revalidated(&self) -> Self {
        if !self.needs_revalidation {
            return self.clone();
        }
        Self {
            revision: self.revision + 1,
            needs_revalidation: false,
            ..self.clone()
        }
    }

    pub fn flagged_for_revalidation(&self) -> Self {
        Self {
            revision: self.revision + 1,
            needs_revalidation: true,
            ..self.clone()
        }
    }
}

/// Everything needed to undo one applied fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub id: RecordId,
    pub issue_id: IssueId,
    /// Workspace-relative path
    pub file: PathBuf,
    pub start: Position,
    pub original_text: String,
    pub new_text: String,
    #[serde(default)]
    pub checkpoint: Option<CheckpointToken>,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub reverted_at: Option<DateTime<Utc>>,
}

impl AppliedRecord {
    pub fn is_reverted(&self) -> bool {
        self.reverted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix() -> QuickFix {
        QuickFix::proposed(IssueId::new("I1"))
    }

    #[test]
    fn test_apply_from_proposed_and_previewed() {
        let record = RecordId::new();
        let applied = fix().applied(record).unwrap();
        assert_eq!(applied.state, FixState::Applied);
        assert_eq!(applied.applied_record, Some(record));

        let previewed = fix().previewed().unwrap();
        assert!(previewed.applied(RecordId::new()).is_ok());
    }

    #[test]
    fn test_transition_leaves_original_untouched() {
        let original = fix();
        let next = original.previewed().unwrap();
        assert_eq!(original.state, FixState::Proposed);
        assert_eq!(next.state, FixState::Previewed);
        assert_eq!(next.revision, original.revision + 1);
    }

    #[test]
    fn test_double_apply_is_invalid_state() {
        let applied = fix().applied(RecordId::new()).unwrap();
        let err = applied.applied(RecordId::new()).unwrap_err();
        assert!(matches!(err, FixError::InvalidState(_)));
    }

    #[test]
    fn test_applied_only_leads_to_reverted() {
        let applied = fix().applied(RecordId::new()).unwrap();
        assert!(applied.transition(FixState::Proposed).is_err());
        assert!(applied.transition(FixState::Previewed).is_err());
        assert!(applied.transition(FixState::Conflicted).is_err());
        assert_eq!(applied.reverted().unwrap().state, FixState::Reverted);
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        let conflicted = fix().conflicted("line 4 changed").unwrap();
        assert!(conflicted.state.is_terminal());
        assert_eq!(conflicted.conflict.as_deref(), Some("line 4 changed"));
        assert!(conflicted.applied(RecordId::new()).is_err());

        let reverted = fix()
            .applied(RecordId::new())
            .unwrap()
            .reverted()
            .unwrap();
        for to in [
            FixState::Proposed,
            FixState::Previewed,
            FixState::Applied,
            FixState::Conflicted,
            FixState::Reverted,
        ] {
            assert!(reverted.transition(to).is_err());
        }
    }

    #[test]
    fn test_repeated_preview_is_stable() {
        let once = fix().previewed().unwrap();
        let twice = once.previewed().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_revalidation_flag_round_trip() {
        let flagged = fix().flagged_for_revalidation();
        assert!(flagged.needs_revalidation);
        assert_eq!(flagged.state, FixState::Proposed);
        let cleared = flagged.revalidated();
        assert!(!cleared.needs_revalidation);
        assert_eq!(cleared.revision, flagged.revision + 1);
        assert_eq!(cleared.revalidated(), cleared);
    }

    #[test]
    fn test_record_id_parse_rejects_garbage() {
        let id = RecordId::new();
        assert_eq!(id.to_string().parse::<RecordId>().unwrap(), id);
        assert!(matches!(
            "not-a-record".parse::<RecordId>(),
            Err(FixError::NotFound { .. })
        ));
    }
}
