//! Editor diagnostics projected from issues.

use crate::issue::{DiagnosticLevel, Issue, IssueId};
use crate::text::{Position, TextRange};
use serde::{Deserialize, Serialize};

/// A diagnostic derived 1:1 from an issue for one document version.
///
/// Markers are recomputed, never persisted; their identity is the source
/// issue plus the document version they were computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub issue_id: IssueId,
    pub document_version: i64,
    pub range: TextRange,
    pub level: DiagnosticLevel,
    pub message: String,
    pub rule_id: String,
    pub has_quickfix: bool,
}

impl Marker {
    pub fn from_issue(issue: &Issue, range: TextRange, document_version: i64) -> Self {
        Self {
            issue_id: issue.id.clone(),
            document_version,
            range,
            level: issue.severity.level(),
            message: issue.hint.clone(),
            rule_id: issue.rule_id.clone(),
            has_quickfix: issue.has_quickfix(),
        }
    }

    /// `range` with 0-based lines, as editor hosts address positions.
    pub fn editor_range(&self) -> TextRange {
        let zero_based = |pos: Position| Position::new(pos.line.saturating_sub(1), pos.column);
        TextRange::new(zero_based(self.range.start), zero_based(self.range.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{ConfigurationId, Severity};

    #[test]
    fn test_marker_carries_issue_fields() {
        let issue = Issue::new("I1", ConfigurationId::new("cfg"), "a.ts", Position::new(4, 2), 3)
            .with_severity(Severity::Mandatory)
            .with_rule("js-no-var")
            .with_hint("Use const");
        let range = TextRange::new(Position::new(4, 2), Position::new(4, 5));
        let marker = Marker::from_issue(&issue, range, 7);
        assert_eq!(marker.level, DiagnosticLevel::Error);
        assert_eq!(marker.message, "Use const");
        assert_eq!(marker.document_version, 7);
        assert!(!marker.has_quickfix);
        assert_eq!(
            marker.editor_range(),
            TextRange::new(Position::new(3, 2), Position::new(3, 5))
        );
    }
}
