//! Analysis issues as produced by the external rule engine.
//!
//! An `Issue` is immutable once created. A model reload replaces issues
//! wholesale; nothing here is ever patched in place.

use crate::text::Position;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of an issue, stable for the life of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of the analysis configuration an issue belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationId(String);

impl ConfigurationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issue category as reported by the analysis engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Information,
    Potential,
    Optional,
    Mandatory,
}

impl Severity {
    /// Parse an engine category. Unknown categories are informational.
    pub fn from_category(category: &str) -> Self {
        match category.trim().to_ascii_lowercase().as_str() {
            "mandatory" => Severity::Mandatory,
            "optional" => Severity::Optional,
            "potential" | "potential issues" => Severity::Potential,
            _ => Severity::Information,
        }
    }

    pub fn level(&self) -> DiagnosticLevel {
        match self {
            Severity::Mandatory => DiagnosticLevel::Error,
            Severity::Optional => DiagnosticLevel::Warning,
            Severity::Potential => DiagnosticLevel::Information,
            Severity::Information => DiagnosticLevel::Hint,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Mandatory => "mandatory",
            Severity::Optional => "optional",
            Severity::Potential => "potential",
            Severity::Information => "information",
        }
    }
}

/// Level of an editor diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementKind {
    Replace,
    DeleteLine,
    InsertLine,
}

/// A suggested edit attached to an issue.
///
/// `snapshot` is the text found at `start` when the analysis ran. Its length
/// in characters is the extent of the target range, newlines included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub kind: ReplacementKind,
    pub start: Position,
    pub snapshot: String,
    pub text: String,
}

impl Replacement {
    pub fn replace(start: Position, snapshot: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ReplacementKind::Replace,
            start,
            snapshot: snapshot.into(),
            text: text.into(),
        }
    }

    /// Remove a whole line. The line text must be the analysis-time content;
    /// a missing trailing newline is added.
    pub fn delete_line(line: usize, line_text: &str) -> Self {
        Self {
            kind: ReplacementKind::DeleteLine,
            start: Position::new(line, 0),
            snapshot: with_newline(line_text),
            text: String::new(),
        }
    }

    /// Insert a line before `line`.
    pub fn insert_line(line: usize, text: &str) -> Self {
        Self {
            kind: ReplacementKind::InsertLine,
            start: Position::new(line, 0),
            snapshot: String::new(),
            text: with_newline(text),
        }
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.chars().count()
    }
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

/// A single analysis finding at a source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub configuration: ConfigurationId,
    /// Workspace-relative path of the owning file
    pub file: PathBuf,
    /// 1-based line at analysis time
    pub line: usize,
    /// 0-based character column at analysis time
    pub column: usize,
    /// Span length in characters
    pub length: usize,
    pub severity: Severity,
    pub rule_id: String,
    pub hint: String,
    #[serde(default)]
    pub replacement: Option<Replacement>,
}

impl Issue {
    pub fn new(
        id: impl Into<IssueId>,
        configuration: ConfigurationId,
        file: impl Into<PathBuf>,
        start: Position,
        length: usize,
    ) -> Self {
        Self {
            id: id.into(),
            configuration,
            file: file.into(),
            line: start.line,
            column: start.column,
            length,
            severity: Severity::default(),
            rule_id: String::new(),
            hint: String::new(),
            replacement: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = rule_id.into();
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn with_replacement(mut self, replacement: Replacement) -> Self {
        self.replacement = Some(replacement);
        self
    }

    pub fn start(&self) -> Position {
        Position::new(self.line, self.column)
    }

    pub fn has_quickfix(&self) -> bool {
        self.replacement.is_some()
    }
}

impl From<String> for IssueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
