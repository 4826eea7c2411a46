//! Reader for the analysis engine's JSON report.
//!
//! ```json
//! { "configurations": [ { "id": "cfg", "issues": [ {
//!     "id": "I1", "file": "src/a.ts", "line": 4, "column": 0, "length": 12,
//!     "category": "mandatory", "ruleId": "js-var", "hint": "Use const",
//!     "quickfix": { "type": "REPLACE", "search": "var x = 1;\n",
//!                   "replacement": "const x = 1;\n" } } ] } ] }
//! ```

use crate::util::workspace_relative;
use anyhow::{Context, Result};
use fixlens_core::issue::{ConfigurationId, Issue, Replacement, Severity};
use fixlens_core::text::Position;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    configurations: Vec<RawConfiguration>,
}

#[derive(Debug, Deserialize)]
struct RawConfiguration {
    id: String,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIssue {
    id: String,
    file: PathBuf,
    line: usize,
    #[serde(default)]
    column: usize,
    #[serde(default)]
    length: usize,
    #[serde(default)]
    category: String,
    #[serde(default)]
    rule_id: String,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quickfix: Option<RawQuickfix>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuickfix {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    replacement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfiguration {
    pub id: ConfigurationId,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisReport {
    pub configurations: Vec<ReportConfiguration>,
}

impl AnalysisReport {
    pub fn issue_count(&self) -> usize {
        self.configurations.iter().map(|c| c.issues.len()).sum()
    }
}

/// Read a report file, normalizing issue paths against `workspace`.
pub fn load_report(path: &Path, workspace: &Path) -> Result<AnalysisReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report {}", path.display()))?;
    parse_report(&content, workspace)
        .with_context(|| format!("Failed to parse report {}", path.display()))
}

pub fn parse_report(content: &str, workspace: &Path) -> Result<AnalysisReport> {
    let raw: RawReport = serde_json::from_str(content)?;
    let mut seen = HashSet::new();
    let mut configurations = Vec::with_capacity(raw.configurations.len());

    for raw_config in raw.configurations {
        let config_id = ConfigurationId::new(raw_config.id);
        let mut issues = Vec::with_capacity(raw_config.issues.len());
        for raw_issue in raw_config.issues {
            if !seen.insert(raw_issue.id.clone()) {
                anyhow::bail!("Duplicate issue id '{}' in report", raw_issue.id);
            }
            issues.push(convert_issue(raw_issue, &config_id, workspace)?);
        }
        configurations.push(ReportConfiguration {
            id: config_id,
            issues,
        });
    }

    Ok(AnalysisReport { configurations })
}

fn convert_issue(raw: RawIssue, configuration: &ConfigurationId, workspace: &Path) -> Result<Issue> {
    if raw.line == 0 {
        anyhow::bail!("Issue '{}' has line 0; lines are 1-based", raw.id);
    }
    let file = workspace_relative(workspace, &raw.file);
    let start = Position::new(raw.line, raw.column);
    let hint = raw.hint.or(raw.title).unwrap_or_default();

    let mut issue = Issue::new(raw.id, configuration.clone(), file, start, raw.length)
        .with_severity(Severity::from_category(&raw.category))
        .with_rule(raw.rule_id)
        .with_hint(hint);

    if let Some(quickfix) = raw.quickfix {
        match convert_quickfix(quickfix, start) {
            Ok(replacement) => issue = issue.with_replacement(replacement),
            Err(err) => {
                tracing::warn!(issue = %issue.id, error = %err, "ignoring malformed quickfix");
            }
        }
    }
    Ok(issue)
}

fn convert_quickfix(raw: RawQuickfix, issue_start: Position) -> Result<Replacement> {
    let line = raw.line.unwrap_or(issue_start.line);
    if line == 0 {
        anyhow::bail!("quickfix line 0");
    }
    match raw.kind.trim().to_ascii_uppercase().as_str() {
        "REPLACE" => {
            let column = raw.column.unwrap_or(if line == issue_start.line {
                issue_start.column
            } else {
                0
            });
            let search = raw
                .search
                .filter(|s| !s.is_empty())
                .context("REPLACE quickfix without search text")?;
            let replacement = raw.replacement.unwrap_or_default();
            Ok(Replacement::replace(
                Position::new(line, column),
                search,
                replacement,
            ))
        }
        "DELETE_LINE" => {
            let search = raw
                .search
                .context("DELETE_LINE quickfix without the line's text")?;
            Ok(Replacement::delete_line(line, &search))
        }
        "INSERT_LINE" => {
            let text = raw
                .replacement
                .context("INSERT_LINE quickfix without replacement text")?;
            Ok(Replacement::insert_line(line, &text))
        }
        other => anyhow::bail!("unknown quickfix type '{}'", other),
    }
}
