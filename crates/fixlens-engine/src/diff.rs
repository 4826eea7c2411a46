//! Unified diff rendering for quickfix previews
//!
//! A quickfix changes one contiguous region, so a rendered diff has at most
//! one hunk.

use std::fmt;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl DiffLine {
    pub fn content(&self) -> &str {
        match self {
            DiffLine::Context(s) => s,
            DiffLine::Add(s) => s,
            DiffLine::Remove(s) => s,
        }
    }

    fn prefix(&self) -> char {
        match self {
            DiffLine::Context(_) => ' ',
            DiffLine::Add(_) => '+',
            DiffLine::Remove(_) => '-',
        }
    }
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Get a summary of changes in this hunk
    pub fn summary(&self) -> (usize, usize) {
        let adds = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Add(_)))
            .count();
        let removes = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Remove(_)))
            .count();
        (adds, removes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedDiff {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<DiffHunk>,
}

impl UnifiedDiff {
    /// Get total additions and deletions
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }
}

impl fmt::Display for UnifiedDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- a/{}", self.old_path)?;
        writeln!(f, "+++ b/{}", self.new_path)?;
        for hunk in &self.hunks {
            writeln!(
                f,
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            )?;
            for line in &hunk.lines {
                writeln!(f, "{}{}", line.prefix(), line.content())?;
            }
        }
        Ok(())
    }
}

/// Lines with their terminators, so a changed line ending counts as a change.
fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn strip_terminator(line: &str) -> String {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
        .to_string()
}

/// Diff `old` against `new` as one hunk with `context` lines around it.
pub fn diff_texts(path: &str, old: &str, new: &str, context: usize) -> UnifiedDiff {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);

    let prefix = old_lines
        .iter()
        .zip(&new_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
    let suffix = old_lines
        .iter()
        .rev()
        .zip(new_lines.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let mut diff = UnifiedDiff {
        old_path: path.to_string(),
        new_path: path.to_string(),
        hunks: Vec::new(),
    };
    if prefix == old_lines.len() && prefix == new_lines.len() {
        return diff;
    }

    let old_changed_end = old_lines.len() - suffix;
    let new_changed_end = new_lines.len() - suffix;
    let before = context.min(prefix);
    let after = context.min(suffix);
    let hunk_start = prefix - before;

    let mut lines = Vec::new();
    lines.extend(
        old_lines[hunk_start..prefix]
            .iter()
            .map(|l| DiffLine::Context(strip_terminator(l))),
    );
    lines.extend(
        old_lines[prefix..old_changed_end]
            .iter()
            .map(|l| DiffLine::Remove(strip_terminator(l))),
    );
    lines.extend(
        new_lines[prefix..new_changed_end]
            .iter()
            .map(|l| DiffLine::Add(strip_terminator(l))),
    );
    lines.extend(
        old_lines[old_changed_end..old_changed_end + after]
            .iter()
            .map(|l| DiffLine::Context(strip_terminator(l))),
    );

    let old_count = old_changed_end + after - hunk_start;
    let new_count = new_changed_end + after - hunk_start;
    // An empty side points at the line before the hunk.
    let start_of = |count: usize| if count == 0 { hunk_start } else { hunk_start + 1 };

    diff.hunks.push(DiffHunk {
        old_start: start_of(old_count),
        old_count,
        new_start: start_of(new_count),
        new_count,
        lines,
    });
    diff
}
