//! Positions, ranges and character-exact substitution over file text.
//!
//! Lines are 1-based and columns are 0-based character offsets, everywhere.
//! Columns count Unicode scalar values, not bytes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    pub start: Position,
    pub end: Position,
}

impl TextRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A document content change as delivered by the editor host.
///
/// `range: None` means the whole document was replaced by `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    pub range: Option<TextRange>,
    pub text: String,
}

impl ContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn ranged(range: TextRange, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

/// Byte offset of `pos` in `content`.
///
/// The column may point at the line terminator (or end of file) but never
/// past it. Returns `None` when the position lies outside the text.
pub fn offset_of(content: &str, pos: Position) -> Option<usize> {
    if pos.line == 0 {
        return None;
    }
    let line_start = line_start(content, pos.line)?;
    let mut offset = line_start;
    let mut chars = content[line_start..].chars();
    for _ in 0..pos.column {
        match chars.next() {
            Some('\n') | None => return None,
            Some(c) => offset += c.len_utf8(),
        }
    }
    Some(offset)
}

fn line_start(content: &str, line: usize) -> Option<usize> {
    if line == 1 {
        return Some(0);
    }
    content
        .match_indices('\n')
        .nth(line - 2)
        .map(|(idx, _)| idx + 1)
}

/// Position of a byte offset. The offset must sit on a char boundary.
pub fn position_of(content: &str, offset: usize) -> Option<Position> {
    if offset > content.len() || !content.is_char_boundary(offset) {
        return None;
    }
    let before = &content[..offset];
    let line = before.matches('\n').count() + 1;
    let line_begin = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_begin..].chars().count();
    Some(Position::new(line, column))
}

/// Byte span of `char_len` characters starting at `start`. May cross lines.
pub fn span_at(content: &str, start: Position, char_len: usize) -> Option<Range<usize>> {
    let begin = offset_of(content, start)?;
    let mut end = begin;
    let mut chars = content[begin..].chars();
    for _ in 0..char_len {
        end += chars.next()?.len_utf8();
    }
    Some(begin..end)
}

/// Text of `char_len` characters starting at `start`.
pub fn slice_at(content: &str, start: Position, char_len: usize) -> Option<&str> {
    span_at(content, start, char_len).map(|span| &content[span])
}

/// Byte span of a position range.
pub fn span_of(content: &str, range: TextRange) -> Option<Range<usize>> {
    let begin = offset_of(content, range.start)?;
    let end = offset_of(content, range.end)?;
    (begin <= end).then_some(begin..end)
}

/// Replace a byte span, returning the new text.
pub fn substitute(content: &str, span: Range<usize>, text: &str) -> String {
    let mut out = String::with_capacity(content.len() - span.len() + text.len());
    out.push_str(&content[..span.start]);
    out.push_str(text);
    out.push_str(&content[span.end..]);
    out
}

/// Reduce a full-text replacement to the equivalent single range change
/// against `old`: the shortest range outside the common prefix and suffix.
pub fn minimal_change(old: &str, new: &str) -> ContentChange {
    let prefix = common_prefix_len(old, new);
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = common_suffix_len(&old[prefix..], &new[prefix..]).min(max_suffix);

    let old_end = old.len() - suffix;
    let new_end = new.len() - suffix;
    // Both offsets sit on char boundaries by construction.
    let start = position_of(old, prefix).unwrap_or_default();
    let end = position_of(old, old_end).unwrap_or(start);
    ContentChange::ranged(TextRange::new(start, end), &new[prefix..new_end])
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().rev().zip(b.chars().rev()) {
        if ca != cb {
            break;
        }
        len += ca.len_utf8();
    }
    len
}

/// Characters in `text` after its last newline, or all of them.
pub fn last_line_width(text: &str) -> usize {
    match text.rfind('\n') {
        Some(idx) => text[idx + 1..].chars().count(),
        None => text.chars().count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "line one\nvar x = 1;\nlast";

    #[test]
    fn test_offset_of_line_and_column() {
        assert_eq!(offset_of(SAMPLE, Position::new(1, 0)), Some(0));
        assert_eq!(offset_of(SAMPLE, Position::new(2, 4)), Some(13));
        // Column may point at the newline but not beyond.
        assert_eq!(offset_of(SAMPLE, Position::new(1, 8)), Some(8));
        assert_eq!(offset_of(SAMPLE, Position::new(1, 9)), None);
        assert_eq!(offset_of(SAMPLE, Position::new(3, 4)), Some(SAMPLE.len()));
        assert_eq!(offset_of(SAMPLE, Position::new(4, 0)), None);
        assert_eq!(offset_of(SAMPLE, Position::new(0, 0)), None);
    }

    #[test]
    fn test_line_after_trailing_newline_exists() {
        let text = "a\n";
        assert_eq!(offset_of(text, Position::new(2, 0)), Some(2));
        assert_eq!(offset_of(text, Position::new(3, 0)), None);
    }

    #[test]
    fn test_slice_crosses_lines_and_counts_chars() {
        assert_eq!(slice_at(SAMPLE, Position::new(2, 0), 11), Some("var x = 1;\n"));
        assert_eq!(slice_at(SAMPLE, Position::new(3, 0), 5), None);
        let unicode = "é = 1;\n";
        assert_eq!(slice_at(unicode, Position::new(1, 0), 3), Some("é ="));
    }

    #[test]
    fn test_position_of_roundtrips_offsets() {
        let offset = offset_of(SAMPLE, Position::new(2, 4)).unwrap();
        assert_eq!(position_of(SAMPLE, offset), Some(Position::new(2, 4)));
        assert_eq!(position_of(SAMPLE, SAMPLE.len() + 1), None);
    }

    #[test]
    fn test_substitute_leaves_outside_bytes() {
        let span = span_at(SAMPLE, Position::new(2, 0), 11).unwrap();
        let out = substitute(SAMPLE, span, "const x = 1;\n");
        assert_eq!(out, "line one\nconst x = 1;\nlast");
    }

    #[test]
    fn test_minimal_change_single_edit() {
        let old = "a\nvar x = 1;\nb\n";
        let new = "a\nvar x = 2;\nb\n";
        let change = minimal_change(old, new);
        let range = change.range.unwrap();
        assert_eq!(range.start, Position::new(2, 8));
        assert_eq!(range.end, Position::new(2, 9));
        assert_eq!(change.text, "2");
    }

    #[test]
    fn test_minimal_change_deleted_line() {
        let old = "a\nb\nc\n";
        let new = "a\nc\n";
        let change = minimal_change(old, new);
        let range = change.range.unwrap();
        let span = span_of(old, range).unwrap();
        assert_eq!(substitute(old, span, &change.text), new);
        assert_eq!(range.start.line, 2);
    }

    #[test]
    fn test_minimal_change_identical_text_is_empty() {
        let change = minimal_change("same", "same");
        assert!(change.range.unwrap().is_empty());
        assert!(change.text.is_empty());
    }

    #[test]
    fn test_last_line_width() {
        assert_eq!(last_line_width("abc"), 3);
        assert_eq!(last_line_width("abc\nde"), 2);
        assert_eq!(last_line_width("abc\n"), 0);
    }
}
