//! Open editor buffers and the edits made to them since their baseline.
//!
//! The baseline of a document is the text it had when its issues were last
//! loaded (or when it was opened, whichever is later). Every edit after that
//! leaves a `Footprint`; markers consult footprints to decide whether their
//! analysis-time range is still trustworthy.

use fixlens_core::text::{
    last_line_width, minimal_change, span_of, substitute, ContentChange, Position, TextRange,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where one edit landed, in the coordinates of the text it was applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub start: Position,
    pub old_end: Position,
    pub new_end: Position,
}

impl Footprint {
    fn from_change(range: TextRange, text: &str) -> Self {
        let newlines = text.matches('\n').count();
        let new_end = if newlines == 0 {
            Position::new(range.start.line, range.start.column + text.chars().count())
        } else {
            Position::new(range.start.line + newlines, last_line_width(text))
        };
        Self {
            start: range.start,
            old_end: range.end,
            new_end,
        }
    }

    fn line_delta(&self) -> isize {
        self.new_end.line as isize - self.old_end.line as isize
    }

    /// Whether this edit invalidates a marker at `range`.
    ///
    /// Markers are never moved, so a marker survives only if the edit left its
    /// coordinates and content untouched.
    pub fn disturbs(&self, range: TextRange) -> bool {
        if self.start == self.old_end && self.old_end == self.new_end {
            return false;
        }
        if self.old_end <= range.start {
            if self.line_delta() != 0 {
                return true;
            }
            return self.old_end.line == range.start.line
                && self.new_end.column != self.old_end.column;
        }
        if self.start >= range.end && !range.is_empty() {
            return false;
        }
        true
    }
}

/// Point-in-time view of an open document.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub path: PathBuf,
    pub version: i64,
    pub text: Arc<str>,
    pub footprints: Arc<[Footprint]>,
    /// An edit could not be applied to the tracked text; nothing in the
    /// buffer can be located until the next baseline
    pub desynced: bool,
}

impl DocumentSnapshot {
    pub fn range_disturbed(&self, range: TextRange) -> bool {
        self.desynced || self.footprints.iter().any(|fp| fp.disturbs(range))
    }
}

#[derive(Debug)]
struct OpenDocument {
    version: i64,
    text: Arc<str>,
    footprints: Vec<Footprint>,
    desynced: bool,
}

#[derive(Default)]
pub struct DocumentStore {
    docs: Mutex<HashMap<PathBuf, OpenDocument>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> MutexGuard<'_, HashMap<PathBuf, OpenDocument>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a newly opened buffer. Reopening replaces the previous state.
    pub fn open(&self, path: &Path, version: i64, text: impl Into<Arc<str>>) {
        self.docs().insert(
            path.to_path_buf(),
            OpenDocument {
                version,
                text: text.into(),
                footprints: Vec::new(),
                desynced: false,
            },
        );
    }

    /// Apply editor changes in order. Returns false for documents not open.
    pub fn change(&self, path: &Path, version: i64, changes: &[ContentChange]) -> bool {
        let mut docs = self.docs();
        let Some(doc) = docs.get_mut(path) else {
            return false;
        };
        if version < doc.version {
            tracing::debug!(path = %path.display(), version, current = doc.version, "ignoring stale change");
            return true;
        }

        let mut text = doc.text.to_string();
        for change in changes {
            let (range, new_text) = match change.range {
                Some(range) => (range, change.text.clone()),
                None => {
                    let reduced = minimal_change(&text, &change.text);
                    match reduced.range {
                        Some(range) => (range, reduced.text),
                        None => continue,
                    }
                }
            };
            match span_of(&text, range) {
                Some(span) => {
                    text = substitute(&text, span, &new_text);
                    doc.footprints.push(Footprint::from_change(range, &new_text));
                }
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        start = %range.start,
                        end = %range.end,
                        "edit outside tracked text; markers suspended until reload"
                    );
                    doc.desynced = true;
                    if change.range.is_none() {
                        text = change.text.clone();
                    }
                }
            }
        }
        doc.text = Arc::from(text);
        doc.version = version;
        true
    }

    pub fn close(&self, path: &Path) -> bool {
        self.docs().remove(path).is_some()
    }

    /// Forget the edit history; the current text becomes the baseline.
    pub fn reset_baseline(&self, path: &Path) {
        if let Some(doc) = self.docs().get_mut(path) {
            doc.footprints.clear();
            doc.desynced = false;
        }
    }

    pub fn snapshot(&self, path: &Path) -> Option<DocumentSnapshot> {
        self.docs().get(path).map(|doc| DocumentSnapshot {
            path: path.to_path_buf(),
            version: doc.version,
            text: Arc::clone(&doc.text),
            footprints: Arc::from(doc.footprints.as_slice()),
            desynced: doc.desynced,
        })
    }

    pub fn version(&self, path: &Path) -> Option<i64> {
        self.docs().get(path).map(|doc| doc.version)
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.docs().contains_key(path)
    }

    pub fn open_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.docs().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(sl: usize, sc: usize, el: usize, ec: usize) -> TextRange {
        TextRange::new(Position::new(sl, sc), Position::new(el, ec))
    }

    fn marker() -> TextRange {
        // "var x = 1;" on line 4
        range(4, 0, 4, 10)
    }

    #[test]
    fn test_edit_after_marker_keeps_it() {
        let fp = Footprint::from_change(range(4, 10, 4, 10), " // ok");
        assert!(!fp.disturbs(marker()));
        let fp = Footprint::from_change(range(7, 0, 7, 3), "a\nb\nc");
        assert!(!fp.disturbs(marker()));
    }

    #[test]
    fn test_line_count_change_above_drops() {
        let fp = Footprint::from_change(range(2, 0, 2, 0), "\n");
        assert!(fp.disturbs(marker()));
    }

    #[test]
    fn test_same_length_edit_above_keeps() {
        let fp = Footprint::from_change(range(2, 0, 2, 3), "abc");
        assert!(!fp.disturbs(marker()));
    }

    #[test]
    fn test_same_line_shift_before_drops() {
        let m = range(4, 4, 4, 5);
        let fp = Footprint::from_change(range(4, 0, 4, 0), "  ");
        assert!(fp.disturbs(m));
        let fp = Footprint::from_change(range(4, 0, 4, 2), "ab");
        assert!(!fp.disturbs(m));
    }

    #[test]
    fn test_overlap_drops() {
        let fp = Footprint::from_change(range(4, 5, 4, 6), "2");
        assert!(fp.disturbs(marker()));
        let fp = Footprint::from_change(range(3, 0, 5, 0), "");
        assert!(fp.disturbs(marker()));
    }

    #[test]
    fn test_insert_at_marker_start_drops() {
        let fp = Footprint::from_change(range(4, 0, 4, 0), "x");
        assert!(fp.disturbs(marker()));
    }

    #[test]
    fn test_noop_change_disturbs_nothing() {
        let fp = Footprint::from_change(range(4, 3, 4, 3), "");
        assert!(!fp.disturbs(marker()));
    }

    #[test]
    fn test_change_tracks_text_and_footprints() {
        let store = DocumentStore::new();
        let path = Path::new("a.ts");
        store.open(path, 1, "one\ntwo\n");
        assert!(store.change(
            path,
            2,
            &[ContentChange::ranged(range(2, 0, 2, 3), "TWO")]
        ));
        let snap = store.snapshot(path).unwrap();
        assert_eq!(&*snap.text, "one\nTWO\n");
        assert_eq!(snap.version, 2);
        assert_eq!(snap.footprints.len(), 1);

        store.reset_baseline(path);
        assert!(store.snapshot(path).unwrap().footprints.is_empty());
    }

    #[test]
    fn test_full_replacement_is_reduced() {
        let store = DocumentStore::new();
        let path = Path::new("a.ts");
        store.open(path, 1, "a\nvar x = 1;\nb\n");
        store.change(path, 2, &[ContentChange::full("a\nvar x = 1;\nb changed\n")]);
        let snap = store.snapshot(path).unwrap();
        assert_eq!(&*snap.text, "a\nvar x = 1;\nb changed\n");
        // Only " changed" after "b" on line 3 was inserted.
        assert!(!snap.range_disturbed(range(2, 0, 2, 10)));
        assert!(!snap.range_disturbed(range(3, 0, 3, 1)));
        assert!(snap.range_disturbed(range(3, 1, 3, 1)));
    }

    #[test]
    fn test_out_of_range_edit_desyncs() {
        let store = DocumentStore::new();
        let path = Path::new("a.ts");
        store.open(path, 1, "short\n");
        store.change(path, 2, &[ContentChange::ranged(range(9, 0, 9, 1), "x")]);
        let snap = store.snapshot(path).unwrap();
        assert!(snap.desynced);
        assert!(snap.range_disturbed(range(1, 0, 1, 1)));
    }

    #[test]
    fn test_change_on_closed_document() {
        let store = DocumentStore::new();
        assert!(!store.change(Path::new("a.ts"), 1, &[ContentChange::full("x")]));
        store.open(Path::new("a.ts"), 1, "x");
        assert!(store.close(Path::new("a.ts")));
        assert!(!store.is_open(Path::new("a.ts")));
    }
}
