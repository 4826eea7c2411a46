use super::*;
use fixlens_adapters::git_ops::list_checkpoints;
use fixlens_core::issue::{ConfigurationId, Replacement, Severity};
use fixlens_core::quickfix::FixState;
use fixlens_core::text::{ContentChange, Position, TextRange};
use fixlens_core::vdoc::PREVIEW_SCHEME;
use git2::{Repository, Signature};
use std::collections::HashMap;
use std::sync::Mutex;

const A_TS: &str = "import { a } from './a';\nimport { b } from './b';\n\nvar x = 1;\nconsole.log(x);\n";
const A_TS_FIXED: &str =
    "import { a } from './a';\nimport { b } from './b';\n\nconst x = 1;\nconsole.log(x);\n";

#[derive(Default)]
struct RecordingSink {
    current: Mutex<HashMap<PathBuf, Vec<Marker>>>,
    publishes: Mutex<usize>,
}

impl RecordingSink {
    fn markers(&self, file: &str) -> Option<Vec<Marker>> {
        self.current.lock().unwrap().get(Path::new(file)).cloned()
    }

    fn publish_count(&self) -> usize {
        *self.publishes.lock().unwrap()
    }
}

impl DiagnosticSink for RecordingSink {
    fn publish(&self, file: &Path, markers: &[Marker]) {
        *self.publishes.lock().unwrap() += 1;
        self.current
            .lock()
            .unwrap()
            .insert(file.to_path_buf(), markers.to_vec());
    }

    fn clear(&self, file: &Path) {
        self.current.lock().unwrap().remove(file);
    }
}

/// Helper to create a temporary git repo for testing
fn create_temp_repo() -> (tempfile::TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let repo_path = temp_dir.path().canonicalize().unwrap();

    let repo = Repository::init(&repo_path).expect("Failed to init repo");
    let mut config = repo.config().unwrap();
    config.set_str("user.name", "Test User").unwrap();
    config.set_str("user.email", "test@example.com").unwrap();

    let sig = Signature::now("Test User", "test@example.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();

    (temp_dir, repo_path)
}

fn commit_test_file(repo_path: &Path, rel_path: &str, content: &str) {
    std::fs::write(repo_path.join(rel_path), content).unwrap();
    let repo = Repository::open(repo_path).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(rel_path)).unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let parent = repo.head().unwrap().peel_to_commit().unwrap();
    let sig = Signature::now("Test User", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "add file", &tree, &[&parent])
        .unwrap();
}

fn plain_workspace() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::write(root.join("a.ts"), A_TS).unwrap();
    (dir, root)
}

fn cfg() -> ConfigurationId {
    ConfigurationId::new("cfg")
}

/// `I1` on `a.ts`: line 4, column 0, length 12, `var` to `const`.
fn i1() -> Issue {
    Issue::new("I1", cfg(), "a.ts", Position::new(4, 0), 12)
        .with_severity(Severity::Mandatory)
        .with_rule("js-no-var")
        .with_hint("Use const for bindings that are never reassigned")
        .with_replacement(Replacement::replace(
            Position::new(4, 0),
            "var x = 1;\n",
            "const x = 1;\n",
        ))
}

fn plain_issue(id: &str, line: usize, column: usize, length: usize) -> Issue {
    Issue::new(id, cfg(), "a.ts", Position::new(line, column), length)
        .with_severity(Severity::Optional)
        .with_hint(format!("hint {}", id))
}

fn session(root: &Path) -> (Session, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(SessionOptions::new(root, sink.clone()));
    (session, sink)
}

async fn loaded(root: &Path, issues: Vec<Issue>) -> (Session, Arc<RecordingSink>) {
    let (session, sink) = session(root);
    session
        .load(issues, LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    (session, sink)
}

fn read(root: &Path) -> String {
    std::fs::read_to_string(root.join("a.ts")).unwrap()
}

fn id(s: &str) -> IssueId {
    IssueId::new(s)
}

// ========================================================================
// Preview and result documents
// ========================================================================

#[tokio::test]
async fn test_preview_replaces_exactly_the_issue_range() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;

    let preview = session
        .provide_content(&format!("{}://I1/preview", PREVIEW_SCHEME))
        .await;
    assert_eq!(preview, A_TS_FIXED);
    // Everything before and after the range is byte-identical.
    let start = A_TS.find("var x").unwrap();
    assert_eq!(&preview.as_bytes()[..start], &A_TS.as_bytes()[..start]);
    assert!(preview.ends_with("console.log(x);\n"));

    assert_eq!(read(&root), A_TS);
    assert_eq!(session.quickfix(&id("I1")).unwrap().state, FixState::Previewed);
}

#[tokio::test]
async fn test_result_document_follows_apply() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;

    assert_eq!(session.result(&id("I1")).await, A_TS_FIXED);
    session.apply(&id("I1")).await.unwrap();
    assert_eq!(session.result(&id("I1")).await, A_TS_FIXED);
    assert!(session
        .preview(&id("I1"))
        .await
        .contains("already applied"));
}

#[tokio::test]
async fn test_unknown_uri_renders_notice() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;
    let content = session.provide_content("quickfix://I1/result").await;
    assert!(content.starts_with(crate::vdocs::NOTICE_MARKER));
    let content = session.provide_content("quickfixed://I404/result").await;
    assert!(content.contains("no longer exists"));
}

#[tokio::test]
async fn test_preview_diff() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;
    let diff = session.preview_diff(&id("I1")).await.unwrap();
    assert_eq!(diff.stats(), (1, 1));
    let rendered = diff.to_string();
    assert!(rendered.contains("-var x = 1;\n+const x = 1;\n"));
    assert!(rendered.starts_with("--- a/a.ts\n+++ b/a.ts\n"));
}

// ========================================================================
// Apply and revert
// ========================================================================

#[tokio::test]
async fn test_apply_then_revert_without_version_control() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;

    let record = session.apply(&id("I1")).await.unwrap();
    assert_eq!(read(&root), A_TS_FIXED);
    assert!(record.checkpoint.is_none());
    assert_eq!(record.original_text, "var x = 1;\n");
    assert_eq!(session.quickfix(&id("I1")).unwrap().state, FixState::Applied);

    let reverted = session.revert(record.id).await.unwrap();
    assert!(reverted.is_reverted());
    assert_eq!(read(&root).as_bytes(), A_TS.as_bytes());
    assert_eq!(session.quickfix(&id("I1")).unwrap().state, FixState::Reverted);

    let err = session.revert(record.id).await.unwrap_err();
    assert!(matches!(err, FixError::InvalidState(_)));
}

#[tokio::test]
async fn test_apply_then_revert_with_git_checkpoint() {
    let (_dir, root) = create_temp_repo();
    commit_test_file(&root, "a.ts", A_TS);
    // Uncommitted local edit must survive the round trip.
    let local = format!("{}// local note\n", A_TS);
    std::fs::write(root.join("a.ts"), &local).unwrap();

    let sink = Arc::new(RecordingSink::default());
    let vcs = Arc::new(GitVersionControl::discover(&root).unwrap());
    let session = Session::new(SessionOptions::new(&root, sink).with_vcs(vcs));
    session
        .load(vec![i1()], LoadScope::File(PathBuf::from("a.ts")))
        .await
        .unwrap();

    let record = session.apply(&id("I1")).await.unwrap();
    assert!(record.checkpoint.is_some());
    assert_eq!(list_checkpoints(&root).unwrap().len(), 1);
    assert_eq!(read(&root), format!("{}// local note\n", A_TS_FIXED));

    session.revert(record.id).await.unwrap();
    assert_eq!(read(&root), local);
    assert!(list_checkpoints(&root).unwrap().is_empty());

    let repo = Repository::open(&root).unwrap();
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.message(), Some("add file"));
}

#[tokio::test]
async fn test_revert_by_range_after_later_edit_with_git() {
    let (_dir, root) = create_temp_repo();
    commit_test_file(&root, "a.ts", A_TS);
    let sink = Arc::new(RecordingSink::default());
    let vcs = Arc::new(GitVersionControl::discover(&root).unwrap());
    let session = Session::new(SessionOptions::new(&root, sink).with_vcs(vcs));
    session
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();

    let record = session.apply(&id("I1")).await.unwrap();
    let edited = A_TS_FIXED.replace("console.log(x);", "console.log(x + 1);");
    std::fs::write(root.join("a.ts"), &edited).unwrap();

    session.revert(record.id).await.unwrap();
    assert_eq!(read(&root), A_TS.replace("console.log(x);", "console.log(x + 1);"));
    assert!(list_checkpoints(&root).unwrap().is_empty());
}

#[tokio::test]
async fn test_one_character_divergence_conflicts() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;
    let drifted = A_TS.replace("var x = 1;", "var x = 1 ;");
    std::fs::write(root.join("a.ts"), &drifted).unwrap();

    let err = session.apply(&id("I1")).await.unwrap_err();
    assert!(matches!(err, FixError::Conflict { .. }));
    assert_eq!(read(&root), drifted);
    assert_eq!(
        session.quickfix(&id("I1")).unwrap().state,
        FixState::Conflicted
    );
    assert!(session.preview(&id("I1")).await.contains("in conflict"));
    assert!(session.records().is_empty());
}

#[tokio::test]
async fn test_user_edit_of_fixed_line_conflicts() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;
    let edited = A_TS.replace("var x = 1;", "var x = 2;");
    std::fs::write(root.join("a.ts"), &edited).unwrap();

    let err = session.apply(&id("I1")).await.unwrap_err();
    assert!(matches!(err, FixError::Conflict { .. }));
    assert!(read(&root).contains("var x = 2;\n"));
    assert_eq!(read(&root), edited);
}

#[tokio::test]
async fn test_second_apply_is_invalid_state() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;
    session.apply(&id("I1")).await.unwrap();

    let err = session.apply(&id("I1")).await.unwrap_err();
    assert!(matches!(err, FixError::InvalidState(_)));
    assert_eq!(read(&root), A_TS_FIXED);
    assert_eq!(session.records().len(), 1);
}

#[tokio::test]
async fn test_concurrent_apply_on_one_issue() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;

    let issue = id("I1");
    let (first, second) = tokio::join!(session.apply(&issue), session.apply(&issue));
    let oks = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|ok| **ok)
        .count();
    assert_eq!(oks, 1);
    let failure = first.err().or(second.err()).unwrap();
    assert!(matches!(failure, FixError::InvalidState(_)));
    assert_eq!(read(&root), A_TS_FIXED);
}

#[tokio::test]
async fn test_fixes_in_one_file_serialize() {
    let (_dir, root) = plain_workspace();
    let header = Issue::new("I2", cfg(), "a.ts", Position::new(1, 0), 6).with_replacement(
        Replacement::replace(Position::new(1, 0), "import", "import type"),
    );
    let (session, _) = loaded(&root, vec![i1(), header]).await;

    let (fix, header) = (id("I1"), id("I2"));
    let (a, b) = tokio::join!(session.apply(&fix), session.apply(&header));
    a.unwrap();
    b.unwrap();
    assert_eq!(
        read(&root),
        A_TS_FIXED.replacen("import {", "import type {", 1)
    );
}

#[tokio::test]
async fn test_apply_unknown_issue_is_not_found() {
    let (_dir, root) = plain_workspace();
    let (session, _) = loaded(&root, vec![i1()]).await;
    let err = session.apply(&id("I404")).await.unwrap_err();
    assert!(matches!(err, FixError::NotFound { .. }));
    assert!(session.revert(RecordId::new()).await.is_err());
}

// ========================================================================
// Markers
// ========================================================================

#[tokio::test]
async fn test_markers_only_for_open_documents() {
    let (_dir, root) = plain_workspace();
    let (session, sink) = loaded(&root, vec![i1(), plain_issue("P1", 1, 9, 5)]).await;
    assert_eq!(sink.publish_count(), 0);

    session
        .reconcile(Event::DocumentOpened {
            path: root.join("a.ts"),
            version: 1,
            text: A_TS.to_string(),
        })
        .await;
    let markers = sink.markers("a.ts").unwrap();
    let ids: Vec<_> = markers.iter().map(|m| m.issue_id.to_string()).collect();
    assert_eq!(ids, vec!["P1", "I1"]);
    assert_eq!(
        markers[1].range,
        TextRange::new(Position::new(4, 0), Position::new(5, 1))
    );
    assert!(markers[1].has_quickfix);

    session
        .reconcile(Event::DocumentClosed {
            path: root.join("a.ts"),
        })
        .await;
    assert!(sink.markers("a.ts").is_none());
    assert!(session.refresh(Path::new("a.ts")).await.is_none());
}

#[tokio::test]
async fn test_edits_drop_touched_markers() {
    let (_dir, root) = plain_workspace();
    let (session, sink) = loaded(
        &root,
        vec![plain_issue("top", 1, 0, 6), plain_issue("bottom", 5, 0, 7)],
    )
    .await;
    session
        .reconcile(Event::DocumentOpened {
            path: PathBuf::from("a.ts"),
            version: 1,
            text: A_TS.to_string(),
        })
        .await;
    assert_eq!(sink.markers("a.ts").unwrap().len(), 2);

    // Adding a line above "bottom" changes the line count before it.
    session
        .reconcile(Event::DocumentChanged {
            path: PathBuf::from("a.ts"),
            version: 2,
            changes: vec![ContentChange::ranged(
                TextRange::new(Position::new(3, 0), Position::new(3, 0)),
                "\n",
            )],
        })
        .await;
    let markers = sink.markers("a.ts").unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].issue_id.as_str(), "top");
    assert_eq!(markers[0].document_version, 2);
}

#[tokio::test]
async fn test_reload_invalidates_markers_and_documents() {
    let (_dir, root) = plain_workspace();
    let (session, sink) = loaded(&root, vec![i1()]).await;
    session
        .reconcile(Event::DocumentOpened {
            path: PathBuf::from("a.ts"),
            version: 1,
            text: A_TS.to_string(),
        })
        .await;
    assert_eq!(session.preview(&id("I1")).await, A_TS_FIXED);
    assert_eq!(sink.markers("a.ts").unwrap().len(), 1);

    let reworded = Issue::new("I1", cfg(), "a.ts", Position::new(4, 0), 3).with_replacement(
        Replacement::replace(Position::new(4, 0), "var", "let"),
    );
    let change = session
        .load(
            vec![reworded, plain_issue("P2", 5, 0, 7)],
            LoadScope::Configuration(cfg()),
        )
        .await
        .unwrap();
    assert_eq!(change.superseded, vec![id("I1")]);

    assert_eq!(
        session.preview(&id("I1")).await,
        A_TS.replace("var x", "let x")
    );
    let markers = sink.markers("a.ts").unwrap();
    let ids: Vec<_> = markers.iter().map(|m| m.issue_id.to_string()).collect();
    assert_eq!(ids, vec!["I1", "P2"]);
    assert_eq!(markers[0].range.end, Position::new(4, 3));
}

#[tokio::test]
async fn test_reload_resets_edit_baseline() {
    let (_dir, root) = plain_workspace();
    let (session, sink) = loaded(&root, vec![plain_issue("P1", 5, 0, 7)]).await;
    session
        .reconcile(Event::DocumentOpened {
            path: PathBuf::from("a.ts"),
            version: 1,
            text: A_TS.to_string(),
        })
        .await;
    let edited = format!("// header\n{}", A_TS);
    session
        .reconcile(Event::DocumentChanged {
            path: PathBuf::from("a.ts"),
            version: 2,
            changes: vec![ContentChange::full(edited)],
        })
        .await;
    assert!(sink.markers("a.ts").unwrap().is_empty());

    // A fresh analysis of the edited buffer locates the issue again.
    session
        .load(
            vec![plain_issue("P1", 6, 0, 7)],
            LoadScope::Configuration(cfg()),
        )
        .await
        .unwrap();
    assert_eq!(sink.markers("a.ts").unwrap().len(), 1);
}

#[tokio::test]
async fn test_applied_issue_loses_its_marker_until_reverted() {
    let (_dir, root) = plain_workspace();
    let (session, sink) = loaded(&root, vec![i1(), plain_issue("P1", 1, 0, 6)]).await;
    session
        .reconcile(Event::DocumentOpened {
            path: PathBuf::from("a.ts"),
            version: 1,
            text: A_TS.to_string(),
        })
        .await;
    assert_eq!(sink.markers("a.ts").unwrap().len(), 2);

    let record = session.apply(&id("I1")).await.unwrap();
    let ids: Vec<_> = sink
        .markers("a.ts")
        .unwrap()
        .iter()
        .map(|m| m.issue_id.to_string())
        .collect();
    assert_eq!(ids, vec!["P1"]);

    session.revert(record.id).await.unwrap();
    assert_eq!(sink.markers("a.ts").unwrap().len(), 2);
}

#[tokio::test]
async fn test_apply_on_closed_document_publishes_nothing() {
    let (_dir, root) = plain_workspace();
    let (session, sink) = loaded(&root, vec![i1()]).await;
    session.apply(&id("I1")).await.unwrap();
    assert_eq!(sink.publish_count(), 0);
    assert_eq!(read(&root), A_TS_FIXED);
}

// ========================================================================
// Ledger
// ========================================================================

#[tokio::test]
async fn test_records_survive_sessions() {
    let (_dir, root) = plain_workspace();
    let ledger = Arc::new(Ledger::new(&root, ".fixlens"));

    let record = {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new(SessionOptions::new(&root, sink).with_ledger(ledger.clone()));
        session
            .load(vec![i1()], LoadScope::Configuration(cfg()))
            .await
            .unwrap();
        session.apply(&id("I1")).await.unwrap()
    };

    let sink = Arc::new(RecordingSink::default());
    let session = Session::new(SessionOptions::new(&root, sink).with_ledger(ledger));
    session
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    assert_eq!(session.restore_records().await.unwrap(), 1);
    assert_eq!(session.quickfix(&id("I1")).unwrap().state, FixState::Applied);
    assert!(session.preview(&id("I1")).await.contains("already applied"));

    session.revert(record.id).await.unwrap();
    assert_eq!(read(&root), A_TS);
    assert_eq!(session.quickfix(&id("I1")).unwrap().state, FixState::Reverted);
    assert!(session.records()[0].is_reverted());
}

#[tokio::test]
async fn test_revert_from_fresh_session_without_load() {
    let (_dir, root) = plain_workspace();
    let ledger = Arc::new(Ledger::new(&root, ".fixlens"));
    let sink = Arc::new(RecordingSink::default());
    let first = Session::new(SessionOptions::new(&root, sink.clone()).with_ledger(ledger.clone()));
    first
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    let record = first.apply(&id("I1")).await.unwrap();

    let second = Session::new(SessionOptions::new(&root, sink).with_ledger(ledger));
    second.revert(record.id).await.unwrap();
    assert_eq!(read(&root), A_TS);
}

#[tokio::test]
async fn test_fresh_session_can_retry_after_revert() {
    let (_dir, root) = plain_workspace();
    let ledger = Arc::new(Ledger::new(&root, ".fixlens"));
    let sink = Arc::new(RecordingSink::default());

    let first = Session::new(SessionOptions::new(&root, sink.clone()).with_ledger(ledger.clone()));
    first
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    let record = first.apply(&id("I1")).await.unwrap();
    first.revert(record.id).await.unwrap();

    let second = Session::new(SessionOptions::new(&root, sink).with_ledger(ledger));
    second
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    assert_eq!(second.restore_records().await.unwrap(), 0);
    assert_eq!(second.quickfix(&id("I1")).unwrap().state, FixState::Proposed);
    assert_eq!(second.preview(&id("I1")).await, A_TS_FIXED);

    second.apply(&id("I1")).await.unwrap();
    assert_eq!(read(&root), A_TS_FIXED);
}

#[tokio::test]
async fn test_fix_undone_by_hand_is_not_restored() {
    let (_dir, root) = plain_workspace();
    let ledger = Arc::new(Ledger::new(&root, ".fixlens"));
    let sink = Arc::new(RecordingSink::default());

    let first = Session::new(SessionOptions::new(&root, sink.clone()).with_ledger(ledger.clone()));
    first
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    first.apply(&id("I1")).await.unwrap();
    std::fs::write(root.join("a.ts"), A_TS).unwrap();

    let second = Session::new(SessionOptions::new(&root, sink).with_ledger(ledger));
    second
        .load(vec![i1()], LoadScope::Configuration(cfg()))
        .await
        .unwrap();
    assert_eq!(second.restore_records().await.unwrap(), 0);
    assert_ne!(second.quickfix(&id("I1")).unwrap().state, FixState::Applied);

    let record = second.apply(&id("I1")).await.unwrap();
    assert_eq!(read(&root), A_TS_FIXED);
    second.revert(record.id).await.unwrap();
    assert_eq!(read(&root), A_TS);
}
