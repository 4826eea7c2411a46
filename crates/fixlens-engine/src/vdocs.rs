//! Read-only documents behind the `quickfix` and `quickfixed` schemes.
//!
//! Content is computed on first read and cached per identifier until the
//! owning file is invalidated. Every failure is rendered as content that
//! starts with `NOTICE_MARKER`; nothing here returns an error.

use crate::fix_engine::FixEngine;
use crate::fixes::FixRegistry;
use crate::issue_store::IssueStore;
use fixlens_core::issue::Issue;
use fixlens_core::quickfix::FixState;
use fixlens_core::vdoc::{Variant, VirtualDocId};
use fixlens_core::FixError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const NOTICE_MARKER: &str = "// [fixlens]";

struct CachedDoc {
    file: PathBuf,
    content: Arc<str>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<VirtualDocId, CachedDoc>,
    /// Bumped on every invalidation of a file
    epochs: HashMap<PathBuf, u64>,
}

impl CacheState {
    fn epoch(&self, file: &Path) -> u64 {
        self.epochs.get(file).copied().unwrap_or(0)
    }
}

/// Rendered content plus whether it may be cached.
struct Rendered {
    content: String,
    cacheable: bool,
}

impl Rendered {
    fn stable(content: String) -> Self {
        Self {
            content,
            cacheable: true,
        }
    }

    fn transient(content: String) -> Self {
        Self {
            content,
            cacheable: false,
        }
    }
}

pub fn notice(title: &str, detail: &str) -> String {
    format!("{} {}\n//\n// {}\n", NOTICE_MARKER, title, detail.replace('\n', "\n// "))
}

pub struct VirtualDocuments {
    store: Arc<IssueStore>,
    fixes: Arc<FixRegistry>,
    engine: Arc<FixEngine>,
    cache: Mutex<CacheState>,
}

impl VirtualDocuments {
    pub fn new(store: Arc<IssueStore>, fixes: Arc<FixRegistry>, engine: Arc<FixEngine>) -> Self {
        Self {
            store,
            fixes,
            engine,
            cache: Mutex::new(CacheState::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Content for `id`. Identical across reads until the next invalidation.
    pub async fn provide_content(&self, id: &VirtualDocId) -> String {
        // An I/O failure during apply flags the fix. Cached content is not
        // served again until the file reads back.
        let flagged = self
            .fixes
            .get(&id.issue_id)
            .is_some_and(|fix| fix.needs_revalidation);
        {
            let mut cache = self.cache();
            if flagged {
                cache.entries.remove(id);
            } else if let Some(cached) = cache.entries.get(id) {
                tracing::debug!(%id, "virtual document cache hit");
                return cached.content.to_string();
            }
        }

        let issue = match self.store.lookup(&id.issue_id) {
            Ok(issue) => issue,
            Err(err) => return render_error(&err),
        };
        let epoch = self.cache().epoch(&issue.file);

        let rendered = match id.variant {
            Variant::Preview => self.render_preview(&issue).await,
            Variant::Result => self.render_result(&issue).await,
        };
        if !rendered.cacheable {
            return rendered.content;
        }

        let mut cache = self.cache();
        if let Some(existing) = cache.entries.get(id) {
            return existing.content.to_string();
        }
        // An invalidation that raced this render wins.
        if cache.epoch(&issue.file) == epoch {
            cache.entries.insert(
                id.clone(),
                CachedDoc {
                    file: issue.file.clone(),
                    content: Arc::from(rendered.content.as_str()),
                },
            );
        }
        rendered.content
    }

    async fn render_preview(&self, issue: &Arc<Issue>) -> Rendered {
        let fix = self.fixes.current(&issue.id);
        match fix.state {
            FixState::Applied => {
                return Rendered::stable(notice(
                    &format!("Quickfix for {} is already applied", issue.id),
                    "Open the result document to see the file as it is now.",
                ))
            }
            FixState::Reverted => return Rendered::stable(reverted_notice(issue)),
            FixState::Conflicted => {
                return Rendered::stable(notice(
                    &format!("Quickfix for {} is in conflict", issue.id),
                    fix.conflict.as_deref().unwrap_or("The file changed since the analysis ran."),
                ))
            }
            FixState::Proposed | FixState::Previewed => {}
        }

        match self.engine.dry_run(issue).await {
            Ok(dry) => {
                let _ = self
                    .fixes
                    .update(&issue.id, |fix| fix.previewed().map(|fix| fix.revalidated()));
                Rendered::stable(dry.new_content)
            }
            Err(err) => render_failure(&err),
        }
    }

    async fn render_result(&self, issue: &Arc<Issue>) -> Rendered {
        match self.fixes.current(&issue.id).state {
            FixState::Applied => {
                let path = match self.engine.resolve(&issue.file) {
                    Ok(path) => path,
                    Err(err) => return render_failure(&err),
                };
                return match tokio::fs::read_to_string(&path).await {
                    Ok(content) => Rendered::stable(content),
                    Err(err) => render_failure(&FixError::io(&issue.file, err)),
                };
            }
            FixState::Reverted => return Rendered::stable(reverted_notice(issue)),
            FixState::Proposed | FixState::Previewed | FixState::Conflicted => {}
        }
        match self.engine.dry_run(issue).await {
            Ok(dry) => {
                let _ = self
                    .fixes
                    .update(&issue.id, |fix| Ok(fix.revalidated()));
                Rendered::stable(dry.new_content)
            }
            Err(err) => render_failure(&err),
        }
    }

    /// Drop every cached document of `file`.
    pub fn invalidate_file(&self, file: &Path) {
        let mut cache = self.cache();
        *cache.epochs.entry(file.to_path_buf()).or_insert(0) += 1;
        let before = cache.entries.len();
        cache.entries.retain(|_, doc| doc.file != file);
        let dropped = before - cache.entries.len();
        if dropped > 0 {
            tracing::debug!(file = %file.display(), dropped, "virtual documents invalidated");
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache().entries.len()
    }
}

fn reverted_notice(issue: &Issue) -> String {
    notice(
        &format!("Quickfix for {} was reverted", issue.id),
        "Re-run the analysis to get a fresh quickfix.",
    )
}

fn render_error(err: &FixError) -> String {
    notice("Quickfix unavailable", &err.user_message())
}

/// I/O failures may clear up on their own, so they are never cached.
fn render_failure(err: &FixError) -> Rendered {
    let content = render_error(err);
    match err {
        FixError::Io { .. } => Rendered::transient(content),
        _ => Rendered::stable(content),
    }
}
