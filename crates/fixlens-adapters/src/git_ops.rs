//! Git-backed checkpoints for quickfix revert.
//!
//! A checkpoint stores the file's current working-tree bytes as a blob in the
//! repository's object database and pins it under
//! `refs/fixlens/checkpoints/<token>` so it survives `git gc`. HEAD, the index
//! and every other file are left alone.

use crate::util::write_atomic;
use anyhow::{Context, Result};
use fixlens_core::quickfix::CheckpointToken;
use fixlens_core::VersionControl;
use git2::{ObjectType, Repository};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const CHECKPOINT_REF_PREFIX: &str = "refs/fixlens/checkpoints/";

fn open_repo_discover(repo_path: &Path) -> Result<Repository> {
    Repository::discover(repo_path).with_context(|| {
        format!(
            "Failed to open repository from path '{}'",
            repo_path.display()
        )
    })
}

fn checkpoint_ref_name(token: &CheckpointToken) -> Result<String> {
    // Tokens are uuids we minted; anything else never reaches git.
    Uuid::parse_str(token.as_str())
        .map_err(|_| anyhow::anyhow!("Malformed checkpoint token '{}'", token))?;
    Ok(format!("{}{}", CHECKPOINT_REF_PREFIX, token))
}

/// Version control through the git repository enclosing a workspace.
#[derive(Debug, Clone)]
pub struct GitVersionControl {
    repo_root: PathBuf,
}

impl GitVersionControl {
    /// Find the repository enclosing `workspace`, or `None` when there is none.
    pub fn discover(workspace: &Path) -> Option<Self> {
        let repo = Repository::discover(workspace).ok()?;
        let repo_root = repo.workdir()?.to_path_buf();
        Some(Self { repo_root })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn open(&self) -> Result<Repository> {
        open_repo_discover(&self.repo_root)
    }

    fn find_checkpoint_blob<'r>(
        repo: &'r Repository,
        token: &CheckpointToken,
    ) -> Result<git2::Blob<'r>> {
        let name = checkpoint_ref_name(token)?;
        let reference = repo
            .find_reference(&name)
            .with_context(|| format!("Checkpoint {} not found", token))?;
        let oid = reference
            .target()
            .ok_or_else(|| anyhow::anyhow!("Checkpoint {} is not a direct reference", token))?;
        repo.find_blob(oid)
            .with_context(|| format!("Checkpoint {} does not point at a blob", token))
    }
}

impl VersionControl for GitVersionControl {
    fn checkpoint(&self, file: &Path) -> Result<CheckpointToken> {
        let repo = self.open()?;
        let content = std::fs::read(file)
            .with_context(|| format!("Failed to read {} for checkpoint", file.display()))?;
        let oid = repo
            .blob(&content)
            .context("Failed to write checkpoint blob")?;

        let token = CheckpointToken::new(Uuid::new_v4().to_string());
        let name = checkpoint_ref_name(&token)?;
        repo.reference(&name, oid, false, "fixlens: checkpoint before quickfix")
            .with_context(|| format!("Failed to create checkpoint ref {}", name))?;

        debug_assert_eq!(
            repo.find_object(oid, None).ok().and_then(|o| o.kind()),
            Some(ObjectType::Blob)
        );
        tracing::debug!(file = %file.display(), %token, %oid, "checkpoint recorded");
        Ok(token)
    }

    fn checkpoint_content(&self, token: &CheckpointToken) -> Result<Vec<u8>> {
        let repo = self.open()?;
        let blob = Self::find_checkpoint_blob(&repo, token)?;
        Ok(blob.content().to_vec())
    }

    fn restore(&self, file: &Path, token: &CheckpointToken) -> Result<()> {
        let repo = self.open()?;
        let content = Self::find_checkpoint_blob(&repo, token)?.content().to_vec();
        write_atomic(file, &content)
            .with_context(|| format!("Failed to restore {}", file.display()))?;
        drop(repo);
        self.release(token)
    }

    fn release(&self, token: &CheckpointToken) -> Result<()> {
        let repo = self.open()?;
        let name = checkpoint_ref_name(token)?;
        let released = match repo.find_reference(&name) {
            Ok(mut reference) => reference
                .delete()
                .with_context(|| format!("Failed to delete checkpoint ref {}", name)),
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        };
        released
    }
}

/// Names of the checkpoints still pinned in the repository.
pub fn list_checkpoints(repo_path: &Path) -> Result<Vec<CheckpointToken>> {
    let repo = open_repo_discover(repo_path)?;
    let mut tokens = Vec::new();
    for reference in repo.references_glob(&format!("{}*", CHECKPOINT_REF_PREFIX))? {
        let reference = reference?;
        if let Some(name) = reference.name() {
            if let Some(token) = name.strip_prefix(CHECKPOINT_REF_PREFIX) {
                tokens.push(CheckpointToken::new(token));
            }
        }
    }
    tokens.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    Ok(tokens)
}
