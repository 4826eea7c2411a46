use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

pub struct RepoPath {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Resolve a workspace-relative path, refusing anything that could escape
/// the workspace (absolute paths, `..`, symlinks). The file itself need not
/// exist yet.
pub fn resolve_repo_path_allow_new(repo_root: &Path, candidate: &Path) -> Result<RepoPath, String> {
    if candidate.as_os_str().is_empty() {
        return Err("Path is empty".to_string());
    }
    if candidate.is_absolute() {
        return Err(format!(
            "Absolute paths are not allowed: {}",
            candidate.display()
        ));
    }
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(format!(
            "Parent traversal is not allowed: {}",
            candidate.display()
        ));
    }

    let root = repo_root
        .canonicalize()
        .map_err(|e| format!("Failed to resolve workspace root: {}", e))?;
    let joined = root.join(candidate);
    let parent = joined
        .parent()
        .ok_or_else(|| format!("Invalid path: {}", candidate.display()))?;
    let parent_canon = canonicalize_existing_parent(parent)?;

    if !parent_canon.starts_with(&root) {
        return Err(format!("Path escapes workspace: {}", candidate.display()));
    }

    let mut check_path = joined.clone();
    while check_path.starts_with(&root) && check_path != root {
        if let Ok(metadata) = fs::symlink_metadata(&check_path) {
            if metadata.file_type().is_symlink() {
                return Err(format!("Path contains symlink: {}", check_path.display()));
            }
        }
        if !check_path.pop() {
            break;
        }
    }

    let relative = joined
        .strip_prefix(&root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| candidate.to_path_buf());

    Ok(RepoPath {
        absolute: joined,
        relative,
    })
}

fn canonicalize_existing_parent(path: &Path) -> Result<PathBuf, String> {
    let mut current = path.to_path_buf();
    while !current.exists() {
        if !current.pop() {
            return Err("Path has no existing parent".to_string());
        }
    }
    current
        .canonicalize()
        .map_err(|e| format!("Failed to resolve path {}: {}", current.display(), e))
}

/// Express `path` relative to `root` when it lives under it.
pub fn workspace_relative(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        if let Ok(stripped) = path.strip_prefix(root) {
            return stripped.to_path_buf();
        }
        if let Ok(canon_root) = root.canonicalize() {
            if let Ok(stripped) = path.strip_prefix(&canon_root) {
                return stripped.to_path_buf();
            }
        }
    }
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Replace `path` with `content` via a sibling temp file and a rename.
///
/// Existing permissions are carried over to the new file. On failure the
/// original file is left as it was.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".fixlens-tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let permissions = fs::metadata(path).ok().map(|m| m.permissions());
    if let Err(err) = fs::write(&tmp_path, content) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Some(permissions) = permissions {
        let _ = fs::set_permissions(&tmp_path, permissions);
    }

    #[cfg(windows)]
    {
        if path.exists() {
            if let Err(err) = fs::remove_file(path) {
                let _ = fs::remove_file(&tmp_path);
                return Err(err);
            }
        }
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
