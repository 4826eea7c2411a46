//! Workspace configuration for fixlens
//!
//! Read from `fixlens.toml` at the workspace root. Every field has a default,
//! so a missing file and an empty file behave the same.

use crate::cache::DEFAULT_STATE_DIR;
use fixlens_core::issue::Severity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const CONFIG_FILE: &str = "fixlens.toml";
const NO_VCS_ENV: &str = "FIXLENS_NO_VCS";
const MAX_PER_FILE_CEILING: usize = 10_000;
const MAX_CONTEXT_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionControlMode {
    /// Checkpoint through git when the workspace is inside a repository
    #[default]
    Auto,
    /// Never checkpoint; reverts use range restoration only
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Issues below this severity produce no markers
    pub min_severity: Severity,
    pub max_per_file: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Information,
            max_per_file: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub context_lines: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { context_lines: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version_control: VersionControlMode,
    /// Workspace-relative directory for the ledger and lock file
    pub state_dir: PathBuf,
    pub diagnostics: DiagnosticsConfig,
    pub preview: PreviewConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version_control: VersionControlMode::Auto,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            diagnostics: DiagnosticsConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        let escapes = self.state_dir.as_os_str().is_empty()
            || self.state_dir.is_absolute()
            || self
                .state_dir
                .components()
                .any(|c| matches!(c, Component::ParentDir));
        if escapes {
            tracing::warn!(
                state_dir = %self.state_dir.display(),
                "state_dir must stay inside the workspace; using the default"
            );
            self.state_dir = PathBuf::from(DEFAULT_STATE_DIR);
        }
        if self.diagnostics.max_per_file == 0 {
            self.diagnostics.max_per_file = DiagnosticsConfig::default().max_per_file;
        }
        self.diagnostics.max_per_file = self.diagnostics.max_per_file.min(MAX_PER_FILE_CEILING);
        self.preview.context_lines = self.preview.context_lines.min(MAX_CONTEXT_LINES);
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(NO_VCS_ENV) {
            if env_flag_set(&value) {
                self.version_control = VersionControlMode::Off;
            }
        }
    }

    pub fn config_path(workspace: &Path) -> PathBuf {
        workspace.join(CONFIG_FILE)
    }

    /// Load config for a workspace, or return defaults
    pub fn load(workspace: &Path) -> Self {
        let mut config = Self::load_file(&Self::config_path(workspace));
        config.apply_env();
        config
    }

    fn load_file(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    pub fn uses_version_control(&self) -> bool {
        self.version_control == VersionControlMode::Auto
    }
}

fn env_flag_set(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
