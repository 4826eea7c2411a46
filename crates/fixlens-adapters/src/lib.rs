//! Runtime adapters for fixlens (git, ledger persistence, config, reports).

pub mod cache;
pub mod config;
pub mod git_ops;
pub mod report;
pub mod util;
