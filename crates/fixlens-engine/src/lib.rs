//! Quickfix engine for fixlens: issue store, open documents, markers,
//! virtual preview documents and the apply/revert pipeline.

pub mod diff;
pub mod documents;
pub mod fix_engine;
pub mod fixes;
pub mod issue_store;
pub mod markers;
pub mod revision_guard;
pub mod session;
pub mod vdocs;

pub use session::{Session, SessionOptions};
