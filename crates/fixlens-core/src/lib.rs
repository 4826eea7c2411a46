//! Core domain model and contracts for fixlens.

pub mod error;
pub mod issue;
pub mod marker;
pub mod protocol;
pub mod quickfix;
pub mod text;
pub mod vdoc;

pub use error::FixError;
pub use protocol::*;
