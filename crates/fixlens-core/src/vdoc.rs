//! Identifiers of the read-only quickfix documents.
//!
//! `quickfix://<issueId>/preview` and `quickfixed://<issueId>/result`.

use crate::error::FixError;
use crate::issue::IssueId;
use std::fmt;
use std::str::FromStr;

pub const PREVIEW_SCHEME: &str = "quickfix";
pub const RESULT_SCHEME: &str = "quickfixed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// The proposed fix against the analysed range
    Preview,
    /// The whole file after the fix
    Result,
}

impl Variant {
    pub fn scheme(self) -> &'static str {
        match self {
            Variant::Preview => PREVIEW_SCHEME,
            Variant::Result => RESULT_SCHEME,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Variant::Preview => "preview",
            Variant::Result => "result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualDocId {
    pub issue_id: IssueId,
    pub variant: Variant,
}

impl VirtualDocId {
    pub fn preview(issue_id: IssueId) -> Self {
        Self {
            issue_id,
            variant: Variant::Preview,
        }
    }

    pub fn result(issue_id: IssueId) -> Self {
        Self {
            issue_id,
            variant: Variant::Result,
        }
    }

    pub fn scheme(&self) -> &'static str {
        self.variant.scheme()
    }

    pub fn to_uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VirtualDocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}",
            self.scheme(),
            self.issue_id,
            self.variant.label()
        )
    }
}

impl FromStr for VirtualDocId {
    type Err = FixError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let not_found = || FixError::not_found("virtual document", uri);
        let (scheme, rest) = uri.split_once("://").ok_or_else(not_found)?;
        let (issue, variant) = rest.rsplit_once('/').ok_or_else(not_found)?;
        if issue.is_empty() {
            return Err(not_found());
        }
        let variant = match (scheme, variant) {
            (PREVIEW_SCHEME, "preview") => Variant::Preview,
            (RESULT_SCHEME, "result") => Variant::Result,
            _ => return Err(not_found()),
        };
        Ok(Self {
            issue_id: IssueId::new(issue),
            variant,
        })
    }
}
