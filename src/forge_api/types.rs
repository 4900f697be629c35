//! Domain-facing types for the forge REST surface. Wire-format structs live
//! next to the client; these are what the rest of the crate consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct RepoInfo {
    pub id: u64,
    pub default_branch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrFile {
    pub filename: String,
    /// `added`, `modified`, `removed`, `renamed`.
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub content: Vec<u8>,
    pub sha: String,
}

impl FileContent {
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub tree_sha: String,
}

/// One entry for a tree-create call. Mode is the git filemode string.
#[derive(Debug, Clone, Serialize)]
pub struct TreeEntryInput {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub sha: String,
}

impl TreeEntryInput {
    pub fn blob(path: String, sha: String) -> Self {
        Self {
            path,
            mode: "100644",
            entry_type: "blob",
            sha,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

/// State for a commit status POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    /// `queued`, `in_progress`, `completed`.
    pub status: String,
    /// `success`, `failure`, `neutral`, `cancelled`, `timed_out`,
    /// `action_required`; absent until completed.
    pub conclusion: Option<String>,
    pub html_url: Option<String>,
    pub output_summary: Option<String>,
}

impl CheckRun {
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "queued" | "in_progress")
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.conclusion.as_deref(),
            Some("failure") | Some("timed_out") | Some("cancelled") | Some("action_required")
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusContext {
    pub context: String,
    /// `pending`, `success`, `failure`, `error`.
    pub state: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStatus {
    pub state: String,
    pub statuses: Vec<StatusContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckAnnotation {
    pub path: String,
    pub start_line: u32,
    pub message: String,
    pub annotation_level: String,
}
