//! In-memory state for one healing run.
//!
//! The session owns its issues, fixes, logs, and CI timeline; collaborators
//! read and append, only the orchestrator mutates status and the retry
//! counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BugKind, Issue};

pub const MAX_RETRIES: u32 = 5;
pub const COMMIT_MARKER: &str = "[AI-AGENT]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Applied,
    Unfixable,
    Skipped,
    Error,
    CommitFailed,
}

/// One proposed replacement of a file's content, tied to one issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    pub file: String,
    pub line: u32,
    pub bug_type: BugKind,
    pub status: FixStatus,
    pub commit_message: String,
    pub explanation: String,
    /// Full replacement text staged for the commit node. Set on the last
    /// applied fix per file; earlier fixes for the same file fold into it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_commit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CiStatus {
    Pending,
    Passed,
    Failed,
    NoCi,
    Skipped,
}

impl CiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::NoCi => "NO_CI",
            Self::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureLog {
    /// Which surface produced the log: a check name, `status`, or `timeout`.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    pub level: String,
}

/// Outcome of one CI monitoring attempt.
/// Invariant: `status == Passed` implies `failure_logs` is empty.
#[derive(Debug, Clone)]
pub struct CiResult {
    pub status: CiStatus,
    pub checks: Vec<CheckSummary>,
    pub failure_logs: Vec<FailureLog>,
}

/// Append-only record of CI monitoring attempts within one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub status: CiStatus,
    pub checks: Vec<CheckSummary>,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub message: String,
}

/// Progress event streamed to the caller. The terminal event carries either
/// `results` (stage `result`) or a message (stage `error`).
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<HealResult>,
}

impl ProgressEvent {
    pub fn stage(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            timestamp: Utc::now(),
            message: Some(message.into()),
            results: None,
        }
    }

    pub fn result(results: HealResult) -> Self {
        Self {
            stage: "result".to_string(),
            timestamp: Utc::now(),
            message: None,
            results: Some(results),
        }
    }

    pub fn error(message: impl Into<String>, results: Option<HealResult>) -> Self {
        Self {
            stage: "error".to_string(),
            timestamp: Utc::now(),
            message: Some(message.into()),
            results,
        }
    }
}

/// Final summary emitted over the stream and kept in the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealResult {
    pub repo: String,
    pub branch_created: bool,
    pub total_failures_detected: usize,
    pub total_fixes_applied: usize,
    pub final_ci_status: CiStatus,
    pub retry_count: u32,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    pub issues: Vec<Issue>,
    pub fixes: Vec<Fix>,
    pub ci_timeline: Vec<TimelineEntry>,
}

/// Mutable state for one in-flight heal.
#[derive(Debug, Clone)]
pub struct HealSession {
    pub repo_owner: String,
    pub repo_name: String,
    pub default_branch: String,
    pub ai_branch: String,
    pub installation_id: Option<u64>,
    pub branch_created: bool,
    pub issues: Vec<Issue>,
    pub fixes: Vec<Fix>,
    pub retry_count: u32,
    pub ci_status: CiStatus,
    pub ci_timeline: Vec<TimelineEntry>,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub logs: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
}

impl HealSession {
    pub fn new(
        repo_owner: &str,
        repo_name: &str,
        default_branch: &str,
        ai_branch: &str,
        installation_id: Option<u64>,
    ) -> Self {
        Self {
            repo_owner: repo_owner.to_string(),
            repo_name: repo_name.to_string(),
            default_branch: default_branch.to_string(),
            ai_branch: ai_branch.to_string(),
            installation_id,
            branch_created: false,
            issues: Vec::new(),
            fixes: Vec::new(),
            retry_count: 0,
            ci_status: CiStatus::Pending,
            ci_timeline: Vec::new(),
            pr_number: None,
            pr_url: None,
            logs: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }

    pub fn log(&mut self, stage: &str, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn applied_fix_count(&self) -> usize {
        self.fixes
            .iter()
            .filter(|f| f.status == FixStatus::Applied)
            .count()
    }

    pub fn into_result(self, total_failures: usize) -> HealResult {
        let execution_time_ms = (Utc::now() - self.started_at).num_milliseconds().max(0) as u64;
        HealResult {
            repo: self.repo_slug(),
            branch_created: self.branch_created,
            total_failures_detected: total_failures,
            total_fixes_applied: self.applied_fix_count(),
            final_ci_status: self.ci_status,
            retry_count: self.retry_count,
            execution_time_ms,
            pr_url: self.pr_url,
            issues: self.issues,
            fixes: self.fixes,
            ci_timeline: self.ci_timeline,
        }
    }
}

/// Every healing commit message starts with the marker; one is prepended
/// when missing.
pub fn ensure_commit_marker(message: &str) -> String {
    if message.trim_start().starts_with(COMMIT_MARKER) {
        message.to_string()
    } else {
        format!("{} {}", COMMIT_MARKER, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_prepended_only_when_missing() {
        assert_eq!(ensure_commit_marker("Fix bug"), "[AI-AGENT] Fix bug");
        assert_eq!(
            ensure_commit_marker("[AI-AGENT] Fix bug"),
            "[AI-AGENT] Fix bug"
        );
    }

    #[test]
    fn session_result_counts_applied_fixes() {
        let mut session = HealSession::new("octo", "demo", "main", "T_L_AI_Fix", None);
        session.fixes.push(Fix {
            file: "a.js".into(),
            line: 1,
            bug_type: BugKind::Logic,
            status: FixStatus::Applied,
            commit_message: "[AI-AGENT] fix".into(),
            explanation: "".into(),
            pending_commit: None,
        });
        session.fixes.push(Fix {
            file: "b.js".into(),
            line: 2,
            bug_type: BugKind::Logic,
            status: FixStatus::CommitFailed,
            commit_message: "[AI-AGENT] fix".into(),
            explanation: "".into(),
            pending_commit: None,
        });
        session.ci_status = CiStatus::NoCi;

        let result = session.into_result(2);
        assert_eq!(result.total_fixes_applied, 1);
        assert_eq!(result.total_failures_detected, 2);
        assert_eq!(result.final_ci_status, CiStatus::NoCi);
        assert_eq!(result.repo, "octo/demo");
    }

    #[test]
    fn ci_status_wire_strings() {
        assert_eq!(CiStatus::NoCi.as_str(), "NO_CI");
        assert_eq!(
            serde_json::to_string(&CiStatus::NoCi).unwrap(),
            "\"NO_CI\""
        );
    }

    #[test]
    fn logs_are_append_only_records() {
        let mut session = HealSession::new("o", "r", "main", "B", None);
        session.log("analyze", "starting");
        session.log("analyze", "done");
        assert_eq!(session.logs.len(), 2);
        assert!(session.logs[1].timestamp >= session.logs[0].timestamp);
    }
}
