//! Healing PR creation and body rendering.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::Result;
use crate::forge_api::{ForgeApi, PrInfo};
use crate::heal::session::{FixStatus, HealSession};
use crate::util::short_sha;

pub struct PrCreator {
    api: Arc<dyn ForgeApi>,
    owner: String,
    repo: String,
}

impl PrCreator {
    pub fn new(api: Arc<dyn ForgeApi>, owner: &str, repo: &str) -> Self {
        Self {
            api,
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Open the healing PR from the AI branch into the default branch.
    pub async fn create(&self, session: &HealSession) -> Result<PrInfo> {
        let title = format!("[AI-AGENT] Automated fixes for {}", session.repo_name);
        self.api
            .create_pr(
                &self.owner,
                &self.repo,
                &session.ai_branch,
                &session.default_branch,
                &title,
                &render_body(session),
            )
            .await
    }

    /// Re-render the body from current session state.
    pub async fn update_body(&self, number: u64, session: &HealSession) -> Result<()> {
        self.api
            .update_pr(&self.owner, &self.repo, number, &render_body(session))
            .await
    }
}

fn status_chip(status: FixStatus) -> &'static str {
    match status {
        FixStatus::Applied => "✅ applied",
        FixStatus::Unfixable => "🚫 unfixable",
        FixStatus::Skipped => "⏭️ skipped",
        FixStatus::Error => "❌ error",
        FixStatus::CommitFailed => "⚠️ commit failed",
    }
}

/// Markdown body reflecting current issues, fixes, retries, and the CI
/// timeline.
pub fn render_body(session: &HealSession) -> String {
    let mut body = String::new();
    body.push_str("## 🤖 Automated Healing Report\n\n");
    body.push_str(&format!(
        "| Issues found | Fixes applied | Retries | CI |\n|---|---|---|---|\n| {} | {} | {} | {} |\n\n",
        session.issues.len(),
        session.applied_fix_count(),
        session.retry_count,
        session.ci_status.as_str(),
    ));

    if !session.fixes.is_empty() {
        body.push_str("### Fixes\n\n");
        let mut by_file: BTreeMap<&str, Vec<_>> = BTreeMap::new();
        for fix in &session.fixes {
            by_file.entry(fix.file.as_str()).or_default().push(fix);
        }
        for (file, fixes) in by_file {
            body.push_str(&format!("**`{}`**\n", file));
            for fix in fixes {
                body.push_str(&format!(
                    "- line {} — {} — {}\n",
                    fix.line,
                    fix.commit_message,
                    status_chip(fix.status)
                ));
            }
            body.push('\n');
        }
    }

    if !session.ci_timeline.is_empty() {
        body.push_str("### CI Timeline\n\n| # | Commit | Status | Checks | When |\n|---|---|---|---|---|\n");
        for entry in &session.ci_timeline {
            body.push_str(&format!(
                "| {} | `{}` | {} | {} | {} |\n",
                entry.iteration,
                short_sha(&entry.commit_sha),
                entry.status.as_str(),
                entry.checks.len(),
                entry.timestamp.format("%H:%M:%S"),
            ));
        }
        body.push('\n');
    }

    body.push_str("---\n*Opened automatically; commits carry the `[AI-AGENT]` marker.*\n");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heal::session::{CheckSummary, CiStatus, Fix, TimelineEntry};
    use crate::model::BugKind;
    use chrono::Utc;

    fn session_with_state() -> HealSession {
        let mut session = HealSession::new("octo", "demo", "main", "T_L_AI_Fix", None);
        session.fixes.push(Fix {
            file: "src/app.js".into(),
            line: 3,
            bug_type: BugKind::Logic,
            status: FixStatus::Applied,
            commit_message: "[AI-AGENT] Replace eval".into(),
            explanation: "".into(),
            pending_commit: None,
        });
        session.fixes.push(Fix {
            file: "src/app.js".into(),
            line: 9,
            bug_type: BugKind::Linting,
            status: FixStatus::CommitFailed,
            commit_message: "[AI-AGENT] Remove debug output".into(),
            explanation: "".into(),
            pending_commit: None,
        });
        session.retry_count = 2;
        session.ci_status = CiStatus::Failed;
        session.ci_timeline.push(TimelineEntry {
            iteration: 1,
            timestamp: Utc::now(),
            status: CiStatus::Failed,
            checks: vec![CheckSummary {
                name: "build".into(),
                status: "failure".into(),
                url: None,
            }],
            commit_sha: "0123456789abcdef".into(),
        });
        session
    }

    #[test]
    fn body_groups_fixes_by_file() {
        let body = render_body(&session_with_state());
        assert!(body.contains("**`src/app.js`**"));
        assert!(body.contains("✅ applied"));
        assert!(body.contains("⚠️ commit failed"));
        assert!(body.contains("| 1 | `0123456` | FAILED | 1 |"));
    }

    #[test]
    fn body_summary_row_reflects_counts() {
        let body = render_body(&session_with_state());
        assert!(body.contains("| 0 | 1 | 2 | FAILED |"));
    }
}
