//! The healing state machine.
//!
//! analyze → generate_fixes → apply_commit → open_pr → monitor_ci, with
//! monitor_ci the single conditional node: it either ends the run or loops
//! back to generate_fixes while the retry budget lasts. Every node emits at
//! least one progress event and appends to the session log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::detect::classify::classify_failure_message;
use crate::errors::GuardError;
use crate::forge_api::ForgeApi;
use crate::heal::branch::BranchManager;
use crate::heal::ci::CiAgent;
use crate::heal::fix_agent::FixAgent;
use crate::heal::pr::PrCreator;
use crate::heal::session::{
    CiStatus, Fix, FixStatus, HealResult, HealSession, MAX_RETRIES, ProgressEvent, TimelineEntry,
};
use crate::model::{Issue, IssueSource, Severity};

const RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Analyze,
    GenerateFixes,
    ApplyCommit,
    OpenPr,
    MonitorCi,
    UpdatePrAndEnd,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::GenerateFixes => "generate_fixes",
            Self::ApplyCommit => "apply_commit",
            Self::OpenPr => "open_pr",
            Self::MonitorCi => "monitor_ci",
            Self::UpdatePrAndEnd => "update_pr",
        }
    }
}

pub struct Orchestrator {
    branch: BranchManager,
    ci: CiAgent,
    pr: PrCreator,
    fix_agent: Arc<dyn FixAgent>,
    session: HealSession,
    events: mpsc::Sender<ProgressEvent>,
    ci_wait_timeout: Duration,
    retry_pause: Duration,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn ForgeApi>,
        fix_agent: Arc<dyn FixAgent>,
        session: HealSession,
        events: mpsc::Sender<ProgressEvent>,
        ci_wait_timeout: Duration,
    ) -> Self {
        let owner = session.repo_owner.clone();
        let repo = session.repo_name.clone();
        Self {
            branch: BranchManager::new(Arc::clone(&api), &owner, &repo),
            ci: CiAgent::new(Arc::clone(&api), &owner, &repo),
            pr: PrCreator::new(api, &owner, &repo),
            fix_agent,
            session,
            events,
            ci_wait_timeout,
            retry_pause: RETRY_PAUSE,
        }
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Drive the FSM to completion over the precomputed issue set and
    /// return the final summary.
    pub async fn run(mut self, issues: Vec<Issue>) -> HealResult {
        let total_failures = issues.len();
        self.session.issues = issues;

        if let Err(e) = self.drive().await {
            warn!(error = %e, "healing run aborted");
            self.session.ci_status = CiStatus::Failed;
            self.session.log("error", e.to_string());
        }

        self.session.into_result(total_failures)
    }

    async fn drive(&mut self) -> crate::errors::Result<()> {
        let mut stage = Stage::Analyze;
        loop {
            let next = match stage {
                Stage::Analyze => self.analyze().await?,
                Stage::GenerateFixes => self.generate_fixes().await?,
                Stage::ApplyCommit => self.apply_commit().await?,
                Stage::OpenPr => self.open_pr().await?,
                Stage::MonitorCi => self.monitor_ci().await?,
                Stage::UpdatePrAndEnd => {
                    self.update_pr_and_end().await?;
                    return Ok(());
                }
            };
            stage = next;
        }
    }

    /// Emit a progress event and mirror it into the session log. A closed
    /// receiver means the caller went away: the run is cancelled at this
    /// suspension point.
    async fn emit(&mut self, stage: &str, message: impl Into<String>) -> crate::errors::Result<()> {
        let message = message.into();
        self.session.log(stage, message.clone());
        self.events
            .send(ProgressEvent::stage(stage, message))
            .await
            .map_err(|_| GuardError::Upstream("progress stream closed, cancelling run".into()))
    }

    async fn analyze(&mut self) -> crate::errors::Result<Stage> {
        let count = self.session.issues.len();
        self.emit(Stage::Analyze.name(), format!("{} issue(s) to address", count))
            .await?;
        if count == 0 {
            self.session.ci_status = CiStatus::Passed;
            return Ok(Stage::UpdatePrAndEnd);
        }
        Ok(Stage::GenerateFixes)
    }

    /// Group the working issue set by file and fold fixes into an evolving
    /// buffer per file; the final buffer is staged on the last applied fix.
    /// On retries only CI-sourced issues are considered.
    async fn generate_fixes(&mut self) -> crate::errors::Result<Stage> {
        let retrying = self.session.retry_count > 0;
        let issues: Vec<Issue> = self
            .session
            .issues
            .iter()
            .filter(|i| !retrying || i.source == IssueSource::Ci)
            .cloned()
            .collect();
        self.emit(
            Stage::GenerateFixes.name(),
            format!("generating fixes for {} issue(s)", issues.len()),
        )
        .await?;

        let mut by_file: BTreeMap<String, Vec<Issue>> = BTreeMap::new();
        for issue in issues {
            by_file.entry(issue.file.clone()).or_default().push(issue);
        }

        for (file, file_issues) in by_file {
            let content = match self
                .branch
                .file_content(&file, &self.session.ai_branch)
                .await
            {
                Ok(content) => content.as_text(),
                Err(GuardError::NotFound(_)) => {
                    warn!(file, "file not found on branch, skipping its fixes");
                    for issue in &file_issues {
                        self.session.fixes.push(Fix {
                            file: file.clone(),
                            line: issue.line,
                            bug_type: issue.bug_type,
                            status: FixStatus::Skipped,
                            commit_message: String::new(),
                            explanation: "file not found on branch".into(),
                            pending_commit: None,
                        });
                    }
                    continue;
                }
                Err(e) => {
                    warn!(file, error = %e, "failed to fetch file content");
                    for issue in &file_issues {
                        self.session.fixes.push(Fix {
                            file: file.clone(),
                            line: issue.line,
                            bug_type: issue.bug_type,
                            status: FixStatus::Error,
                            commit_message: String::new(),
                            explanation: e.to_string(),
                            pending_commit: None,
                        });
                    }
                    continue;
                }
            };

            let mut buffer = content;
            let mut last_applied: Option<usize> = None;
            for issue in &file_issues {
                match self.fix_agent.generate_fix(issue, &buffer).await {
                    Ok(proposal) => {
                        buffer = proposal.fixed_code;
                        self.session.fixes.push(Fix {
                            file: file.clone(),
                            line: issue.line,
                            bug_type: issue.bug_type,
                            status: FixStatus::Applied,
                            commit_message: proposal.commit_message,
                            explanation: proposal.explanation,
                            pending_commit: None,
                        });
                        last_applied = Some(self.session.fixes.len() - 1);
                    }
                    Err(GuardError::Validation(reason)) => {
                        self.session.fixes.push(Fix {
                            file: file.clone(),
                            line: issue.line,
                            bug_type: issue.bug_type,
                            status: FixStatus::Unfixable,
                            commit_message: String::new(),
                            explanation: reason,
                            pending_commit: None,
                        });
                    }
                    Err(e) => {
                        self.session.fixes.push(Fix {
                            file: file.clone(),
                            line: issue.line,
                            bug_type: issue.bug_type,
                            status: FixStatus::Error,
                            commit_message: String::new(),
                            explanation: e.to_string(),
                            pending_commit: None,
                        });
                    }
                }
            }

            if let Some(index) = last_applied {
                self.session.fixes[index].pending_commit = Some(buffer);
            }
        }

        Ok(Stage::ApplyCommit)
    }

    async fn apply_commit(&mut self) -> crate::errors::Result<Stage> {
        let pending: Vec<usize> = self
            .session
            .fixes
            .iter()
            .enumerate()
            .filter(|(_, f)| f.pending_commit.is_some())
            .map(|(i, _)| i)
            .collect();
        self.emit(
            Stage::ApplyCommit.name(),
            format!("committing {} file(s)", pending.len()),
        )
        .await?;

        for index in pending {
            let (file, message, content) = {
                let fix = &self.session.fixes[index];
                (
                    fix.file.clone(),
                    fix.commit_message.clone(),
                    fix.pending_commit.clone().unwrap_or_default(),
                )
            };
            match self
                .branch
                .commit_file(&self.session.ai_branch, &file, content.as_bytes(), &message)
                .await
            {
                Ok(sha) => {
                    info!(file, sha = %sha, "fix committed");
                    self.session.fixes[index].pending_commit = None;
                    self.session.log(Stage::ApplyCommit.name(), format!("committed {}", file));
                }
                Err(e) => {
                    warn!(file, error = %e, "commit failed");
                    self.session
                        .log(Stage::ApplyCommit.name(), format!("commit failed for {}: {}", file, e));
                    for fix in self
                        .session
                        .fixes
                        .iter_mut()
                        .filter(|f| f.file == file && f.status == FixStatus::Applied)
                    {
                        fix.status = FixStatus::CommitFailed;
                        fix.pending_commit = None;
                    }
                }
            }
        }

        Ok(Stage::OpenPr)
    }

    async fn open_pr(&mut self) -> crate::errors::Result<Stage> {
        if self.session.applied_fix_count() == 0 {
            self.emit(Stage::OpenPr.name(), "no fixes applied, skipping PR").await?;
            self.session.ci_status = CiStatus::Skipped;
            return Ok(Stage::UpdatePrAndEnd);
        }

        if self.session.pr_number.is_none() {
            match self.pr.create(&self.session).await {
                Ok(pr) => {
                    self.session.pr_number = Some(pr.number);
                    self.session.pr_url = Some(pr.url.clone());
                    self.emit(Stage::OpenPr.name(), format!("opened PR #{}", pr.number))
                        .await?;
                }
                Err(e) => {
                    warn!(error = %e, "PR creation failed, continuing to CI monitoring");
                    self.emit(Stage::OpenPr.name(), format!("PR creation failed: {}", e))
                        .await?;
                }
            }
        } else {
            self.emit(Stage::OpenPr.name(), "PR already open").await?;
        }

        Ok(Stage::MonitorCi)
    }

    /// The only conditional node. Each visit is one monitoring attempt and
    /// bumps the retry counter; FAILED results replace the working issue
    /// set with CI-derived issues when any carry a file.
    async fn monitor_ci(&mut self) -> crate::errors::Result<Stage> {
        self.session.retry_count += 1;

        let has_ci = match self.ci.has_ci_configured(&self.session.ai_branch).await {
            Ok(has_ci) => has_ci,
            Err(e) => {
                warn!(error = %e, "could not probe CI configuration, treating as none");
                false
            }
        };

        if !has_ci {
            self.emit(Stage::MonitorCi.name(), "no CI configured").await?;
            self.session.ci_status = CiStatus::NoCi;
            let sha = self
                .branch
                .latest_commit_sha(&self.session.ai_branch)
                .await
                .unwrap_or_default();
            self.session.ci_timeline.push(TimelineEntry {
                iteration: self.session.retry_count,
                timestamp: Utc::now(),
                status: CiStatus::NoCi,
                checks: Vec::new(),
                commit_sha: sha,
            });
            return Ok(Stage::UpdatePrAndEnd);
        }

        let sha = self.branch.latest_commit_sha(&self.session.ai_branch).await?;
        self.emit(
            Stage::MonitorCi.name(),
            format!(
                "waiting on CI for {} (attempt {}/{})",
                crate::util::short_sha(&sha),
                self.session.retry_count,
                MAX_RETRIES
            ),
        )
        .await?;

        let result = self.ci.wait_for_checks(&sha, self.ci_wait_timeout).await;
        self.session.ci_status = result.status;
        self.session.ci_timeline.push(TimelineEntry {
            iteration: self.session.retry_count,
            timestamp: Utc::now(),
            status: result.status,
            checks: result.checks.clone(),
            commit_sha: sha,
        });

        if result.status != CiStatus::Failed {
            return Ok(Stage::UpdatePrAndEnd);
        }

        let ci_issues: Vec<Issue> = result
            .failure_logs
            .iter()
            .filter_map(|log| {
                log.file.as_ref().map(|file| Issue {
                    file: file.clone(),
                    line: log.line.unwrap_or(0),
                    bug_type: classify_failure_message(&log.message),
                    description: log.message.clone(),
                    code_snippet: String::new(),
                    severity: Severity::Critical,
                    source: IssueSource::Ci,
                })
            })
            .collect();
        if ci_issues.is_empty() {
            // No file-attributed logs: fall back to the prior working set.
            self.session
                .log(Stage::MonitorCi.name(), "CI failed without file attribution");
        } else {
            self.session.issues = ci_issues;
        }

        if self.session.retry_count < MAX_RETRIES {
            self.emit(
                Stage::MonitorCi.name(),
                format!("CI failed, retrying ({}/{})", self.session.retry_count, MAX_RETRIES),
            )
            .await?;
            tokio::time::sleep(self.retry_pause).await;
            Ok(Stage::GenerateFixes)
        } else {
            self.emit(Stage::MonitorCi.name(), "retry budget exhausted").await?;
            Ok(Stage::UpdatePrAndEnd)
        }
    }

    async fn update_pr_and_end(&mut self) -> crate::errors::Result<()> {
        if let Some(number) = self.session.pr_number {
            if let Err(e) = self.pr.update_body(number, &self.session).await {
                warn!(error = %e, "final PR body update failed");
            }
        }
        self.emit(
            "complete",
            format!("healing finished: {}", self.session.ci_status.as_str()),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge_api::types::*;
    use crate::heal::fix_agent::RuleBasedFixAgent;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory forge for FSM tests: refs, per-branch files, PRs, and a
    /// configurable check-run response.
    #[derive(Default)]
    struct MockForge {
        refs: Mutex<HashMap<String, String>>,
        files: Mutex<HashMap<(String, String), String>>,
        commits: Mutex<Vec<(String, String)>>,
        prs: Mutex<Vec<String>>,
        pr_bodies: Mutex<Vec<String>>,
        checks: Mutex<Vec<CheckRun>>,
        annotations: Mutex<Vec<CheckAnnotation>>,
    }

    impl MockForge {
        fn with_branch_file(branch: &str, path: &str, content: &str) -> Self {
            let forge = Self::default();
            forge
                .refs
                .lock()
                .unwrap()
                .insert(format!("heads/{}", branch), "basesha0000000".into());
            forge
                .files
                .lock()
                .unwrap()
                .insert((branch.to_string(), path.to_string()), content.to_string());
            forge
        }

        fn set_failing_check(&self, file: &str, line: u32, message: &str) {
            *self.checks.lock().unwrap() = vec![CheckRun {
                id: 7,
                name: "build".into(),
                status: "completed".into(),
                conclusion: Some("failure".into()),
                html_url: None,
                output_summary: Some("build failed".into()),
            }];
            *self.annotations.lock().unwrap() = vec![CheckAnnotation {
                path: file.into(),
                start_line: line,
                message: message.into(),
                annotation_level: "failure".into(),
            }];
        }
    }

    #[async_trait]
    impl ForgeApi for MockForge {
        async fn list_installation(&self, _: &str, _: &str) -> crate::errors::Result<u64> {
            Ok(1)
        }
        async fn get_repo(&self, _: &str, _: &str) -> crate::errors::Result<RepoInfo> {
            Ok(RepoInfo {
                id: 1,
                default_branch: "main".into(),
            })
        }
        async fn list_pr_files(&self, _: &str, _: &str, _: u64) -> crate::errors::Result<Vec<PrFile>> {
            Ok(Vec::new())
        }
        async fn get_file_content(
            &self,
            _: &str,
            _: &str,
            path: &str,
            git_ref: &str,
        ) -> crate::errors::Result<FileContent> {
            self.files
                .lock()
                .unwrap()
                .get(&(git_ref.to_string(), path.to_string()))
                .map(|c| FileContent {
                    content: c.clone().into_bytes(),
                    sha: "filesha".into(),
                })
                .ok_or_else(|| GuardError::NotFound(path.to_string()))
        }
        async fn get_ref(&self, _: &str, _: &str, git_ref: &str) -> crate::errors::Result<String> {
            self.refs
                .lock()
                .unwrap()
                .get(git_ref)
                .cloned()
                .ok_or_else(|| GuardError::NotFound(git_ref.to_string()))
        }
        async fn create_ref(&self, _: &str, _: &str, git_ref: &str, sha: &str) -> crate::errors::Result<()> {
            self.refs
                .lock()
                .unwrap()
                .insert(git_ref.to_string(), sha.to_string());
            Ok(())
        }
        async fn delete_ref(&self, _: &str, _: &str, git_ref: &str) -> crate::errors::Result<()> {
            self.refs.lock().unwrap().remove(git_ref);
            Ok(())
        }
        async fn update_ref(
            &self,
            _: &str,
            _: &str,
            git_ref: &str,
            sha: &str,
            _: bool,
        ) -> crate::errors::Result<()> {
            self.refs
                .lock()
                .unwrap()
                .insert(git_ref.to_string(), sha.to_string());
            Ok(())
        }
        async fn get_commit(&self, _: &str, _: &str, sha: &str) -> crate::errors::Result<CommitInfo> {
            Ok(CommitInfo {
                sha: sha.into(),
                tree_sha: "tree".into(),
            })
        }
        async fn create_commit(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &[String],
        ) -> crate::errors::Result<String> {
            Ok("newcommit".into())
        }
        async fn create_blob(&self, _: &str, _: &str, _: &[u8]) -> crate::errors::Result<String> {
            Ok("blob".into())
        }
        async fn create_tree(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[TreeEntryInput],
        ) -> crate::errors::Result<String> {
            Ok("tree".into())
        }
        async fn create_or_update_file(
            &self,
            _: &str,
            _: &str,
            path: &str,
            content: &[u8],
            branch: &str,
            message: &str,
            _: Option<&str>,
        ) -> crate::errors::Result<String> {
            self.files.lock().unwrap().insert(
                (branch.to_string(), path.to_string()),
                String::from_utf8_lossy(content).into_owned(),
            );
            self.commits
                .lock()
                .unwrap()
                .push((path.to_string(), message.to_string()));
            let sha = format!("commit{}", self.commits.lock().unwrap().len());
            self.refs
                .lock()
                .unwrap()
                .insert(format!("heads/{}", branch), sha.clone());
            Ok(sha)
        }
        async fn create_commit_status(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: CommitState,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> crate::errors::Result<()> {
            Ok(())
        }
        async fn create_pr(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            title: &str,
            _: &str,
        ) -> crate::errors::Result<PrInfo> {
            self.prs.lock().unwrap().push(title.to_string());
            Ok(PrInfo {
                number: 42,
                url: "https://github.com/octo/demo/pull/42".into(),
            })
        }
        async fn update_pr(&self, _: &str, _: &str, _: u64, body: &str) -> crate::errors::Result<()> {
            self.pr_bodies.lock().unwrap().push(body.to_string());
            Ok(())
        }
        async fn create_review(
            &self,
            _: &str,
            _: &str,
            _: u64,
            _: &str,
            _: &[ReviewComment],
        ) -> crate::errors::Result<()> {
            Ok(())
        }
        async fn create_issue_comment(&self, _: &str, _: &str, _: u64, _: &str) -> crate::errors::Result<()> {
            Ok(())
        }
        async fn list_checks_for_ref(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> crate::errors::Result<Vec<CheckRun>> {
            Ok(self.checks.lock().unwrap().clone())
        }
        async fn list_annotations(
            &self,
            _: &str,
            _: &str,
            _: u64,
        ) -> crate::errors::Result<Vec<CheckAnnotation>> {
            Ok(self.annotations.lock().unwrap().clone())
        }
        async fn get_combined_status(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> crate::errors::Result<CombinedStatus> {
            Ok(CombinedStatus {
                state: "success".into(),
                statuses: Vec::new(),
            })
        }
    }

    fn issue(file: &str, line: u32) -> Issue {
        Issue {
            file: file.into(),
            line,
            bug_type: crate::model::BugKind::Logic,
            description: "eval usage".into(),
            code_snippet: "eval(x)".into(),
            severity: Severity::Critical,
            source: IssueSource::Ast,
        }
    }

    fn orchestrator(
        forge: Arc<MockForge>,
    ) -> (Orchestrator, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let session = HealSession::new("octo", "demo", "main", "T_L_AI_Fix", None);
        let orchestrator = Orchestrator::new(
            forge,
            Arc::new(RuleBasedFixAgent),
            session,
            tx,
            Duration::from_millis(50),
        )
        .with_retry_pause(Duration::ZERO);
        (orchestrator, rx)
    }

    #[tokio::test]
    async fn clean_run_short_circuits_to_passed() {
        let forge = Arc::new(MockForge::default());
        let (orchestrator, _rx) = orchestrator(Arc::clone(&forge));
        let result = orchestrator.run(Vec::new()).await;

        assert_eq!(result.final_ci_status, CiStatus::Passed);
        assert_eq!(result.total_failures_detected, 0);
        assert_eq!(result.total_fixes_applied, 0);
        assert!(result.pr_url.is_none());
        assert!(forge.prs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fixes_commit_and_open_pr_then_no_ci() {
        let forge = Arc::new(MockForge::with_branch_file(
            "T_L_AI_Fix",
            "app.js",
            "const out = eval(input);\n",
        ));
        let (orchestrator, _rx) = orchestrator(Arc::clone(&forge));
        let result = orchestrator.run(vec![issue("app.js", 1)]).await;

        assert_eq!(result.final_ci_status, CiStatus::NoCi);
        assert_eq!(result.retry_count, 1);
        assert_eq!(result.total_fixes_applied, 1);
        assert_eq!(result.pr_url.as_deref(), Some("https://github.com/octo/demo/pull/42"));
        assert_eq!(result.ci_timeline.len(), 1);
        assert_eq!(result.ci_timeline[0].iteration, 1);

        let commits = forge.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].1.starts_with("[AI-AGENT]"));

        // Final body update landed.
        assert_eq!(forge.pr_bodies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persistent_ci_failure_terminates_at_retry_budget() {
        let forge = Arc::new(MockForge::with_branch_file(
            "T_L_AI_Fix",
            "app.js",
            "const out = eval(input);\n",
        ));
        forge.set_failing_check("app.js", 12, "SyntaxError: unexpected token");
        let (orchestrator, _rx) = orchestrator(Arc::clone(&forge));
        let result = orchestrator.run(vec![issue("app.js", 1)]).await;

        assert_eq!(result.final_ci_status, CiStatus::Failed);
        assert_eq!(result.retry_count, MAX_RETRIES);
        assert_eq!(result.ci_timeline.len(), MAX_RETRIES as usize);
        for (index, entry) in result.ci_timeline.iter().enumerate() {
            assert_eq!(entry.iteration as usize, index + 1);
        }
        // The working set was replaced by the CI-derived issue.
        assert!(result.issues.iter().all(|i| i.source == IssueSource::Ci));
        assert!(result.issues.iter().any(|i| i.bug_type == crate::model::BugKind::Syntax
            && i.file == "app.js"
            && i.line == 12));
    }

    #[tokio::test]
    async fn no_pr_when_nothing_applied() {
        // File missing on the branch: every fix is skipped.
        let forge = Arc::new(MockForge::default());
        forge
            .refs
            .lock()
            .unwrap()
            .insert("heads/T_L_AI_Fix".into(), "base".into());
        let (orchestrator, _rx) = orchestrator(Arc::clone(&forge));
        let result = orchestrator.run(vec![issue("gone.js", 1)]).await;

        assert_eq!(result.final_ci_status, CiStatus::Skipped);
        assert!(result.pr_url.is_none());
        assert!(forge.prs.lock().unwrap().is_empty());
        assert!(result.fixes.iter().all(|f| f.status == FixStatus::Skipped));
    }

    #[tokio::test]
    async fn create_branch_resets_existing_ref() {
        let forge = Arc::new(MockForge::default());
        forge
            .refs
            .lock()
            .unwrap()
            .insert("heads/main".into(), "mainsha".into());
        forge
            .refs
            .lock()
            .unwrap()
            .insert("heads/T_L_AI_Fix".into(), "stale".into());

        let manager = BranchManager::new(
            Arc::clone(&forge) as Arc<dyn ForgeApi>,
            "octo",
            "demo",
        );
        let base_sha = manager.create_branch("T_L_AI_Fix", "main").await.unwrap();

        assert_eq!(base_sha, "mainsha");
        let refs = forge.refs.lock().unwrap();
        assert_eq!(refs.get("heads/T_L_AI_Fix"), refs.get("heads/main"));
    }

    #[tokio::test]
    async fn closed_receiver_cancels_run() {
        let forge = Arc::new(MockForge::default());
        let (orchestrator, rx) = orchestrator(Arc::clone(&forge));
        drop(rx);
        let result = orchestrator.run(vec![issue("app.js", 1)]).await;
        assert_eq!(result.final_ci_status, CiStatus::Failed);
    }

    #[tokio::test]
    async fn progress_events_cover_stages() {
        let forge = Arc::new(MockForge::with_branch_file(
            "T_L_AI_Fix",
            "app.js",
            "const out = eval(input);\n",
        ));
        let (orchestrator, mut rx) = orchestrator(Arc::clone(&forge));
        let result = orchestrator.run(vec![issue("app.js", 1)]).await;
        assert_eq!(result.final_ci_status, CiStatus::NoCi);

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            stages.push(event.stage);
        }
        for expected in ["analyze", "generate_fixes", "apply_commit", "open_pr", "monitor_ci", "complete"] {
            assert!(stages.iter().any(|s| s == expected), "missing stage {}", expected);
        }
    }
}
