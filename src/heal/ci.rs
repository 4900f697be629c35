//! CI monitoring: bounded polling of check runs and commit statuses.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info};

use crate::errors::Result;
use crate::forge_api::{CheckRun, CombinedStatus, ForgeApi};
use crate::heal::session::{CheckSummary, CiResult, CiStatus, FailureLog};

pub const POLL_INTERVAL: Duration = Duration::from_secs(15);

pub struct CiAgent {
    api: Arc<dyn ForgeApi>,
    owner: String,
    repo: String,
    poll_interval: Duration,
}

impl CiAgent {
    pub fn new(api: Arc<dyn ForgeApi>, owner: &str, repo: &str) -> Self {
        Self {
            api,
            owner: owner.to_string(),
            repo: repo.to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether any check runs exist for the branch tip. Repos without CI
    /// skip monitoring entirely.
    pub async fn has_ci_configured(&self, branch: &str) -> Result<bool> {
        let tip = self
            .api
            .get_ref(&self.owner, &self.repo, &format!("heads/{}", branch))
            .await?;
        let checks = self.api.list_checks_for_ref(&self.owner, &self.repo, &tip).await?;
        Ok(!checks.is_empty())
    }

    /// Poll until every check and status has settled or the timeout lapses.
    /// Timeout yields FAILED with a single `timeout` log so the retry loop
    /// still makes forward progress.
    pub async fn wait_for_checks(&self, sha: &str, timeout: Duration) -> CiResult {
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll_once(sha).await {
                Ok(Some(result)) => return result,
                Ok(None) => debug!(sha, "checks still running"),
                Err(e) => debug!(sha, error = %e, "poll failed, will retry"),
            }

            if Instant::now() + self.poll_interval > deadline {
                info!(sha, "CI wait timed out");
                return CiResult {
                    status: CiStatus::Failed,
                    checks: Vec::new(),
                    failure_logs: vec![FailureLog {
                        source: "timeout".to_string(),
                        file: None,
                        line: None,
                        message: format!(
                            "CI did not settle within {}s",
                            timeout.as_secs()
                        ),
                        level: "error".to_string(),
                    }],
                };
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One poll: terminal when some activity exists and nothing is pending
    /// across either surface.
    async fn poll_once(&self, sha: &str) -> Result<Option<CiResult>> {
        let checks = self.api.list_checks_for_ref(&self.owner, &self.repo, sha).await?;
        let combined = self.api.get_combined_status(&self.owner, &self.repo, sha).await?;

        let any_activity = !checks.is_empty() || !combined.statuses.is_empty();
        let check_pending = checks.iter().any(|c| c.is_pending());
        let status_pending = combined.statuses.iter().any(|s| s.state == "pending");
        if !any_activity || check_pending || status_pending {
            return Ok(None);
        }

        Ok(Some(self.summarize(&checks, &combined).await))
    }

    async fn summarize(&self, checks: &[CheckRun], combined: &CombinedStatus) -> CiResult {
        let check_summaries: Vec<CheckSummary> = checks
            .iter()
            .map(|c| CheckSummary {
                name: c.name.clone(),
                status: c
                    .conclusion
                    .clone()
                    .unwrap_or_else(|| c.status.clone()),
                url: c.html_url.clone(),
            })
            .collect();

        let failed_checks: Vec<&CheckRun> = checks.iter().filter(|c| c.is_failed()).collect();
        let failed_statuses: Vec<_> = combined
            .statuses
            .iter()
            .filter(|s| s.state == "failure" || s.state == "error")
            .collect();

        if failed_checks.is_empty() && failed_statuses.is_empty() {
            return CiResult {
                status: CiStatus::Passed,
                checks: check_summaries,
                failure_logs: Vec::new(),
            };
        }

        let mut failure_logs = Vec::new();
        for check in failed_checks {
            let annotations = self
                .api
                .list_annotations(&self.owner, &self.repo, check.id)
                .await
                .unwrap_or_default();
            if annotations.is_empty() {
                failure_logs.push(FailureLog {
                    source: check.name.clone(),
                    file: None,
                    line: None,
                    message: check
                        .output_summary
                        .clone()
                        .unwrap_or_else(|| format!("check {} failed", check.name)),
                    level: "error".to_string(),
                });
            } else {
                for annotation in annotations {
                    failure_logs.push(FailureLog {
                        source: check.name.clone(),
                        file: Some(annotation.path),
                        line: Some(annotation.start_line),
                        message: annotation.message,
                        level: annotation.annotation_level,
                    });
                }
            }
        }
        for status in failed_statuses {
            failure_logs.push(FailureLog {
                source: status.context.clone(),
                file: None,
                line: None,
                message: status
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("status {} failed", status.context)),
                level: "error".to_string(),
            });
        }

        CiResult {
            status: CiStatus::Failed,
            checks: check_summaries,
            failure_logs,
        }
    }
}
