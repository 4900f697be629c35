//! Typed client for the forge REST surface.
//!
//! `ForgeApi` is the seam the healing and analysis layers depend on; the
//! reqwest-backed `ForgeClient` is the production implementation. Every call
//! attaches an installation token from the broker, retries transient
//! failures up to three times with exponential backoff, and surfaces 4xx as
//! typed errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::auth::CredentialBroker;
use super::types::*;
use crate::errors::{GuardError, Result};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

/// The forge operations the core consumes. Implemented by `ForgeClient` in
/// production and by in-memory fakes in tests.
#[async_trait]
pub trait ForgeApi: Send + Sync {
    async fn list_installation(&self, owner: &str, repo: &str) -> Result<u64>;
    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo>;
    async fn list_pr_files(&self, owner: &str, repo: &str, pr: u64) -> Result<Vec<PrFile>>;
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<FileContent>;

    /// `git_ref` is the short form, e.g. `heads/main`.
    async fn get_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<String>;
    async fn create_ref(&self, owner: &str, repo: &str, git_ref: &str, sha: &str) -> Result<()>;
    async fn delete_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<()>;
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
        force: bool,
    ) -> Result<()>;

    async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitInfo>;
    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String>;
    async fn create_blob(&self, owner: &str, repo: &str, content: &[u8]) -> Result<String>;
    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntryInput],
    ) -> Result<String>;

    /// Single-file commit via the contents API. Returns the new commit sha.
    async fn create_or_update_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &[u8],
        branch: &str,
        message: &str,
        prior_sha: Option<&str>,
    ) -> Result<String>;

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<()>;

    async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PrInfo>;
    async fn update_pr(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()>;
    async fn create_review(
        &self,
        owner: &str,
        repo: &str,
        pr: u64,
        commit_sha: &str,
        comments: &[ReviewComment],
    ) -> Result<()>;
    async fn create_issue_comment(&self, owner: &str, repo: &str, pr: u64, body: &str)
    -> Result<()>;

    async fn list_checks_for_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<Vec<CheckRun>>;
    async fn list_annotations(
        &self,
        owner: &str,
        repo: &str,
        check_id: u64,
    ) -> Result<Vec<CheckAnnotation>>;
    async fn get_combined_status(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<CombinedStatus>;
}

pub struct ForgeClient {
    http: reqwest::Client,
    base_url: String,
    broker: Arc<CredentialBroker>,
    installation_id: Option<u64>,
}

impl ForgeClient {
    pub fn new(broker: Arc<CredentialBroker>, installation_id: Option<u64>) -> Self {
        Self::with_base_url(broker, installation_id, "https://api.github.com")
    }

    pub fn with_base_url(
        broker: Arc<CredentialBroker>,
        installation_id: Option<u64>,
        base_url: &str,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            broker,
            installation_id,
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<reqwest::Response> {
        let token = self.broker.token(self.installation_id).await?;
        let url = format!("{}{}", self.base_url, path);

        let mut attempt = 0u32;
        loop {
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "codeguard")
                .header("X-GitHub-Api-Version", "2022-11-28");
            if let Some(ref body) = body {
                req = req.json(body);
            }

            let outcome = req.send().await;
            attempt += 1;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.is_server_error() && attempt < MAX_ATTEMPTS {
                        warn!(%url, status = status.as_u16(), attempt, "server error, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(GuardError::from_status(status.as_u16(), text));
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(%url, error = %e, attempt, "transport error, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self.request(Method::GET, path, None).await?;
        response
            .json()
            .await
            .map_err(|e| GuardError::Upstream(format!("bad response body: {}", e)))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Value,
    ) -> Result<T> {
        let response = self.request(method, path, Some(body)).await?;
        response
            .json()
            .await
            .map_err(|e| GuardError::Upstream(format!("bad response body: {}", e)))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1)))
}

// ── Wire-format structs ───────────────────────────────────────────────

#[derive(Deserialize)]
struct WireInstallation {
    id: u64,
}

#[derive(Deserialize)]
struct WireContents {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct WireRef {
    object: WireRefObject,
}

#[derive(Deserialize)]
struct WireRefObject {
    sha: String,
}

#[derive(Deserialize)]
struct WireCommit {
    sha: String,
    tree: WireTreeRef,
}

#[derive(Deserialize)]
struct WireTreeRef {
    sha: String,
}

#[derive(Deserialize)]
struct WireSha {
    sha: String,
}

#[derive(Deserialize)]
struct WireContentsCommit {
    commit: WireSha,
}

#[derive(Deserialize)]
struct WirePr {
    number: u64,
    html_url: String,
}

#[derive(Deserialize)]
struct WireCheckRuns {
    check_runs: Vec<WireCheckRun>,
}

#[derive(Deserialize)]
struct WireCheckRun {
    id: u64,
    name: String,
    status: String,
    conclusion: Option<String>,
    html_url: Option<String>,
    #[serde(default)]
    output: Option<WireCheckOutput>,
}

#[derive(Deserialize)]
struct WireCheckOutput {
    summary: Option<String>,
}

#[async_trait]
impl ForgeApi for ForgeClient {
    async fn list_installation(&self, owner: &str, repo: &str) -> Result<u64> {
        let wire: WireInstallation = self
            .get_json(&format!("/repos/{}/{}/installation", owner, repo))
            .await?;
        Ok(wire.id)
    }

    async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo> {
        self.get_json(&format!("/repos/{}/{}", owner, repo)).await
    }

    async fn list_pr_files(&self, owner: &str, repo: &str, pr: u64) -> Result<Vec<PrFile>> {
        self.get_json(&format!(
            "/repos/{}/{}/pulls/{}/files?per_page=100",
            owner, repo, pr
        ))
        .await
    }

    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<FileContent> {
        let wire: WireContents = self
            .get_json(&format!(
                "/repos/{}/{}/contents/{}?ref={}",
                owner, repo, path, git_ref
            ))
            .await?;
        let raw: String = wire.content.chars().filter(|c| !c.is_whitespace()).collect();
        let content = BASE64
            .decode(raw)
            .map_err(|e| GuardError::Upstream(format!("undecodable blob for {}: {}", path, e)))?;
        Ok(FileContent {
            content,
            sha: wire.sha,
        })
    }

    async fn get_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<String> {
        let wire: WireRef = self
            .get_json(&format!("/repos/{}/{}/git/ref/{}", owner, repo, git_ref))
            .await?;
        Ok(wire.object.sha)
    }

    async fn create_ref(&self, owner: &str, repo: &str, git_ref: &str, sha: &str) -> Result<()> {
        let body = json!({ "ref": format!("refs/{}", git_ref), "sha": sha });
        self.request(
            Method::POST,
            &format!("/repos/{}/{}/git/refs", owner, repo),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn delete_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &format!("/repos/{}/{}/git/refs/{}", owner, repo, git_ref),
            None,
        )
        .await?;
        Ok(())
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
        force: bool,
    ) -> Result<()> {
        let body = json!({ "sha": sha, "force": force });
        self.request(
            Method::PATCH,
            &format!("/repos/{}/{}/git/refs/{}", owner, repo, git_ref),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn get_commit(&self, owner: &str, repo: &str, sha: &str) -> Result<CommitInfo> {
        let wire: WireCommit = self
            .get_json(&format!("/repos/{}/{}/git/commits/{}", owner, repo, sha))
            .await?;
        Ok(CommitInfo {
            sha: wire.sha,
            tree_sha: wire.tree.sha,
        })
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String> {
        let body = json!({ "message": message, "tree": tree_sha, "parents": parents });
        let wire: WireSha = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/{}/git/commits", owner, repo),
                body,
            )
            .await?;
        Ok(wire.sha)
    }

    async fn create_blob(&self, owner: &str, repo: &str, content: &[u8]) -> Result<String> {
        let body = json!({ "content": BASE64.encode(content), "encoding": "base64" });
        let wire: WireSha = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/{}/git/blobs", owner, repo),
                body,
            )
            .await?;
        Ok(wire.sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntryInput],
    ) -> Result<String> {
        let body = json!({ "base_tree": base_tree, "tree": entries });
        let wire: WireSha = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/{}/git/trees", owner, repo),
                body,
            )
            .await?;
        Ok(wire.sha)
    }

    async fn create_or_update_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &[u8],
        branch: &str,
        message: &str,
        prior_sha: Option<&str>,
    ) -> Result<String> {
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content),
            "branch": branch,
        });
        if let Some(sha) = prior_sha {
            body["sha"] = json!(sha);
        }
        let wire: WireContentsCommit = self
            .send_json(
                Method::PUT,
                &format!("/repos/{}/{}/contents/{}", owner, repo, path),
                body,
            )
            .await?;
        Ok(wire.commit.sha)
    }

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
        target_url: Option<&str>,
    ) -> Result<()> {
        let mut body = json!({
            "state": state.as_str(),
            "description": crate::util::truncate_str(description, 140),
            "context": context,
        });
        if let Some(url) = target_url {
            body["target_url"] = json!(url);
        }
        self.request(
            Method::POST,
            &format!("/repos/{}/{}/statuses/{}", owner, repo, sha),
            Some(body),
        )
        .await?;
        Ok(())
    }

    async fn create_pr(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PrInfo> {
        let payload = json!({ "title": title, "head": head, "base": base, "body": body });
        let wire: WirePr = self
            .send_json(
                Method::POST,
                &format!("/repos/{}/{}/pulls", owner, repo),
                payload,
            )
            .await?;
        Ok(PrInfo {
            number: wire.number,
            url: wire.html_url,
        })
    }

    async fn update_pr(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()> {
        let payload = json!({ "body": body });
        self.request(
            Method::PATCH,
            &format!("/repos/{}/{}/pulls/{}", owner, repo, number),
            Some(payload),
        )
        .await?;
        Ok(())
    }

    async fn create_review(
        &self,
        owner: &str,
        repo: &str,
        pr: u64,
        commit_sha: &str,
        comments: &[ReviewComment],
    ) -> Result<()> {
        let payload = json!({
            "commit_id": commit_sha,
            "event": "COMMENT",
            "comments": comments,
        });
        self.request(
            Method::POST,
            &format!("/repos/{}/{}/pulls/{}/reviews", owner, repo, pr),
            Some(payload),
        )
        .await?;
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        pr: u64,
        body: &str,
    ) -> Result<()> {
        let payload = json!({ "body": body });
        self.request(
            Method::POST,
            &format!("/repos/{}/{}/issues/{}/comments", owner, repo, pr),
            Some(payload),
        )
        .await?;
        Ok(())
    }

    async fn list_checks_for_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<Vec<CheckRun>> {
        let wire: WireCheckRuns = self
            .get_json(&format!(
                "/repos/{}/{}/commits/{}/check-runs?per_page=100",
                owner, repo, git_ref
            ))
            .await?;
        debug!(count = wire.check_runs.len(), git_ref, "listed check runs");
        Ok(wire
            .check_runs
            .into_iter()
            .map(|cr| CheckRun {
                id: cr.id,
                name: cr.name,
                status: cr.status,
                conclusion: cr.conclusion,
                html_url: cr.html_url,
                output_summary: cr.output.and_then(|o| o.summary),
            })
            .collect())
    }

    async fn list_annotations(
        &self,
        owner: &str,
        repo: &str,
        check_id: u64,
    ) -> Result<Vec<CheckAnnotation>> {
        self.get_json(&format!(
            "/repos/{}/{}/check-runs/{}/annotations",
            owner, repo, check_id
        ))
        .await
    }

    async fn get_combined_status(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<CombinedStatus> {
        self.get_json(&format!(
            "/repos/{}/{}/commits/{}/status",
            owner, repo, git_ref
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential() {
        assert_eq!(backoff(1), Duration::from_millis(250));
        assert_eq!(backoff(2), Duration::from_millis(500));
        assert_eq!(backoff(3), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn unconfigured_auth_fails_before_any_request() {
        let broker = Arc::new(CredentialBroker::new(None, None, None));
        let client = ForgeClient::new(broker, None);
        let err = client.get_repo("octo", "demo").await.unwrap_err();
        assert!(matches!(err, GuardError::AuthUnconfigured));
    }
}
