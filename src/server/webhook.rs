//! Webhook intake and the inline PR analyzer.
//!
//! Signature first, then routing: PR events fan out into an async inline
//! analysis; installation events upsert projects idempotently; everything
//! else is acknowledged or ignored.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info, warn};

use super::SharedState;
use crate::detect::grammar::Language;
use crate::detect::regex_rules;
use crate::detect::rules::default_rule_set;
use crate::errors::Result as GuardResult;
use crate::forge_api::{CommitState, ForgeApi, ForgeClient, ReviewComment};
use crate::model::{AnalysisStatus, StoredViolation};

type HmacSha256 = Hmac<Sha256>;

/// Identity of the inline check on commit statuses.
pub const STATUS_CONTEXT: &str = "CodeGuard Pro / Security Analysis";

const REVIEW_COMMENT_CAP: usize = 20;
const COMMENT_LIST_CAP: usize = 10;

// ── Payload shapes ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PrPayload>,
    pub repository: Option<RepoPayload>,
    pub installation: Option<InstallationPayload>,
    pub repositories: Option<Vec<InstallRepoPayload>>,
    pub repositories_added: Option<Vec<InstallRepoPayload>>,
}

#[derive(Debug, Deserialize)]
pub struct PrPayload {
    pub number: u64,
    pub head: HeadPayload,
}

#[derive(Debug, Deserialize)]
pub struct HeadPayload {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct RepoPayload {
    pub id: u64,
    pub name: String,
    pub owner: OwnerPayload,
    pub default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerPayload {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct InstallationPayload {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct InstallRepoPayload {
    pub id: u64,
    pub full_name: String,
}

/// Constant-time HMAC-SHA256 check of the `sha256=<hex>` signature header.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let hex_sig = signature_header
        .strip_prefix("sha256=")
        .unwrap_or(signature_header);
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
}

pub async fn handle_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header(&headers, &["x-signature-256", "x-hub-signature-256"]);
    let verified = matches!(
        (&state.config.webhook_secret, signature),
        (Some(secret), Some(sig)) if verify_signature(secret, &body, sig)
    );
    if !verified {
        if state.config.dev_mode {
            warn!("accepting unverified webhook in development mode");
        } else {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid signature" })),
            )
                .into_response();
        }
    }

    let event = header(&headers, &["x-event", "x-github-event"]).unwrap_or("");
    let delivery = header(&headers, &["x-delivery", "x-github-delivery"]).unwrap_or("-");
    info!(event, delivery, "webhook received");

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("malformed payload: {}", e) })),
            )
                .into_response();
        }
    };

    process_event(state, event, payload).await.into_response()
}

/// Event routing, separated from HTTP plumbing so it is directly testable.
pub(crate) async fn process_event(
    state: SharedState,
    event: &str,
    payload: WebhookPayload,
) -> (StatusCode, Json<serde_json::Value>) {
    match event {
        "ping" => (
            StatusCode::OK,
            Json(json!({ "received": true, "event": "ping", "message": "pong" })),
        ),
        "pull_request" => handle_pull_request(state, payload).await,
        "installation" => handle_installation(state, payload).await,
        other => {
            info!(event = other, "ignoring event");
            (
                StatusCode::OK,
                Json(json!({ "received": true, "event": other, "ignored": true })),
            )
        }
    }
}

async fn handle_pull_request(
    state: SharedState,
    payload: WebhookPayload,
) -> (StatusCode, Json<serde_json::Value>) {
    let action = payload.action.as_deref().unwrap_or("");
    if !matches!(action, "opened" | "synchronize" | "reopened") {
        return (
            StatusCode::OK,
            Json(json!({ "received": true, "event": "pull_request", "ignored": true, "action": action })),
        );
    }

    let (Some(pr), Some(repo)) = (payload.pull_request, payload.repository) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "pull_request payload missing fields" })),
        );
    };

    let default_branch = repo.default_branch.as_deref().unwrap_or("main");
    let project = match state.store.find_project_by_repo_id(repo.id) {
        Some(project) => project,
        None => match state.store.create_project(
            repo.id,
            &repo.owner.login,
            &repo.name,
            default_branch,
            payload.installation.as_ref().map(|i| i.id),
        ) {
            Ok(project) => project,
            Err(e) => {
                error!(error = %e, "project creation failed");
                return (
                    StatusCode::OK,
                    Json(json!({ "received": true, "error": "store unavailable" })),
                );
            }
        },
    };

    let analysis = match state
        .store
        .create_analysis(project.id, &pr.head.sha, pr.number)
    {
        Ok(analysis) => analysis,
        Err(e) => {
            error!(error = %e, "analysis creation failed");
            return (
                StatusCode::OK,
                Json(json!({ "received": true, "error": "store unavailable" })),
            );
        }
    };

    let ctx = InlineContext {
        owner: repo.owner.login,
        repo: repo.name,
        pr_number: pr.number,
        head_sha: pr.head.sha,
        analysis_id: analysis.id,
        installation_id: payload.installation.map(|i| i.id),
    };
    let task_state = state.clone();
    tokio::spawn(async move { run_inline_analysis(task_state, ctx).await });

    (
        StatusCode::OK,
        Json(json!({
            "received": true,
            "event": "pull_request",
            "action": action,
            "analysis_id": analysis.id,
        })),
    )
}

async fn handle_installation(
    state: SharedState,
    payload: WebhookPayload,
) -> (StatusCode, Json<serde_json::Value>) {
    let action = payload.action.as_deref().unwrap_or("");
    match action {
        "created" | "added" => {}
        "removed" | "deleted" => {
            info!(action, "installation removed");
            return (
                StatusCode::OK,
                Json(json!({ "received": true, "event": "installation", "action": action })),
            );
        }
        other => {
            return (
                StatusCode::OK,
                Json(json!({ "received": true, "event": "installation", "ignored": true, "action": other })),
            );
        }
    }

    let Some(installation) = payload.installation else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "installation payload missing id" })),
        );
    };
    let repos = payload
        .repositories
        .or(payload.repositories_added)
        .unwrap_or_default();

    let mut created = 0usize;
    let mut updated = 0usize;
    for repo in &repos {
        let (owner, name) = repo
            .full_name
            .split_once('/')
            .unwrap_or(("", repo.full_name.as_str()));
        match state.store.find_project_by_repo_id(repo.id) {
            Some(existing) => {
                if state
                    .store
                    .set_project_installation(existing.id, installation.id)
                    .is_ok()
                {
                    updated += 1;
                }
            }
            None => {
                match state
                    .store
                    .create_project(repo.id, owner, name, "main", Some(installation.id))
                {
                    Ok(project) => {
                        if let Err(e) = state.store.seed_rules(project.id, &default_rule_set()) {
                            warn!(project = project.id, error = %e, "rule seeding failed");
                        }
                        created += 1;
                    }
                    Err(e) => warn!(repo = %repo.full_name, error = %e, "project creation failed"),
                }
            }
        }
    }

    info!(installation = installation.id, created, updated, "installation processed");
    (
        StatusCode::OK,
        Json(json!({
            "received": true,
            "event": "installation",
            "projects_created": created,
            "projects_updated": updated,
        })),
    )
}

// ── Inline analysis ───────────────────────────────────────────────────

struct InlineContext {
    owner: String,
    repo: String,
    pr_number: u64,
    head_sha: String,
    analysis_id: i64,
    installation_id: Option<u64>,
}

async fn run_inline_analysis(state: SharedState, ctx: InlineContext) {
    let timeout = state.config.inline_analysis_timeout;
    let outcome = tokio::time::timeout(timeout, inline_analysis(&state, &ctx)).await;
    let status = match outcome {
        Ok(Ok(found)) => {
            info!(analysis = ctx.analysis_id, violations = found, "inline analysis complete");
            AnalysisStatus::Success
        }
        Ok(Err(e)) => {
            error!(analysis = ctx.analysis_id, error = %e, "inline analysis failed");
            AnalysisStatus::Failure
        }
        Err(_) => {
            error!(analysis = ctx.analysis_id, "inline analysis timed out");
            AnalysisStatus::Failure
        }
    };
    if let Err(e) = state.store.set_analysis_status(ctx.analysis_id, status) {
        error!(analysis = ctx.analysis_id, error = %e, "failed to settle analysis record");
    }
}

async fn inline_analysis(state: &SharedState, ctx: &InlineContext) -> GuardResult<usize> {
    let client = ForgeClient::new(state.broker.clone(), ctx.installation_id);
    let target_url = state
        .config
        .public_base_url
        .as_ref()
        .map(|base| format!("{}/analyses/{}", base.trim_end_matches('/'), ctx.analysis_id));

    client
        .create_commit_status(
            &ctx.owner,
            &ctx.repo,
            &ctx.head_sha,
            CommitState::Pending,
            "Security analysis running",
            STATUS_CONTEXT,
            target_url.as_deref(),
        )
        .await?;

    let files = client
        .list_pr_files(&ctx.owner, &ctx.repo, ctx.pr_number)
        .await?;

    let mut detected = Vec::new();
    for file in files
        .iter()
        .filter(|f| f.status != "removed" && Language::from_filename(&f.filename).is_some())
    {
        let content = match client
            .get_file_content(&ctx.owner, &ctx.repo, &file.filename, &ctx.head_sha)
            .await
        {
            Ok(content) => content.as_text(),
            Err(e) => {
                warn!(file = %file.filename, error = %e, "skipping unreadable file");
                continue;
            }
        };
        detected.extend(regex_rules::scan(&content, &file.filename));
    }

    let stored: Vec<StoredViolation> = detected
        .iter()
        .map(|v| StoredViolation {
            analysis_id: ctx.analysis_id,
            rule_id: v.rule_id.clone(),
            file: v.file.clone(),
            line: v.line,
            message: v.message.clone(),
        })
        .collect();
    state
        .store
        .record_violations(&stored)
        .map_err(crate::errors::GuardError::Fatal)?;

    if detected.is_empty() {
        client
            .create_commit_status(
                &ctx.owner,
                &ctx.repo,
                &ctx.head_sha,
                CommitState::Success,
                "No issues found",
                STATUS_CONTEXT,
                target_url.as_deref(),
            )
            .await?;
        client
            .create_issue_comment(
                &ctx.owner,
                &ctx.repo,
                ctx.pr_number,
                "✅ **CodeGuard Pro** found no issues in this pull request.",
            )
            .await?;
    } else {
        client
            .create_commit_status(
                &ctx.owner,
                &ctx.repo,
                &ctx.head_sha,
                CommitState::Failure,
                &format!("{} issue(s) found", detected.len()),
                STATUS_CONTEXT,
                target_url.as_deref(),
            )
            .await?;

        let comments: Vec<ReviewComment> = detected
            .iter()
            .take(REVIEW_COMMENT_CAP)
            .map(|v| ReviewComment {
                path: v.file.clone(),
                line: v.line,
                body: format!("**{}** ({}): {}", v.rule_name, v.severity, v.message),
            })
            .collect();

        if let Err(e) = client
            .create_review(&ctx.owner, &ctx.repo, ctx.pr_number, &ctx.head_sha, &comments)
            .await
        {
            warn!(error = %e, "review failed, falling back to issue comment");
            client
                .create_issue_comment(
                    &ctx.owner,
                    &ctx.repo,
                    ctx.pr_number,
                    &fallback_comment(&detected),
                )
                .await?;
        }
    }

    notify_slack(state, ctx, detected.len()).await;
    Ok(detected.len())
}

/// Issue-comment fallback when the review API rejects: first ten findings
/// plus a remainder line.
fn fallback_comment(detected: &[crate::detect::DetectedViolation]) -> String {
    let mut body = format!(
        "⚠️ **CodeGuard Pro** found {} issue(s) in this pull request:\n\n",
        detected.len()
    );
    for v in detected.iter().take(COMMENT_LIST_CAP) {
        body.push_str(&format!("- `{}:{}` — {}\n", v.file, v.line, v.message));
    }
    if detected.len() > COMMENT_LIST_CAP {
        body.push_str(&format!("\n…and {} more.\n", detected.len() - COMMENT_LIST_CAP));
    }
    body
}

/// Optional summary POST to Slack; never fatal.
async fn notify_slack(state: &SharedState, ctx: &InlineContext, violation_count: usize) {
    let Some(url) = state.config.slack_webhook_url.clone() else {
        return;
    };
    let text = format!(
        "CodeGuard analyzed {}/{} PR #{}: {} issue(s) found",
        ctx.owner, ctx.repo, ctx.pr_number, violation_count
    );
    tokio::spawn(async move {
        let result = reqwest::Client::new()
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "slack notification failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_verification_round_trip() {
        let secret = "supersecret";
        let body = br#"{"action":"opened"}"#;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature(secret, body, &sig));
        assert!(!verify_signature(secret, body, "sha256=deadbeef"));
        assert!(!verify_signature(secret, b"tampered", &sig));
        assert!(!verify_signature(secret, body, "not-hex"));
    }

    #[test]
    fn fallback_comment_truncates_at_ten() {
        let detected: Vec<_> = (0u32..14)
            .map(|i| crate::detect::DetectedViolation {
                rule_id: format!("rx-{}", i),
                rule_name: "r".into(),
                category: crate::model::RuleCategory::Security,
                severity: crate::model::Severity::Warning,
                message: "m".into(),
                file: "a.js".into(),
                line: i + 1,
                column: 1,
                end_line: i + 1,
                end_column: 2,
                snippet: "".into(),
                line_text: "".into(),
                engine: "regex",
                bug_hint: None,
            })
            .collect();
        let body = fallback_comment(&detected);
        assert!(body.contains("14 issue(s)"));
        assert!(body.contains("…and 4 more."));
        assert_eq!(body.matches("- `a.js").count(), 10);
    }
}
