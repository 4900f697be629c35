//! The healing gateway: SSE streaming endpoint plus the in-memory result
//! store.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::Json;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::SharedState;
use crate::analyzer::RepoAnalyzer;
use crate::detect::classify::classify_failure_message;
use crate::errors::{GuardError, Result as GuardResult};
use crate::forge_api::{ForgeApi, ForgeClient};
use crate::heal::branch::BranchManager;
use crate::heal::cloner;
use crate::heal::fix_agent::{FixAgent, LlmFixAgent, RuleBasedFixAgent};
use crate::heal::orchestrator::Orchestrator;
use crate::heal::session::{CiStatus, HealResult, HealSession, ProgressEvent};
use crate::model::{Issue, IssueSource, Severity};
use crate::sandbox::Sandbox;
use crate::testrun::TestRunner;
use crate::util::{healing_branch_name, parse_forge_repo_url};

/// Completed heal results keyed by id; last writer wins.
#[derive(Default)]
pub struct ResultStore {
    inner: RwLock<HashMap<String, HealResult>>,
}

impl ResultStore {
    pub fn insert(&self, id: String, result: HealResult) {
        self.inner.write().unwrap().insert(id, result);
    }

    pub fn get(&self, id: &str) -> Option<HealResult> {
        self.inner.read().unwrap().get(id).cloned()
    }

    pub fn all(&self) -> Vec<(String, HealResult)> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct HealRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub leader_name: String,
}

pub enum HealApiError {
    BadRequest(String),
    TooManyRequests(u64),
}

impl IntoResponse for HealApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response(),
            Self::TooManyRequests(retry_after) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "rate limit exceeded" })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
        }
    }
}

/// POST /heal — validates, rate-limits, and streams progress until the
/// terminal `result` or `error` event.
pub async fn start_heal(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<HealRequest>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, HealApiError>
{
    if request.repo_url.trim().is_empty()
        || request.team_name.trim().is_empty()
        || request.leader_name.trim().is_empty()
    {
        return Err(HealApiError::BadRequest(
            "repo_url, team_name and leader_name are required".into(),
        ));
    }
    let Some((owner, repo)) = parse_forge_repo_url(&request.repo_url) else {
        return Err(HealApiError::BadRequest(
            "repo_url must be a forge repository URL".into(),
        ));
    };

    if let Err(retry_after) = state.rate_limiter.check(addr.ip()) {
        warn!(ip = %addr.ip(), "heal request rate limited");
        return Err(HealApiError::TooManyRequests(retry_after));
    }

    info!(owner, repo, team = %request.team_name, "heal requested");
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(64);
    let task_state = state.clone();
    tokio::spawn(async move {
        run_heal(task_state, owner, repo, request.team_name, request.leader_name, tx).await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.stage == "result" || event.stage == "error";
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(data));
            if terminal {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /heal — static readiness payload.
pub async fn heal_readiness() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ready",
        "service": "codeguard-heal",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StoreResultRequest {
    pub id: Option<String>,
    pub results: HealResult,
}

pub async fn store_result(
    State(state): State<SharedState>,
    Json(request): Json<StoreResultRequest>,
) -> Json<serde_json::Value> {
    let id = request.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    state.results.insert(id.clone(), request.results);
    Json(json!({ "stored": true, "id": id }))
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub id: Option<String>,
}

pub async fn get_results(
    State(state): State<SharedState>,
    Query(query): Query<ResultQuery>,
) -> Response {
    match query.id {
        Some(id) => match state.results.get(&id) {
            Some(result) => Json(json!({ "id": id, "results": result })).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("no results for id {}", id) })),
            )
                .into_response(),
        },
        None => {
            let all: Vec<_> = state
                .results
                .all()
                .into_iter()
                .map(|(id, result)| json!({ "id": id, "results": result }))
                .collect();
            Json(json!({ "results": all })).into_response()
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────

async fn run_heal(
    state: SharedState,
    owner: String,
    repo: String,
    team: String,
    leader: String,
    tx: mpsc::Sender<ProgressEvent>,
) {
    let heal_id = Uuid::new_v4().to_string();
    let outcome = tokio::time::timeout(
        state.config.heal_timeout,
        heal_pipeline(&state, &owner, &repo, &team, &leader, &tx),
    )
    .await;

    match outcome {
        Ok(Ok(result)) => {
            state.results.insert(heal_id, result.clone());
            let _ = tx.send(ProgressEvent::result(result)).await;
        }
        Ok(Err(e)) => {
            error!(owner, repo, error = %e, "heal pipeline failed");
            let partial = empty_result(&owner, &repo);
            state.results.insert(heal_id, partial.clone());
            let _ = tx
                .send(ProgressEvent::error(e.to_string(), Some(partial)))
                .await;
        }
        Err(_) => {
            error!(owner, repo, "heal timed out");
            let partial = empty_result(&owner, &repo);
            state.results.insert(heal_id, partial.clone());
            let _ = tx
                .send(ProgressEvent::error(
                    format!("healing timed out after {}s", state.config.heal_timeout.as_secs()),
                    Some(partial),
                ))
                .await;
        }
    }
}

fn empty_result(owner: &str, repo: &str) -> HealResult {
    HealResult {
        repo: format!("{}/{}", owner, repo),
        branch_created: false,
        total_failures_detected: 0,
        total_fixes_applied: 0,
        final_ci_status: CiStatus::Failed,
        retry_count: 0,
        execution_time_ms: 0,
        pr_url: None,
        issues: Vec::new(),
        fixes: Vec::new(),
        ci_timeline: Vec::new(),
    }
}

async fn emit(tx: &mpsc::Sender<ProgressEvent>, stage: &str, message: String) -> GuardResult<()> {
    tx.send(ProgressEvent::stage(stage, message))
        .await
        .map_err(|_| GuardError::Upstream("progress stream closed".into()))
}

async fn heal_pipeline(
    state: &SharedState,
    owner: &str,
    repo: &str,
    team: &str,
    leader: &str,
    tx: &mpsc::Sender<ProgressEvent>,
) -> GuardResult<HealResult> {
    emit(tx, "start", format!("healing {}/{}", owner, repo)).await?;

    // Installation discovery is best-effort; the fallback token covers the
    // personal-repo case.
    let probe = ForgeClient::new(state.broker.clone(), None);
    let installation_id = probe.list_installation(owner, repo).await.ok();
    let api: Arc<dyn ForgeApi> =
        Arc::new(ForgeClient::new(state.broker.clone(), installation_id));

    let repo_info = api.get_repo(owner, repo).await?;
    emit(
        tx,
        "repo",
        format!("default branch is {}", repo_info.default_branch),
    )
    .await?;

    let token = state.broker.token(installation_id).await.ok();
    let clone = cloner::clone_repo(owner, repo, token.as_deref(), state.config.clone_timeout).await?;

    emit(tx, "tests", "running test suite in sandbox".into()).await?;
    let sandbox = Sandbox::connect().await;
    if sandbox.is_none() {
        warn!("no container runtime; tests will run unsandboxed");
    }
    let runner = TestRunner::new(sandbox, state.config.sandbox_timeout);
    let report = match runner.run(&clone.path()).await {
        Ok(report) => Some(report),
        Err(e) => {
            // A broken sandbox is a single synthetic failure, not a dead run.
            warn!(error = %e, "test run failed");
            emit(tx, "tests", format!("test run failed: {}", e)).await?;
            None
        }
    };

    let mut issues: Vec<Issue> = Vec::new();
    if report.is_none() {
        issues.push(Issue {
            file: String::new(),
            line: 0,
            bug_type: crate::model::BugKind::Logic,
            description: "sandboxed test run failed to complete".into(),
            code_snippet: String::new(),
            severity: Severity::Critical,
            source: IssueSource::Test,
        });
    }
    if let Some(report) = &report {
        emit(
            tx,
            "tests",
            format!("{} test failure(s) detected", report.failures.len()),
        )
        .await?;
        issues.extend(report.failures.iter().map(|f| Issue {
            file: f.file.clone(),
            line: f.line,
            bug_type: classify_failure_message(&f.message),
            description: f.message.clone(),
            code_snippet: String::new(),
            severity: Severity::Critical,
            source: IssueSource::Test,
        }));
    }

    emit(tx, "analyze_repo", "running static analysis".into()).await?;
    let analyzer = RepoAnalyzer::new();
    let static_issues = analyzer.analyze(&clone.path());
    emit(
        tx,
        "analyze_repo",
        format!("{} static issue(s) detected", static_issues.len()),
    )
    .await?;
    issues.extend(static_issues);

    let ai_branch = healing_branch_name(team, leader);
    let mut session = HealSession::new(
        owner,
        repo,
        &repo_info.default_branch,
        &ai_branch,
        installation_id,
    );

    if !issues.is_empty() {
        let branches = BranchManager::new(Arc::clone(&api), owner, repo);
        branches
            .create_branch(&ai_branch, &repo_info.default_branch)
            .await?;
        session.branch_created = true;
        emit(tx, "branch", format!("created {}", ai_branch)).await?;
    }

    let fix_agent: Arc<dyn FixAgent> = match &state.config.llm_api_key {
        Some(key) => Arc::new(LlmFixAgent::new(key.clone(), state.config.llm_timeout)),
        None => Arc::new(RuleBasedFixAgent),
    };

    let orchestrator = Orchestrator::new(
        api,
        fix_agent,
        session,
        tx.clone(),
        state.config.ci_wait_timeout,
    );
    Ok(orchestrator.run(issues).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_store_last_writer_wins() {
        let store = ResultStore::default();
        store.insert("a".into(), empty_result("octo", "demo"));
        let mut second = empty_result("octo", "demo");
        second.retry_count = 3;
        store.insert("a".into(), second);

        assert_eq!(store.get("a").unwrap().retry_count, 3);
        assert!(store.get("b").is_none());
        assert_eq!(store.all().len(), 1);
    }

    #[test]
    fn empty_result_shape() {
        let result = empty_result("octo", "demo");
        assert_eq!(result.repo, "octo/demo");
        assert_eq!(result.final_ci_status, CiStatus::Failed);
        assert!(!result.branch_created);
    }
}
