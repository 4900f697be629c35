//! Fix generation.
//!
//! One polymorphic capability: turn an issue plus the current file content
//! into a replacement file. The LLM-backed agent is primary; the rule-based
//! agent is both the no-key configuration and the fallback for every LLM
//! failure, so the orchestrator never needs to know which one answered.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{GuardError, Result};
use crate::heal::session::ensure_commit_marker;
use crate::model::{BugKind, Issue};

const CONTEXT_LINES: usize = 15;
const MIN_LENGTH_RATIO: f64 = 0.3;
const MAX_LENGTH_RATIO: f64 = 3.0;
const FIXED_CODE_START: &str = "===FIXED_CODE_START===";
const FIXED_CODE_END: &str = "===FIXED_CODE_END===";
const COMMIT_MESSAGE_MARK: &str = "===COMMIT_MESSAGE===";
const EXPLANATION_MARK: &str = "===EXPLANATION===";

#[derive(Debug, Clone)]
pub struct FixProposal {
    pub fixed_code: String,
    pub commit_message: String,
    pub explanation: String,
}

#[async_trait]
pub trait FixAgent: Send + Sync {
    /// Propose a full-file replacement for one issue.
    async fn generate_fix(&self, issue: &Issue, current_content: &str) -> Result<FixProposal>;
}

// ── Rule-based agent ──────────────────────────────────────────────────

static MEMBER_ACCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)\.(\w)").unwrap());
static SECRET_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<head>(const|let|var)?\s*(?P<name>\w+)\s*=\s*)["'][^"']*["']"#).unwrap()
});

/// Deterministic per-kind mutations of the offending line.
pub struct RuleBasedFixAgent;

impl RuleBasedFixAgent {
    fn fix_line(issue: &Issue, line: &str) -> Option<(String, String)> {
        let comment = comment_prefix(&issue.file);
        match issue.bug_type {
            BugKind::Syntax => {
                let trimmed = line.trim_end();
                if trimmed.is_empty()
                    || trimmed.ends_with(';')
                    || trimmed.ends_with('{')
                    || trimmed.ends_with('}')
                    || trimmed.ends_with(':')
                {
                    None
                } else {
                    Some((
                        format!("{};", trimmed),
                        format!("Add missing statement terminator in {}", issue.file),
                    ))
                }
            }
            BugKind::Linting => {
                if line.contains("console.log")
                    || line.contains("print(")
                    || line.contains("System.out")
                    || line.contains("fmt.Println")
                {
                    Some((
                        format!("{} {}", comment, line.trim_start()),
                        format!("Remove debug output in {}", issue.file),
                    ))
                } else {
                    Some((
                        format!("{} {}", comment, line.trim_start()),
                        format!("Comment out lint violation in {}", issue.file),
                    ))
                }
            }
            BugKind::Logic => {
                if line.contains("eval(") {
                    Some((
                        line.replace("eval(", "Function("),
                        format!("Replace eval with Function in {}", issue.file),
                    ))
                } else if line.contains("==") && !line.contains("===") {
                    Some((
                        line.replace("==", "==="),
                        format!("Use strict equality in {}", issue.file),
                    ))
                } else if let Some(caps) = SECRET_ASSIGN.captures(line) {
                    let name = caps.name("name").map(|m| m.as_str()).unwrap_or("SECRET");
                    let replacement = env_lookup(&issue.file, name);
                    Some((
                        SECRET_ASSIGN
                            .replace(line, format!("${{head}}{}", replacement))
                            .into_owned(),
                        format!("Move hardcoded credential to environment in {}", issue.file),
                    ))
                } else {
                    None
                }
            }
            BugKind::TypeError => MEMBER_ACCESS.find(line).map(|_| {
                (
                    MEMBER_ACCESS.replace(line, "$1?.$2").into_owned(),
                    format!("Guard member access with optional chaining in {}", issue.file),
                )
            }),
            BugKind::Import => Some((
                format!("{} {}", comment, line.trim_start()),
                format!("Disable unresolved import in {}", issue.file),
            )),
            BugKind::Indentation => {
                if line.starts_with('\t') {
                    let tabs = line.chars().take_while(|c| *c == '\t').count();
                    Some((
                        format!("{}{}", " ".repeat(tabs * 4), line.trim_start_matches('\t')),
                        format!("Normalize indentation to spaces in {}", issue.file),
                    ))
                } else {
                    None
                }
            }
        }
    }
}

#[async_trait]
impl FixAgent for RuleBasedFixAgent {
    async fn generate_fix(&self, issue: &Issue, current_content: &str) -> Result<FixProposal> {
        let mut lines: Vec<String> = current_content.lines().map(String::from).collect();
        let index = issue.line.saturating_sub(1) as usize;
        let Some(line) = lines.get(index).cloned() else {
            return Err(GuardError::Validation(format!(
                "line {} out of range for {}",
                issue.line, issue.file
            )));
        };

        let Some((fixed_line, message)) = Self::fix_line(issue, &line) else {
            return Err(GuardError::Validation(format!(
                "no deterministic fix for {} at {}:{}",
                issue.bug_type, issue.file, issue.line
            )));
        };

        lines[index] = fixed_line;
        let mut fixed_code = lines.join("\n");
        if current_content.ends_with('\n') {
            fixed_code.push('\n');
        }

        Ok(FixProposal {
            fixed_code,
            commit_message: ensure_commit_marker(&message),
            explanation: format!("Deterministic {} fix on line {}", issue.bug_type, issue.line),
        })
    }
}

fn comment_prefix(file: &str) -> &'static str {
    match file.rsplit('.').next() {
        Some("py") | Some("rb") | Some("sh") | Some("yml") | Some("yaml") => "#",
        _ => "//",
    }
}

fn env_lookup(file: &str, name: &str) -> String {
    let env_name = name.to_uppercase();
    match file.rsplit('.').next() {
        Some("py") => format!("os.environ.get(\"{}\", \"\")", env_name),
        Some("go") => format!("os.Getenv(\"{}\")", env_name),
        Some("java") => format!("System.getenv(\"{}\")", env_name),
        _ => format!("process.env.{} || \"\"", env_name),
    }
}

// ── LLM-backed agent ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct LlmResponse {
    #[serde(default)]
    candidates: Vec<LlmCandidate>,
}

#[derive(Deserialize)]
struct LlmCandidate {
    content: LlmContent,
}

#[derive(Deserialize)]
struct LlmContent {
    #[serde(default)]
    parts: Vec<LlmPart>,
}

#[derive(Deserialize)]
struct LlmPart {
    #[serde(default)]
    text: String,
}

pub struct LlmFixAgent {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    fallback: RuleBasedFixAgent,
}

impl LlmFixAgent {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self::with_endpoint(
            api_key,
            timeout,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent",
        )
    }

    pub fn with_endpoint(api_key: String, timeout: Duration, endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client"),
            api_key,
            endpoint: endpoint.to_string(),
            fallback: RuleBasedFixAgent,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.1 }
        });
        let response = self
            .http
            .post(format!("{}?key={}", self.endpoint, self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GuardError::from_status(status.as_u16(), text));
        }

        let parsed: LlmResponse = response
            .json()
            .await
            .map_err(|e| GuardError::Upstream(format!("bad LLM response: {}", e)))?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| GuardError::Upstream("LLM returned no candidates".into()))
    }
}

#[async_trait]
impl FixAgent for LlmFixAgent {
    async fn generate_fix(&self, issue: &Issue, current_content: &str) -> Result<FixProposal> {
        let prompt = build_prompt(issue, current_content);
        let raw = match self.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %issue.file, error = %e, "LLM call failed, using rule-based fallback");
                return self.fallback.generate_fix(issue, current_content).await;
            }
        };

        let proposal = match parse_llm_response(&raw) {
            Some(p) => p,
            None => {
                warn!(file = %issue.file, "LLM response unparseable, using rule-based fallback");
                return self.fallback.generate_fix(issue, current_content).await;
            }
        };

        if !length_ratio_ok(current_content, &proposal.fixed_code) {
            warn!(
                file = %issue.file,
                original = current_content.len(),
                fixed = proposal.fixed_code.len(),
                "LLM fix outside length bounds, using rule-based fallback"
            );
            return self.fallback.generate_fix(issue, current_content).await;
        }

        debug!(file = %issue.file, "LLM fix accepted");
        Ok(FixProposal {
            commit_message: ensure_commit_marker(&proposal.commit_message),
            ..proposal
        })
    }
}

/// The structured prompt: file, line, kind, description, a ±15-line context
/// window, the full current file, and the three delimited response sections
/// the parser demands.
pub fn build_prompt(issue: &Issue, current_content: &str) -> String {
    let lines: Vec<&str> = current_content.lines().collect();
    let index = issue.line.saturating_sub(1) as usize;
    let start = index.saturating_sub(CONTEXT_LINES);
    let end = (index + CONTEXT_LINES + 1).min(lines.len());
    let context = lines[start.min(lines.len())..end].join("\n");

    format!(
        "You are an automated code-repair agent. Fix exactly one issue and \
         return the complete corrected file.\n\n\
         File: {file}\n\
         Line: {line}\n\
         Bug type: {kind}\n\
         Description: {description}\n\n\
         Context around the issue:\n```\n{context}\n```\n\n\
         Full current file:\n```\n{content}\n```\n\n\
         Respond with exactly these three sections:\n\
         {code_start}\n<the complete corrected file>\n{code_end}\n\
         {commit}\n<one-line commit message>\n\
         {explanation}\n<short explanation of the change>",
        file = issue.file,
        line = issue.line,
        kind = issue.bug_type,
        description = issue.description,
        context = context,
        content = current_content,
        code_start = FIXED_CODE_START,
        code_end = FIXED_CODE_END,
        commit = COMMIT_MESSAGE_MARK,
        explanation = EXPLANATION_MARK,
    )
}

/// Strict section parse, then a single fenced code block as the lenient
/// fallback.
pub fn parse_llm_response(raw: &str) -> Option<FixProposal> {
    if let Some(code) = between(raw, FIXED_CODE_START, FIXED_CODE_END) {
        let after_code = raw.split(FIXED_CODE_END).nth(1).unwrap_or("");
        let commit_message = between(after_code, COMMIT_MESSAGE_MARK, EXPLANATION_MARK)
            .or_else(|| after_code.split(COMMIT_MESSAGE_MARK).nth(1))
            .unwrap_or_default()
            .trim()
            .lines()
            .next()
            .unwrap_or("Automated fix")
            .to_string();
        let explanation = after_code
            .split(EXPLANATION_MARK)
            .nth(1)
            .unwrap_or("")
            .trim()
            .to_string();
        return Some(FixProposal {
            fixed_code: strip_fence(code.trim()),
            commit_message: if commit_message.is_empty() {
                "Automated fix".to_string()
            } else {
                commit_message
            },
            explanation,
        });
    }

    // Lenient path: exactly one fenced block.
    let mut parts = raw.split("```");
    let _prefix = parts.next()?;
    let block = parts.next()?;
    if parts.clone().count() > 1 {
        return None;
    }
    let body = block.split_once('\n').map(|(_, rest)| rest).unwrap_or(block);
    Some(FixProposal {
        fixed_code: body.trim_end().to_string(),
        commit_message: "Automated fix".to_string(),
        explanation: String::new(),
    })
}

fn between<'a>(haystack: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let after = haystack.split(start).nth(1)?;
    after.split(end).next()
}

fn strip_fence(code: &str) -> String {
    let trimmed = code.trim();
    if let Some(inner) = trimmed.strip_prefix("```") {
        let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or(inner);
        return inner.trim_end_matches("```").trim_end().to_string();
    }
    trimmed.to_string()
}

/// The replacement must be within [0.3x, 3x] of the original length.
pub fn length_ratio_ok(original: &str, fixed: &str) -> bool {
    if original.is_empty() {
        return !fixed.is_empty();
    }
    let ratio = fixed.len() as f64 / original.len() as f64;
    (MIN_LENGTH_RATIO..=MAX_LENGTH_RATIO).contains(&ratio)
}
