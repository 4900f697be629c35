//! Core data model shared across detection, healing, and the HTTP surface.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category a raw finding is classified into. Every finding gets exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugKind {
    Syntax,
    Linting,
    Logic,
    TypeError,
    Import,
    Indentation,
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Syntax => "SYNTAX",
            Self::Linting => "LINTING",
            Self::Logic => "LOGIC",
            Self::TypeError => "TYPE_ERROR",
            Self::Import => "IMPORT",
            Self::Indentation => "INDENTATION",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    #[default]
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        };
        write!(f, "{}", s)
    }
}

/// Where a classified issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSource {
    Ast,
    Regex,
    Test,
    Ci,
}

/// A normalized, classified finding the orchestrator can act on.
/// Immutable after classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub file: String,
    pub line: u32,
    pub bug_type: BugKind,
    pub description: String,
    pub code_snippet: String,
    pub severity: Severity,
    pub source: IssueSource,
}

/// Rule category for the catalog and for inline analysis filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleCategory {
    Security,
    Naming,
    Style,
    BestPractice,
    Performance,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Naming => "naming",
            Self::Style => "style",
            Self::BestPractice => "best-practice",
            Self::Performance => "performance",
        }
    }

    pub const ALL: [RuleCategory; 5] = [
        RuleCategory::Security,
        RuleCategory::BestPractice,
        RuleCategory::Style,
        RuleCategory::Naming,
        RuleCategory::Performance,
    ];
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored compliance rule. Seeded at install time or created by users;
/// `is_active` toggles it out of live scans without deleting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub language: String,
    /// Tree-sitter S-expression or a regular expression, depending on engine.
    pub pattern: String,
    pub message: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// A persisted finding from inline PR analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredViolation {
    pub analysis_id: i64,
    pub rule_id: String,
    pub file: String,
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Success,
    Failure,
}

/// One inline-analysis record. Created PENDING at webhook intake and
/// transitioned exactly once to SUCCESS or FAILURE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: i64,
    pub project_id: i64,
    pub commit_hash: String,
    pub pr_number: u64,
    pub status: AnalysisStatus,
}

/// A repository the app is installed on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub repo_id: u64,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub installation_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bug_kind_serializes_screaming() {
        let json = serde_json::to_string(&BugKind::TypeError).unwrap();
        assert_eq!(json, "\"TYPE_ERROR\"");
        let back: BugKind = serde_json::from_str("\"INDENTATION\"").unwrap();
        assert_eq!(back, BugKind::Indentation);
    }

    #[test]
    fn category_round_trips_kebab() {
        let json = serde_json::to_string(&RuleCategory::BestPractice).unwrap();
        assert_eq!(json, "\"best-practice\"");
        assert_eq!(RuleCategory::BestPractice.as_str(), "best-practice");
    }

    #[test]
    fn rule_defaults_active() {
        let rule: Rule = serde_json::from_str(
            r#"{
                "id": "js-sec-001",
                "name": "no-eval",
                "category": "security",
                "severity": "CRITICAL",
                "language": "js",
                "pattern": "(call_expression)",
                "message": "eval is dangerous"
            }"#,
        )
        .unwrap();
        assert!(rule.is_active);
        assert_eq!(rule.category, RuleCategory::Security);
    }

    #[test]
    fn issue_source_is_lowercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&IssueSource::Ci).unwrap(), "\"ci\"");
    }
}
