//! Tree-sitter rule evaluation.
//!
//! One engine instance compiles and vets the catalog at startup; `analyze`
//! is then safe to call per file. A failing rule is logged and skipped,
//! never allowed to abort the scan of the remaining rules.

use std::collections::HashSet;
use std::time::Instant;

use streaming_iterator::StreamingIterator;
use tracing::{debug, warn};
use tree_sitter::QueryCursor;

use super::grammar::{self, Language};
use super::rules::{self, QueryRule};
use crate::model::{BugKind, RuleCategory, Severity};
use crate::util::truncate_str;

/// Markers that suppress findings on their own line or the line below.
pub const SUPPRESSION_MARKERS: [&str; 4] =
    ["codeguard-ignore", "noqa", "eslint-disable", "@suppress"];

const SNIPPET_MAX: usize = 120;

/// A raw finding from either detection engine, before classification.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DetectedViolation {
    pub rule_id: String,
    pub rule_name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub message: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub snippet: String,
    pub line_text: String,
    pub engine: &'static str,
    /// Pre-classified kind, set by detectors whose rules carry one directly.
    pub bug_hint: Option<BugKind>,
}

/// Narrowing options for one `analyze` call.
#[derive(Debug, Default, Clone)]
pub struct AnalyzeOptions {
    pub language: Option<Language>,
    pub categories: Option<Vec<RuleCategory>>,
    pub rule_ids: Option<Vec<String>>,
}

/// Result of analyzing one file. Timing fields are populated on every path,
/// including errors.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub violations: Vec<DetectedViolation>,
    pub language: Option<Language>,
    pub ast_supported: bool,
    pub parse_time_ms: u64,
    pub query_time_ms: u64,
    pub rules_checked: usize,
    pub error: Option<String>,
}

impl AnalysisOutcome {
    fn unsupported() -> Self {
        Self {
            violations: Vec::new(),
            language: None,
            ast_supported: false,
            parse_time_ms: 0,
            query_time_ms: 0,
            rules_checked: 0,
            error: None,
        }
    }
}

pub struct AstEngine {
    /// Rule ids whose queries failed startup validation.
    excluded: HashSet<&'static str>,
}

impl AstEngine {
    /// Build the engine, vetting every catalog query. Invalid queries are
    /// excluded from live scans and logged once here.
    pub fn new() -> Self {
        let mut excluded = HashSet::new();
        for failure in rules::validate_all() {
            warn!(
                rule = failure.rule_id,
                language = failure.language.id(),
                error = %failure.error,
                "excluding rule with invalid query"
            );
            excluded.insert(failure.rule_id);
        }
        Self { excluded }
    }

    /// Analyze one file's source. Never panics and never returns `Err`;
    /// failures are carried in the outcome.
    pub fn analyze(&self, source: &str, filename: &str, opts: &AnalyzeOptions) -> AnalysisOutcome {
        let language = opts.language.or_else(|| Language::from_filename(filename));
        let Some(language) = language else {
            return AnalysisOutcome::unsupported();
        };

        let parse_start = Instant::now();
        let tree = match grammar::parse(source, language) {
            Ok(tree) => tree,
            Err(e) => {
                return AnalysisOutcome {
                    violations: Vec::new(),
                    language: Some(language),
                    ast_supported: true,
                    parse_time_ms: parse_start.elapsed().as_millis() as u64,
                    query_time_ms: 0,
                    rules_checked: 0,
                    error: Some(e.to_string()),
                };
            }
        };
        let parse_time_ms = parse_start.elapsed().as_millis() as u64;

        let rule_set: Vec<&QueryRule> = rules::filtered_queries(
            language,
            opts.categories.as_deref(),
            opts.rule_ids.as_deref(),
        )
        .into_iter()
        .filter(|r| !self.excluded.contains(r.id))
        .collect();

        if rule_set.is_empty() {
            return AnalysisOutcome {
                violations: Vec::new(),
                language: Some(language),
                ast_supported: true,
                parse_time_ms,
                query_time_ms: 0,
                rules_checked: 0,
                error: None,
            };
        }

        let lines: Vec<&str> = source.lines().collect();
        let query_start = Instant::now();
        let mut violations = Vec::new();
        let mut rules_checked = 0usize;

        for rule in &rule_set {
            let query = match rules::compile(rule, language) {
                Ok(q) => q,
                Err(e) => {
                    // Excluded at startup in the normal case; belt for rules
                    // added at runtime.
                    warn!(rule = rule.id, error = %e, "query failed to compile, skipping");
                    continue;
                }
            };
            rules_checked += 1;

            let target_index = query.capture_index_for_name("target").unwrap_or(0);

            let mut cursor = QueryCursor::new();
            let mut matches = cursor.matches(&query, tree.root_node(), source.as_bytes());
            while let Some(m) = matches.next() {
                let node = m
                    .captures
                    .iter()
                    .find(|c| c.index == target_index)
                    .or_else(|| m.captures.first())
                    .map(|c| c.node);
                let Some(node) = node else { continue };

                let start = node.start_position();
                let end = node.end_position();
                let line = start.row as u32 + 1;

                if is_suppressed(&lines, start.row) {
                    debug!(rule = rule.id, line, "finding suppressed");
                    continue;
                }

                let snippet = node
                    .utf8_text(source.as_bytes())
                    .map(|t| truncate_str(t, SNIPPET_MAX))
                    .unwrap_or_default();
                let line_text = lines
                    .get(start.row)
                    .map(|l| l.trim().to_string())
                    .unwrap_or_default();

                violations.push(DetectedViolation {
                    rule_id: rule.id.to_string(),
                    rule_name: rule.name.to_string(),
                    category: rule.category,
                    severity: rule.severity,
                    message: rule.message.to_string(),
                    file: filename.to_string(),
                    line,
                    column: start.column as u32 + 1,
                    end_line: end.row as u32 + 1,
                    end_column: end.column as u32 + 1,
                    snippet,
                    line_text,
                    engine: "ast",
                    bug_hint: None,
                });
            }
        }

        AnalysisOutcome {
            violations,
            language: Some(language),
            ast_supported: true,
            parse_time_ms,
            query_time_ms: query_start.elapsed().as_millis() as u64,
            rules_checked,
            error: None,
        }
    }
}

impl Default for AstEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A finding is suppressed when its own line or the line directly above
/// carries any suppression marker.
pub fn is_suppressed(lines: &[&str], row: usize) -> bool {
    let has_marker =
        |line: &str| SUPPRESSION_MARKERS.iter().any(|marker| line.contains(marker));
    if lines.get(row).is_some_and(|l| has_marker(l)) {
        return true;
    }
    row > 0 && lines.get(row - 1).is_some_and(|l| has_marker(l))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> AstEngine {
        AstEngine::new()
    }

    #[test]
    fn finds_eval_in_js() {
        let outcome = engine().analyze(
            "const out = eval(userInput);\n",
            "app.js",
            &AnalyzeOptions::default(),
        );
        assert!(outcome.ast_supported);
        assert!(outcome.error.is_none());
        assert!(outcome.rules_checked > 0);
        let v = outcome
            .violations
            .iter()
            .find(|v| v.rule_id == "js-sec-001")
            .expect("eval violation");
        assert_eq!(v.line, 1);
        assert_eq!(v.engine, "ast");
        assert_eq!(v.line_text, "const out = eval(userInput);");
    }

    #[test]
    fn unsupported_language_reports_flag() {
        let outcome = engine().analyze("puts 'hi'\n", "app.rb", &AnalyzeOptions::default());
        assert!(!outcome.ast_supported);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn suppression_on_same_line() {
        let outcome = engine().analyze(
            "eval(x); // codeguard-ignore\n",
            "a.js",
            &AnalyzeOptions::default(),
        );
        assert!(outcome.violations.iter().all(|v| v.rule_id != "js-sec-001"));
    }

    #[test]
    fn suppression_on_preceding_line() {
        let source = "// eslint-disable\neval(x);\n";
        let outcome = engine().analyze(source, "a.js", &AnalyzeOptions::default());
        assert!(outcome.violations.iter().all(|v| v.rule_id != "js-sec-001"));

        let unsuppressed = engine().analyze("eval(x);\n", "a.js", &AnalyzeOptions::default());
        assert!(unsuppressed.violations.iter().any(|v| v.rule_id == "js-sec-001"));
    }

    #[test]
    fn category_filter_limits_rules() {
        let source = "var x = 1;\neval(x);\n";
        let opts = AnalyzeOptions {
            categories: Some(vec![RuleCategory::Security]),
            ..Default::default()
        };
        let outcome = engine().analyze(source, "a.js", &opts);
        assert!(outcome.violations.iter().any(|v| v.rule_id == "js-sec-001"));
        assert!(outcome.violations.iter().all(|v| v.rule_id != "js-bp-001"));
    }

    #[test]
    fn hardcoded_secret_in_python() {
        let source = "api_key = \"sk_live_abcdefghij\"\n";
        let outcome = engine().analyze(source, "config.py", &AnalyzeOptions::default());
        assert!(outcome.violations.iter().any(|v| v.rule_id == "py-sec-004"));
    }

    #[test]
    fn snippet_is_bounded() {
        let long = format!("eval({});\n", "x".repeat(400));
        let outcome = engine().analyze(&long, "a.js", &AnalyzeOptions::default());
        let v = outcome
            .violations
            .iter()
            .find(|v| v.rule_id == "js-sec-001")
            .unwrap();
        assert!(v.snippet.chars().count() <= 120);
    }

    #[test]
    fn timing_fields_populated() {
        let outcome = engine().analyze("const x = 1;\n", "a.js", &AnalyzeOptions::default());
        assert!(outcome.error.is_none());
        // Zero is legal on fast machines; the fields just have to be set.
        let _ = outcome.parse_time_ms + outcome.query_time_ms;
        assert!(outcome.rules_checked > 0);
    }
}
