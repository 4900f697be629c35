//! Whole-repository static analysis.
//!
//! Walks a working tree, runs the AST engine per file with the regex
//! detector as fallback, and classifies every raw finding into a typed
//! `Issue` the orchestrator can act on.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::detect::{AnalyzeOptions, AstEngine, regex_rules};
use crate::detect::classify;
use crate::detect::grammar::Language;
use crate::model::{Issue, IssueSource, RuleCategory};
use crate::testrun::SKIP_DIRS;
use crate::util::file_extension;

const ANALYZER_MAX_DEPTH: usize = 10;

pub struct RepoAnalyzer {
    engine: AstEngine,
}

impl RepoAnalyzer {
    pub fn new() -> Self {
        Self {
            engine: AstEngine::new(),
        }
    }

    /// Analyze every non-test source file under `root`.
    pub fn analyze(&self, root: &Path) -> Vec<Issue> {
        let mut files = Vec::new();
        collect_source_files(root, root, 0, &mut files);
        files.sort();

        let mut issues = Vec::new();
        for path in &files {
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            issues.extend(self.analyze_file(&content, &rel));
        }

        info!(files = files.len(), issues = issues.len(), "repository analysis complete");
        issues
    }

    /// Analyze one file's content. AST first; the regex detector takes over
    /// when the language is unsupported or the grammar failed.
    pub fn analyze_file(&self, content: &str, filename: &str) -> Vec<Issue> {
        let opts = AnalyzeOptions {
            categories: Some(RuleCategory::ALL.to_vec()),
            ..Default::default()
        };
        let outcome = self.engine.analyze(content, filename, &opts);

        if outcome.violations.is_empty() && (!outcome.ast_supported || outcome.error.is_some()) {
            if let Some(error) = &outcome.error {
                debug!(file = filename, error = %error, "AST failed, using regex fallback");
            }
            return regex_rules::scan(content, filename)
                .iter()
                .map(|v| classify::to_issue(v, IssueSource::Regex))
                .collect();
        }

        outcome
            .violations
            .iter()
            .map(|v| classify::to_issue(v, IssueSource::Ast))
            .collect()
    }
}

impl Default for RepoAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// A path that looks like test code is excluded from healing analysis.
fn looks_like_test(path: &Path) -> bool {
    let lower = path.to_string_lossy().to_lowercase();
    lower.contains("test") || lower.contains("spec") || lower.contains("__tests__")
}

fn collect_source_files(root: &Path, dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > ANALYZER_MAX_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if path.is_dir() {
            if SKIP_DIRS.contains(&name) || name.starts_with('.') {
                continue;
            }
            collect_source_files(root, &path, depth + 1, out);
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(&path);
        if looks_like_test(rel) {
            continue;
        }
        let analyzable = file_extension(&path)
            .map(|ext| Language::from_extension(&ext).is_some() || is_textual(&ext))
            .unwrap_or(false);
        if analyzable {
            out.push(path);
        }
    }
}

/// Extensions without a grammar that the regex detector still understands.
fn is_textual(ext: &str) -> bool {
    matches!(ext, "rb" | "php" | "sh" | "yml" | "yaml" | "rs" | "kt" | "swift" | "cpp" | "cc")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BugKind;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn ast_issues_for_supported_language() {
        let analyzer = RepoAnalyzer::new();
        let issues = analyzer.analyze_file("const out = eval(input);\n", "src/app.js");
        assert!(!issues.is_empty());
        assert!(issues.iter().all(|i| i.source == IssueSource::Ast));
        assert!(issues.iter().any(|i| i.bug_type == BugKind::Logic));
    }

    #[test]
    fn regex_fallback_for_unsupported_language() {
        let analyzer = RepoAnalyzer::new();
        let issues = analyzer.analyze_file("password = \"hunter22\"\n", "config.rb");
        assert!(!issues.is_empty());
        assert!(issues.iter().all(|i| i.source == IssueSource::Regex));
    }

    #[test]
    fn walk_skips_tests_and_vendored_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("src/app.js"), "eval(x);\n").unwrap();
        fs::write(dir.path().join("src/app.test.js"), "eval(x);\n").unwrap();
        fs::write(dir.path().join("node_modules/x/y.js"), "eval(x);\n").unwrap();

        let analyzer = RepoAnalyzer::new();
        let issues = analyzer.analyze(dir.path());
        assert!(!issues.is_empty());
        assert!(issues.iter().all(|i| i.file == "src/app.js"));
    }

    #[test]
    fn clean_repo_yields_no_issues() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.js"), "const x = 1;\n").unwrap();
        let analyzer = RepoAnalyzer::new();
        assert!(analyzer.analyze(dir.path()).is_empty());
    }

    #[test]
    fn s2_secret_and_md5_classified_logic() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("app.js"),
            "const api_key = \"sk_live_abcdefghij\";\ncrypto.createHash('md5')\n",
        )
        .unwrap();
        let analyzer = RepoAnalyzer::new();
        let issues = analyzer.analyze(dir.path());
        assert!(issues.len() >= 2);
        assert!(issues.iter().all(|i| i.bug_type == BugKind::Logic));
    }
}
