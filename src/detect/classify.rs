//! Classification of raw findings into `BugKind`.
//!
//! Total: every input maps to exactly one kind; `Logic` is the floor.

use super::ast::DetectedViolation;
use crate::model::{BugKind, Issue, IssueSource, RuleCategory};

/// Classify a detector violation. Precedence, first match wins:
/// 1. a kind carried by the rule itself,
/// 2. syntax wording,
/// 3. import wording (message or rule name),
/// 4. type wording,
/// 5. indentation wording,
/// 6. style/naming category or lint wording,
/// 7. `Logic`.
pub fn classify(violation: &DetectedViolation) -> BugKind {
    if let Some(kind) = violation.bug_hint {
        return kind;
    }

    let message = violation.message.to_lowercase();
    let rule = violation.rule_name.to_lowercase();

    if contains_any(&message, &["syntax", "unexpected token", "parsing error"]) {
        return BugKind::Syntax;
    }
    if contains_any(&message, &["import", "require", "module not found"])
        || contains_any(&rule, &["import", "require"])
    {
        return BugKind::Import;
    }
    if contains_any(&message, &["type", "undefined", "null reference", "incompatible"]) {
        return BugKind::TypeError;
    }
    if contains_any(&message, &["indent", "whitespace", "tab", "spacing"]) {
        return BugKind::Indentation;
    }
    if matches!(violation.category, RuleCategory::Style | RuleCategory::Naming)
        || contains_any(&message, &["lint", "naming", "convention", "unused"])
    {
        return BugKind::Linting;
    }
    BugKind::Logic
}

/// Classify a CI or test failure message by its wording alone.
pub fn classify_failure_message(message: &str) -> BugKind {
    let lower = message.to_lowercase();
    if lower.contains("syntax") {
        BugKind::Syntax
    } else if contains_any(&lower, &["import", "module"]) {
        BugKind::Import
    } else if contains_any(&lower, &["type", "undefined"]) {
        BugKind::TypeError
    } else if contains_any(&lower, &["indent", "whitespace"]) {
        BugKind::Indentation
    } else if lower.contains("lint") {
        BugKind::Linting
    } else {
        BugKind::Logic
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Promote a detector violation to a classified, immutable `Issue`.
pub fn to_issue(violation: &DetectedViolation, source: IssueSource) -> Issue {
    Issue {
        file: violation.file.clone(),
        line: violation.line,
        bug_type: classify(violation),
        description: violation.message.clone(),
        code_snippet: if violation.snippet.is_empty() {
            violation.line_text.clone()
        } else {
            violation.snippet.clone()
        },
        severity: violation.severity,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn violation(category: RuleCategory, rule_name: &str, message: &str) -> DetectedViolation {
        DetectedViolation {
            rule_id: "t-001".into(),
            rule_name: rule_name.into(),
            category,
            severity: Severity::Warning,
            message: message.into(),
            file: "a.js".into(),
            line: 1,
            column: 1,
            end_line: 1,
            end_column: 2,
            snippet: "x".into(),
            line_text: "x".into(),
            engine: "ast",
            bug_hint: None,
        }
    }

    #[test]
    fn hint_wins_over_wording() {
        let mut v = violation(RuleCategory::Security, "r", "syntax error everywhere");
        v.bug_hint = Some(BugKind::Indentation);
        assert_eq!(classify(&v), BugKind::Indentation);
    }

    #[test]
    fn precedence_order() {
        let v = violation(RuleCategory::Security, "r", "unexpected token near eof");
        assert_eq!(classify(&v), BugKind::Syntax);

        let v = violation(RuleCategory::Security, "broken-import", "cannot resolve");
        assert_eq!(classify(&v), BugKind::Import);

        let v = violation(RuleCategory::Security, "r", "value may be undefined");
        assert_eq!(classify(&v), BugKind::TypeError);

        let v = violation(RuleCategory::Security, "r", "inconsistent whitespace");
        assert_eq!(classify(&v), BugKind::Indentation);

        let v = violation(RuleCategory::Style, "r", "whatever");
        assert_eq!(classify(&v), BugKind::Linting);

        let v = violation(RuleCategory::Security, "r", "unused variable kept");
        assert_eq!(classify(&v), BugKind::Linting);
    }

    #[test]
    fn logic_is_total_fallback() {
        let v = violation(RuleCategory::Security, "r", "");
        assert_eq!(classify(&v), BugKind::Logic);
    }

    #[test]
    fn failure_message_classification() {
        assert_eq!(
            classify_failure_message("SyntaxError: unexpected token"),
            BugKind::Syntax
        );
        assert_eq!(
            classify_failure_message("ModuleNotFoundError: no module named x"),
            BugKind::Import
        );
        assert_eq!(
            classify_failure_message("TypeError: x is undefined"),
            BugKind::TypeError
        );
        assert_eq!(
            classify_failure_message("IndentationError: bad indent"),
            BugKind::Indentation
        );
        assert_eq!(classify_failure_message("lint failed"), BugKind::Linting);
        assert_eq!(classify_failure_message("assertion failed"), BugKind::Logic);
    }

    #[test]
    fn issue_carries_source_and_snippet() {
        let v = violation(RuleCategory::Security, "r", "hardcoded password");
        let issue = to_issue(&v, IssueSource::Regex);
        assert_eq!(issue.source, IssueSource::Regex);
        assert_eq!(issue.code_snippet, "x");
        assert_eq!(issue.bug_type, BugKind::Logic);
    }
}
