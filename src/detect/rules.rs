//! Embedded rule catalog for the AST engine.
//!
//! The catalog is data, not code: each rule is a value carrying its
//! tree-sitter query source. Queries are compiled (and vetted) at startup;
//! a rule that fails compilation is excluded from live scans, never allowed
//! to take the engine down.

use anyhow::Result;
use tree_sitter::Query;

use super::grammar::Language;
use crate::model::{Rule, RuleCategory, Severity};

/// One catalog entry. The `@target` capture marks the node a violation is
/// reported on; when absent the first capture is used.
#[derive(Debug, Clone, Copy)]
pub struct QueryRule {
    pub id: &'static str,
    pub name: &'static str,
    pub category: RuleCategory,
    pub severity: Severity,
    pub message: &'static str,
    pub query: &'static str,
}

use RuleCategory::{BestPractice, Naming, Security, Style};
use Severity::{Critical, Info, Warning};

static JS_RULES: &[QueryRule] = &[
    QueryRule {
        id: "js-sec-001",
        name: "no-eval",
        category: Security,
        severity: Critical,
        message: "eval() executes arbitrary strings as code",
        query: r#"(call_expression function: (identifier) @target (#eq? @target "eval"))"#,
    },
    QueryRule {
        id: "js-sec-002",
        name: "no-function-constructor",
        category: Security,
        severity: Critical,
        message: "new Function() is eval in disguise",
        query: r#"(new_expression constructor: (identifier) @target (#eq? @target "Function"))"#,
    },
    QueryRule {
        id: "js-sec-003",
        name: "no-hardcoded-secret",
        category: Security,
        severity: Critical,
        message: "credential-looking value assigned from a string literal",
        query: r#"(variable_declarator
  name: (identifier) @name
  value: (string) @target
  (#match? @name "(?i)(secret|password|passwd|api_?key|token)"))"#,
    },
    QueryRule {
        id: "js-sec-004",
        name: "no-inner-html",
        category: Security,
        severity: Warning,
        message: "assigning to innerHTML enables XSS",
        query: r#"(assignment_expression
  left: (member_expression property: (property_identifier) @prop)
  right: (_) @target
  (#eq? @prop "innerHTML"))"#,
    },
    QueryRule {
        id: "js-sec-005",
        name: "no-document-write",
        category: Security,
        severity: Warning,
        message: "document.write enables XSS",
        query: r#"(call_expression
  function: (member_expression
    object: (identifier) @obj
    property: (property_identifier) @prop) @target
  (#eq? @obj "document")
  (#eq? @prop "write"))"#,
    },
    QueryRule {
        id: "js-sec-006",
        name: "no-child-process-exec",
        category: Security,
        severity: Critical,
        message: "exec/execSync runs shell commands; prefer execFile",
        query: r#"(call_expression
  function: (member_expression property: (property_identifier) @prop) @target
  (#match? @prop "^(exec|execSync)$"))"#,
    },
    QueryRule {
        id: "js-sec-007",
        name: "no-weak-hash",
        category: Security,
        severity: Warning,
        message: "MD5/SHA-1 are broken for security purposes",
        query: r#"(call_expression
  function: (member_expression property: (property_identifier) @prop)
  arguments: (arguments (string (string_fragment) @target))
  (#eq? @prop "createHash")
  (#match? @target "^(md5|sha1)$"))"#,
    },
    QueryRule {
        id: "js-bp-001",
        name: "no-var",
        category: BestPractice,
        severity: Info,
        message: "use let or const instead of var",
        query: r#"(variable_declaration "var" @target)"#,
    },
    QueryRule {
        id: "js-bp-002",
        name: "eqeqeq",
        category: BestPractice,
        severity: Warning,
        message: "use === to avoid coercion surprises",
        query: r#"(binary_expression operator: "==") @target"#,
    },
    QueryRule {
        id: "js-bp-003",
        name: "no-empty-catch",
        category: BestPractice,
        severity: Warning,
        message: "empty catch block swallows errors",
        query: r#"(catch_clause body: (statement_block) @target (#match? @target "^\\{\\s*\\}$"))"#,
    },
    QueryRule {
        id: "js-style-001",
        name: "no-console",
        category: Style,
        severity: Info,
        message: "console.log left in production code",
        query: r#"(call_expression
  function: (member_expression
    object: (identifier) @obj
    property: (property_identifier) @prop) @target
  (#eq? @obj "console")
  (#eq? @prop "log"))"#,
    },
    QueryRule {
        id: "js-style-002",
        name: "no-debugger",
        category: Style,
        severity: Warning,
        message: "debugger statement left in code",
        query: r#"(debugger_statement) @target"#,
    },
    QueryRule {
        id: "js-naming-001",
        name: "camelcase-functions",
        category: Naming,
        severity: Info,
        message: "function names should be camelCase",
        query: r#"(function_declaration name: (identifier) @target (#match? @target "_"))"#,
    },
];

/// TypeScript runs the JS-shaped rules (the TS grammar is a superset) plus
/// type-level checks.
static TS_RULES: &[QueryRule] = &[
    QueryRule {
        id: "ts-sec-001",
        name: "no-eval",
        category: Security,
        severity: Critical,
        message: "eval() executes arbitrary strings as code",
        query: r#"(call_expression function: (identifier) @target (#eq? @target "eval"))"#,
    },
    QueryRule {
        id: "ts-sec-002",
        name: "no-hardcoded-secret",
        category: Security,
        severity: Critical,
        message: "credential-looking value assigned from a string literal",
        query: r#"(variable_declarator
  name: (identifier) @name
  value: (string) @target
  (#match? @name "(?i)(secret|password|passwd|api_?key|token)"))"#,
    },
    QueryRule {
        id: "ts-sec-003",
        name: "no-inner-html",
        category: Security,
        severity: Warning,
        message: "assigning to innerHTML enables XSS",
        query: r#"(assignment_expression
  left: (member_expression property: (property_identifier) @prop)
  right: (_) @target
  (#eq? @prop "innerHTML"))"#,
    },
    QueryRule {
        id: "ts-bp-001",
        name: "no-explicit-any",
        category: BestPractice,
        severity: Info,
        message: "explicit any defeats the type checker",
        query: r#"((predefined_type) @target (#eq? @target "any"))"#,
    },
    QueryRule {
        id: "ts-bp-002",
        name: "no-non-null-assertion",
        category: BestPractice,
        severity: Info,
        message: "non-null assertion hides a possible runtime error",
        query: r#"(non_null_expression) @target"#,
    },
    QueryRule {
        id: "ts-style-001",
        name: "no-console",
        category: Style,
        severity: Info,
        message: "console.log left in production code",
        query: r#"(call_expression
  function: (member_expression
    object: (identifier) @obj
    property: (property_identifier) @prop) @target
  (#eq? @obj "console")
  (#eq? @prop "log"))"#,
    },
];

/// TSX-only extras; the TSX rule set is the union of `TS_RULES` and these.
static TSX_EXTRA_RULES: &[QueryRule] = &[QueryRule {
    id: "tsx-sec-001",
    name: "no-dangerously-set-inner-html",
    category: Security,
    severity: Critical,
    message: "dangerouslySetInnerHTML bypasses React escaping",
    query: r#"(jsx_attribute
  (property_identifier) @target
  (#eq? @target "dangerouslySetInnerHTML"))"#,
}];

static PYTHON_RULES: &[QueryRule] = &[
    QueryRule {
        id: "py-sec-001",
        name: "no-eval-exec",
        category: Security,
        severity: Critical,
        message: "eval/exec executes arbitrary strings as code",
        query: r#"(call function: (identifier) @target (#match? @target "^(eval|exec)$"))"#,
    },
    QueryRule {
        id: "py-sec-002",
        name: "no-os-system",
        category: Security,
        severity: Critical,
        message: "os.system runs shell commands; prefer subprocess with a list",
        query: r#"(call
  function: (attribute
    object: (identifier) @obj
    attribute: (identifier) @attr) @target
  (#eq? @obj "os")
  (#eq? @attr "system"))"#,
    },
    QueryRule {
        id: "py-sec-003",
        name: "no-pickle-load",
        category: Security,
        severity: Critical,
        message: "unpickling untrusted data executes code",
        query: r#"(call
  function: (attribute
    object: (identifier) @obj
    attribute: (identifier) @attr) @target
  (#eq? @obj "pickle")
  (#match? @attr "^loads?$"))"#,
    },
    QueryRule {
        id: "py-sec-004",
        name: "no-hardcoded-secret",
        category: Security,
        severity: Critical,
        message: "credential-looking value assigned from a string literal",
        query: r#"(assignment
  left: (identifier) @name
  right: (string) @target
  (#match? @name "(?i)(secret|password|passwd|api_?key|token)"))"#,
    },
    QueryRule {
        id: "py-sec-005",
        name: "no-weak-hash",
        category: Security,
        severity: Warning,
        message: "MD5/SHA-1 are broken for security purposes",
        query: r#"(call
  function: (attribute
    object: (identifier) @obj
    attribute: (identifier) @target)
  (#eq? @obj "hashlib")
  (#match? @target "^(md5|sha1)$"))"#,
    },
    QueryRule {
        id: "py-sec-006",
        name: "no-yaml-load",
        category: Security,
        severity: Warning,
        message: "yaml.load without SafeLoader deserializes arbitrary objects",
        query: r#"(call
  function: (attribute
    object: (identifier) @obj
    attribute: (identifier) @attr) @target
  (#eq? @obj "yaml")
  (#eq? @attr "load"))"#,
    },
    QueryRule {
        id: "py-bp-001",
        name: "no-bare-except",
        category: BestPractice,
        severity: Warning,
        message: "bare except catches SystemExit and KeyboardInterrupt",
        query: r#"((except_clause) @target (#match? @target "^except\\s*:"))"#,
    },
    QueryRule {
        id: "py-bp-002",
        name: "no-mutable-default",
        category: BestPractice,
        severity: Warning,
        message: "mutable default argument is shared across calls",
        query: r#"(default_parameter value: (list) @target)"#,
    },
    QueryRule {
        id: "py-style-001",
        name: "no-print",
        category: Style,
        severity: Info,
        message: "print left in production code",
        query: r#"(call function: (identifier) @target (#eq? @target "print"))"#,
    },
];

static JAVA_RULES: &[QueryRule] = &[
    QueryRule {
        id: "java-sec-001",
        name: "no-runtime-exec",
        category: Security,
        severity: Critical,
        message: "Runtime exec runs shell commands",
        query: r#"(method_invocation name: (identifier) @target (#eq? @target "exec"))"#,
    },
    QueryRule {
        id: "java-sec-002",
        name: "no-weak-digest",
        category: Security,
        severity: Warning,
        message: "MD5/SHA-1 are broken for security purposes",
        query: r#"(method_invocation
  name: (identifier) @m
  arguments: (argument_list (string_literal) @target)
  (#eq? @m "getInstance")
  (#match? @target "(MD5|SHA-?1)"))"#,
    },
    QueryRule {
        id: "java-sec-003",
        name: "no-hardcoded-secret",
        category: Security,
        severity: Critical,
        message: "credential-looking value assigned from a string literal",
        query: r#"(variable_declarator
  name: (identifier) @name
  value: (string_literal) @target
  (#match? @name "(?i)(secret|password|passwd|apikey|token)"))"#,
    },
    QueryRule {
        id: "java-style-001",
        name: "no-system-out",
        category: Style,
        severity: Info,
        message: "System.out left in production code; use a logger",
        query: r#"(method_invocation
  object: (field_access
    object: (identifier) @obj
    field: (identifier) @f)
  name: (identifier) @target
  (#eq? @obj "System")
  (#eq? @f "out")
  (#match? @target "^print(ln)?$"))"#,
    },
    QueryRule {
        id: "java-bp-001",
        name: "no-empty-catch",
        category: BestPractice,
        severity: Warning,
        message: "empty catch block swallows exceptions",
        query: r#"(catch_clause body: (block) @target (#match? @target "^\\{\\s*\\}$"))"#,
    },
    QueryRule {
        id: "java-bp-002",
        name: "no-print-stack-trace",
        category: BestPractice,
        severity: Info,
        message: "printStackTrace bypasses the logging pipeline",
        query: r#"(method_invocation name: (identifier) @target (#eq? @target "printStackTrace"))"#,
    },
];

static GO_RULES: &[QueryRule] = &[
    QueryRule {
        id: "go-sec-001",
        name: "no-exec-command",
        category: Security,
        severity: Warning,
        message: "exec.Command with untrusted input enables command injection",
        query: r#"(call_expression
  function: (selector_expression
    operand: (identifier) @pkg
    field: (field_identifier) @fn) @target
  (#eq? @pkg "exec")
  (#eq? @fn "Command"))"#,
    },
    QueryRule {
        id: "go-sec-002",
        name: "no-weak-hash",
        category: Security,
        severity: Warning,
        message: "MD5/SHA-1 are broken for security purposes",
        query: r#"(call_expression
  function: (selector_expression
    operand: (identifier) @pkg
    field: (field_identifier) @fn) @target
  (#match? @pkg "^(md5|sha1)$")
  (#eq? @fn "New"))"#,
    },
    QueryRule {
        id: "go-sec-003",
        name: "no-insecure-skip-verify",
        category: Security,
        severity: Critical,
        message: "InsecureSkipVerify disables TLS certificate checks",
        query: r#"((keyed_element) @target (#match? @target "InsecureSkipVerify:\\s*true"))"#,
    },
    QueryRule {
        id: "go-sec-004",
        name: "no-hardcoded-secret",
        category: Security,
        severity: Critical,
        message: "credential-looking value assigned from a string literal",
        query: r#"(short_var_declaration
  left: (expression_list (identifier) @name)
  right: (expression_list (interpreted_string_literal) @target)
  (#match? @name "(?i)(secret|password|passwd|apikey|token)"))"#,
    },
    QueryRule {
        id: "go-style-001",
        name: "no-fmt-print",
        category: Style,
        severity: Info,
        message: "fmt print left in production code; use a logger",
        query: r#"(call_expression
  function: (selector_expression
    operand: (identifier) @pkg
    field: (field_identifier) @target)
  (#eq? @pkg "fmt")
  (#match? @target "^Print(ln|f)?$"))"#,
    },
];

static C_RULES: &[QueryRule] = &[
    QueryRule {
        id: "c-sec-001",
        name: "no-gets",
        category: Security,
        severity: Critical,
        message: "gets() has no bounds checking; use fgets",
        query: r#"(call_expression function: (identifier) @target (#eq? @target "gets"))"#,
    },
    QueryRule {
        id: "c-sec-002",
        name: "no-unbounded-copy",
        category: Security,
        severity: Critical,
        message: "strcpy/strcat/sprintf overflow without bounds; use the n-variants",
        query: r#"(call_expression function: (identifier) @target (#match? @target "^(strcpy|strcat|sprintf)$"))"#,
    },
    QueryRule {
        id: "c-sec-003",
        name: "no-system",
        category: Security,
        severity: Critical,
        message: "system() runs shell commands",
        query: r#"(call_expression function: (identifier) @target (#eq? @target "system"))"#,
    },
];

/// Rules for a language. TSX is the union of the TS rules and the TSX extras.
pub fn queries_for(language: Language) -> Vec<&'static QueryRule> {
    match language {
        Language::Js => JS_RULES.iter().collect(),
        Language::Ts => TS_RULES.iter().collect(),
        Language::Tsx => TS_RULES.iter().chain(TSX_EXTRA_RULES.iter()).collect(),
        Language::Python => PYTHON_RULES.iter().collect(),
        Language::Java => JAVA_RULES.iter().collect(),
        Language::Go => GO_RULES.iter().collect(),
        Language::C => C_RULES.iter().collect(),
    }
}

/// Rules for a language filtered by category and/or explicit ids.
pub fn filtered_queries(
    language: Language,
    categories: Option<&[RuleCategory]>,
    ids: Option<&[String]>,
) -> Vec<&'static QueryRule> {
    queries_for(language)
        .into_iter()
        .filter(|r| categories.is_none_or(|cats| cats.contains(&r.category)))
        .filter(|r| ids.is_none_or(|ids| ids.iter().any(|id| id == r.id)))
        .collect()
}

pub fn rule_by_id(id: &str) -> Option<&'static QueryRule> {
    Language::ALL
        .iter()
        .flat_map(|lang| queries_for(*lang))
        .find(|r| r.id == id)
}

/// A rule whose query failed to compile against its grammar.
#[derive(Debug)]
pub struct QueryValidationError {
    pub rule_id: &'static str,
    pub language: Language,
    pub error: String,
}

/// Compile every catalog query once. Returns the failures; callers exclude
/// those ids from live scans.
pub fn validate_all() -> Vec<QueryValidationError> {
    let mut failures = Vec::new();
    for language in Language::ALL {
        let grammar = language.grammar();
        for rule in queries_for(language) {
            if let Err(e) = Query::new(&grammar, rule.query) {
                failures.push(QueryValidationError {
                    rule_id: rule.id,
                    language,
                    error: e.to_string(),
                });
            }
        }
    }
    failures
}

/// Compile one rule's query for a language.
pub fn compile(rule: &QueryRule, language: Language) -> Result<Query> {
    Query::new(&language.grammar(), rule.query)
        .map_err(|e| anyhow::anyhow!("query {} failed to compile: {}", rule.id, e))
}

/// The default rule set seeded onto newly created projects: the catalog's
/// security rules, one stored `Rule` per entry.
pub fn default_rule_set() -> Vec<Rule> {
    Language::ALL
        .iter()
        .flat_map(|lang| {
            queries_for(*lang)
                .into_iter()
                .filter(|r| r.category == RuleCategory::Security)
                .map(|r| Rule {
                    id: r.id.to_string(),
                    name: r.name.to_string(),
                    category: r.category,
                    severity: r.severity,
                    language: lang.id().to_string(),
                    pattern: r.query.to_string(),
                    message: r.message.to_string(),
                    is_active: true,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for lang in Language::ALL {
            for rule in queries_for(lang) {
                // TSX shares the TS rules on purpose; same id, same rule.
                if lang == Language::Tsx && rule.id.starts_with("ts-") {
                    continue;
                }
                assert!(seen.insert(rule.id), "duplicate rule id {}", rule.id);
            }
        }
    }

    #[test]
    fn tsx_is_union_of_ts_and_extras() {
        let ts = queries_for(Language::Ts);
        let tsx = queries_for(Language::Tsx);
        assert!(tsx.len() > ts.len());
        for rule in &ts {
            assert!(tsx.iter().any(|r| r.id == rule.id));
        }
        assert!(tsx.iter().any(|r| r.id == "tsx-sec-001"));
    }

    #[test]
    fn every_query_compiles() {
        let failures = validate_all();
        assert!(
            failures.is_empty(),
            "queries failed to compile: {:?}",
            failures
                .iter()
                .map(|f| (f.rule_id, f.error.clone()))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn category_filter_narrows() {
        let security = filtered_queries(Language::Js, Some(&[RuleCategory::Security]), None);
        assert!(!security.is_empty());
        assert!(security.iter().all(|r| r.category == RuleCategory::Security));

        let by_id = filtered_queries(Language::Js, None, Some(&["js-sec-001".to_string()]));
        assert_eq!(by_id.len(), 1);
    }

    #[test]
    fn lookup_by_id() {
        assert!(rule_by_id("py-sec-001").is_some());
        assert!(rule_by_id("nope-000").is_none());
    }

    #[test]
    fn default_rule_set_is_security_only() {
        let seeded = default_rule_set();
        assert!(!seeded.is_empty());
        assert!(seeded.iter().all(|r| r.category == RuleCategory::Security));
        assert!(seeded.iter().any(|r| r.language == "python"));
    }
}
