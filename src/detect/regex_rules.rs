//! Line-oriented regex detection.
//!
//! The parallel detector: used for languages without a grammar, as the
//! fallback when a grammar fails, and as the fast path for inline PR
//! analysis. The catalog is fixed and compiled once.

use std::sync::LazyLock;

use regex::Regex;
use tracing::error;

use super::ast::{DetectedViolation, is_suppressed};
use crate::model::{BugKind, RuleCategory, Severity};
use crate::util::truncate_str;

#[derive(Debug, Clone, Copy)]
pub struct RegexRule {
    pub id: &'static str,
    pub name: &'static str,
    pub pattern: &'static str,
    pub message: &'static str,
    pub bug_type: BugKind,
    pub severity: Severity,
    pub category: RuleCategory,
}

use BugKind::{Indentation, Linting, Logic};
use RuleCategory::{BestPractice, Security, Style};
use Severity::{Critical, Info, Warning};

macro_rules! rule {
    ($id:expr, $name:expr, $pat:expr, $msg:expr, $kind:expr, $sev:expr, $cat:expr) => {
        RegexRule {
            id: $id,
            name: $name,
            pattern: $pat,
            message: $msg,
            bug_type: $kind,
            severity: $sev,
            category: $cat,
        }
    };
}

#[rustfmt::skip]
pub static CATALOG: &[RegexRule] = &[
    // Secrets
    rule!("rx-secret-001", "hardcoded-api-key", r#"(?i)(api[_-]?key|apikey)\s*[:=]\s*["'][A-Za-z0-9_\-]{8,}["']"#, "hardcoded API key", Logic, Critical, Security),
    rule!("rx-secret-002", "hardcoded-password", r#"(?i)(password|passwd|pwd)\s*[:=]\s*["'][^"']{4,}["']"#, "hardcoded password", Logic, Critical, Security),
    rule!("rx-secret-003", "hardcoded-token", r#"(?i)(secret|token)\s*[:=]\s*["'][A-Za-z0-9_\-.]{8,}["']"#, "hardcoded secret or token", Logic, Critical, Security),
    rule!("rx-secret-004", "live-payment-key", r"sk_live_[A-Za-z0-9]{8,}", "live payment secret key committed", Logic, Critical, Security),
    rule!("rx-secret-005", "aws-access-key", r"AKIA[0-9A-Z]{16}", "AWS access key id committed", Logic, Critical, Security),
    rule!("rx-secret-006", "private-key-material", r"-----BEGIN (RSA |EC |OPENSSH )?PRIVATE KEY-----", "private key material committed", Logic, Critical, Security),
    rule!("rx-secret-007", "forge-pat", r"ghp_[A-Za-z0-9]{36}", "personal access token committed", Logic, Critical, Security),
    rule!("rx-secret-008", "hardcoded-basic-auth", r#"(?i)authorization["']?\s*[:=]\s*["']Basic [A-Za-z0-9+/=]+["']"#, "hardcoded basic-auth header", Logic, Critical, Security),
    // Weak crypto
    rule!("rx-crypto-001", "weak-hash-node", r#"(?i)createHash\(\s*["'](md5|sha1)["']\s*\)"#, "MD5/SHA-1 are broken for security purposes", Logic, Warning, Security),
    rule!("rx-crypto-002", "weak-hash-python", r"(?i)hashlib\.(md5|sha1)\b", "MD5/SHA-1 are broken for security purposes", Logic, Warning, Security),
    rule!("rx-crypto-003", "weak-digest-java", r#"MessageDigest\.getInstance\(\s*"(MD5|SHA-?1)""#, "MD5/SHA-1 are broken for security purposes", Logic, Warning, Security),
    rule!("rx-crypto-004", "weak-hash-go", r"\b(md5|sha1)\.New\(\)", "MD5/SHA-1 are broken for security purposes", Logic, Warning, Security),
    rule!("rx-crypto-005", "weak-cipher", r#"(?i)Cipher\.getInstance\("(DES|RC4)"#, "weak cipher", Logic, Warning, Security),
    rule!("rx-crypto-006", "ecb-mode", r"(?i)/ECB/", "ECB mode leaks plaintext structure", Logic, Warning, Security),
    // Insecure random
    rule!("rx-rand-001", "math-random", r"Math\.random\(\)", "Math.random is not cryptographically secure", Logic, Warning, Security),
    rule!("rx-rand-002", "python-random", r"\brandom\.(random|randint|choice)\(", "random module is not cryptographically secure", Logic, Warning, Security),
    rule!("rx-rand-003", "java-random", r"new Random\(\)", "java.util.Random is not cryptographically secure", Logic, Warning, Security),
    rule!("rx-rand-004", "go-mathrand", r"\brand\.(Intn|Int31|Float64)\(", "math/rand is not cryptographically secure", Logic, Warning, Security),
    // TLS disabled
    rule!("rx-ssl-001", "tls-reject-unauthorized", r"rejectUnauthorized\s*:\s*false", "TLS certificate verification disabled", Logic, Critical, Security),
    rule!("rx-ssl-002", "requests-verify-false", r"(?i)verify\s*=\s*False", "TLS certificate verification disabled", Logic, Critical, Security),
    rule!("rx-ssl-003", "insecure-skip-verify", r"InsecureSkipVerify\s*:\s*true", "TLS certificate verification disabled", Logic, Critical, Security),
    rule!("rx-ssl-004", "node-tls-env", r"NODE_TLS_REJECT_UNAUTHORIZED", "process-wide TLS verification override", Logic, Critical, Security),
    // XSS
    rule!("rx-xss-001", "inner-html", r"\.innerHTML\s*=", "assigning to innerHTML enables XSS", Logic, Warning, Security),
    rule!("rx-xss-002", "document-write", r"document\.write\(", "document.write enables XSS", Logic, Warning, Security),
    rule!("rx-xss-003", "dangerously-set-inner-html", r"dangerouslySetInnerHTML", "dangerouslySetInnerHTML bypasses React escaping", Logic, Warning, Security),
    rule!("rx-xss-004", "outer-html", r"\.outerHTML\s*=", "assigning to outerHTML enables XSS", Logic, Warning, Security),
    // Dynamic code execution
    rule!("rx-eval-001", "eval-call", r"\beval\(", "eval() executes arbitrary strings as code", Logic, Critical, Security),
    rule!("rx-eval-002", "function-constructor", r"new Function\(", "new Function() is eval in disguise", Logic, Critical, Security),
    rule!("rx-eval-003", "os-system", r"os\.system\(", "os.system runs shell commands", Logic, Critical, Security),
    rule!("rx-eval-004", "subprocess-shell", r"subprocess\.(call|run|Popen)\([^)]*shell\s*=\s*True", "shell=True enables command injection", Logic, Critical, Security),
    rule!("rx-eval-005", "pickle-load", r"pickle\.loads?\(", "unpickling untrusted data executes code", Logic, Critical, Security),
    rule!("rx-eval-006", "yaml-load", r"yaml\.load\(", "yaml.load without SafeLoader deserializes arbitrary objects", Logic, Warning, Security),
    // SQL injection
    rule!("rx-sqli-001", "sql-concat", r#"(?i)["'](SELECT|INSERT INTO|UPDATE|DELETE FROM)[^"']*["']\s*\+"#, "SQL built by string concatenation", Logic, Critical, Security),
    rule!("rx-sqli-002", "sql-fstring", r#"(?i)execute\(\s*f["'](select|insert|update|delete)"#, "SQL built from an f-string", Logic, Critical, Security),
    rule!("rx-sqli-003", "sql-template", r#"(?i)query\(\s*[`"'][^`"']*\$\{"#, "SQL built from a template literal", Logic, Critical, Security),
    // Command injection
    rule!("rx-cmd-001", "exec-concat", r#"exec(Sync)?\([^)]*(\+|\$\{)"#, "shell command built from dynamic input", Logic, Critical, Security),
    rule!("rx-cmd-002", "runtime-exec", r"Runtime\.getRuntime\(\)\.exec\(", "Runtime.exec runs shell commands", Logic, Critical, Security),
    // CORS
    rule!("rx-cors-001", "cors-wildcard", r#"Access-Control-Allow-Origin["']?\s*[,:]\s*["']\*"#, "CORS wildcard allows any origin", Logic, Warning, Security),
    // Debug statements
    rule!("rx-debug-001", "console-log", r"console\.(log|debug|info)\(", "console output left in code", Linting, Info, Style),
    rule!("rx-debug-002", "debugger-statement", r"\bdebugger\b", "debugger statement left in code", Linting, Warning, Style),
    rule!("rx-debug-003", "print-call", r"^\s*print\(", "print left in code", Linting, Info, Style),
    rule!("rx-debug-004", "system-out", r"System\.out\.print", "System.out left in code", Linting, Info, Style),
    rule!("rx-debug-005", "pdb-set-trace", r"pdb\.set_trace\(", "debugger breakpoint left in code", Linting, Warning, Style),
    rule!("rx-debug-006", "fmt-println", r"fmt\.Println\(", "fmt.Println left in code", Linting, Info, Style),
    // Markers
    rule!("rx-todo-001", "todo-marker", r"(?i)\b(TODO|FIXME|XXX|HACK)\b", "unresolved marker comment", Linting, Info, Style),
    // Swallowed errors
    rule!("rx-catch-001", "empty-catch", r"catch\s*(\([^)]*\))?\s*\{\s*\}", "empty catch block swallows errors", Logic, Warning, BestPractice),
    rule!("rx-catch-002", "except-pass", r"except[^:]*:\s*pass\s*$", "exception silently swallowed", Logic, Warning, BestPractice),
    // Style
    rule!("rx-style-001", "var-declaration", r"^\s*var\s+\w", "use let or const instead of var", Linting, Info, Style),
    rule!("rx-style-002", "loose-equality", r"[^=!<>]==[^=]", "use === to avoid coercion surprises", Linting, Info, Style),
    rule!("rx-style-003", "http-url", r#"["']http://[^"']+["']"#, "plaintext http URL", Linting, Info, Style),
    rule!("rx-indent-001", "mixed-indentation", r"^( +\t|\t+ )", "mixed tabs and spaces in indentation", Indentation, Warning, Style),
];

static COMPILED: LazyLock<Vec<(&'static RegexRule, Regex)>> = LazyLock::new(|| {
    CATALOG
        .iter()
        .filter_map(|rule| match Regex::new(rule.pattern) {
            Ok(re) => Some((rule, re)),
            Err(e) => {
                error!(rule = rule.id, error = %e, "regex rule failed to compile");
                None
            }
        })
        .collect()
});

/// Scan one file line-by-line against the full catalog. Suppression markers
/// behave the same as in the AST engine.
pub fn scan(source: &str, filename: &str) -> Vec<DetectedViolation> {
    let lines: Vec<&str> = source.lines().collect();
    let mut violations = Vec::new();

    for (row, line) in lines.iter().enumerate() {
        if is_suppressed(&lines, row) {
            continue;
        }
        for (rule, re) in COMPILED.iter() {
            if let Some(m) = re.find(line) {
                violations.push(DetectedViolation {
                    rule_id: rule.id.to_string(),
                    rule_name: rule.name.to_string(),
                    category: rule.category,
                    severity: rule.severity,
                    message: rule.message.to_string(),
                    file: filename.to_string(),
                    line: row as u32 + 1,
                    column: m.start() as u32 + 1,
                    end_line: row as u32 + 1,
                    end_column: m.end() as u32 + 1,
                    snippet: truncate_str(m.as_str(), 120),
                    line_text: line.trim().to_string(),
                    engine: "regex",
                    bug_hint: Some(rule.bug_type),
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_compiles_completely() {
        assert_eq!(COMPILED.len(), CATALOG.len());
        assert!(CATALOG.len() >= 50);
    }

    #[test]
    fn finds_secret_and_weak_hash() {
        let source = concat!(
            "const api_key = \"sk_live_abcdefghij\";\n",
            "crypto.createHash('md5')\n",
        );
        let found = scan(source, "app.js");
        assert!(found.iter().any(|v| v.rule_id == "rx-secret-004"));
        assert!(found.iter().any(|v| v.rule_id == "rx-crypto-001"));
        assert!(found.iter().all(|v| v.engine == "regex"));
    }

    #[test]
    fn suppression_marker_silences_line() {
        let source = "eval(x); // noqa\n";
        assert!(scan(source, "a.js").is_empty());
        let source = "# codeguard-ignore\neval(x)\n";
        assert!(scan(source, "a.py").is_empty());
    }

    #[test]
    fn loose_equality_skips_strict() {
        let found = scan("if (a === b) {}\n", "a.js");
        assert!(found.iter().all(|v| v.rule_id != "rx-style-002"));
        let found = scan("if (a == b) {}\n", "a.js");
        assert!(found.iter().any(|v| v.rule_id == "rx-style-002"));
    }

    #[test]
    fn line_numbers_are_one_based() {
        let source = "const ok = 1;\nconst password = \"hunter22\";\n";
        let found = scan(source, "a.js");
        let v = found.iter().find(|v| v.rule_id == "rx-secret-002").unwrap();
        assert_eq!(v.line, 2);
        assert_eq!(v.end_line, 2);
    }

    #[test]
    fn bug_hints_are_carried() {
        let found = scan("\t  mixed();\n", "a.py");
        let v = found.iter().find(|v| v.rule_id == "rx-indent-001").unwrap();
        assert_eq!(v.bug_hint, Some(BugKind::Indentation));
    }
}
