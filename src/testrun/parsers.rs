//! Per-language parsing of captured test output into structured failures.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::{ProjectType, TestFailure};

static NODE_STACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"at .*\(([^()\s]+):(\d+):\d+\)").unwrap());
static NODE_BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*●\s+(.*)").unwrap());
static PY_FAILED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FAILED\s+(\S+?)::(\S+)").unwrap());
static PY_TRACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).unwrap());
static JAVA_RUNNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Running ([A-Za-z_][\w.]*)").unwrap());
static JAVA_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Tests run: \d+, Failures: ([1-9]\d*)").unwrap());
static GO_FAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"--- FAIL: (\S+)").unwrap());
static GO_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([\w./\-]+\.go):(\d+)").unwrap());
static GENERIC_SIGNAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(error|fail)").unwrap());
static GENERIC_LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w./\\\-]+\.\w+):(\d+)").unwrap());

/// Parse the combined stdout+stderr of a test run. Failures are deduplicated
/// by `(file, line)`.
pub fn parse_failures(output: &str, project_type: ProjectType) -> Vec<TestFailure> {
    let failures = match project_type {
        ProjectType::Node => parse_node(output),
        ProjectType::Python => parse_python(output),
        ProjectType::Java => parse_java(output),
        ProjectType::Go => parse_go(output),
        _ => parse_generic(output),
    };
    dedupe(failures)
}

fn dedupe(failures: Vec<TestFailure>) -> Vec<TestFailure> {
    let mut seen = HashSet::new();
    failures
        .into_iter()
        .filter(|f| seen.insert((f.file.clone(), f.line)))
        .collect()
}

/// Jest-style output: `● <test>` opens a failure block, the first stack
/// frame with `at … (file:line:col)` pins the location.
fn parse_node(output: &str) -> Vec<TestFailure> {
    let mut failures = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if let Some(caps) = NODE_BULLET.captures(line) {
            current = Some(caps[1].trim().to_string());
            continue;
        }
        if let Some(message) = current.clone() {
            if let Some(caps) = NODE_STACK.captures(line) {
                failures.push(TestFailure {
                    file: caps[1].to_string(),
                    line: caps[2].parse().unwrap_or(0),
                    message,
                });
                current = None;
            }
        }
    }

    if failures.is_empty() {
        return parse_generic(output);
    }
    failures
}

fn parse_python(output: &str) -> Vec<TestFailure> {
    let mut failures = Vec::new();
    let lines: Vec<&str> = output.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = PY_FAILED.captures(line) {
            failures.push(TestFailure {
                file: caps[1].to_string(),
                line: 0,
                message: format!("FAILED {}", &caps[2]),
            });
        }
        if let Some(caps) = PY_TRACE.captures(line) {
            let message = lines
                .get(idx + 1)
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .unwrap_or("test failure in traceback")
                .to_string();
            failures.push(TestFailure {
                file: caps[1].to_string(),
                line: caps[2].parse().unwrap_or(0),
                message,
            });
        }
    }

    failures
}

/// Surefire summary lines; the source file is derived from the dotted class
/// name of the nearest preceding `Running <Class>` line.
fn parse_java(output: &str) -> Vec<TestFailure> {
    let mut failures = Vec::new();
    let mut current_class: Option<String> = None;

    for line in output.lines() {
        if let Some(caps) = JAVA_RUNNING.captures(line) {
            current_class = Some(caps[1].to_string());
        }
        if JAVA_SUMMARY.captures(line).is_some() {
            let file = current_class
                .as_deref()
                .map(|class| format!("{}.java", class.replace('.', "/")))
                .unwrap_or_default();
            failures.push(TestFailure {
                file,
                line: 0,
                message: line.trim().to_string(),
            });
        }
    }

    failures
}

fn parse_go(output: &str) -> Vec<TestFailure> {
    let mut failures = Vec::new();
    let mut current: Option<String> = None;

    for line in output.lines() {
        if let Some(caps) = GO_FAIL.captures(line) {
            current = Some(caps[1].to_string());
            continue;
        }
        if let Some(test_name) = current.clone() {
            if let Some(caps) = GO_LOCATION.captures(line) {
                let rest = line
                    .splitn(3, ':')
                    .nth(2)
                    .map(|m| m.trim())
                    .filter(|m| !m.is_empty());
                failures.push(TestFailure {
                    file: caps[1].to_string(),
                    line: caps[2].parse().unwrap_or(0),
                    message: match rest {
                        Some(m) => format!("{}: {}", test_name, m),
                        None => test_name,
                    },
                });
                current = None;
            }
        }
    }

    failures
}

/// Last resort: any error/fail line that carries a `file.ext:line` location.
fn parse_generic(output: &str) -> Vec<TestFailure> {
    let mut failures = Vec::new();
    for line in output.lines() {
        if !GENERIC_SIGNAL.is_match(line) {
            continue;
        }
        if let Some(caps) = GENERIC_LOCATION.captures(line) {
            failures.push(TestFailure {
                file: caps[1].to_string(),
                line: caps[2].parse().unwrap_or(0),
                message: line.trim().to_string(),
            });
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_jest_failure_block() {
        let output = r#"
 FAIL  src/math.test.js
  ● adds numbers

    expect(received).toBe(expected)

      at Object.<anonymous> (src/math.test.js:12:15)
"#;
        let failures = parse_failures(output, ProjectType::Node);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, "src/math.test.js");
        assert_eq!(failures[0].line, 12);
        assert_eq!(failures[0].message, "adds numbers");
    }

    #[test]
    fn python_failed_and_traceback() {
        let output = r#"
FAILED tests/test_app.py::test_login - AssertionError
  File "app/views.py", line 44
    assert user is not None
"#;
        let failures = parse_failures(output, ProjectType::Python);
        assert!(failures.iter().any(|f| f.file == "tests/test_app.py" && f.line == 0));
        let trace = failures.iter().find(|f| f.file == "app/views.py").unwrap();
        assert_eq!(trace.line, 44);
    }

    #[test]
    fn java_class_becomes_path() {
        let output = r#"
Running com.example.AppTest
Tests run: 3, Failures: 1, Errors: 0, Skipped: 0
"#;
        let failures = parse_failures(output, ProjectType::Java);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, "com/example/AppTest.java");
        assert!(failures[0].message.contains("Failures: 1"));
    }

    #[test]
    fn java_all_passing_yields_nothing() {
        let output = "Running com.example.AppTest\nTests run: 3, Failures: 0, Errors: 0\n";
        assert!(parse_failures(output, ProjectType::Java).is_empty());
    }

    #[test]
    fn go_fail_with_location() {
        let output = r#"
--- FAIL: TestAdd
    math_test.go:17: got 3, want 4
FAIL
"#;
        let failures = parse_failures(output, ProjectType::Go);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, "math_test.go");
        assert_eq!(failures[0].line, 17);
        assert!(failures[0].message.contains("TestAdd"));
    }

    #[test]
    fn generic_extracts_file_line() {
        let output = "Error: something broke at lib/core.rb:88\nall good here\n";
        let failures = parse_failures(output, ProjectType::Unknown);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].file, "lib/core.rb");
        assert_eq!(failures[0].line, 88);
    }

    #[test]
    fn duplicates_collapse_by_file_line() {
        let output = "error at a.js:1\nfailure at a.js:1\n";
        let failures = parse_failures(output, ProjectType::Unknown);
        assert_eq!(failures.len(), 1);
    }
}
