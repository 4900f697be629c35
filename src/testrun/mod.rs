//! Project-type detection, test discovery, and sandboxed execution.

pub mod parsers;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{GuardError, Result};
use crate::sandbox::{Sandbox, SandboxRun};

/// Directories never descended into during discovery or analysis walks.
pub const SKIP_DIRS: [&str; 8] = [
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
];

const DISCOVERY_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Python,
    Java,
    Go,
    Rust,
    Make,
    Unknown,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Make => "make",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl ProjectType {
    /// Probe marker files in fixed order; first hit wins.
    pub fn detect(root: &Path) -> Self {
        let has = |name: &str| root.join(name).exists();
        if has("package.json") {
            Self::Node
        } else if has("requirements.txt") || has("setup.py") || has("pyproject.toml") || has("Pipfile")
        {
            Self::Python
        } else if has("pom.xml") || has("build.gradle") {
            Self::Java
        } else if has("go.mod") {
            Self::Go
        } else if has("Cargo.toml") {
            Self::Rust
        } else if has("Makefile") {
            Self::Make
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// Outcome of one test-suite run. `raw_output` keeps the full combined
/// stdout+stderr for diagnostics.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub project_type: ProjectType,
    pub test_files: Vec<PathBuf>,
    pub failures: Vec<TestFailure>,
    pub raw_output: String,
    pub exit_code: i64,
    pub timed_out: bool,
    /// False when no test files were discovered and nothing ran.
    pub ran: bool,
}

impl TestReport {
    fn empty(project_type: ProjectType) -> Self {
        Self {
            project_type,
            test_files: Vec::new(),
            failures: Vec::new(),
            raw_output: String::new(),
            exit_code: 0,
            timed_out: false,
            ran: false,
        }
    }
}

fn is_test_file(name: &str, path: &Path, project_type: ProjectType) -> bool {
    let in_dir = |dir: &str| path.components().any(|c| c.as_os_str() == dir);
    match project_type {
        ProjectType::Node => {
            name.contains(".test.") || name.contains(".spec.") || in_dir("__tests__")
        }
        ProjectType::Python => {
            (name.starts_with("test_") || name.ends_with("_test.py")) && name.ends_with(".py")
                || (in_dir("tests") && name.ends_with(".py"))
        }
        ProjectType::Java => name.ends_with("Test.java") || name.ends_with("Tests.java"),
        ProjectType::Go => name.ends_with("_test.go"),
        ProjectType::Rust => in_dir("tests") && name.ends_with(".rs"),
        ProjectType::Make | ProjectType::Unknown => name.to_lowercase().contains("test"),
    }
}

/// Walk the tree up to the depth cap, skipping the fixed exclusion list.
pub fn discover_test_files(root: &Path, project_type: ProjectType) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, root, project_type, 0, &mut found);
    found.sort();
    found
}

fn walk(root: &Path, dir: &Path, project_type: ProjectType, depth: usize, out: &mut Vec<PathBuf>) {
    if depth > DISCOVERY_MAX_DEPTH {
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
            walk(root, &path, project_type, depth + 1, out);
        } else if is_test_file(name, path.strip_prefix(root).unwrap_or(&path), project_type) {
            out.push(path);
        }
    }
}

/// Runs a repository's test suite, preferring the sandbox and falling back
/// to direct execution only when no container runtime is reachable.
pub struct TestRunner {
    sandbox: Option<Sandbox>,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(sandbox: Option<Sandbox>, timeout: Duration) -> Self {
        Self { sandbox, timeout }
    }

    pub async fn run(&self, repo: &Path) -> Result<TestReport> {
        let project_type = ProjectType::detect(repo);
        let test_files = discover_test_files(repo, project_type);
        if test_files.is_empty() {
            info!(%project_type, "no test files discovered, skipping test run");
            return Ok(TestReport::empty(project_type));
        }

        let run = match &self.sandbox {
            Some(sandbox) => sandbox.run_tests(repo, project_type, self.timeout).await?,
            None => {
                warn!(
                    %project_type,
                    "container runtime unavailable, falling back to DIRECT execution"
                );
                self.run_directly(repo, project_type).await?
            }
        };

        let raw_output = run.combined_output();
        let failures = parsers::parse_failures(&raw_output, project_type);

        Ok(TestReport {
            project_type,
            test_files,
            failures,
            raw_output,
            exit_code: run.exit_code,
            timed_out: run.timed_out,
            ran: true,
        })
    }

    async fn run_directly(&self, repo: &Path, project_type: ProjectType) -> Result<SandboxRun> {
        let command = match project_type {
            ProjectType::Node => "npm test --silent",
            ProjectType::Python => "python -m pytest -x -q || python -m unittest discover",
            ProjectType::Java => "mvn -q test",
            ProjectType::Go => "go test ./...",
            ProjectType::Rust => "cargo test --quiet",
            ProjectType::Make => "make test",
            ProjectType::Unknown => "true",
        };

        let child = tokio::process::Command::new("sh")
            .args(["-c", command])
            .current_dir(repo)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GuardError::SandboxFailure(format!("spawn failed: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GuardError::SandboxFailure(format!("wait failed: {}", e)));
            }
            Err(_) => {
                return Ok(SandboxRun {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    timed_out: true,
                });
            }
        };

        Ok(SandboxRun {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1) as i64,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn detection_order_prefers_node() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("requirements.txt"), "").unwrap();
        assert_eq!(ProjectType::detect(dir.path()), ProjectType::Node);
    }

    #[test]
    fn detection_probes_each_marker() {
        let cases = [
            ("requirements.txt", ProjectType::Python),
            ("pyproject.toml", ProjectType::Python),
            ("pom.xml", ProjectType::Java),
            ("go.mod", ProjectType::Go),
            ("Cargo.toml", ProjectType::Rust),
            ("Makefile", ProjectType::Make),
        ];
        for (marker, expected) in cases {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join(marker), "").unwrap();
            assert_eq!(ProjectType::detect(dir.path()), expected, "{}", marker);
        }
        let empty = TempDir::new().unwrap();
        assert_eq!(ProjectType::detect(empty.path()), ProjectType::Unknown);
    }

    #[test]
    fn discovery_finds_node_patterns_and_skips_node_modules() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/__tests__")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(dir.path().join("src/app.test.js"), "").unwrap();
        fs::write(dir.path().join("src/other.spec.ts"), "").unwrap();
        fs::write(dir.path().join("src/__tests__/util.js"), "").unwrap();
        fs::write(dir.path().join("src/app.js"), "").unwrap();
        fs::write(dir.path().join("node_modules/dep/x.test.js"), "").unwrap();

        let found = discover_test_files(dir.path(), ProjectType::Node);
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|p| !p.to_string_lossy().contains("node_modules")));
    }

    #[test]
    fn discovery_go_and_python_patterns() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("math_test.go"), "").unwrap();
        fs::write(dir.path().join("math.go"), "").unwrap();
        assert_eq!(discover_test_files(dir.path(), ProjectType::Go).len(), 1);

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test_app.py"), "").unwrap();
        fs::write(dir.path().join("app.py"), "").unwrap();
        assert_eq!(discover_test_files(dir.path(), ProjectType::Python).len(), 1);
    }

    #[tokio::test]
    async fn no_test_files_short_circuits() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("go.mod"), "module demo\n").unwrap();
        fs::write(dir.path().join("main.go"), "package main\n").unwrap();

        let runner = TestRunner::new(None, Duration::from_secs(5));
        let report = runner.run(dir.path()).await.unwrap();
        assert!(!report.ran);
        assert!(report.failures.is_empty());
        assert_eq!(report.project_type, ProjectType::Go);
    }
}
