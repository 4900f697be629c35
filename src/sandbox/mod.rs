//! Container-isolated test execution.
//!
//! Each run gets a uniquely named container with hard resource caps, the
//! source tree mounted read-only, and a writable tmpfs working directory.
//! Network stays up for the dependency-install phase of the entrypoint; this
//! is a documented risk, the mitigation being pre-installed images.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures_util::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::{GuardError, Result};
use crate::testrun::ProjectType;
use crate::util::to_posix_path;

const MEMORY_LIMIT_BYTES: i64 = 512 * 1024 * 1024;
const NANO_CPUS: i64 = 1_000_000_000; // one core
const PIDS_LIMIT: i64 = 256;
const SOURCE_MOUNT: &str = "/workspace/src";
const RUN_DIR: &str = "/workspace/run";

/// Captured output of one sandboxed run.
#[derive(Debug, Clone)]
pub struct SandboxRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
}

impl SandboxRun {
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Docker-backed sandbox. `connect` returns `None` when no daemon is
/// reachable; callers may then fall back to direct execution, explicitly.
pub struct Sandbox {
    docker: Docker,
}

impl Sandbox {
    pub async fn connect() -> Option<Self> {
        let docker = Docker::connect_with_socket_defaults().ok()?;
        if docker.ping().await.is_err() {
            return None;
        }
        Some(Self { docker })
    }

    pub async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    /// Run the project-type entrypoint against `repo_path` with all caps
    /// enforced. The container is always removed, even after a timeout.
    pub async fn run_tests(
        &self,
        repo_path: &Path,
        project_type: ProjectType,
        timeout: Duration,
    ) -> Result<SandboxRun> {
        let host_path = repo_path
            .canonicalize()
            .map_err(|e| GuardError::SandboxFailure(format!("bad repo path: {}", e)))?;
        let host_path = to_posix_path(&host_path.to_string_lossy());
        let name = format!("codeguard-test-{}", Uuid::new_v4());

        let host_config = HostConfig {
            memory: Some(MEMORY_LIMIT_BYTES),
            nano_cpus: Some(NANO_CPUS),
            pids_limit: Some(PIDS_LIMIT),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            binds: Some(vec![format!("{}:{}:ro", host_path, SOURCE_MOUNT)]),
            tmpfs: Some(HashMap::from([
                (RUN_DIR.to_string(), "rw,size=256m".to_string()),
                ("/tmp".to_string(), "rw,size=64m".to_string()),
                ("/workspace/cache".to_string(), "rw,size=128m".to_string()),
            ])),
            ..Default::default()
        };

        let config = Config {
            image: Some(image_for(project_type).to_string()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                entrypoint_for(project_type).to_string(),
            ]),
            working_dir: Some(RUN_DIR.to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| GuardError::SandboxFailure(format!("create failed: {}", e)))?;

        info!(container = %name, project_type = %project_type, "sandbox container starting");

        let run = self.run_to_completion(&name, timeout).await;

        if let Err(e) = self
            .docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container = %name, error = %e, "failed to remove sandbox container");
        }

        run
    }

    async fn run_to_completion(&self, name: &str, timeout: Duration) -> Result<SandboxRun> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| GuardError::SandboxFailure(format!("start failed: {}", e)))?;

        let mut wait_stream = self
            .docker
            .wait_container(name, None::<WaitContainerOptions<String>>);

        let waited = tokio::time::timeout(timeout, wait_stream.next()).await;

        let (exit_code, timed_out) = match waited {
            Ok(Some(Ok(status))) => (status.status_code, false),
            Ok(Some(Err(e))) => {
                // wait errors still carry a usable exit in some daemons;
                // treat as failure but keep going so logs get captured
                warn!(container = %name, error = %e, "wait_container errored");
                (-1, false)
            }
            Ok(None) => (-1, false),
            Err(_) => {
                warn!(container = %name, "sandbox timed out, force-killing");
                let _ = self
                    .docker
                    .kill_container(name, Some(KillContainerOptions { signal: "SIGKILL" }))
                    .await;
                (-1, true)
            }
        };

        let (stdout, stderr) = self.collect_logs(name).await;

        Ok(SandboxRun {
            stdout,
            stderr,
            exit_code,
            timed_out,
        })
    }

    async fn collect_logs(&self, name: &str) -> (String, String) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut logs = self.docker.logs(
            name,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container = %name, error = %e, "log stream error");
                    break;
                }
            }
        }
        (stdout, stderr)
    }
}

fn image_for(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Node => "node:20-slim",
        ProjectType::Python => "python:3.12-slim",
        ProjectType::Java => "maven:3-eclipse-temurin-21",
        ProjectType::Go => "golang:1.22",
        ProjectType::Rust => "rust:1-slim",
        ProjectType::Make | ProjectType::Unknown => "debian:bookworm-slim",
    }
}

/// The per-project-type test command. Every entrypoint first copies the
/// read-only source into the writable cwd; the install step is the one
/// phase that touches the network.
fn entrypoint_for(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Node => {
            "cp -r /workspace/src/. . && \
             (npm ci --no-audit --no-fund || npm install --no-audit --no-fund) && \
             npm test --silent"
        }
        ProjectType::Python => {
            "cp -r /workspace/src/. . && \
             (test -f requirements.txt && pip install -q -r requirements.txt || true) && \
             (python -m pytest -x -q || python -m unittest discover -v)"
        }
        ProjectType::Java => "cp -r /workspace/src/. . && mvn -q test",
        ProjectType::Go => "cp -r /workspace/src/. . && go test ./...",
        ProjectType::Rust => "cp -r /workspace/src/. . && cargo test --quiet",
        ProjectType::Make => "cp -r /workspace/src/. . && make test",
        ProjectType::Unknown => "true",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_cover_every_project_type() {
        for pt in [
            ProjectType::Node,
            ProjectType::Python,
            ProjectType::Java,
            ProjectType::Go,
            ProjectType::Rust,
            ProjectType::Make,
            ProjectType::Unknown,
        ] {
            assert!(!image_for(pt).is_empty());
            assert!(!entrypoint_for(pt).is_empty());
        }
    }

    #[test]
    fn entrypoints_copy_source_first() {
        for pt in [
            ProjectType::Node,
            ProjectType::Python,
            ProjectType::Java,
            ProjectType::Go,
            ProjectType::Rust,
            ProjectType::Make,
        ] {
            assert!(entrypoint_for(pt).starts_with("cp -r /workspace/src/. ."));
        }
    }

    #[test]
    fn combined_output_joins_streams() {
        let run = SandboxRun {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 1,
            timed_out: false,
        };
        assert_eq!(run.combined_output(), "out\nerr");
    }

    #[tokio::test]
    async fn connect_does_not_panic_without_docker() {
        // Passes with or without a reachable daemon.
        let sandbox = Sandbox::connect().await;
        if let Some(s) = sandbox {
            assert!(s.is_available().await);
        }
    }
}
