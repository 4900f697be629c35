//! Shallow clone of the target repository into a scratch directory.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tracing::info;

use crate::errors::{GuardError, Result};

/// A cloned working tree. The directory is removed on drop.
pub struct ClonedRepo {
    dir: TempDir,
}

impl ClonedRepo {
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// Shallow-clone `owner/repo`, authenticating with `token` when present.
pub async fn clone_repo(
    owner: &str,
    repo: &str,
    token: Option<&str>,
    timeout: Duration,
) -> Result<ClonedRepo> {
    let dir = TempDir::with_prefix("codeguard-heal-")
        .map_err(|e| GuardError::Fatal(anyhow::anyhow!("scratch dir: {}", e)))?;

    let url = match token {
        Some(token) => format!("https://x-access-token:{}@github.com/{}/{}.git", token, owner, repo),
        None => format!("https://github.com/{}/{}.git", owner, repo),
    };

    let child = tokio::process::Command::new("git")
        .args(["clone", "--depth", "1", &url, "."])
        .current_dir(dir.path())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| GuardError::Upstream(format!("failed to run git: {}", e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| GuardError::Upstream(format!("clone timed out after {}s", timeout.as_secs())))?
        .map_err(|e| GuardError::Upstream(format!("git clone failed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        // Never echo the token back out through error surfaces.
        let sanitized = match token {
            Some(token) if !token.is_empty() => stderr.replace(token, "***"),
            _ => stderr,
        };
        return Err(GuardError::Upstream(format!("git clone failed: {}", sanitized)));
    }

    info!(owner, repo, path = %dir.path().display(), "repository cloned");
    Ok(ClonedRepo { dir })
}
