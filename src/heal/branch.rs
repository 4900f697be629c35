//! Healing-branch manipulation through the ref/tree/blob APIs.

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{GuardError, Result};
use crate::forge_api::{FileContent, ForgeApi, TreeEntryInput};

pub struct BranchManager {
    api: Arc<dyn ForgeApi>,
    owner: String,
    repo: String,
}

/// One file staged for a batch commit.
pub struct CommitFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl BranchManager {
    pub fn new(api: Arc<dyn ForgeApi>, owner: &str, repo: &str) -> Self {
        Self {
            api,
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Create `name` pointing at the tip of `base`. An existing branch is
    /// deleted first, so the call always ends with `heads/name ==
    /// heads/base`. Returns the base sha.
    pub async fn create_branch(&self, name: &str, base: &str) -> Result<String> {
        let base_sha = self
            .api
            .get_ref(&self.owner, &self.repo, &format!("heads/{}", base))
            .await?;

        let branch_ref = format!("heads/{}", name);
        match self.api.get_ref(&self.owner, &self.repo, &branch_ref).await {
            Ok(_) => {
                debug!(branch = name, "branch exists, resetting");
                self.api
                    .delete_ref(&self.owner, &self.repo, &branch_ref)
                    .await?;
            }
            Err(GuardError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.api
            .create_ref(&self.owner, &self.repo, &branch_ref, &base_sha)
            .await?;
        info!(branch = name, base, sha = %base_sha, "healing branch created");
        Ok(base_sha)
    }

    /// Commit one file via the contents API. Returns the new commit sha.
    /// A stale-sha conflict is retried once with a re-fetched blob sha.
    pub async fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<String> {
        match self.try_commit_file(branch, path, content, message).await {
            Err(GuardError::Conflict(_)) => {
                debug!(path, branch, "stale sha on commit, retrying once");
                self.try_commit_file(branch, path, content, message).await
            }
            other => other,
        }
    }

    async fn try_commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<String> {
        let prior_sha = match self
            .api
            .get_file_content(&self.owner, &self.repo, path, branch)
            .await
        {
            Ok(existing) => Some(existing.sha),
            Err(GuardError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        self.api
            .create_or_update_file(
                &self.owner,
                &self.repo,
                path,
                content,
                branch,
                message,
                prior_sha.as_deref(),
            )
            .await
    }

    /// Commit several files as one commit: blob per file, a tree on top of
    /// the branch tip's tree, a commit with the tip as parent, then a
    /// fast-forward of the ref. Returns the new commit sha.
    pub async fn commit_multiple_files(
        &self,
        branch: &str,
        files: &[CommitFile],
        message: &str,
    ) -> Result<String> {
        let branch_ref = format!("heads/{}", branch);
        let tip = self.api.get_ref(&self.owner, &self.repo, &branch_ref).await?;
        let tip_commit = self.api.get_commit(&self.owner, &self.repo, &tip).await?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let blob_sha = self
                .api
                .create_blob(&self.owner, &self.repo, &file.content)
                .await?;
            entries.push(TreeEntryInput::blob(file.path.clone(), blob_sha));
        }

        let tree_sha = self
            .api
            .create_tree(&self.owner, &self.repo, &tip_commit.tree_sha, &entries)
            .await?;
        let commit_sha = self
            .api
            .create_commit(
                &self.owner,
                &self.repo,
                message,
                &tree_sha,
                std::slice::from_ref(&tip),
            )
            .await?;

        self.api
            .update_ref(&self.owner, &self.repo, &branch_ref, &commit_sha, false)
            .await?;
        info!(branch, files = files.len(), sha = %commit_sha, "batch commit applied");
        Ok(commit_sha)
    }

    pub async fn latest_commit_sha(&self, branch: &str) -> Result<String> {
        self.api
            .get_ref(&self.owner, &self.repo, &format!("heads/{}", branch))
            .await
    }

    pub async fn file_content(&self, path: &str, branch: &str) -> Result<FileContent> {
        self.api
            .get_file_content(&self.owner, &self.repo, path, branch)
            .await
    }
}
