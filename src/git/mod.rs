// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Version-control adapter.
//!
//! Wraps the `git` binary behind a small capability set: worktree
//! add/remove/list, branch create/delete, ancestry queries, and the
//! apply-without-commit merge preview used by `merge_completed_tasks`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::GitError;

/// Merge strategy accepted by the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Merge,
    Squash,
    Rebase,
}

impl MergeStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merge" => Some(Self::Merge),
            "squash" => Some(Self::Squash),
            "rebase" => Some(Self::Rebase),
            _ => None,
        }
    }
}

/// One git worktree as reported by `git worktree list --porcelain`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitWorktree {
    pub path: PathBuf,
    pub head: String,
    pub branch: Option<String>,
    pub is_bare: bool,
    pub is_detached: bool,
}

/// Outcome of a merge preview run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub base_branch: String,
    pub base_head: String,
    pub merged: Vec<String>,
    pub already_merged: Vec<String>,
    pub failed: Vec<BranchFailure>,
    pub conflicts: Vec<BranchFailure>,
    pub working_tree_updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchFailure {
    pub branch: String,
    pub error: String,
}

impl MergeReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.conflicts.is_empty()
    }
}

/// Git adapter rooted at one repository.
pub struct GitClient {
    repo_path: PathBuf,
}

impl GitClient {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run a git command in the repo and return stdout; failures carry
    /// stderr (falling back to stdout).
    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr
            };
            Err(GitError::CommandFailed(detail))
        }
    }

    pub async fn is_git_repo(&self) -> bool {
        self.git(&["rev-parse", "--git-dir"]).await.is_ok()
    }

    pub async fn current_branch(&self) -> Result<String, GitError> {
        self.git(&["branch", "--show-current"]).await
    }

    pub async fn head(&self) -> Result<String, GitError> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    pub async fn branch_exists(&self, branch: &str) -> bool {
        self.git(&["rev-parse", "--verify", branch]).await.is_ok()
    }

    /// Whether `ancestor` is already contained in `descendant`.
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
        self.git(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await
            .is_ok()
    }

    pub async fn is_clean(&self) -> Result<bool, GitError> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(status.trim().is_empty())
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["checkout", branch]).await.map(|_| ())
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<(), GitError> {
        self.git(&["branch", "-D", branch]).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Worktrees
    // ------------------------------------------------------------------

    /// List worktrees via porcelain output.
    pub async fn list_worktrees(&self) -> Result<Vec<GitWorktree>, GitError> {
        let output = self.git(&["worktree", "list", "--porcelain"]).await?;
        let mut worktrees = Vec::new();
        let mut current = GitWorktree::default();

        for line in output.lines() {
            if let Some(rest) = line.strip_prefix("worktree ") {
                if !current.path.as_os_str().is_empty() {
                    worktrees.push(std::mem::take(&mut current));
                }
                current.path = PathBuf::from(rest);
            } else if let Some(rest) = line.strip_prefix("HEAD ") {
                current.head = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("branch refs/heads/") {
                current.branch = Some(rest.to_string());
            } else if line == "bare" {
                current.is_bare = true;
            } else if line == "detached" {
                current.is_detached = true;
            }
        }
        if !current.path.as_os_str().is_empty() {
            worktrees.push(current);
        }
        Ok(worktrees)
    }

    /// Whether a branch is checked out in any worktree.
    pub async fn is_branch_checked_out(&self, branch: &str) -> bool {
        match self.list_worktrees().await {
            Ok(worktrees) => worktrees
                .iter()
                .any(|wt| wt.branch.as_deref() == Some(branch)),
            Err(_) => false,
        }
    }

    /// Create a worktree at `path` on `branch`, creating the branch off
    /// `base_branch` when it does not exist yet.
    pub async fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: Option<&str>,
    ) -> Result<(), GitError> {
        if self.is_branch_checked_out(branch).await {
            return Err(GitError::BranchInUse(branch.to_string()));
        }
        if path.exists() {
            return Err(GitError::PathExists(path.display().to_string()));
        }

        let path_str = path.display().to_string();
        let result = if self.branch_exists(branch).await {
            self.git(&["worktree", "add", path_str.as_str(), branch]).await
        } else {
            let mut args = vec!["worktree", "add", "-b", branch, path_str.as_str()];
            if let Some(base) = base_branch {
                args.push(base);
            }
            self.git(&args).await
        };

        match result {
            Ok(_) => {
                info!("created worktree for {branch} at {path_str}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a worktree, pruning stale references; falls back to manual
    /// directory removal when git refuses.
    pub async fn remove_worktree(
        &self,
        path: &Path,
        delete_branch: Option<&str>,
    ) -> Result<(), GitError> {
        let path_str = path.display().to_string();
        if let Err(e) = self.git(&["worktree", "remove", "--force", &path_str]).await {
            warn!("git worktree remove failed: {e}");
            if path.exists() {
                std::fs::remove_dir_all(path)?;
            }
            let _ = self.git(&["worktree", "prune"]).await;
        }

        if let Some(branch) = delete_branch {
            let _ = self.git(&["branch", "-D", branch]).await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Merge preview
    // ------------------------------------------------------------------

    /// Apply each branch onto `base_branch` without committing, leaving the
    /// union of clean applications as an unstaged working-tree diff.
    ///
    /// Each clean application is pinned with a temporary commit so the next
    /// branch applies on top of it; a final `reset --mixed` back to the
    /// recorded base HEAD turns the pinned chain into unstaged changes.
    /// Conflicts abort that one application and are collected, not fatal.
    pub async fn merge_preview(
        &self,
        base_branch: &str,
        branches: &[String],
        strategy: MergeStrategy,
    ) -> Result<MergeReport, GitError> {
        if !self.is_clean().await? {
            return Err(GitError::CommandFailed(
                "working tree is not clean; stash or commit before merging".to_string(),
            ));
        }
        if !self.branch_exists(base_branch).await {
            return Err(GitError::BranchNotFound(base_branch.to_string()));
        }

        self.checkout(base_branch).await?;
        let base_head = self.head().await?;

        let (effective, strategy_warning) = match strategy {
            MergeStrategy::Rebase => (
                MergeStrategy::Merge,
                Some(
                    "strategy=rebase is not supported for no-commit previews; applied as merge"
                        .to_string(),
                ),
            ),
            other => (other, None),
        };

        let mut report = MergeReport {
            base_branch: base_branch.to_string(),
            base_head: base_head.clone(),
            merged: Vec::new(),
            already_merged: Vec::new(),
            failed: Vec::new(),
            conflicts: Vec::new(),
            working_tree_updated: false,
            strategy_warning,
        };

        let mut temp_commits = 0u32;

        for branch in branches {
            if !self.branch_exists(branch).await {
                report.failed.push(BranchFailure {
                    branch: branch.clone(),
                    error: "branch_not_found".to_string(),
                });
                continue;
            }
            if self.is_ancestor(branch, base_branch).await {
                report.already_merged.push(branch.clone());
                continue;
            }

            let apply = match effective {
                MergeStrategy::Merge => {
                    self.git(&["merge", "--no-ff", "--no-commit", branch]).await
                }
                MergeStrategy::Squash => self.git(&["merge", "--squash", branch]).await,
                MergeStrategy::Rebase => unreachable!("mapped to merge above"),
            };

            if let Err(e) = apply {
                let detail = e.to_string();
                let _ = self.git(&["merge", "--abort"]).await;
                if detail.to_lowercase().contains("conflict") {
                    report.conflicts.push(BranchFailure {
                        branch: branch.clone(),
                        error: detail,
                    });
                } else {
                    report.failed.push(BranchFailure {
                        branch: branch.clone(),
                        error: detail,
                    });
                }
                continue;
            }

            let commit_msg = format!("tmp merge preview: {branch}");
            match self
                .git(&["commit", "--no-verify", "--allow-empty", "-m", &commit_msg])
                .await
            {
                Ok(_) => {
                    temp_commits += 1;
                    report.merged.push(branch.clone());
                    debug!("pinned preview commit for {branch}");
                }
                Err(e) => {
                    report.failed.push(BranchFailure {
                        branch: branch.clone(),
                        error: e.to_string(),
                    });
                    let _ = self.git(&["merge", "--abort"]).await;
                    let _ = self.git(&["reset", "--hard", "HEAD"]).await;
                }
            }
        }

        if temp_commits > 0 {
            self.git(&["reset", "--mixed", &base_head]).await?;
            report.working_tree_updated = true;
        }

        Ok(report)
    }
}
