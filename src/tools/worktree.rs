// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worktree tools (git mode only).

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::context::ServerContext;
use crate::error::{GitError, ToolError};
use crate::store;
use crate::worktrees::WorktreeRecord;

use super::{optional_str, required_str};

fn require_git(ctx: &ServerContext) -> Result<crate::git::GitClient, ToolError> {
    ctx.git().ok_or(ToolError::Git(GitError::Disabled))
}

/// Default worktree location: a sibling directory of the project named
/// after the branch.
fn default_worktree_path(ctx: &ServerContext, branch: &str) -> std::path::PathBuf {
    let parent = ctx
        .project_root
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| ctx.project_root.clone());
    parent.join(format!("crewmux-{}", store::sanitize_file_part(branch)))
}

/// Create a worktree on `branch`, optionally branching off `base_branch`.
/// Refuses when another worktree already occupies the branch.
pub(super) async fn create_worktree(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let git = require_git(ctx)?;
    let branch = required_str(args, "branch")?;
    let base_branch = optional_str(args, "base_branch");
    let path = optional_str(args, "worktree_path")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| default_worktree_path(ctx, &branch));

    if let Some(existing) = ctx.worktrees.find_by_branch(&branch)? {
        return Err(ToolError::Git(GitError::BranchInUse(format!(
            "{branch} (worktree {})",
            existing.path
        ))));
    }

    git.add_worktree(&path, &branch, base_branch.as_deref()).await?;

    let record = WorktreeRecord {
        path: path.display().to_string(),
        branch: branch.clone(),
        assigned_agent_id: None,
        created_at: Utc::now(),
    };
    ctx.worktrees.add(record.clone())?;

    info!("provisioned worktree {} on {branch}", record.path);
    Ok(json!({ "worktree": record }))
}

pub(super) fn list_worktrees(ctx: &ServerContext) -> Result<Value, ToolError> {
    if !ctx.settings.enable_git {
        return Err(ToolError::Git(GitError::Disabled));
    }
    let records = ctx.worktrees.list().map_err(ToolError::Store)?;
    Ok(json!({ "count": records.len(), "worktrees": records }))
}

/// Remove a worktree by path or branch.
pub(super) async fn remove_worktree(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let git = require_git(ctx)?;
    let target = required_str(args, "worktree_path").or_else(|_| required_str(args, "branch"))?;

    let record = ctx
        .worktrees
        .find_by_path(&target)
        .map_err(ToolError::Store)?
        .or(ctx
            .worktrees
            .find_by_branch(&target)
            .map_err(ToolError::Store)?)
        .ok_or(ToolError::Git(GitError::BranchNotFound(target)))?;

    git.remove_worktree(std::path::Path::new(&record.path), Some(&record.branch))
        .await?;
    ctx.worktrees.remove(&record.path)?;

    if let Some(agent_id) = &record.assigned_agent_id {
        let _ = ctx.registry.mutate(agent_id, |a| {
            a.worktree_path = None;
            a.branch = None;
        });
    }

    Ok(json!({ "removed": record.path, "branch": record.branch }))
}

/// Bind a worktree to an agent in both stores.
pub(super) fn assign_worktree(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    if !ctx.settings.enable_git {
        return Err(ToolError::Git(GitError::Disabled));
    }
    let agent_id = required_str(args, "agent_id")?;
    let path = required_str(args, "worktree_path")?;

    ctx.registry.lookup(&agent_id)?;
    let record = ctx.worktrees.assign(&path, Some(agent_id.clone()))?;
    let branch = record.branch.clone();
    ctx.registry.mutate(&agent_id, |a| {
        a.worktree_path = Some(record.path.clone());
        a.branch = Some(record.branch.clone());
    })?;

    Ok(json!({ "agent_id": agent_id, "worktree_path": path, "branch": branch }))
}

/// Status of one worktree or of every record.
pub(super) async fn get_worktree_status(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let git = require_git(ctx)?;

    match optional_str(args, "worktree_path") {
        Some(path) => {
            let record = ctx
                .worktrees
                .find_by_path(&path)
                .map_err(ToolError::Store)?
                .ok_or(ToolError::Git(GitError::BranchNotFound(path.clone())))?;
            let clean = crate::git::GitClient::new(&record.path).is_clean().await.ok();
            Ok(json!({ "worktree": record, "clean": clean }))
        }
        None => {
            let records = ctx.worktrees.list().map_err(ToolError::Store)?;
            let git_worktrees = git.list_worktrees().await?;
            let live_paths: Vec<String> = git_worktrees
                .iter()
                .map(|w| w.path.display().to_string())
                .collect();
            let items: Vec<Value> = records
                .iter()
                .map(|r| {
                    json!({
                        "worktree": r,
                        "exists": live_paths.contains(&r.path),
                    })
                })
                .collect();
            Ok(json!({ "count": items.len(), "worktrees": items }))
        }
    }
}
