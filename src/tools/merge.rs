// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Merge preview tool.

use serde_json::{json, Value};
use tracing::info;

use crate::agents::Agent;
use crate::context::ServerContext;
use crate::dashboard::TaskStatus;
use crate::error::{GitError, ToolError};
use crate::git::MergeStrategy;

use super::{optional_str, required_str};

/// Preview-merge the branches of completed tasks onto `base_branch`.
///
/// The repository's HEAD ends up back on the recorded base commit; the
/// union of cleanly applied branches remains in the working tree as an
/// unstaged diff. Conflicts are collected per branch, not fatal.
pub(super) async fn merge_completed_tasks(
    ctx: &ServerContext,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<Value, ToolError> {
    let git = ctx.git().ok_or(ToolError::Git(GitError::Disabled))?;
    let base_branch = required_str(args, "base_branch")?;
    let strategy_raw = optional_str(args, "strategy").unwrap_or_else(|| "merge".to_string());
    let strategy = MergeStrategy::parse(&strategy_raw).ok_or(ToolError::InvalidValue {
        field: "strategy",
        message: format!("strategy must be merge, squash or rebase; got {strategy_raw}"),
    })?;

    let mut branches: Vec<String> = ctx
        .dashboard
        .list_tasks(Some(TaskStatus::Completed), None)
        .into_iter()
        .filter_map(|t| t.branch)
        .collect();
    branches.sort();
    branches.dedup();

    let report = git.merge_preview(&base_branch, &branches, strategy).await?;

    // Record the run in the dashboard message log.
    let sender = caller.map(|c| c.id.clone()).unwrap_or_else(|| "system".to_string());
    ctx.dashboard.append_message(
        &sender,
        None,
        "system",
        &format!("merge_completed_tasks: {base_branch}"),
        &format!(
            "merged={}, already_merged={}, failed={}, conflicts={}",
            report.merged.len(),
            report.already_merged.len(),
            report.failed.len(),
            report.conflicts.len()
        ),
    )?;

    info!(
        "merge preview onto {base_branch}: {} merged, {} conflicts",
        report.merged.len(),
        report.conflicts.len()
    );

    let success = report.success();
    let mut payload = serde_json::to_value(&report).unwrap_or_default();
    if let Some(map) = payload.as_object_mut() {
        map.insert("success".to_string(), json!(success));
        map.insert("strategy".to_string(), json!(strategy_raw));
        map.insert("branch_count".to_string(), json!(branches.len()));
    }
    Ok(payload)
}
