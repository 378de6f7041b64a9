// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Healthcheck tools.

use serde_json::{json, Value};

use crate::context::ServerContext;
use crate::error::ToolError;
use crate::health::{recovery, HealthIssue};

use super::required_str;

pub(super) async fn healthcheck_agent(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let agent = ctx.registry.lookup(&agent_id)?;
    let status = ctx.health.check_agent(&agent, ctx.mux.as_ref()).await;
    Ok(json!({ "status": status }))
}

pub(super) async fn healthcheck_all(ctx: &ServerContext) -> Result<Value, ToolError> {
    let mut statuses = Vec::new();
    for agent in ctx.registry.list()? {
        statuses.push(ctx.health.check_agent(&agent, ctx.mux.as_ref()).await);
    }
    let healthy = statuses.iter().filter(|s| s.is_healthy && !s.skipped).count();
    let unhealthy = statuses.iter().filter(|s| !s.is_healthy).count();
    Ok(json!({
        "checked": statuses.len(),
        "healthy": healthy,
        "unhealthy": unhealthy,
        "statuses": statuses,
    }))
}

/// Unhealthy agents only; terminated agents never appear here.
pub(super) async fn get_unhealthy_agents(ctx: &ServerContext) -> Result<Value, ToolError> {
    let mut unhealthy = Vec::new();
    for agent in ctx.registry.list()? {
        let status = ctx.health.check_agent(&agent, ctx.mux.as_ref()).await;
        if !status.is_healthy && !status.skipped {
            unhealthy.push(status);
        }
    }
    Ok(json!({ "count": unhealthy.len(), "unhealthy": unhealthy }))
}

/// Soft recovery: session recreate or pane interrupt, preserving the
/// agent's identity, worktree and assignment.
pub(super) async fn attempt_recovery(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let agent = ctx.registry.lookup(&agent_id)?;

    let status = ctx.health.check_agent(&agent, ctx.mux.as_ref()).await;
    if status.is_healthy {
        return Ok(json!({
            "agent_id": agent_id,
            "recovered": false,
            "reason": "agent is healthy",
        }));
    }

    let issue = status.issue.unwrap_or(HealthIssue::TmuxSessionDead);
    let method = recovery::attempt_recovery(ctx, &agent, issue).await?;
    ctx.health.clear_recovery_failures(&agent_id, agent.current_task_id.as_deref());
    Ok(json!({
        "agent_id": agent_id,
        "recovered": true,
        "method": method,
        "issue": issue.as_str(),
    }))
}

/// Hard recovery: replace the agent, rebuild its worktree, reassign its
/// unfinished task.
pub(super) async fn full_recovery(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let result = recovery::full_recovery(ctx, &agent_id).await?;
    Ok(json!({ "recovery": result }))
}

/// One monitoring pass over every live worker.
pub(super) async fn monitor_and_recover_workers(
    ctx: &ServerContext,
) -> Result<Value, ToolError> {
    let report = recovery::monitor_and_recover(ctx).await?;
    Ok(json!({ "report": report }))
}
