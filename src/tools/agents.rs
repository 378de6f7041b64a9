// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent lifecycle tools.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::agents::{pane_for_worker_slot, Agent, AgentRole, PaneRef};
use crate::config::AiCli;
use crate::context::ServerContext;
use crate::error::ToolError;
use crate::health::monitor;
use crate::health::recovery::summary_for;
use crate::tmux::layout;

use super::{optional_str, optional_u64, required_str};

fn agent_json(agent: &Agent, ctx: &ServerContext) -> Value {
    json!({
        "id": agent.id,
        "role": agent.role.as_str(),
        "status": agent.status.as_str(),
        "name": agent.display_name(ctx.settings.default_ai_cli),
        "session_name": agent.pane.as_ref().map(|p| p.session_name.clone()),
        "window_index": agent.pane.as_ref().map(|p| p.window_index),
        "pane_index": agent.pane.as_ref().map(|p| p.pane_index),
        "working_dir": agent.working_dir,
        "worktree_path": agent.worktree_path,
        "branch": agent.branch,
        "ai_cli": agent.ai_cli.map(|c| c.as_str()),
        "worker_slot": agent.worker_slot,
        "current_task_id": agent.current_task_id,
        "created_at": agent.created_at.to_rfc3339(),
        "last_activity": agent.last_activity.to_rfc3339(),
    })
}

/// Create one agent and bind it to its pane.
///
/// Owners carry no pane. The admin takes the main window's pane 0; workers
/// get the lowest free slot, spilling into extra grid windows past slot 6.
/// Worker creation also starts the healthcheck daemon.
pub(super) async fn create_agent(
    ctx: &Arc<ServerContext>,
    args: &Value,
) -> Result<Value, ToolError> {
    let role_str = required_str(args, "role")?;
    let role = AgentRole::parse(&role_str).ok_or(ToolError::InvalidValue {
        field: "role",
        message: format!("unknown role: {role_str}"),
    })?;
    let working_dir = optional_str(args, "working_dir")
        .unwrap_or_else(|| ctx.project_root.display().to_string());
    let ai_cli: Option<AiCli> = match optional_str(args, "ai_cli") {
        Some(raw) => Some(raw.parse().map_err(|message| ToolError::InvalidValue {
            field: "ai_cli",
            message,
        })?),
        None => None,
    };

    let mut agent = Agent::new(role, working_dir);
    agent.ai_cli = ai_cli;

    match role {
        AgentRole::Owner => {
            // The owner is the controlling assistant; it runs outside tmux.
        }
        AgentRole::Admin => {
            ensure_main_session(ctx).await?;
            agent.pane = Some(PaneRef::new(&ctx.tmux_session, 0, 0));
        }
        AgentRole::Worker => {
            ensure_main_session(ctx).await?;
            let slot = ctx.registry.resolve_worker_slot(ctx.settings.max_workers)?;
            let (window, pane) =
                pane_for_worker_slot(slot, ctx.settings.workers_per_extra_window);
            if window > 0 {
                ensure_worker_window(ctx, window).await?;
            }
            agent.worker_slot = Some(slot);
            agent.pane = Some(PaneRef::new(&ctx.tmux_session, window, pane));
        }
    }

    ctx.registry.register(&agent)?;
    ctx.mailbox.register(&agent.id)?;
    ctx.dashboard.record_agent(summary_for(ctx, &agent))?;

    if role == AgentRole::Worker {
        monitor::start_monitor(ctx.clone());
    }

    info!("created {} agent {}", role, agent.id);
    Ok(json!({ "agent": agent_json(&agent, ctx) }))
}

/// Create up to `count` workers; stops at the worker limit and reports how
/// far it got.
pub(super) async fn create_workers_batch(
    ctx: &Arc<ServerContext>,
    args: &Value,
) -> Result<Value, ToolError> {
    let count = optional_u64(args, "count").unwrap_or(1).max(1);
    let caller = optional_str(args, "caller_agent_id");

    let mut created = Vec::new();
    let mut limit_reached = false;
    for _ in 0..count {
        let worker_args = json!({
            "role": "worker",
            "caller_agent_id": caller.clone(),
            "working_dir": optional_str(args, "working_dir"),
            "ai_cli": optional_str(args, "ai_cli"),
        });
        match create_agent(ctx, &worker_args).await {
            Ok(result) => created.push(result["agent"].clone()),
            Err(ToolError::Registry(
                e @ crate::error::RegistryError::WorkerLimitReached { .. },
            )) => {
                if created.is_empty() {
                    return Err(e.into());
                }
                limit_reached = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(json!({
        "created": created.len(),
        "limit_reached": limit_reached,
        "agents": created,
    }))
}

pub(super) fn list_agents(ctx: &ServerContext) -> Result<Value, ToolError> {
    let agents = ctx.registry.list()?;
    let items: Vec<Value> = agents.iter().map(|a| agent_json(a, ctx)).collect();
    Ok(json!({ "count": items.len(), "agents": items }))
}

pub(super) fn get_agent_status(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let agent = ctx.registry.lookup(&agent_id)?;
    Ok(json!({ "agent": agent_json(&agent, ctx) }))
}

/// Flip an agent to terminated. The pane stays alive for reuse; the record
/// is kept so a terminated agent is never resurrected.
pub(super) async fn terminate_agent(
    ctx: &Arc<ServerContext>,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let terminated = ctx.registry.terminate(&agent_id)?;

    if let Some(path) = &terminated.worktree_path {
        let _ = ctx.worktrees.assign(path, None);
    }
    ctx.dashboard.record_agent(summary_for(ctx, &terminated))?;

    info!("terminated agent {agent_id}");
    Ok(json!({ "agent": agent_json(&terminated, ctx) }))
}

/// Send an agent its role brief so the CLI inside the pane knows its place
/// in the hierarchy.
pub(super) async fn initialize_agent(
    ctx: &Arc<ServerContext>,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let agent = ctx.registry.lookup(&agent_id)?;
    let Some(pane) = &agent.pane else {
        return Ok(json!({ "initialized": false, "reason": "agent has no pane" }));
    };

    let brief = match agent.role {
        AgentRole::Owner => String::new(),
        AgentRole::Admin => format!(
            "You are the admin agent ({agent_id}). Manage workers, track task \
             progress on the dashboard, and report to the owner."
        ),
        AgentRole::Worker => format!(
            "You are worker agent {agent_id} (slot {}). Execute the tasks you \
             are assigned and report progress and completion over IPC.",
            agent.worker_slot.unwrap_or(0)
        ),
    };

    ctx.mux
        .send_keys(&pane.session_name, pane.window_index, pane.pane_index, &brief, true)
        .await?;
    ctx.registry.mutate(&agent_id, |_| {})?;

    Ok(json!({ "initialized": true, "agent_id": agent_id }))
}

async fn ensure_main_session(ctx: &ServerContext) -> Result<(), ToolError> {
    layout::create_main_session(
        ctx.mux.as_ref(),
        &ctx.tmux_session,
        &ctx.project_root.display().to_string(),
    )
    .await?;
    Ok(())
}

async fn ensure_worker_window(ctx: &ServerContext, window: u32) -> Result<(), ToolError> {
    // Window indices for overflow workers start at 1; create grids up to
    // and including the needed one.
    let per_window = ctx.settings.workers_per_extra_window.max(1);
    let cols = per_window.div_ceil(2);
    for ordinal in 1..=window {
        let exists = ctx.mux.pane_exists(&ctx.tmux_session, ordinal, 0).await;
        if !exists {
            layout::add_worker_window(ctx.mux.as_ref(), &ctx.tmux_session, ordinal, 2, cols)
                .await?;
        }
    }
    Ok(())
}
