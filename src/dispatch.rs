// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task dispatcher: push a task brief + launch command into a pane.
//!
//! `send_task` writes the brief to `{session_dir}/tasks/{agent_id}.md`,
//! resolves which AI CLI the target should run, composes the launch command
//! and sends it to the agent's pane. Settings are re-read from the
//! environment on every dispatch so a stale `ai_cli` on the agent record
//! never leaks into the launched subprocess; the record is updated to the
//! resolved value afterwards.

use std::path::PathBuf;

use serde_json::json;
use tracing::info;

use crate::agents::{AgentRole, AgentStatus};
use crate::config::{AiCli, Settings};
use crate::context::ServerContext;
use crate::error::ToolError;
use crate::store;

/// Resolve the CLI an agent should launch, from freshly loaded settings.
pub fn resolve_cli(settings: &Settings, role: AgentRole, worker_slot: Option<u32>) -> AiCli {
    match role {
        AgentRole::Worker => settings.resolve_worker_cli(worker_slot.unwrap_or(1)),
        _ => settings.profile().cli,
    }
}

/// Compose the pane command that hands the brief to the CLI.
pub fn launch_command(cli: AiCli, task_file: &PathBuf) -> String {
    format!("{} \"$(cat {})\"", cli.command(), task_file.display())
}

/// Dispatch a task brief to an agent's pane. When the caller names the
/// dashboard task being dispatched, the brief's path is recorded on it.
pub async fn send_task(
    ctx: &ServerContext,
    agent_id: &str,
    task_content: &str,
    session_id: &str,
    task_id: Option<&str>,
) -> Result<serde_json::Value, ToolError> {
    // Divergent session ids would scatter task files across sessions.
    if session_id != ctx.session_id {
        return Err(ToolError::InvalidValue {
            field: "session_id",
            message: format!(
                "expected {} for this workspace, got {session_id}",
                ctx.session_id
            ),
        });
    }

    let agent = ctx.registry.lookup(agent_id)?;
    if !agent.is_live() {
        return Err(ToolError::InvalidValue {
            field: "agent_id",
            message: format!("agent {agent_id} is terminated"),
        });
    }
    let Some(pane) = agent.pane.clone() else {
        return Err(ToolError::InvalidValue {
            field: "agent_id",
            message: format!("agent {agent_id} has no pane to dispatch into"),
        });
    };

    // Never trust the stored CLI choice; the environment wins.
    let fresh = Settings::load(&ctx.project_root);
    let cli = resolve_cli(&fresh, agent.role, agent.worker_slot);

    let tasks_dir = ctx.tasks_dir();
    let task_file = tasks_dir.join(format!("{}.md", store::sanitize_path_segment(agent_id)));
    store::atomic_write(&task_file, task_content)?;

    if let Some(task_id) = task_id {
        let relative = task_file
            .strip_prefix(&ctx.project_root)
            .unwrap_or(&task_file)
            .display()
            .to_string();
        ctx.dashboard.set_task_file(task_id, &relative)?;
    }

    let command = launch_command(cli, &task_file);
    ctx.mux
        .send_keys(
            &pane.session_name,
            pane.window_index,
            pane.pane_index,
            &command,
            true,
        )
        .await?;

    ctx.registry.mutate(agent_id, |a| {
        a.ai_cli = Some(cli);
        a.status = AgentStatus::Busy;
    })?;

    info!("dispatched task brief to {agent_id} via {cli}");
    Ok(json!({
        "agent_id": agent_id,
        "task_file": task_file.display().to_string(),
        "ai_cli": cli.as_str(),
        "command": command,
    }))
}
