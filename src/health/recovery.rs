// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Staged recovery for unhealthy workers.
//!
//! Recovery escalates per `(agent, task)` pair:
//!
//! | stage | action | on success | on failure |
//! |---|---|---|---|
//! | soft | recreate session / interrupt stalled pane | back to work | hard |
//! | hard | replace the agent, rebuild its worktree | back to work | count attempt |
//! | exhausted | fail the task, free the worker, alert the admin | - | - |
//!
//! Identity rules: soft recovery preserves the agent; hard recovery
//! terminates it and registers a replacement on the same pane slot (a
//! terminated agent is never resurrected). Task assignment moves through
//! the dashboard so both stores stay consistent.

use serde_json::json;
use tracing::{info, warn};

use crate::agents::{Agent, AgentRole, AgentStatus};
use crate::context::ServerContext;
use crate::dashboard::types::TaskStatus;
use crate::dashboard::AgentSummary;
use crate::error::TmuxError;
use crate::ipc::{notify, Message, MessagePriority, MessageType};

use super::{HealthIssue, HealthStatus};

/// Error message recorded on tasks that exhaust their recovery budget.
pub const RECOVERY_EXHAUSTED: &str = "recovery exhausted";

/// Soft recovery: keep the agent's identity, worktree and assignment.
///
/// A dead session is recreated and split until the agent's pane coordinates
/// exist again; a stalled pane gets an interrupt plus input clear.
pub async fn attempt_recovery(
    ctx: &ServerContext,
    agent: &Agent,
    issue: HealthIssue,
) -> Result<&'static str, TmuxError> {
    let Some(pane) = &agent.pane else {
        return Err(TmuxError::PaneUnreachable(format!(
            "agent {} has no pane",
            agent.id
        )));
    };

    match issue {
        HealthIssue::TmuxSessionDead => {
            let working_dir = agent
                .worktree_path
                .clone()
                .unwrap_or_else(|| agent.working_dir.clone());
            if !ctx.mux.session_exists(&pane.session_name).await {
                ctx.mux
                    .create_session(&pane.session_name, &working_dir, "main")
                    .await?;
            }
            // Re-split until the agent's pane coordinates exist again.
            while !ctx
                .mux
                .pane_exists(&pane.session_name, pane.window_index, pane.pane_index)
                .await
            {
                ctx.mux
                    .split_pane(&pane.session_name, pane.window_index, 0, false, None)
                    .await?;
            }
            info!("recreated session {} for agent {}", pane.session_name, agent.id);
            Ok("session_recreated")
        }
        HealthIssue::TaskStalled => {
            ctx.mux
                .send_raw_key(&pane.session_name, pane.window_index, pane.pane_index, "C-c")
                .await?;
            ctx.mux
                .send_raw_key(&pane.session_name, pane.window_index, pane.pane_index, "C-u")
                .await?;
            info!("interrupted stalled pane for agent {}", agent.id);
            Ok("pane_interrupted")
        }
    }
}

/// Hard recovery: terminate the agent, rebuild its worktree on the same
/// branch (git mode), register a replacement on the same pane slot, and
/// re-route the unfinished task through the dashboard.
pub async fn full_recovery(
    ctx: &ServerContext,
    agent_id: &str,
) -> Result<serde_json::Value, crate::error::ToolError> {
    let old = ctx.registry.lookup(agent_id)?;
    let unfinished_task = ctx
        .dashboard
        .list_tasks(None, Some(agent_id))
        .into_iter()
        .find(|t| t.status.is_active())
        .map(|t| t.id)
        .or_else(|| old.current_task_id.clone());

    ctx.registry.terminate(agent_id)?;

    // Same-branch worktree rebuild, when one was provisioned.
    if let (Some(git), Some(path), Some(branch)) =
        (ctx.git(), old.worktree_path.clone(), old.branch.clone())
    {
        let wt_path = std::path::PathBuf::from(&path);
        git.remove_worktree(&wt_path, None).await?;
        git.add_worktree(&wt_path, &branch, None).await?;
        info!("rebuilt worktree {} on branch {}", path, branch);
    }

    let mut replacement = Agent::new(old.role, old.working_dir.clone());
    replacement.pane = old.pane.clone();
    replacement.worker_slot = old.worker_slot;
    replacement.worktree_path = old.worktree_path.clone();
    replacement.branch = old.branch.clone();
    replacement.ai_cli = old.ai_cli;
    if let Some(pane) = &replacement.pane {
        if !ctx.mux.session_exists(&pane.session_name).await {
            ctx.mux
                .create_session(&pane.session_name, &replacement.working_dir, "main")
                .await?;
        }
        while !ctx
            .mux
            .pane_exists(&pane.session_name, pane.window_index, pane.pane_index)
            .await
        {
            ctx.mux
                .split_pane(&pane.session_name, pane.window_index, 0, false, None)
                .await?;
        }
    }
    ctx.registry.register(&replacement)?;

    if let Some(path) = &replacement.worktree_path {
        let _ = ctx.worktrees.assign(path, Some(replacement.id.clone()));
    }

    // Keep dashboard and registry agreeing on the reassignment.
    if let Some(task_id) = &unfinished_task {
        ctx.dashboard.assign_task(
            task_id,
            &replacement.id,
            replacement.branch.clone(),
            replacement.worktree_path.clone(),
        )?;
        let task_id = task_id.clone();
        ctx.registry.mutate(&replacement.id, |a| {
            a.current_task_id = Some(task_id);
            a.status = AgentStatus::Busy;
        })?;
    }

    ctx.dashboard.record_agent(summary_for(ctx, &ctx.registry.lookup(&replacement.id)?))?;
    ctx.dashboard.remove_agent_summary(agent_id)?;
    ctx.dashboard.increment_recovery_count()?;

    info!("full recovery: {} replaced by {}", agent_id, replacement.id);
    Ok(json!({
        "old_agent_id": agent_id,
        "new_agent_id": replacement.id,
        "reassigned_task_id": unfinished_task,
    }))
}

/// Exhaustion: fail the task, free the worker, alert the admin.
pub async fn finalize_failed_task(
    ctx: &ServerContext,
    agent_id: &str,
    task_id: &str,
    reason: &str,
) -> serde_json::Value {
    let update = ctx.dashboard.update_task_status(
        task_id,
        TaskStatus::Failed,
        None,
        Some(RECOVERY_EXHAUSTED.to_string()),
    );
    if let Err(e) = &update {
        warn!("could not fail task {task_id}: {e}");
    }

    if let Err(e) = ctx.registry.mutate(agent_id, |agent| {
        agent.current_task_id = None;
        agent.status = AgentStatus::Idle;
    }) {
        warn!("could not reset agent {agent_id}: {e}");
    }

    // One error-type IPC message to the admin per exhausted pair.
    if let Ok(Some(admin)) = ctx.registry.admin() {
        let message = Message::new(
            "healthcheck",
            admin.id.clone(),
            MessageType::Error,
            format!(
                "Worker {agent_id} exhausted recovery attempts on task {task_id}: {reason}"
            ),
        )
        .with_subject(format!("task failed by healthcheck: {task_id}"))
        .with_priority(MessagePriority::High)
        .with_metadata("agent_id", json!(agent_id))
        .with_metadata("task_id", json!(task_id))
        .with_metadata("reason", json!(reason));

        if ctx.mailbox.deliver(&message).is_ok() {
            notify::notify_agent(ctx.mux.as_ref(), &admin, MessageType::Error.as_str(), "healthcheck")
                .await;
        }
    }

    json!({
        "agent_id": agent_id,
        "task_id": task_id,
        "reason": reason,
        "error": crate::error::ErrorCode::RecoveryExhausted.as_str(),
        "message": RECOVERY_EXHAUSTED,
    })
}

/// One monitoring pass: check every live worker and run staged recovery on
/// the unhealthy ones. The pass is a reporter: recovery outcomes land in
/// the returned report and in the stores; only a failure to read the
/// registry at all surfaces as an error (the daemon counts those).
pub async fn monitor_and_recover(
    ctx: &ServerContext,
) -> Result<serde_json::Value, crate::error::RegistryError> {
    let agents = ctx.registry.list()?;

    let live_ids: Vec<String> = agents
        .iter()
        .filter(|a| a.is_live())
        .map(|a| a.id.clone())
        .collect();
    ctx.health.prune(&live_ids);

    let mut recovered = Vec::new();
    let mut escalated = Vec::new();
    let mut failed_tasks = Vec::new();
    let mut skipped = Vec::new();

    for agent in agents.iter().filter(|a| a.role == AgentRole::Worker) {
        if !agent.is_live() {
            skipped.push(json!({"agent_id": agent.id, "reason": "terminated"}));
            continue;
        }
        if agent.current_task_id.is_none() && agent.status == AgentStatus::Idle {
            skipped.push(json!({"agent_id": agent.id, "reason": "idle"}));
            continue;
        }

        let status = ctx.health.check_agent(agent, ctx.mux.as_ref()).await;
        if status.is_healthy {
            continue;
        }

        if let Err(e) = ctx.dashboard.increment_crash_count() {
            warn!("crash counter update failed: {e}");
        }

        let outcome = staged_recovery(ctx, agent, &status).await;
        match outcome {
            RecoveryOutcome::Recovered { method, reason } => {
                if let Some(task_id) = &agent.current_task_id {
                    let _ = ctx.dashboard.record_task_recovery(task_id, &agent.id, reason);
                }
                recovered.push(json!({
                    "agent_id": agent.id,
                    "reason": reason,
                    "method": method,
                }));
            }
            RecoveryOutcome::Escalated { attempts, reason } => {
                escalated.push(json!({
                    "agent_id": agent.id,
                    "reason": reason,
                    "attempts": attempts,
                }));
            }
            RecoveryOutcome::TaskFailed { detail } => {
                failed_tasks.push(detail);
            }
        }
    }

    Ok(json!({
        "checked": live_ids.len(),
        "recovered": recovered,
        "escalated": escalated,
        "failed_tasks": failed_tasks,
        "skipped": skipped,
    }))
}

enum RecoveryOutcome {
    Recovered {
        method: &'static str,
        reason: &'static str,
    },
    Escalated {
        attempts: u32,
        reason: &'static str,
    },
    TaskFailed {
        detail: serde_json::Value,
    },
}

async fn staged_recovery(
    ctx: &ServerContext,
    agent: &Agent,
    status: &HealthStatus,
) -> RecoveryOutcome {
    let issue = status.issue.unwrap_or(HealthIssue::TmuxSessionDead);
    let reason = issue.as_str();
    let task_id = agent.current_task_id.clone();

    // Stage 1: soft.
    match attempt_recovery(ctx, agent, issue).await {
        Ok(method) => {
            ctx.health.clear_recovery_failures(&agent.id, task_id.as_deref());
            let _ = ctx.dashboard.increment_recovery_count();
            return RecoveryOutcome::Recovered { method, reason };
        }
        Err(e) => {
            warn!("soft recovery failed for {}: {e}", agent.id);
        }
    }

    // Stage 2: hard.
    match full_recovery(ctx, &agent.id).await {
        Ok(_) => {
            ctx.health.clear_recovery_failures(&agent.id, task_id.as_deref());
            RecoveryOutcome::Recovered {
                method: "full_recovery",
                reason,
            }
        }
        Err(e) => {
            warn!("full recovery failed for {}: {e}", agent.id);
            let attempts = ctx
                .health
                .record_recovery_failure(&agent.id, task_id.as_deref());
            if attempts >= ctx.health.max_recovery_attempts() {
                ctx.health.clear_recovery_failures(&agent.id, task_id.as_deref());
                let detail = match &task_id {
                    Some(task_id) => {
                        finalize_failed_task(ctx, &agent.id, task_id, reason).await
                    }
                    None => json!({"agent_id": agent.id, "reason": reason}),
                };
                RecoveryOutcome::TaskFailed { detail }
            } else {
                RecoveryOutcome::Escalated { attempts, reason }
            }
        }
    }
}

/// Build the dashboard summary row for an agent.
pub fn summary_for(ctx: &ServerContext, agent: &Agent) -> AgentSummary {
    AgentSummary {
        agent_id: agent.id.clone(),
        name: Some(agent.display_name(ctx.settings.default_ai_cli)),
        role: agent.role.as_str().to_string(),
        status: agent.status.as_str().to_string(),
        current_task_id: agent.current_task_id.clone(),
        worktree_path: agent.worktree_path.clone(),
        branch: agent.branch.clone(),
        last_activity: Some(agent.last_activity),
        process_recovery_count: 0,
    }
}
