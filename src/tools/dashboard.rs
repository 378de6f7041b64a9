// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Dashboard and task tools.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::warn;

use crate::agents::{Agent, AgentStatus};
use crate::context::ServerContext;
use crate::dashboard::types::TaskStatus;
use crate::error::ToolError;
use crate::ipc::{notify, Message, MessagePriority, MessageType};
use crate::store;

use super::{optional_str, optional_u64, required_str};

fn parse_status(raw: &str) -> Result<TaskStatus, ToolError> {
    TaskStatus::parse(raw).ok_or(ToolError::InvalidValue {
        field: "status",
        message: format!("unknown status: {raw}"),
    })
}

fn task_json(task: &crate::dashboard::TaskInfo) -> Value {
    serde_json::to_value(task).unwrap_or_default()
}

pub(super) fn create_task(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let title = required_str(args, "title")?;
    let description = optional_str(args, "description").unwrap_or_default();
    let metadata: BTreeMap<String, Value> = args
        .get("metadata")
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    // An explicit task_id makes retries idempotent.
    let task = ctx.dashboard.create_task_with_id(
        optional_str(args, "task_id"),
        &title,
        &description,
        metadata,
    )?;
    Ok(json!({ "task": task_json(&task) }))
}

pub(super) fn reopen_task(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let task = ctx.dashboard.reopen_task(&task_id)?;
    Ok(json!({ "task": task_json(&task) }))
}

pub(super) fn update_task_status(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let status = parse_status(&required_str(args, "status")?)?;
    let progress = optional_u64(args, "progress").map(|p| p.min(100) as u8);
    let error_message = optional_str(args, "error_message");

    let task = ctx
        .dashboard
        .update_task_status(&task_id, status, progress, error_message)?;
    Ok(json!({ "task": task_json(&task) }))
}

/// Assign a task and keep the registry in step: the previous holder's
/// `current_task_id` is cleared, the new assignee picks it up.
pub(super) fn assign_task_to_agent(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let agent_id = required_str(args, "agent_id")?;

    // The target must be a live agent (the dashboard invariant demands a
    // live assignee or none).
    let target = ctx.registry.lookup(&agent_id)?;
    if !target.is_live() {
        return Err(ToolError::InvalidValue {
            field: "agent_id",
            message: format!("agent {agent_id} is terminated"),
        });
    }

    let branch = optional_str(args, "branch");
    let worktree_path = optional_str(args, "worktree_path");
    let previous_holder = ctx
        .dashboard
        .get_task(&task_id)
        .and_then(|t| t.assigned_agent_id);

    let task = ctx
        .dashboard
        .assign_task(&task_id, &agent_id, branch, worktree_path)?;

    if let Some(previous) = previous_holder.filter(|p| p != &agent_id) {
        let cleared = ctx.registry.mutate(&previous, |a| {
            if a.current_task_id.as_deref() == Some(task.id.as_str()) {
                a.current_task_id = None;
                a.status = AgentStatus::Idle;
            }
        });
        if let Err(e) = cleared {
            warn!("could not clear previous assignee {previous}: {e}");
        }
    }
    if task.status.is_active() {
        let task_id = task.id.clone();
        ctx.registry.mutate(&agent_id, |a| {
            a.current_task_id = Some(task_id);
            a.status = AgentStatus::Busy;
        })?;
    }

    Ok(json!({ "task": task_json(&task) }))
}

pub(super) fn list_tasks(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let status = match optional_str(args, "status") {
        Some(raw) => Some(parse_status(&raw)?),
        None => None,
    };
    let agent_id = optional_str(args, "agent_id");

    let tasks = ctx.dashboard.list_tasks(status, agent_id.as_deref());
    Ok(json!({
        "count": tasks.len(),
        "tasks": tasks.iter().map(task_json).collect::<Vec<_>>(),
    }))
}

pub(super) fn get_task(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let task = ctx
        .dashboard
        .get_task(&task_id)
        .ok_or(ToolError::Dashboard(
            crate::error::DashboardError::TaskNotFound(task_id),
        ))?;
    Ok(json!({ "task": task_json(&task) }))
}

pub(super) fn remove_task(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let task = ctx.dashboard.remove_task(&task_id)?;

    if let Some(agent_id) = &task.assigned_agent_id {
        let _ = ctx.registry.mutate(agent_id, |a| {
            if a.current_task_id.as_deref() == Some(task.id.as_str()) {
                a.current_task_id = None;
                a.status = AgentStatus::Idle;
            }
        });
    }
    Ok(json!({ "removed": task.id }))
}

/// Worker progress report: dashboard update plus a `task_progress` message
/// to the admin.
pub(super) async fn report_task_progress(
    ctx: &ServerContext,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let progress = optional_u64(args, "progress")
        .ok_or(ToolError::MissingField("progress"))?
        .min(100) as u8;
    let message = optional_str(args, "message").unwrap_or_default();
    let sender_id = caller.map(|c| c.id.clone()).unwrap_or_else(|| "unknown".to_string());

    let task = ctx
        .dashboard
        .report_progress(&task_id, progress, &sender_id, &message)?;
    if let Some(caller) = caller {
        let _ = ctx.registry.mutate(&caller.id, |_| {});
    }

    if let Some(admin) = ctx.registry.admin()? {
        let ipc_message = Message::new(
            sender_id.clone(),
            admin.id.clone(),
            MessageType::TaskProgress,
            message.clone(),
        )
            .with_subject(format!("progress: {} ({progress}%)", task.id))
            .with_priority(MessagePriority::Low)
            .with_metadata("task_id", json!(task.id))
            .with_metadata("progress", json!(progress));
        if ctx.mailbox.deliver(&ipc_message).is_ok() {
            notify::notify_agent(
                ctx.mux.as_ref(),
                &admin,
                MessageType::TaskProgress.as_str(),
                &sender_id,
            )
            .await;
        }
    }

    Ok(json!({ "task": task_json(&task) }))
}

/// Worker completion report: status update, then summary persistence, then
/// the admin notification, in that order. A memory-write failure is logged
/// and the IPC send still happens.
pub(super) async fn report_task_completion(
    ctx: &ServerContext,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<Value, ToolError> {
    let task_id = required_str(args, "task_id")?;
    let status = parse_status(&required_str(args, "status")?)?;
    if !matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
        return Err(ToolError::InvalidValue {
            field: "status",
            message: format!("completion status must be completed or failed, got {status}"),
        });
    }
    let message = optional_str(args, "message").unwrap_or_default();
    let summary = optional_str(args, "summary").unwrap_or_default();
    let sender_id = caller.map(|c| c.id.clone()).unwrap_or_else(|| "unknown".to_string());

    // 1. Status update through the transition graph.
    let error_message = (status == TaskStatus::Failed).then(|| message.clone());
    let task = ctx
        .dashboard
        .update_task_status(&task_id, status, None, error_message)?;

    if let Some(caller) = caller {
        let _ = ctx.registry.mutate(&caller.id, |a| {
            if a.current_task_id.as_deref() == Some(task.id.as_str()) {
                a.current_task_id = None;
                a.status = AgentStatus::Idle;
            }
        });
    }

    // 2. Summary persistence for the memory subsystem; lives under the
    // project's memory dir, never under the session directory.
    let mut summary_saved = false;
    if !summary.is_empty() {
        let memory_file = ctx
            .memory_dir()
            .join(format!("task_{}.md", store::sanitize_file_part(&task.id)));
        let body = format!(
            "---\ntask_id: {}\nstatus: {}\nreported_by: {sender_id}\n---\n\n{summary}\n",
            task.id, status
        );
        match store::atomic_write(&memory_file, &body) {
            Ok(()) => summary_saved = true,
            Err(e) => warn!("summary persistence failed for {}: {e}", task.id),
        }
    }

    // 3. Outbound IPC to the admin, attempted regardless of step 2.
    let message_type = match status {
        TaskStatus::Completed => MessageType::TaskComplete,
        _ => MessageType::TaskFailed,
    };
    let mut notified_admin = false;
    if let Some(admin) = ctx.registry.admin()? {
        let ipc_message =
            Message::new(sender_id.clone(), admin.id.clone(), message_type, message.clone())
            .with_subject(format!("{}: {}", message_type, task.id))
            .with_metadata("task_id", json!(task.id));
        if ctx.mailbox.deliver(&ipc_message).is_ok() {
            notify::notify_agent(ctx.mux.as_ref(), &admin, message_type.as_str(), &sender_id)
                .await;
            notified_admin = true;
        }
    }

    Ok(json!({
        "task": task_json(&task),
        "summary_saved": summary_saved,
        "notified_admin": notified_admin,
    }))
}

pub(super) fn get_dashboard(ctx: &ServerContext) -> Result<Value, ToolError> {
    let dashboard = ctx.dashboard.read();
    Ok(json!({
        "dashboard": serde_json::to_value(&dashboard).unwrap_or_default(),
        "path": ctx.dashboard.dashboard_path().display().to_string(),
    }))
}

pub(super) fn get_dashboard_summary(ctx: &ServerContext) -> Result<Value, ToolError> {
    Ok(json!({ "summary": ctx.dashboard.summary() }))
}

#[cfg(test)]
mod tests {
    use super::super::testkit;
    use serde_json::json;

    async fn create_task(t: &testkit::TestServer, caller: &str, title: &str) -> String {
        let result = t
            .server
            .dispatch(
                "create_task",
                &json!({"title": title, "caller_agent_id": caller}),
            )
            .await;
        result["task"]["id"].as_str().expect("task id").to_string()
    }

    #[tokio::test]
    async fn test_task_lifecycle_through_tools() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let worker = testkit::create_worker(&t.server, &admin).await;

        let task_id = create_task(&t, &admin, "implement feature").await;

        let assigned = t
            .server
            .dispatch(
                "assign_task_to_agent",
                &json!({"task_id": task_id, "agent_id": worker, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(assigned["success"], true);

        // Registry picked up the assignment.
        let status = t
            .server
            .dispatch(
                "get_agent_status",
                &json!({"agent_id": worker, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(status["agent"]["current_task_id"], json!(task_id));
        assert_eq!(status["agent"]["status"], "busy");

        let started = t
            .server
            .dispatch(
                "update_task_status",
                &json!({
                    "task_id": task_id,
                    "status": "in_progress",
                    "caller_agent_id": admin,
                }),
            )
            .await;
        assert_eq!(started["task"]["status"], "in_progress");
    }

    #[tokio::test]
    async fn test_invalid_transition_payload() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let task_id = create_task(&t, &admin, "t").await;

        // pending -> completed rejected, with the allowed set attached.
        let rejected = t
            .server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "completed", "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(rejected["success"], false);
        assert_eq!(rejected["error"], "InvalidTransition");
        let allowed = rejected["allowed"].as_array().unwrap();
        assert!(allowed.iter().any(|s| s == "in_progress"));
    }

    #[tokio::test]
    async fn test_terminal_update_then_reopen() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let task_id = create_task(&t, &admin, "t").await;

        for status in ["in_progress", "completed"] {
            let result = t
                .server
                .dispatch(
                    "update_task_status",
                    &json!({"task_id": task_id, "status": status, "caller_agent_id": admin}),
                )
                .await;
            assert_eq!(result["success"], true);
        }

        // Terminal task update: structured rejection with empty allowed set.
        let rejected = t
            .server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "in_progress", "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(rejected["error"], "TerminalStateImmutable");
        assert_eq!(rejected["allowed"], json!([]));

        // Reopen resets to pending; the next start succeeds.
        let reopened = t
            .server
            .dispatch(
                "reopen_task",
                &json!({"task_id": task_id, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(reopened["task"]["status"], "pending");

        let restarted = t
            .server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "in_progress", "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(restarted["success"], true);
    }

    #[tokio::test]
    async fn test_update_task_status_is_admin_only() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let task_id = create_task(&t, &admin, "t").await;

        let result = t
            .server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "in_progress", "caller_agent_id": owner}),
            )
            .await;
        assert_eq!(result["error"], "PermissionDenied");
    }

    #[tokio::test]
    async fn test_worker_completion_flow() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let worker = testkit::create_worker(&t.server, &admin).await;

        let task_id = create_task(&t, &admin, "t").await;
        t.server
            .dispatch(
                "assign_task_to_agent",
                &json!({"task_id": task_id, "agent_id": worker, "caller_agent_id": admin}),
            )
            .await;
        t.server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "in_progress", "caller_agent_id": admin}),
            )
            .await;

        let completion = t
            .server
            .dispatch(
                "report_task_completion",
                &json!({
                    "task_id": task_id,
                    "status": "completed",
                    "message": "done",
                    "summary": "Implemented and verified.",
                    "caller_agent_id": worker,
                }),
            )
            .await;
        assert_eq!(completion["success"], true, "{completion}");
        assert_eq!(completion["task"]["status"], "completed");
        assert_eq!(completion["summary_saved"], true);
        assert_eq!(completion["notified_admin"], true);

        // Summary lands under the project memory dir, not the session dir.
        let ctx = t.server.context().await.unwrap();
        let memory_files: Vec<_> = std::fs::read_dir(ctx.memory_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(memory_files.len(), 1);

        // Admin inbox has the task_complete message; auto-sync finds the
        // task already completed, so nothing applies and nothing skips.
        let read = t
            .server
            .dispatch(
                "read_messages",
                &json!({"agent_id": admin, "caller_agent_id": admin}),
            )
            .await;
        let types: Vec<&str> = read["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m["message_type"].as_str())
            .collect();
        assert!(types.contains(&"task_complete"));
        assert_eq!(read["dashboard_updates_applied"], 0);
        assert_eq!(read["dashboard_updates_skipped"], 0);

        // Worker is freed.
        let status = t
            .server
            .dispatch(
                "get_agent_status",
                &json!({"agent_id": worker, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(status["agent"]["status"], "idle");
        assert_eq!(status["agent"]["current_task_id"], json!(null));
    }

    #[tokio::test]
    async fn test_progress_report_reaches_admin_and_dashboard() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let worker = testkit::create_worker(&t.server, &admin).await;

        let task_id = create_task(&t, &admin, "t").await;
        t.server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "in_progress", "caller_agent_id": admin}),
            )
            .await;

        let progress = t
            .server
            .dispatch(
                "report_task_progress",
                &json!({
                    "task_id": task_id,
                    "progress": 50,
                    "message": "halfway",
                    "caller_agent_id": worker,
                }),
            )
            .await;
        assert_eq!(progress["success"], true);
        assert_eq!(progress["task"]["progress"], 50);

        // Admin received a task_progress message carrying the metadata.
        let read = t
            .server
            .dispatch(
                "read_messages",
                &json!({"agent_id": admin, "caller_agent_id": admin}),
            )
            .await;
        let msg = &read["messages"][0];
        assert_eq!(msg["message_type"], "task_progress");
        assert_eq!(msg["metadata"]["progress"], 50);
    }

    #[tokio::test]
    async fn test_admin_auto_sync_applies_unseen_completion() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let worker = testkit::create_worker(&t.server, &admin).await;

        let task_id = create_task(&t, &admin, "t").await;
        t.server
            .dispatch(
                "update_task_status",
                &json!({"task_id": task_id, "status": "in_progress", "caller_agent_id": admin}),
            )
            .await;

        // Worker sends the completion message directly (no dashboard write).
        t.server
            .dispatch(
                "send_message",
                &json!({
                    "sender_id": worker,
                    "receiver_id": admin,
                    "message_type": "task_complete",
                    "content": "finished",
                    "metadata": {"task_id": task_id},
                    "caller_agent_id": worker,
                }),
            )
            .await;

        let read = t
            .server
            .dispatch(
                "read_messages",
                &json!({"agent_id": admin, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(read["dashboard_updates_applied"], 1);
        assert_eq!(read["dashboard_updates_skipped"], 0);

        let task = t
            .server
            .dispatch(
                "get_task",
                &json!({"task_id": task_id, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(task["task"]["status"], "completed");
    }

    #[tokio::test]
    async fn test_remove_task_clears_registry() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let worker = testkit::create_worker(&t.server, &admin).await;
        let task_id = create_task(&t, &admin, "t").await;

        t.server
            .dispatch(
                "assign_task_to_agent",
                &json!({"task_id": task_id, "agent_id": worker, "caller_agent_id": admin}),
            )
            .await;
        let removed = t
            .server
            .dispatch(
                "remove_task",
                &json!({"task_id": task_id, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(removed["removed"], json!(task_id));

        let status = t
            .server
            .dispatch(
                "get_agent_status",
                &json!({"agent_id": worker, "caller_agent_id": admin}),
            )
            .await;
        assert_eq!(status["agent"]["current_task_id"], json!(null));
    }

    #[tokio::test]
    async fn test_get_dashboard_shapes() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        create_task(&t, &admin, "t").await;

        let dashboard = t
            .server
            .dispatch("get_dashboard", &json!({"caller_agent_id": owner}))
            .await;
        assert_eq!(dashboard["dashboard"]["total_tasks"], 1);
        assert!(dashboard["path"].as_str().unwrap().ends_with("dashboard.md"));

        let summary = t
            .server
            .dispatch("get_dashboard_summary", &json!({"caller_agent_id": owner}))
            .await;
        assert_eq!(summary["summary"]["pending_tasks"], 1);
    }
}
