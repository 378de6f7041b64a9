// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pane command tools.

use serde_json::{json, Value};
use tracing::info;

use crate::agents::{Agent, AgentRole, AgentStatus};
use crate::context::ServerContext;
use crate::dispatch;
use crate::error::ToolError;

use super::{optional_str, optional_u64, required_str};

/// Send a raw command line to an agent's pane.
pub(super) async fn send_command(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let command = required_str(args, "command")?;

    let agent = ctx.registry.lookup(&agent_id)?;
    let pane = agent.pane.clone().ok_or(ToolError::InvalidValue {
        field: "agent_id",
        message: format!("agent {agent_id} has no pane"),
    })?;

    ctx.mux
        .send_keys(&pane.session_name, pane.window_index, pane.pane_index, &command, true)
        .await?;
    ctx.registry.mutate(&agent_id, |a| a.status = AgentStatus::Busy)?;

    Ok(json!({ "agent_id": agent_id, "command": command }))
}

/// Capture recent pane output.
pub(super) async fn get_output(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let lines = optional_u64(args, "lines").unwrap_or(100).min(10_000) as u32;

    let agent = ctx.registry.lookup(&agent_id)?;
    let pane = agent.pane.clone().ok_or(ToolError::InvalidValue {
        field: "agent_id",
        message: format!("agent {agent_id} has no pane"),
    })?;

    let output = ctx
        .mux
        .capture_pane(&pane.session_name, pane.window_index, pane.pane_index, lines)
        .await?;
    Ok(json!({ "agent_id": agent_id, "lines": lines, "output": output }))
}

/// Dispatch a task brief. An owner dispatching to the admin enters the
/// wait-lock: until an admin-originated message is read, only the mailbox
/// tools stay available to the owner.
pub(super) async fn send_task(
    ctx: &ServerContext,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let task_content = required_str(args, "task_content")?;
    let session_id = required_str(args, "session_id")?;

    let result = dispatch::send_task(
        ctx,
        &agent_id,
        &task_content,
        &session_id,
        optional_str(args, "task_id").as_deref(),
    )
    .await?;

    if let Some(caller) = caller {
        if caller.role == AgentRole::Owner {
            let target = ctx.registry.lookup(&agent_id)?;
            if target.role == AgentRole::Admin {
                ctx.mark_owner_waiting(&caller.id, &agent_id);
                info!("owner {} wait-locked on admin {agent_id}", caller.id);
            }
        }
    }

    Ok(result)
}

/// Return the command that attaches a human terminal to the session.
pub(super) fn open_session(ctx: &ServerContext) -> Result<Value, ToolError> {
    Ok(json!({
        "tmux_session": ctx.tmux_session,
        "attach_command": format!("tmux attach -t {}", ctx.tmux_session),
    }))
}

/// Send one command to every live agent pane, optionally filtered by role.
/// Delivery is best-effort per recipient.
pub(super) async fn broadcast_command(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let command = required_str(args, "command")?;
    let role_filter = match optional_str(args, "role") {
        Some(raw) => Some(AgentRole::parse(&raw).ok_or(ToolError::InvalidValue {
            field: "role",
            message: format!("unknown role: {raw}"),
        })?),
        None => None,
    };

    let mut results = serde_json::Map::new();
    for agent in ctx.registry.list()? {
        if !agent.is_live() {
            continue;
        }
        if role_filter.is_some_and(|r| agent.role != r) {
            continue;
        }
        let Some(pane) = &agent.pane else { continue };

        let sent = ctx
            .mux
            .send_keys(&pane.session_name, pane.window_index, pane.pane_index, &command, true)
            .await
            .is_ok();
        results.insert(agent.id.clone(), json!(sent));
    }

    let sent = results.values().filter(|v| **v == json!(true)).count();
    Ok(json!({
        "command": command,
        "role_filter": role_filter.map(|r| r.as_str()),
        "results": results,
        "summary": format!("{sent}/{} agents reached", results.len()),
    }))
}

#[cfg(test)]
mod tests {
    use super::super::testkit;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_command_and_get_output() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let worker = testkit::create_worker(&t.server, &owner).await;

        let sent = t
            .server
            .dispatch(
                "send_command",
                &json!({"agent_id": worker, "command": "ls", "caller_agent_id": owner}),
            )
            .await;
        assert_eq!(sent["success"], true);
        assert!(t.mux.sent_keys().iter().any(|s| s.text == "ls"));

        let session = t.tmux_session().await;
        t.mux.set_pane_output(&session, 0, 1, "file-a\nfile-b");
        let output = t
            .server
            .dispatch(
                "get_output",
                &json!({"agent_id": worker, "caller_agent_id": owner}),
            )
            .await;
        assert_eq!(output["output"], "file-a\nfile-b");
    }

    #[tokio::test]
    async fn test_send_task_to_admin_activates_wait_lock() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;

        let result = t
            .server
            .dispatch(
                "send_task",
                &json!({
                    "agent_id": admin,
                    "task_content": "build X",
                    "session_id": "s1",
                    "caller_agent_id": owner,
                }),
            )
            .await;
        assert_eq!(result["success"], true, "{result}");

        // Task brief landed under the session tasks dir.
        let ctx = t.server.context().await.unwrap();
        let task_file = ctx.tasks_dir().join(format!("{admin}.md"));
        assert_eq!(std::fs::read_to_string(task_file).unwrap(), "build X");

        // Admin pane received the launch command.
        assert!(t.mux.sent_keys().iter().any(|s| s.pane == 0));

        // Wait-lock active: the owner is down to the mailbox tools.
        let blocked = t
            .server
            .dispatch("list_tasks", &json!({"caller_agent_id": owner}))
            .await;
        assert_eq!(blocked["success"], false);
        assert_eq!(blocked["error"], "OwnerWaitActive");
        let allowed = blocked["allowed_tools"].as_array().unwrap();
        assert!(allowed.iter().any(|t| t == "read_messages"));
        assert!(allowed.iter().any(|t| t == "unlock_owner_wait"));
    }

    #[tokio::test]
    async fn test_send_task_to_worker_keeps_owner_free() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let worker = testkit::create_worker(&t.server, &owner).await;

        t.server
            .dispatch(
                "send_task",
                &json!({
                    "agent_id": worker,
                    "task_content": "small fix",
                    "session_id": "s1",
                    "caller_agent_id": owner,
                }),
            )
            .await;

        let listing = t
            .server
            .dispatch("list_tasks", &json!({"caller_agent_id": owner}))
            .await;
        assert_eq!(listing["success"], true);
    }

    #[tokio::test]
    async fn test_broadcast_filters_by_role() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;
        let _w1 = testkit::create_worker(&t.server, &admin).await;
        let _w2 = testkit::create_worker(&t.server, &admin).await;

        let result = t
            .server
            .dispatch(
                "broadcast_command",
                &json!({
                    "command": "echo ping",
                    "role": "worker",
                    "caller_agent_id": admin,
                }),
            )
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["results"].as_object().unwrap().len(), 2);
        assert_eq!(result["summary"], "2/2 agents reached");
    }

    #[tokio::test]
    async fn test_broadcast_is_admin_only() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;

        let result = t
            .server
            .dispatch(
                "broadcast_command",
                &json!({"command": "x", "caller_agent_id": owner}),
            )
            .await;
        assert_eq!(result["error"], "PermissionDenied");
    }

    #[tokio::test]
    async fn test_open_session_returns_attach_command() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let result = t
            .server
            .dispatch("open_session", &json!({"caller_agent_id": owner}))
            .await;
        let attach = result["attach_command"].as_str().unwrap();
        assert!(attach.starts_with("tmux attach -t crewmux-"));
    }
}
