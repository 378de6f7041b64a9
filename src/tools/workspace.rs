// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace lifecycle tools.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::agents::AgentRole;
use crate::config::{SessionConfig, Settings};
use crate::context::ServerContext;
use crate::error::ToolError;
use crate::health::monitor;
use crate::tmux::layout;

use super::{optional_bool, required_str, Server};

/// Provision a session: directory tree, `config.json`, tmux pane grid.
///
/// `enable_git` resolves call argument > existing `config.json` > settings
/// (environment / `.env` / default true); the file is rewritten when the
/// effective value changes.
pub(super) async fn init_tmux_workspace(server: &Server, args: &Value) -> Result<Value, ToolError> {
    let project_root = std::path::PathBuf::from(required_str(args, "project_root")?);
    let session_id = required_str(args, "session_id")?;

    let mut settings = Settings::load(&project_root);
    let existing = SessionConfig::load(&project_root, &settings.mcp_dir)?;
    let enable_git = optional_bool(args, "enable_git")
        .or(existing.as_ref().map(|c| c.enable_git))
        .unwrap_or(settings.enable_git);
    settings.enable_git = enable_git;

    let mut config = existing.unwrap_or_else(|| SessionConfig::new(session_id.clone(), enable_git));
    config.session_id = session_id.clone();
    config.enable_git = enable_git;
    let config_path = config.save(&project_root, &settings.mcp_dir)?;

    let session_dir = settings.session_dir(&project_root, &session_id);
    for sub in ["tasks", "reports", "ipc"] {
        std::fs::create_dir_all(session_dir.join(sub)).map_err(crate::error::StoreError::Io)?;
    }

    let ctx = Arc::new(ServerContext::new(
        project_root.clone(),
        session_id.clone(),
        settings,
        server.mux.clone(),
    ));
    ctx.dashboard.initialize()?;

    let created = layout::create_main_session(
        ctx.mux.as_ref(),
        &ctx.tmux_session,
        &project_root.display().to_string(),
    )
    .await?;

    let tmux_session = ctx.tmux_session.clone();
    server.attach(ctx).await;

    info!("workspace initialized: {} (session {session_id})", project_root.display());
    Ok(json!({
        "project_root": project_root.display().to_string(),
        "session_id": session_id,
        "enable_git": enable_git,
        "config_path": config_path.display().to_string(),
        "tmux_session": tmux_session,
        "tmux_session_created": created,
    }))
}

/// Tear the session down: stop the monitor, terminate live agents, kill the
/// tmux session. Durable files stay on disk for inspection.
pub(super) async fn cleanup_workspace(
    server: &Server,
    ctx: &Arc<ServerContext>,
) -> Result<Value, ToolError> {
    let monitor_stopped = monitor::stop_monitor(ctx);

    let mut terminated = 0;
    for agent in ctx.registry.list()? {
        if agent.is_live() && agent.role != AgentRole::Owner {
            ctx.registry.terminate(&agent.id)?;
            terminated += 1;
        }
    }

    ctx.mux.kill_session(&ctx.tmux_session).await?;
    server.detach().await;

    info!("workspace cleaned up ({terminated} agents terminated)");
    Ok(json!({
        "terminated_agents": terminated,
        "monitor_stopped": monitor_stopped,
        "tmux_session": ctx.tmux_session,
    }))
}

pub(super) fn check_all_tasks_completed(ctx: &ServerContext) -> Result<Value, ToolError> {
    let summary = ctx.dashboard.summary();
    Ok(json!({
        "all_tasks_completed": summary["all_tasks_completed"],
        "total_tasks": summary["total_tasks"],
        "pending_tasks": summary["pending_tasks"],
        "in_progress_tasks": summary["in_progress_tasks"],
        "failed_tasks": summary["failed_tasks"],
    }))
}

/// Cleanup gated on every task having completed.
pub(super) async fn cleanup_on_completion(
    server: &Server,
    ctx: &Arc<ServerContext>,
) -> Result<Value, ToolError> {
    let summary = ctx.dashboard.summary();
    if summary["all_tasks_completed"] != json!(true) {
        return Err(ToolError::InvalidValue {
            field: "tasks",
            message: format!(
                "not all tasks are completed (pending={}, in_progress={}, failed={})",
                summary["pending_tasks"], summary["in_progress_tasks"], summary["failed_tasks"]
            ),
        });
    }

    let mut result = cleanup_workspace(server, ctx).await?;
    if let Some(map) = result.as_object_mut() {
        map.insert("all_tasks_completed".to_string(), json!(true));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::super::testkit;
    use crate::tmux::Multiplexer;
    use serde_json::json;

    #[tokio::test]
    async fn test_init_writes_config_and_layout() {
        // No enable_git argument: the default (true) lands in config.json.
        let t = testkit::server_with_args(json!({})).await;

        let config_path = t.project_root().join(".crewmux").join("config.json");
        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(config_path).unwrap()).unwrap();
        assert_eq!(config["session_id"], "s1");
        assert_eq!(config["enable_git"], true);

        // Main session exists with the full pane grid.
        let session = t.tmux_session().await;
        for pane in 0..=6u32 {
            assert!(t.mux.pane_exists(&session, 0, pane).await, "pane {pane}");
        }
    }

    #[tokio::test]
    async fn test_init_enable_git_precedence() {
        let t = testkit::server_with_args(json!({"enable_git": false})).await;
        let config_path = t.project_root().join(".crewmux").join("config.json");
        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(config["enable_git"], false);

        // Re-init without the argument: existing config.json wins.
        let result = t
            .server
            .dispatch(
                "init_tmux_workspace",
                &json!({
                    "project_root": t.project_root().display().to_string(),
                    "session_id": "s1",
                }),
            )
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["enable_git"], false);
    }

    #[tokio::test]
    async fn test_check_all_tasks_completed_empty() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let result = t
            .server
            .dispatch(
                "check_all_tasks_completed",
                &json!({"caller_agent_id": owner}),
            )
            .await;
        assert_eq!(result["success"], true);
        assert_eq!(result["all_tasks_completed"], false);
    }

    #[tokio::test]
    async fn test_cleanup_requires_owner() {
        let t = testkit::bootstrapped_server().await;
        let owner = testkit::create_owner(&t.server).await;
        let admin = testkit::create_admin(&t.server, &owner).await;

        let denied = t
            .server
            .dispatch("cleanup_workspace", &json!({"caller_agent_id": admin}))
            .await;
        assert_eq!(denied["error"], "PermissionDenied");

        let ok = t
            .server
            .dispatch("cleanup_workspace", &json!({"caller_agent_id": owner}))
            .await;
        assert_eq!(ok["success"], true);
    }
}
