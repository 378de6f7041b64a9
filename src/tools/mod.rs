// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool façade: one request, one response.
//!
//! Every tool call enters [`Server::dispatch`], which resolves the session
//! context, runs the permission guard (the single trusted chokepoint), and
//! routes to a handler. Handlers return `Result<serde_json::Value,
//! ToolError>`; the façade folds errors into structured
//! `{success: false, error, message}` payloads with stable error codes, so
//! nothing ever escapes the boundary as a panic or opaque failure.
//!
//! Two calls work before any agent exists: `init_tmux_workspace` and
//! `create_agent(role=owner)`. Every other tool requires a
//! `caller_agent_id` that resolves to a live agent.

mod agents;
mod command;
mod dashboard;
mod health;
mod ipc;
mod merge;
mod workspace;
mod worktree;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::agents::{Agent, AgentRole};
use crate::config::{permissions, Settings};
use crate::context::ServerContext;
use crate::error::{ErrorCode, ToolError};
use crate::registry::AgentRegistry;
use crate::tmux::Multiplexer;

/// Threshold of consecutive empty unread polls before the façade stops
/// doing I/O for a wait-locked owner.
pub(crate) const POLLING_GUARD_THRESHOLD: u32 = 3;

/// The orchestration server: owns the multiplexer handle and the lazily
/// attached session context.
pub struct Server {
    mux: Arc<dyn Multiplexer>,
    ctx: tokio::sync::RwLock<Option<Arc<ServerContext>>>,
}

impl Server {
    pub fn new(mux: Arc<dyn Multiplexer>) -> Self {
        Self {
            mux,
            ctx: tokio::sync::RwLock::new(None),
        }
    }

    /// The attached session context, if any.
    pub async fn context(&self) -> Option<Arc<ServerContext>> {
        self.ctx.read().await.clone()
    }

    pub(crate) async fn attach(&self, ctx: Arc<ServerContext>) {
        *self.ctx.write().await = Some(ctx);
    }

    pub(crate) async fn detach(&self) {
        *self.ctx.write().await = None;
    }

    /// Dispatch one tool call. Never panics and never returns a transport
    /// error: every outcome is a JSON payload with a `success` flag.
    pub async fn dispatch(&self, tool: &str, args: &Value) -> Value {
        match self.dispatch_inner(tool, args).await {
            Ok(mut payload) => {
                if let Some(map) = payload.as_object_mut() {
                    map.entry("success").or_insert(json!(true));
                }
                payload
            }
            Err(e) => error_payload(&e),
        }
    }

    async fn dispatch_inner(&self, tool: &str, args: &Value) -> Result<Value, ToolError> {
        let caller_id = optional_str(args, "caller_agent_id");

        // Bootstrap: workspace init builds the context itself.
        if tool == "init_tmux_workspace" {
            return workspace::init_tmux_workspace(self, args).await;
        }

        // Tools outside the capability table do not exist; report that
        // before the guard turns it into a permission denial.
        if !permissions::known_tools().any(|known| known == tool) {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }

        let ctx = self.resolve_context(caller_id.as_deref()).await?;

        // Owner self-creation is the other pre-agent entry point.
        let caller = match &caller_id {
            Some(id) => Some(ctx.registry.lookup(id).map_err(|_| {
                ToolError::Denied(format!("caller agent {id} is not registered"))
            })?),
            None => None,
        };
        check_permission(&ctx, tool, caller.as_ref(), args)?;

        let caller_ref = caller.as_ref();
        match tool {
            // Workspace
            "cleanup_workspace" => workspace::cleanup_workspace(self, &ctx).await,
            "check_all_tasks_completed" => workspace::check_all_tasks_completed(&ctx),
            "cleanup_on_completion" => workspace::cleanup_on_completion(self, &ctx).await,

            // Agents
            "create_agent" => agents::create_agent(&ctx, args).await,
            "create_workers_batch" => agents::create_workers_batch(&ctx, args).await,
            "list_agents" => agents::list_agents(&ctx),
            "get_agent_status" => agents::get_agent_status(&ctx, args),
            "terminate_agent" => agents::terminate_agent(&ctx, args).await,
            "initialize_agent" => agents::initialize_agent(&ctx, args).await,

            // Command
            "send_command" => command::send_command(&ctx, args).await,
            "get_output" => command::get_output(&ctx, args).await,
            "send_task" => command::send_task(&ctx, caller_ref, args).await,
            "open_session" => command::open_session(&ctx),
            "broadcast_command" => command::broadcast_command(&ctx, args).await,

            // Worktrees
            "create_worktree" => worktree::create_worktree(&ctx, args).await,
            "list_worktrees" => worktree::list_worktrees(&ctx),
            "remove_worktree" => worktree::remove_worktree(&ctx, args).await,
            "assign_worktree" => worktree::assign_worktree(&ctx, args),
            "get_worktree_status" => worktree::get_worktree_status(&ctx, args).await,

            // Merge
            "merge_completed_tasks" => merge::merge_completed_tasks(&ctx, caller_ref, args).await,

            // IPC
            "send_message" => ipc::send_message(&ctx, caller_ref, args).await,
            "read_messages" => ipc::read_messages(&ctx, caller_ref, args),
            "get_unread_count" => ipc::get_unread_count(&ctx, args),
            "register_agent_to_ipc" => ipc::register_agent_to_ipc(&ctx, args),
            "unlock_owner_wait" => ipc::unlock_owner_wait(&ctx, caller_ref),

            // Dashboard / tasks
            "create_task" => dashboard::create_task(&ctx, args),
            "reopen_task" => dashboard::reopen_task(&ctx, args),
            "update_task_status" => dashboard::update_task_status(&ctx, args),
            "assign_task_to_agent" => dashboard::assign_task_to_agent(&ctx, args),
            "list_tasks" => dashboard::list_tasks(&ctx, args),
            "get_task" => dashboard::get_task(&ctx, args),
            "remove_task" => dashboard::remove_task(&ctx, args),
            "report_task_progress" => dashboard::report_task_progress(&ctx, caller_ref, args).await,
            "report_task_completion" => {
                dashboard::report_task_completion(&ctx, caller_ref, args).await
            }
            "get_dashboard" => dashboard::get_dashboard(&ctx),
            "get_dashboard_summary" => dashboard::get_dashboard_summary(&ctx),

            // Healthcheck
            "healthcheck_agent" => health::healthcheck_agent(&ctx, args).await,
            "healthcheck_all" => health::healthcheck_all(&ctx).await,
            "get_unhealthy_agents" => health::get_unhealthy_agents(&ctx).await,
            "attempt_recovery" => health::attempt_recovery(&ctx, args).await,
            "full_recovery" => health::full_recovery(&ctx, args).await,
            "monitor_and_recover_workers" => health::monitor_and_recover_workers(&ctx).await,

            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Find the session context: the attached one, or rebuild it from the
    /// caller's global registry record when this process starts cold.
    async fn resolve_context(
        &self,
        caller_id: Option<&str>,
    ) -> Result<Arc<ServerContext>, ToolError> {
        if let Some(ctx) = self.context().await {
            return Ok(ctx);
        }

        let Some(caller_id) = caller_id else {
            return Err(ToolError::Denied(
                "no workspace attached; run init_tmux_workspace first".to_string(),
            ));
        };

        let global_dir = crate::registry::global_registry_dir();
        let record = AgentRegistry::read_global_record(&global_dir, caller_id).ok_or_else(|| {
            ToolError::Denied(format!(
                "no workspace attached and agent {caller_id} has no registry record"
            ))
        })?;

        let project_root = std::path::PathBuf::from(&record.project_root);
        let session_id = record.session_id.clone().ok_or_else(|| {
            ToolError::Denied(format!("registry record for {caller_id} lacks a session id"))
        })?;
        let settings = Settings::load(&project_root);

        debug!("rebuilding context for session {session_id} from registry record");
        let ctx = Arc::new(ServerContext::new(project_root, session_id, settings, self.mux.clone()));
        ctx.dashboard.initialize()?;
        self.attach(ctx.clone()).await;
        Ok(ctx)
    }
}

/// The permission guard. Single chokepoint: role table, owner wait-lock,
/// and worker self-scope, evaluated before any side effect.
fn check_permission(
    ctx: &ServerContext,
    tool: &str,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<(), ToolError> {
    let Some(caller) = caller else {
        // Owner self-creation is the only agentless call past bootstrap.
        if tool == "create_agent"
            && optional_str(args, "role").as_deref() == Some("owner")
        {
            return Ok(());
        }
        return Err(ToolError::Denied(format!(
            "`{tool}` requires caller_agent_id"
        )));
    };

    if !caller.is_live() {
        return Err(ToolError::Denied(format!(
            "caller agent {} is terminated",
            caller.id
        )));
    }

    // Owner wait-lock: back-pressure, checked before the role table so the
    // denial names the remaining allowed tools.
    if caller.role == AgentRole::Owner {
        let wait = ctx.owner_wait_state(&caller.id);
        if wait.active && !permissions::is_owner_wait_allowed(tool) {
            return Err(ToolError::Denied(format!(
                "owner_wait_active: `{tool}` is blocked while waiting for the admin"
            )));
        }
    }

    if !permissions::is_tool_allowed(tool, caller.role) {
        let allowed = permissions::allowed_roles(tool);
        let allowed_str: Vec<&str> = allowed.iter().map(|r| r.as_str()).collect();
        return Err(ToolError::Denied(format!(
            "role {} may not call `{tool}` (allowed roles: {})",
            caller.role,
            if allowed_str.is_empty() {
                "none".to_string()
            } else {
                allowed_str.join(", ")
            }
        )));
    }

    if caller.role == AgentRole::Worker && permissions::is_self_only(tool) {
        let target = optional_str(args, "agent_id")
            .or_else(|| optional_str(args, "target_agent_id"));
        match target {
            None => {
                return Err(ToolError::Denied(format!(
                    "`{tool}` is self-scoped for workers; agent_id is required"
                )));
            }
            Some(target) if target != caller.id => {
                return Err(ToolError::Denied(format!(
                    "workers may call `{tool}` only on themselves \
                     (caller={}, target={target})",
                    caller.id
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

/// Fold a handler error into the structured failure payload.
fn error_payload(error: &ToolError) -> Value {
    let code = error.error_code();
    let mut payload = json!({
        "success": false,
        "error": code.as_str(),
        "message": error.to_string(),
    });

    let map = payload.as_object_mut().expect("payload is an object");
    match error {
        ToolError::Dashboard(e)
            if matches!(
                code,
                ErrorCode::InvalidTransition | ErrorCode::TerminalStateImmutable
            ) =>
        {
            let allowed: Vec<&str> = e.allowed_set().iter().map(|s| s.as_str()).collect();
            map.insert("allowed".to_string(), json!(allowed));
        }
        ToolError::Denied(message) => {
            if message.starts_with("owner_wait_active") {
                map.insert("error".to_string(), json!(ErrorCode::OwnerWaitActive.as_str()));
                map.insert(
                    "allowed_tools".to_string(),
                    json!(permissions::OWNER_WAIT_ALLOWED_TOOLS),
                );
            }
        }
        _ => {}
    }
    payload
}

/// Payload for the owner polling guard (no I/O performed).
pub(crate) fn polling_blocked_payload() -> Value {
    json!({
        "success": false,
        "error": ErrorCode::PollingBlocked.as_str(),
        "message": "polling_blocked: wait for a pane notification before reading again",
    })
}

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

pub(crate) fn required_str(args: &Value, field: &'static str) -> Result<String, ToolError> {
    optional_str(args, field).ok_or(ToolError::MissingField(field))
}

pub(crate) fn optional_str(args: &Value, field: &str) -> Option<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn optional_bool(args: &Value, field: &str) -> Option<bool> {
    args.get(field).and_then(|v| v.as_bool())
}

pub(crate) fn optional_u64(args: &Value, field: &str) -> Option<u64> {
    args.get(field).and_then(|v| v.as_u64())
}

#[cfg(test)]
pub(crate) mod testkit;
