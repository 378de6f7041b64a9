// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Role-based tool permissions.
//!
//! A static capability table maps each tool name to the roles allowed to
//! call it. Tools absent from the table are fail-closed: the guard rejects
//! them rather than defaulting to allow. Self-only tools additionally
//! require that a worker's target agent equals the caller.

use crate::agents::AgentRole;

/// Tools callable before any agent exists (workspace bootstrap).
pub const BOOTSTRAP_TOOLS: &[&str] = &["init_tmux_workspace"];

/// Tools an owner may still call while the wait-lock is active.
pub const OWNER_WAIT_ALLOWED_TOOLS: &[&str] =
    &["read_messages", "get_unread_count", "unlock_owner_wait"];

const OWNER: AgentRole = AgentRole::Owner;
const ADMIN: AgentRole = AgentRole::Admin;
const WORKER: AgentRole = AgentRole::Worker;

/// (tool name, allowed roles, worker self-scope)
static TOOL_PERMISSIONS: &[(&str, &[AgentRole], bool)] = &[
    // Workspace
    ("init_tmux_workspace", &[OWNER], false),
    ("cleanup_workspace", &[OWNER], false),
    ("cleanup_on_completion", &[OWNER], false),
    ("check_all_tasks_completed", &[OWNER, ADMIN], false),
    // Agents
    ("create_agent", &[OWNER, ADMIN], false),
    ("create_workers_batch", &[OWNER, ADMIN], false),
    ("list_agents", &[OWNER, ADMIN, WORKER], false),
    ("get_agent_status", &[OWNER, ADMIN, WORKER], false),
    ("terminate_agent", &[OWNER, ADMIN], false),
    ("initialize_agent", &[OWNER, ADMIN], false),
    // Command
    ("send_command", &[OWNER, ADMIN], false),
    ("get_output", &[OWNER, ADMIN, WORKER], false),
    ("send_task", &[OWNER, ADMIN], false),
    ("open_session", &[OWNER, ADMIN], false),
    ("broadcast_command", &[ADMIN], false),
    // Worktree
    ("create_worktree", &[OWNER, ADMIN], false),
    ("list_worktrees", &[OWNER, ADMIN, WORKER], false),
    ("remove_worktree", &[OWNER, ADMIN], false),
    ("assign_worktree", &[OWNER, ADMIN], false),
    ("get_worktree_status", &[OWNER, ADMIN, WORKER], false),
    // Merge
    ("merge_completed_tasks", &[OWNER, ADMIN], false),
    // IPC
    ("send_message", &[OWNER, ADMIN, WORKER], false),
    ("read_messages", &[OWNER, ADMIN, WORKER], true),
    ("get_unread_count", &[OWNER, ADMIN, WORKER], true),
    ("register_agent_to_ipc", &[OWNER, ADMIN], false),
    ("unlock_owner_wait", &[OWNER], false),
    // Dashboard / tasks
    ("create_task", &[OWNER, ADMIN], false),
    ("reopen_task", &[OWNER, ADMIN], false),
    ("update_task_status", &[ADMIN], false),
    ("assign_task_to_agent", &[ADMIN], false),
    ("list_tasks", &[OWNER, ADMIN, WORKER], false),
    ("get_task", &[OWNER, ADMIN, WORKER], false),
    ("remove_task", &[OWNER, ADMIN], false),
    ("report_task_progress", &[WORKER], false),
    ("report_task_completion", &[WORKER], false),
    ("get_dashboard", &[OWNER, ADMIN, WORKER], false),
    ("get_dashboard_summary", &[OWNER, ADMIN, WORKER], false),
    // Healthcheck
    ("healthcheck_agent", &[OWNER, ADMIN], false),
    ("healthcheck_all", &[OWNER, ADMIN], false),
    ("get_unhealthy_agents", &[OWNER, ADMIN], false),
    ("attempt_recovery", &[OWNER, ADMIN], false),
    ("full_recovery", &[ADMIN], false),
    ("monitor_and_recover_workers", &[OWNER, ADMIN], false),
];

fn lookup(tool_name: &str) -> Option<&'static (&'static str, &'static [AgentRole], bool)> {
    TOOL_PERMISSIONS.iter().find(|(name, _, _)| *name == tool_name)
}

/// Roles allowed to call a tool; empty for unknown tools (fail-closed).
pub fn allowed_roles(tool_name: &str) -> &'static [AgentRole] {
    lookup(tool_name).map(|(_, roles, _)| *roles).unwrap_or(&[])
}

/// Whether `role` may call `tool_name`.
pub fn is_tool_allowed(tool_name: &str, role: AgentRole) -> bool {
    allowed_roles(tool_name).contains(&role)
}

/// Whether a worker calling this tool must target itself.
pub fn is_self_only(tool_name: &str) -> bool {
    lookup(tool_name).map(|(_, _, s)| *s).unwrap_or(false)
}

/// Whether the tool may run before any agent exists.
pub fn is_bootstrap_tool(tool_name: &str) -> bool {
    BOOTSTRAP_TOOLS.contains(&tool_name)
}

/// Whether the tool stays allowed while the owner wait-lock is active.
pub fn is_owner_wait_allowed(tool_name: &str) -> bool {
    OWNER_WAIT_ALLOWED_TOOLS.contains(&tool_name)
}

/// All tool names in the capability table.
pub fn known_tools() -> impl Iterator<Item = &'static str> {
    TOOL_PERMISSIONS.iter().map(|(name, _, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_fails_closed() {
        assert!(allowed_roles("delete_everything").is_empty());
        assert!(!is_tool_allowed("delete_everything", AgentRole::Owner));
    }

    #[test]
    fn test_worker_scoped_tools() {
        assert!(is_self_only("read_messages"));
        assert!(is_self_only("get_unread_count"));
        assert!(!is_self_only("send_message"));
    }

    #[test]
    fn test_role_splits() {
        assert!(is_tool_allowed("init_tmux_workspace", AgentRole::Owner));
        assert!(!is_tool_allowed("init_tmux_workspace", AgentRole::Admin));

        assert!(is_tool_allowed("update_task_status", AgentRole::Admin));
        assert!(!is_tool_allowed("update_task_status", AgentRole::Owner));

        assert!(is_tool_allowed("report_task_progress", AgentRole::Worker));
        assert!(!is_tool_allowed("report_task_progress", AgentRole::Admin));

        assert!(is_tool_allowed("full_recovery", AgentRole::Admin));
        assert!(!is_tool_allowed("full_recovery", AgentRole::Owner));
    }

    #[test]
    fn test_owner_wait_allowlist() {
        assert!(is_owner_wait_allowed("read_messages"));
        assert!(is_owner_wait_allowed("unlock_owner_wait"));
        assert!(!is_owner_wait_allowed("send_task"));
    }

    #[test]
    fn test_bootstrap_tools() {
        assert!(is_bootstrap_tool("init_tmux_workspace"));
        assert!(!is_bootstrap_tool("create_agent"));
    }

    #[test]
    fn test_table_has_no_duplicates() {
        let mut names: Vec<_> = known_tools().collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
