// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Markdown view of the dashboard.
//!
//! Rendering is a pure function over the front matter: the same persisted
//! state always yields byte-identical markdown, so the view can be
//! regenerated from disk at any time. Timestamps come from the dashboard
//! record, never from the clock.

use chrono::{DateTime, Utc};

use super::types::{Dashboard, TaskStatus};

/// How many trailing message-log rows the view shows.
const MESSAGE_ROWS: usize = 10;

fn ts(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn opt_ts(value: &Option<DateTime<Utc>>) -> String {
    value.as_ref().map(ts).unwrap_or_else(|| "-".to_string())
}

fn status_emoji(status: &str) -> &'static str {
    match status {
        "idle" => "🟢",
        "busy" => "🔵",
        "blocked" => "🟡",
        "terminated" => "⚫",
        _ => "⚪",
    }
}

fn task_emoji(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "⏳",
        TaskStatus::InProgress => "🔄",
        TaskStatus::Completed => "✅",
        TaskStatus::Failed => "❌",
        TaskStatus::Blocked => "🚫",
        TaskStatus::Cancelled => "🗑️",
    }
}

/// Render the markdown body shown below the front matter.
pub fn render_markdown(dashboard: &Dashboard) -> String {
    let mut lines: Vec<String> = vec![
        "# Agent Dashboard".to_string(),
        String::new(),
        format!("**Updated**: {}", ts(&dashboard.updated_at)),
    ];

    lines.extend(agent_table(dashboard));
    lines.extend(task_table(dashboard));
    lines.extend(stats_section(dashboard));
    lines.extend(message_section(dashboard));

    let mut body = lines.join("\n");
    body.push('\n');
    body
}

fn agent_table(dashboard: &Dashboard) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "---".to_string(),
        String::new(),
        "## Agents".to_string(),
        String::new(),
        "| ID | Name | Role | Status | Current task | Worktree |".to_string(),
        "|:---|:---|:---|:---|:---|:---|".to_string(),
    ];

    for agent in &dashboard.agents {
        let name = agent.name.as_deref().unwrap_or(&agent.role);
        let task = agent.current_task_id.as_deref().unwrap_or("-");
        let worktree = agent.worktree_path.as_deref().unwrap_or("-");
        lines.push(format!(
            "| `{}` | `{}` | {} | {} {} | {} | {} |",
            agent.agent_id,
            name,
            agent.role,
            status_emoji(&agent.status),
            agent.status,
            task,
            worktree,
        ));
    }
    lines
}

fn task_table(dashboard: &Dashboard) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "---".to_string(),
        String::new(),
        "## Tasks".to_string(),
        String::new(),
        "| ID | Title | Status | Assignee | Progress | Branch |".to_string(),
        "|:---|:---|:---|:---|:---|:---|".to_string(),
    ];

    for task in &dashboard.tasks {
        let assignee = task.assigned_agent_id.as_deref().unwrap_or("-");
        let branch = task.branch.as_deref().unwrap_or("-");
        lines.push(format!(
            "| `{}` | {} | {} {} | {} | {}% | {} |",
            task.id,
            task.title,
            task_emoji(task.status),
            task.status,
            assignee,
            task.progress,
            branch,
        ));
    }
    lines
}

fn stats_section(dashboard: &Dashboard) -> Vec<String> {
    vec![
        String::new(),
        "---".to_string(),
        String::new(),
        "## Session".to_string(),
        String::new(),
        format!("- Started: {}", opt_ts(&dashboard.session_started_at)),
        format!("- Finished: {}", opt_ts(&dashboard.session_finished_at)),
        format!(
            "- Agents: {} total / {} active",
            dashboard.total_agents, dashboard.active_agents
        ),
        format!(
            "- Tasks: {} total / {} completed / {} failed",
            dashboard.total_tasks, dashboard.completed_tasks, dashboard.failed_tasks
        ),
        format!(
            "- Crashes: {} / Recoveries: {}",
            dashboard.process_crash_count, dashboard.process_recovery_count
        ),
    ]
}

fn message_section(dashboard: &Dashboard) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "---".to_string(),
        String::new(),
        format!("## Messages (last {MESSAGE_ROWS})"),
        String::new(),
    ];

    let start = dashboard.messages.len().saturating_sub(MESSAGE_ROWS);
    for msg in &dashboard.messages[start..] {
        let receiver = msg.receiver_id.as_deref().unwrap_or("all");
        let subject = if msg.subject.is_empty() {
            msg.content.chars().take(60).collect::<String>()
        } else {
            msg.subject.clone()
        };
        lines.push(format!(
            "- {} `{}` {} → {}: {}",
            ts(&msg.created_at),
            msg.message_type,
            msg.sender_id,
            receiver,
            subject,
        ));
    }
    if dashboard.messages.is_empty() {
        lines.push("- (none)".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::types::{AgentSummary, MessageSummary, TaskInfo};

    fn sample_dashboard() -> Dashboard {
        let mut dashboard = Dashboard::new("s1", "/p");
        let mut task = TaskInfo::new("build the thing");
        task.id = "t1".to_string();
        task.assigned_agent_id = Some("w1".to_string());
        task.progress = 40;
        task.status = TaskStatus::InProgress;
        dashboard.tasks.push(task);
        dashboard.agents.push(AgentSummary {
            agent_id: "w1".to_string(),
            name: Some("claude1".to_string()),
            role: "worker".to_string(),
            status: "busy".to_string(),
            current_task_id: Some("t1".to_string()),
            worktree_path: Some("/wt/b1".to_string()),
            branch: Some("b1".to_string()),
            last_activity: None,
            process_recovery_count: 0,
        });
        dashboard.messages.push(MessageSummary {
            sender_id: "w1".to_string(),
            receiver_id: Some("admin".to_string()),
            message_type: "task_progress".to_string(),
            subject: "40%".to_string(),
            content: "making progress".to_string(),
            created_at: dashboard.updated_at,
        });
        dashboard
    }

    #[test]
    fn test_render_contains_tables() {
        let body = render_markdown(&sample_dashboard());
        assert!(body.contains("## Agents"));
        assert!(body.contains("| `w1` | `claude1` | worker | 🔵 busy | t1 | /wt/b1 |"));
        assert!(body.contains("## Tasks"));
        assert!(body.contains("| `t1` | build the thing | 🔄 in_progress | w1 | 40% | - |"));
        assert!(body.contains("task_progress"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let dashboard = sample_dashboard();
        assert_eq!(render_markdown(&dashboard), render_markdown(&dashboard));
    }

    #[test]
    fn test_message_tail_window() {
        let mut dashboard = sample_dashboard();
        for i in 0..20 {
            dashboard.messages.push(MessageSummary {
                sender_id: format!("s{i}"),
                receiver_id: None,
                message_type: "system".to_string(),
                subject: format!("msg {i}"),
                content: String::new(),
                created_at: dashboard.updated_at,
            });
        }
        let body = render_markdown(&dashboard);
        assert!(body.contains("msg 19"));
        assert!(!body.contains("msg 5\n"));
    }
}
