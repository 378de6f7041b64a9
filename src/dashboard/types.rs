// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Dashboard data model: tasks, agent summaries, session counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved task metadata keys, passed through verbatim.
pub const META_TASK_KIND: &str = "task_kind";
pub const META_REQUIRES_PLAYWRIGHT: &str = "requires_playwright";
pub const META_OUTPUT_DIR: &str = "output_dir";
pub const META_REQUESTED_DESCRIPTION: &str = "requested_description";

// ============================================================================
// Task status & transition graph
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Terminal states leave only through `reopen_task`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses reachable from this one. Terminal states allow none.
    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Cancelled, Self::Blocked],
            Self::InProgress => &[Self::Completed, Self::Failed, Self::Cancelled, Self::Blocked],
            Self::Blocked => &[Self::InProgress, Self::Cancelled, Self::Failed],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip `task:`/`task_`/`task-` prefixes and lowercase, for lookups.
pub fn normalize_task_id(task_id: &str) -> String {
    let normalized = task_id.trim().to_ascii_lowercase();
    for prefix in ["task:", "task_", "task-"] {
        if let Some(rest) = normalized.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    normalized
}

// ============================================================================
// Task record
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_file_path: Option<String>,
}

impl TaskInfo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            progress: 0,
            assigned_agent_id: None,
            previous_agent_id: None,
            branch: None,
            worktree_path: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: BTreeMap::new(),
            task_file_path: None,
        }
    }
}

// ============================================================================
// Agent summary & message log rows
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub process_recovery_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    pub message_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Dashboard root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub workspace_id: String,
    pub workspace_path: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub process_crash_count: u32,
    #[serde(default)]
    pub process_recovery_count: u32,

    #[serde(default)]
    pub agents: Vec<AgentSummary>,
    #[serde(default)]
    pub tasks: Vec<TaskInfo>,

    // Derived counters, recomputed on every mutation.
    #[serde(default)]
    pub total_agents: usize,
    #[serde(default)]
    pub active_agents: usize,
    #[serde(default)]
    pub total_tasks: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub failed_tasks: usize,

    #[serde(default)]
    pub cost_warning_threshold_usd: f64,

    /// Append-only message log.
    #[serde(default)]
    pub messages: Vec<MessageSummary>,
}

impl Dashboard {
    pub fn new(workspace_id: impl Into<String>, workspace_path: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            workspace_path: workspace_path.into(),
            updated_at: Utc::now(),
            session_started_at: None,
            session_finished_at: None,
            process_crash_count: 0,
            process_recovery_count: 0,
            agents: Vec::new(),
            tasks: Vec::new(),
            total_agents: 0,
            active_agents: 0,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cost_warning_threshold_usd: 10.0,
            messages: Vec::new(),
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<&TaskInfo> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<&AgentSummary> {
        self.agents.iter().find(|a| a.agent_id == agent_id)
    }

    pub fn get_agent_mut(&mut self, agent_id: &str) -> Option<&mut AgentSummary> {
        self.agents.iter_mut().find(|a| a.agent_id == agent_id)
    }

    /// Resolve a task id: exact match, then normalized match, then unique
    /// prefix match.
    pub fn resolve_task_index(&self, task_id: &str) -> Option<usize> {
        if let Some(i) = self.tasks.iter().position(|t| t.id == task_id) {
            return Some(i);
        }
        let target = normalize_task_id(task_id);
        if target.is_empty() {
            return None;
        }

        let normalized: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| normalize_task_id(&t.id) == target)
            .map(|(i, _)| i)
            .collect();
        if normalized.len() == 1 {
            return Some(normalized[0]);
        }

        let prefixed: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| normalize_task_id(&t.id).starts_with(&target))
            .map(|(i, _)| i)
            .collect();
        if prefixed.len() == 1 {
            return Some(prefixed[0]);
        }
        None
    }

    pub fn tasks_by_status(&self, status: TaskStatus) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.iter().filter(move |t| t.status == status)
    }

    pub fn has_active_tasks(&self) -> bool {
        self.tasks.iter().any(|t| t.status.is_active())
    }

    /// Recompute the derived counters and stamp `updated_at`.
    pub fn calculate_stats(&mut self) {
        self.total_agents = self.agents.len();
        self.active_agents = self
            .agents
            .iter()
            .filter(|a| a.status == "idle" || a.status == "busy")
            .count();
        self.total_tasks = self.tasks.len();
        self.completed_tasks = self.tasks_by_status(TaskStatus::Completed).count();
        self.failed_tasks = self.tasks_by_status(TaskStatus::Failed).count();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_graph_matches_contract() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Blocked));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));

        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Blocked));
        assert!(!InProgress.can_transition_to(Pending));

        assert!(Blocked.can_transition_to(InProgress));
        assert!(Blocked.can_transition_to(Cancelled));
        assert!(Blocked.can_transition_to(Failed));
        assert!(!Blocked.can_transition_to(Completed));

        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(terminal.allowed_transitions().is_empty());
        }
    }

    #[test]
    fn test_normalize_task_id() {
        assert_eq!(normalize_task_id("Task:ABC"), "abc");
        assert_eq!(normalize_task_id("task_42"), "42");
        assert_eq!(normalize_task_id("task-42"), "42");
        assert_eq!(normalize_task_id("  plain  "), "plain");
    }

    #[test]
    fn test_resolve_task_exact_normalized_prefix() {
        let mut dashboard = Dashboard::new("w", "/p");
        let mut t1 = TaskInfo::new("one");
        t1.id = "abc123def".to_string();
        let mut t2 = TaskInfo::new("two");
        t2.id = "xyz789".to_string();
        dashboard.tasks = vec![t1, t2];

        assert_eq!(dashboard.resolve_task_index("abc123def"), Some(0));
        assert_eq!(dashboard.resolve_task_index("task:ABC123DEF"), Some(0));
        assert_eq!(dashboard.resolve_task_index("xyz"), Some(1));
        assert_eq!(dashboard.resolve_task_index("nope"), None);
    }

    #[test]
    fn test_resolve_ambiguous_prefix_is_none() {
        let mut dashboard = Dashboard::new("w", "/p");
        let mut t1 = TaskInfo::new("one");
        t1.id = "aa1".to_string();
        let mut t2 = TaskInfo::new("two");
        t2.id = "aa2".to_string();
        dashboard.tasks = vec![t1, t2];

        assert_eq!(dashboard.resolve_task_index("aa"), None);
    }

    #[test]
    fn test_calculate_stats() {
        let mut dashboard = Dashboard::new("w", "/p");
        let mut done = TaskInfo::new("done");
        done.status = TaskStatus::Completed;
        dashboard.tasks = vec![TaskInfo::new("open"), done];
        dashboard.agents = vec![AgentSummary {
            agent_id: "a1".to_string(),
            name: None,
            role: "worker".to_string(),
            status: "busy".to_string(),
            current_task_id: None,
            worktree_path: None,
            branch: None,
            last_activity: None,
            process_recovery_count: 0,
        }];

        dashboard.calculate_stats();
        assert_eq!(dashboard.total_tasks, 2);
        assert_eq!(dashboard.completed_tasks, 1);
        assert_eq!(dashboard.active_agents, 1);
        assert!(dashboard.has_active_tasks());
    }
}
