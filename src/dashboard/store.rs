// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable dashboard store.
//!
//! One file per session: `{session_dir}/dashboard/dashboard.md`, YAML front
//! matter (machine state) followed by a derived markdown view. There is no
//! long-lived in-memory copy; every mutation takes the sibling
//! `dashboard.lock`, re-reads the file, applies the change, re-renders and
//! writes atomically. Read-only operations skip the lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{DashboardError, StoreError};
use crate::store;

use super::render::render_markdown;
use super::types::{
    AgentSummary, Dashboard, MessageSummary, TaskInfo, TaskStatus, META_OUTPUT_DIR,
    META_REQUESTED_DESCRIPTION,
};

pub struct DashboardStore {
    workspace_id: String,
    workspace_path: String,
    dashboard_dir: PathBuf,
    reports_dir: PathBuf,
}

impl DashboardStore {
    pub fn new(
        workspace_id: impl Into<String>,
        workspace_path: impl Into<String>,
        session_dir: &Path,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            workspace_path: workspace_path.into(),
            dashboard_dir: session_dir.join("dashboard"),
            reports_dir: session_dir.join("reports"),
        }
    }

    pub fn dashboard_path(&self) -> PathBuf {
        self.dashboard_dir.join("dashboard.md")
    }

    fn lock_path(&self) -> PathBuf {
        self.dashboard_dir.join("dashboard.lock")
    }

    /// Create the dashboard file when missing.
    pub fn initialize(&self) -> Result<(), DashboardError> {
        std::fs::create_dir_all(&self.dashboard_dir).map_err(|e| StoreError::Io(e))?;
        if !self.dashboard_path().exists() {
            let mut dashboard = Dashboard::new(self.workspace_id.clone(), self.workspace_path.clone());
            dashboard.calculate_stats();
            self.write(&dashboard)?;
            info!("initialized dashboard at {:?}", self.dashboard_path());
        }
        Ok(())
    }

    /// Read the current state without taking the lock.
    pub fn read(&self) -> Dashboard {
        let path = self.dashboard_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => match parse_front_matter(&content) {
                Some(dashboard) => dashboard,
                None => {
                    warn!("dashboard front matter unreadable, starting fresh: {path:?}");
                    Dashboard::new(self.workspace_id.clone(), self.workspace_path.clone())
                }
            },
            Err(_) => Dashboard::new(self.workspace_id.clone(), self.workspace_path.clone()),
        }
    }

    fn write(&self, dashboard: &Dashboard) -> Result<(), DashboardError> {
        let front = serde_yaml::to_string(dashboard).map_err(StoreError::Yaml)?;
        let body = render_markdown(dashboard);
        let content = format!("---\n{front}---\n\n{body}");
        store::atomic_write(&self.dashboard_path(), &content).map_err(DashboardError::Store)
    }

    /// Run a mutation transactionally: lock, re-read, mutate, re-render,
    /// write, unlock. The write is skipped when the mutator fails, so
    /// rejected transitions leave the file untouched.
    pub fn transaction<R, F>(&self, mutator: F) -> Result<R, DashboardError>
    where
        F: FnOnce(&mut Dashboard) -> Result<R, DashboardError>,
    {
        let _lock =
            store::FileLock::acquire(&self.lock_path()).map_err(DashboardError::Store)?;
        let mut dashboard = self.read();
        let result = mutator(&mut dashboard)?;
        dashboard.calculate_stats();
        self.write(&dashboard)?;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Task operations
    // ------------------------------------------------------------------

    /// Create a task in `pending`. A non-empty description is preserved in
    /// metadata; `output_dir` defaults to the session reports directory.
    pub fn create_task(
        &self,
        title: &str,
        description: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<TaskInfo, DashboardError> {
        self.create_task_with_id(None, title, description, metadata)
    }

    /// Like [`Self::create_task`], but idempotent when the caller supplies
    /// an explicit id: a retry with the same id returns the existing task
    /// instead of creating a duplicate.
    pub fn create_task_with_id(
        &self,
        explicit_id: Option<String>,
        title: &str,
        description: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<TaskInfo, DashboardError> {
        let reports_dir = self.reports_dir.display().to_string();
        self.transaction(|dashboard| {
            if let Some(id) = &explicit_id {
                if let Some(existing) = dashboard.get_task(id) {
                    return Ok(existing.clone());
                }
            }

            let mut task = TaskInfo::new(title);
            if let Some(id) = explicit_id {
                task.id = id;
            }
            task.metadata = metadata;
            if !description.is_empty() {
                task.metadata
                    .entry(META_REQUESTED_DESCRIPTION.to_string())
                    .or_insert_with(|| json!(description));
            }
            task.metadata
                .entry(META_OUTPUT_DIR.to_string())
                .or_insert_with(|| json!(reports_dir));

            dashboard.tasks.push(task.clone());
            info!("created task {} - {}", task.id, task.title);
            Ok(task)
        })
    }

    /// Validated status change. Rejections are structured errors carrying
    /// the allowed set; terminal states are immutable outside `reopen_task`.
    pub fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: Option<u8>,
        error_message: Option<String>,
    ) -> Result<TaskInfo, DashboardError> {
        self.transaction(|dashboard| {
            let index = dashboard
                .resolve_task_index(task_id)
                .ok_or_else(|| DashboardError::TaskNotFound(task_id.to_string()))?;
            let old_status = dashboard.tasks[index].status;

            if !old_status.can_transition_to(status) {
                if old_status.is_terminal() {
                    return Err(DashboardError::TerminalStateImmutable {
                        task_id: dashboard.tasks[index].id.clone(),
                        status: old_status,
                    });
                }
                return Err(DashboardError::InvalidTransition {
                    from: old_status,
                    to: status,
                    allowed: old_status.allowed_transitions().to_vec(),
                });
            }

            apply_status_change(dashboard, index, status, progress, error_message);
            let task = dashboard.tasks[index].clone();
            info!("task {} status: {} -> {}", task.id, old_status, status);
            Ok(task)
        })
    }

    /// Reset a terminal task to `pending`. Assignment history moves to
    /// `previous_agent_id`; metadata is preserved.
    pub fn reopen_task(&self, task_id: &str) -> Result<TaskInfo, DashboardError> {
        self.transaction(|dashboard| {
            let index = dashboard
                .resolve_task_index(task_id)
                .ok_or_else(|| DashboardError::TaskNotFound(task_id.to_string()))?;
            let task = &mut dashboard.tasks[index];
            if !task.status.is_terminal() {
                return Err(DashboardError::NotTerminal {
                    task_id: task.id.clone(),
                    status: task.status,
                });
            }

            task.status = TaskStatus::Pending;
            task.completed_at = None;
            task.error_message = None;
            if let Some(agent) = task.assigned_agent_id.take() {
                task.previous_agent_id = Some(agent);
            }
            task.metadata
                .insert("reopened_at".to_string(), json!(Utc::now().to_rfc3339()));
            dashboard.session_finished_at = None;

            let task = dashboard.tasks[index].clone();
            clear_agent_task(dashboard, &task.id);
            info!("reopened task {}", task.id);
            Ok(task)
        })
    }

    /// Assign a task. A prior assignee holding this task as its current one
    /// is cleared in the agent summaries.
    pub fn assign_task(
        &self,
        task_id: &str,
        agent_id: &str,
        branch: Option<String>,
        worktree_path: Option<String>,
    ) -> Result<TaskInfo, DashboardError> {
        self.transaction(|dashboard| {
            let index = dashboard
                .resolve_task_index(task_id)
                .ok_or_else(|| DashboardError::TaskNotFound(task_id.to_string()))?;

            let previous = dashboard.tasks[index].assigned_agent_id.clone();
            {
                let task = &mut dashboard.tasks[index];
                if let Some(prev) = &previous {
                    if prev != agent_id {
                        task.previous_agent_id = Some(prev.clone());
                    }
                }
                task.assigned_agent_id = Some(agent_id.to_string());
                if branch.is_some() {
                    task.branch = branch;
                }
                if worktree_path.is_some() {
                    task.worktree_path = worktree_path;
                }
            }

            let (task_id_owned, task_active) = {
                let task = &dashboard.tasks[index];
                (task.id.clone(), task.status.is_active())
            };

            if let Some(prev) = previous.filter(|p| p != agent_id) {
                if let Some(summary) = dashboard.get_agent_mut(&prev) {
                    if summary.current_task_id.as_deref() == Some(task_id_owned.as_str()) {
                        summary.current_task_id = None;
                        if summary.role == "worker" {
                            summary.status = "idle".to_string();
                        }
                    }
                }
            }
            if task_active {
                if let Some(summary) = dashboard.get_agent_mut(agent_id) {
                    summary.current_task_id = Some(task_id_owned.clone());
                    if summary.role == "worker" {
                        summary.status = "busy".to_string();
                    }
                }
            }

            info!("assigned task {} to {}", task_id_owned, agent_id);
            Ok(dashboard.tasks[index].clone())
        })
    }

    /// Update progress and append a `task_progress` entry to the message
    /// log. Terminal tasks reject the update like any other transition rule.
    pub fn report_progress(
        &self,
        task_id: &str,
        progress: u8,
        sender_id: &str,
        message: &str,
    ) -> Result<TaskInfo, DashboardError> {
        self.transaction(|dashboard| {
            let index = dashboard
                .resolve_task_index(task_id)
                .ok_or_else(|| DashboardError::TaskNotFound(task_id.to_string()))?;
            let current = dashboard.tasks[index].status;
            if current.is_terminal() {
                return Err(DashboardError::TerminalStateImmutable {
                    task_id: dashboard.tasks[index].id.clone(),
                    status: current,
                });
            }

            let task = &mut dashboard.tasks[index];
            task.progress = progress.min(100);
            task.metadata.insert(
                "last_in_progress_update_at".to_string(),
                json!(Utc::now().to_rfc3339()),
            );
            let entry = MessageSummary {
                sender_id: sender_id.to_string(),
                receiver_id: None,
                message_type: "task_progress".to_string(),
                subject: format!("{}%", task.progress),
                content: message.to_string(),
                created_at: Utc::now(),
            };
            let task = dashboard.tasks[index].clone();
            dashboard.messages.push(entry);
            Ok(task)
        })
    }

    pub fn remove_task(&self, task_id: &str) -> Result<TaskInfo, DashboardError> {
        self.transaction(|dashboard| {
            let index = dashboard
                .resolve_task_index(task_id)
                .ok_or_else(|| DashboardError::TaskNotFound(task_id.to_string()))?;
            let task = dashboard.tasks.remove(index);
            clear_agent_task(dashboard, &task.id);
            info!("removed task {}", task.id);
            Ok(task)
        })
    }

    pub fn get_task(&self, task_id: &str) -> Option<TaskInfo> {
        let dashboard = self.read();
        dashboard
            .resolve_task_index(task_id)
            .map(|i| dashboard.tasks[i].clone())
    }

    pub fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        agent_id: Option<&str>,
    ) -> Vec<TaskInfo> {
        self.read()
            .tasks
            .into_iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .filter(|t| agent_id.map_or(true, |a| t.assigned_agent_id.as_deref() == Some(a)))
            .collect()
    }

    /// Record the relative task-file path on a task.
    pub fn set_task_file(&self, task_id: &str, path: &str) -> Result<(), DashboardError> {
        self.transaction(|dashboard| {
            if let Some(index) = dashboard.resolve_task_index(task_id) {
                let task = &mut dashboard.tasks[index];
                task.task_file_path = Some(path.to_string());
                task.description = path.to_string();
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Message log & counters
    // ------------------------------------------------------------------

    /// Append an entry to the message log.
    pub fn append_message(
        &self,
        sender_id: &str,
        receiver_id: Option<&str>,
        message_type: &str,
        subject: &str,
        content: &str,
    ) -> Result<(), DashboardError> {
        self.transaction(|dashboard| {
            dashboard.messages.push(MessageSummary {
                sender_id: sender_id.to_string(),
                receiver_id: receiver_id.map(str::to_string),
                message_type: message_type.to_string(),
                subject: subject.to_string(),
                content: content.to_string(),
                created_at: Utc::now(),
            });
            Ok(())
        })
    }

    pub fn increment_crash_count(&self) -> Result<u32, DashboardError> {
        self.transaction(|dashboard| {
            dashboard.process_crash_count += 1;
            Ok(dashboard.process_crash_count)
        })
    }

    pub fn increment_recovery_count(&self) -> Result<u32, DashboardError> {
        self.transaction(|dashboard| {
            dashboard.process_recovery_count += 1;
            Ok(dashboard.process_recovery_count)
        })
    }

    /// Attach recovery bookkeeping to a task and its agent-summary row.
    pub fn record_task_recovery(
        &self,
        task_id: &str,
        agent_id: &str,
        reason: &str,
    ) -> Result<(), DashboardError> {
        self.transaction(|dashboard| {
            if let Some(index) = dashboard.resolve_task_index(task_id) {
                let task = &mut dashboard.tasks[index];
                let count = task
                    .metadata
                    .get("process_recovery_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                task.metadata
                    .insert("process_recovery_count".to_string(), json!(count + 1));
                task.metadata
                    .insert("last_recovery_reason".to_string(), json!(reason));
                task.metadata
                    .insert("last_recovery_at".to_string(), json!(Utc::now().to_rfc3339()));
            }
            if let Some(summary) = dashboard.get_agent_mut(agent_id) {
                summary.process_recovery_count += 1;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Agent summaries
    // ------------------------------------------------------------------

    /// Upsert one agent summary row.
    pub fn record_agent(&self, summary: AgentSummary) -> Result<(), DashboardError> {
        self.transaction(|dashboard| {
            match dashboard.get_agent_mut(&summary.agent_id) {
                Some(existing) => {
                    let kept_recoveries =
                        existing.process_recovery_count.max(summary.process_recovery_count);
                    *existing = summary;
                    existing.process_recovery_count = kept_recoveries;
                }
                None => dashboard.agents.push(summary),
            }
            Ok(())
        })
    }

    pub fn remove_agent_summary(&self, agent_id: &str) -> Result<(), DashboardError> {
        self.transaction(|dashboard| {
            dashboard.agents.retain(|a| a.agent_id != agent_id);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Summary
    // ------------------------------------------------------------------

    /// Aggregate view used by `get_dashboard_summary` and the monitor.
    pub fn summary(&self) -> serde_json::Value {
        let dashboard = self.read();
        let pending = dashboard.tasks_by_status(TaskStatus::Pending).count();
        let in_progress = dashboard.tasks_by_status(TaskStatus::InProgress).count();
        let all_tasks_completed = dashboard.total_tasks > 0
            && pending == 0
            && in_progress == 0
            && dashboard.failed_tasks == 0
            && !dashboard.has_active_tasks();

        json!({
            "workspace_id": dashboard.workspace_id,
            "total_agents": dashboard.total_agents,
            "active_agents": dashboard.active_agents,
            "total_tasks": dashboard.total_tasks,
            "completed_tasks": dashboard.completed_tasks,
            "failed_tasks": dashboard.failed_tasks,
            "pending_tasks": pending,
            "in_progress_tasks": in_progress,
            "all_tasks_completed": all_tasks_completed,
            "session_started_at": dashboard.session_started_at.map(|t| t.to_rfc3339()),
            "session_finished_at": dashboard.session_finished_at.map(|t| t.to_rfc3339()),
            "process_crash_count": dashboard.process_crash_count,
            "process_recovery_count": dashboard.process_recovery_count,
            "cost_warning_threshold_usd": dashboard.cost_warning_threshold_usd,
            "updated_at": dashboard.updated_at.to_rfc3339(),
        })
    }
}

/// Apply a validated status change and its bookkeeping side effects.
fn apply_status_change(
    dashboard: &mut Dashboard,
    index: usize,
    status: TaskStatus,
    progress: Option<u8>,
    error_message: Option<String>,
) {
    let now = Utc::now();
    let task = &mut dashboard.tasks[index];
    let task_id = task.id.clone();
    let assigned = task.assigned_agent_id.clone();

    task.status = status;
    if let Some(p) = progress {
        task.progress = p.min(100);
    }
    match (&error_message, status) {
        (Some(msg), _) => task.error_message = Some(msg.clone()),
        (None, TaskStatus::Failed) => {}
        (None, _) => task.error_message = None,
    }

    match status {
        TaskStatus::InProgress => {
            if task.started_at.is_none() {
                task.started_at = Some(now);
            }
            task.completed_at = None;
            task.metadata.insert(
                "last_in_progress_update_at".to_string(),
                json!(now.to_rfc3339()),
            );
            if dashboard.session_started_at.is_none() {
                dashboard.session_started_at = Some(now);
            }
            if let Some(agent_id) = assigned {
                if let Some(summary) = dashboard.get_agent_mut(&agent_id) {
                    summary.current_task_id = Some(task_id.clone());
                    if summary.role == "worker" {
                        summary.status = "busy".to_string();
                    }
                }
            }
        }
        s if s.is_terminal() => {
            task.completed_at = Some(now);
            if s == TaskStatus::Completed {
                task.progress = 100;
            }
            clear_agent_task(dashboard, &task_id);
        }
        _ => {}
    }

    // Session finish tracking: all present tasks terminal => finished.
    if !dashboard.tasks.is_empty() && !dashboard.has_active_tasks() {
        dashboard.session_finished_at = Some(now);
    } else {
        dashboard.session_finished_at = None;
    }
}

/// Clear `current_task_id` on any summary row holding this task; workers go
/// back to idle.
fn clear_agent_task(dashboard: &mut Dashboard, task_id: &str) {
    for summary in &mut dashboard.agents {
        if summary.current_task_id.as_deref() == Some(task_id) {
            summary.current_task_id = None;
            if summary.role == "worker" {
                summary.status = "idle".to_string();
            }
        }
    }
}

fn parse_front_matter(content: &str) -> Option<Dashboard> {
    let rest = content.strip_prefix("---\n")?;
    let (front, _) = rest.split_once("\n---\n")?;
    serde_yaml::from_str(front).ok()
}
