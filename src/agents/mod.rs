// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent model: roles, statuses, pane bindings and display names.
//!
//! An agent is a long-running AI CLI subprocess bound to one tmux pane.
//! Agents form a three-tier hierarchy per session: exactly one owner, at
//! most one admin, and up to `max_workers` workers. The owner runs outside
//! tmux (the controlling assistant is the owner), so it carries no pane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AiCli;

// ============================================================================
// Roles and statuses
// ============================================================================

/// Role in the session hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Overall direction: plans, decomposes work, reviews results.
    Owner,
    /// Worker management, progress tracking, dashboard upkeep.
    Admin,
    /// Executes assigned tasks inside an isolated working copy.
    Worker,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Worker => "worker",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Blocked,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Blocked => "blocked",
            Self::Terminated => "terminated",
        }
    }

    /// Terminated agents are never resurrected; a replacement gets a new id.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Pane binding
// ============================================================================

/// An addressable pane: (session, window, pane index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneRef {
    pub session_name: String,
    pub window_index: u32,
    pub pane_index: u32,
}

impl PaneRef {
    pub fn new(session_name: impl Into<String>, window_index: u32, pane_index: u32) -> Self {
        Self {
            session_name: session_name.into(),
            window_index,
            pane_index,
        }
    }

    /// The tmux target string `session:window.pane`.
    pub fn target(&self) -> String {
        format!("{}:{}.{}", self.session_name, self.window_index, self.pane_index)
    }
}

// ============================================================================
// Agent record
// ============================================================================

/// Persistent record for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Opaque stable identifier.
    pub id: String,
    pub role: AgentRole,
    pub status: AgentStatus,

    /// Pane binding; `None` for the owner, who runs outside tmux.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane: Option<PaneRef>,

    pub working_dir: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Chosen CLI backend; `None` means resolve at dispatch time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_cli: Option<AiCli>,

    /// 1-based worker slot; workers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_slot: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Agent {
    /// Create a new agent with a fresh id.
    pub fn new(role: AgentRole, working_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            status: AgentStatus::Idle,
            pane: None,
            working_dir: working_dir.into(),
            worktree_path: None,
            branch: None,
            ai_cli: None,
            worker_slot: None,
            current_task_id: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn with_pane(mut self, pane: PaneRef) -> Self {
        self.pane = Some(pane);
        self
    }

    pub fn with_worker_slot(mut self, slot: u32) -> Self {
        self.worker_slot = Some(slot);
        self
    }

    pub fn with_ai_cli(mut self, cli: AiCli) -> Self {
        self.ai_cli = Some(cli);
        self
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Display name: `owner`, `admin`, or `{cli}{slot}` for workers.
    pub fn display_name(&self, default_cli: AiCli) -> String {
        match self.role {
            AgentRole::Owner => "owner".to_string(),
            AgentRole::Admin => "admin".to_string(),
            AgentRole::Worker => {
                let cli = self.ai_cli.unwrap_or(default_cli);
                match self.worker_slot {
                    Some(slot) => format!("{}{}", cli.as_str(), slot),
                    None => format!("{}-{}", cli.as_str(), &self.id[..self.id.len().min(8)]),
                }
            }
        }
    }
}

// ============================================================================
// Worker slot geometry
// ============================================================================

/// Pane occupied by the admin in the main window.
pub const ADMIN_PANE: u32 = 0;

/// Worker panes in the main window (slots 1-6).
pub const MAIN_WINDOW_WORKER_PANES: u32 = 6;

/// Map a 1-based worker slot to its (window, pane) coordinates.
///
/// Slots 1-6 sit in the main window to the right of the admin; later slots
/// spill into extra windows holding `workers_per_extra_window` panes each.
pub fn pane_for_worker_slot(slot: u32, workers_per_extra_window: u32) -> (u32, u32) {
    debug_assert!(slot >= 1);
    if slot <= MAIN_WINDOW_WORKER_PANES {
        (0, slot)
    } else {
        let extra = slot - MAIN_WINDOW_WORKER_PANES - 1;
        let per_window = workers_per_extra_window.max(1);
        (1 + extra / per_window, extra % per_window)
    }
}

/// Inverse of [`pane_for_worker_slot`]; `None` for the admin pane or
/// coordinates outside worker geometry.
pub fn worker_slot_for_pane(
    window_index: u32,
    pane_index: u32,
    workers_per_extra_window: u32,
) -> Option<u32> {
    if window_index == 0 {
        if (1..=MAIN_WINDOW_WORKER_PANES).contains(&pane_index) {
            Some(pane_index)
        } else {
            None
        }
    } else {
        let per_window = workers_per_extra_window.max(1);
        if pane_index >= per_window {
            return None;
        }
        Some(MAIN_WINDOW_WORKER_PANES + (window_index - 1) * per_window + pane_index + 1)
    }
}
