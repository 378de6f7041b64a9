// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared server context.
//!
//! One [`ServerContext`] per attached session bundles the stores, adapters
//! and in-process coordination state (owner wait-lock, monitor handle) that
//! tool handlers and the healthcheck daemon operate on. All durable state
//! lives in the stores; the context itself can be rebuilt from
//! `config.json` at any time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::dashboard::DashboardStore;
use crate::git::GitClient;
use crate::health::HealthcheckEngine;
use crate::health::monitor::MonitorHandle;
use crate::ipc::mailbox::Mailbox;
use crate::registry::AgentRegistry;
use crate::tmux::Multiplexer;
use crate::worktrees::WorktreeStore;

/// Owner wait-lock state, kept in-process per owner id.
#[derive(Debug, Clone, Default)]
pub struct OwnerWaitState {
    pub active: bool,
    pub admin_id: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlock_reason: Option<String>,
    /// Consecutive empty unread polls while waiting.
    pub empty_poll_count: u32,
}

/// Everything a tool handler needs for one session.
pub struct ServerContext {
    pub project_root: PathBuf,
    pub session_id: String,
    pub settings: Settings,
    pub tmux_session: String,

    pub registry: AgentRegistry,
    pub dashboard: DashboardStore,
    pub mailbox: Mailbox,
    pub worktrees: WorktreeStore,
    pub mux: Arc<dyn Multiplexer>,
    pub health: HealthcheckEngine,

    owner_wait: Mutex<HashMap<String, OwnerWaitState>>,
    pub(crate) monitor: Mutex<Option<MonitorHandle>>,
}

impl ServerContext {
    pub fn new(
        project_root: impl Into<PathBuf>,
        session_id: impl Into<String>,
        settings: Settings,
        mux: Arc<dyn Multiplexer>,
    ) -> Self {
        let project_root = project_root.into();
        let session_id = session_id.into();
        let session_dir = settings.session_dir(&project_root, &session_id);
        let tmux_session = tmux_session_name(&project_root);

        Self {
            registry: AgentRegistry::new(&session_dir, &project_root, session_id.clone()),
            dashboard: DashboardStore::new(
                session_id.clone(),
                project_root.display().to_string(),
                &session_dir,
            ),
            mailbox: Mailbox::new(&session_dir),
            worktrees: WorktreeStore::new(&session_dir),
            health: HealthcheckEngine::new(&settings),
            owner_wait: Mutex::new(HashMap::new()),
            monitor: Mutex::new(None),
            project_root,
            session_id,
            settings,
            tmux_session,
            mux,
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.settings.session_dir(&self.project_root, &self.session_id)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.session_dir().join("tasks")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.project_root.join(&self.settings.mcp_dir).join("memory")
    }

    /// Git adapter for the project; `None` while git support is disabled.
    pub fn git(&self) -> Option<GitClient> {
        self.settings
            .enable_git
            .then(|| GitClient::new(&self.project_root))
    }

    // ------------------------------------------------------------------
    // Owner wait-lock
    // ------------------------------------------------------------------

    pub fn owner_wait_state(&self, owner_id: &str) -> OwnerWaitState {
        self.owner_wait
            .lock()
            .expect("owner wait state poisoned")
            .get(owner_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn mark_owner_waiting(&self, owner_id: &str, admin_id: &str) {
        let mut map = self.owner_wait.lock().expect("owner wait state poisoned");
        let state = map.entry(owner_id.to_string()).or_default();
        state.active = true;
        state.admin_id = Some(admin_id.to_string());
        state.locked_at = Some(Utc::now());
        state.unlocked_at = None;
        state.unlock_reason = None;
        state.empty_poll_count = 0;
    }

    pub fn clear_owner_wait(&self, owner_id: &str, reason: &str) {
        let mut map = self.owner_wait.lock().expect("owner wait state poisoned");
        let state = map.entry(owner_id.to_string()).or_default();
        state.active = false;
        state.admin_id = None;
        state.unlocked_at = Some(Utc::now());
        state.unlock_reason = Some(reason.to_string());
        state.empty_poll_count = 0;
    }

    /// Bump the consecutive-empty-poll counter and return the new value.
    pub fn record_empty_poll(&self, owner_id: &str) -> u32 {
        let mut map = self.owner_wait.lock().expect("owner wait state poisoned");
        let state = map.entry(owner_id.to_string()).or_default();
        state.empty_poll_count += 1;
        state.empty_poll_count
    }

    pub fn reset_empty_polls(&self, owner_id: &str) {
        let mut map = self.owner_wait.lock().expect("owner wait state poisoned");
        if let Some(state) = map.get_mut(owner_id) {
            state.empty_poll_count = 0;
        }
    }
}

/// Session name for a project's tmux session.
pub fn tmux_session_name(project_root: &Path) -> String {
    let name = project_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string());
    format!("crewmux-{}", crate::store::sanitize_file_part(&name))
}
