// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent healthcheck: liveness and stall detection.
//!
//! Two failure modes are detected per agent:
//!
//! - `tmux_session_dead`: the agent's pane or session is gone.
//! - `task_stalled`: the agent holds a task, `last_activity` has aged past
//!   the stall timeout, and the pane tail hash is unchanged across two
//!   consecutive polls.
//!
//! Terminated agents are skipped entirely. Recovery bookkeeping (attempt
//! counters per `(agent, task)` pair) also lives here; the staged recovery
//! actions are in [`recovery`], the periodic driver in [`monitor`].

pub mod monitor;
pub mod recovery;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::agents::Agent;
use crate::config::Settings;
use crate::tmux::Multiplexer;

/// Lines captured from the pane when hashing its tail.
const PANE_CAPTURE_LINES: u32 = 120;
/// Tail lines that participate in the hash.
const PANE_HASH_LINES: usize = 40;

/// Why an agent is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssue {
    TmuxSessionDead,
    TaskStalled,
}

impl HealthIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TmuxSessionDead => "tmux_session_dead",
            Self::TaskStalled => "task_stalled",
        }
    }
}

/// Health verdict for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub agent_id: String,
    pub is_healthy: bool,
    pub session_alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<HealthIssue>,
    /// Terminated agents are excluded from monitoring, not unhealthy.
    pub skipped: bool,
}

impl HealthStatus {
    fn healthy(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            is_healthy: true,
            session_alive: true,
            issue: None,
            skipped: false,
        }
    }

    fn skipped(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            is_healthy: true,
            session_alive: false,
            issue: None,
            skipped: true,
        }
    }

    fn unhealthy(agent_id: &str, session_alive: bool, issue: HealthIssue) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            is_healthy: false,
            session_alive,
            issue: Some(issue),
            skipped: false,
        }
    }
}

/// Stateless check function plus per-agent poll state for stall detection
/// and recovery attempt counters.
pub struct HealthcheckEngine {
    stall_timeout: Duration,
    max_recovery_attempts: u32,
    pane_hashes: Mutex<HashMap<String, String>>,
    recovery_failures: Mutex<HashMap<String, u32>>,
}

impl HealthcheckEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            stall_timeout: Duration::from_secs(settings.healthcheck_stall_timeout_seconds),
            max_recovery_attempts: settings.healthcheck_max_recovery_attempts,
            pane_hashes: Mutex::new(HashMap::new()),
            recovery_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_recovery_attempts(&self) -> u32 {
        self.max_recovery_attempts
    }

    fn recovery_key(agent_id: &str, task_id: Option<&str>) -> String {
        format!("{agent_id}:{}", task_id.unwrap_or("-"))
    }

    /// Check one agent. Terminated agents come back `skipped`.
    pub async fn check_agent(&self, agent: &Agent, mux: &dyn Multiplexer) -> HealthStatus {
        if !agent.is_live() {
            return HealthStatus::skipped(&agent.id);
        }

        let Some(pane) = &agent.pane else {
            // The owner runs outside tmux and has nothing to check.
            return HealthStatus::healthy(&agent.id);
        };

        if !mux.session_exists(&pane.session_name).await
            || !mux
                .pane_exists(&pane.session_name, pane.window_index, pane.pane_index)
                .await
        {
            return HealthStatus::unhealthy(&agent.id, false, HealthIssue::TmuxSessionDead);
        }

        if self.is_stalled(agent, mux).await {
            return HealthStatus::unhealthy(&agent.id, true, HealthIssue::TaskStalled);
        }

        HealthStatus::healthy(&agent.id)
    }

    /// Stall = current task + aged last_activity + pane tail hash unchanged
    /// across two consecutive polls.
    async fn is_stalled(&self, agent: &Agent, mux: &dyn Multiplexer) -> bool {
        if agent.current_task_id.is_none() {
            return false;
        }
        let inactive_for = Utc::now().signed_duration_since(agent.last_activity);
        if inactive_for.num_seconds() < self.stall_timeout.as_secs() as i64 {
            return false;
        }

        let Some(hash) = self.capture_pane_hash(agent, mux).await else {
            // No pane output available: the inactivity timeout alone decides.
            return true;
        };

        let mut hashes = self.pane_hashes.lock().expect("pane hash state poisoned");
        let previous = hashes.insert(agent.id.clone(), hash.clone());
        match previous {
            Some(prev) if prev == hash => true,
            _ => {
                debug!("pane output changed for {}, not stalled yet", agent.id);
                false
            }
        }
    }

    async fn capture_pane_hash(&self, agent: &Agent, mux: &dyn Multiplexer) -> Option<String> {
        let pane = agent.pane.as_ref()?;
        let output = mux
            .capture_pane(
                &pane.session_name,
                pane.window_index,
                pane.pane_index,
                PANE_CAPTURE_LINES,
            )
            .await
            .ok()?;

        let lines: Vec<&str> = output.trim().lines().collect();
        let tail_start = lines.len().saturating_sub(PANE_HASH_LINES);
        let compact = lines[tail_start..].join("\n");

        let mut hasher = Sha256::new();
        hasher.update(compact.as_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }

    /// Drop poll state for agents no longer tracked.
    pub fn prune(&self, live_agent_ids: &[String]) {
        self.pane_hashes
            .lock()
            .expect("pane hash state poisoned")
            .retain(|id, _| live_agent_ids.contains(id));
        self.recovery_failures
            .lock()
            .expect("recovery counters poisoned")
            .retain(|key, _| {
                key.split(':')
                    .next()
                    .map(|id| live_agent_ids.contains(&id.to_string()))
                    .unwrap_or(false)
            });
    }

    // ------------------------------------------------------------------
    // Recovery attempt counters (per (agent, task) pair)
    // ------------------------------------------------------------------

    /// Record a failed recovery attempt; returns the new attempt count.
    pub fn record_recovery_failure(&self, agent_id: &str, task_id: Option<&str>) -> u32 {
        let key = Self::recovery_key(agent_id, task_id);
        let mut failures = self.recovery_failures.lock().expect("recovery counters poisoned");
        let count = failures.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Successful recovery clears the pair's counter.
    pub fn clear_recovery_failures(&self, agent_id: &str, task_id: Option<&str>) {
        self.recovery_failures
            .lock()
            .expect("recovery counters poisoned")
            .remove(&Self::recovery_key(agent_id, task_id));
    }

    pub fn is_exhausted(&self, agent_id: &str, task_id: Option<&str>) -> bool {
        self.recovery_failures
            .lock()
            .expect("recovery counters poisoned")
            .get(&Self::recovery_key(agent_id, task_id))
            .map(|count| *count >= self.max_recovery_attempts)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRole, AgentStatus, PaneRef};
    use crate::tmux::fake::FakeMultiplexer;

    fn settings_with_timeout(seconds: u64) -> Settings {
        Settings {
            healthcheck_stall_timeout_seconds: seconds,
            ..Settings::default()
        }
    }

    fn busy_worker(session: &str) -> Agent {
        let mut agent = Agent::new(AgentRole::Worker, "/p")
            .with_pane(PaneRef::new(session, 0, 1))
            .with_worker_slot(1);
        agent.status = AgentStatus::Busy;
        agent.current_task_id = Some("t1".to_string());
        agent
    }

    #[tokio::test]
    async fn test_dead_session_detected() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(600));
        let mux = FakeMultiplexer::new();
        let agent = busy_worker("missing");

        let status = engine.check_agent(&agent, &mux).await;
        assert!(!status.is_healthy);
        assert_eq!(status.issue, Some(HealthIssue::TmuxSessionDead));
    }

    #[tokio::test]
    async fn test_missing_pane_detected() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(600));
        let mux = FakeMultiplexer::new();
        mux.create_session("s", "/tmp", "main").await.unwrap();
        // Session exists but pane 1 was never split.
        let agent = busy_worker("s");

        let status = engine.check_agent(&agent, &mux).await;
        assert!(!status.is_healthy);
        assert_eq!(status.issue, Some(HealthIssue::TmuxSessionDead));
    }

    #[tokio::test]
    async fn test_terminated_agent_skipped() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(600));
        let mux = FakeMultiplexer::new();
        let mut agent = busy_worker("s");
        agent.status = AgentStatus::Terminated;

        let status = engine.check_agent(&agent, &mux).await;
        assert!(status.skipped);
        assert!(status.is_healthy);
    }

    #[tokio::test]
    async fn test_stall_requires_two_unchanged_polls() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(0));
        let mux = FakeMultiplexer::new();
        mux.create_session("s", "/tmp", "main").await.unwrap();
        mux.split_pane("s", 0, 0, true, None).await.unwrap();
        mux.set_pane_output("s", 0, 1, "same output");

        let mut agent = busy_worker("s");
        agent.last_activity = Utc::now() - chrono::Duration::seconds(10);

        // First poll records the hash; not yet a stall.
        let first = engine.check_agent(&agent, &mux).await;
        assert!(first.is_healthy);

        // Second poll with identical output: stalled.
        let second = engine.check_agent(&agent, &mux).await;
        assert_eq!(second.issue, Some(HealthIssue::TaskStalled));
    }

    #[tokio::test]
    async fn test_changing_output_resets_stall() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(0));
        let mux = FakeMultiplexer::new();
        mux.create_session("s", "/tmp", "main").await.unwrap();
        mux.split_pane("s", 0, 0, true, None).await.unwrap();

        let mut agent = busy_worker("s");
        agent.last_activity = Utc::now() - chrono::Duration::seconds(10);

        mux.set_pane_output("s", 0, 1, "output v1");
        assert!(engine.check_agent(&agent, &mux).await.is_healthy);
        mux.set_pane_output("s", 0, 1, "output v2");
        assert!(engine.check_agent(&agent, &mux).await.is_healthy);
        // Unchanged since the last poll: now stalled.
        assert!(!engine.check_agent(&agent, &mux).await.is_healthy);
    }

    #[tokio::test]
    async fn test_idle_agent_never_stalls() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(0));
        let mux = FakeMultiplexer::new();
        mux.create_session("s", "/tmp", "main").await.unwrap();
        mux.split_pane("s", 0, 0, true, None).await.unwrap();

        let mut agent = busy_worker("s");
        agent.current_task_id = None;
        agent.last_activity = Utc::now() - chrono::Duration::seconds(100);

        assert!(engine.check_agent(&agent, &mux).await.is_healthy);
        assert!(engine.check_agent(&agent, &mux).await.is_healthy);
    }

    #[test]
    fn test_recovery_counters() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(600));

        assert_eq!(engine.record_recovery_failure("w1", Some("t1")), 1);
        assert_eq!(engine.record_recovery_failure("w1", Some("t1")), 2);
        assert!(!engine.is_exhausted("w1", Some("t1")));
        assert_eq!(engine.record_recovery_failure("w1", Some("t1")), 3);
        assert!(engine.is_exhausted("w1", Some("t1")));

        // Another task on the same worker counts separately.
        assert!(!engine.is_exhausted("w1", Some("t2")));

        engine.clear_recovery_failures("w1", Some("t1"));
        assert!(!engine.is_exhausted("w1", Some("t1")));
    }

    #[test]
    fn test_prune_drops_stale_state() {
        let engine = HealthcheckEngine::new(&settings_with_timeout(600));
        engine.record_recovery_failure("gone", Some("t1"));
        engine.record_recovery_failure("kept", Some("t2"));

        engine.prune(&["kept".to_string()]);
        assert!(!engine.is_exhausted("gone", Some("t1")));
        assert_eq!(engine.record_recovery_failure("kept", Some("t2")), 2);
    }
}
