// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent agent registry.
//!
//! The registry is the source of truth for agents and is shared by
//! independent server processes serving the same session. State lives in
//! `{session_dir}/agents.json`; each agent additionally gets a pointer file
//! in the per-user global registry (`~/.crewmux/agents/{agent_id}.json`)
//! mapping its id back to (project_root, session_id) so a fresh process can
//! locate the session from nothing but a caller id.
//!
//! The file is authoritative: reads go through the file first and refresh an
//! in-memory cache, discarded whenever the file mtime differs. Writes happen
//! under an advisory lock with read-modify-write, and any write failure
//! rolls back the in-memory mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agents::{Agent, AgentRole, AgentStatus, PaneRef};
use crate::error::RegistryError;
use crate::store;

/// Pointer record in the per-user global registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalAgentRecord {
    pub agent_id: String,
    pub project_root: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Default)]
struct Cache {
    agents: HashMap<String, Agent>,
    mtime: Option<SystemTime>,
}

/// Per-user global registry directory (`~/.crewmux/agents`). The base
/// directory honors `CREWMUX_HOME` so tests and unusual setups can relocate
/// it.
pub fn global_registry_dir() -> PathBuf {
    let base = std::env::var_os("CREWMUX_HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(".crewmux").join("agents")
}

/// File-backed agent registry for one session.
pub struct AgentRegistry {
    session_dir: PathBuf,
    global_dir: PathBuf,
    project_root: PathBuf,
    session_id: String,
    cache: Mutex<Cache>,
}

impl AgentRegistry {
    pub fn new(
        session_dir: impl Into<PathBuf>,
        project_root: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            global_dir: global_registry_dir(),
            session_dir: session_dir.into(),
            project_root: project_root.into(),
            session_id: session_id.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Override the global registry directory (tests).
    pub fn with_global_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_dir = dir.into();
        self
    }

    pub fn agents_file(&self) -> PathBuf {
        self.session_dir.join("agents.json")
    }

    fn lock_file(&self) -> PathBuf {
        self.session_dir.join("agents.lock")
    }

    fn global_record_path(&self, agent_id: &str) -> PathBuf {
        self.global_dir
            .join(format!("{}.json", store::sanitize_path_segment(agent_id)))
    }

    // ------------------------------------------------------------------
    // Reads (file first, cache refreshed on mtime change)
    // ------------------------------------------------------------------

    fn load_from_disk(&self) -> Result<HashMap<String, Agent>, RegistryError> {
        let raw: Option<HashMap<String, Agent>> = store::read_json(&self.agents_file())
            .map_err(RegistryError::Store)?;
        Ok(raw.unwrap_or_default())
    }

    fn refresh_cache(&self) -> Result<HashMap<String, Agent>, RegistryError> {
        let file = self.agents_file();
        let mtime = std::fs::metadata(&file).and_then(|m| m.modified()).ok();

        {
            let cache = self.cache.lock().expect("registry cache poisoned");
            if cache.mtime.is_some() && cache.mtime == mtime {
                return Ok(cache.agents.clone());
            }
        }

        let agents = self.load_from_disk()?;
        let mut cache = self.cache.lock().expect("registry cache poisoned");
        cache.agents = agents.clone();
        cache.mtime = mtime;
        Ok(agents)
    }

    /// Look up a single agent.
    pub fn lookup(&self, agent_id: &str) -> Result<Agent, RegistryError> {
        self.refresh_cache()?
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))
    }

    /// All agents in this session, creation order.
    pub fn list(&self) -> Result<Vec<Agent>, RegistryError> {
        let mut agents: Vec<Agent> = self.refresh_cache()?.into_values().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(agents)
    }

    /// Live agents with a given role.
    pub fn find_by_role(&self, role: AgentRole) -> Result<Vec<Agent>, RegistryError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|a| a.role == role && a.is_live())
            .collect())
    }

    /// The session's admin, if one is live.
    pub fn admin(&self) -> Result<Option<Agent>, RegistryError> {
        Ok(self.find_by_role(AgentRole::Admin)?.into_iter().next())
    }

    pub fn count_live_workers(&self) -> Result<usize, RegistryError> {
        Ok(self.find_by_role(AgentRole::Worker)?.len())
    }

    /// Lowest free worker slot <= `max_workers`.
    pub fn resolve_worker_slot(&self, max_workers: usize) -> Result<u32, RegistryError> {
        let workers = self.find_by_role(AgentRole::Worker)?;
        if workers.len() >= max_workers {
            return Err(RegistryError::WorkerLimitReached { limit: max_workers });
        }
        let used: Vec<u32> = workers.iter().filter_map(|w| w.worker_slot).collect();
        for slot in 1..=(max_workers as u32) {
            if !used.contains(&slot) {
                return Ok(slot);
            }
        }
        Err(RegistryError::WorkerLimitReached { limit: max_workers })
    }

    // ------------------------------------------------------------------
    // Writes (lock -> read -> validate -> mutate -> atomic write)
    // ------------------------------------------------------------------

    fn write_all(&self, agents: &HashMap<String, Agent>) -> Result<(), RegistryError> {
        store::atomic_write_json(&self.agents_file(), agents).map_err(RegistryError::Store)?;
        let mtime = std::fs::metadata(self.agents_file())
            .and_then(|m| m.modified())
            .ok();
        let mut cache = self.cache.lock().expect("registry cache poisoned");
        cache.agents = agents.clone();
        cache.mtime = mtime;
        Ok(())
    }

    fn validate_hierarchy(
        agents: &HashMap<String, Agent>,
        candidate: &Agent,
    ) -> Result<(), RegistryError> {
        match candidate.role {
            AgentRole::Owner => {
                if agents.values().any(|a| a.role == AgentRole::Owner && a.is_live()) {
                    return Err(RegistryError::DuplicateOwner);
                }
            }
            AgentRole::Admin => {
                if agents.values().any(|a| a.role == AgentRole::Admin && a.is_live()) {
                    return Err(RegistryError::DuplicateAdmin);
                }
            }
            AgentRole::Worker => {}
        }
        Ok(())
    }

    fn validate_pane(
        agents: &HashMap<String, Agent>,
        candidate: &Agent,
    ) -> Result<(), RegistryError> {
        let Some(pane) = &candidate.pane else {
            return Ok(());
        };
        for agent in agents.values() {
            if !agent.is_live() || agent.id == candidate.id {
                continue;
            }
            if agent.pane.as_ref() == Some(pane) {
                return Err(RegistryError::PaneOccupied {
                    session: pane.session_name.clone(),
                    window: pane.window_index,
                    pane: pane.pane_index,
                    agent_id: agent.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Register a new agent. Fails on duplicate id, occupied pane, or a
    /// hierarchy violation; writes both the session file and the global
    /// pointer.
    pub fn register(&self, agent: &Agent) -> Result<(), RegistryError> {
        let _lock = store::FileLock::acquire(&self.lock_file()).map_err(RegistryError::Store)?;

        let mut agents = self.load_from_disk()?;
        if agents.contains_key(&agent.id) {
            return Err(RegistryError::DuplicateId(agent.id.clone()));
        }
        Self::validate_hierarchy(&agents, agent)?;
        Self::validate_pane(&agents, agent)?;

        agents.insert(agent.id.clone(), agent.clone());
        self.write_all(&agents)?;

        if let Err(e) = self.write_global_record(&agent.id) {
            // The session file is the source of truth; the pointer file is
            // best-effort and retried on the next update.
            warn!("failed to write global registry record for {}: {}", agent.id, e);
        }

        debug!("registered agent {} ({})", agent.id, agent.role);
        Ok(())
    }

    /// Persist updated fields of an existing agent.
    pub fn update(&self, agent: &Agent) -> Result<(), RegistryError> {
        let _lock = store::FileLock::acquire(&self.lock_file()).map_err(RegistryError::Store)?;

        let mut agents = self.load_from_disk()?;
        if !agents.contains_key(&agent.id) {
            return Err(RegistryError::NotFound(agent.id.clone()));
        }
        Self::validate_pane(&agents, agent)?;
        agents.insert(agent.id.clone(), agent.clone());
        self.write_all(&agents)
    }

    /// Apply a closure to one agent under the lock and persist the result.
    pub fn mutate<F>(&self, agent_id: &str, f: F) -> Result<Agent, RegistryError>
    where
        F: FnOnce(&mut Agent),
    {
        let _lock = store::FileLock::acquire(&self.lock_file()).map_err(RegistryError::Store)?;

        let mut agents = self.load_from_disk()?;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        f(agent);
        agent.last_activity = chrono::Utc::now();
        let updated = agent.clone();
        self.write_all(&agents)?;
        Ok(updated)
    }

    /// Flip an agent to terminated. The record is kept (never deleted) so
    /// history and pane bookkeeping survive; the pane becomes reusable.
    pub fn terminate(&self, agent_id: &str) -> Result<Agent, RegistryError> {
        let _lock = store::FileLock::acquire(&self.lock_file()).map_err(RegistryError::Store)?;

        let mut agents = self.load_from_disk()?;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        agent.status = AgentStatus::Terminated;
        agent.current_task_id = None;
        agent.last_activity = chrono::Utc::now();
        let terminated = agent.clone();
        self.write_all(&agents)?;

        if let Err(e) = std::fs::remove_file(self.global_record_path(agent_id)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("failed to remove global record for {}: {}", agent_id, e);
            }
        }
        Ok(terminated)
    }

    /// Whether a pane is currently bound to a live agent.
    pub fn is_pane_occupied(&self, pane: &PaneRef) -> Result<bool, RegistryError> {
        Ok(self
            .refresh_cache()?
            .values()
            .any(|a| a.is_live() && a.pane.as_ref() == Some(pane)))
    }

    fn write_global_record(&self, agent_id: &str) -> Result<(), RegistryError> {
        let record = GlobalAgentRecord {
            agent_id: agent_id.to_string(),
            project_root: self.project_root.display().to_string(),
            session_id: Some(self.session_id.clone()),
        };
        store::atomic_write_json(&self.global_record_path(agent_id), &record)
            .map_err(RegistryError::Store)
    }

    /// Read an agent's global pointer record, if present.
    pub fn read_global_record(
        global_dir: &Path,
        agent_id: &str,
    ) -> Option<GlobalAgentRecord> {
        let path = global_dir.join(format!("{}.json", store::sanitize_path_segment(agent_id)));
        store::read_json(&path).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> AgentRegistry {
        AgentRegistry::new(temp.path().join("s1"), temp.path(), "s1")
            .with_global_dir(temp.path().join("global"))
    }

    fn worker(slot: u32) -> Agent {
        Agent::new(AgentRole::Worker, "/p")
            .with_pane(PaneRef::new("crewmux-p", 0, slot))
            .with_worker_slot(slot)
    }

    #[test]
    fn test_register_and_lookup() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        let agent = Agent::new(AgentRole::Owner, "/p");
        reg.register(&agent).unwrap();

        let found = reg.lookup(&agent.id).unwrap();
        assert_eq!(found.role, AgentRole::Owner);

        // Global pointer written alongside.
        let record =
            AgentRegistry::read_global_record(&temp.path().join("global"), &agent.id).unwrap();
        assert_eq!(record.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        let agent = Agent::new(AgentRole::Worker, "/p");
        reg.register(&agent).unwrap();
        let err = reg.register(&agent).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(_)));
    }

    #[test]
    fn test_pane_collision_rejected() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        reg.register(&worker(1)).unwrap();
        let clash = Agent::new(AgentRole::Worker, "/p")
            .with_pane(PaneRef::new("crewmux-p", 0, 1))
            .with_worker_slot(2);
        let err = reg.register(&clash).unwrap_err();
        assert!(matches!(err, RegistryError::PaneOccupied { .. }));
    }

    #[test]
    fn test_pane_reusable_after_termination() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        let old = worker(1);
        reg.register(&old).unwrap();
        reg.terminate(&old.id).unwrap();

        // Same pane, new id: allowed.
        let replacement = worker(1);
        reg.register(&replacement).unwrap();
        assert_eq!(reg.count_live_workers().unwrap(), 1);
    }

    #[test]
    fn test_single_owner_and_admin() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        reg.register(&Agent::new(AgentRole::Owner, "/p")).unwrap();
        let err = reg.register(&Agent::new(AgentRole::Owner, "/p")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOwner));

        reg.register(&Agent::new(AgentRole::Admin, "/p")).unwrap();
        let err = reg.register(&Agent::new(AgentRole::Admin, "/p")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAdmin));
    }

    #[test]
    fn test_worker_slot_allocation_lowest_free() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        assert_eq!(reg.resolve_worker_slot(3).unwrap(), 1);
        reg.register(&worker(1)).unwrap();
        let w2 = worker(2);
        reg.register(&w2).unwrap();
        assert_eq!(reg.resolve_worker_slot(3).unwrap(), 3);

        // Terminating slot 2 frees it; the lowest free slot is 2 again.
        reg.terminate(&w2.id).unwrap();
        assert_eq!(reg.resolve_worker_slot(3).unwrap(), 2);
    }

    #[test]
    fn test_worker_limit() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);

        reg.register(&worker(1)).unwrap();
        reg.register(&worker(2)).unwrap();
        let err = reg.resolve_worker_slot(2).unwrap_err();
        assert!(matches!(err, RegistryError::WorkerLimitReached { limit: 2 }));
    }

    #[test]
    fn test_file_is_authoritative_over_cache() {
        let temp = TempDir::new().unwrap();
        let reg_a = registry(&temp);
        let reg_b = registry(&temp);

        let agent = Agent::new(AgentRole::Worker, "/p").with_worker_slot(1);
        reg_a.register(&agent).unwrap();

        // reg_b has never seen the agent but reads it from the file.
        let found = reg_b.lookup(&agent.id).unwrap();
        assert_eq!(found.id, agent.id);

        // A mutation through reg_b is visible to reg_a.
        reg_b
            .mutate(&agent.id, |a| a.status = AgentStatus::Busy)
            .unwrap();
        // Force an mtime difference even on coarse-grained filesystems.
        let file = reg_a.agents_file();
        let content = std::fs::read_to_string(&file).unwrap();
        std::fs::write(&file, content).unwrap();
        assert_eq!(reg_a.lookup(&agent.id).unwrap().status, AgentStatus::Busy);
    }

    #[test]
    fn test_terminate_unknown_fails() {
        let temp = TempDir::new().unwrap();
        let reg = registry(&temp);
        assert!(matches!(
            reg.terminate("ghost").unwrap_err(),
            RegistryError::NotFound(_)
        ));
    }
}
