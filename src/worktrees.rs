// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-backed worktree records.
//!
//! The workspace provisioner owns these records; they live in
//! `{session_dir}/worktrees.json` with the same lock + atomic-write
//! discipline as `agents.json` so concurrent server processes agree on
//! which branch occupies which path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GitError, StoreError};
use crate::store;

/// One provisioned worktree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorktreeRecord {
    pub path: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Store for the session's worktree records.
pub struct WorktreeStore {
    file: PathBuf,
    lock: PathBuf,
}

impl WorktreeStore {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            file: session_dir.join("worktrees.json"),
            lock: session_dir.join("worktrees.lock"),
        }
    }

    pub fn list(&self) -> Result<Vec<WorktreeRecord>, StoreError> {
        Ok(store::read_json(&self.file)?.unwrap_or_default())
    }

    pub fn find_by_path(&self, path: &str) -> Result<Option<WorktreeRecord>, StoreError> {
        Ok(self.list()?.into_iter().find(|r| r.path == path))
    }

    pub fn find_by_branch(&self, branch: &str) -> Result<Option<WorktreeRecord>, StoreError> {
        Ok(self.list()?.into_iter().find(|r| r.branch == branch))
    }

    /// Add a record; path and branch must both be unused.
    pub fn add(&self, record: WorktreeRecord) -> Result<(), GitError> {
        let _guard = store::FileLock::acquire(&self.lock).map_err(store_to_git)?;
        let mut records: Vec<WorktreeRecord> =
            store::read_json(&self.file).map_err(store_to_git)?.unwrap_or_default();

        if records.iter().any(|r| r.path == record.path) {
            return Err(GitError::PathExists(record.path));
        }
        if records.iter().any(|r| r.branch == record.branch) {
            return Err(GitError::BranchInUse(record.branch));
        }

        records.push(record);
        store::atomic_write_json(&self.file, &records).map_err(store_to_git)
    }

    /// Remove a record by path; returns it when present.
    pub fn remove(&self, path: &str) -> Result<Option<WorktreeRecord>, GitError> {
        let _guard = store::FileLock::acquire(&self.lock).map_err(store_to_git)?;
        let mut records: Vec<WorktreeRecord> =
            store::read_json(&self.file).map_err(store_to_git)?.unwrap_or_default();

        let removed = records.iter().position(|r| r.path == path).map(|i| records.remove(i));
        if removed.is_some() {
            store::atomic_write_json(&self.file, &records).map_err(store_to_git)?;
        }
        Ok(removed)
    }

    /// Set or clear the assigned agent on a record.
    pub fn assign(
        &self,
        path: &str,
        agent_id: Option<String>,
    ) -> Result<WorktreeRecord, GitError> {
        let _guard = store::FileLock::acquire(&self.lock).map_err(store_to_git)?;
        let mut records: Vec<WorktreeRecord> =
            store::read_json(&self.file).map_err(store_to_git)?.unwrap_or_default();

        let record = records
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| GitError::BranchNotFound(path.to_string()))?;
        record.assigned_agent_id = agent_id;
        let updated = record.clone();
        store::atomic_write_json(&self.file, &records).map_err(store_to_git)?;
        Ok(updated)
    }
}

fn store_to_git(e: StoreError) -> GitError {
    GitError::CommandFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str, branch: &str) -> WorktreeRecord {
        WorktreeRecord {
            path: path.to_string(),
            branch: branch.to_string(),
            assigned_agent_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_list_remove() {
        let temp = TempDir::new().unwrap();
        let wts = WorktreeStore::new(temp.path());

        wts.add(record("/wt/a", "feat-a")).unwrap();
        wts.add(record("/wt/b", "feat-b")).unwrap();
        assert_eq!(wts.list().unwrap().len(), 2);

        let removed = wts.remove("/wt/a").unwrap();
        assert_eq!(removed.unwrap().branch, "feat-a");
        assert!(wts.find_by_path("/wt/a").unwrap().is_none());
    }

    #[test]
    fn test_uniqueness() {
        let temp = TempDir::new().unwrap();
        let wts = WorktreeStore::new(temp.path());

        wts.add(record("/wt/a", "feat-a")).unwrap();
        assert!(matches!(
            wts.add(record("/wt/a", "feat-b")).unwrap_err(),
            GitError::PathExists(_)
        ));
        assert!(matches!(
            wts.add(record("/wt/c", "feat-a")).unwrap_err(),
            GitError::BranchInUse(_)
        ));
    }

    #[test]
    fn test_assignment() {
        let temp = TempDir::new().unwrap();
        let wts = WorktreeStore::new(temp.path());

        wts.add(record("/wt/a", "feat-a")).unwrap();
        let updated = wts.assign("/wt/a", Some("w1".to_string())).unwrap();
        assert_eq!(updated.assigned_agent_id.as_deref(), Some("w1"));

        let cleared = wts.assign("/wt/a", None).unwrap();
        assert!(cleared.assigned_agent_id.is_none());
    }
}
