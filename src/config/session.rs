// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session-scoped `config.json`.
//!
//! Holds the three compatibility-critical keys shared by every server
//! process attached to a project: `session_id`, `enable_git`,
//! `mcp_tool_prefix`. The file lives at `{project_root}/{mcp_dir}/config.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::settings::{parse_bool, DEFAULT_TOOL_PREFIX};
use crate::error::StoreError;
use crate::store;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub session_id: String,

    pub enable_git: bool,

    #[serde(default = "default_tool_prefix")]
    pub mcp_tool_prefix: String,
}

fn default_tool_prefix() -> String {
    DEFAULT_TOOL_PREFIX.to_string()
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>, enable_git: bool) -> Self {
        Self {
            session_id: session_id.into(),
            enable_git,
            mcp_tool_prefix: default_tool_prefix(),
        }
    }

    /// Path of the config file under a project root.
    pub fn path(project_root: &Path, mcp_dir: &str) -> PathBuf {
        project_root.join(mcp_dir).join("config.json")
    }

    /// Load the session config. `Ok(None)` when the file does not exist.
    ///
    /// Lenient about `enable_git` being stored as a string ("true"/"off"...),
    /// which older writers produced.
    pub fn load(project_root: &Path, mcp_dir: &str) -> Result<Option<Self>, StoreError> {
        let path = Self::path(project_root, mcp_dir);
        let raw: Option<serde_json::Value> = store::read_json(&path)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let session_id = raw
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let enable_git = match raw.get("enable_git") {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => parse_bool(s).unwrap_or(true),
            _ => true,
        };
        let mcp_tool_prefix = raw
            .get("mcp_tool_prefix")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TOOL_PREFIX)
            .to_string();

        Ok(Some(Self {
            session_id,
            enable_git,
            mcp_tool_prefix,
        }))
    }

    /// Write the config atomically under an advisory lock.
    pub fn save(&self, project_root: &Path, mcp_dir: &str) -> Result<PathBuf, StoreError> {
        let path = Self::path(project_root, mcp_dir);
        let _lock = store::FileLock::acquire(&store::lock_path_for(&path))?;
        store::atomic_write_json(&path, self)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let config = SessionConfig::new("s1", true);
        config.save(temp.path(), ".crewmux").unwrap();

        let loaded = SessionConfig::load(temp.path(), ".crewmux").unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        assert!(loaded.enable_git);
        assert_eq!(loaded.mcp_tool_prefix, DEFAULT_TOOL_PREFIX);
    }

    #[test]
    fn test_load_missing_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(SessionConfig::load(temp.path(), ".crewmux")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_coerces_string_enable_git() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".crewmux");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.json"),
            r#"{"session_id": "s2", "enable_git": "off"}"#,
        )
        .unwrap();

        let loaded = SessionConfig::load(temp.path(), ".crewmux").unwrap().unwrap();
        assert_eq!(loaded.session_id, "s2");
        assert!(!loaded.enable_git);
    }
}
