// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server settings and their layered resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable prefix for every recognized option.
pub const ENV_PREFIX: &str = "CREWMUX_";

/// Default directory name under the project root.
pub const DEFAULT_MCP_DIR: &str = ".crewmux";

/// Default fully-qualified tool prefix.
pub const DEFAULT_TOOL_PREFIX: &str = "mcp__crewmux__";

/// Supported AI CLI backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiCli {
    Claude,
    Codex,
    Gemini,
}

impl AiCli {
    /// The executable launched inside the pane.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.command()
    }
}

impl FromStr for AiCli {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown AI CLI: {other}")),
        }
    }
}

impl std::fmt::Display for AiCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How worker CLIs are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerCliMode {
    /// All workers use the same CLI.
    #[default]
    Uniform,
    /// Slot-indexed overrides take precedence per worker.
    PerWorker,
}

/// Named model profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    #[default]
    Standard,
    Performance,
}

/// Per-profile defaults for CLIs, models and scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    pub cli: AiCli,
    pub admin_model: String,
    pub worker_model: String,
    pub worker_count: usize,
    pub thinking_token_budget: u32,
}

impl ModelProfile {
    pub fn settings(&self) -> ProfileSettings {
        match self {
            Self::Standard => ProfileSettings {
                cli: AiCli::Claude,
                admin_model: "sonnet".to_string(),
                worker_model: "sonnet".to_string(),
                worker_count: 3,
                thinking_token_budget: 8_000,
            },
            Self::Performance => ProfileSettings {
                cli: AiCli::Claude,
                admin_model: "opus".to_string(),
                worker_model: "sonnet".to_string(),
                worker_count: 6,
                thinking_token_budget: 32_000,
            },
        }
    }
}

impl FromStr for ModelProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "performance" => Ok(Self::Performance),
            other => Err(format!("unknown model profile: {other}")),
        }
    }
}

/// Recognized server options with their effective values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Cap on live (non-terminated) worker agents.
    pub max_workers: usize,

    /// Directory name under the project root holding all session state.
    pub mcp_dir: String,

    /// Gates worktree and merge features.
    pub enable_git: bool,

    /// CLI launched when no override applies.
    pub default_ai_cli: AiCli,

    /// Monitor loop period.
    pub healthcheck_interval_seconds: u64,

    /// Inactivity threshold before the pane-hash check engages.
    pub healthcheck_stall_timeout_seconds: u64,

    /// Recovery attempts per (worker, task) pair before the task fails.
    pub healthcheck_max_recovery_attempts: u32,

    /// Consecutive all-idle iterations before the daemon stops itself.
    pub healthcheck_idle_stop_consecutive: u32,

    /// Threshold that triggers an IPC cost warning to the owner.
    pub cost_warning_threshold_usd: f64,

    /// Advisory: surfaced to the admin role, not enforced by the core.
    pub quality_check_max_iterations: u32,

    /// Advisory: surfaced to the admin role, not enforced by the core.
    pub quality_check_same_issue_limit: u32,

    /// Active model profile.
    pub model_profile: ModelProfile,

    /// How worker CLIs resolve.
    pub worker_cli_mode: WorkerCliMode,

    /// Uniform worker CLI (applies when set, before the profile default).
    pub worker_cli: Option<AiCli>,

    /// Slot-indexed CLI overrides (1-based), used in per-worker mode.
    pub worker_cli_slots: HashMap<u32, AiCli>,

    /// Worker panes per extra window (the 2x5 grid).
    pub workers_per_extra_window: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_workers: 5,
            mcp_dir: DEFAULT_MCP_DIR.to_string(),
            enable_git: true,
            default_ai_cli: AiCli::Claude,
            healthcheck_interval_seconds: 300,
            healthcheck_stall_timeout_seconds: 600,
            healthcheck_max_recovery_attempts: 3,
            healthcheck_idle_stop_consecutive: 3,
            cost_warning_threshold_usd: 10.0,
            quality_check_max_iterations: 3,
            quality_check_same_issue_limit: 2,
            model_profile: ModelProfile::Standard,
            worker_cli_mode: WorkerCliMode::Uniform,
            worker_cli: None,
            worker_cli_slots: HashMap::new(),
            workers_per_extra_window: 10,
        }
    }
}

impl Settings {
    /// Load effective settings for a project: defaults, overlaid by the
    /// session `.env` file, overlaid by the process environment.
    pub fn load(project_root: &Path) -> Self {
        let mut settings = Self::default();

        // The mcp_dir option itself may only come from the process
        // environment; the .env file lives inside it.
        if let Ok(dir) = std::env::var(format!("{ENV_PREFIX}MCP_DIR")) {
            if !dir.trim().is_empty() {
                settings.mcp_dir = dir.trim().to_string();
            }
        }

        let env_file = project_root.join(&settings.mcp_dir).join(".env");
        let file_vars = read_env_file(&env_file);
        settings.apply(&file_vars);

        let process_vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        settings.apply(&process_vars);

        settings
    }

    /// The session directory for a given session id.
    pub fn session_dir(&self, project_root: &Path, session_id: &str) -> PathBuf {
        project_root.join(&self.mcp_dir).join(session_id)
    }

    /// Effective worker count suggested by the active profile.
    pub fn profile(&self) -> ProfileSettings {
        self.model_profile.settings()
    }

    /// Resolve the CLI for a worker slot (1-based): per-slot override
    /// (per-worker mode) > uniform setting > profile default > global
    /// default.
    pub fn resolve_worker_cli(&self, slot: u32) -> AiCli {
        if self.worker_cli_mode == WorkerCliMode::PerWorker {
            if let Some(cli) = self.worker_cli_slots.get(&slot) {
                return *cli;
            }
        }
        if let Some(cli) = self.worker_cli {
            return cli;
        }
        self.profile().cli
    }

    fn apply(&mut self, vars: &HashMap<String, String>) {
        let get = |key: &str| vars.get(&format!("{ENV_PREFIX}{key}")).map(|v| v.trim());

        if let Some(v) = get("MAX_WORKERS").and_then(|v| v.parse().ok()) {
            self.max_workers = v;
        }
        if let Some(v) = get("MCP_DIR").filter(|v| !v.is_empty()) {
            self.mcp_dir = v.to_string();
        }
        if let Some(v) = get("ENABLE_GIT").and_then(parse_bool) {
            self.enable_git = v;
        }
        if let Some(v) = get("DEFAULT_AI_CLI").and_then(|v| v.parse().ok()) {
            self.default_ai_cli = v;
        }
        if let Some(v) = get("HEALTHCHECK_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
            self.healthcheck_interval_seconds = v;
        }
        if let Some(v) = get("HEALTHCHECK_STALL_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.healthcheck_stall_timeout_seconds = v;
        }
        if let Some(v) = get("HEALTHCHECK_MAX_RECOVERY_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.healthcheck_max_recovery_attempts = v;
        }
        if let Some(v) = get("HEALTHCHECK_IDLE_STOP_CONSECUTIVE").and_then(|v| v.parse().ok()) {
            self.healthcheck_idle_stop_consecutive = v;
        }
        if let Some(v) = get("COST_WARNING_THRESHOLD_USD").and_then(|v| v.parse().ok()) {
            self.cost_warning_threshold_usd = v;
        }
        if let Some(v) = get("QUALITY_CHECK_MAX_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.quality_check_max_iterations = v;
        }
        if let Some(v) = get("QUALITY_CHECK_SAME_ISSUE_LIMIT").and_then(|v| v.parse().ok()) {
            self.quality_check_same_issue_limit = v;
        }
        if let Some(v) = get("MODEL_PROFILE").and_then(|v| v.parse().ok()) {
            self.model_profile = v;
        }
        if let Some(v) = get("WORKER_CLI_MODE") {
            match v.to_ascii_lowercase().as_str() {
                "uniform" => self.worker_cli_mode = WorkerCliMode::Uniform,
                "per-worker" | "per_worker" => self.worker_cli_mode = WorkerCliMode::PerWorker,
                other => debug!("ignoring unknown worker_cli_mode: {other}"),
            }
        }
        if let Some(v) = get("WORKER_CLI").and_then(|v| v.parse().ok()) {
            self.worker_cli = Some(v);
        }
        if let Some(v) = get("WORKERS_PER_EXTRA_WINDOW").and_then(|v| v.parse().ok()) {
            self.workers_per_extra_window = v;
        }

        // Per-slot overrides: CREWMUX_WORKER_CLI_SLOT_<n>=codex
        let slot_prefix = format!("{ENV_PREFIX}WORKER_CLI_SLOT_");
        for (key, value) in vars {
            if let Some(slot_str) = key.strip_prefix(&slot_prefix) {
                if let (Ok(slot), Ok(cli)) = (slot_str.parse::<u32>(), value.trim().parse()) {
                    self.worker_cli_slots.insert(slot, cli);
                }
            }
        }
    }
}

/// Lenient boolean coercion for env/config values.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a KEY=VALUE env file. Missing file yields an empty map; malformed
/// lines are skipped.
fn read_env_file(path: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return vars;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if key.starts_with(ENV_PREFIX) {
                vars.insert(key.to_string(), value.trim().to_string());
            }
        }
    }
    vars
}
