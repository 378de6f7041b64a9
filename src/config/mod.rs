// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading and role permissions.
//!
//! Settings are resolved with the precedence: explicit tool argument >
//! session `config.json` > process environment > session `.env` file >
//! built-in defaults. The session `config.json` carries only the three
//! compatibility-critical keys (`session_id`, `enable_git`,
//! `mcp_tool_prefix`); everything else lives in the environment layers.

pub mod permissions;
pub mod session;
pub mod settings;

pub use permissions::{
    allowed_roles, is_bootstrap_tool, is_owner_wait_allowed, is_self_only, is_tool_allowed,
    OWNER_WAIT_ALLOWED_TOOLS,
};
pub use session::SessionConfig;
pub use settings::{AiCli, ModelProfile, ProfileSettings, Settings, WorkerCliMode};
