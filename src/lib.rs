// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crewmux - multi-agent orchestration over tmux.
//!
//! Crewmux coordinates a hierarchy of long-running AI CLI agents (one
//! owner, one admin, N workers) running inside tmux panes. Work flows
//! through a durable file-backed dashboard; agents talk through on-disk
//! mailboxes with pane wake-ups; workers run inside isolated git worktrees;
//! a healthcheck daemon detects dead sessions and stalled panes and runs
//! staged recovery.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`error`] - Per-subsystem error types and stable tool error codes
//! - [`telemetry`] - Tracing initialization
//! - [`store`] - Atomic writes, advisory file locks, path sanitization
//! - [`config`] - Settings, session config, role permissions
//! - [`agents`] - Agent model and pane-slot geometry
//! - [`registry`] - File-backed agent registry shared across processes
//! - [`dashboard`] - Task state machine, markdown view, message auto-sync
//! - [`ipc`] - File mailboxes and pane notifications
//! - [`tmux`] - Multiplexer trait, tmux client, grid layout
//! - [`git`] - Worktrees, branches, merge preview
//! - [`worktrees`] - Durable worktree records
//! - [`health`] - Healthcheck engine, staged recovery, monitor daemon
//! - [`dispatch`] - Task dispatcher with the worker CLI resolution chain
//! - [`context`] - Per-session server context
//! - [`tools`] - Tool façade with the permission guard chokepoint
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crewmux::tmux::TmuxClient;
//! use crewmux::tools::Server;
//!
//! let server = Server::new(Arc::new(TmuxClient::new()));
//! let result = server
//!     .dispatch("init_tmux_workspace", &serde_json::json!({
//!         "project_root": "/work/my-project",
//!         "session_id": "s1",
//!     }))
//!     .await;
//! assert_eq!(result["success"], true);
//! ```

pub mod agents;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod dispatch;
pub mod error;
pub mod git;
pub mod health;
pub mod ipc;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod tmux;
pub mod tools;
pub mod worktrees;

// Re-export commonly used types at crate root
pub use agents::{Agent, AgentRole, AgentStatus, PaneRef};
pub use config::{AiCli, SessionConfig, Settings};
pub use context::ServerContext;
pub use dashboard::{Dashboard, DashboardStore, TaskInfo, TaskStatus};
pub use error::{
    DashboardError, ErrorCode, GitError, IpcError, RegistryError, StoreError, TmuxError,
    ToolError,
};
pub use ipc::{Message, MessagePriority, MessageType};
pub use tools::Server;

/// Crewmux version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
