// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the crewmux orchestration server.
//!
//! Each subsystem has its own `thiserror` enum. Every error that can cross
//! the tool boundary maps onto a stable error code via [`ErrorCode`]; the
//! tool façade converts internal errors into structured
//! `{success: false, error, message}` payloads and never panics across the
//! boundary.

use thiserror::Error;

use crate::dashboard::types::TaskStatus;

/// Stable error codes surfaced through the tool façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    PermissionDenied,
    NotFound,
    InvalidTransition,
    TerminalStateImmutable,
    OwnerWaitActive,
    PollingBlocked,
    ConcurrencyTimeout,
    WorkerLimitReached,
    GitDisabled,
    MergeConflict,
    BranchNotFound,
    RecoveryExhausted,
    Validation,
    Environment,
}

impl ErrorCode {
    /// The wire representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "PermissionDenied",
            Self::NotFound => "NotFound",
            Self::InvalidTransition => "InvalidTransition",
            Self::TerminalStateImmutable => "TerminalStateImmutable",
            Self::OwnerWaitActive => "OwnerWaitActive",
            Self::PollingBlocked => "PollingBlocked",
            Self::ConcurrencyTimeout => "ConcurrencyTimeout",
            Self::WorkerLimitReached => "WorkerLimitReached",
            Self::GitDisabled => "GitDisabled",
            Self::MergeConflict => "MergeConflict",
            Self::BranchNotFound => "BranchNotFound",
            Self::RecoveryExhausted => "RecoveryExhausted",
            Self::Validation => "Validation",
            Self::Environment => "Environment",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the file store (atomic writes, advisory locks).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Lock acquisition timed out after {timeout_ms}ms: {path}")]
    ConcurrencyTimeout { path: String, timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StoreError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ConcurrencyTimeout { .. } => ErrorCode::ConcurrencyTimeout,
            _ => ErrorCode::Environment,
        }
    }
}

/// Errors from the agent registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent id already registered: {0}")]
    DuplicateId(String),

    #[error("Pane {session}:{window}.{pane} is already occupied by {agent_id}")]
    PaneOccupied {
        session: String,
        window: u32,
        pane: u32,
        agent_id: String,
    },

    #[error("Worker limit reached: {limit} live workers")]
    WorkerLimitReached { limit: usize },

    #[error("Exactly one owner is allowed per session")]
    DuplicateOwner,

    #[error("At most one admin is allowed per session")]
    DuplicateAdmin,

    #[error("Agent {0} is terminated and cannot be mutated")]
    Terminated(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RegistryError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::WorkerLimitReached { .. } => ErrorCode::WorkerLimitReached,
            Self::Store(e) => e.error_code(),
            Self::DuplicateId(_)
            | Self::PaneOccupied { .. }
            | Self::DuplicateOwner
            | Self::DuplicateAdmin
            | Self::Terminated(_) => ErrorCode::Validation,
        }
    }
}

/// Errors from the dashboard store and task state machine.
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Transition not allowed: {from} -> {to} (allowed: {allowed:?})")]
    InvalidTransition {
        from: TaskStatus,
        to: TaskStatus,
        allowed: Vec<TaskStatus>,
    },

    #[error("Task {task_id} is in terminal state {status}; use reopen_task")]
    TerminalStateImmutable { task_id: String, status: TaskStatus },

    #[error("Task {task_id} is not in a terminal state (current: {status})")]
    NotTerminal { task_id: String, status: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DashboardError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::TaskNotFound(_) => ErrorCode::NotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::TerminalStateImmutable { .. } => ErrorCode::TerminalStateImmutable,
            Self::NotTerminal { .. } => ErrorCode::Validation,
            Self::Store(e) => e.error_code(),
        }
    }

    /// The set of statuses the caller could have moved to, for rejections.
    pub fn allowed_set(&self) -> Vec<TaskStatus> {
        match self {
            Self::InvalidTransition { allowed, .. } => allowed.clone(),
            _ => Vec::new(),
        }
    }
}

/// Errors from the IPC mailbox.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Unknown priority: {0}")]
    UnknownPriority(String),

    #[error("Malformed message file: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IpcError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownMessageType(_) | Self::UnknownPriority(_) => ErrorCode::Validation,
            Self::Malformed(_) => ErrorCode::Environment,
            Self::Store(e) => e.error_code(),
        }
    }
}

/// Errors from the terminal multiplexer adapter.
#[derive(Error, Debug)]
pub enum TmuxError {
    #[error("tmux binary not found")]
    BinaryMissing,

    #[error("tmux command failed: {0}")]
    CommandFailed(String),

    #[error("Pane unreachable: {0}")]
    PaneUnreachable(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TmuxError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::SessionNotFound(_) => ErrorCode::NotFound,
            _ => ErrorCode::Environment,
        }
    }
}

/// Errors from the version-control adapter.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Git support is disabled for this session")]
    Disabled,

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch already checked out in a worktree: {0}")]
    BranchInUse(String),

    #[error("Worktree path already exists: {0}")]
    PathExists(String),

    #[error("Merge conflict on {branch}: {detail}")]
    Conflict { branch: String, detail: String },

    #[error("git command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Disabled => ErrorCode::GitDisabled,
            Self::BranchNotFound(_) => ErrorCode::BranchNotFound,
            Self::Conflict { .. } => ErrorCode::MergeConflict,
            Self::BranchInUse(_) | Self::PathExists(_) => ErrorCode::Validation,
            Self::CommandFailed(_) | Self::Io(_) => ErrorCode::Environment,
        }
    }
}

/// Errors raised inside tool handlers before conversion at the façade.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("{0}")]
    Denied(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Dashboard(#[from] DashboardError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Tmux(#[from] TmuxError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ToolError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownTool(_) => ErrorCode::NotFound,
            Self::MissingField(_) | Self::InvalidValue { .. } => ErrorCode::Validation,
            Self::Denied(_) => ErrorCode::PermissionDenied,
            Self::Registry(e) => e.error_code(),
            Self::Dashboard(e) => e.error_code(),
            Self::Ipc(e) => e.error_code(),
            Self::Tmux(e) => e.error_code(),
            Self::Git(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }
}
