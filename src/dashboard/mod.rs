// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable task dashboard.
//!
//! The dashboard owns the session's tasks and message log. State is one
//! markdown file with YAML front matter; the rendered body is derived from
//! the front matter on every write. Mutations are serialized by an advisory
//! lock so independent server processes can share one session.

pub mod render;
pub mod store;
pub mod sync;
pub mod types;

pub use store::DashboardStore;
pub use sync::{sync_from_messages, SkippedUpdate, SyncReport};
pub use types::{AgentSummary, Dashboard, MessageSummary, TaskInfo, TaskStatus};
