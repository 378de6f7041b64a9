// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Dashboard auto-sync from IPC messages.
//!
//! When an admin reads its mailbox, progress/complete/failed messages
//! carrying a `task_id` are projected onto the dashboard. The projection is
//! a convenience: rejected transitions become skip records with a reason,
//! never errors, so a stale completion report can never fail the enclosing
//! `read_messages` call.

use serde::Serialize;
use tracing::debug;

use crate::error::DashboardError;
use crate::ipc::{Message, MessageType};

use super::store::DashboardStore;
use super::types::TaskStatus;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedUpdate {
    pub sender_id: String,
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub applied: u32,
    pub skipped: Vec<SkippedUpdate>,
}

impl SyncReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Project just-read messages onto the dashboard.
pub fn sync_from_messages(store: &DashboardStore, messages: &[Message]) -> SyncReport {
    let mut report = SyncReport::default();

    for message in messages {
        let Some(task_id) = message.task_id().map(str::to_string) else {
            continue;
        };

        match message.message_type {
            MessageType::TaskProgress => {
                let progress = message.progress().unwrap_or(0);
                match store.report_progress(&task_id, progress, &message.sender_id, &message.content)
                {
                    Ok(_) => report.applied += 1,
                    Err(e) => push_skip(&mut report, message, &task_id, e),
                }
            }
            MessageType::TaskComplete => {
                apply_status(store, &mut report, message, &task_id, TaskStatus::Completed);
            }
            MessageType::TaskFailed => {
                apply_status(store, &mut report, message, &task_id, TaskStatus::Failed);
            }
            _ => {}
        }
    }

    report
}

fn apply_status(
    store: &DashboardStore,
    report: &mut SyncReport,
    message: &Message,
    task_id: &str,
    target: TaskStatus,
) {
    // A report matching the current status is a duplicate delivery, not a
    // rejection: it counts in neither bucket.
    if let Some(task) = store.get_task(task_id) {
        if task.status == target {
            debug!("sync: task {task_id} already {target}, nothing to apply");
            return;
        }
    }

    let error_message = (target == TaskStatus::Failed).then(|| message.content.clone());
    match store.update_task_status(task_id, target, None, error_message) {
        Ok(_) => report.applied += 1,
        Err(e) => push_skip(report, message, task_id, e),
    }
}

fn push_skip(report: &mut SyncReport, message: &Message, task_id: &str, error: DashboardError) {
    debug!("sync: skipping update for {task_id}: {error}");
    report.skipped.push(SkippedUpdate {
        sender_id: message.sender_id.clone(),
        task_id: task_id.to_string(),
        reason: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn message(msg_type: MessageType, task_id: &str, progress: Option<u8>) -> Message {
        let mut msg = Message::new("w1", "admin", msg_type, "body")
            .with_metadata("task_id", serde_json::json!(task_id));
        if let Some(p) = progress {
            msg = msg.with_metadata("progress", serde_json::json!(p));
        }
        msg
    }

    fn store_with_task(temp: &TempDir, status: TaskStatus) -> (DashboardStore, String) {
        let store = DashboardStore::new("s1", "/p", temp.path());
        store.initialize().unwrap();
        let task = store.create_task("t", "", BTreeMap::new()).unwrap();
        if status != TaskStatus::Pending {
            store
                .update_task_status(&task.id, TaskStatus::InProgress, None, None)
                .unwrap();
            if status != TaskStatus::InProgress {
                store.update_task_status(&task.id, status, None, None).unwrap();
            }
        }
        (store, task.id)
    }

    #[test]
    fn test_completion_message_applies() {
        let temp = TempDir::new().unwrap();
        let (store, task_id) = store_with_task(&temp, TaskStatus::InProgress);

        let report =
            sync_from_messages(&store, &[message(MessageType::TaskComplete, &task_id, None)]);
        assert_eq!(report.applied, 1);
        assert!(report.skipped.is_empty());
        assert_eq!(store.get_task(&task_id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_duplicate_completion_counts_nowhere() {
        let temp = TempDir::new().unwrap();
        let (store, task_id) = store_with_task(&temp, TaskStatus::Completed);

        let report =
            sync_from_messages(&store, &[message(MessageType::TaskComplete, &task_id, None)]);
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped_count(), 0);
    }

    #[test]
    fn test_rejected_transition_becomes_skip() {
        let temp = TempDir::new().unwrap();
        // pending -> completed is not allowed; must surface as a skip.
        let (store, task_id) = store_with_task(&temp, TaskStatus::Pending);

        let report =
            sync_from_messages(&store, &[message(MessageType::TaskComplete, &task_id, None)]);
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.skipped[0].sender_id, "w1");
        assert_eq!(report.skipped[0].task_id, task_id);
    }

    #[test]
    fn test_progress_message_updates_progress() {
        let temp = TempDir::new().unwrap();
        let (store, task_id) = store_with_task(&temp, TaskStatus::InProgress);

        let report = sync_from_messages(
            &store,
            &[message(MessageType::TaskProgress, &task_id, Some(70))],
        );
        assert_eq!(report.applied, 1);
        assert_eq!(store.get_task(&task_id).unwrap().progress, 70);
    }

    #[test]
    fn test_progress_on_terminal_task_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (store, task_id) = store_with_task(&temp, TaskStatus::Completed);

        let report = sync_from_messages(
            &store,
            &[message(MessageType::TaskProgress, &task_id, Some(70))],
        );
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped_count(), 1);
    }

    #[test]
    fn test_failure_message_carries_error() {
        let temp = TempDir::new().unwrap();
        let (store, task_id) = store_with_task(&temp, TaskStatus::InProgress);

        let report =
            sync_from_messages(&store, &[message(MessageType::TaskFailed, &task_id, None)]);
        assert_eq!(report.applied, 1);
        let task = store.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("body"));
    }

    #[test]
    fn test_messages_without_task_id_ignored() {
        let temp = TempDir::new().unwrap();
        let (store, _) = store_with_task(&temp, TaskStatus::InProgress);

        let plain = Message::new("w1", "admin", MessageType::TaskComplete, "no task id");
        let report = sync_from_messages(&store, &[plain]);
        assert_eq!(report.applied, 0);
        assert_eq!(report.skipped_count(), 0);
    }

    #[test]
    fn test_unknown_task_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (store, _) = store_with_task(&temp, TaskStatus::InProgress);

        let report =
            sync_from_messages(&store, &[message(MessageType::TaskComplete, "ghost", None)]);
        assert_eq!(report.skipped_count(), 1);
        assert!(report.skipped[0].reason.contains("not found"));
    }
}
