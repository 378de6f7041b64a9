// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-backed per-recipient mailboxes.
//!
//! One file per message under `{ipc_dir}/{receiver}/`, named
//! `{YYYYMMDD}_{HHMMSS}_{microsec}_{id8}.md` so lexicographic order is
//! chronological order. Receiver ids are sanitized before becoming a path
//! segment; a traversal attempt like `../../etc` lands inside the ipc root.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::IpcError;
use crate::store;

use super::{Message, MessageType};

/// Mailbox root for one session.
pub struct Mailbox {
    ipc_dir: PathBuf,
}

impl Mailbox {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            ipc_dir: session_dir.join("ipc"),
        }
    }

    pub fn ipc_dir(&self) -> &Path {
        &self.ipc_dir
    }

    fn recipient_dir(&self, receiver_id: &str) -> PathBuf {
        self.ipc_dir.join(store::sanitize_path_segment(receiver_id))
    }

    fn message_filename(message: &Message) -> String {
        let id8: String = message.id.chars().filter(|c| *c != '-').take(8).collect();
        format!(
            "{}_{:06}_{}.md",
            message.created_at.format("%Y%m%d_%H%M%S"),
            message.created_at.timestamp_subsec_micros(),
            id8
        )
    }

    /// Create a recipient's mailbox directory.
    pub fn register(&self, receiver_id: &str) -> Result<(), IpcError> {
        std::fs::create_dir_all(self.recipient_dir(receiver_id))
            .map_err(|e| IpcError::Store(e.into()))
    }

    /// Remove a recipient's mailbox directory and all messages in it.
    pub fn unregister(&self, receiver_id: &str) -> Result<(), IpcError> {
        let dir = self.recipient_dir(receiver_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| IpcError::Store(e.into()))?;
        }
        Ok(())
    }

    /// All recipient ids with a mailbox directory.
    pub fn recipients(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.ipc_dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Persist a message into the receiver's mailbox.
    pub fn deliver(&self, message: &Message) -> Result<PathBuf, IpcError> {
        let dir = self.recipient_dir(&message.receiver_id);
        std::fs::create_dir_all(&dir).map_err(|e| IpcError::Store(e.into()))?;

        let path = dir.join(Self::message_filename(message));
        store::atomic_write(&path, &render_message(message)).map_err(IpcError::Store)?;
        debug!(
            "delivered {} message {} -> {}",
            message.message_type, message.id, message.receiver_id
        );
        Ok(path)
    }

    /// Read a recipient's messages in chronological order.
    ///
    /// `unread_only` filters on `read_at == None`; `message_type` filters by
    /// type; `mark_as_read` stamps `read_at` on each returned unread message,
    /// rewriting its file atomically.
    pub fn read(
        &self,
        receiver_id: &str,
        unread_only: bool,
        message_type: Option<MessageType>,
        mark_as_read: bool,
    ) -> Result<Vec<Message>, IpcError> {
        let dir = self.recipient_dir(receiver_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| IpcError::Store(e.into()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        files.sort();

        let now = Utc::now();
        let mut messages = Vec::new();
        for path in files {
            let mut message = match parse_message_file(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping malformed message file {:?}: {e}", path);
                    continue;
                }
            };

            if unread_only && message.is_read() {
                continue;
            }
            if let Some(wanted) = message_type {
                if message.message_type != wanted {
                    continue;
                }
            }

            if mark_as_read && !message.is_read() {
                message.read_at = Some(now);
                store::atomic_write(&path, &render_message(&message)).map_err(IpcError::Store)?;
            }
            messages.push(message);
        }
        Ok(messages)
    }

    /// Count unread messages without touching any file.
    pub fn unread_count(&self, receiver_id: &str) -> Result<usize, IpcError> {
        let messages = self.read(receiver_id, true, None, false)?;
        Ok(messages.len())
    }
}

/// Serialize a message to its on-disk form (front matter + body).
fn render_message(message: &Message) -> String {
    let front = serde_yaml::to_string(message).unwrap_or_default();
    format!("---\n{front}---\n\n{}\n", message.content)
}

/// Parse a message file back into a [`Message`].
fn parse_message_file(path: &Path) -> Result<Message, IpcError> {
    let raw = std::fs::read_to_string(path).map_err(|e| IpcError::Store(e.into()))?;
    let rest = raw
        .strip_prefix("---\n")
        .ok_or_else(|| IpcError::Malformed(format!("{path:?}: missing front matter")))?;
    let (front, body) = rest
        .split_once("\n---\n")
        .ok_or_else(|| IpcError::Malformed(format!("{path:?}: unterminated front matter")))?;

    let mut message: Message =
        serde_yaml::from_str(front).map_err(|e| IpcError::Malformed(e.to_string()))?;
    message.content = body.trim().to_string();
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MessagePriority;
    use tempfile::TempDir;

    fn mailbox(temp: &TempDir) -> Mailbox {
        Mailbox::new(temp.path())
    }

    #[test]
    fn test_deliver_and_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);

        let sent = Message::new("admin", "w1", MessageType::TaskAssign, "do the thing")
            .with_subject("task assignment")
            .with_priority(MessagePriority::High)
            .with_metadata("task_id", serde_json::json!("t1"));
        mb.deliver(&sent).unwrap();

        // Round-trip without marking read leaves the message unchanged.
        let read = mb.read("w1", false, None, false).unwrap();
        assert_eq!(read.len(), 1);
        let got = &read[0];
        assert_eq!(got.id, sent.id);
        assert_eq!(got.content, "do the thing");
        assert_eq!(got.subject, "task assignment");
        assert_eq!(got.priority, MessagePriority::High);
        assert_eq!(got.task_id(), Some("t1"));
        assert!(!got.is_read());
    }

    #[test]
    fn test_chronological_order() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);

        let mut first = Message::new("a", "w1", MessageType::System, "first");
        first.created_at = Utc::now() - chrono::Duration::seconds(5);
        let second = Message::new("a", "w1", MessageType::System, "second");

        // Deliver out of order; listing must restore chronological order.
        mb.deliver(&second).unwrap();
        mb.deliver(&first).unwrap();

        let read = mb.read("w1", false, None, false).unwrap();
        assert_eq!(read[0].content, "first");
        assert_eq!(read[1].content, "second");
    }

    #[test]
    fn test_mark_as_read_and_unread_filter() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);

        mb.deliver(&Message::new("a", "w1", MessageType::System, "one")).unwrap();
        mb.deliver(&Message::new("a", "w1", MessageType::System, "two")).unwrap();
        assert_eq!(mb.unread_count("w1").unwrap(), 2);

        let read = mb.read("w1", true, None, true).unwrap();
        assert_eq!(read.len(), 2);
        assert!(read.iter().all(|m| m.is_read()));

        // Now everything is read; unread-only comes back empty, but a full
        // read still returns both.
        assert_eq!(mb.unread_count("w1").unwrap(), 0);
        assert_eq!(mb.read("w1", true, None, true).unwrap().len(), 0);
        assert_eq!(mb.read("w1", false, None, false).unwrap().len(), 2);
    }

    #[test]
    fn test_type_filter() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);

        mb.deliver(&Message::new("a", "w1", MessageType::System, "sys")).unwrap();
        mb.deliver(&Message::new("a", "w1", MessageType::Error, "err")).unwrap();

        let errors = mb.read("w1", false, Some(MessageType::Error), false).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, "err");
    }

    #[test]
    fn test_receiver_id_sanitized_inside_ipc_root() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);

        let msg = Message::new("a", "../../etc", MessageType::System, "x");
        let path = mb.deliver(&msg).unwrap();
        assert!(path.starts_with(mb.ipc_dir()));

        // Readable under the same sanitized id.
        let read = mb.read("../../etc", false, None, false).unwrap();
        assert_eq!(read.len(), 1);
    }

    #[test]
    fn test_register_and_recipients() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);

        mb.register("admin").unwrap();
        mb.register("w1").unwrap();
        assert_eq!(mb.recipients(), vec!["admin".to_string(), "w1".to_string()]);

        mb.unregister("w1").unwrap();
        assert_eq!(mb.recipients(), vec!["admin".to_string()]);
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let mb = mailbox(&temp);
        mb.register("w1").unwrap();
        std::fs::write(mb.ipc_dir().join("w1").join("00_garbage.md"), "not a message").unwrap();
        mb.deliver(&Message::new("a", "w1", MessageType::System, "ok")).unwrap();

        let read = mb.read("w1", false, None, false).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].content, "ok");
    }
}
