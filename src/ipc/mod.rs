// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inter-agent IPC: durable file mailboxes + pane wake-ups.
//!
//! Each recipient owns a directory `{session_dir}/ipc/{receiver_id}/` of
//! message files (YAML front matter + markdown body). Filenames are
//! timestamp-prefixed so a plain directory listing is chronological order.
//! Messages are immutable once written except for `read_at`.

pub mod mailbox;
pub mod notify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IpcError;

// ============================================================================
// Message model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssign,
    TaskProgress,
    TaskComplete,
    TaskFailed,
    TaskApproved,
    StatusUpdate,
    Request,
    Response,
    Broadcast,
    System,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssign => "task_assign",
            Self::TaskProgress => "task_progress",
            Self::TaskComplete => "task_complete",
            Self::TaskFailed => "task_failed",
            Self::TaskApproved => "task_approved",
            Self::StatusUpdate => "status_update",
            Self::Request => "request",
            Self::Response => "response",
            Self::Broadcast => "broadcast",
            Self::System => "system",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self, IpcError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "task_assign" => Ok(Self::TaskAssign),
            "task_progress" => Ok(Self::TaskProgress),
            "task_complete" => Ok(Self::TaskComplete),
            "task_failed" => Ok(Self::TaskFailed),
            "task_approved" => Ok(Self::TaskApproved),
            "status_update" => Ok(Self::StatusUpdate),
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "broadcast" => Ok(Self::Broadcast),
            "system" => Ok(Self::System),
            "error" => Ok(Self::Error),
            other => Err(IpcError::UnknownMessageType(other.to_string())),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
}

impl MessagePriority {
    pub fn parse(value: &str) -> Result<Self, IpcError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(IpcError::UnknownPriority(other.to_string())),
        }
    }
}

/// One inter-agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subject: String,
    #[serde(skip)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            message_type,
            priority: MessagePriority::Normal,
            subject: String::new(),
            content: content.into(),
            created_at: Utc::now(),
            read_at: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Task id carried in metadata, when present.
    pub fn task_id(&self) -> Option<&str> {
        self.metadata.get("task_id").and_then(|v| v.as_str())
    }

    /// Progress percentage carried in metadata, when present.
    pub fn progress(&self) -> Option<u8> {
        self.metadata
            .get("progress")
            .and_then(|v| v.as_u64())
            .map(|p| p.min(100) as u8)
    }

    /// Wire form for tool payloads (content inlined).
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "content".to_string(),
                serde_json::Value::String(self.content.clone()),
            );
        }
        value
    }
}
