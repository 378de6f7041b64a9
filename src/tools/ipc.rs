// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Messaging tools.

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::agents::{Agent, AgentRole};
use crate::context::ServerContext;
use crate::dashboard::sync_from_messages;
use crate::error::ToolError;
use crate::ipc::{notify, Message, MessagePriority, MessageType};

use super::{optional_bool, optional_str, required_str, POLLING_GUARD_THRESHOLD};

/// Send a message to one agent, or broadcast when `receiver_id` is absent.
///
/// The durable write comes first; the pane notification is best-effort and
/// never fails the send. Broadcasts expand to every live agent (optionally
/// filtered by role) except the sender, delivered independently.
pub(super) async fn send_message(
    ctx: &ServerContext,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<Value, ToolError> {
    let sender_id = required_str(args, "sender_id")?;
    let content = required_str(args, "content")?;
    let message_type = MessageType::parse(&required_str(args, "message_type")?)?;
    let priority = match optional_str(args, "priority") {
        Some(raw) => MessagePriority::parse(&raw)?,
        None => MessagePriority::Normal,
    };
    let subject = optional_str(args, "subject").unwrap_or_default();
    let metadata = args
        .get("metadata")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    // Agents speak only as themselves.
    if let Some(caller) = caller {
        if caller.id != sender_id {
            return Err(ToolError::Denied(format!(
                "sender_id must match caller_agent_id (sender={sender_id}, caller={})",
                caller.id
            )));
        }
    }

    let explicit_id = optional_str(args, "message_id");
    let build = |receiver: &str| {
        let mut message = Message::new(sender_id.clone(), receiver, message_type, content.clone())
            .with_subject(subject.clone())
            .with_priority(priority);
        if let Some(id) = &explicit_id {
            message.id = id.clone();
        }
        message.metadata = metadata.clone();
        message
    };

    match optional_str(args, "receiver_id") {
        Some(receiver_id) => {
            let message = build(&receiver_id);
            // Explicit ids make retries idempotent: a duplicate send is
            // acknowledged without writing a second file.
            if explicit_id.is_some() {
                let existing = ctx.mailbox.read(&receiver_id, false, None, false)?;
                if existing.iter().any(|m| m.id == message.id) {
                    return Ok(json!({
                        "message_id": message.id,
                        "receiver_id": receiver_id,
                        "duplicate": true,
                    }));
                }
            }
            ctx.mailbox.deliver(&message)?;
            if let Ok(receiver) = ctx.registry.lookup(&receiver_id) {
                notify::notify_agent(
                    ctx.mux.as_ref(),
                    &receiver,
                    message_type.as_str(),
                    &sender_id,
                )
                .await;
            }
            Ok(json!({ "message_id": message.id, "receiver_id": receiver_id }))
        }
        None => {
            let role_filter = match optional_str(args, "role") {
                Some(raw) => Some(AgentRole::parse(&raw).ok_or(ToolError::InvalidValue {
                    field: "role",
                    message: format!("unknown role: {raw}"),
                })?),
                None => None,
            };

            let mut delivered = Vec::new();
            for agent in ctx.registry.list()? {
                if !agent.is_live() || agent.id == sender_id {
                    continue;
                }
                if role_filter.is_some_and(|r| agent.role != r) {
                    continue;
                }
                let message = build(&agent.id);
                if ctx.mailbox.deliver(&message).is_ok() {
                    // Per-recipient notification failures do not abort the
                    // batch.
                    notify::notify_agent(
                        ctx.mux.as_ref(),
                        &agent,
                        message_type.as_str(),
                        &sender_id,
                    )
                    .await;
                    delivered.push(agent.id.clone());
                } else {
                    debug!("broadcast delivery to {} failed", agent.id);
                }
            }
            info!("broadcast {} from {sender_id} to {} agents", message_type, delivered.len());
            Ok(json!({ "broadcast": true, "delivered_to": delivered }))
        }
    }
}

/// Read a mailbox.
///
/// Owners under the wait-lock: reading a message whose sender is the admin
/// clears the lock; consecutive empty unread polls past the guard threshold
/// short-circuit into `PollingBlocked` without touching the filesystem.
/// Admin callers additionally run the dashboard auto-sync over whatever was
/// just read.
pub(super) fn read_messages(
    ctx: &ServerContext,
    caller: Option<&Agent>,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let unread_only = optional_bool(args, "unread_only").unwrap_or(false);
    let mark_as_read = optional_bool(args, "mark_as_read").unwrap_or(true);
    let message_type = match optional_str(args, "message_type") {
        Some(raw) => Some(MessageType::parse(&raw)?),
        None => None,
    };

    let caller_role = caller.map(|c| c.role);
    let owner_id = caller.filter(|c| c.role == AgentRole::Owner).map(|c| c.id.clone());

    // Polling guard: checked before any I/O.
    if let Some(owner_id) = &owner_id {
        let wait = ctx.owner_wait_state(owner_id);
        if wait.active && unread_only && wait.empty_poll_count >= POLLING_GUARD_THRESHOLD {
            return Ok(super::polling_blocked_payload());
        }
    }

    let messages = ctx
        .mailbox
        .read(&agent_id, unread_only, message_type, mark_as_read)?;

    if let Some(owner_id) = &owner_id {
        let wait = ctx.owner_wait_state(owner_id);
        if wait.active {
            let admin_spoke = wait
                .admin_id
                .as_ref()
                .is_some_and(|admin| messages.iter().any(|m| &m.sender_id == admin));
            if admin_spoke {
                ctx.clear_owner_wait(owner_id, "admin_message_read");
                info!("owner {owner_id} wait-lock cleared by admin message");
            } else if unread_only && messages.is_empty() {
                ctx.record_empty_poll(owner_id);
            } else if !messages.is_empty() {
                ctx.reset_empty_polls(owner_id);
            }
        }
    }

    let mut payload = json!({
        "agent_id": agent_id,
        "count": messages.len(),
        "messages": messages.iter().map(|m| m.to_json()).collect::<Vec<_>>(),
    });

    // Dashboard auto-sync is an admin-read convenience; its rejections are
    // counters, never errors.
    if caller_role == Some(AgentRole::Admin) {
        let report = sync_from_messages(&ctx.dashboard, &messages);
        let map = payload.as_object_mut().expect("payload is an object");
        map.insert("dashboard_updates_applied".to_string(), json!(report.applied));
        map.insert(
            "dashboard_updates_skipped".to_string(),
            json!(report.skipped_count()),
        );
        map.insert("skipped_updates".to_string(), json!(report.skipped));
    }

    Ok(payload)
}

pub(super) fn get_unread_count(ctx: &ServerContext, args: &Value) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    let count = ctx.mailbox.unread_count(&agent_id)?;
    Ok(json!({ "agent_id": agent_id, "unread_count": count }))
}

pub(super) fn register_agent_to_ipc(
    ctx: &ServerContext,
    args: &Value,
) -> Result<Value, ToolError> {
    let agent_id = required_str(args, "agent_id")?;
    ctx.mailbox.register(&agent_id)?;
    Ok(json!({ "agent_id": agent_id, "registered": true }))
}

/// Explicit wait-lock override for the owner.
pub(super) fn unlock_owner_wait(
    ctx: &ServerContext,
    caller: Option<&Agent>,
) -> Result<Value, ToolError> {
    let caller = caller.ok_or(ToolError::MissingField("caller_agent_id"))?;
    let was_active = ctx.owner_wait_state(&caller.id).active;
    ctx.clear_owner_wait(&caller.id, "manual_unlock");
    Ok(json!({ "owner_id": caller.id, "was_active": was_active }))
}
