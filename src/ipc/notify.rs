// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Out-of-band wake-up notifications for delivered messages.
//!
//! After a message file lands, the receiver's pane gets a single notice
//! line so the CLI inside it knows to poll its mailbox. The owner has no
//! pane; it gets a best-effort platform notification instead, silently
//! omitted when unavailable. Notification failures never fail the send.

use std::time::Duration;

use tracing::{info, warn};

use crate::agents::Agent;
use crate::tmux::Multiplexer;

const NOTIFY_MAX_RETRIES: u32 = 3;
const NOTIFY_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// The single line pushed into the receiver's pane.
pub fn notification_line(message_type: &str, sender_id: &str) -> String {
    format!("[IPC] 新しいメッセージ: {message_type} from {sender_id}")
}

/// Notify an agent's pane about a new message. Returns whether any channel
/// accepted the notification.
pub async fn notify_agent(
    mux: &dyn Multiplexer,
    agent: &Agent,
    message_type: &str,
    sender_id: &str,
) -> bool {
    let Some(pane) = &agent.pane else {
        // Owner runs outside tmux; try the platform channel.
        return send_platform_notification(message_type, sender_id).await;
    };

    let line = notification_line(message_type, sender_id);
    for attempt in 1..=NOTIFY_MAX_RETRIES {
        match mux
            .send_keys(
                &pane.session_name,
                pane.window_index,
                pane.pane_index,
                &line,
                false,
            )
            .await
        {
            Ok(()) => {
                info!("pane notification sent to {} (attempt {attempt})", agent.id);
                return true;
            }
            Err(e) => {
                warn!("pane notification to {} failed (attempt {attempt}): {e}", agent.id);
            }
        }
        if attempt < NOTIFY_MAX_RETRIES {
            tokio::time::sleep(NOTIFY_RETRY_INTERVAL).await;
        }
    }
    false
}

/// Best-effort macOS notification for the pane-less owner.
async fn send_platform_notification(message_type: &str, sender_id: &str) -> bool {
    if !cfg!(target_os = "macos") {
        return false;
    }

    let body = format!("[IPC] {message_type} from {sender_id}").replace('"', "\\\"");
    let script = format!("display notification \"{body}\" with title \"crewmux\"");
    match tokio::process::Command::new("osascript")
        .args(["-e", &script])
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!("platform notification unavailable: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRole, PaneRef};
    use crate::tmux::fake::FakeMultiplexer;

    #[test]
    fn test_notification_line_format() {
        let line = notification_line("task_complete", "worker-1");
        assert_eq!(line, "[IPC] 新しいメッセージ: task_complete from worker-1");
    }

    #[tokio::test]
    async fn test_notify_sends_to_pane() {
        let fake = FakeMultiplexer::new();
        fake.create_session("crewmux-p", "/tmp", "main").await.unwrap();

        let agent = Agent::new(AgentRole::Admin, "/p").with_pane(PaneRef::new("crewmux-p", 0, 0));
        assert!(notify_agent(&fake, &agent, "task_complete", "w1").await);

        let sent = fake.sent_keys();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("task_complete from w1"));
    }

    #[tokio::test]
    async fn test_notify_gives_up_after_retries() {
        let fake = FakeMultiplexer::new();
        // Session missing: every attempt fails.
        let agent = Agent::new(AgentRole::Worker, "/p").with_pane(PaneRef::new("gone", 0, 1));
        assert!(!notify_agent(&fake, &agent, "system", "admin").await);
        assert!(fake.sent_keys().is_empty());
    }
}
