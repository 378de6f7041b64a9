// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Periodic healthcheck daemon.
//!
//! Runs [`recovery::monitor_and_recover`] every interval. The loop is
//! best-effort: transient pass errors are counted and tolerated up to a
//! threshold; a quiet session (every worker idle with no current task, no
//! pending or in-progress tasks on the dashboard, for N consecutive
//! iterations) stops the daemon on its own. `create_agent` starts it,
//! cleanup tools stop it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agents::{AgentRole, AgentStatus};
use crate::context::ServerContext;

use super::recovery;

/// Consecutive pass errors before the daemon gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Handle to a running monitor daemon.
pub struct MonitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Start the daemon unless one is already running. Returns whether a new
/// daemon was started.
pub fn start_monitor(ctx: Arc<ServerContext>) -> bool {
    let mut guard = ctx.monitor.lock().expect("monitor handle poisoned");
    if guard.as_ref().is_some_and(|h| h.is_running()) {
        return false;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let loop_ctx = ctx.clone();
    let task = tokio::spawn(async move {
        run_loop(loop_ctx, stop_rx).await;
    });

    *guard = Some(MonitorHandle { stop: stop_tx, task });
    info!("healthcheck daemon started");
    true
}

/// Signal the daemon to stop. Returns whether one was running.
pub fn stop_monitor(ctx: &ServerContext) -> bool {
    let mut guard = ctx.monitor.lock().expect("monitor handle poisoned");
    match guard.take() {
        Some(handle) => {
            let was_running = handle.is_running();
            let _ = handle.stop.send(true);
            was_running
        }
        None => false,
    }
}

pub fn is_monitor_running(ctx: &ServerContext) -> bool {
    ctx.monitor
        .lock()
        .expect("monitor handle poisoned")
        .as_ref()
        .is_some_and(|h| h.is_running())
}

async fn run_loop(ctx: Arc<ServerContext>, mut stop: watch::Receiver<bool>) {
    let interval = Duration::from_secs(ctx.settings.healthcheck_interval_seconds.max(1));
    let idle_stop_after = ctx.settings.healthcheck_idle_stop_consecutive.max(1);
    let mut consecutive_errors = 0u32;
    let mut idle_cycles = 0u32;

    loop {
        if *stop.borrow() {
            break;
        }

        match recovery::monitor_and_recover(&ctx).await {
            Ok(report) => {
                consecutive_errors = 0;
                let escalated = report["escalated"].as_array().map(Vec::len).unwrap_or(0);
                let failed = report["failed_tasks"].as_array().map(Vec::len).unwrap_or(0);
                if escalated > 0 || failed > 0 {
                    warn!("monitor pass: escalated={escalated} failed={failed}");
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!("monitor pass error ({consecutive_errors} consecutive): {e}");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!("healthcheck daemon stopping after repeated errors");
                    break;
                }
            }
        }

        if session_is_quiet(&ctx) {
            idle_cycles += 1;
            if idle_cycles >= idle_stop_after {
                info!("healthcheck daemon auto-stopped (idle for {idle_cycles} cycles)");
                break;
            }
        } else {
            idle_cycles = 0;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.changed() => {}
        }
    }
}

/// Quiet = no live worker holds a task, every live worker is idle, and the
/// dashboard has neither in-progress nor pending tasks.
fn session_is_quiet(ctx: &ServerContext) -> bool {
    let workers = match ctx.registry.find_by_role(AgentRole::Worker) {
        Ok(workers) => workers,
        Err(_) => return false,
    };
    if workers.is_empty() {
        return true;
    }
    let all_idle = workers
        .iter()
        .all(|w| w.status == AgentStatus::Idle && w.current_task_id.is_none());
    if !all_idle {
        return false;
    }

    let summary = ctx.dashboard.summary();
    let in_progress = summary["in_progress_tasks"].as_u64().unwrap_or(0);
    let pending = summary["pending_tasks"].as_u64().unwrap_or(0);
    in_progress == 0 && pending == 0
}
