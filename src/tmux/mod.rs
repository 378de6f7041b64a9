// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal multiplexer adapter.
//!
//! The core never talks to tmux directly; it goes through the
//! [`Multiplexer`] trait, an opaque capability set: create/kill sessions,
//! create windows, split panes, send keystrokes, report liveness and recent
//! output. [`TmuxClient`] wraps the `tmux` binary; tests exercise the core
//! against [`fake::FakeMultiplexer`].

pub mod fake;
pub mod layout;

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::error::TmuxError;

/// Capability set the core requires from the multiplexer.
#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session with one window named `window_name`.
    async fn create_session(
        &self,
        session: &str,
        working_dir: &str,
        window_name: &str,
    ) -> Result<(), TmuxError>;

    /// Kill a session; succeeds when already gone.
    async fn kill_session(&self, session: &str) -> Result<(), TmuxError>;

    async fn session_exists(&self, session: &str) -> bool;

    /// Create an additional named window; returns its index.
    async fn new_window(&self, session: &str, window_name: &str) -> Result<u32, TmuxError>;

    /// Split a pane. `horizontal` splits left/right; `percent` sizes the new
    /// pane when given.
    async fn split_pane(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        horizontal: bool,
        percent: Option<u32>,
    ) -> Result<(), TmuxError>;

    /// Even out column widths in a window.
    async fn even_horizontal(&self, session: &str, window: u32) -> Result<(), TmuxError>;

    /// Send a text line to a pane followed by Enter. When `clear_input` is
    /// set, the pane's input buffer is cleared first; notifications must not
    /// clear so they never interrupt in-flight work.
    async fn send_keys(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        text: &str,
        clear_input: bool,
    ) -> Result<(), TmuxError>;

    /// Send a raw key chord (e.g. `C-c`) without the trailing Enter.
    async fn send_raw_key(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        key: &str,
    ) -> Result<(), TmuxError>;

    /// Last `lines` of pane output.
    async fn capture_pane(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        lines: u32,
    ) -> Result<String, TmuxError>;

    async fn pane_exists(&self, session: &str, window: u32, pane: u32) -> bool;
}

/// Multiplexer implementation shelling out to the `tmux` binary.
pub struct TmuxClient {
    binary: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            binary: "tmux".to_string(),
        }
    }

    /// Use a different binary name/path (tests, unusual installs).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn target(session: &str, window: u32, pane: u32) -> String {
        format!("{session}:{window}.{pane}")
    }

    /// Run a tmux command and return (exit ok, stdout, stderr).
    async fn run(&self, args: &[&str]) -> Result<(bool, String, String), TmuxError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TmuxError::BinaryMissing
                } else {
                    TmuxError::Io(e)
                }
            })?;

        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }

    async fn run_ok(&self, args: &[&str]) -> Result<(), TmuxError> {
        let (ok, _, stderr) = self.run(args).await?;
        if ok {
            Ok(())
        } else {
            Err(TmuxError::CommandFailed(stderr.trim().to_string()))
        }
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn create_session(
        &self,
        session: &str,
        working_dir: &str,
        window_name: &str,
    ) -> Result<(), TmuxError> {
        self.run_ok(&[
            "new-session",
            "-d",
            "-s",
            session,
            "-c",
            working_dir,
            "-n",
            window_name,
        ])
        .await?;

        // Pin indices so pane coordinates are stable regardless of the
        // user's global base-index configuration.
        let _ = self.run(&["set-option", "-t", session, "base-index", "0"]).await;
        let _ = self
            .run(&["set-option", "-t", session, "pane-base-index", "0"])
            .await;
        debug!("created tmux session {session}");
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        let (ok, _, stderr) = self.run(&["kill-session", "-t", session]).await?;
        if !ok {
            warn!("kill-session {session}: {}", stderr.trim());
        }
        Ok(())
    }

    async fn session_exists(&self, session: &str) -> bool {
        matches!(self.run(&["has-session", "-t", session]).await, Ok((true, _, _)))
    }

    async fn new_window(&self, session: &str, window_name: &str) -> Result<u32, TmuxError> {
        self.run_ok(&["new-window", "-t", session, "-n", window_name])
            .await?;
        let _ = self
            .run(&[
                "set-window-option",
                "-t",
                &format!("{session}:{window_name}"),
                "pane-base-index",
                "0",
            ])
            .await;

        let (ok, stdout, stderr) = self
            .run(&["list-windows", "-t", session, "-F", "#{window_index}"])
            .await?;
        if !ok {
            return Err(TmuxError::CommandFailed(stderr.trim().to_string()));
        }
        stdout
            .lines()
            .filter_map(|l| l.trim().parse::<u32>().ok())
            .max()
            .ok_or_else(|| TmuxError::CommandFailed("no windows listed".to_string()))
    }

    async fn split_pane(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        horizontal: bool,
        percent: Option<u32>,
    ) -> Result<(), TmuxError> {
        let target = Self::target(session, window, pane);
        let direction = if horizontal { "-h" } else { "-v" };
        let percent_str;
        let mut args = vec!["split-window", direction, "-t", target.as_str()];
        if let Some(p) = percent {
            percent_str = p.to_string();
            args.push("-p");
            args.push(&percent_str);
        }
        self.run_ok(&args).await
    }

    async fn even_horizontal(&self, session: &str, window: u32) -> Result<(), TmuxError> {
        let target = format!("{session}:{window}");
        let (ok, _, _) = self
            .run(&["select-layout", "-t", &target, "even-horizontal"])
            .await?;
        if !ok {
            warn!("even-horizontal failed on {target}, continuing");
        }
        Ok(())
    }

    async fn send_keys(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        text: &str,
        clear_input: bool,
    ) -> Result<(), TmuxError> {
        let target = Self::target(session, window, pane);

        if clear_input {
            let _ = self.run(&["send-keys", "-t", &target, "C-u"]).await;
        }

        // Text in literal mode, Enter as a separate send: sending them
        // together makes some CLIs treat the newline as input text.
        self.run_ok(&["send-keys", "-t", &target, "-l", text])
            .await
            .map_err(|e| {
                error!("send-keys to {target} failed: {e}");
                TmuxError::PaneUnreachable(target.clone())
            })?;

        let enter = self.run(&["send-keys", "-t", &target, "C-m"]).await?;
        if !enter.0 {
            self.run_ok(&["send-keys", "-t", &target, "Enter"])
                .await
                .map_err(|_| TmuxError::PaneUnreachable(target))?;
        }
        Ok(())
    }

    async fn send_raw_key(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        key: &str,
    ) -> Result<(), TmuxError> {
        let target = Self::target(session, window, pane);
        self.run_ok(&["send-keys", "-t", &target, key]).await
    }

    async fn capture_pane(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        lines: u32,
    ) -> Result<String, TmuxError> {
        let target = Self::target(session, window, pane);
        let start = format!("-{lines}");
        let (ok, stdout, stderr) = self
            .run(&["capture-pane", "-t", &target, "-p", "-S", &start])
            .await?;
        if ok {
            Ok(stdout)
        } else {
            Err(TmuxError::PaneUnreachable(format!(
                "{target}: {}",
                stderr.trim()
            )))
        }
    }

    async fn pane_exists(&self, session: &str, window: u32, pane: u32) -> bool {
        let target = format!("{session}:{window}");
        match self
            .run(&["list-panes", "-t", &target, "-F", "#{pane_index}"])
            .await
        {
            Ok((true, stdout, _)) => stdout
                .lines()
                .filter_map(|l| l.trim().parse::<u32>().ok())
                .any(|p| p == pane),
            _ => false,
        }
    }
}
