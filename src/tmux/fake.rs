// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory multiplexer for tests.
//!
//! Records every send-keys call and lets tests script pane output, kill
//! sessions out from under the core, and inspect what was sent where.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::TmuxError;

use super::Multiplexer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentKeys {
    pub session: String,
    pub window: u32,
    pub pane: u32,
    pub text: String,
}

#[derive(Default)]
struct State {
    /// session -> window -> pane indices
    sessions: HashMap<String, HashMap<u32, Vec<u32>>>,
    /// scripted pane output keyed by target string
    pane_output: HashMap<String, String>,
    sent: Vec<SentKeys>,
    raw_keys: Vec<SentKeys>,
    fail_send: bool,
}

/// Scriptable in-memory [`Multiplexer`].
#[derive(Default)]
pub struct FakeMultiplexer {
    state: Mutex<State>,
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn target(session: &str, window: u32, pane: u32) -> String {
        format!("{session}:{window}.{pane}")
    }

    /// Script the output of a pane.
    pub fn set_pane_output(&self, session: &str, window: u32, pane: u32, output: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .pane_output
            .insert(Self::target(session, window, pane), output.to_string());
    }

    /// Make subsequent send_keys calls fail (unreachable pane).
    pub fn set_fail_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    /// Everything sent with send_keys, in order.
    pub fn sent_keys(&self) -> Vec<SentKeys> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Raw key chords sent (interrupts etc.), in order.
    pub fn raw_keys(&self) -> Vec<SentKeys> {
        self.state.lock().unwrap().raw_keys.clone()
    }

    pub fn session_names(&self) -> Vec<String> {
        self.state.lock().unwrap().sessions.keys().cloned().collect()
    }

    /// Drop a session as if it died externally.
    pub fn crash_session(&self, session: &str) {
        self.state.lock().unwrap().sessions.remove(session);
    }
}

#[async_trait]
impl Multiplexer for FakeMultiplexer {
    async fn create_session(
        &self,
        session: &str,
        _working_dir: &str,
        _window_name: &str,
    ) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        state
            .sessions
            .entry(session.to_string())
            .or_insert_with(|| HashMap::from([(0, vec![0])]));
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<(), TmuxError> {
        self.state.lock().unwrap().sessions.remove(session);
        Ok(())
    }

    async fn session_exists(&self, session: &str) -> bool {
        self.state.lock().unwrap().sessions.contains_key(session)
    }

    async fn new_window(&self, session: &str, _window_name: &str) -> Result<u32, TmuxError> {
        let mut state = self.state.lock().unwrap();
        let windows = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| TmuxError::SessionNotFound(session.to_string()))?;
        let index = windows.keys().max().copied().unwrap_or(0) + 1;
        windows.insert(index, vec![0]);
        Ok(index)
    }

    async fn split_pane(
        &self,
        session: &str,
        window: u32,
        _pane: u32,
        _horizontal: bool,
        _percent: Option<u32>,
    ) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        let windows = state
            .sessions
            .get_mut(session)
            .ok_or_else(|| TmuxError::SessionNotFound(session.to_string()))?;
        let panes = windows
            .get_mut(&window)
            .ok_or_else(|| TmuxError::PaneUnreachable(format!("{session}:{window}")))?;
        let next = panes.iter().max().copied().unwrap_or(0) + 1;
        panes.push(next);
        Ok(())
    }

    async fn even_horizontal(&self, _session: &str, _window: u32) -> Result<(), TmuxError> {
        Ok(())
    }

    async fn send_keys(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        text: &str,
        _clear_input: bool,
    ) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(TmuxError::PaneUnreachable(Self::target(session, window, pane)));
        }
        if !state.sessions.contains_key(session) {
            return Err(TmuxError::SessionNotFound(session.to_string()));
        }
        state.sent.push(SentKeys {
            session: session.to_string(),
            window,
            pane,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_raw_key(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        key: &str,
    ) -> Result<(), TmuxError> {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.contains_key(session) {
            return Err(TmuxError::SessionNotFound(session.to_string()));
        }
        state.raw_keys.push(SentKeys {
            session: session.to_string(),
            window,
            pane,
            text: key.to_string(),
        });
        Ok(())
    }

    async fn capture_pane(
        &self,
        session: &str,
        window: u32,
        pane: u32,
        _lines: u32,
    ) -> Result<String, TmuxError> {
        let state = self.state.lock().unwrap();
        if !state.sessions.contains_key(session) {
            return Err(TmuxError::SessionNotFound(session.to_string()));
        }
        Ok(state
            .pane_output
            .get(&Self::target(session, window, pane))
            .cloned()
            .unwrap_or_default())
    }

    async fn pane_exists(&self, session: &str, window: u32, pane: u32) -> bool {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(session)
            .and_then(|w| w.get(&window))
            .map(|panes| panes.contains(&pane))
            .unwrap_or(false)
    }
}
