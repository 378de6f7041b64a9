// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for tool façade tests: a bootstrapped server over the
//! fake multiplexer plus helpers to stand up the agent hierarchy.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use crate::tmux::fake::FakeMultiplexer;

use super::Server;

pub(crate) struct TestServer {
    pub server: Server,
    pub mux: Arc<FakeMultiplexer>,
    temp: TempDir,
}

impl Deref for TestServer {
    type Target = Server;

    fn deref(&self) -> &Server {
        &self.server
    }
}

impl TestServer {
    pub fn project_root(&self) -> &Path {
        self.temp.path()
    }

    pub async fn tmux_session(&self) -> String {
        self.server
            .context()
            .await
            .expect("context attached")
            .tmux_session
            .clone()
    }
}

/// Server with an initialized workspace (`session_id = s1`, git disabled so
/// tests never shell out to a real git binary).
pub(crate) async fn bootstrapped_server() -> TestServer {
    server_with_args(json!({"enable_git": false})).await
}

/// Same, with extra `init_tmux_workspace` arguments merged in.
pub(crate) async fn server_with_args(extra: Value) -> TestServer {
    let temp = TempDir::new().expect("tempdir");
    let mux = Arc::new(FakeMultiplexer::new());
    let server = Server::new(mux.clone());

    let mut args = json!({
        "project_root": temp.path().display().to_string(),
        "session_id": "s1",
    });
    if let (Some(base), Some(extra)) = (args.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }

    let result = server.dispatch("init_tmux_workspace", &args).await;
    assert_eq!(result["success"], true, "workspace init failed: {result}");

    TestServer { server, mux, temp }
}

fn agent_id_of(result: &Value) -> String {
    result["agent"]["id"]
        .as_str()
        .unwrap_or_else(|| panic!("create_agent failed: {result}"))
        .to_string()
}

pub(crate) async fn create_owner(server: &Server) -> String {
    let result = server
        .dispatch("create_agent", &json!({"role": "owner"}))
        .await;
    agent_id_of(&result)
}

pub(crate) async fn create_admin(server: &Server, owner: &str) -> String {
    let result = server
        .dispatch(
            "create_agent",
            &json!({"role": "admin", "caller_agent_id": owner}),
        )
        .await;
    agent_id_of(&result)
}

pub(crate) async fn create_worker(server: &Server, caller: &str) -> String {
    let result = server
        .dispatch(
            "create_agent",
            &json!({"role": "worker", "caller_agent_id": caller}),
        )
        .await;
    agent_id_of(&result)
}
