// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crewmux server binary.
//!
//! Speaks newline-delimited JSON over stdio: one request per line
//! (`{"id"?, "tool", "args"}`), one response per line. Logs go to stderr so
//! stdout stays a clean response stream.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use crewmux::telemetry::{init_telemetry, TelemetryConfig};
use crewmux::tmux::TmuxClient;
use crewmux::tools::Server;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(&TelemetryConfig::server());
    info!("crewmux {} starting", crewmux::VERSION);

    let server = Server::new(Arc::new(TmuxClient::new()));

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_line(&server, line).await;
        stdout.write_all(response.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}

async fn handle_line(server: &Server, line: &str) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return json!({
                "success": false,
                "error": "Validation",
                "message": format!("invalid request: {e}"),
            });
        }
    };

    let Some(tool) = request.get("tool").and_then(|v| v.as_str()) else {
        return json!({
            "success": false,
            "error": "Validation",
            "message": "request is missing the tool field",
        });
    };
    let args = request.get("args").cloned().unwrap_or_else(|| json!({}));

    let mut response = server.dispatch(tool, &args).await;
    if let (Some(id), Some(map)) = (request.get("id"), response.as_object_mut()) {
        map.insert("id".to_string(), id.clone());
    }
    response
}
