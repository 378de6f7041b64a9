// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic pane grid layout.
//!
//! Pane indices are part of the persistent agent records, so the split
//! sequence must produce the same numbering on every run:
//!
//! ```text
//! ┌─────────────────┬──────────┬──────────┬──────────┐
//! │                 │    W1    │    W2    │    W3    │
//! │     Admin       │  pane 1  │  pane 2  │  pane 3  │
//! │     pane 0      ├──────────┼──────────┼──────────┤
//! │      40%        │    W4    │    W5    │    W6    │
//! │                 │  pane 4  │  pane 5  │  pane 6  │
//! └─────────────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Vertical splits on the right half run right-to-left (columns 3, 2, 1) so
//! earlier splits never shift the indices of panes still waiting to split.
//! Any failure mid-sequence rolls back by killing the whole session.

use tracing::{error, info};

use crate::error::TmuxError;

use super::Multiplexer;

/// Name of the main window.
pub const MAIN_WINDOW_NAME: &str = "main";

/// Window name prefix for overflow worker windows.
pub const EXTRA_WINDOW_PREFIX: &str = "workers-";

/// Create the main session with the admin + 6 worker pane layout.
///
/// Returns `Ok(false)` when the session already existed (layout untouched).
pub async fn create_main_session(
    mux: &dyn Multiplexer,
    session: &str,
    working_dir: &str,
) -> Result<bool, TmuxError> {
    if mux.session_exists(session).await {
        info!("session {session} already exists, keeping its layout");
        return Ok(false);
    }

    mux.create_session(session, working_dir, MAIN_WINDOW_NAME)
        .await?;

    if let Err(e) = split_main_window(mux, session).await {
        error!("main window layout failed, rolling back session {session}: {e}");
        let _ = mux.kill_session(session).await;
        return Err(e);
    }

    info!("created main session {session} (admin + 6 worker panes)");
    Ok(true)
}

async fn split_main_window(mux: &dyn Multiplexer, session: &str) -> Result<(), TmuxError> {
    // Columns: admin keeps 40%, the right 60% becomes three equal columns.
    mux.split_pane(session, 0, 0, true, Some(60)).await?;
    mux.split_pane(session, 0, 1, true, Some(67)).await?;
    mux.split_pane(session, 0, 2, true, Some(50)).await?;

    // Rows: split each right column top/bottom, right to left.
    for pane in [3u32, 2, 1] {
        mux.split_pane(session, 0, pane, false, None).await?;
    }
    Ok(())
}

/// Create an overflow worker window split into a `rows` x `cols` grid.
///
/// Returns the window index. Split failures propagate to the caller; only
/// the initial session layout rolls back the whole session.
pub async fn add_worker_window(
    mux: &dyn Multiplexer,
    session: &str,
    ordinal: u32,
    rows: u32,
    cols: u32,
) -> Result<u32, TmuxError> {
    let window_name = format!("{EXTRA_WINDOW_PREFIX}{ordinal}");
    let window = mux.new_window(session, &window_name).await?;

    // Columns first, then even them out so each has room to split.
    for _ in 0..cols.saturating_sub(1) {
        mux.split_pane(session, window, 0, true, None).await?;
    }
    mux.even_horizontal(session, window).await?;

    // Rows per column, right to left to keep indices stable.
    for col in (0..cols).rev() {
        for _ in 0..rows.saturating_sub(1) {
            mux.split_pane(session, window, col, false, None).await?;
        }
    }

    info!("created worker window {session}:{window} ({rows}x{cols})");
    Ok(window)
}
