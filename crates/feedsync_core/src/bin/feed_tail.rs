/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use feedsync_core::runtime::{ClientConfig, FeedClient};
use feedsync_core::view::LogView;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let api_base_url =
        std::env::var("FEEDSYNC_API").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
    let preset = std::env::var("FEEDSYNC_PRESET").unwrap_or_else(|_| "instagram".to_string());
    let push_ws_url = std::env::var("FEEDSYNC_PUSH_WS").ok();
    let data_dir = std::env::var("FEEDSYNC_DATA_DIR").ok();
    let refresh_interval_secs = std::env::var("FEEDSYNC_REFRESH_SECS")
        .ok()
        .and_then(|v| v.parse().ok());

    let cfg = ClientConfig {
        api_base_url,
        preset: Some(preset),
        push_ws_url,
        data_dir,
        refresh_interval_secs,
        ..Default::default()
    };
    let client = FeedClient::start(cfg, Arc::new(LogView)).await?;
    if let Ok(token) = std::env::var("FEEDSYNC_TOKEN") {
        client.session.set_token(Some(token))?;
    }

    let snap = client.engine.snapshot();
    info!(items = snap.ids.len(), total = snap.total, "feed loaded");

    let mut ui = client.subscribe_ui();
    let mut stats = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats.tick() => {
                info!(metrics = %client.metrics_json(), push = ?client.push_state(), "stats");
            }
            ev = ui.recv() => match ev {
                Ok(ev) => info!(kind = %ev.kind, message = ?ev.message, target = ?ev.target, "ui event"),
                Err(RecvError::Lagged(n)) => info!(skipped = n, "ui events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown();
    Ok(())
}
