/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use feedsync_protocol::PushEvent;
use futures_util::{SinkExt, StreamExt};
use rand::{thread_rng, Rng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tracing::{debug, info, warn};

use crate::net_metrics::NetMetrics;
use crate::session::ClientSessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_jitter: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Same delay every time, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self { base: delay, max: delay, max_jitter: Duration::ZERO }
    }

    /// `min(base * 2^attempt, max)`, without jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            thread_rng().gen_range(0..=jitter_ms)
        };
        self.delay(attempt) + Duration::from_millis(jitter)
    }
}

pub fn push_url(ws_url: &str, token: &str) -> String {
    let sep = if ws_url.contains('?') { '&' } else { '?' };
    format!("{ws_url}{sep}token={}", urlencoding::encode(token))
}

/// Decodes one text frame. Undecodable frames yield `None`; unknown frame
/// types decode to `PushEvent::Unknown`.
pub fn parse_frame(text: &str) -> Option<PushEvent> {
    match serde_json::from_str(text) {
        Ok(ev) => Some(ev),
        Err(e) => {
            debug!("bad push frame: {e}");
            None
        }
    }
}

enum ConnEnd {
    Shutdown,
    Closed,
}

async fn run_connection(
    url: &str,
    events: &mpsc::Sender<PushEvent>,
    state: &watch::Sender<ConnectionState>,
    metrics: &NetMetrics,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<ConnEnd> {
    let (ws, _) = match tokio_tungstenite::connect_async(url).await {
        Ok(v) => v,
        Err(e) => {
            metrics.set_push_error(e.to_string());
            return Err(e.into());
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    metrics.set_push_connected(true);
    let _ = state.send(ConnectionState::Connected);
    info!("push channel connected");

    let mut ping = tokio::time::interval(Duration::from_secs(25));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            r = shutdown.changed() => {
                if r.is_err() || *shutdown.borrow() {
                    let _ = ws_tx.send(tungstenite::Message::Close(None)).await;
                    break ConnEnd::Shutdown;
                }
            }
            _ = ping.tick() => {
                let payload = now_ms().to_be_bytes().to_vec();
                if let Err(e) = ws_tx.send(tungstenite::Message::Ping(payload)).await {
                    metrics.set_push_error(e.to_string());
                    break ConnEnd::Closed;
                }
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break ConnEnd::Closed; };
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        metrics.set_push_error(e.to_string());
                        break ConnEnd::Closed;
                    }
                };
                let text = match msg {
                    tungstenite::Message::Text(t) => t,
                    tungstenite::Message::Pong(p) => {
                        if p.len() == 8 {
                            let mut a = [0u8; 8];
                            a.copy_from_slice(&p);
                            metrics.push_rtt_update(now_ms().saturating_sub(u64::from_be_bytes(a)));
                        }
                        continue;
                    }
                    tungstenite::Message::Ping(p) => {
                        let _ = ws_tx.send(tungstenite::Message::Pong(p)).await;
                        continue;
                    }
                    tungstenite::Message::Close(_) => break ConnEnd::Closed,
                    _ => continue,
                };
                metrics.push_rx_add(text.len() as u64);
                let Some(ev) = parse_frame(&text) else { continue; };
                if matches!(ev, PushEvent::Unknown) {
                    continue;
                }
                if events.send(ev).await.is_err() {
                    break ConnEnd::Shutdown;
                }
            }
        }
    };

    metrics.set_push_connected(false);
    Ok(end)
}

/// Keeps the push socket open for as long as a credential is present,
/// reconnecting with backoff. Decoded events are forwarded on `events`.
pub fn start_push_worker(
    ws_url: String,
    session: Arc<ClientSessionState>,
    policy: ReconnectPolicy,
    events: mpsc::Sender<PushEvent>,
    state: watch::Sender<ConnectionState>,
    metrics: Arc<NetMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match session.token() {
                None => {
                    let _ = state.send(ConnectionState::Disconnected);
                    policy.base
                }
                Some(token) => {
                    let _ = state.send(ConnectionState::Connecting);
                    let url = push_url(&ws_url, &token);
                    match run_connection(&url, &events, &state, &metrics, &mut shutdown).await {
                        Ok(ConnEnd::Shutdown) => break,
                        Ok(ConnEnd::Closed) => {
                            attempt = 0;
                            warn!("push channel closed");
                        }
                        Err(e) => warn!("push connect failed: {e:#}"),
                    }
                    let _ = state.send(ConnectionState::BackingOff);
                    metrics.push_reconnect();
                    let d = policy.delay_with_jitter(attempt);
                    attempt = attempt.saturating_add(1);
                    d
                }
            };
            debug!(delay_ms = delay.as_millis() as u64, "push channel waiting");
            tokio::select! {
                r = shutdown.changed() => {
                    if r.is_err() { break; }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        let _ = state.send(ConnectionState::Disconnected);
    });
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
