/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use feedsync_protocol::Notification;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::api::{ApiError, FeedApi};
use crate::ui_events::{UiEvent, KIND_NOTIFICATION};
use crate::view::ViewState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub total: u64,
    pub unseen: u64,
    pub badge: Option<String>,
    /// Newest notification, set when the total grew since the last poll.
    pub announced: Option<Notification>,
}

#[derive(Debug, Default)]
struct BadgeState {
    last_total: u64,
    seen: u64,
}

pub struct NotificationCenter {
    api: Arc<dyn FeedApi>,
    ui_events: broadcast::Sender<UiEvent>,
    limit: u32,
    state: Mutex<BadgeState>,
}

impl NotificationCenter {
    pub fn new(api: Arc<dyn FeedApi>, ui_events: broadcast::Sender<UiEvent>) -> Self {
        Self {
            api,
            ui_events,
            limit: 30,
            state: Mutex::new(BadgeState::default()),
        }
    }

    pub async fn poll_once(&self) -> Result<PollResult, ApiError> {
        let page = self.api.fetch_notifications(self.limit).await?;
        let total = page.total();
        let (unseen, grew) = {
            let mut st = self.state.lock().unwrap();
            let grew = total > st.last_total;
            st.last_total = total;
            st.seen = st.seen.min(total);
            (total - st.seen, grew)
        };
        let announced = if grew && unseen > 0 {
            page.notifications.first().cloned()
        } else {
            None
        };
        if let Some(n) = &announced {
            let who = n.from_name.as_deref().unwrap_or("someone");
            let _ = self.ui_events.send(UiEvent::new(
                KIND_NOTIFICATION,
                Some(format!("{who} {}", n.text)),
                n.item_id.clone(),
            ));
        }
        Ok(PollResult {
            total,
            unseen,
            badge: badge_text(unseen),
            announced,
        })
    }

    pub fn badge(&self) -> Option<String> {
        let st = self.state.lock().unwrap();
        badge_text(st.last_total - st.seen)
    }

    /// Everything polled so far counts as read.
    pub fn mark_seen(&self) {
        let mut st = self.state.lock().unwrap();
        st.seen = st.last_total;
    }
}

pub fn badge_text(unseen: u64) -> Option<String> {
    match unseen {
        0 => None,
        1..=9 => Some(unseen.to_string()),
        _ => Some("9+".to_string()),
    }
}

pub fn start_notification_worker(
    center: Arc<NotificationCenter>,
    interval: Duration,
    view_state: watch::Receiver<ViewState>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                r = shutdown.changed() => {
                    if r.is_err() || *shutdown.borrow() { break; }
                }
                _ = tick.tick() => {
                    if !view_state.borrow().visible {
                        continue;
                    }
                    match center.poll_once().await {
                        Ok(r) => debug!(total = r.total, unseen = r.unseen, "notifications polled"),
                        Err(ApiError::Unsupported(_)) => break,
                        Err(e) => debug!(error = %e, "notification poll failed"),
                    }
                }
            }
        }
    });
}
