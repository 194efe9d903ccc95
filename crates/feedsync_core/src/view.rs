/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::optimistic::{InteractionKey, InteractionState};
use crate::present::Fragment;

/// Rendering surface the engine writes to. Calls are made while the engine
/// holds its state lock, so implementations must not call back into the
/// engine synchronously.
pub trait FeedView: Send + Sync {
    /// Replace the whole list.
    fn rebuild(&self, fragments: &[Fragment]);
    fn append(&self, fragments: &[Fragment]);
    fn remove(&self, item_id: &str);
    /// Update counters of an already rendered item in place.
    fn patch_counters(&self, item_id: &str, patch: &CounterPatch);
    fn expand_comments(&self, item_id: &str, markup: &str);
    fn append_comment(&self, item_id: &str, markup: &str);
    /// Append a reply under `comment_id` of a rendered item.
    fn append_reply(&self, item_id: &str, comment_id: &str, markup: &str);
    fn set_comment_likes(&self, item_id: &str, comment_id: &str, likes: u64);
    fn set_interaction(&self, key: &InteractionKey, state: &InteractionState);
    fn set_total(&self, total: u64);
    fn show_empty(&self, message: &str);
    fn scroll_offset(&self) -> f64;
    fn restore_scroll(&self, offset: f64);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterPatch {
    pub likes: Option<u64>,
    pub likes_text: Option<String>,
    pub comment_count: Option<u64>,
    pub view_all_text: Option<String>,
    pub comments_markup: Option<String>,
}

impl CounterPatch {
    pub fn is_empty(&self) -> bool {
        self.likes.is_none() && self.comment_count.is_none() && self.comments_markup.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    Feed,
    Reels,
    Profile,
    Other,
}

/// Host-reported visibility. Periodic work only runs while the feed tab is
/// shown in a visible page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewState {
    pub visible: bool,
    pub tab: Tab,
}

impl Default for ViewState {
    fn default() -> Self {
        Self { visible: true, tab: Tab::Feed }
    }
}

impl ViewState {
    pub fn feed_active(&self) -> bool {
        self.visible && self.tab == Tab::Feed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub offset: f64,
    pub viewport: f64,
    pub content: f64,
}

impl ScrollPosition {
    pub fn near_bottom(&self, margin: f64) -> bool {
        self.content > 0.0 && self.offset + self.viewport >= self.content - margin
    }
}

/// Headless view that only logs what would be drawn.
#[derive(Debug, Default)]
pub struct LogView;

impl FeedView for LogView {
    fn rebuild(&self, fragments: &[Fragment]) {
        info!(items = fragments.len(), "view rebuild");
    }

    fn append(&self, fragments: &[Fragment]) {
        info!(items = fragments.len(), "view append");
    }

    fn remove(&self, item_id: &str) {
        info!(item_id, "view remove");
    }

    fn patch_counters(&self, item_id: &str, patch: &CounterPatch) {
        debug!(item_id, likes = ?patch.likes, comments = ?patch.comment_count, "view patch");
    }

    fn expand_comments(&self, item_id: &str, _markup: &str) {
        debug!(item_id, "view expand comments");
    }

    fn append_comment(&self, item_id: &str, _markup: &str) {
        debug!(item_id, "view append comment");
    }

    fn append_reply(&self, item_id: &str, comment_id: &str, _markup: &str) {
        debug!(item_id, comment_id, "view append reply");
    }

    fn set_comment_likes(&self, item_id: &str, comment_id: &str, likes: u64) {
        debug!(item_id, comment_id, likes, "view comment likes");
    }

    fn set_interaction(&self, key: &InteractionKey, state: &InteractionState) {
        debug!(?key, ?state, "view interaction");
    }

    fn set_total(&self, total: u64) {
        debug!(total, "view total");
    }

    fn show_empty(&self, message: &str) {
        info!(message, "view empty");
    }

    fn scroll_offset(&self) -> f64 {
        0.0
    }

    fn restore_scroll(&self, _offset: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_bottom_uses_margin() {
        let pos = ScrollPosition { offset: 1000.0, viewport: 800.0, content: 2200.0 };
        assert!(pos.near_bottom(500.0));
        assert!(!pos.near_bottom(300.0));
        let empty = ScrollPosition { offset: 0.0, viewport: 800.0, content: 0.0 };
        assert!(!empty.near_bottom(500.0));
    }

    #[test]
    fn feed_active_requires_visibility_and_tab() {
        assert!(ViewState::default().feed_active());
        assert!(!ViewState { visible: false, tab: Tab::Feed }.feed_active());
        assert!(!ViewState { visible: true, tab: Tab::Reels }.feed_active());
    }
}
