/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Scripted backend and recording view shared by the unit tests.

use async_trait::async_trait;
use feedsync_protocol::{FeedItem, FeedPage, MutationAck, NotificationsPage};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::{ApiError, FeedApi, Mutation};
use crate::optimistic::{InteractionKey, InteractionState};
use crate::present::Fragment;
use crate::view::{CounterPatch, FeedView};

pub fn item(id: &str, likes: u64) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        likes,
        ..Default::default()
    }
}

pub fn page(items: &[(&str, u64)], total: Option<u64>) -> FeedPage {
    FeedPage {
        items: items.iter().map(|(id, l)| item(id, *l)).collect(),
        total,
        ..Default::default()
    }
}

type Script<T> = Mutex<VecDeque<(Duration, Result<T, ApiError>)>>;

/// Responses are consumed in call order. The response is taken when the call
/// starts, then the scripted delay elapses.
#[derive(Default)]
pub struct StubApi {
    feed: Script<FeedPage>,
    fallback: Script<FeedPage>,
    mutation: Script<MutationAck>,
    notifications: Script<NotificationsPage>,
    following: Mutex<Vec<String>>,
    feed_calls: Mutex<Vec<(u32, Option<u64>)>>,
    fallback_calls: Mutex<u32>,
    mutations: Mutex<Vec<Mutation>>,
}

impl StubApi {
    pub fn push_feed(&self, delay: Duration, r: Result<FeedPage, ApiError>) {
        self.feed.lock().unwrap().push_back((delay, r));
    }

    pub fn push_fallback(&self, delay: Duration, r: Result<FeedPage, ApiError>) {
        self.fallback.lock().unwrap().push_back((delay, r));
    }

    pub fn push_mutation(&self, delay: Duration, r: Result<MutationAck, ApiError>) {
        self.mutation.lock().unwrap().push_back((delay, r));
    }

    pub fn push_notifications(&self, delay: Duration, r: Result<NotificationsPage, ApiError>) {
        self.notifications.lock().unwrap().push_back((delay, r));
    }

    pub fn set_following(&self, ids: Vec<String>) {
        *self.following.lock().unwrap() = ids;
    }

    pub fn feed_calls(&self) -> Vec<(u32, Option<u64>)> {
        self.feed_calls.lock().unwrap().clone()
    }

    pub fn fallback_calls(&self) -> u32 {
        *self.fallback_calls.lock().unwrap()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }
}

async fn play<T>(script: &Script<T>) -> Result<T, ApiError> {
    let next = script.lock().unwrap().pop_front();
    let Some((delay, result)) = next else {
        return Err(ApiError::Transport("no scripted response".into()));
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    result
}

#[async_trait]
impl FeedApi for StubApi {
    async fn fetch_feed(&self, limit: u32, offset: Option<u64>) -> Result<FeedPage, ApiError> {
        self.feed_calls.lock().unwrap().push((limit, offset));
        play(&self.feed).await
    }

    async fn fetch_fallback(&self, _limit: u32) -> Result<FeedPage, ApiError> {
        *self.fallback_calls.lock().unwrap() += 1;
        play(&self.fallback).await
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<MutationAck, ApiError> {
        self.mutations.lock().unwrap().push(mutation.clone());
        play(&self.mutation).await
    }

    async fn fetch_notifications(&self, _limit: u32) -> Result<NotificationsPage, ApiError> {
        play(&self.notifications).await
    }

    async fn fetch_following(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.following.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewOp {
    Rebuild(Vec<String>),
    Append(Vec<String>),
    Remove(String),
    Patch(String, CounterPatch),
    Expand(String),
    AppendComment(String),
    AppendReply(String, String),
    CommentLikes(String, String, u64),
    Interaction(InteractionKey, InteractionState),
    Total(u64),
    Empty(String),
    RestoreScroll(f64),
}

#[derive(Default)]
pub struct RecordingView {
    ops: Mutex<Vec<ViewOp>>,
    scroll: Mutex<f64>,
    markup: Mutex<HashMap<String, String>>,
}

impl RecordingView {
    pub fn ops(&self) -> Vec<ViewOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Last markup drawn for an item by a rebuild or append.
    pub fn markup(&self, item_id: &str) -> Option<String> {
        self.markup.lock().unwrap().get(item_id).cloned()
    }

    pub fn set_scroll(&self, offset: f64) {
        *self.scroll.lock().unwrap() = offset;
    }

    pub fn rebuild_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, ViewOp::Rebuild(_)))
            .count()
    }

    pub fn patches(&self) -> Vec<(String, CounterPatch)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ViewOp::Patch(id, p) => Some((id, p)),
                _ => None,
            })
            .collect()
    }

    pub fn appended(&self) -> Vec<Vec<String>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ViewOp::Append(ids) => Some(ids),
                _ => None,
            })
            .collect()
    }

    pub fn interactions(&self, key: &InteractionKey) -> Vec<InteractionState> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ViewOp::Interaction(k, s) if &k == key => Some(s),
                _ => None,
            })
            .collect()
    }

    fn push(&self, op: ViewOp) {
        self.ops.lock().unwrap().push(op);
    }

    fn record(&self, fragments: &[Fragment]) {
        let mut g = self.markup.lock().unwrap();
        for f in fragments {
            g.insert(f.item_id.clone(), f.markup.clone());
        }
    }
}

fn ids(fragments: &[Fragment]) -> Vec<String> {
    fragments.iter().map(|f| f.item_id.clone()).collect()
}

impl FeedView for RecordingView {
    fn rebuild(&self, fragments: &[Fragment]) {
        self.markup.lock().unwrap().clear();
        self.record(fragments);
        self.push(ViewOp::Rebuild(ids(fragments)));
    }

    fn append(&self, fragments: &[Fragment]) {
        self.record(fragments);
        self.push(ViewOp::Append(ids(fragments)));
    }

    fn remove(&self, item_id: &str) {
        self.push(ViewOp::Remove(item_id.to_string()));
    }

    fn patch_counters(&self, item_id: &str, patch: &CounterPatch) {
        self.push(ViewOp::Patch(item_id.to_string(), patch.clone()));
    }

    fn expand_comments(&self, item_id: &str, _markup: &str) {
        self.push(ViewOp::Expand(item_id.to_string()));
    }

    fn append_comment(&self, item_id: &str, _markup: &str) {
        self.push(ViewOp::AppendComment(item_id.to_string()));
    }

    fn append_reply(&self, item_id: &str, comment_id: &str, _markup: &str) {
        self.push(ViewOp::AppendReply(item_id.to_string(), comment_id.to_string()));
    }

    fn set_comment_likes(&self, item_id: &str, comment_id: &str, likes: u64) {
        self.push(ViewOp::CommentLikes(item_id.to_string(), comment_id.to_string(), likes));
    }

    fn set_interaction(&self, key: &InteractionKey, state: &InteractionState) {
        self.push(ViewOp::Interaction(key.clone(), *state));
    }

    fn set_total(&self, total: u64) {
        self.push(ViewOp::Total(total));
    }

    fn show_empty(&self, message: &str) {
        self.push(ViewOp::Empty(message.to_string()));
    }

    fn scroll_offset(&self) -> f64 {
        *self.scroll.lock().unwrap()
    }

    fn restore_scroll(&self, offset: f64) {
        self.push(ViewOp::RestoreScroll(offset));
    }
}
