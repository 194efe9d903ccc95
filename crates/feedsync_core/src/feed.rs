/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Feed reconciliation.
//!
//! Every request takes a fresh generation number before it suspends; a
//! response is applied only if its generation is still the latest, so a slow
//! page can never overwrite newer state. A head read whose id sequence equals
//! the rendered head only patches counters in place. Any membership or order
//! change rebuilds the list.

use feedsync_protocol::{Comment, FeedItem, FeedPage, PushEvent};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::{ApiError, FeedApi, Mutation};
use crate::cache::ResponseCache;
use crate::net_metrics::NetMetrics;
use crate::optimistic::{InteractionKey, InteractionStore, Toggle};
use crate::present::{likes_text, view_all_text, ItemFlags, Presenter};
use crate::session::ClientSessionState;
use crate::ui_events::{UiEvent, KIND_FEED_UPDATED, KIND_MESSAGE, KIND_NOTIFICATION};
use crate::view::{CounterPatch, FeedView, ViewState};

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub page_size: u32,
    pub fallback_limit: u32,
    pub empty_message: String,
    /// Scroll offsets above this are restored after a rebuild.
    pub scroll_restore_threshold: f64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            fallback_limit: 20,
            empty_message: "Waiting for new posts...".to_string(),
            scroll_restore_threshold: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Rebuilt { items: usize },
    Patched { changed: usize },
    Appended { items: usize },
    /// First load failed; the fallback source was rendered.
    Fallback { items: usize },
    Empty,
    /// Request failed or came back empty; the rendered state was kept.
    Retained,
    /// A newer request superseded this one.
    Stale,
    /// Guard refused to start a request.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub ids: Vec<String>,
    pub offset: u64,
    pub total: u64,
    pub generation: u64,
    pub built: bool,
    pub loading: bool,
}

#[derive(Debug, Default)]
struct FeedState {
    sequence: Vec<String>,
    /// Length of the prefix of `sequence` that came from the last head read.
    head_len: usize,
    items: HashMap<String, FeedItem>,
    total: u64,
    offset: u64,
    /// Generation of the request holding the loading guard.
    loading: Option<u64>,
    built: bool,
    generation: u64,
    expanded: HashSet<String>,
}

impl FeedState {
    fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.loading = Some(self.generation);
        self.generation
    }

    fn is_current(&self, gen: u64) -> bool {
        self.generation == gen
    }

    fn forget_items(&mut self) {
        self.sequence.clear();
        self.head_len = 0;
        self.items.clear();
        self.expanded.clear();
        self.offset = 0;
    }

    fn finish(&mut self, gen: u64) {
        if self.loading == Some(gen) {
            self.loading = None;
        }
    }
}

pub struct FeedEngine {
    api: Arc<dyn FeedApi>,
    view: Arc<dyn FeedView>,
    presenter: Presenter,
    session: Arc<ClientSessionState>,
    interactions: Arc<InteractionStore>,
    cache: Option<Arc<ResponseCache>>,
    invalidate_patterns: Vec<String>,
    ui_events: Option<broadcast::Sender<UiEvent>>,
    metrics: Arc<NetMetrics>,
    settings: FeedSettings,
    state: Mutex<FeedState>,
}

impl FeedEngine {
    pub fn new(
        api: Arc<dyn FeedApi>,
        view: Arc<dyn FeedView>,
        session: Arc<ClientSessionState>,
        interactions: Arc<InteractionStore>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            api,
            view,
            presenter: Presenter::default(),
            session,
            interactions,
            cache: None,
            invalidate_patterns: vec!["/feed".to_string()],
            ui_events: None,
            metrics: Arc::new(NetMetrics::new()),
            settings,
            state: Mutex::new(FeedState::default()),
        }
    }

    pub fn with_presenter(mut self, presenter: Presenter) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>, patterns: Vec<String>) -> Self {
        self.cache = Some(cache);
        self.invalidate_patterns = patterns;
        self
    }

    pub fn with_ui_events(mut self, tx: broadcast::Sender<UiEvent>) -> Self {
        self.ui_events = Some(tx);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<NetMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn is_loading(&self) -> bool {
        self.state.lock().unwrap().loading.is_some()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        let st = self.state.lock().unwrap();
        FeedSnapshot {
            ids: st.sequence.clone(),
            offset: st.offset,
            total: st.total,
            generation: st.generation,
            built: st.built,
            loading: st.loading.is_some(),
        }
    }

    pub fn item(&self, id: &str) -> Option<FeedItem> {
        self.state.lock().unwrap().items.get(id).cloned()
    }

    /// Reads the head of the feed. Always proceeds and supersedes any request
    /// in flight.
    pub async fn load_initial(&self, limit: u32) -> LoadOutcome {
        let gen = self.state.lock().unwrap().begin();
        debug!(gen, limit, "feed head read");
        match self.api.fetch_feed(limit, None).await {
            Ok(page) => self.apply_head(gen, page),
            Err(e) => self.head_failed(gen, e).await,
        }
    }

    /// Reads the next page. No-op while loading or once everything is loaded.
    pub async fn load_more(&self, limit: u32) -> LoadOutcome {
        let (gen, offset) = {
            let mut st = self.state.lock().unwrap();
            if st.loading.is_some() || !st.built || st.offset >= st.total {
                return LoadOutcome::Skipped;
            }
            (st.begin(), st.offset)
        };
        debug!(gen, offset, limit, "feed page read");
        let res = self.api.fetch_feed(limit, Some(offset)).await;

        let mut st = self.state.lock().unwrap();
        if !st.is_current(gen) {
            return self.discard(gen);
        }
        st.finish(gen);
        let page = match res {
            Ok(p) => p,
            Err(e) => {
                debug!(offset, error = %e, "load more failed");
                return LoadOutcome::Retained;
            }
        };
        if let Some(t) = page.total {
            st.total = t;
        }
        let items = dedup(page.merged());
        if items.is_empty() {
            st.offset = st.offset.max(st.total);
            return LoadOutcome::Appended { items: 0 };
        }
        st.offset += items.len() as u64;

        let fresh: Vec<FeedItem> = items
            .into_iter()
            .filter(|i| !st.items.contains_key(&i.id))
            .collect();
        let fragments: Vec<_> = fresh
            .iter()
            .map(|i| self.presenter.item(i, self.flags(i)))
            .collect();
        for item in fresh {
            self.observe(&item);
            st.sequence.push(item.id.clone());
            st.items.insert(item.id.clone(), item);
        }
        if !fragments.is_empty() {
            self.view.append(&fragments);
        }
        self.view.set_total(st.total);
        self.metrics.feed_append(fragments.len() as u64);
        LoadOutcome::Appended { items: fragments.len() }
    }

    /// Periodic reconcile. Skipped while hidden, off the feed tab or loading.
    pub async fn refresh_tick(&self, view: ViewState) -> LoadOutcome {
        if !view.feed_active() || self.is_loading() {
            return LoadOutcome::Skipped;
        }
        self.load_initial(self.settings.page_size).await
    }

    fn apply_head(&self, gen: u64, page: FeedPage) -> LoadOutcome {
        let mut st = self.state.lock().unwrap();
        if !st.is_current(gen) {
            return self.discard(gen);
        }
        st.finish(gen);
        let items = dedup(page.merged());
        let total = page.total.unwrap_or(items.len() as u64);

        if items.is_empty() {
            if st.built {
                debug!("empty head read, keeping rendered feed");
                return LoadOutcome::Retained;
            }
            st.forget_items();
            st.total = total;
            self.view.show_empty(&self.settings.empty_message);
            return LoadOutcome::Empty;
        }

        let same_head = st.built
            && st.sequence[..st.head_len]
                .iter()
                .map(String::as_str)
                .eq(items.iter().map(|i| i.id.as_str()));
        if same_head {
            self.patch(&mut st, items, total)
        } else {
            self.rebuild(&mut st, items, total)
        }
    }

    async fn head_failed(&self, gen: u64, err: ApiError) -> LoadOutcome {
        {
            let mut st = self.state.lock().unwrap();
            if !st.is_current(gen) {
                return self.discard(gen);
            }
            if st.built {
                st.finish(gen);
                warn!(error = %err, "feed refresh failed, keeping rendered feed");
                return LoadOutcome::Retained;
            }
        }
        warn!(error = %err, "first feed load failed, trying fallback");
        let res = self.api.fetch_fallback(self.settings.fallback_limit).await;

        let mut st = self.state.lock().unwrap();
        if !st.is_current(gen) {
            return self.discard(gen);
        }
        st.finish(gen);
        let items = match res {
            Ok(page) => dedup(page.merged()),
            Err(e) => {
                warn!(error = %e, "fallback feed failed");
                Vec::new()
            }
        };
        if items.is_empty() {
            st.forget_items();
            self.view.show_empty(&self.settings.empty_message);
            return LoadOutcome::Empty;
        }
        let fragments: Vec<_> = items
            .iter()
            .map(|i| self.presenter.item(i, self.flags(i)))
            .collect();

        // Tracked for actions but not `built`; the next good head read rebuilds.
        st.forget_items();
        st.sequence = items.iter().map(|i| i.id.clone()).collect();
        st.head_len = st.sequence.len();
        st.total = st.sequence.len() as u64;
        st.offset = st.total;
        for item in items {
            self.observe(&item);
            st.items.insert(item.id.clone(), item);
        }

        self.view.rebuild(&fragments);
        info!(items = fragments.len(), "rendered fallback feed");
        LoadOutcome::Fallback { items: fragments.len() }
    }

    fn rebuild(&self, st: &mut FeedState, items: Vec<FeedItem>, total: u64) -> LoadOutcome {
        let scroll = self.view.scroll_offset();
        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let fragments: Vec<_> = items
            .iter()
            .map(|i| self.presenter.item(i, self.flags(i)))
            .collect();

        st.items = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        st.head_len = ids.len();
        st.offset = ids.len() as u64;
        st.sequence = ids;
        st.total = total;
        st.built = true;
        let items = &st.items;
        st.expanded.retain(|id| items.contains_key(id));

        self.view.rebuild(&fragments);
        self.view.set_total(total);
        for id in &st.sequence {
            if st.expanded.contains(id) {
                if let Some(item) = st.items.get(id) {
                    self.view.expand_comments(id, &self.presenter.comment_thread(item));
                }
            }
        }
        if scroll > self.settings.scroll_restore_threshold {
            self.view.restore_scroll(scroll);
        }
        for item in st.items.values() {
            self.observe(item);
        }

        self.metrics.feed_rebuild();
        self.emit(UiEvent::new(KIND_FEED_UPDATED, None, None));
        info!(
            items = st.sequence.len(),
            total,
            fingerprint = %fingerprint(&st.sequence),
            "feed rebuilt"
        );
        LoadOutcome::Rebuilt { items: st.sequence.len() }
    }

    fn patch(&self, st: &mut FeedState, items: Vec<FeedItem>, total: u64) -> LoadOutcome {
        let mut changed = 0;
        for item in items {
            let like_key = InteractionKey::new(Toggle::Like, &item.id);
            let like_pending = self.interactions.is_pending(&like_key);
            let prev = st.items.get(&item.id);
            let likes_changed = !like_pending
                && prev.map_or(true, |p| p.like_count() != item.like_count());
            let comments_changed = prev.map_or(true, |p| {
                p.comments != item.comments || p.total_comments() != item.total_comments()
            });

            let mut patch = CounterPatch::default();
            if likes_changed {
                patch.likes = Some(item.like_count());
                patch.likes_text = Some(likes_text(item.like_count()));
            }
            if comments_changed && !st.expanded.contains(&item.id) {
                patch.comment_count = Some(item.total_comments());
                patch.view_all_text = Some(view_all_text(item.total_comments()));
                patch.comments_markup = Some(self.presenter.comment_preview(&item));
            }
            if !patch.is_empty() {
                self.view.patch_counters(&item.id, &patch);
                changed += 1;
            }
            self.observe(&item);
            st.items.insert(item.id.clone(), item);
        }
        if st.total != total {
            st.total = total;
            self.view.set_total(total);
        }
        self.metrics.feed_patch(changed as u64);
        debug!(changed, "feed patched in place");
        LoadOutcome::Patched { changed }
    }

    fn discard(&self, gen: u64) -> LoadOutcome {
        self.metrics.stale_discard();
        debug!(gen, "stale feed response discarded");
        LoadOutcome::Stale
    }

    fn flags(&self, item: &FeedItem) -> ItemFlags {
        let key = InteractionKey::new(Toggle::Like, &item.id);
        let like = self.interactions.state(&key);
        let pending = self.interactions.is_pending(&key);
        ItemFlags {
            liked: like.map_or(false, |s| s.active),
            likes: like.filter(|_| pending).and_then(|s| s.count),
            saved: self.session.is_saved(&item.id),
            following_author: item
                .author_id
                .as_deref()
                .map_or(false, |a| self.session.is_following(a)),
        }
    }

    fn observe(&self, item: &FeedItem) {
        self.interactions
            .observe_count(&InteractionKey::new(Toggle::Like, &item.id), item.like_count());
    }

    fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            for p in &self.invalidate_patterns {
                cache.invalidate(p);
            }
        }
    }

    fn emit(&self, ev: UiEvent) {
        if let Some(tx) = &self.ui_events {
            let _ = tx.send(ev);
        }
    }

    fn require_login(&self) -> Result<(), ApiError> {
        if self.session.is_authenticated() {
            Ok(())
        } else {
            self.emit(UiEvent::login_required());
            Err(ApiError::Unauthenticated)
        }
    }

    fn report(&self, target: &str, err: &ApiError) {
        warn!(target, error = %err, "feed action failed");
        self.emit(UiEvent::toast_error(err.user_message(), Some(target.to_string())));
    }

    /// Shows the full comment thread of a rendered item.
    pub fn expand_comments(&self, item_id: &str) -> bool {
        let mut st = self.state.lock().unwrap();
        let Some(item) = st.items.get(item_id) else {
            return false;
        };
        let markup = self.presenter.comment_thread(item);
        st.expanded.insert(item_id.to_string());
        self.view.expand_comments(item_id, &markup);
        true
    }

    pub async fn add_comment(&self, item_id: &str, text: &str) -> Result<(), ApiError> {
        self.require_login()?;
        let m = Mutation::Comment {
            item_id: item_id.to_string(),
            text: text.to_string(),
        };
        let ack = match self.api.mutate(&m).await {
            Ok(a) => a,
            Err(e) => {
                self.report(item_id, &e);
                return Err(e);
            }
        };
        self.invalidate();
        let comment = ack.comment.unwrap_or_else(|| Comment {
            text: text.to_string(),
            ..Comment::default()
        });
        self.append_comment(item_id, comment);
        Ok(())
    }

    /// Appends a created comment to a rendered item.
    pub fn append_comment(&self, item_id: &str, comment: Comment) -> bool {
        let mut st = self.state.lock().unwrap();
        let Some(item) = st.items.get_mut(item_id) else {
            return false;
        };
        let (markup, _) = self.presenter.comment(item_id, &comment);
        item.comments.push(comment);
        if let Some(n) = item.comment_count.as_mut() {
            *n += 1;
        }
        let count = item.total_comments();
        self.view.append_comment(item_id, &markup);
        self.view.patch_counters(
            item_id,
            &CounterPatch {
                comment_count: Some(count),
                view_all_text: Some(view_all_text(count)),
                ..CounterPatch::default()
            },
        );
        true
    }

    pub async fn add_reply(&self, item_id: &str, comment_id: &str, text: &str) -> Result<(), ApiError> {
        self.require_login()?;
        let m = Mutation::Reply {
            item_id: item_id.to_string(),
            comment_id: comment_id.to_string(),
            text: text.to_string(),
        };
        let ack = match self.api.mutate(&m).await {
            Ok(a) => a,
            Err(e) => {
                self.report(item_id, &e);
                return Err(e);
            }
        };
        self.invalidate();
        let reply = ack.reply.unwrap_or_else(|| feedsync_protocol::Reply {
            text: text.to_string(),
            ..Default::default()
        });

        let mut st = self.state.lock().unwrap();
        if let Some(c) = st
            .items
            .get_mut(item_id)
            .and_then(|i| i.comments.iter_mut().find(|c| c.id == comment_id))
        {
            let markup = self.presenter.reply(&reply);
            c.replies.push(reply);
            self.view.append_reply(item_id, comment_id, &markup);
        }
        Ok(())
    }

    pub async fn like_comment(&self, item_id: &str, comment_id: &str) -> Result<(), ApiError> {
        self.require_login()?;
        let m = Mutation::LikeComment {
            item_id: item_id.to_string(),
            comment_id: comment_id.to_string(),
        };
        let ack = match self.api.mutate(&m).await {
            Ok(a) => a,
            Err(e) => {
                self.report(item_id, &e);
                return Err(e);
            }
        };
        let mut st = self.state.lock().unwrap();
        if let Some(c) = st
            .items
            .get_mut(item_id)
            .and_then(|i| i.comments.iter_mut().find(|c| c.id == comment_id))
        {
            c.like_count = ack.likes.unwrap_or(c.like_count + 1);
            self.view.set_comment_likes(item_id, comment_id, c.like_count);
        }
        Ok(())
    }

    /// Deletes an item server side and drops it from the rendered list.
    pub async fn remove_item(&self, item_id: &str) -> Result<(), ApiError> {
        self.require_login()?;
        let m = Mutation::Delete { id: item_id.to_string() };
        if let Err(e) = self.api.mutate(&m).await {
            self.report(item_id, &e);
            return Err(e);
        }
        self.invalidate();

        let mut st = self.state.lock().unwrap();
        if let Some(pos) = st.sequence.iter().position(|id| id == item_id) {
            st.sequence.remove(pos);
            if pos < st.head_len {
                st.head_len -= 1;
            }
            st.total = st.total.saturating_sub(1);
        }
        st.items.remove(item_id);
        st.expanded.remove(item_id);
        self.view.remove(item_id);
        self.view.set_total(st.total);
        info!(item_id, "feed item removed");
        Ok(())
    }

    /// Applies a push event. Counter updates only touch items already
    /// rendered. Returns true when the view was patched.
    pub fn apply_push(&self, event: &PushEvent) -> bool {
        match event {
            PushEvent::Message(m) => {
                let who = m.sender_name.as_deref().unwrap_or("someone");
                self.emit(UiEvent::new(
                    KIND_MESSAGE,
                    Some(format!("{who}: {}", truncate(&m.content, 60))),
                    m.sender_id.clone(),
                ));
                false
            }
            PushEvent::Notification(n) => {
                let who = n.from_name.as_deref().unwrap_or("someone");
                self.emit(UiEvent::new(
                    KIND_NOTIFICATION,
                    Some(format!("{who} {}", truncate(&n.text, 60))),
                    n.item_id.clone(),
                ));
                let Some(item_id) = n.item_id.as_deref() else {
                    return false;
                };
                if n.likes.is_none() && n.comment_count.is_none() {
                    return false;
                }
                let mut st = self.state.lock().unwrap();
                let Some(item) = st.items.get_mut(item_id) else {
                    return false;
                };
                let like_key = InteractionKey::new(Toggle::Like, item_id);
                let mut patch = CounterPatch::default();
                if let Some(likes) = n.likes {
                    item.likes = likes;
                    item.upvotes = None;
                    item.downvotes = None;
                    if self.interactions.observe_count(&like_key, likes) {
                        patch.likes = Some(likes);
                        patch.likes_text = Some(likes_text(likes));
                    }
                }
                if let Some(c) = n.comment_count {
                    item.comment_count = Some(c);
                    patch.comment_count = Some(c);
                    patch.view_all_text = Some(view_all_text(c));
                }
                if patch.is_empty() {
                    debug!(item_id, "push counters held back by pending like");
                    return false;
                }
                self.view.patch_counters(item_id, &patch);
                true
            }
            PushEvent::Unknown => false,
        }
    }
}

/// Periodic reconcile loop. Ticks are skipped while the feed is not shown or
/// a load is running.
pub fn start_refresh_worker(
    engine: Arc<FeedEngine>,
    interval: Duration,
    view_state: watch::Receiver<ViewState>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately; the initial load is done by the caller.
        tick.tick().await;
        loop {
            tokio::select! {
                r = shutdown.changed() => {
                    if r.is_err() || *shutdown.borrow() { break; }
                }
                _ = tick.tick() => {
                    let state = *view_state.borrow();
                    let out = engine.refresh_tick(state).await;
                    debug!(?out, "periodic refresh");
                }
            }
        }
    });
}

fn dedup(items: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.id.clone())).collect()
}

fn fingerprint(ids: &[String]) -> String {
    let mut h = Sha256::new();
    for id in ids {
        h.update(id.as_bytes());
        h.update([0u8]);
    }
    hex::encode(&h.finalize()[..8])
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimistic::{ApplyOutcome, InteractionState, OptimisticLayer};
    use crate::scheduler::FrameBatcher;
    use crate::testing::{item, page, RecordingView, StubApi, ViewOp};
    use feedsync_protocol::{MutationAck, PushNotification};

    struct Fixture {
        api: Arc<StubApi>,
        view: Arc<RecordingView>,
        engine: Arc<FeedEngine>,
        session: Arc<ClientSessionState>,
        interactions: Arc<InteractionStore>,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(StubApi::default());
        let view = Arc::new(RecordingView::default());
        let session = Arc::new(ClientSessionState::in_memory());
        session.set_token(Some("tok".into())).unwrap();
        let interactions = Arc::new(InteractionStore::new());
        let engine = Arc::new(FeedEngine::new(
            api.clone(),
            view.clone(),
            session.clone(),
            interactions.clone(),
            FeedSettings::default(),
        ));
        Fixture { api, view, engine, session, interactions }
    }

    /// Optimistic layer sharing the fixture's backend, view and interaction store.
    fn optimistic(f: &Fixture) -> OptimisticLayer {
        let (tx, _) = broadcast::channel(8);
        OptimisticLayer::new(
            f.api.clone(),
            f.view.clone(),
            FrameBatcher::default(),
            f.interactions.clone(),
            f.session.clone(),
            Arc::new(ResponseCache::new()),
            tx,
            Arc::new(NetMetrics::new()),
        )
    }

    fn like_ack(likes: u64) -> Result<MutationAck, ApiError> {
        Ok(MutationAck { likes: Some(likes), ..Default::default() })
    }

    fn pushed_likes(item_id: &str, likes: u64) -> PushEvent {
        PushEvent::Notification(PushNotification {
            item_id: Some(item_id.into()),
            likes: Some(likes),
            ..Default::default()
        })
    }

    const NOW: Duration = Duration::ZERO;

    #[tokio::test(start_paused = true)]
    async fn identical_head_reads_are_idempotent() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 1), ("b", 2)], Some(2))));
        f.api.push_feed(NOW, Ok(page(&[("a", 1), ("b", 2)], Some(2))));

        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Rebuilt { items: 2 });
        let after_first = f.engine.snapshot();
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Patched { changed: 0 });

        assert_eq!(f.view.rebuild_count(), 1);
        assert!(f.view.patches().is_empty());
        let after_second = f.engine.snapshot();
        assert_eq!(after_first.ids, after_second.ids);
        assert_eq!(after_first.offset, after_second.offset);
        assert_eq!(after_first.total, after_second.total);
    }

    #[tokio::test(start_paused = true)]
    async fn membership_change_rebuilds() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0), ("b", 0), ("c", 0)], None)));
        f.api.push_feed(NOW, Ok(page(&[("a", 0), ("b", 0), ("c", 0), ("d", 0)], None)));

        f.engine.load_initial(50).await;
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Rebuilt { items: 4 });
        assert_eq!(f.view.rebuild_count(), 2);
        assert_eq!(f.engine.snapshot().ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reorder_rebuilds() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0), ("b", 0)], None)));
        f.api.push_feed(NOW, Ok(page(&[("b", 0), ("a", 0)], None)));
        f.engine.load_initial(50).await;
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Rebuilt { items: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn counter_change_patches_only_changed_item() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 5), ("b", 1)], Some(2))));
        f.api.push_feed(NOW, Ok(page(&[("a", 6), ("b", 1)], Some(2))));

        f.engine.load_initial(50).await;
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Patched { changed: 1 });

        let patches = f.view.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "a");
        assert_eq!(patches[0].1.likes, Some(6));
        assert_eq!(patches[0].1.likes_text.as_deref(), Some("6 likes"));
        assert_eq!(patches[0].1.comments_markup, None);
        assert_eq!(f.view.rebuild_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_is_guarded_and_monotonic() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0), ("b", 0)], Some(10))));
        f.api.push_feed(Duration::from_millis(50), Ok(page(&[("c", 0), ("d", 0)], Some(10))));
        f.engine.load_initial(2).await;

        let (r1, r2, r3) = tokio::join!(
            f.engine.load_more(2),
            f.engine.load_more(2),
            f.engine.load_more(2)
        );
        assert_eq!(r1, LoadOutcome::Appended { items: 2 });
        assert_eq!(r2, LoadOutcome::Skipped);
        assert_eq!(r3, LoadOutcome::Skipped);
        assert_eq!(f.api.feed_calls(), vec![(2, None), (2, Some(2))]);

        let snap = f.engine.snapshot();
        assert_eq!(snap.offset, 4);
        assert_eq!(snap.ids, vec!["a", "b", "c", "d"]);
        assert!(!snap.loading);
        assert_eq!(f.view.appended(), vec![vec!["c".to_string(), "d".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_completes_pagination() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0)], Some(5))));
        f.api.push_feed(NOW, Ok(page(&[], None)));
        f.engine.load_initial(1).await;
        assert_eq!(f.engine.load_more(1).await, LoadOutcome::Appended { items: 0 });
        assert_eq!(f.engine.snapshot().offset, 5);
        assert_eq!(f.engine.load_more(1).await, LoadOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_page_is_discarded() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0), ("b", 0)], Some(100))));
        f.engine.load_initial(50).await;

        // load_more is slow, the head read issued after it is fast.
        f.api.push_feed(Duration::from_millis(100), Ok(page(&[("old1", 0), ("old2", 0)], Some(100))));
        f.api.push_feed(Duration::from_millis(10), Ok(page(&[("x", 0), ("a", 0), ("b", 0)], Some(100))));

        let (more, head) = tokio::join!(f.engine.load_more(50), f.engine.load_initial(50));
        assert_eq!(more, LoadOutcome::Stale);
        assert_eq!(head, LoadOutcome::Rebuilt { items: 3 });

        let snap = f.engine.snapshot();
        assert_eq!(snap.ids, vec!["x", "a", "b"]);
        assert_eq!(snap.offset, 3);
        assert_eq!(snap.generation, 3);
        assert!(!snap.loading);
        assert!(f.view.appended().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_item_feed_never_paginates() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("p1", 3)], Some(1))));
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Rebuilt { items: 1 });
        let snap = f.engine.snapshot();
        assert_eq!((snap.offset, snap.total), (1, 1));
        assert_eq!(f.engine.load_more(50).await, LoadOutcome::Skipped);
        assert_eq!(f.api.feed_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_uses_fallback_then_empty_state() {
        let f = fixture();
        f.api.push_feed(NOW, Err(ApiError::Timeout));
        f.api.push_fallback(NOW, Ok(page(&[("f1", 0)], None)));
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Fallback { items: 1 });
        assert!(!f.engine.snapshot().built);

        f.api.push_feed(NOW, Err(ApiError::Timeout));
        f.api.push_fallback(NOW, Err(ApiError::Timeout));
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Empty);
        assert!(f.view.ops().iter().any(|op| matches!(op, ViewOp::Empty(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_items_accept_actions_until_next_head_read() {
        let f = fixture();
        f.api.push_feed(NOW, Err(ApiError::Timeout));
        let mut fallback = page(&[("f1", 0), ("f2", 0)], Some(40));
        fallback.items[0].comments =
            vec![Comment { id: "c1".into(), text: "hi".into(), ..Default::default() }];
        f.api.push_fallback(NOW, Ok(fallback));
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Fallback { items: 2 });

        let snap = f.engine.snapshot();
        assert_eq!(snap.ids, vec!["f1", "f2"]);
        assert!(!snap.built);
        assert_eq!(snap.offset, snap.total);
        assert_eq!(f.engine.load_more(50).await, LoadOutcome::Skipped);

        f.api.push_mutation(NOW, Ok(MutationAck::default()));
        f.engine.add_comment("f1", "nice").await.unwrap();
        assert!(f.view.ops().contains(&ViewOp::AppendComment("f1".into())));
        assert_eq!(f.engine.item("f1").unwrap().comments.len(), 2);
        assert!(f.engine.expand_comments("f1"));

        f.api.push_feed(NOW, Ok(page(&[("f1", 0), ("f2", 0)], None)));
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Rebuilt { items: 2 });
        assert!(f.engine.snapshot().built);
    }

    #[tokio::test(start_paused = true)]
    async fn later_failures_and_empty_reads_keep_rendered_feed() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0)], None)));
        f.api.push_feed(NOW, Err(ApiError::Status { status: 502, detail: String::new() }));
        f.api.push_feed(NOW, Ok(page(&[], Some(0))));
        f.engine.load_initial(50).await;
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Retained);
        assert_eq!(f.engine.load_initial(50).await, LoadOutcome::Retained);
        assert_eq!(f.engine.snapshot().ids, vec!["a"]);
        assert_eq!(f.api.fallback_calls(), 0);
        assert_eq!(f.view.rebuild_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_restores_scroll_and_expanded_comments() {
        let f = fixture();
        let mut first = page(&[("a", 0), ("b", 0)], None);
        first.items[0].comments = vec![Comment { id: "c1".into(), text: "hi".into(), ..Default::default() }];
        f.api.push_feed(NOW, Ok(first.clone()));
        first.items.insert(0, item("z", 0));
        f.api.push_feed(NOW, Ok(first));

        f.engine.load_initial(50).await;
        assert!(f.engine.expand_comments("a"));
        f.view.set_scroll(640.0);
        f.engine.load_initial(50).await;

        let ops = f.view.ops();
        let expands = ops.iter().filter(|op| matches!(op, ViewOp::Expand(id) if id == "a")).count();
        assert_eq!(expands, 2);
        assert!(ops.contains(&ViewOp::RestoreScroll(640.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_tick_respects_view_state_and_loading() {
        let f = fixture();
        let hidden = ViewState { visible: false, ..ViewState::default() };
        assert_eq!(f.engine.refresh_tick(hidden).await, LoadOutcome::Skipped);
        assert!(f.api.feed_calls().is_empty());

        f.api.push_feed(NOW, Ok(page(&[("a", 0)], None)));
        assert_eq!(f.engine.refresh_tick(ViewState::default()).await, LoadOutcome::Rebuilt { items: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn push_patches_rendered_items_only() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 1)], None)));
        f.engine.load_initial(50).await;
        let gen = f.engine.snapshot().generation;

        let hit = PushEvent::Notification(PushNotification {
            item_id: Some("a".into()),
            likes: Some(7),
            text: "liked your post".into(),
            ..Default::default()
        });
        let miss = PushEvent::Notification(PushNotification {
            item_id: Some("zz".into()),
            likes: Some(7),
            ..Default::default()
        });
        assert!(f.engine.apply_push(&hit));
        assert!(!f.engine.apply_push(&miss));
        assert!(!f.engine.apply_push(&PushEvent::Unknown));

        assert_eq!(f.engine.item("a").unwrap().like_count(), 7);
        assert_eq!(f.engine.snapshot().generation, gen);
        assert_eq!(f.view.patches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn push_holds_like_counter_while_like_is_pending() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 5)], None)));
        f.engine.load_initial(50).await;
        let layer = optimistic(&f);
        f.api.push_mutation(Duration::from_millis(100), like_ack(6));

        let (outcome, patched) = tokio::join!(layer.toggle(Toggle::Like, "a"), async {
            f.engine.apply_push(&pushed_likes("a", 5))
        });
        assert!(!patched);
        assert_eq!(
            outcome,
            ApplyOutcome::Confirmed(InteractionState { active: true, count: Some(6) })
        );
        assert!(f.view.patches().iter().all(|(_, p)| p.likes.is_none()));

        assert!(f.engine.apply_push(&pushed_likes("a", 8)));
        assert_eq!(f.view.patches().last().unwrap().1.likes, Some(8));
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_keeps_optimistic_like_count() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 5)], None)));
        f.engine.load_initial(50).await;
        let layer = optimistic(&f);
        f.api.push_mutation(Duration::from_millis(100), like_ack(6));
        f.api.push_feed(NOW, Ok(page(&[("z", 0), ("a", 5)], None)));

        let (_, out) = tokio::join!(layer.toggle(Toggle::Like, "a"), f.engine.load_initial(50));
        assert_eq!(out, LoadOutcome::Rebuilt { items: 2 });
        let markup = f.view.markup("a").unwrap();
        assert!(markup.contains("6 likes"));
        assert!(markup.contains("item-act like liked"));
    }

    #[tokio::test(start_paused = true)]
    async fn comments_and_removal_update_view() {
        let f = fixture();
        f.api.push_feed(NOW, Ok(page(&[("a", 0), ("b", 0)], Some(2))));
        f.engine.load_initial(50).await;

        f.api.push_mutation(
            NOW,
            Ok(MutationAck {
                comment: Some(Comment { id: "c1".into(), text: "nice".into(), ..Default::default() }),
                ..Default::default()
            }),
        );
        f.engine.add_comment("a", "nice").await.unwrap();
        assert_eq!(f.engine.item("a").unwrap().comments.len(), 1);

        f.api.push_mutation(NOW, Ok(MutationAck::default()));
        f.engine.add_reply("a", "c1", "thanks").await.unwrap();
        assert_eq!(f.engine.item("a").unwrap().comments[0].replies[0].text, "thanks");
        assert!(f.view.ops().contains(&ViewOp::AppendReply("a".into(), "c1".into())));
        assert_eq!(
            f.view.ops().iter().filter(|op| matches!(op, ViewOp::AppendComment(_))).count(),
            1
        );

        f.api.push_mutation(NOW, Ok(MutationAck::default()));
        f.engine.remove_item("b").await.unwrap();
        let snap = f.engine.snapshot();
        assert_eq!(snap.ids, vec!["a"]);
        assert_eq!(snap.total, 1);
        assert!(f.view.ops().contains(&ViewOp::Remove("b".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn interactive_writes_require_login() {
        let f = fixture();
        f.session.set_token(None).unwrap();
        assert_eq!(f.engine.add_comment("a", "x").await, Err(ApiError::Unauthenticated));
        assert!(f.api.mutations().is_empty());
    }

    #[test]
    fn fingerprint_depends_on_order() {
        let ab = fingerprint(&["a".into(), "b".into()]);
        let ba = fingerprint(&["b".into(), "a".into()]);
        assert_eq!(ab.len(), 16);
        assert_ne!(ab, ba);
    }
}
