/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Optimistic toggles (like, save, follow).
//!
//! The view flips on the next frame, the request is sent, and the state is
//! reconciled with the server answer. While a request for a key is in flight
//! further toggles only record the latest intent; once the request settles at
//! most one follow-up request brings the server to that intent. A failure
//! restores the last state the server confirmed.

use feedsync_protocol::MutationAck;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::{ApiError, FeedApi, Mutation};
use crate::cache::ResponseCache;
use crate::net_metrics::NetMetrics;
use crate::scheduler::FrameBatcher;
use crate::session::ClientSessionState;
use crate::ui_events::UiEvent;
use crate::view::FeedView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Toggle {
    Like,
    Save,
    Follow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Like,
    Unlike,
    Save,
    Unsave,
    Follow,
    Unfollow,
}

impl EditKind {
    pub fn for_toggle(toggle: Toggle, active: bool) -> Self {
        match (toggle, active) {
            (Toggle::Like, true) => EditKind::Like,
            (Toggle::Like, false) => EditKind::Unlike,
            (Toggle::Save, true) => EditKind::Save,
            (Toggle::Save, false) => EditKind::Unsave,
            (Toggle::Follow, true) => EditKind::Follow,
            (Toggle::Follow, false) => EditKind::Unfollow,
        }
    }

    pub fn toggle(self) -> Toggle {
        match self {
            EditKind::Like | EditKind::Unlike => Toggle::Like,
            EditKind::Save | EditKind::Unsave => Toggle::Save,
            EditKind::Follow | EditKind::Unfollow => Toggle::Follow,
        }
    }

    pub fn activates(self) -> bool {
        matches!(self, EditKind::Like | EditKind::Save | EditKind::Follow)
    }

    pub fn mutation(self, target: &str) -> Mutation {
        let id = target.to_string();
        match self {
            EditKind::Like => Mutation::Like { id },
            EditKind::Unlike => Mutation::Unlike { id },
            EditKind::Save => Mutation::Save { id },
            EditKind::Unsave => Mutation::Unsave { id },
            EditKind::Follow => Mutation::Follow { id },
            EditKind::Unfollow => Mutation::Unfollow { id },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InteractionKey {
    pub toggle: Toggle,
    pub target: String,
}

impl InteractionKey {
    pub fn new(toggle: Toggle, target: &str) -> Self {
        Self { toggle, target: target.to_string() }
    }
}

/// What the control shows: on/off plus the counter next to it, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InteractionState {
    pub active: bool,
    pub count: Option<u64>,
}

impl InteractionState {
    pub fn css_class(&self, toggle: Toggle) -> &'static str {
        match (toggle, self.active) {
            (_, false) => "",
            (Toggle::Like, true) => "liked",
            (Toggle::Save, true) => "saved",
            (Toggle::Follow, true) => "following",
        }
    }

    fn flipped(self, active: bool) -> Self {
        let count = match (self.count, self.active, active) {
            (Some(n), false, true) => Some(n + 1),
            (Some(n), true, false) => Some(n.saturating_sub(1)),
            (c, _, _) => c,
        };
        Self { active, count }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticEdit {
    pub kind: EditKind,
    pub target: String,
    pub previous: InteractionState,
    pub applied: InteractionState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Confirmed(InteractionState),
    /// Folded into a request already in flight for the same key.
    Coalesced,
    RolledBack(ApiError),
    LoginRequired,
}

#[derive(Debug)]
struct PendingChain {
    first: OptimisticEdit,
    desired: bool,
}

#[derive(Debug, Default)]
struct StoreInner {
    states: HashMap<InteractionKey, InteractionState>,
    pending: HashMap<InteractionKey, PendingChain>,
}

/// Displayed interaction state shared between the optimistic layer and the
/// feed engine.
#[derive(Debug, Default)]
pub struct InteractionStore {
    inner: Mutex<StoreInner>,
}

impl InteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &InteractionKey) -> Option<InteractionState> {
        self.inner.lock().unwrap().states.get(key).copied()
    }

    pub fn is_pending(&self, key: &InteractionKey) -> bool {
        self.inner.lock().unwrap().pending.contains_key(key)
    }

    /// The edit that opened the chain currently in flight for `key`.
    pub fn pending_edit(&self, key: &InteractionKey) -> Option<OptimisticEdit> {
        self.inner.lock().unwrap().pending.get(key).map(|p| p.first.clone())
    }

    /// Server-reported counter. Ignored while an edit for the key is pending.
    /// Returns false when the value was ignored.
    pub fn observe_count(&self, key: &InteractionKey, count: u64) -> bool {
        let mut g = self.inner.lock().unwrap();
        if g.pending.contains_key(key) {
            return false;
        }
        g.states.entry(key.clone()).or_default().count = Some(count);
        true
    }
}

pub struct OptimisticLayer {
    api: Arc<dyn FeedApi>,
    view: Arc<dyn FeedView>,
    batcher: FrameBatcher,
    store: Arc<InteractionStore>,
    session: Arc<ClientSessionState>,
    cache: Arc<ResponseCache>,
    invalidate_patterns: Vec<String>,
    ui_events: broadcast::Sender<UiEvent>,
    metrics: Arc<NetMetrics>,
}

impl OptimisticLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn FeedApi>,
        view: Arc<dyn FeedView>,
        batcher: FrameBatcher,
        store: Arc<InteractionStore>,
        session: Arc<ClientSessionState>,
        cache: Arc<ResponseCache>,
        ui_events: broadcast::Sender<UiEvent>,
        metrics: Arc<NetMetrics>,
    ) -> Self {
        Self {
            api,
            view,
            batcher,
            store,
            session,
            cache,
            invalidate_patterns: vec!["/feed".to_string()],
            ui_events,
            metrics,
        }
    }

    pub fn with_invalidate_patterns(mut self, patterns: Vec<String>) -> Self {
        self.invalidate_patterns = patterns;
        self
    }

    pub fn store(&self) -> &Arc<InteractionStore> {
        &self.store
    }

    /// Flips whatever the control currently shows.
    pub async fn toggle(&self, toggle: Toggle, target: &str) -> ApplyOutcome {
        let key = InteractionKey::new(toggle, target);
        let active = match self.store.state(&key) {
            Some(s) => s.active,
            None => self.seed(&key).active,
        };
        self.apply_optimistic(EditKind::for_toggle(toggle, !active), target)
            .await
    }

    pub async fn apply_optimistic(&self, kind: EditKind, target: &str) -> ApplyOutcome {
        if !self.session.is_authenticated() {
            let _ = self.ui_events.send(UiEvent::login_required());
            return ApplyOutcome::LoginRequired;
        }
        let key = InteractionKey::new(kind.toggle(), target);
        let desired = kind.activates();
        let seed = self.seed(&key);

        let (applied, opened) = {
            let mut g = self.store.inner.lock().unwrap();
            let current = g.states.get(&key).copied().unwrap_or(seed);
            let applied = current.flipped(desired);
            g.states.insert(key.clone(), applied);
            let opened = match g.pending.get_mut(&key) {
                Some(chain) => {
                    chain.desired = desired;
                    None
                }
                None => {
                    let first = OptimisticEdit {
                        kind,
                        target: target.to_string(),
                        previous: current,
                        applied,
                    };
                    g.pending.insert(
                        key.clone(),
                        PendingChain { first: first.clone(), desired },
                    );
                    Some(first)
                }
            };
            (applied, opened)
        };
        self.paint(&key, applied);

        match opened {
            Some(edit) => self.drive(key, edit).await,
            None => {
                debug!(target, ?kind, "toggle coalesced into in-flight request");
                ApplyOutcome::Coalesced
            }
        }
    }

    async fn drive(&self, key: InteractionKey, edit: OptimisticEdit) -> ApplyOutcome {
        let mut confirmed = edit.previous;
        let mut sending = edit.kind.activates();
        loop {
            let kind = EditKind::for_toggle(key.toggle, sending);
            match self.api.mutate(&kind.mutation(&key.target)).await {
                Ok(ack) => {
                    confirmed = InteractionState {
                        active: sending,
                        count: server_count(key.toggle, &ack).or(
                            self.store.state(&key).and_then(|s| s.count),
                        ),
                    };
                    let follow_up = {
                        let mut g = self.store.inner.lock().unwrap();
                        let desired = g.pending.get(&key).map(|c| c.desired).unwrap_or(sending);
                        if desired != sending {
                            Some(desired)
                        } else {
                            g.pending.remove(&key);
                            g.states.insert(key.clone(), confirmed);
                            None
                        }
                    };
                    match follow_up {
                        Some(next) => sending = next,
                        None => {
                            self.settled(&key, confirmed);
                            return ApplyOutcome::Confirmed(confirmed);
                        }
                    }
                }
                Err(e) => {
                    {
                        let mut g = self.store.inner.lock().unwrap();
                        g.pending.remove(&key);
                        g.states.insert(key.clone(), confirmed);
                    }
                    self.paint(&key, confirmed);
                    self.metrics.optimistic_rollback();
                    warn!(target = %key.target, toggle = ?key.toggle, error = %e, "optimistic edit rolled back");
                    let _ = self
                        .ui_events
                        .send(UiEvent::toast_error(e.user_message(), Some(key.target.clone())));
                    return ApplyOutcome::RolledBack(e);
                }
            }
        }
    }

    fn settled(&self, key: &InteractionKey, state: InteractionState) {
        self.paint(key, state);
        for p in &self.invalidate_patterns {
            self.cache.invalidate(p);
        }
        let persisted = match key.toggle {
            Toggle::Save => self.session.set_saved(&key.target, state.active),
            Toggle::Follow => self.session.set_following(&key.target, state.active),
            Toggle::Like => Ok(()),
        };
        if let Err(e) = persisted {
            warn!(target = %key.target, "persist interaction failed: {e:#}");
        }
    }

    fn seed(&self, key: &InteractionKey) -> InteractionState {
        let active = match key.toggle {
            Toggle::Like => false,
            Toggle::Save => self.session.is_saved(&key.target),
            Toggle::Follow => self.session.is_following(&key.target),
        };
        InteractionState { active, count: None }
    }

    fn paint(&self, key: &InteractionKey, state: InteractionState) {
        let view = self.view.clone();
        let key = key.clone();
        self.batcher.schedule(move || view.set_interaction(&key, &state));
    }
}

fn server_count(toggle: Toggle, ack: &MutationAck) -> Option<u64> {
    match toggle {
        Toggle::Like => ack.likes,
        Toggle::Follow => ack.followers,
        Toggle::Save => None,
    }
}
