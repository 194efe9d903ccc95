/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use feedsync_protocol::PushEvent;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::actions::{default_table, ActionArgs, ActionTable};
use crate::api::FeedApi;
use crate::cache::ResponseCache;
use crate::feed::{start_refresh_worker, FeedEngine, FeedSettings};
use crate::http_api::{ApiRoutes, HttpFeedApi};
use crate::net_metrics::NetMetrics;
use crate::notifications::{start_notification_worker, NotificationCenter};
use crate::optimistic::{InteractionStore, OptimisticLayer};
use crate::present::Presenter;
use crate::push::{start_push_worker, ConnectionState, ReconnectPolicy};
use crate::scheduler::{Debouncer, FrameBatcher, Throttle, DEFAULT_FRAME};
use crate::session::{default_data_dir, ClientSessionState};
use crate::ui_events::UiEvent;
use crate::view::{FeedView, ScrollPosition, ViewState};

/// Start-up configuration. Every field but the API base is optional.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// `instagram`, `social` or `reddit`; ignored when `routes` is set.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub routes: Option<ApiRoutes>,
    /// Push socket URL without the token, e.g. `wss://host/ws/chat`.
    #[serde(default)]
    pub push_ws_url: Option<String>,
    #[serde(default)]
    pub media_base_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub fallback_limit: Option<u32>,
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    #[serde(default)]
    pub notification_poll_secs: Option<u64>,
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default)]
    pub http_timeout_secs: Option<u64>,
    #[serde(default)]
    pub read_attempts: Option<u32>,
    #[serde(default)]
    pub push_backoff_base_ms: Option<u64>,
    #[serde(default)]
    pub push_backoff_max_ms: Option<u64>,
    #[serde(default)]
    pub push_refresh_debounce_ms: Option<u64>,
    #[serde(default)]
    pub empty_message: Option<String>,
}

impl ClientConfig {
    pub fn routes(&self) -> ApiRoutes {
        if let Some(r) = &self.routes {
            return r.clone();
        }
        self.preset
            .as_deref()
            .and_then(ApiRoutes::from_preset)
            .unwrap_or_else(ApiRoutes::instagram)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(50).clamp(1, 200)
    }

    pub fn settings(&self) -> FeedSettings {
        let defaults = FeedSettings::default();
        FeedSettings {
            page_size: self.page_size(),
            fallback_limit: self.fallback_limit.unwrap_or(defaults.fallback_limit).clamp(1, 200),
            empty_message: self.empty_message.clone().unwrap_or(defaults.empty_message),
            scroll_restore_threshold: defaults.scroll_restore_threshold,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.unwrap_or(180).clamp(30, 600))
    }

    pub fn notification_interval(&self) -> Duration {
        Duration::from_secs(self.notification_poll_secs.unwrap_or(20).clamp(5, 600))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms.unwrap_or(30_000).clamp(1_000, 600_000))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(30).clamp(1, 120))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let d = ReconnectPolicy::default();
        let base = self
            .push_backoff_base_ms
            .map(Duration::from_millis)
            .unwrap_or(d.base)
            .max(Duration::from_millis(100));
        let max = self
            .push_backoff_max_ms
            .map(Duration::from_millis)
            .unwrap_or(d.max)
            .max(base);
        ReconnectPolicy { base, max, max_jitter: d.max_jitter }
    }

    pub fn push_refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.push_refresh_debounce_ms.unwrap_or(1_500).clamp(100, 60_000))
    }

    fn cache_patterns(&self) -> Vec<String> {
        let routes = self.routes();
        let mut v = vec![routes.feed_cache_pattern()];
        if let Some(f) = routes.fallback_feed.as_deref() {
            v.push(f.split('?').next().unwrap_or(f).to_string());
        }
        v
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .try_init()
        .ok();
}

/// A running feed client: engine, optimistic layer, workers and the hooks the
/// host calls into.
pub struct FeedClient {
    pub engine: Arc<FeedEngine>,
    pub optimistic: Arc<OptimisticLayer>,
    pub notifications: Arc<NotificationCenter>,
    pub session: Arc<ClientSessionState>,
    pub cache: Arc<ResponseCache>,
    pub metrics: Arc<NetMetrics>,
    actions: ActionTable,
    ui_tx: broadcast::Sender<UiEvent>,
    view_state: watch::Sender<ViewState>,
    push_state: watch::Receiver<ConnectionState>,
    push_state_tx: Option<watch::Sender<ConnectionState>>,
    scroll: Throttle<ScrollPosition>,
    shutdown_tx: watch::Sender<bool>,
    cfg: ClientConfig,
}

impl FeedClient {
    /// Wires every component around `api` without spawning workers.
    pub fn assemble(
        cfg: ClientConfig,
        view: Arc<dyn FeedView>,
        api: Arc<dyn FeedApi>,
        session: Arc<ClientSessionState>,
        cache: Arc<ResponseCache>,
        metrics: Arc<NetMetrics>,
    ) -> Self {
        let (ui_tx, _) = broadcast::channel(256);
        let store = Arc::new(InteractionStore::new());
        let presenter = Presenter::new(cfg.media_base_url.as_deref().unwrap_or(&cfg.api_base_url));
        let patterns = cfg.cache_patterns();

        let engine = Arc::new(
            FeedEngine::new(api.clone(), view.clone(), session.clone(), store.clone(), cfg.settings())
                .with_presenter(presenter)
                .with_cache(cache.clone(), patterns.clone())
                .with_ui_events(ui_tx.clone())
                .with_metrics(metrics.clone()),
        );
        let optimistic = Arc::new(
            OptimisticLayer::new(
                api.clone(),
                view,
                FrameBatcher::new(DEFAULT_FRAME),
                store,
                session.clone(),
                cache.clone(),
                ui_tx.clone(),
                metrics.clone(),
            )
            .with_invalidate_patterns(patterns),
        );
        let notifications = Arc::new(NotificationCenter::new(api, ui_tx.clone()));
        let actions = default_table(engine.clone(), optimistic.clone(), cfg.page_size());

        let scroll_engine = engine.clone();
        let page_size = cfg.page_size();
        let scroll = Throttle::new(DEFAULT_FRAME, move |pos: ScrollPosition| {
            if pos.near_bottom(500.0) {
                let e = scroll_engine.clone();
                tokio::spawn(async move {
                    e.load_more(page_size).await;
                });
            }
        });

        let (view_state, _) = watch::channel(ViewState::default());
        let (push_state_tx, push_state) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            engine,
            optimistic,
            notifications,
            session,
            cache,
            metrics,
            actions,
            ui_tx,
            view_state,
            push_state,
            push_state_tx: Some(push_state_tx),
            scroll,
            shutdown_tx,
            cfg,
        }
    }

    /// Opens the session store, builds the HTTP backend, spawns the workers
    /// and performs the first load.
    pub async fn start(cfg: ClientConfig, view: Arc<dyn FeedView>) -> Result<Self> {
        init_tracing();

        let data_dir = match cfg.data_dir.as_deref() {
            Some(d) => PathBuf::from(d),
            None => default_data_dir()?,
        };
        let session = Arc::new(
            ClientSessionState::open(data_dir.join("feedsync.db"))
                .with_context(|| format!("open session store in {}", data_dir.display()))?,
        );
        let metrics = Arc::new(NetMetrics::new());
        let cache = Arc::new(ResponseCache::with_metrics(metrics.clone()));
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout())
            .build()
            .context("build http client")?;
        let api: Arc<dyn FeedApi> = Arc::new(
            HttpFeedApi::new(
                &cfg.api_base_url,
                cfg.routes(),
                http,
                cache.clone(),
                session.clone(),
                metrics.clone(),
            )
            .with_cache_ttl(cfg.cache_ttl())
            .with_read_attempts(cfg.read_attempts.unwrap_or(3)),
        );

        let mut client = Self::assemble(cfg, view, api.clone(), session.clone(), cache, metrics);
        info!(
            api = %client.cfg.api_base_url,
            authenticated = session.is_authenticated(),
            "feed client starting"
        );

        if session.is_authenticated() {
            match api.fetch_following().await {
                Ok(ids) => {
                    if let Err(e) = session.replace_following(ids) {
                        warn!("persist following list failed: {e:#}");
                    }
                }
                Err(e) => debug!(error = %e, "following list unavailable"),
            }
        }

        client.spawn_workers();
        let out = client.engine.load_initial(client.cfg.page_size()).await;
        info!(?out, "initial feed load");
        Ok(client)
    }

    fn spawn_workers(&mut self) {
        let shutdown = self.shutdown_tx.subscribe();
        start_refresh_worker(
            self.engine.clone(),
            self.cfg.refresh_interval(),
            self.view_state.subscribe(),
            shutdown.clone(),
        );
        if self.cfg.routes().notifications.is_some() {
            start_notification_worker(
                self.notifications.clone(),
                self.cfg.notification_interval(),
                self.view_state.subscribe(),
                shutdown.clone(),
            );
        }
        start_cache_gc_worker(self.cache.clone(), self.cfg.cache_ttl(), shutdown.clone());

        let Some(ws_url) = self.cfg.push_ws_url.clone() else {
            return;
        };
        let Some(state_tx) = self.push_state_tx.take() else {
            return;
        };
        let (ev_tx, ev_rx) = mpsc::channel(64);
        start_push_worker(
            ws_url,
            self.session.clone(),
            self.cfg.reconnect_policy(),
            ev_tx,
            state_tx,
            self.metrics.clone(),
            shutdown.clone(),
        );
        start_push_dispatch(
            self.engine.clone(),
            self.cfg.push_refresh_debounce(),
            ev_rx,
            shutdown,
        );
    }

    pub fn subscribe_ui(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_tx.subscribe()
    }

    pub fn set_view_state(&self, state: ViewState) {
        self.view_state.send_replace(state);
    }

    /// Throttled scroll hook. Returns false when the call was dropped.
    pub fn on_scroll(&self, pos: ScrollPosition) -> bool {
        self.scroll.call(pos)
    }

    pub async fn dispatch(&self, action: &str, args: ActionArgs) -> Result<()> {
        debug!(action, target = %args.target, "dispatch");
        self.actions.dispatch(action, args).await
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn push_state(&self) -> ConnectionState {
        *self.push_state.borrow()
    }

    pub fn metrics_json(&self) -> serde_json::Value {
        self.metrics.snapshot_json()
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        info!("feed client stopped");
    }
}

/// Routes push events into the engine. Notifications that carry no counters
/// trigger a debounced head read instead.
pub fn start_push_dispatch(
    engine: Arc<FeedEngine>,
    debounce: Duration,
    mut events: mpsc::Receiver<PushEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let page_size = engine.settings().page_size;
        let refresh_engine = engine.clone();
        let refresh = Debouncer::new(debounce, move |_: ()| {
            let e = refresh_engine.clone();
            tokio::spawn(async move {
                let out = e.load_initial(page_size).await;
                debug!(?out, "push triggered refresh");
            });
        });
        loop {
            tokio::select! {
                r = shutdown.changed() => {
                    if r.is_err() || *shutdown.borrow() { break; }
                }
                ev = events.recv() => {
                    let Some(ev) = ev else { break; };
                    let patched = engine.apply_push(&ev);
                    if !patched && matches!(ev, PushEvent::Notification(_)) {
                        refresh.call(());
                    }
                }
            }
        }
    });
}

fn start_cache_gc_worker(cache: Arc<ResponseCache>, ttl: Duration, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(ttl.max(Duration::from_secs(30)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                r = shutdown.changed() => {
                    if r.is_err() || *shutdown.borrow() { break; }
                }
                _ = tick.tick() => {
                    let n = cache.purge_expired(ttl);
                    if n > 0 {
                        debug!(removed = n, "cache purged");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, RecordingView, StubApi};
    use feedsync_protocol::PushNotification;

    #[test]
    fn config_defaults_and_clamps() {
        let cfg: ClientConfig = serde_json::from_value(serde_json::json!({
            "api_base_url": "http://h",
            "preset": "reddit",
            "refresh_interval_secs": 5,
            "page_size": 0
        }))
        .unwrap();
        assert_eq!(cfg.routes(), ApiRoutes::reddit());
        assert_eq!(cfg.refresh_interval(), Duration::from_secs(30));
        assert_eq!(cfg.page_size(), 1);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(30));
        assert_eq!(cfg.reconnect_policy().base, Duration::from_secs(5));
        assert_eq!(cfg.notification_interval(), Duration::from_secs(20));

        let dflt = ClientConfig { api_base_url: "http://h".into(), ..Default::default() };
        assert_eq!(dflt.routes(), ApiRoutes::instagram());
        assert_eq!(dflt.cache_patterns(), vec!["/api/instagram/feed", "/api/posts/feed"]);
    }

    fn client() -> (Arc<StubApi>, Arc<RecordingView>, FeedClient) {
        let api = Arc::new(StubApi::default());
        let view = Arc::new(RecordingView::default());
        let session = Arc::new(ClientSessionState::in_memory());
        let client = FeedClient::assemble(
            ClientConfig { api_base_url: "http://h".into(), ..Default::default() },
            view.clone(),
            api.clone(),
            session,
            Arc::new(ResponseCache::new()),
            Arc::new(NetMetrics::new()),
        );
        (api, view, client)
    }

    #[tokio::test(start_paused = true)]
    async fn logged_out_like_prompts_login() {
        let (api, _, client) = client();
        let mut ui = client.subscribe_ui();
        client.dispatch("like", ActionArgs::target("p1")).await.unwrap();
        assert!(api.mutations().is_empty());
        assert_eq!(ui.try_recv().unwrap().kind, crate::ui_events::KIND_LOGIN_REQUIRED);
        assert!(client.dispatch("nope", ActionArgs::default()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_near_bottom_loads_more_once_per_window() {
        let (api, _, client) = client();
        api.push_feed(Duration::ZERO, Ok(page(&[("a", 0)], Some(3))));
        api.push_feed(Duration::ZERO, Ok(page(&[("b", 0)], Some(3))));
        client.engine.load_initial(50).await;

        let bottom = ScrollPosition { offset: 900.0, viewport: 800.0, content: 1800.0 };
        assert!(client.on_scroll(bottom));
        assert!(!client.on_scroll(bottom));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(client.engine.snapshot().ids, vec!["a", "b"]);
        assert_eq!(api.feed_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn counterless_push_triggers_debounced_refresh() {
        let (api, _, client) = client();
        api.push_feed(Duration::ZERO, Ok(page(&[("a", 0)], None)));
        client.engine.load_initial(50).await;
        api.push_feed(Duration::ZERO, Ok(page(&[("n", 0), ("a", 0)], None)));

        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        start_push_dispatch(client.engine.clone(), Duration::from_millis(500), rx, stop_rx);
        for _ in 0..3 {
            tx.send(PushEvent::Notification(PushNotification {
                text: "followed you".into(),
                ..Default::default()
            }))
            .await
            .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(api.feed_calls().len(), 2);
        assert_eq!(client.engine.snapshot().ids, vec!["n", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flips_watch() {
        let (_, _, client) = client();
        let mut rx = client.shutdown_tx.subscribe();
        client.shutdown();
        assert!(*rx.borrow_and_update());
        assert_eq!(client.push_state(), ConnectionState::Disconnected);
    }
}
