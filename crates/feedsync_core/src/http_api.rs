/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use feedsync_protocol::{FeedPage, FollowingList, MutationAck, NotificationsPage};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::api::{ApiError, FeedApi, Mutation};
use crate::cache::{ResponseCache, DEFAULT_TTL};
use crate::http_retry::send_with_retry_metrics;
use crate::net_metrics::NetMetrics;
use crate::session::ClientSessionState;

/// A mutation endpoint. `path` may contain `{id}` and `{comment_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    /// Static JSON body; comment text is merged in as `texto`.
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl Route {
    pub fn post(path: &str) -> Self {
        Self { method: "POST".into(), path: path.into(), body: None }
    }

    pub fn delete(path: &str) -> Self {
        Self { method: "DELETE".into(), path: path.into(), body: None }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn resolve(&self, id: &str, comment_id: Option<&str>) -> String {
        self.path
            .replace("{id}", &urlencoding::encode(id))
            .replace("{comment_id}", &urlencoding::encode(comment_id.unwrap_or("")))
    }

    fn method(&self) -> Method {
        Method::from_bytes(self.method.trim().to_uppercase().as_bytes()).unwrap_or(Method::POST)
    }

    fn body_for(&self, text: Option<&str>) -> Option<Value> {
        match (self.body.clone(), text) {
            (body, None) => body,
            (Some(Value::Object(mut m)), Some(t)) => {
                m.insert("texto".into(), Value::String(t.to_string()));
                Some(Value::Object(m))
            }
            (_, Some(t)) => Some(json!({ "texto": t })),
        }
    }
}

/// Endpoint layout of one backend flavour. Missing mutation routes make the
/// corresponding operation fail with `ApiError::Unsupported`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRoutes {
    pub feed: String,
    #[serde(default)]
    pub fallback_feed: Option<String>,
    #[serde(default)]
    pub notifications: Option<String>,
    #[serde(default)]
    pub following: Option<String>,
    #[serde(default)]
    pub like: Option<Route>,
    #[serde(default)]
    pub unlike: Option<Route>,
    #[serde(default)]
    pub save: Option<Route>,
    #[serde(default)]
    pub unsave: Option<Route>,
    #[serde(default)]
    pub follow: Option<Route>,
    #[serde(default)]
    pub unfollow: Option<Route>,
    #[serde(default)]
    pub comment: Option<Route>,
    #[serde(default)]
    pub reply: Option<Route>,
    #[serde(default)]
    pub like_comment: Option<Route>,
    #[serde(default)]
    pub delete: Option<Route>,
}

impl ApiRoutes {
    pub fn instagram() -> Self {
        Self {
            feed: "/api/instagram/feed".into(),
            fallback_feed: Some("/api/posts/feed".into()),
            notifications: Some("/api/instagram/notifications".into()),
            following: Some("/api/instagram/following/me".into()),
            like: Some(Route::post("/api/instagram/like/{id}")),
            unlike: Some(Route::delete("/api/instagram/like/{id}")),
            save: Some(Route::post("/api/instagram/save/{id}")),
            unsave: Some(Route::post("/api/instagram/unsave/{id}")),
            follow: Some(Route::post("/api/instagram/follow/{id}")),
            unfollow: Some(Route::post("/api/instagram/unfollow/{id}")),
            comment: Some(Route::post("/api/instagram/comment/{id}")),
            reply: Some(Route::post("/api/instagram/comment/{id}/reply/{comment_id}")),
            like_comment: Some(Route::post("/api/instagram/comment/{id}/{comment_id}/like")),
            delete: Some(Route::delete("/api/instagram/post/{id}")),
        }
    }

    pub fn social() -> Self {
        Self {
            feed: "/api/posts/feed".into(),
            fallback_feed: None,
            notifications: None,
            following: None,
            like: Some(Route::post("/api/posts/{id}/like")),
            unlike: Some(Route::delete("/api/posts/{id}/like")),
            save: None,
            unsave: None,
            follow: Some(Route::post("/api/agents/{id}/follow")),
            unfollow: Some(Route::delete("/api/agents/{id}/follow")),
            comment: Some(Route::post("/api/posts/{id}/comments")),
            reply: None,
            like_comment: None,
            delete: Some(Route::delete("/api/posts/{id}")),
        }
    }

    pub fn reddit() -> Self {
        Self {
            feed: "/api/reddit/feed?sort=hot".into(),
            fallback_feed: None,
            notifications: None,
            following: None,
            like: Some(Route::post("/api/reddit/vote/{id}").with_body(json!({ "direction": "up" }))),
            unlike: Some(Route::post("/api/reddit/vote/{id}").with_body(json!({ "direction": "none" }))),
            save: Some(Route::post("/api/reddit/save/{id}")),
            unsave: Some(Route::post("/api/reddit/unsave/{id}")),
            follow: None,
            unfollow: None,
            comment: Some(Route::post("/api/reddit/comment/{id}")),
            reply: Some(Route::post("/api/reddit/comment/{id}/reply/{comment_id}")),
            like_comment: None,
            delete: None,
        }
    }

    pub fn from_preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "instagram" => Some(Self::instagram()),
            "social" => Some(Self::social()),
            "reddit" => Some(Self::reddit()),
            _ => None,
        }
    }

    pub fn route(&self, m: &Mutation) -> Option<&Route> {
        match m {
            Mutation::Like { .. } => self.like.as_ref(),
            Mutation::Unlike { .. } => self.unlike.as_ref(),
            Mutation::Save { .. } => self.save.as_ref(),
            Mutation::Unsave { .. } => self.unsave.as_ref(),
            Mutation::Follow { .. } => self.follow.as_ref(),
            Mutation::Unfollow { .. } => self.unfollow.as_ref(),
            Mutation::Comment { .. } => self.comment.as_ref(),
            Mutation::Reply { .. } => self.reply.as_ref(),
            Mutation::LikeComment { .. } => self.like_comment.as_ref(),
            Mutation::Delete { .. } => self.delete.as_ref(),
        }
    }

    /// Substring identifying cached feed reads, for invalidation.
    pub fn feed_cache_pattern(&self) -> String {
        self.feed.split('?').next().unwrap_or(&self.feed).to_string()
    }
}

pub fn with_query(url: &str, pairs: &[(&str, String)]) -> String {
    let mut out = url.to_string();
    for (k, v) in pairs {
        out.push(if out.contains('?') { '&' } else { '?' });
        out.push_str(k);
        out.push('=');
        out.push_str(&urlencoding::encode(v));
    }
    out
}

/// `FeedApi` over HTTP. Reads go through the shared response cache; writes
/// are sent once.
pub struct HttpFeedApi {
    base_url: String,
    routes: ApiRoutes,
    http: reqwest::Client,
    cache: Arc<ResponseCache>,
    cache_ttl: Duration,
    session: Arc<ClientSessionState>,
    metrics: Arc<NetMetrics>,
    read_attempts: u32,
}

impl HttpFeedApi {
    pub fn new(
        base_url: &str,
        routes: ApiRoutes,
        http: reqwest::Client,
        cache: Arc<ResponseCache>,
        session: Arc<ClientSessionState>,
        metrics: Arc<NetMetrics>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            routes,
            http,
            cache,
            cache_ttl: DEFAULT_TTL,
            session,
            metrics,
            read_attempts: 3,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_read_attempts(mut self, attempts: u32) -> Self {
        self.read_attempts = attempts;
        self
    }

    pub fn routes(&self) -> &ApiRoutes {
        &self.routes
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.session.token() {
            Some(tok) => req.header("Authorization", format!("Bearer {}", tok)),
            None => req,
        }
    }

    async fn get_json(&self, url: String, cached: bool) -> Result<Value, ApiError> {
        if cached {
            let key = url.clone();
            self.cache
                .get_or_fetch(&key, self.cache_ttl, || self.send_json(Method::GET, url, None, self.read_attempts))
                .await
        } else {
            self.send_json(Method::GET, url, None, self.read_attempts).await
        }
    }

    async fn send_json(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        attempts: u32,
    ) -> Result<Value, ApiError> {
        let resp = send_with_retry_metrics(
            || {
                let req = self.authorize(self.http.request(method.clone(), &url));
                match &body {
                    Some(b) => req.json(b),
                    None => req,
                }
            },
            attempts,
            &self.metrics,
        )
        .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            debug!(%url, status = status.as_u16(), "request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: error_detail(&text),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn read_page(&self, path: &str, pairs: &[(&str, String)]) -> Result<FeedPage, ApiError> {
        let url = with_query(&self.url(path), pairs);
        let v = self.get_json(url, true).await?;
        Ok(FeedPage::from_json(v)?)
    }
}

fn error_detail(body: &str) -> String {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return body.chars().take(200).collect();
    };
    for key in ["detail", "error", "message"] {
        match v.get(key) {
            Some(Value::String(s)) => return s.clone(),
            Some(other) if !other.is_null() => return other.to_string(),
            _ => {}
        }
    }
    String::new()
}

#[async_trait]
impl FeedApi for HttpFeedApi {
    async fn fetch_feed(&self, limit: u32, offset: Option<u64>) -> Result<FeedPage, ApiError> {
        let mut pairs = vec![("limit", limit.to_string())];
        if let Some(o) = offset {
            pairs.push(("offset", o.to_string()));
        }
        let feed = self.routes.feed.clone();
        self.read_page(&feed, &pairs).await
    }

    async fn fetch_fallback(&self, limit: u32) -> Result<FeedPage, ApiError> {
        let path = self
            .routes
            .fallback_feed
            .clone()
            .ok_or(ApiError::Unsupported("fallback_feed"))?;
        self.read_page(&path, &[("limit", limit.to_string())]).await
    }

    async fn mutate(&self, mutation: &Mutation) -> Result<MutationAck, ApiError> {
        let route = self
            .routes
            .route(mutation)
            .ok_or(ApiError::Unsupported(mutation.name()))?;
        let url = self.url(&route.resolve(mutation.target(), mutation.comment_id()));
        let v = self
            .send_json(route.method(), url, route.body_for(mutation.text()), 1)
            .await?;
        let ack: MutationAck = if v.is_object() {
            serde_json::from_value(v)?
        } else {
            MutationAck::default()
        };
        if let Some(err) = ack.error.clone().filter(|e| !e.is_empty()) {
            return Err(ApiError::Rejected(err));
        }
        if ack.ok == Some(false) {
            return Err(ApiError::Rejected(format!("{} refused", mutation.name())));
        }
        Ok(ack)
    }

    async fn fetch_notifications(&self, limit: u32) -> Result<NotificationsPage, ApiError> {
        let path = self
            .routes
            .notifications
            .clone()
            .ok_or(ApiError::Unsupported("notifications"))?;
        let url = with_query(&self.url(&path), &[("limit", limit.to_string())]);
        let v = self.get_json(url, false).await?;
        Ok(serde_json::from_value(v)?)
    }

    async fn fetch_following(&self) -> Result<Vec<String>, ApiError> {
        let path = self
            .routes
            .following
            .clone()
            .ok_or(ApiError::Unsupported("following"))?;
        let v = self.get_json(self.url(&path), false).await?;
        let list: FollowingList = serde_json::from_value(v)?;
        Ok(list.following)
    }
}
