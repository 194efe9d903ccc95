/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wire shapes of the feed API consumed by the client core.
//!
//! The three front ends talk to backends that disagree on field names
//! (`comentarios` vs `comments`, `likes_count` vs `likes`, ...) and are not
//! strict about types. Everything here decodes leniently: missing arrays become
//! empty, missing or malformed counters become zero, and list entries that
//! cannot be decoded are dropped instead of failing the whole page.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, alias = "tipo")]
    pub kind: Option<String>,
    #[serde(default, alias = "agente_id", alias = "agent_id")]
    pub author_id: Option<String>,
    #[serde(default, alias = "autor_nome", alias = "agente_nome", alias = "agent_name")]
    pub author_name: Option<String>,
    #[serde(default, alias = "content")]
    pub caption: Option<String>,
    #[serde(default, alias = "imagem_url")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default, alias = "likes_count", deserialize_with = "lenient_u64")]
    pub likes: u64,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub upvotes: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub downvotes: Option<i64>,
    #[serde(default, alias = "comments_count", deserialize_with = "lenient_opt_u64")]
    pub comment_count: Option<u64>,
    #[serde(default, alias = "comentarios", deserialize_with = "lenient_vec")]
    pub comments: Vec<Comment>,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<String>,
}

impl FeedItem {
    /// Reddit-style items carry votes instead of likes; the score stands in for the like counter.
    pub fn like_count(&self) -> u64 {
        match (self.upvotes, self.downvotes) {
            (None, None) => self.likes,
            (up, down) => up.unwrap_or(0).saturating_sub(down.unwrap_or(0)).max(0) as u64,
        }
    }

    pub fn total_comments(&self) -> u64 {
        let listed = self.comments.len() as u64;
        self.comment_count.unwrap_or(listed).max(listed)
    }

    pub fn media(&self) -> Option<&str> {
        self.video_url
            .as_deref()
            .or(self.media_url.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn is_video(&self) -> bool {
        self.video_url.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
            || self.media_type.as_deref() == Some("video")
            || self.kind.as_deref() == Some("reel")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, alias = "agente_id")]
    pub author_id: Option<String>,
    #[serde(default, alias = "autor_nome", alias = "username")]
    pub author_name: Option<String>,
    #[serde(default, alias = "texto")]
    pub text: String,
    #[serde(default, alias = "likes", deserialize_with = "lenient_u64")]
    pub like_count: u64,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, alias = "autor_nome", alias = "username")]
    pub author_name: Option<String>,
    #[serde(default, alias = "texto")]
    pub text: String,
}

/// One page of a feed read. Backends either return `items` or split the page
/// into `posts` / `reels` / `stories`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub items: Vec<FeedItem>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub posts: Vec<FeedItem>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub reels: Vec<FeedItem>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub stories: Vec<FeedItem>,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    pub total: Option<u64>,
}

impl FeedPage {
    /// Accepts either a page object or a bare array of items.
    pub fn from_json(v: Value) -> Result<Self, serde_json::Error> {
        match v {
            Value::Array(_) => Ok(Self {
                items: lenient_list(v),
                ..Self::default()
            }),
            other => serde_json::from_value(other),
        }
    }

    /// Items in render order: `items`, then `posts`, then `reels`. Entries
    /// without an identifier are dropped.
    pub fn merged(&self) -> Vec<FeedItem> {
        self.items
            .iter()
            .chain(self.posts.iter())
            .chain(self.reels.iter())
            .filter(|i| !i.id.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// Response of a mutating call. Only the fields the caller needs are read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationAck {
    #[serde(default, alias = "score", deserialize_with = "lenient_opt_u64")]
    pub likes: Option<u64>,
    #[serde(default, alias = "seguidores", deserialize_with = "lenient_opt_u64")]
    pub followers: Option<u64>,
    #[serde(default)]
    pub comment: Option<Comment>,
    #[serde(default)]
    pub reply: Option<Reply>,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, alias = "tipo")]
    pub kind: Option<String>,
    #[serde(default, alias = "de_nome")]
    pub from_name: Option<String>,
    #[serde(default, alias = "texto")]
    pub text: String,
    #[serde(default, alias = "post_id")]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationsPage {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub notifications: Vec<Notification>,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    pub total: Option<u64>,
}

impl NotificationsPage {
    pub fn total(&self) -> u64 {
        self.total.unwrap_or(self.notifications.len() as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowingList {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub following: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "de_nome")]
    pub from_name: Option<String>,
    #[serde(default, alias = "texto")]
    pub text: String,
    #[serde(default, alias = "post_id")]
    pub item_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    pub likes: Option<u64>,
    #[serde(default, alias = "comments_count", deserialize_with = "lenient_opt_u64")]
    pub comment_count: Option<u64>,
}

/// Frames delivered over the push socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Message(ChatMessage),
    Notification(PushNotification),
    #[serde(other)]
    Unknown,
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn value_to_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|i| i.max(0) as u64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn lenient_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(value_to_i64(&v))
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(value_to_u64(&v).unwrap_or(0))
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(value_to_u64(&v))
}

fn lenient_vec<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(lenient_list(Value::deserialize(d)?))
}

fn lenient_list<T: DeserializeOwned>(v: Value) -> Vec<T> {
    match v {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}
