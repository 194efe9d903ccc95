/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use feedsync_protocol::{FeedPage, MutationAck, NotificationsPage};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("http {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("login required")]
    Unauthenticated,
}

impl ApiError {
    /// Worth retrying on a later tick.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short text suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Status { detail, .. } if !detail.is_empty() => detail.clone(),
            ApiError::Rejected(msg) => msg.clone(),
            ApiError::Unauthenticated => "Login required".to_string(),
            ApiError::Timeout => "Request timed out".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Status {
                status: status.as_u16(),
                detail: String::new(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}

/// Server-side writes. `id` is the item id unless noted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Like { id: String },
    Unlike { id: String },
    Save { id: String },
    Unsave { id: String },
    /// `id` is the author being followed.
    Follow { id: String },
    Unfollow { id: String },
    Comment { item_id: String, text: String },
    Reply { item_id: String, comment_id: String, text: String },
    LikeComment { item_id: String, comment_id: String },
    Delete { id: String },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Like { .. } => "like",
            Mutation::Unlike { .. } => "unlike",
            Mutation::Save { .. } => "save",
            Mutation::Unsave { .. } => "unsave",
            Mutation::Follow { .. } => "follow",
            Mutation::Unfollow { .. } => "unfollow",
            Mutation::Comment { .. } => "comment",
            Mutation::Reply { .. } => "reply",
            Mutation::LikeComment { .. } => "like_comment",
            Mutation::Delete { .. } => "delete",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Mutation::Like { id }
            | Mutation::Unlike { id }
            | Mutation::Save { id }
            | Mutation::Unsave { id }
            | Mutation::Follow { id }
            | Mutation::Unfollow { id }
            | Mutation::Delete { id } => id,
            Mutation::Comment { item_id, .. }
            | Mutation::Reply { item_id, .. }
            | Mutation::LikeComment { item_id, .. } => item_id,
        }
    }

    pub fn comment_id(&self) -> Option<&str> {
        match self {
            Mutation::Reply { comment_id, .. } | Mutation::LikeComment { comment_id, .. } => {
                Some(comment_id)
            }
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Mutation::Comment { text, .. } | Mutation::Reply { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Remote feed backend.
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// `offset == None` reads the head of the feed.
    async fn fetch_feed(&self, limit: u32, offset: Option<u64>) -> Result<FeedPage, ApiError>;

    /// Secondary source tried once when the first load fails.
    async fn fetch_fallback(&self, limit: u32) -> Result<FeedPage, ApiError>;

    async fn mutate(&self, mutation: &Mutation) -> Result<MutationAck, ApiError>;

    async fn fetch_notifications(&self, limit: u32) -> Result<NotificationsPage, ApiError>;

    async fn fetch_following(&self) -> Result<Vec<String>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Status { status: 503, detail: String::new() }.is_transient());
        assert!(ApiError::Status { status: 429, detail: String::new() }.is_transient());
        assert!(!ApiError::Status { status: 404, detail: String::new() }.is_transient());
        assert!(!ApiError::Unsupported("reply").is_transient());
    }

    #[test]
    fn status_detail_becomes_user_message() {
        let e = ApiError::Status { status: 403, detail: "Not your post".into() };
        assert_eq!(e.user_message(), "Not your post");
        assert_eq!(ApiError::Rejected("nope".into()).user_message(), "nope");
    }

    #[test]
    fn mutation_accessors() {
        let m = Mutation::Reply {
            item_id: "p1".into(),
            comment_id: "c9".into(),
            text: "hey".into(),
        };
        assert_eq!(m.name(), "reply");
        assert_eq!(m.target(), "p1");
        assert_eq!(m.comment_id(), Some("c9"));
        assert_eq!(m.text(), Some("hey"));
        assert_eq!(Mutation::Like { id: "x".into() }.comment_id(), None);
    }
}
