/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Markup builders for feed items. Deterministic given the item, the flags and
//! the presenter clock; handlers are never inlined, only `data-action` names
//! that the host resolves through the action table.

use feedsync_protocol::{Comment, FeedItem, Reply};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::actions::names;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBinding {
    pub action: &'static str,
    pub target: String,
    pub extra: Option<String>,
}

impl ActionBinding {
    fn new(action: &'static str, target: &str, extra: Option<&str>) -> Self {
        Self {
            action,
            target: target.to_string(),
            extra: extra.map(str::to_string),
        }
    }

    fn attrs(&self) -> String {
        let mut out = format!(
            " data-action=\"{}\" data-target=\"{}\"",
            self.action,
            escape_html(&self.target)
        );
        if let Some(extra) = &self.extra {
            out.push_str(&format!(" data-extra=\"{}\"", escape_html(extra)));
        }
        out
    }
}

/// Rendered markup for one feed item plus the actions it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub item_id: String,
    pub markup: String,
    pub actions: Vec<ActionBinding>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFlags {
    pub liked: bool,
    pub saved: bool,
    pub following_author: bool,
    /// Like counter to show instead of the item's own, set while an
    /// optimistic like is in flight.
    pub likes: Option<u64>,
}

#[derive(Clone)]
pub struct Presenter {
    media_base: String,
    comment_preview: usize,
    clock: fn() -> OffsetDateTime,
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new("")
    }
}

impl Presenter {
    pub fn new(media_base: &str) -> Self {
        Self {
            media_base: media_base.trim_end_matches('/').to_string(),
            comment_preview: 2,
            clock: OffsetDateTime::now_utc,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn item(&self, item: &FeedItem, flags: ItemFlags) -> Fragment {
        let id = item.id.as_str();
        let author = display_handle(item.author_name.as_deref());
        let mut actions = Vec::new();

        let like = ActionBinding::new(names::LIKE, id, None);
        let comment = ActionBinding::new(names::COMMENT, id, None);
        let save = ActionBinding::new(names::SAVE, id, None);
        let mut acts = format!(
            "<button class=\"item-act like{}\"{}>{}</button>",
            if flags.liked { " liked" } else { "" },
            like.attrs(),
            if flags.liked { "\u{2764}\u{FE0F}" } else { "\u{1F90D}" }
        );
        acts.push_str(&format!(
            "<button class=\"item-act\"{}>\u{1F4AC}</button>",
            comment.attrs()
        ));
        acts.push_str(&format!(
            "<button class=\"item-act save{}\"{}>\u{1F516}</button>",
            if flags.saved { " saved" } else { "" },
            save.attrs()
        ));
        actions.extend([like, comment, save]);

        if let Some(author_id) = item.author_id.as_deref().filter(|s| !s.is_empty()) {
            let follow = ActionBinding::new(names::FOLLOW, author_id, None);
            acts.push_str(&format!(
                "<button class=\"item-follow{}\"{}>{}</button>",
                if flags.following_author { " following" } else { "" },
                follow.attrs(),
                if flags.following_author { "Following" } else { "Follow" }
            ));
            actions.push(follow);
        }

        let total_comments = item.total_comments();
        let mut comments = String::new();
        if total_comments as usize > self.comment_preview {
            let show_all = ActionBinding::new(names::SHOW_ALL_COMMENTS, id, None);
            comments.push_str(&format!(
                "<div class=\"item-view-comments\"{}>{}</div>",
                show_all.attrs(),
                view_all_text(total_comments)
            ));
            actions.push(show_all);
        }
        let (preview, preview_actions) = self.comments_markup(id, self.preview_slice(item));
        comments.push_str(&format!(
            "<div class=\"item-comments\" id=\"comments-{}\">{}</div>",
            escape_html(id),
            preview
        ));
        actions.extend(preview_actions);

        let delete = ActionBinding::new(names::DELETE, id, None);
        let markup = format!(
            "<article class=\"feed-item\" id=\"{id}\" data-kind=\"{kind}\">\
<div class=\"item-head\"><span class=\"item-author\">{author}</span>\
<button class=\"item-menu\"{delete_attrs}>&#8943;</button></div>\
<div class=\"item-media\">{media}</div>\
<div class=\"item-acts\">{acts}</div>\
<div class=\"item-likes\" id=\"likes-{id}\">{likes}</div>\
<div class=\"item-caption\"><strong>{author}</strong> {caption}</div>\
{comments}\
<div class=\"item-time\">{time}</div>\
</article>",
            id = escape_html(id),
            kind = escape_html(item.kind.as_deref().unwrap_or("post")),
            author = escape_html(&author),
            delete_attrs = delete.attrs(),
            media = self.media_markup(item),
            acts = acts,
            likes = likes_text(flags.likes.unwrap_or_else(|| item.like_count())),
            caption = escape_html(item.caption.as_deref().unwrap_or("")),
            comments = comments,
            time = item
                .created_at
                .as_deref()
                .and_then(|ts| time_ago(ts, (self.clock)()))
                .unwrap_or_default(),
        );
        actions.push(delete);

        Fragment {
            item_id: item.id.clone(),
            markup,
            actions,
        }
    }

    /// Markup for the collapsed comment area: the newest comments only.
    pub fn comment_preview(&self, item: &FeedItem) -> String {
        self.comments_markup(&item.id, self.preview_slice(item)).0
    }

    /// Markup for every comment of the item, used once the user expanded it.
    pub fn comment_thread(&self, item: &FeedItem) -> String {
        self.comments_markup(&item.id, &item.comments).0
    }

    pub fn comment(&self, item_id: &str, c: &Comment) -> (String, Vec<ActionBinding>) {
        let like = ActionBinding::new(names::LIKE_COMMENT, item_id, Some(&c.id));
        let reply = ActionBinding::new(names::REPLY, item_id, Some(&c.id));
        let mut html = format!(
            "<div class=\"comment-row\" data-comment=\"{cid}\"><strong>{author}</strong> {text}\
<button class=\"comment-like-btn\"{like_attrs}>\u{2764} {likes}</button>\
<button class=\"comment-reply-btn\"{reply_attrs}>Reply</button></div>",
            cid = escape_html(&c.id),
            author = escape_html(&display_handle(c.author_name.as_deref())),
            text = escape_html(&c.text),
            like_attrs = like.attrs(),
            likes = if c.like_count > 0 { format_count(c.like_count) } else { String::new() },
            reply_attrs = reply.attrs(),
        );
        if !c.replies.is_empty() {
            html.push_str("<div class=\"comment-replies\">");
            for r in &c.replies {
                html.push_str(&self.reply(r));
            }
            html.push_str("</div>");
        }
        (html, vec![like, reply])
    }

    pub fn reply(&self, r: &Reply) -> String {
        format!(
            "<div class=\"comment-row\"><strong>{}</strong> {}</div>",
            escape_html(&display_handle(r.author_name.as_deref())),
            escape_html(&r.text)
        )
    }

    pub fn media_url(&self, raw: &str) -> String {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("{}{}", self.media_base, raw)
        }
    }

    fn preview_slice<'a>(&self, item: &'a FeedItem) -> &'a [Comment] {
        let n = item.comments.len();
        &item.comments[n.saturating_sub(self.comment_preview)..]
    }

    fn comments_markup(&self, item_id: &str, comments: &[Comment]) -> (String, Vec<ActionBinding>) {
        let mut html = String::new();
        let mut actions = Vec::new();
        for c in comments {
            let (h, a) = self.comment(item_id, c);
            html.push_str(&h);
            actions.extend(a);
        }
        (html, actions)
    }

    fn media_markup(&self, item: &FeedItem) -> String {
        match item.media() {
            Some(url) if item.is_video() || url.contains(".mp4") || url.contains(".webm") => {
                let poster = item
                    .media_url
                    .as_deref()
                    .filter(|m| !m.trim().is_empty() && Some(m.trim()) != Some(url))
                    .map(|m| format!(" poster=\"{}\"", escape_html(&self.media_url(m))))
                    .unwrap_or_default();
                format!(
                    "<video src=\"{}\" loop muted playsinline{}></video>",
                    escape_html(&self.media_url(url)),
                    poster
                )
            }
            Some(url) => format!(
                "<img src=\"{}\" loading=\"lazy\" alt=\"\">",
                escape_html(&self.media_url(url))
            ),
            None => "<div class=\"media-ph\"></div>".to_string(),
        }
    }
}

pub fn likes_text(n: u64) -> String {
    format!("{} likes", format_count(n))
}

pub fn view_all_text(n: u64) -> String {
    format!("View all {n} comments")
}

/// `1234` → `1.2K`, `2500000` → `2.5M`.
pub fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

/// Coarse relative age. Accepts RFC 3339 and offset-less ISO 8601 (read as UTC).
pub fn time_ago(ts: &str, now: OffsetDateTime) -> Option<String> {
    let ts = ts.trim();
    let at = OffsetDateTime::parse(ts, &Rfc3339)
        .ok()
        .or_else(|| PrimitiveDateTime::parse(ts, &Iso8601::DEFAULT).ok().map(|p| p.assume_utc()))?;
    let secs = (now - at).whole_seconds().max(0);
    Some(if secs < 60 {
        "NOW".to_string()
    } else if secs < 3600 {
        format!("{} MIN", secs / 60)
    } else if secs < 86_400 {
        format!("{} H", secs / 3600)
    } else {
        format!("{} D", secs / 86_400)
    })
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn display_handle(name: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("ia");
    name.to_lowercase().split_whitespace().collect::<Vec<_>>().join(".")
}
