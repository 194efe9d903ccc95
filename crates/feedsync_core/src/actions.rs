/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Named actions. Rendered markup only carries `data-action` names; the host
//! resolves them here.

use anyhow::{anyhow, Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::feed::FeedEngine;
use crate::optimistic::{OptimisticLayer, Toggle};
use crate::present::Fragment;

pub mod names {
    pub const LIKE: &str = "like";
    pub const SAVE: &str = "save";
    pub const FOLLOW: &str = "follow";
    pub const SHOW_ALL_COMMENTS: &str = "show_all_comments";
    pub const COMMENT: &str = "comment";
    pub const REPLY: &str = "reply";
    pub const LIKE_COMMENT: &str = "like_comment";
    pub const DELETE: &str = "delete";
    pub const LOAD_MORE: &str = "load_more";
}

/// `target` and `extra` come from the bound markup, `text` from user input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionArgs {
    pub target: String,
    pub extra: Option<String>,
    pub text: Option<String>,
}

impl ActionArgs {
    pub fn target(target: &str) -> Self {
        Self { target: target.to_string(), ..Self::default() }
    }

    fn text(&self) -> Result<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .context("text required")
    }

    fn extra(&self) -> Result<&str> {
        self.extra.as_deref().filter(|e| !e.is_empty()).context("missing data-extra")
    }
}

pub type ActionHandler = Arc<dyn Fn(ActionArgs) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ActionTable {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(ActionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .insert(name.to_string(), Arc::new(move |args| f(args).boxed()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    pub async fn dispatch(&self, name: &str, args: ActionArgs) -> Result<()> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown action: {name}"))?;
        handler(args).await
    }

    /// Action names bound by `fragments` that have no handler.
    pub fn unbound(&self, fragments: &[Fragment]) -> Vec<&'static str> {
        let mut missing: Vec<&'static str> = fragments
            .iter()
            .flat_map(|f| f.actions.iter().map(|a| a.action))
            .filter(|a| !self.contains(a))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }
}

/// Table wiring every action the presenter can bind.
pub fn default_table(
    engine: Arc<FeedEngine>,
    optimistic: Arc<OptimisticLayer>,
    page_size: u32,
) -> ActionTable {
    let mut t = ActionTable::new();

    for (name, toggle) in [
        (names::LIKE, Toggle::Like),
        (names::SAVE, Toggle::Save),
        (names::FOLLOW, Toggle::Follow),
    ] {
        let layer = optimistic.clone();
        t.register(name, move |args: ActionArgs| {
            let layer = layer.clone();
            async move {
                layer.toggle(toggle, &args.target).await;
                Ok(())
            }
        });
    }

    let e = engine.clone();
    t.register(names::SHOW_ALL_COMMENTS, move |args: ActionArgs| {
        let found = e.expand_comments(&args.target);
        async move {
            if !found {
                return Err(anyhow!("item not rendered: {}", args.target));
            }
            Ok(())
        }
    });

    let e = engine.clone();
    t.register(names::COMMENT, move |args: ActionArgs| {
        let e = e.clone();
        async move {
            let text = args.text()?.to_string();
            e.add_comment(&args.target, &text).await?;
            Ok(())
        }
    });

    let e = engine.clone();
    t.register(names::REPLY, move |args: ActionArgs| {
        let e = e.clone();
        async move {
            let text = args.text()?.to_string();
            e.add_reply(&args.target, args.extra()?, &text).await?;
            Ok(())
        }
    });

    let e = engine.clone();
    t.register(names::LIKE_COMMENT, move |args: ActionArgs| {
        let e = e.clone();
        async move {
            e.like_comment(&args.target, args.extra()?).await?;
            Ok(())
        }
    });

    let e = engine.clone();
    t.register(names::DELETE, move |args: ActionArgs| {
        let e = e.clone();
        async move {
            e.remove_item(&args.target).await?;
            Ok(())
        }
    });

    let e = engine;
    t.register(names::LOAD_MORE, move |_args: ActionArgs| {
        let e = e.clone();
        async move {
            e.load_more(page_size).await;
            Ok(())
        }
    });

    t
}
