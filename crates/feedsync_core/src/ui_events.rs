/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;

pub const KIND_TOAST_ERROR: &str = "toast_error";
pub const KIND_LOGIN_REQUIRED: &str = "login_required";
pub const KIND_NOTIFICATION: &str = "notification";
pub const KIND_MESSAGE: &str = "message";
pub const KIND_FEED_UPDATED: &str = "feed_updated";

fn now_ms_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Non-blocking notice for the host UI (toasts, login prompts, badges).
#[derive(Clone, Debug, Serialize)]
pub struct UiEvent {
    pub kind: String,
    pub ts_ms: u64,
    pub message: Option<String>,
    pub target: Option<String>,
}

impl UiEvent {
    pub fn new(kind: &str, message: Option<String>, target: Option<String>) -> Self {
        Self {
            kind: kind.to_string(),
            ts_ms: now_ms_u64(),
            message,
            target,
        }
    }

    pub fn toast_error(message: impl Into<String>, target: Option<String>) -> Self {
        Self::new(KIND_TOAST_ERROR, Some(message.into()), target)
    }

    pub fn login_required() -> Self {
        Self::new(
            KIND_LOGIN_REQUIRED,
            Some("Login to interact".to_string()),
            None,
        )
    }
}
