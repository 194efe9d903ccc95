/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod actions;
pub mod api;
pub mod cache;
pub mod feed;
pub mod http_api;
pub mod http_retry;
pub mod net_metrics;
pub mod notifications;
pub mod optimistic;
pub mod present;
pub mod push;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod ui_events;
pub mod view;

#[cfg(test)]
mod testing;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
