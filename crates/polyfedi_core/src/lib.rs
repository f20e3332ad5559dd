/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod account;
pub mod command;
pub mod command_queue;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod executor;
pub mod http;
pub mod http_connection;
pub mod http_retry;
pub mod local_store;
pub mod oauth;
pub mod origin;
pub mod scheduler;
pub mod text;

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
