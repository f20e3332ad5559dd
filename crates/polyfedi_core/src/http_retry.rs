/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{thread_rng, Rng};
use std::time::Duration;

use crate::http::{HttpExecutor, HttpRequest, ReadResult};

/// Sends an idempotent request, retrying 429/5xx and transport failures.
pub async fn send_with_retry(executor: &dyn HttpExecutor, request: &HttpRequest, attempts: u32) -> ReadResult {
    let max_attempts = attempts.clamp(1, 5);
    let mut backoff = Duration::from_millis(200);
    let mut attempt = 0;
    loop {
        let result = executor.execute(request).await;
        attempt += 1;
        if !should_retry(&result) || attempt >= max_attempts {
            return result;
        }
        tracing::debug!(uri = %request.uri, attempt, "retrying http request");
        sleep_with_jitter(backoff).await;
        backoff = backoff.saturating_mul(2).min(Duration::from_secs(5));
    }
}

fn should_retry(result: &ReadResult) -> bool {
    match &result.error {
        Some(e) => e.is_retryable(),
        None => result.http_code == 429 || (500..=599).contains(&result.http_code),
    }
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    let jitter = Duration::from_millis(jitter_ms);
    tokio::time::sleep(base + jitter).await;
}
