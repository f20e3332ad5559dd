/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use http::Method;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::config::HttpSettings;
use crate::connection::ApiRoutine;
use crate::error::{ConnResult, ConnectionError, StatusCode};
use crate::http::{HttpExecutor, HttpRequest, ReadResult, RequestBody};
use crate::http_retry::send_with_retry;
use crate::oauth;
use crate::origin::LegacyHttp;

/// Authenticated HTTP for one account, shared by its connection adapter.
#[derive(Clone)]
pub struct HttpConnection {
    account: Arc<Account>,
    executor: Arc<dyn HttpExecutor>,
    settings: HttpSettings,
}

impl HttpConnection {
    pub fn new(account: Arc<Account>, executor: Arc<dyn HttpExecutor>, settings: HttpSettings) -> Self {
        Self {
            account,
            executor,
            settings,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    pub fn api_url(&self, path: &str) -> String {
        self.account.origin.api_url(path)
    }

    /// Runs `request` to completion: auth, protocol fallback, redirects and
    /// the download guards. Only an OK exchange is returned as `Ok`.
    pub async fn execute(&self, mut request: HttpRequest) -> ConnResult<ReadResult> {
        request.uri = request.uri.trim().to_string();
        if reqwest::Url::parse(&request.uri).is_err() {
            return Err(ConnectionError::malformed_url(&request.uri));
        }
        let origin = &self.account.origin;
        request.legacy_http = origin.legacy_http() == LegacyHttp::Yes;

        let mut redirected = false;
        let mut hops = 0u32;
        let mut tried_legacy = false;
        let mut tried_anonymous = false;
        loop {
            let result = self.send(&request).await?;
            match result.status {
                StatusCode::Ok => {
                    let mut result = result;
                    result.redirected = redirected;
                    if tried_legacy {
                        info!(origin = %origin.name, "legacy http works, remembering it");
                        origin.set_legacy_http(LegacyHttp::Yes);
                    }
                    self.check_download_size(&request, &result).await?;
                    return Ok(result);
                }
                StatusCode::LengthRequired
                    if !tried_legacy
                        && !request.legacy_http
                        && origin.legacy_http() == LegacyHttp::Unknown =>
                {
                    info!(origin = %origin.name, uri = %request.uri, "length required, retrying with legacy http");
                    tried_legacy = true;
                    request.legacy_http = true;
                }
                StatusCode::Moved => {
                    let Some(location) = result.location() else {
                        return Err(ConnectionError::hard(StatusCode::Moved, "no Location header on MOVED")
                            .with_uri(&request.uri));
                    };
                    hops += 1;
                    if hops > self.settings.max_redirects {
                        return Err(ConnectionError::hard(StatusCode::Moved, "too many redirects")
                            .with_uri(&request.uri));
                    }
                    let next = resolve_location(&request.uri, location)?;
                    debug!(from = %request.uri, to = %next, "following redirect");
                    if result.http_code == 303 && request.method != Method::GET {
                        request.method = Method::GET;
                        request.body = RequestBody::None;
                    }
                    request.uri = next;
                    redirected = true;
                }
                status if request.file_to.is_some() && request.authenticate && !tried_anonymous => {
                    warn!(uri = %request.uri, ?status, "authenticated download failed, retrying anonymously");
                    tried_anonymous = true;
                    request.authenticate = false;
                }
                status => {
                    return Err(ConnectionError::from_status(status, result.error_message()).with_uri(&request.uri));
                }
            }
        }
    }

    async fn send(&self, request: &HttpRequest) -> ConnResult<ReadResult> {
        let mut signed = request.clone();
        signed.remove_header("authorization");
        if signed.authenticate {
            if let Some(value) = oauth::authorization(
                &self.account.credentials,
                signed.method.as_str(),
                &signed.uri,
                signed.body.form_params(),
            )? {
                signed.set_header("authorization", value);
            }
        }
        let result = if signed.is_idempotent_read() {
            send_with_retry(self.executor.as_ref(), &signed, self.settings.get_attempts).await
        } else {
            self.executor.execute(&signed).await
        };
        match result.error {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    async fn check_download_size(&self, request: &HttpRequest, result: &ReadResult) -> ConnResult<()> {
        let (Some(path), Some(max)) = (&request.file_to, request.max_size) else {
            return Ok(());
        };
        let len = match result.file_len {
            Some(len) => len,
            None => tokio::fs::metadata(path)
                .await
                .map_err(|e| ConnectionError::from(e).with_uri(&request.uri))?
                .len(),
        };
        if len > max {
            let _ = tokio::fs::remove_file(path).await;
            return Err(ConnectionError::hard(
                StatusCode::RequestEntityTooLarge,
                format!("downloaded {len} bytes, limit is {max}"),
            )
            .with_uri(&request.uri));
        }
        Ok(())
    }

    pub async fn get_json(&self, routine: ApiRoutine, uri: &str) -> ConnResult<Value> {
        let req = HttpRequest::get(routine, uri).with_header("accept", "application/json");
        self.execute(req).await?.json()
    }

    pub async fn get_activity_json(&self, routine: ApiRoutine, uri: &str) -> ConnResult<Value> {
        let req = HttpRequest::get(routine, uri).with_header(
            "accept",
            "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
        );
        self.execute(req).await?.json()
    }

    pub async fn post_form(&self, routine: ApiRoutine, uri: &str, form: Vec<(String, String)>) -> ConnResult<Value> {
        let req = HttpRequest::post(routine, uri, RequestBody::Form(form)).with_header("accept", "application/json");
        self.execute(req).await?.json()
    }

    pub async fn post_json(&self, routine: ApiRoutine, uri: &str, body: Value) -> ConnResult<ReadResult> {
        let req = HttpRequest::post(routine, uri, RequestBody::Json(body)).with_header("accept", "application/json");
        self.execute(req).await
    }

    pub async fn delete(&self, routine: ApiRoutine, uri: &str) -> ConnResult<ReadResult> {
        let req = HttpRequest::new(routine, Method::DELETE, uri).with_header("accept", "application/json");
        self.execute(req).await
    }

    pub async fn post_file(&self, routine: ApiRoutine, uri: &str, body: RequestBody) -> ConnResult<Value> {
        let req = HttpRequest::post(routine, uri, body).with_header("accept", "application/json");
        self.execute(req).await?.json()
    }

    /// Downloads `uri` to `path`, returning the number of bytes written.
    pub async fn download_file(&self, uri: &str, path: &Path) -> ConnResult<u64> {
        let req = HttpRequest::download(uri, path, self.settings.max_download_size);
        let result = self.execute(req).await?;
        Ok(result.file_len.unwrap_or(0))
    }
}

fn resolve_location(base: &str, location: &str) -> ConnResult<String> {
    let base = reqwest::Url::parse(base).map_err(|_| ConnectionError::malformed_url(base))?;
    base.join(location)
        .map(|u| u.to_string())
        .map_err(|_| ConnectionError::malformed_url(location))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::account::Credentials;
    use crate::error::ErrorKind;
    use crate::origin::{Origin, OriginType};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request it sees.
    #[derive(Default)]
    pub(crate) struct ScriptedExecutor {
        responses: Mutex<VecDeque<ReadResult>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedExecutor {
        pub(crate) fn push(&self, code: u16, body: &str) -> &Self {
            let mut r = ReadResult::new("");
            r.http_code = code;
            r.status = StatusCode::from_http(code);
            r.body = body.to_string();
            self.responses.lock().unwrap().push_back(r);
            self
        }

        pub(crate) fn push_result(&self, r: ReadResult) -> &Self {
            self.responses.lock().unwrap().push_back(r);
            self
        }

        pub(crate) fn push_json(&self, body: Value) -> &Self {
            self.push(200, &body.to_string())
        }

        pub(crate) fn recorded(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpExecutor for ScriptedExecutor {
        async fn execute(&self, request: &HttpRequest) -> ReadResult {
            self.requests.lock().unwrap().push(request.clone());
            let mut r = self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                let mut r = ReadResult::new(&request.uri);
                r.error = Some(ConnectionError::soft("no scripted response"));
                r
            });
            r.request_uri = request.uri.clone();
            r.legacy_http = request.legacy_http;
            if let (Some(path), StatusCode::Ok) = (&request.file_to, r.status) {
                let data = r.body.clone().into_bytes();
                if let Err(e) = std::fs::write(path, &data) {
                    r.error = Some(ConnectionError::from(e));
                }
                r.file_len = Some(data.len() as u64);
                r.body.clear();
            }
            r
        }
    }

    pub(crate) fn test_account(origin_type: OriginType, credentials: Credentials) -> Arc<Account> {
        let origin = Origin::new(1, "test", origin_type, "social.example").into_shared();
        Arc::new(Account::new(origin, "alice", "alice-oid", credentials))
    }

    pub(crate) fn test_settings() -> HttpSettings {
        HttpSettings {
            get_attempts: 1,
            ..HttpSettings::default()
        }
    }

    fn connection(exec: &Arc<ScriptedExecutor>, credentials: Credentials) -> HttpConnection {
        let account = test_account(OriginType::GnuSocial, credentials);
        HttpConnection::new(account, exec.clone(), test_settings())
    }

    fn form_post() -> HttpRequest {
        HttpRequest::post(
            ApiRoutine::UpdateNote,
            "https://social.example/api/statuses/update.json",
            RequestBody::Form(vec![("status".into(), "hi".into())]),
        )
    }

    #[tokio::test]
    async fn length_required_falls_back_once_and_is_remembered() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push(411, "").push(200, "{}").push(200, "{}");
        let conn = connection(&exec, Credentials::None);

        conn.execute(form_post()).await.unwrap();
        assert_eq!(conn.account().origin.legacy_http(), LegacyHttp::Yes);
        conn.execute(form_post()).await.unwrap();

        let legacy: Vec<bool> = exec.recorded().iter().map(|r| r.legacy_http).collect();
        assert_eq!(legacy, vec![false, true, true]);
    }

    #[tokio::test]
    async fn length_required_under_legacy_is_hard() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push(411, "").push(411, "");
        let conn = connection(&exec, Credentials::None);
        let err = conn.execute(form_post()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::LengthRequired);
        assert!(err.is_hard());
        assert_eq!(exec.recorded().len(), 2);
        assert_eq!(conn.account().origin.legacy_http(), LegacyHttp::Unknown);
    }

    #[tokio::test]
    async fn follows_redirects_and_marks_result() {
        let exec = Arc::new(ScriptedExecutor::default());
        let mut moved = ReadResult::new("");
        moved.http_code = 301;
        moved.status = StatusCode::Moved;
        moved.headers.push(("Location".into(), "/api/v2/x".into()));
        exec.push_result(moved).push(200, r#"{"ok":true}"#);
        let conn = connection(&exec, Credentials::None);
        let r = conn
            .execute(HttpRequest::get(ApiRoutine::GetNote, "https://social.example/api/v1/x"))
            .await
            .unwrap();
        assert!(r.redirected);
        assert_eq!(exec.recorded()[1].uri, "https://social.example/api/v2/x");
    }

    #[tokio::test]
    async fn moved_without_location_is_hard() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push(302, "");
        let conn = connection(&exec, Credentials::None);
        let err = conn
            .execute(HttpRequest::get(ApiRoutine::GetNote, "https://social.example/x"))
            .await
            .unwrap_err();
        assert!(err.is_hard());
        assert_eq!(err.message, "no Location header on MOVED");
    }

    #[tokio::test]
    async fn download_retries_without_auth_then_enforces_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push(401, "").push(200, "0123456789");
        let conn = connection(
            &exec,
            Credentials::OAuth2 {
                access_token: "stale".into(),
            },
        );
        let req = HttpRequest::download("https://cdn.example/a.bin", &path, 4);
        let err = conn.execute(req).await.unwrap_err();
        assert_eq!(err.status, StatusCode::RequestEntityTooLarge);
        assert!(err.is_hard());
        assert!(!path.exists());

        let recorded = exec.recorded();
        assert!(recorded[0].headers.iter().any(|(k, _)| k == "authorization"));
        assert!(recorded[1].headers.is_empty());
    }

    #[tokio::test]
    async fn unreadable_download_fails_the_size_check() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::default());
        let conn = connection(&exec, Credentials::None);
        let req = HttpRequest::download("https://cdn.example/m.bin", dir.path().join("missing.bin"), 4);
        let err = conn
            .check_download_size(&req, &ReadResult::new(&req.uri))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Soft);
        assert_eq!(err.uri.as_deref(), Some("https://cdn.example/m.bin"));
    }

    #[tokio::test]
    async fn classifies_statuses() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push(404, r#"{"error":"Record not found"}"#).push(502, "");
        let conn = connection(&exec, Credentials::None);
        let not_found = conn
            .execute(HttpRequest::get(ApiRoutine::GetNote, "https://social.example/a"))
            .await
            .unwrap_err();
        assert!(not_found.is_hard());
        assert_eq!(not_found.message, "Record not found");
        let server = conn
            .execute(HttpRequest::get(ApiRoutine::GetNote, "https://social.example/b"))
            .await
            .unwrap_err();
        assert_eq!(server.kind, ErrorKind::Soft);
        let bad = conn
            .execute(HttpRequest::get(ApiRoutine::GetNote, "not a url"))
            .await
            .unwrap_err();
        assert_eq!(bad.status, StatusCode::MalformedUrl);
    }
}
