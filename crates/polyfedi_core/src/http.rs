/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Raw HTTP exchanges. Redirects, protocol fallback and auth live one layer up
//! in [`crate::http_connection`].

use anyhow::Context as _;
use async_trait::async_trait;
use futures_util::StreamExt as _;
use http::Method;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;

use crate::config::HttpSettings;
use crate::connection::ApiRoutine;
use crate::error::{ConnResult, ConnectionError, StatusCode};

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    None,
    Json(Value),
    Form(Vec<(String, String)>),
    /// Form fields plus one file part.
    Multipart {
        fields: Vec<(String, String)>,
        file_field: String,
        file: PathBuf,
        content_type: String,
    },
    /// The whole body is the file.
    File { file: PathBuf, content_type: String },
}

impl RequestBody {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Parameters that take part in an OAuth1 signature.
    pub fn form_params(&self) -> &[(String, String)] {
        match self {
            Self::Form(fields) => fields,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub routine: ApiRoutine,
    pub method: Method,
    pub uri: String,
    pub body: RequestBody,
    pub authenticate: bool,
    pub legacy_http: bool,
    /// Save a successful response body here instead of reading it as text.
    pub file_to: Option<PathBuf>,
    pub max_size: Option<u64>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(routine: ApiRoutine, method: Method, uri: impl Into<String>) -> Self {
        Self {
            routine,
            method,
            uri: uri.into(),
            body: RequestBody::None,
            authenticate: true,
            legacy_http: false,
            file_to: None,
            max_size: None,
            headers: Vec::new(),
        }
    }

    pub fn get(routine: ApiRoutine, uri: impl Into<String>) -> Self {
        Self::new(routine, Method::GET, uri)
    }

    pub fn post(routine: ApiRoutine, uri: impl Into<String>, body: RequestBody) -> Self {
        let mut req = Self::new(routine, Method::POST, uri);
        req.body = body;
        req
    }

    pub fn download(uri: impl Into<String>, to: impl Into<PathBuf>, max_size: u64) -> Self {
        let mut req = Self::get(ApiRoutine::DownloadFile, uri);
        req.file_to = Some(to.into());
        req.max_size = Some(max_size);
        req
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn is_idempotent_read(&self) -> bool {
        self.method == Method::GET && self.file_to.is_none()
    }
}

/// Outcome of one exchange. Transport failures are carried in `error`.
#[derive(Debug, Clone, Default)]
pub struct ReadResult {
    pub request_uri: String,
    pub http_code: u16,
    pub status: StatusCode,
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub redirected: bool,
    pub legacy_http: bool,
    pub file_len: Option<u64>,
    pub error: Option<ConnectionError>,
}

impl ReadResult {
    pub fn new(uri: &str) -> Self {
        Self {
            request_uri: uri.to_string(),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location").map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn json(&self) -> ConnResult<Value> {
        if self.body.trim().is_empty() {
            return Err(ConnectionError::parse("empty response body").with_uri(&self.request_uri));
        }
        serde_json::from_str(&self.body)
            .map_err(|e| ConnectionError::from(e).with_uri(&self.request_uri))
    }

    /// Best-effort human readable reason for a failed exchange.
    pub fn error_message(&self) -> String {
        if let Ok(v) = serde_json::from_str::<Value>(&self.body) {
            for key in ["error_description", "error", "message"] {
                if let Some(s) = v.get(key).and_then(|v| v.as_str()) {
                    return s.to_string();
                }
            }
            if let Some(s) = v
                .get("errors")
                .and_then(|v| v.get(0))
                .and_then(|v| v.get("message"))
                .and_then(|v| v.as_str())
            {
                return s.to_string();
            }
        }
        let body = self.body.trim();
        if body.is_empty() {
            return self.status_line.clone();
        }
        body.chars().take(200).collect()
    }
}

/// One raw request/response exchange.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> ReadResult;
}

pub struct ReqwestExecutor {
    modern: reqwest::Client,
    legacy: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(settings: &HttpSettings) -> anyhow::Result<Self> {
        let builder = || {
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
                .timeout(Duration::from_secs(settings.read_timeout_secs))
                .user_agent(settings.user_agent.clone())
        };
        let modern = builder().build().context("build http client")?;
        let legacy = builder()
            .http1_only()
            .pool_max_idle_per_host(0)
            .build()
            .context("build legacy http client")?;
        Ok(Self { modern, legacy })
    }

    async fn exchange(&self, request: &HttpRequest, result: &mut ReadResult) -> ConnResult<()> {
        let url = reqwest::Url::parse(&request.uri).map_err(|_| ConnectionError::malformed_url(&request.uri))?;
        let client = if request.legacy_http {
            &self.legacy
        } else {
            &self.modern
        };
        let mut builder = client.request(request.method.clone(), url);
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder = match &request.body {
            RequestBody::None => builder,
            RequestBody::Json(v) => builder.json(v),
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Multipart {
                fields,
                file_field,
                file,
                content_type,
            } => {
                let mut form = Form::new();
                for (k, v) in fields {
                    form = form.text(k.clone(), v.clone());
                }
                let part = file_part(file, content_type, request.legacy_http).await?;
                builder.multipart(form.part(file_field.clone(), part))
            }
            RequestBody::File { file, content_type } => {
                let body = if request.legacy_http {
                    reqwest::Body::from(tokio::fs::read(file).await?)
                } else {
                    reqwest::Body::from(tokio::fs::File::open(file).await?)
                };
                builder
                    .header(http::header::CONTENT_TYPE, content_type.as_str())
                    .body(body)
            }
        };

        let resp = builder.send().await.map_err(transport_error)?;
        result.http_code = resp.status().as_u16();
        result.status = StatusCode::from_http(result.http_code);
        result.status_line = format!("{:?} {}", resp.version(), resp.status());
        result.headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        match (&request.file_to, result.status) {
            (Some(path), StatusCode::Ok) => {
                result.file_len = Some(save_to_file(resp, path).await?);
            }
            _ => {
                result.body = resp.text().await.map_err(transport_error)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: &HttpRequest) -> ReadResult {
        let mut result = ReadResult::new(&request.uri);
        result.legacy_http = request.legacy_http;
        if let Err(e) = self.exchange(request, &mut result).await {
            result.error = Some(e.with_uri(&request.uri));
        }
        result
    }
}

/// Legacy framing needs a known length, so the file is buffered; otherwise it
/// is streamed and sent chunked.
async fn file_part(file: &Path, content_type: &str, legacy: bool) -> ConnResult<Part> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let part = if legacy {
        Part::bytes(tokio::fs::read(file).await?)
    } else {
        Part::stream(reqwest::Body::from(tokio::fs::File::open(file).await?))
    };
    part.file_name(name)
        .mime_str(content_type)
        .map_err(|e| ConnectionError::hard(StatusCode::BadRequest, format!("content type: {e}")))
}

async fn save_to_file(resp: reqwest::Response, path: &Path) -> ConnResult<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = resp.bytes_stream();
    let mut len = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transport_error)?;
        len += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(len)
}

fn transport_error(e: reqwest::Error) -> ConnectionError {
    if e.is_builder() {
        return ConnectionError::hard(StatusCode::MalformedUrl, format!("request: {e}"));
    }
    if e.is_timeout() {
        return ConnectionError::soft(format!("timeout: {e}"));
    }
    ConnectionError::soft(format!("transport: {e}"))
}
