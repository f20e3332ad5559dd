/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::account::{Account, Credentials};
use crate::origin::{LegacyHttp, Origin, OriginType};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_download_size: u64,
    pub max_redirects: u32,
    /// Attempts for idempotent GETs before the error reaches the command.
    pub get_attempts: u32,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            read_timeout_secs: 60,
            max_download_size: 50 * 1024 * 1024,
            max_redirects: 5,
            get_attempts: 3,
            user_agent: format!("polyfedi/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub heartbeat_secs: u64,
    pub retry_promotion_secs: u64,
    /// A retry-queued command waits at least this long before re-running.
    pub retry_min_backoff_secs: u64,
    pub max_retries: u32,
    pub max_command_execution_secs: u64,
    pub min_dwell_ms: u64,
    pub error_queue_capacity: usize,
    pub retry_queue_capacity: usize,
    pub error_retention_secs: u64,
    /// When false, background commands wait while the app is in foreground.
    pub sync_while_in_foreground: bool,
    pub timeline_page_size: usize,
    pub max_timeline_pages: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: 11,
            retry_promotion_secs: 900,
            retry_min_backoff_secs: 300,
            max_retries: 5,
            max_command_execution_secs: 15 * 60,
            min_dwell_ms: 2_000,
            error_queue_capacity: 300,
            retry_queue_capacity: 300,
            error_retention_secs: 10 * 24 * 3600,
            sync_while_in_foreground: true,
            timeline_page_size: 40,
            max_timeline_pages: 10,
        }
    }
}

impl SchedulerSettings {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn retry_promotion(&self) -> Duration {
        Duration::from_secs(self.retry_promotion_secs.max(1))
    }

    pub fn max_command_execution(&self) -> Duration {
        Duration::from_secs(self.max_command_execution_secs.max(1))
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_millis(self.min_dwell_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub origin_type: String,
    pub host: String,
    #[serde(default)]
    pub ssl: Option<bool>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub text_limit: Option<usize>,
    #[serde(default)]
    pub legacy_http: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Name of an entry in `origins`.
    pub origin: String,
    pub username: String,
    #[serde(default)]
    pub actor_oid: Option<String>,
    #[serde(default = "no_credentials")]
    pub credentials: Credentials,
}

fn no_credentials() -> Credentials {
    Credentials::None
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub origins: Vec<OriginConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl ServiceConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parse config json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir.trim())),
            _ => default_data_dir(),
        }
    }

    /// Origins get ids in declaration order, starting at 1.
    pub fn build_origins(&self) -> Result<Vec<Arc<Origin>>> {
        let mut out = Vec::with_capacity(self.origins.len());
        for (i, cfg) in self.origins.iter().enumerate() {
            let origin_type = OriginType::from_str(&cfg.origin_type)
                .with_context(|| format!("unknown origin type '{}' for {}", cfg.origin_type, cfg.name))?;
            let mut origin = Origin::new(i as i64 + 1, cfg.name.trim(), origin_type, cfg.host.as_str())
                .with_legacy_http(LegacyHttp::from_option(cfg.legacy_http));
            if let Some(ssl) = cfg.ssl {
                origin.ssl = ssl;
            }
            if let Some(base) = &cfg.api_base {
                origin.api_base = base.clone();
            }
            if let Some(limit) = cfg.text_limit {
                origin.text_limit = limit;
            }
            out.push(origin.into_shared());
        }
        Ok(out)
    }

    pub fn build_accounts(&self, origins: &[Arc<Origin>]) -> Result<Vec<Arc<Account>>> {
        let mut out = Vec::with_capacity(self.accounts.len());
        for cfg in &self.accounts {
            let origin = origins
                .iter()
                .find(|o| o.name == cfg.origin.trim())
                .with_context(|| format!("account {} refers to unknown origin '{}'", cfg.username, cfg.origin))?;
            let oid = cfg.actor_oid.clone().unwrap_or_default();
            out.push(Arc::new(Account::new(
                Arc::clone(origin),
                &cfg.username,
                &oid,
                cfg.credentials.clone(),
            )));
        }
        Ok(out)
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("POLYFEDI_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "polyfedi", "Polyfedi")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("POLYFEDI_CONFIG") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "polyfedi", "Polyfedi")
        .context("unable to determine platform config dir")?;
    Ok(proj.config_dir().join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "data_dir": "/tmp/polyfedi",
        "scheduler": { "heartbeat_secs": 5, "sync_while_in_foreground": false },
        "origins": [
            { "name": "social", "type": "mastodon", "host": "social.example" },
            { "name": "gs", "type": "gnusocial", "host": "gs.example", "ssl": false, "legacy_http": true }
        ],
        "accounts": [
            { "origin": "social", "username": "alice",
              "credentials": { "type": "oauth2", "access_token": "abc" } },
            { "origin": "gs", "username": "bob",
              "credentials": { "type": "basic", "username": "bob", "password": "pw" } }
        ]
    }"#;

    #[test]
    fn parses_and_fills_defaults() {
        let cfg = ServiceConfig::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.scheduler.heartbeat_secs, 5);
        assert!(!cfg.scheduler.sync_while_in_foreground);
        assert_eq!(cfg.scheduler.retry_promotion_secs, 900);
        assert_eq!(cfg.http.max_redirects, 5);
        assert_eq!(cfg.data_dir().unwrap(), PathBuf::from("/tmp/polyfedi"));
    }

    #[test]
    fn builds_origins_and_accounts() {
        let cfg = ServiceConfig::from_json(SAMPLE).unwrap();
        let origins = cfg.build_origins().unwrap();
        assert_eq!(origins[1].id, 2);
        assert_eq!(origins[1].base_url(), "http://gs.example");
        assert_eq!(origins[1].legacy_http(), LegacyHttp::Yes);
        let accounts = cfg.build_accounts(&origins).unwrap();
        assert_eq!(accounts[0].name, "alice@social");
        assert_eq!(accounts[0].actor.webfinger_id, "alice@social.example");
        assert!(matches!(accounts[1].credentials, Credentials::Basic { .. }));
    }

    #[test]
    fn rejects_unknown_origin_type() {
        let cfg = ServiceConfig::from_json(
            r#"{"origins":[{"name":"x","type":"gopher","host":"x.example"}]}"#,
        )
        .unwrap();
        assert!(cfg.build_origins().is_err());
    }
}
