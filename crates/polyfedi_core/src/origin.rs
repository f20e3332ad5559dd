/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::text::UsernameRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    Twitter,
    #[serde(alias = "gnu_social", alias = "statusnet")]
    GnuSocial,
    #[serde(alias = "pump.io")]
    Pumpio,
    Mastodon,
    #[serde(alias = "activity_pub")]
    ActivityPub,
}

impl OriginType {
    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "twitter" => Some(Self::Twitter),
            "gnusocial" | "gnu_social" | "gnu-social" | "statusnet" => Some(Self::GnuSocial),
            "pumpio" | "pump.io" | "pump" => Some(Self::Pumpio),
            "mastodon" => Some(Self::Mastodon),
            "activitypub" | "activity_pub" | "activity-pub" => Some(Self::ActivityPub),
            _ => None,
        }
    }

    /// Path prefix of the client API on the origin's host.
    pub fn default_api_base(self) -> &'static str {
        match self {
            Self::Twitter => "1.1/",
            Self::GnuSocial | Self::Pumpio | Self::Mastodon => "api/",
            Self::ActivityPub => "",
        }
    }

    pub fn default_text_limit(self) -> usize {
        match self {
            Self::Twitter => 280,
            Self::GnuSocial => 1000,
            Self::Pumpio => 5000,
            Self::Mastodon | Self::ActivityPub => 500,
        }
    }

    pub fn username_rules(self) -> UsernameRules {
        match self {
            Self::Twitter => UsernameRules {
                max_len: 15,
                allow_dot_dash: false,
            },
            Self::GnuSocial => UsernameRules {
                max_len: 64,
                allow_dot_dash: false,
            },
            Self::Pumpio => UsernameRules {
                max_len: 64,
                allow_dot_dash: true,
            },
            Self::Mastodon | Self::ActivityPub => UsernameRules {
                max_len: 30,
                allow_dot_dash: true,
            },
        }
    }
}

/// Whether an origin needs the legacy HTTP request framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacyHttp {
    Unknown,
    Yes,
    No,
}

impl LegacyHttp {
    fn to_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Yes => 1,
            Self::No => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Yes,
            2 => Self::No,
            _ => Self::Unknown,
        }
    }

    pub fn from_option(v: Option<bool>) -> Self {
        match v {
            Some(true) => Self::Yes,
            Some(false) => Self::No,
            None => Self::Unknown,
        }
    }
}

/// A server endpoint of one origin type.
///
/// The legacy-HTTP preference is shared by every connection to the origin and
/// updated last-writer-wins when a connection discovers it.
#[derive(Debug)]
pub struct Origin {
    pub id: i64,
    pub name: String,
    pub origin_type: OriginType,
    pub host: String,
    pub ssl: bool,
    pub api_base: String,
    pub text_limit: usize,
    legacy_http: AtomicU8,
}

impl Origin {
    pub fn new(id: i64, name: impl Into<String>, origin_type: OriginType, host: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            origin_type,
            host: host.into().trim().trim_end_matches('/').to_string(),
            ssl: true,
            api_base: origin_type.default_api_base().to_string(),
            text_limit: origin_type.default_text_limit(),
            legacy_http: AtomicU8::new(LegacyHttp::Unknown.to_u8()),
        }
    }

    pub fn with_legacy_http(self, v: LegacyHttp) -> Self {
        self.legacy_http.store(v.to_u8(), Ordering::Relaxed);
        self
    }

    pub fn legacy_http(&self) -> LegacyHttp {
        LegacyHttp::from_u8(self.legacy_http.load(Ordering::Relaxed))
    }

    pub fn set_legacy_http(&self, v: LegacyHttp) {
        self.legacy_http.store(v.to_u8(), Ordering::Relaxed);
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.host)
    }

    /// Absolute URL for an API path; absolute inputs are returned unchanged.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}{}",
            self.base_url(),
            self.api_base,
            path.trim_start_matches('/')
        )
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_prefixes_base() {
        let o = Origin::new(1, "m", OriginType::Mastodon, "mastodon.example/");
        assert_eq!(o.api_url("v1/timelines/home"), "https://mastodon.example/api/v1/timelines/home");
        assert_eq!(o.api_url("https://cdn.example/x"), "https://cdn.example/x");
    }

    #[test]
    fn legacy_preference_is_shared_state() {
        let o = Origin::new(1, "g", OriginType::GnuSocial, "gs.example").into_shared();
        assert_eq!(o.legacy_http(), LegacyHttp::Unknown);
        let other = Arc::clone(&o);
        other.set_legacy_http(LegacyHttp::Yes);
        assert_eq!(o.legacy_http(), LegacyHttp::Yes);
    }

    #[test]
    fn origin_type_names() {
        assert_eq!(OriginType::from_str("Pump.io"), Some(OriginType::Pumpio));
        assert_eq!(OriginType::from_str("statusnet"), Some(OriginType::GnuSocial));
        assert_eq!(OriginType::from_str("diaspora"), None);
    }
}
