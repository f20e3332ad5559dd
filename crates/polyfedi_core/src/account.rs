/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use polyfedi_model::Actor;
use serde::Deserialize;
use std::sync::Arc;

use crate::origin::Origin;

#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    None,
    Basic {
        username: String,
        password: String,
    },
    #[serde(rename = "oauth1")]
    OAuth1 {
        consumer_key: String,
        consumer_secret: String,
        token: String,
        token_secret: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2 { access_token: String },
}

impl Credentials {
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Debug for Credentials {
    // Secrets stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::None => "None",
            Self::Basic { .. } => "Basic",
            Self::OAuth1 { .. } => "OAuth1",
            Self::OAuth2 { .. } => "OAuth2",
        };
        write!(f, "Credentials::{kind}")
    }
}

/// An authenticated identity on one origin.
#[derive(Debug, Clone)]
pub struct Account {
    /// Unique name, `username@origin-name`.
    pub name: String,
    pub origin: Arc<Origin>,
    pub actor: Actor,
    pub credentials: Credentials,
}

impl Account {
    pub fn new(origin: Arc<Origin>, username: &str, actor_oid: &str, credentials: Credentials) -> Self {
        let mut actor = Actor::new(origin.id, actor_oid);
        actor.username = username.trim().to_string();
        actor.fill_webfinger(&origin.host);
        Self {
            name: format!("{}@{}", actor.username, origin.name),
            origin,
            actor,
            credentials,
        }
    }

    pub fn origin_id(&self) -> i64 {
        self.origin.id
    }

    pub fn username(&self) -> &str {
        &self.actor.username
    }
}
