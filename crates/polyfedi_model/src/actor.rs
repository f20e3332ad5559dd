/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{merge_count, merge_date, merge_str};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActorEndpointType {
    Profile,
    Inbox,
    Outbox,
    SharedInbox,
    Followers,
    Following,
    Liked,
    Banner,
}

/// An identity within one origin.
///
/// An actor is "partially defined" when only its identifiers are known, e.g.
/// when it was mentioned in a note but never fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub origin_id: i64,
    pub oid: String,
    pub username: String,
    pub webfinger_id: String,
    pub real_name: String,
    pub summary: String,
    pub profile_url: String,
    pub homepage: String,
    pub avatar_url: String,
    pub banner_url: String,
    pub notes_count: Option<i64>,
    pub favorites_count: Option<i64>,
    pub following_count: Option<i64>,
    pub followers_count: Option<i64>,
    pub created_date: i64,
    pub updated_date: i64,
    #[serde(default)]
    pub endpoints: BTreeMap<ActorEndpointType, Vec<String>>,
}

impl Actor {
    pub fn new(origin_id: i64, oid: impl Into<String>) -> Self {
        Self {
            origin_id,
            oid: oid.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn from_username(origin_id: i64, username: impl Into<String>) -> Self {
        Self {
            origin_id,
            username: username.into().trim().to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.oid.is_empty() && self.username.is_empty() && self.webfinger_id.is_empty()
    }

    /// True when nothing beyond identifiers is known about this actor.
    pub fn is_partially_defined(&self) -> bool {
        if self.oid.is_empty() || self.username.is_empty() {
            return true;
        }
        self.real_name.is_empty()
            && self.summary.is_empty()
            && self.profile_url.is_empty()
            && self.avatar_url.is_empty()
            && self.created_date == 0
            && self.updated_date == 0
            && self.notes_count.is_none()
            && self.followers_count.is_none()
    }

    /// `user@host` when known, the bare username otherwise.
    pub fn unique_name(&self) -> &str {
        if !self.webfinger_id.is_empty() {
            &self.webfinger_id
        } else {
            &self.username
        }
    }

    pub fn with_webfinger_host(mut self, host: &str) -> Self {
        self.fill_webfinger(host);
        self
    }

    pub fn fill_webfinger(&mut self, host: &str) {
        if self.webfinger_id.is_empty() && !self.username.is_empty() && !host.is_empty() {
            self.webfinger_id = format!("{}@{}", self.username, host).to_lowercase();
        }
    }

    pub fn endpoint(&self, ty: ActorEndpointType) -> Option<&str> {
        self.endpoints
            .get(&ty)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn set_endpoint(&mut self, ty: ActorEndpointType, url: impl Into<String>) {
        let url = url.into();
        if url.trim().is_empty() {
            return;
        }
        let list = self.endpoints.entry(ty).or_default();
        if !list.iter().any(|u| u == &url) {
            list.push(url);
        }
    }

    /// Same identity, by oid when both have one, else by webfinger or username.
    pub fn is_same(&self, other: &Actor) -> bool {
        if self.origin_id != other.origin_id {
            return false;
        }
        if !self.oid.is_empty() && !other.oid.is_empty() {
            return self.oid == other.oid;
        }
        if !self.webfinger_id.is_empty() && !other.webfinger_id.is_empty() {
            return self.webfinger_id.eq_ignore_ascii_case(&other.webfinger_id);
        }
        !self.username.is_empty() && self.username.eq_ignore_ascii_case(&other.username)
    }

    /// Field-level merge: known values in `other` win, absent ones never erase ours.
    pub fn merge_from(&mut self, other: &Actor) {
        if self.origin_id == 0 {
            self.origin_id = other.origin_id;
        }
        merge_str(&mut self.oid, &other.oid);
        merge_str(&mut self.username, &other.username);
        merge_str(&mut self.webfinger_id, &other.webfinger_id);
        merge_str(&mut self.real_name, &other.real_name);
        merge_str(&mut self.summary, &other.summary);
        merge_str(&mut self.profile_url, &other.profile_url);
        merge_str(&mut self.homepage, &other.homepage);
        merge_str(&mut self.avatar_url, &other.avatar_url);
        merge_str(&mut self.banner_url, &other.banner_url);
        merge_count(&mut self.notes_count, other.notes_count);
        merge_count(&mut self.favorites_count, other.favorites_count);
        merge_count(&mut self.following_count, other.following_count);
        merge_count(&mut self.followers_count, other.followers_count);
        if self.created_date == 0 {
            self.created_date = other.created_date;
        }
        merge_date(&mut self.updated_date, other.updated_date);
        for (ty, urls) in &other.endpoints {
            if !urls.is_empty() {
                self.endpoints.insert(*ty, urls.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_actor() -> Actor {
        let mut a = Actor::new(3, "https://mastodon.example/users/alice");
        a.username = "alice".to_string();
        a.real_name = "Alice A.".to_string();
        a.avatar_url = "https://mastodon.example/a.png".to_string();
        a.followers_count = Some(12);
        a.updated_date = 1_700_000_000_000;
        a.set_endpoint(ActorEndpointType::Inbox, "https://mastodon.example/users/alice/inbox");
        a
    }

    #[test]
    fn mentioned_actor_is_partial() {
        let a = Actor::from_username(3, "bob");
        assert!(a.is_partially_defined());
        assert!(!full_actor().is_partially_defined());
    }

    #[test]
    fn merge_never_regresses_to_empty() {
        let mut known = full_actor();
        let mut partial = Actor::new(3, "https://mastodon.example/users/alice");
        partial.username = "alice".to_string();
        known.merge_from(&partial);
        assert_eq!(known, full_actor());
    }

    #[test]
    fn merge_with_self_is_identity() {
        let mut a = full_actor();
        a.merge_from(&full_actor());
        assert_eq!(a, full_actor());
    }

    #[test]
    fn merge_takes_newer_values() {
        let mut a = full_actor();
        let mut newer = full_actor();
        newer.real_name = "Alice B.".to_string();
        newer.followers_count = Some(0);
        a.merge_from(&newer);
        assert_eq!(a.real_name, "Alice B.");
        assert_eq!(a.followers_count, Some(0));
    }

    #[test]
    fn same_actor_by_webfinger_without_oid() {
        let a = Actor::from_username(1, "carol").with_webfinger_host("Example.org");
        let mut b = Actor::default();
        b.origin_id = 1;
        b.webfinger_id = "carol@example.org".to_string();
        assert!(a.is_same(&b));
        assert_eq!(a.unique_name(), "carol@example.org");
    }
}
