/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-origin protocol adapters behind one [`Connection`] trait.

mod activitypub;
mod gnusocial;
mod mastodon;
mod pumpio;
mod twitter;

pub use activitypub::ActivityPubConnection;
pub use mastodon::MastodonConnection;
pub use pumpio::PumpioConnection;
pub use twitter::{TwitterConnection, TwitterFlavor};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use polyfedi_model::{Activity, ActivityType, Actor, Note, TimelinePosition, TriState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::account::Account;
use crate::config::HttpSettings;
use crate::error::{ConnResult, ConnectionError};
use crate::http::HttpExecutor;
use crate::http_connection::HttpConnection;
use crate::origin::OriginType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiRoutine {
    VerifyCredentials,
    HomeTimeline,
    NotificationsTimeline,
    MentionsTimeline,
    PrivateNotes,
    ActorTimeline,
    LikedTimeline,
    PublicTimeline,
    SearchNotes,
    SearchActors,
    GetNote,
    GetConversation,
    UpdateNote,
    UpdatePrivateNote,
    UploadMedia,
    DestroyNote,
    Announce,
    UndoAnnounce,
    Like,
    UndoLike,
    Follow,
    UndoFollow,
    GetActor,
    GetFriends,
    GetFriendsIds,
    GetFollowers,
    GetFollowersIds,
    DownloadFile,
}

impl ApiRoutine {
    pub fn is_timeline(self) -> bool {
        matches!(
            self,
            Self::HomeTimeline
                | Self::NotificationsTimeline
                | Self::MentionsTimeline
                | Self::PrivateNotes
                | Self::ActorTimeline
                | Self::LikedTimeline
                | Self::PublicTimeline
                | Self::SearchNotes
        )
    }
}

/// One page of a timeline, newest first.
#[derive(Debug, Clone, Default)]
pub struct TimelinePage {
    pub activities: Vec<Activity>,
    pub youngest_position: TimelinePosition,
    pub oldest_position: TimelinePosition,
}

impl TimelinePage {
    /// Drops items equal to a request cursor and derives the page cursors.
    /// An empty page keeps the request cursors.
    pub fn from_activities(
        mut activities: Vec<Activity>,
        youngest: &TimelinePosition,
        oldest: &TimelinePosition,
    ) -> Self {
        activities.retain(|a| {
            let pos = &a.timeline_position;
            pos.is_empty() || (pos != youngest && pos != oldest)
        });
        let youngest_position = activities
            .iter()
            .map(|a| &a.timeline_position)
            .find(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| youngest.clone());
        let oldest_position = activities
            .iter()
            .rev()
            .map(|a| &a.timeline_position)
            .find(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| oldest.clone());
        Self {
            activities,
            youngest_position,
            oldest_position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

/// What the user wants to post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    /// Plain text; adapters convert it to whatever the origin expects.
    pub text: String,
    pub name: String,
    pub summary: String,
    pub in_reply_to_oid: String,
    /// Set for a private note to one actor.
    pub recipient: Option<Actor>,
    pub media: Option<std::path::PathBuf>,
    pub media_type: String,
    pub sensitive: bool,
}

impl NoteDraft {
    pub fn is_private(&self) -> bool {
        self.recipient.is_some()
    }

    pub fn media_content_type(&self) -> String {
        if !self.media_type.is_empty() {
            return self.media_type.clone();
        }
        self.media
            .as_ref()
            .and_then(|p| mime_guess::from_path(p).first())
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string())
    }
}

/// The capability surface every origin type offers. Routines an origin lacks
/// answer with an `UnsupportedApi` hard error.
#[async_trait]
pub trait Connection: Send + Sync {
    fn http(&self) -> &HttpConnection;

    fn origin_type(&self) -> OriginType;

    fn is_api_supported(&self, routine: ApiRoutine) -> bool;

    /// Epoch millis, 0 when `date` is not in the origin's format.
    fn parse_date(&self, date: &str) -> i64;

    fn account(&self) -> &Account {
        self.http().account()
    }

    fn ensure_supported(&self, routine: ApiRoutine) -> ConnResult<()> {
        if self.is_api_supported(routine) {
            Ok(())
        } else {
            Err(ConnectionError::unsupported(routine))
        }
    }

    async fn verify_credentials(&self) -> ConnResult<Actor>;

    async fn get_timeline(
        &self,
        routine: ApiRoutine,
        youngest: &TimelinePosition,
        oldest: &TimelinePosition,
        limit: usize,
        actor: &Actor,
    ) -> ConnResult<TimelinePage>;

    async fn get_note(&self, oid: &str) -> ConnResult<Activity>;

    async fn get_conversation(&self, _conversation_oid: &str) -> ConnResult<Vec<Activity>> {
        Err(ConnectionError::unsupported(ApiRoutine::GetConversation))
    }

    async fn update_status(&self, draft: &NoteDraft) -> ConnResult<Activity>;

    async fn destroy_status(&self, oid: &str) -> ConnResult<bool>;

    async fn post_reblog(&self, oid: &str) -> ConnResult<Activity>;

    async fn undo_reblog(&self, _oid: &str) -> ConnResult<Activity> {
        Err(ConnectionError::unsupported(ApiRoutine::UndoAnnounce))
    }

    async fn create_favorite(&self, oid: &str) -> ConnResult<Activity>;

    async fn destroy_favorite(&self, oid: &str) -> ConnResult<Activity>;

    async fn follow(&self, actor_oid: &str, follow: bool) -> ConnResult<Activity>;

    async fn get_actor(&self, actor: &Actor) -> ConnResult<Actor>;

    async fn get_friends(&self, _actor: &Actor) -> ConnResult<Vec<Actor>> {
        Err(ConnectionError::unsupported(ApiRoutine::GetFriends))
    }

    async fn get_followers(&self, _actor: &Actor) -> ConnResult<Vec<Actor>> {
        Err(ConnectionError::unsupported(ApiRoutine::GetFollowers))
    }

    async fn get_friends_ids(&self, _actor: &Actor) -> ConnResult<Vec<String>> {
        Err(ConnectionError::unsupported(ApiRoutine::GetFriendsIds))
    }

    async fn get_followers_ids(&self, _actor: &Actor) -> ConnResult<Vec<String>> {
        Err(ConnectionError::unsupported(ApiRoutine::GetFollowersIds))
    }

    async fn search_notes(&self, _query: &str, _limit: usize) -> ConnResult<Vec<Activity>> {
        Err(ConnectionError::unsupported(ApiRoutine::SearchNotes))
    }

    async fn search_actors(&self, _query: &str, _limit: usize) -> ConnResult<Vec<Actor>> {
        Err(ConnectionError::unsupported(ApiRoutine::SearchActors))
    }

    async fn download_file(&self, uri: &str, path: &Path) -> ConnResult<u64> {
        self.http().download_file(uri, path).await
    }
}

/// Builds the adapter for the account's origin type.
pub fn new_connection(
    account: Arc<Account>,
    executor: Arc<dyn HttpExecutor>,
    settings: HttpSettings,
) -> Box<dyn Connection> {
    let origin_type = account.origin.origin_type;
    let http = HttpConnection::new(account, executor, settings);
    match origin_type {
        OriginType::Twitter => Box::new(TwitterConnection::new(http, TwitterFlavor::Twitter)),
        OriginType::GnuSocial => Box::new(TwitterConnection::new(http, TwitterFlavor::GnuSocial)),
        OriginType::Pumpio => Box::new(PumpioConnection::new(http)),
        OriginType::Mastodon => Box::new(MastodonConnection::new(http)),
        OriginType::ActivityPub => Box::new(ActivityPubConnection::new(http)),
    }
}

/// `Tue Nov 27 09:27:01 -0300 2013`, as Twitter and GNU social send it.
pub fn parse_twitter_date(date: &str) -> i64 {
    DateTime::parse_from_str(date.trim(), "%a %b %d %H:%M:%S %z %Y")
        .map(|d| d.timestamp_millis())
        .unwrap_or(0)
}

/// RFC 3339, or the same without an offset (read as UTC).
pub fn parse_iso8601(date: &str) -> i64 {
    let date = date.trim();
    if date.is_empty() {
        return 0;
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(date) {
        return d.timestamp_millis();
    }
    NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|d| d.and_utc().timestamp_millis())
        .unwrap_or(0)
}

/// Appends encoded query parameters, skipping empty values.
pub(crate) fn with_query(url: &str, params: &[(&str, String)]) -> String {
    let query = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    if query.is_empty() {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}{query}")
}

pub(crate) fn str_of(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// First non-empty string among `keys`.
pub(crate) fn first_str(v: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| str_of(v, k))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

pub(crate) fn opt_i64(v: &Value, key: &str) -> Option<i64> {
    v.get(key).and_then(|n| n.as_i64())
}

pub(crate) fn tri_of(v: &Value, key: &str) -> TriState {
    TriState::from_option(v.get(key).and_then(|b| b.as_bool()))
}

pub(crate) fn array_of<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(|a| a.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// A JSON array at the top level or under one of `keys`.
pub(crate) fn items_of<'a>(v: &'a Value, keys: &[&str]) -> ConnResult<&'a [Value]> {
    if let Some(list) = v.as_array() {
        return Ok(list);
    }
    keys.iter()
        .find_map(|k| v.get(*k).and_then(|a| a.as_array()))
        .map(Vec::as_slice)
        .ok_or_else(|| ConnectionError::parse(format!("expected a list under {keys:?}")))
}

/// `Like` or `Undo(Like)` of `note_activity`'s note by `me`.
pub(crate) fn like_activity(me: &Actor, note_activity: Activity, like: bool) -> Activity {
    let origin_id = note_activity.origin_id;
    let mut note: Note = note_activity
        .innermost_note()
        .cloned()
        .unwrap_or_else(|| Note::forward_reference(origin_id, note_activity.oid.clone()));
    note.favorited = TriState::from_bool(like);
    let author = note.author.clone();
    let mut inner = Activity::from_note(author, note);
    inner.activity_type = ActivityType::Like;
    inner.actor = me.clone();
    inner.oid.clear();
    if like {
        inner
    } else {
        Activity::wrapping(origin_id, ActivityType::Undo, me.clone(), inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(pos: &str) -> Activity {
        let mut note = Note::new(1, pos);
        note.set_content(pos);
        Activity::from_note(Actor::new(1, "a"), note)
    }

    #[test]
    fn dates_never_panic() {
        assert_eq!(parse_twitter_date("Wed Nov 27 09:27:01 -0300 2013"), 1_385_555_221_000);
        assert_eq!(parse_iso8601("Wed Nov 27 09:27:01 -0300 2013"), 0);
        assert_eq!(parse_twitter_date("2013-11-27T12:27:01Z"), 0);
        assert_eq!(parse_iso8601("2013-11-27T12:27:01.000Z"), 1_385_555_221_000);
        assert_eq!(parse_iso8601("2013-11-27T12:27:01"), 1_385_555_221_000);
        assert_eq!(parse_iso8601(""), 0);
        assert_eq!(parse_iso8601("\u{0}garbage\u{ffff}"), 0);
    }

    #[test]
    fn page_drops_cursor_items_and_keeps_cursor_when_empty() {
        let youngest = TimelinePosition::new("10");
        let oldest = TimelinePosition::new("5");
        let page = TimelinePage::from_activities(vec![at("10"), at("9"), at("8")], &youngest, &oldest);
        assert_eq!(page.activities.len(), 2);
        assert_eq!(page.youngest_position.as_str(), "9");
        assert_eq!(page.oldest_position.as_str(), "8");

        let page = TimelinePage::from_activities(vec![at("5")], &TimelinePosition::empty(), &oldest);
        assert!(page.is_empty());
        assert_eq!(page.oldest_position, oldest);
    }

    #[test]
    fn query_skips_empty_values() {
        let url = with_query("https://x/a", &[("q", "a b".into()), ("max_id", String::new())]);
        assert_eq!(url, "https://x/a?q=a%20b");
        assert_eq!(with_query(&url, &[("n", "1".into())]), "https://x/a?q=a%20b&n=1");
    }

    #[test]
    fn like_wraps_note() {
        let me = Actor::new(1, "me");
        let liked = like_activity(&me, at("7"), true);
        assert_eq!(liked.activity_type, ActivityType::Like);
        assert!(liked.note().map(|n| n.favorited.is_true()).unwrap_or(false));
        let undone = like_activity(&me, at("7"), false);
        assert_eq!(undone.activity_type, ActivityType::Undo);
        assert_eq!(undone.innermost_note().map(|n| n.favorited), Some(TriState::False));
    }
}
