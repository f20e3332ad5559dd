/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use polyfedi_model::{Activity, ActivityType, Actor, Attachment, Note, TimelinePosition, TriState, Visibility};
use serde_json::Value;
use tracing::warn;

use super::{
    array_of, first_str, gnusocial, items_of, like_activity, opt_i64, parse_iso8601, parse_twitter_date, str_of,
    tri_of, with_query, ApiRoutine, Connection, NoteDraft, TimelinePage,
};
use crate::error::{ConnResult, ConnectionError};
use crate::http::RequestBody;
use crate::http_connection::HttpConnection;
use crate::origin::OriginType;
use crate::text;

/// Which dialect of the Twitter-shaped REST API the origin speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwitterFlavor {
    Twitter,
    GnuSocial,
}

fn twitter_path(routine: ApiRoutine) -> Option<&'static str> {
    use ApiRoutine::*;
    let path = match routine {
        VerifyCredentials => "account/verify_credentials.json",
        HomeTimeline => "statuses/home_timeline.json",
        NotificationsTimeline | MentionsTimeline => "statuses/mentions_timeline.json",
        ActorTimeline => "statuses/user_timeline.json",
        LikedTimeline => "favorites/list.json",
        SearchNotes => "search/tweets.json",
        SearchActors => "users/search.json",
        GetNote => "statuses/show.json",
        UpdateNote => "statuses/update.json",
        UploadMedia => "https://upload.twitter.com/1.1/media/upload.json",
        DestroyNote => "statuses/destroy/%id%.json",
        Announce => "statuses/retweet/%id%.json",
        UndoAnnounce => "statuses/unretweet/%id%.json",
        Like => "favorites/create.json",
        UndoLike => "favorites/destroy.json",
        Follow => "friendships/create.json",
        UndoFollow => "friendships/destroy.json",
        GetActor => "users/show.json",
        GetFriends => "friends/list.json",
        GetFriendsIds => "friends/ids.json",
        GetFollowers => "followers/list.json",
        GetFollowersIds => "followers/ids.json",
        PrivateNotes | PublicTimeline | GetConversation | UpdatePrivateNote | DownloadFile => return None,
    };
    Some(path)
}

pub struct TwitterConnection {
    http: HttpConnection,
    flavor: TwitterFlavor,
}

impl TwitterConnection {
    pub fn new(http: HttpConnection, flavor: TwitterFlavor) -> Self {
        Self { http, flavor }
    }

    fn api_path(&self, routine: ApiRoutine) -> Option<&'static str> {
        match self.flavor {
            TwitterFlavor::Twitter => twitter_path(routine),
            TwitterFlavor::GnuSocial => gnusocial::api_path(routine),
        }
    }

    fn url(&self, routine: ApiRoutine) -> ConnResult<String> {
        self.api_path(routine)
            .map(|p| self.http.api_url(p))
            .ok_or_else(|| ConnectionError::unsupported(routine))
    }

    fn url_for(&self, routine: ApiRoutine, oid: &str) -> ConnResult<String> {
        Ok(self.url(routine)?.replace("%id%", &urlencoding::encode(oid)))
    }

    fn origin_id(&self) -> i64 {
        self.http.account().origin_id()
    }

    fn is_twitter(&self) -> bool {
        self.flavor == TwitterFlavor::Twitter
    }

    fn actor_query(actor: &Actor) -> (&'static str, String) {
        if actor.oid.is_empty() {
            ("screen_name", actor.username.clone())
        } else {
            ("user_id", actor.oid.clone())
        }
    }

    pub(crate) fn actor_from_json(&self, v: &Value) -> Actor {
        let mut a = Actor::new(self.origin_id(), first_str(v, &["id_str", "id"]));
        a.username = str_of(v, "screen_name");
        a.real_name = str_of(v, "name");
        a.summary = str_of(v, "description");
        a.homepage = str_of(v, "url");
        a.avatar_url = first_str(v, &["profile_image_url_https", "profile_image_url"]);
        a.banner_url = str_of(v, "profile_banner_url");
        a.notes_count = opt_i64(v, "statuses_count");
        a.favorites_count = opt_i64(v, "favourites_count");
        a.following_count = opt_i64(v, "friends_count");
        a.followers_count = opt_i64(v, "followers_count");
        a.created_date = self.parse_date(&str_of(v, "created_at"));
        let host = match self.flavor {
            TwitterFlavor::Twitter => {
                if !a.username.is_empty() {
                    a.profile_url = format!("https://twitter.com/{}", a.username);
                }
                "twitter.com".to_string()
            }
            TwitterFlavor::GnuSocial => {
                a.profile_url = str_of(v, "statusnet_profile_url");
                gnusocial::profile_host(&a.profile_url).unwrap_or_else(|| self.http.account().origin.host.clone())
            }
        };
        a.fill_webfinger(&host);
        a
    }

    fn twitter_attachments(v: &Value) -> Vec<Attachment> {
        let media = v
            .get("extended_entities")
            .or_else(|| v.get("entities"))
            .map(|e| array_of(e, "media"))
            .unwrap_or(&[]);
        media
            .iter()
            .filter_map(|m| match str_of(m, "type").as_str() {
                "video" | "animated_gif" => m
                    .get("video_info")
                    .map(|info| array_of(info, "variants"))
                    .and_then(|variants| {
                        variants
                            .iter()
                            .filter(|x| str_of(x, "content_type") == "video/mp4")
                            .max_by_key(|x| opt_i64(x, "bitrate").unwrap_or(0))
                    })
                    .map(|x| Attachment::new(str_of(x, "url"), "video/mp4")),
                _ => Some(Attachment::new(first_str(m, &["media_url_https", "media_url"]), "")),
            })
            .filter(Attachment::is_valid)
            .collect()
    }

    pub(crate) fn activity_from_json(&self, v: &Value) -> ConnResult<Activity> {
        let origin_id = self.origin_id();
        let oid = first_str(v, &["id_str", "id"]);
        if oid.is_empty() {
            return Err(ConnectionError::parse("status without id"));
        }
        let created = self.parse_date(&str_of(v, "created_at"));

        if let Some(rt) = v.get("retweeted_status").filter(|r| r.is_object()) {
            let inner = self.activity_from_json(rt)?;
            let actor = self.actor_from_json(&v["user"]);
            let mut a = Activity::wrapping(origin_id, ActivityType::Announce, actor, inner);
            a.oid = oid.clone();
            a.updated_date = created;
            a.timeline_position = TimelinePosition::new(oid);
            return Ok(a);
        }

        let private = v.get("sender").is_some_and(Value::is_object);
        let author = if private {
            self.actor_from_json(&v["sender"])
        } else {
            self.actor_from_json(&v["user"])
        };
        let mut note = Note::new(origin_id, &oid);
        note.author = author.clone();
        note.created_date = created;
        note.updated_date = created;

        let content = match self.flavor {
            TwitterFlavor::Twitter => {
                let screen = &author.username;
                if !screen.is_empty() {
                    note.url = format!("https://twitter.com/{screen}/status/{oid}");
                }
                note.attachments = Self::twitter_attachments(v);
                first_str(v, &["full_text", "text"])
            }
            TwitterFlavor::GnuSocial => {
                note.url = gnusocial::note_url(v);
                note.conversation_oid = gnusocial::conversation_oid(v);
                note.attachments = gnusocial::attachments(v);
                for actor in gnusocial::attentions(v, origin_id) {
                    note.audience.add(actor);
                }
                gnusocial::content(v)
            }
        };

        if private {
            note.audience.add(self.actor_from_json(&v["recipient"]));
            note.visibility = Visibility::Private;
        } else {
            note.audience.public = true;
            note.visibility = Visibility::Public;
        }
        if let Some(entities) = v.get("entities") {
            for m in array_of(entities, "user_mentions") {
                let mut actor = Actor::new(origin_id, first_str(m, &["id_str", "id"]));
                actor.username = str_of(m, "screen_name");
                actor.real_name = str_of(m, "name");
                if self.is_twitter() {
                    actor.fill_webfinger("twitter.com");
                }
                note.audience.add(actor);
            }
        }
        // GNU social lists no mentions for remote users; read them from the text.
        let origin = &self.http.account().origin;
        let host = if self.is_twitter() { "twitter.com" } else { origin.host.as_str() };
        let mut known = note.audience.actors.clone();
        known.push(author.clone());
        let rules = origin.origin_type.username_rules();
        for actor in text::extract_mentioned_actors(origin_id, host, &content, &rules, &known) {
            note.audience.add(actor);
        }

        let reply_to = first_str(v, &["in_reply_to_status_id_str", "in_reply_to_status_id"]);
        if !reply_to.is_empty() {
            let mut reply_author = Actor::new(origin_id, first_str(v, &["in_reply_to_user_id_str", "in_reply_to_user_id"]));
            reply_author.username = str_of(v, "in_reply_to_screen_name");
            note.set_in_reply_to(reply_author, reply_to);
        }
        note.favorited = tri_of(v, "favorited");
        note.reblogged = tri_of(v, "retweeted");
        note.likes_count = opt_i64(v, "favorite_count");
        note.reblogs_count = opt_i64(v, "retweet_count");
        note.sensitive = v.get("possibly_sensitive").and_then(Value::as_bool).unwrap_or(false);
        note.set_content(content);
        Ok(Activity::from_note(author, note))
    }

    fn activities_from(&self, items: &[Value]) -> Vec<Activity> {
        items
            .iter()
            .filter_map(|item| match self.activity_from_json(item) {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!(error = %e, "skipping unparsable status");
                    None
                }
            })
            .collect()
    }

    async fn upload_media(&self, draft: &NoteDraft) -> ConnResult<String> {
        let Some(file) = &draft.media else {
            return Ok(String::new());
        };
        let body = RequestBody::Multipart {
            fields: Vec::new(),
            file_field: "media".to_string(),
            file: file.clone(),
            content_type: draft.media_content_type(),
        };
        let v = self.http.post_file(ApiRoutine::UploadMedia, &self.url(ApiRoutine::UploadMedia)?, body).await?;
        let id = first_str(&v, &["media_id_string", "media_id"]);
        if id.is_empty() {
            return Err(ConnectionError::parse("upload response without media_id"));
        }
        Ok(id)
    }

    async fn post_private(&self, draft: &NoteDraft, recipient: &Actor) -> ConnResult<Activity> {
        let url = self.url(ApiRoutine::UpdatePrivateNote)?;
        let (key, value) = Self::actor_query(recipient);
        let form = vec![(key.to_string(), value), ("text".to_string(), draft.text.clone())];
        let v = self.http.post_form(ApiRoutine::UpdatePrivateNote, &url, form).await?;
        self.activity_from_json(&v)
    }

    async fn list_actors(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<Vec<Actor>> {
        let (key, value) = Self::actor_query(actor);
        let url = with_query(&self.url(routine)?, &[(key, value)]);
        let v = self.http.get_json(routine, &url).await?;
        Ok(items_of(&v, &["users"])?
            .iter()
            .map(|u| self.actor_from_json(u))
            .filter(|a| !a.is_empty())
            .collect())
    }

    async fn list_ids(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<Vec<String>> {
        let (key, value) = Self::actor_query(actor);
        let url = with_query(&self.url(routine)?, &[(key, value)]);
        let v = self.http.get_json(routine, &url).await?;
        Ok(items_of(&v, &["ids"])?
            .iter()
            .filter_map(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    async fn follow_request(&self, actor_oid: &str, follow: bool) -> ConnResult<Activity> {
        let routine = if follow {
            ApiRoutine::Follow
        } else {
            ApiRoutine::UndoFollow
        };
        let url = self.url(routine)?;
        let v = self
            .http
            .post_form(routine, &url, vec![("user_id".to_string(), actor_oid.to_string())])
            .await?;
        let me = self.http.account().actor.clone();
        let mut target = self.actor_from_json(&v);
        if target.oid.is_empty() {
            target.oid = actor_oid.to_string();
        }
        let follow_activity = Activity::with_actor_object(self.origin_id(), ActivityType::Follow, me.clone(), target);
        Ok(if follow {
            follow_activity
        } else {
            Activity::wrapping(self.origin_id(), ActivityType::Undo, me, follow_activity)
        })
    }
}

#[async_trait]
impl Connection for TwitterConnection {
    fn http(&self) -> &HttpConnection {
        &self.http
    }

    fn origin_type(&self) -> OriginType {
        match self.flavor {
            TwitterFlavor::Twitter => OriginType::Twitter,
            TwitterFlavor::GnuSocial => OriginType::GnuSocial,
        }
    }

    fn is_api_supported(&self, routine: ApiRoutine) -> bool {
        routine == ApiRoutine::DownloadFile || self.api_path(routine).is_some()
    }

    fn parse_date(&self, date: &str) -> i64 {
        match parse_twitter_date(date) {
            0 if self.flavor == TwitterFlavor::GnuSocial => parse_iso8601(date),
            millis => millis,
        }
    }

    async fn verify_credentials(&self) -> ConnResult<Actor> {
        let v = self
            .http
            .get_json(ApiRoutine::VerifyCredentials, &self.url(ApiRoutine::VerifyCredentials)?)
            .await?;
        let actor = self.actor_from_json(&v);
        if actor.oid.is_empty() {
            return Err(ConnectionError::parse("credentials response without user id"));
        }
        Ok(actor)
    }

    async fn get_timeline(
        &self,
        routine: ApiRoutine,
        youngest: &TimelinePosition,
        oldest: &TimelinePosition,
        limit: usize,
        actor: &Actor,
    ) -> ConnResult<TimelinePage> {
        let mut params: Vec<(&str, String)> = vec![
            ("count", limit.clamp(1, 200).to_string()),
            ("since_id", youngest.as_str().to_string()),
            ("max_id", oldest.as_str().to_string()),
        ];
        if routine == ApiRoutine::ActorTimeline {
            params.push(Self::actor_query(actor));
        }
        if self.is_twitter() {
            params.push(("tweet_mode", "extended".to_string()));
        }
        let url = with_query(&self.url(routine)?, &params);
        let v = self.http.get_json(routine, &url).await?;
        let items = items_of(&v, &["statuses"])?;
        Ok(TimelinePage::from_activities(self.activities_from(items), youngest, oldest))
    }

    async fn get_note(&self, oid: &str) -> ConnResult<Activity> {
        let mut params = vec![("id", oid.to_string())];
        if self.is_twitter() {
            params.push(("tweet_mode", "extended".to_string()));
        }
        let url = with_query(&self.url(ApiRoutine::GetNote)?, &params);
        let v = self.http.get_json(ApiRoutine::GetNote, &url).await?;
        self.activity_from_json(&v)
    }

    async fn get_conversation(&self, conversation_oid: &str) -> ConnResult<Vec<Activity>> {
        let url = self.url_for(ApiRoutine::GetConversation, conversation_oid)?;
        let v = self.http.get_json(ApiRoutine::GetConversation, &url).await?;
        Ok(self.activities_from(items_of(&v, &["statuses"])?))
    }

    async fn update_status(&self, draft: &NoteDraft) -> ConnResult<Activity> {
        if let Some(recipient) = &draft.recipient {
            return self.post_private(draft, recipient).await;
        }
        let mut fields = vec![("status".to_string(), draft.text.clone())];
        if !draft.in_reply_to_oid.is_empty() {
            fields.push(("in_reply_to_status_id".to_string(), draft.in_reply_to_oid.clone()));
        }
        let url = self.url(ApiRoutine::UpdateNote)?;
        let v = match (&draft.media, self.flavor) {
            (Some(file), TwitterFlavor::GnuSocial) => {
                let body = RequestBody::Multipart {
                    fields,
                    file_field: "media".to_string(),
                    file: file.clone(),
                    content_type: draft.media_content_type(),
                };
                self.http.post_file(ApiRoutine::UpdateNote, &url, body).await?
            }
            _ => {
                let media_id = self.upload_media(draft).await?;
                if !media_id.is_empty() {
                    fields.push(("media_ids".to_string(), media_id));
                }
                self.http.post_form(ApiRoutine::UpdateNote, &url, fields).await?
            }
        };
        self.activity_from_json(&v)
    }

    async fn destroy_status(&self, oid: &str) -> ConnResult<bool> {
        let url = self.url_for(ApiRoutine::DestroyNote, oid)?;
        self.http.post_form(ApiRoutine::DestroyNote, &url, Vec::new()).await?;
        Ok(true)
    }

    async fn post_reblog(&self, oid: &str) -> ConnResult<Activity> {
        let url = self.url_for(ApiRoutine::Announce, oid)?;
        let v = self.http.post_form(ApiRoutine::Announce, &url, Vec::new()).await?;
        self.activity_from_json(&v)
    }

    async fn undo_reblog(&self, oid: &str) -> ConnResult<Activity> {
        let url = self.url_for(ApiRoutine::UndoAnnounce, oid)?;
        let v = self.http.post_form(ApiRoutine::UndoAnnounce, &url, Vec::new()).await?;
        let mut note = self.activity_from_json(&v)?;
        if let Some(n) = note.note_mut() {
            n.reblogged = TriState::False;
        }
        let me = self.http.account().actor.clone();
        let announce = Activity::wrapping(self.origin_id(), ActivityType::Announce, me.clone(), note);
        Ok(Activity::wrapping(self.origin_id(), ActivityType::Undo, me, announce))
    }

    async fn create_favorite(&self, oid: &str) -> ConnResult<Activity> {
        let (url, form) = match self.flavor {
            TwitterFlavor::Twitter => (self.url(ApiRoutine::Like)?, vec![("id".to_string(), oid.to_string())]),
            TwitterFlavor::GnuSocial => (self.url_for(ApiRoutine::Like, oid)?, Vec::new()),
        };
        let v = self.http.post_form(ApiRoutine::Like, &url, form).await?;
        Ok(like_activity(&self.http.account().actor, self.activity_from_json(&v)?, true))
    }

    async fn destroy_favorite(&self, oid: &str) -> ConnResult<Activity> {
        let (url, form) = match self.flavor {
            TwitterFlavor::Twitter => (self.url(ApiRoutine::UndoLike)?, vec![("id".to_string(), oid.to_string())]),
            TwitterFlavor::GnuSocial => (self.url_for(ApiRoutine::UndoLike, oid)?, Vec::new()),
        };
        let v = self.http.post_form(ApiRoutine::UndoLike, &url, form).await?;
        Ok(like_activity(&self.http.account().actor, self.activity_from_json(&v)?, false))
    }

    async fn follow(&self, actor_oid: &str, follow: bool) -> ConnResult<Activity> {
        self.follow_request(actor_oid, follow).await
    }

    async fn get_actor(&self, actor: &Actor) -> ConnResult<Actor> {
        let url = with_query(&self.url(ApiRoutine::GetActor)?, &[Self::actor_query(actor)]);
        let v = self.http.get_json(ApiRoutine::GetActor, &url).await?;
        let found = self.actor_from_json(&v);
        if found.is_empty() {
            return Err(ConnectionError::parse("user response without id"));
        }
        Ok(found)
    }

    async fn get_friends(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        self.list_actors(ApiRoutine::GetFriends, actor).await
    }

    async fn get_followers(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        self.list_actors(ApiRoutine::GetFollowers, actor).await
    }

    async fn get_friends_ids(&self, actor: &Actor) -> ConnResult<Vec<String>> {
        self.list_ids(ApiRoutine::GetFriendsIds, actor).await
    }

    async fn get_followers_ids(&self, actor: &Actor) -> ConnResult<Vec<String>> {
        self.list_ids(ApiRoutine::GetFollowersIds, actor).await
    }

    async fn search_notes(&self, query: &str, limit: usize) -> ConnResult<Vec<Activity>> {
        let count_key = if self.is_twitter() { "count" } else { "rpp" };
        let url = with_query(
            &self.url(ApiRoutine::SearchNotes)?,
            &[("q", query.to_string()), (count_key, limit.clamp(1, 100).to_string())],
        );
        let v = self.http.get_json(ApiRoutine::SearchNotes, &url).await?;
        Ok(self.activities_from(items_of(&v, &["statuses", "results"])?))
    }

    async fn search_actors(&self, query: &str, limit: usize) -> ConnResult<Vec<Actor>> {
        let url = with_query(
            &self.url(ApiRoutine::SearchActors)?,
            &[("q", query.to_string()), ("count", limit.clamp(1, 20).to_string())],
        );
        let v = self.http.get_json(ApiRoutine::SearchActors, &url).await?;
        Ok(items_of(&v, &["users"])?
            .iter()
            .map(|u| self.actor_from_json(u))
            .filter(|a| !a.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Credentials;
    use crate::http_connection::tests::{test_account, test_settings, ScriptedExecutor};
    use crate::error::StatusCode;
    use serde_json::json;
    use std::sync::Arc;

    fn conn(flavor: TwitterFlavor, exec: &Arc<ScriptedExecutor>) -> TwitterConnection {
        let origin_type = match flavor {
            TwitterFlavor::Twitter => OriginType::Twitter,
            TwitterFlavor::GnuSocial => OriginType::GnuSocial,
        };
        let http = HttpConnection::new(test_account(origin_type, Credentials::None), exec.clone(), test_settings());
        TwitterConnection::new(http, flavor)
    }

    fn tweet(id: u64, text: &str) -> Value {
        json!({
            "id": id, "id_str": id.to_string(), "full_text": text,
            "created_at": "Wed Nov 27 09:27:01 -0300 2013",
            "user": {"id_str": "9", "screen_name": "bob", "name": "Bob"},
            "favorited": false, "retweet_count": 2,
            "entities": {"user_mentions": [{"id_str": "1", "screen_name": "alice"}]}
        })
    }

    #[test]
    fn parses_retweet_as_announce() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(TwitterFlavor::Twitter, &exec);
        let mut rt = tweet(20, "RT @bob: hello");
        rt["user"] = json!({"id_str": "1", "screen_name": "alice"});
        rt["retweeted_status"] = tweet(10, "hello");
        let a = c.activity_from_json(&rt).unwrap();
        assert_eq!(a.activity_type, ActivityType::Announce);
        assert_eq!(a.actor.username, "alice");
        assert_eq!(a.author().map(|x| x.username.as_str()), Some("bob"));
        let note = a.innermost_note().unwrap();
        assert_eq!(note.content, "hello");
        assert_eq!(note.created_date, 1_385_555_221_000);
        assert_eq!(note.url, "https://twitter.com/bob/status/10");
        assert!(note.audience.public);
        assert_eq!(a.timeline_position.as_str(), "20");
    }

    #[tokio::test]
    async fn timeline_pagination_terminates() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(json!([tweet(30, "c"), tweet(29, "b")]))
            .push_json(json!([tweet(29, "b"), tweet(28, "a")]))
            .push_json(json!([tweet(28, "a")]));
        let c = conn(TwitterFlavor::Twitter, &exec);
        let me = Actor::default();
        let mut oldest = TimelinePosition::empty();
        let mut fetched = Vec::new();
        for _ in 0..10 {
            let page = c
                .get_timeline(ApiRoutine::HomeTimeline, &TimelinePosition::empty(), &oldest, 20, &me)
                .await
                .unwrap();
            if page.oldest_position == oldest {
                assert!(page.is_empty());
                break;
            }
            fetched.extend(page.activities.iter().map(|a| a.oid.clone()));
            oldest = page.oldest_position;
        }
        assert_eq!(fetched, vec!["30", "29", "28"]);
        let urls: Vec<String> = exec.recorded().iter().map(|r| r.uri.clone()).collect();
        assert!(urls[1].contains("max_id=29"));
        assert!(urls[2].contains("max_id=28"));
        assert_eq!(urls.len(), 3);
    }

    #[tokio::test]
    async fn gnusocial_favorite_uses_id_path_and_dm_is_private() {
        let exec = Arc::new(ScriptedExecutor::default());
        let mut status = tweet(5, "x");
        status["favorited"] = json!(true);
        exec.push_json(status);
        exec.push_json(json!({
            "id": 77, "text": "psst", "created_at": "Wed Nov 27 09:27:01 -0300 2013",
            "sender": {"id": 9, "screen_name": "bob", "statusnet_profile_url": "https://gs.example/bob"},
            "recipient": {"id": 1, "screen_name": "alice", "statusnet_profile_url": "https://social.example/alice"}
        }));
        let c = conn(TwitterFlavor::GnuSocial, &exec);
        let like = c.create_favorite("5").await.unwrap();
        assert_eq!(like.activity_type, ActivityType::Like);
        assert_eq!(
            exec.recorded()[0].uri,
            "https://social.example/api/favorites/create/5.json"
        );

        let draft = NoteDraft {
            text: "psst".into(),
            recipient: Some(Actor::new(1, "1")),
            ..NoteDraft::default()
        };
        let dm = c.update_status(&draft).await.unwrap();
        let note = dm.note().unwrap();
        assert_eq!(note.visibility, Visibility::Private);
        assert_eq!(note.audience.actors[0].webfinger_id, "alice@social.example");
        assert_eq!(dm.actor.webfinger_id, "bob@gs.example");
    }

    #[test]
    fn gnusocial_mentions_come_from_the_text() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(TwitterFlavor::GnuSocial, &exec);
        let status = json!({
            "id": 8, "text": "@carol @@bob hi @dave@other.example",
            "created_at": "Wed Nov 27 09:27:01 -0300 2013",
            "user": {"id": 9, "screen_name": "erin", "statusnet_profile_url": "https://social.example/erin"}
        });
        let a = c.activity_from_json(&status).unwrap();
        let names: Vec<&str> = a
            .note()
            .unwrap()
            .audience
            .actors
            .iter()
            .map(|x| x.webfinger_id.as_str())
            .collect();
        assert_eq!(names, vec!["carol@social.example", "dave@other.example"]);
    }

    #[tokio::test]
    async fn unsupported_routines_fail_hard() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(TwitterFlavor::Twitter, &exec);
        assert!(!c.is_api_supported(ApiRoutine::PublicTimeline));
        let err = c.get_conversation("1").await.unwrap_err();
        assert_eq!(err.status, StatusCode::UnsupportedApi);
        assert!(err.is_hard());
        assert!(exec.recorded().is_empty());
    }
}
