/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! pump.io: ActivityStreams 1.0 over OAuth1. Every write is an activity
//! posted to the user's feed.

use async_trait::async_trait;
use polyfedi_model::{
    html, Activity, ActivityType, Actor, ActorEndpointType, Attachment, Note, TimelinePosition, TriState, Visibility,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    array_of, first_str, items_of, opt_i64, parse_iso8601, str_of, with_query, ApiRoutine, Connection, NoteDraft,
    TimelinePage,
};
use crate::error::{ConnResult, ConnectionError};
use crate::http::RequestBody;
use crate::http_connection::HttpConnection;
use crate::origin::OriginType;

pub(crate) const PUBLIC_COLLECTION: &str = "http://activityschema.org/collection/public";

fn api_path(routine: ApiRoutine) -> Option<&'static str> {
    use ApiRoutine::*;
    let path = match routine {
        VerifyCredentials => "whoami",
        HomeTimeline => "user/%nickname%/inbox",
        NotificationsTimeline => "user/%nickname%/inbox/direct/minor",
        MentionsTimeline | PrivateNotes => "user/%nickname%/inbox/direct/major",
        ActorTimeline => "user/%nickname%/feed/major",
        LikedTimeline => "user/%nickname%/favorites",
        UpdateNote | UpdatePrivateNote | DestroyNote | Announce | UndoAnnounce | Like | UndoLike | Follow
        | UndoFollow => "user/%nickname%/feed",
        UploadMedia => "user/%nickname%/uploads",
        GetActor => "user/%nickname%/profile",
        GetFriends => "user/%nickname%/following",
        GetFollowers => "user/%nickname%/followers",
        // Objects are addressed by their own id URL.
        GetNote | GetConversation | DownloadFile => "",
        PublicTimeline | SearchNotes | SearchActors | GetFriendsIds | GetFollowersIds => return None,
    };
    Some(path)
}

/// `acct:bob@host` or a profile URL, reduced to the nickname.
fn nickname_of(oid: &str) -> String {
    let bare = oid.strip_prefix("acct:").unwrap_or(oid);
    match bare.split_once('@') {
        Some((user, _)) => user.to_string(),
        None => bare.rsplit('/').next().unwrap_or(bare).to_string(),
    }
}

fn host_of(oid: &str) -> Option<String> {
    let bare = oid.strip_prefix("acct:")?;
    bare.split_once('@').map(|(_, h)| h.to_ascii_lowercase())
}

pub struct PumpioConnection {
    http: HttpConnection,
}

impl PumpioConnection {
    pub fn new(http: HttpConnection) -> Self {
        Self { http }
    }

    fn origin_id(&self) -> i64 {
        self.http.account().origin_id()
    }

    fn url_for(&self, routine: ApiRoutine, nickname: &str) -> ConnResult<String> {
        let path = api_path(routine).ok_or_else(|| ConnectionError::unsupported(routine))?;
        Ok(self
            .http
            .api_url(&path.replace("%nickname%", &urlencoding::encode(nickname))))
    }

    fn my_url(&self, routine: ApiRoutine) -> ConnResult<String> {
        self.url_for(routine, self.http.account().username())
    }

    /// Users on another pump.io host are reached through that host's API.
    fn actor_url(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<String> {
        let nickname = if actor.username.is_empty() {
            nickname_of(&actor.oid)
        } else {
            actor.username.clone()
        };
        let url = self.url_for(routine, &nickname)?;
        let own_host = &self.http.account().origin.host;
        match host_of(&actor.oid) {
            Some(host) if !host.eq_ignore_ascii_case(own_host) => Ok(url.replacen(own_host.as_str(), &host, 1)),
            _ => Ok(url),
        }
    }

    pub(crate) fn actor_from_json(&self, v: &Value) -> Actor {
        let oid = str_of(v, "id");
        let mut a = Actor::new(self.origin_id(), &oid);
        a.username = first_str(v, &["preferredUsername"]);
        if a.username.is_empty() {
            a.username = nickname_of(&oid);
        }
        if let Some(host) = host_of(&oid) {
            a.webfinger_id = format!("{}@{}", a.username, host).to_lowercase();
        }
        a.real_name = str_of(v, "displayName");
        a.summary = str_of(v, "summary");
        a.profile_url = str_of(v, "url");
        a.avatar_url = str_of(&v["image"], "url");
        a.homepage = first_str(&v["location"], &["displayName"]);
        a.created_date = parse_iso8601(&str_of(v, "published"));
        a.updated_date = parse_iso8601(&str_of(v, "updated"));
        a.followers_count = opt_i64(&v["followers"], "totalItems");
        a.following_count = opt_i64(&v["following"], "totalItems");
        a.favorites_count = opt_i64(&v["favorites"], "totalItems");
        let links = &v["links"];
        a.set_endpoint(ActorEndpointType::Inbox, str_of(&links["activity-inbox"], "href"));
        a.set_endpoint(ActorEndpointType::Outbox, str_of(&links["activity-outbox"], "href"));
        a.set_endpoint(ActorEndpointType::Followers, str_of(&v["followers"], "url"));
        a.set_endpoint(ActorEndpointType::Following, str_of(&v["following"], "url"));
        a.set_endpoint(ActorEndpointType::Liked, str_of(&v["favorites"], "url"));
        a.set_endpoint(ActorEndpointType::Profile, a.profile_url.clone());
        a
    }

    fn is_person(v: &Value) -> bool {
        str_of(v, "objectType") == "person"
    }

    fn note_from_object(&self, v: &Value, fallback_author: &Actor) -> Note {
        let origin_id = self.origin_id();
        let mut note = Note::new(origin_id, str_of(v, "id"));
        note.author = match v.get("author").filter(|a| a.is_object()) {
            Some(a) => self.actor_from_json(a),
            None => fallback_author.clone(),
        };
        note.name = str_of(v, "displayName");
        note.url = str_of(v, "url");
        note.created_date = parse_iso8601(&str_of(v, "published"));
        note.updated_date = parse_iso8601(&str_of(v, "updated"));
        note.favorited = TriState::from_option(v.get("liked").and_then(Value::as_bool));
        note.reblogged = TriState::from_option(v["pump_io"].get("shared").and_then(Value::as_bool));
        note.likes_count = opt_i64(&v["likes"], "totalItems");
        note.reblogs_count = opt_i64(&v["shares"], "totalItems");
        note.replies_count = opt_i64(&v["replies"], "totalItems");
        if let Some(reply_to) = v.get("inReplyTo").filter(|r| r.is_object()) {
            let reply_author = reply_to
                .get("author")
                .filter(|a| a.is_object())
                .map(|a| self.actor_from_json(a))
                .unwrap_or_default();
            note.set_in_reply_to(reply_author, str_of(reply_to, "id"));
        }
        if str_of(v, "objectType") == "image" {
            let uri = first_str(&v["fullImage"], &["url"]);
            let uri = if uri.is_empty() { str_of(&v["image"], "url") } else { uri };
            let att = Attachment::new(uri, "image/*");
            if att.is_valid() {
                note.attachments.push(att);
            }
        }
        note.set_content(str_of(v, "content"));
        note
    }

    fn audience_into(&self, activity: &Value, note: &mut Note) {
        for key in ["to", "cc", "bto", "bcc"] {
            for r in array_of(activity, key) {
                let id = str_of(r, "id");
                if id == PUBLIC_COLLECTION {
                    note.audience.public = true;
                } else if str_of(r, "objectType") == "collection" {
                    note.audience.followers = true;
                } else if Self::is_person(r) {
                    note.audience.add(self.actor_from_json(r));
                }
            }
        }
        note.visibility = note.audience.visibility();
        if note.visibility == Visibility::Unknown {
            note.visibility = Visibility::Public;
        }
    }

    pub(crate) fn activity_from_json(&self, v: &Value) -> ConnResult<Activity> {
        let origin_id = self.origin_id();
        let verb = first_str(v, &["verb"]);
        let verb = if verb.is_empty() { "post".to_string() } else { verb };
        let actor = self.actor_from_json(&v["actor"]);
        let object = &v["object"];
        let oid = str_of(v, "id");
        let activity_type = ActivityType::from_as_name(&verb);

        let mut activity = match (verb.as_str(), str_of(object, "objectType").as_str()) {
            (_, "person") => {
                let target = self.actor_from_json(object);
                let follow = Activity::with_actor_object(origin_id, ActivityType::Follow, actor.clone(), target.clone());
                match activity_type {
                    ActivityType::Follow => follow,
                    ActivityType::Undo => Activity::wrapping(origin_id, ActivityType::Undo, actor, follow),
                    _ => Activity::with_actor_object(origin_id, activity_type, actor, target),
                }
            }
            ("share" | "unshare" | "favorite" | "unfavorite" | "like" | "unlike", _) => {
                let note = self.note_from_object(object, &Actor::default());
                let author = note.author.clone();
                let inner = Activity::from_note(author, note);
                let inner_type = if matches!(verb.as_str(), "share" | "unshare") {
                    ActivityType::Announce
                } else {
                    ActivityType::Like
                };
                let action = if inner_type == ActivityType::Like {
                    let mut like = inner;
                    like.activity_type = ActivityType::Like;
                    like.actor = actor.clone();
                    like.oid.clear();
                    if let Some(n) = like.note_mut() {
                        n.favorited = TriState::from_bool(verb != "unfavorite" && verb != "unlike");
                    }
                    like
                } else {
                    Activity::wrapping(origin_id, ActivityType::Announce, actor.clone(), inner)
                };
                if activity_type == ActivityType::Undo {
                    Activity::wrapping(origin_id, ActivityType::Undo, actor, action)
                } else {
                    action
                }
            }
            (_, "") => return Err(ConnectionError::parse(format!("activity {oid} without object"))),
            _ => {
                let mut note = self.note_from_object(object, &actor);
                self.audience_into(v, &mut note);
                let mut a = Activity::from_note(actor, note);
                a.activity_type = if activity_type == ActivityType::Empty {
                    ActivityType::Create
                } else {
                    activity_type
                };
                a
            }
        };
        if !oid.is_empty() {
            activity.oid = oid.clone();
            activity.timeline_position = TimelinePosition::new(oid);
        }
        activity.updated_date = parse_iso8601(&first_str(v, &["updated", "published"]));
        Ok(activity)
    }

    async fn post_activity(&self, routine: ApiRoutine, activity: Value) -> ConnResult<Activity> {
        let url = self.my_url(routine)?;
        debug!(verb = %activity["verb"], "posting pump.io activity");
        let v = self.http.post_json(routine, &url, activity).await?.json()?;
        self.activity_from_json(&v)
    }

    async fn note_action(&self, routine: ApiRoutine, verb: &str, oid: &str) -> ConnResult<Activity> {
        self.post_activity(
            routine,
            json!({ "verb": verb, "object": { "id": oid, "objectType": "note" } }),
        )
        .await
    }

    async fn upload_media(&self, draft: &NoteDraft) -> ConnResult<Option<Value>> {
        let Some(file) = &draft.media else {
            return Ok(None);
        };
        let body = RequestBody::File {
            file: file.clone(),
            content_type: draft.media_content_type(),
        };
        let v = self
            .http
            .post_file(ApiRoutine::UploadMedia, &self.my_url(ApiRoutine::UploadMedia)?, body)
            .await?;
        if str_of(&v, "id").is_empty() {
            return Err(ConnectionError::parse("upload response without id"));
        }
        Ok(Some(v))
    }

    async fn list_actors(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<Vec<Actor>> {
        let url = with_query(&self.actor_url(routine, actor)?, &[("count", "200".to_string())]);
        let v = self.http.get_json(routine, &url).await?;
        Ok(items_of(&v, &["items"])?
            .iter()
            .filter(|a| Self::is_person(a))
            .map(|a| self.actor_from_json(a))
            .collect())
    }
}

#[async_trait]
impl Connection for PumpioConnection {
    fn http(&self) -> &HttpConnection {
        &self.http
    }

    fn origin_type(&self) -> OriginType {
        OriginType::Pumpio
    }

    fn is_api_supported(&self, routine: ApiRoutine) -> bool {
        api_path(routine).is_some()
    }

    fn parse_date(&self, date: &str) -> i64 {
        parse_iso8601(date)
    }

    async fn verify_credentials(&self) -> ConnResult<Actor> {
        let url = self.http.api_url("whoami");
        let v = self.http.get_json(ApiRoutine::VerifyCredentials, &url).await?;
        let actor = self.actor_from_json(&v);
        if actor.oid.is_empty() {
            return Err(ConnectionError::parse("whoami response without id"));
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
        if !routine.is_timeline() {
            return Err(ConnectionError::unsupported(routine));
        }
        let base = if routine == ApiRoutine::ActorTimeline || routine == ApiRoutine::LikedTimeline {
            self.actor_url(routine, actor)?
        } else {
            self.my_url(routine)?
        };
        let url = with_query(
            &base,
            &[
                ("count", limit.clamp(1, 200).to_string()),
                ("since", youngest.as_str().to_string()),
                ("before", oldest.as_str().to_string()),
            ],
        );
        let v = self.http.get_json(routine, &url).await?;
        let mut activities = Vec::new();
        for item in items_of(&v, &["items"])? {
            // The favorites collection holds objects, not activities.
            let parsed = if routine == ApiRoutine::LikedTimeline {
                let note = self.note_from_object(item, &Actor::default());
                let author = note.author.clone();
                Ok(Activity::from_note(author, note))
            } else {
                self.activity_from_json(item)
            };
            match parsed {
                Ok(a) if routine == ApiRoutine::PrivateNotes && a.note().map(|n| n.visibility) == Some(Visibility::Public) => {}
                Ok(a) => activities.push(a),
                Err(e) => warn!(error = %e, "skipping unparsable item"),
            }
        }
        Ok(TimelinePage::from_activities(activities, youngest, oldest))
    }

    async fn get_note(&self, oid: &str) -> ConnResult<Activity> {
        let v = self.http.get_json(ApiRoutine::GetNote, oid).await?;
        let note = self.note_from_object(&v, &Actor::default());
        if note.oid.is_empty() {
            return Err(ConnectionError::parse("object without id"));
        }
        let author = note.author.clone();
        Ok(Activity::from_note(author, note))
    }

    /// The note followed by its replies collection.
    async fn get_conversation(&self, conversation_oid: &str) -> ConnResult<Vec<Activity>> {
        let v = self.http.get_json(ApiRoutine::GetConversation, conversation_oid).await?;
        let root = self.note_from_object(&v, &Actor::default());
        let mut out = vec![Activity::from_note(root.author.clone(), root)];
        let replies_url = str_of(&v["replies"], "url");
        let replies = if replies_url.is_empty() {
            v["replies"].clone()
        } else {
            self.http.get_json(ApiRoutine::GetConversation, &replies_url).await?
        };
        for r in array_of(&replies, "items") {
            let note = self.note_from_object(r, &Actor::default());
            out.push(Activity::from_note(note.author.clone(), note));
        }
        Ok(out)
    }

    async fn update_status(&self, draft: &NoteDraft) -> ConnResult<Activity> {
        let routine = if draft.is_private() {
            ApiRoutine::UpdatePrivateNote
        } else {
            ApiRoutine::UpdateNote
        };
        let content = html::text_to_html(&draft.text);
        let mut object = match self.upload_media(draft).await? {
            Some(uploaded) => uploaded,
            None => json!({ "objectType": if draft.in_reply_to_oid.is_empty() { "note" } else { "comment" } }),
        };
        object["content"] = json!(content);
        if !draft.name.is_empty() {
            object["displayName"] = json!(draft.name);
        }
        if !draft.in_reply_to_oid.is_empty() {
            object["inReplyTo"] = json!({ "id": draft.in_reply_to_oid, "objectType": "note" });
        }
        let me = &self.http.account().actor;
        let (to, cc) = match &draft.recipient {
            Some(r) => (json!([{ "objectType": "person", "id": r.oid }]), json!([])),
            None => {
                let followers = me
                    .endpoint(ActorEndpointType::Followers)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.http.api_url(&format!("user/{}/followers", me.username)));
                (
                    json!([{ "objectType": "collection", "id": PUBLIC_COLLECTION }]),
                    json!([{ "objectType": "collection", "id": followers }]),
                )
            }
        };
        let verb = if object.get("id").is_some() { "update" } else { "post" };
        let mut posted = self
            .post_activity(routine, json!({ "verb": verb, "object": object, "to": to, "cc": cc }))
            .await?;
        // An uploaded image is published by the update, but it reads as a new post.
        posted.activity_type = ActivityType::Create;
        Ok(posted)
    }

    async fn destroy_status(&self, oid: &str) -> ConnResult<bool> {
        self.note_action(ApiRoutine::DestroyNote, "delete", oid).await?;
        Ok(true)
    }

    async fn post_reblog(&self, oid: &str) -> ConnResult<Activity> {
        self.note_action(ApiRoutine::Announce, "share", oid).await
    }

    async fn undo_reblog(&self, oid: &str) -> ConnResult<Activity> {
        self.note_action(ApiRoutine::UndoAnnounce, "unshare", oid).await
    }

    async fn create_favorite(&self, oid: &str) -> ConnResult<Activity> {
        self.note_action(ApiRoutine::Like, "favorite", oid).await
    }

    async fn destroy_favorite(&self, oid: &str) -> ConnResult<Activity> {
        self.note_action(ApiRoutine::UndoLike, "unfavorite", oid).await
    }

    async fn follow(&self, actor_oid: &str, follow: bool) -> ConnResult<Activity> {
        let (routine, verb) = if follow {
            (ApiRoutine::Follow, "follow")
        } else {
            (ApiRoutine::UndoFollow, "stop-following")
        };
        self.post_activity(
            routine,
            json!({ "verb": verb, "object": { "id": actor_oid, "objectType": "person" } }),
        )
        .await
    }

    async fn get_actor(&self, actor: &Actor) -> ConnResult<Actor> {
        let url = self.actor_url(ApiRoutine::GetActor, actor)?;
        let v = self.http.get_json(ApiRoutine::GetActor, &url).await?;
        let found = self.actor_from_json(&v);
        if found.oid.is_empty() {
            return Err(ConnectionError::parse("profile without id"));
        }
        Ok(found)
    }

    async fn get_friends(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        self.list_actors(ApiRoutine::GetFriends, actor).await
    }

    async fn get_followers(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        self.list_actors(ApiRoutine::GetFollowers, actor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Credentials;
    use crate::error::StatusCode;
    use crate::http_connection::tests::{test_account, test_settings, ScriptedExecutor};
    use polyfedi_model::ObjectType;
    use std::sync::Arc;

    fn conn(exec: &Arc<ScriptedExecutor>) -> PumpioConnection {
        let account = test_account(
            OriginType::Pumpio,
            Credentials::OAuth1 {
                consumer_key: "ck".into(),
                consumer_secret: "cs".into(),
                token: "t".into(),
                token_secret: "ts".into(),
            },
        );
        PumpioConnection::new(HttpConnection::new(account, exec.clone(), test_settings()))
    }

    fn person(nick: &str, host: &str) -> Value {
        json!({"objectType": "person", "id": format!("acct:{nick}@{host}"), "preferredUsername": nick,
               "displayName": nick.to_uppercase(), "url": format!("https://{host}/{nick}")})
    }

    #[test]
    fn share_is_announce_of_post() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(&exec);
        let v = json!({
            "id": "https://social.example/api/activity/s1", "verb": "share",
            "published": "2014-01-01T10:00:00Z",
            "actor": person("bob", "social.example"),
            "object": {"objectType": "note", "id": "https://identi.ca/api/note/n1",
                       "author": person("carol", "identi.ca"), "content": "<p>hello</p>",
                       "published": "2013-12-31T10:00:00Z"}
        });
        let a = c.activity_from_json(&v).unwrap();
        assert_eq!(a.activity_type, ActivityType::Announce);
        assert_eq!(a.object_type(), ObjectType::Activity);
        assert_eq!(a.author().map(|x| x.webfinger_id.as_str()), Some("carol@identi.ca"));
        assert_eq!(a.actor.webfinger_id, "bob@social.example");
        assert_eq!(a.innermost_note().map(|n| n.content.as_str()), Some("<p>hello</p>"));
        assert_eq!(a.timeline_position.as_str(), "https://social.example/api/activity/s1");
    }

    #[test]
    fn audience_and_reply() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(&exec);
        let v = json!({
            "id": "a2", "verb": "post", "actor": person("bob", "social.example"),
            "to": [person("alice", "social.example")],
            "object": {"objectType": "comment", "id": "n2", "content": "hi",
                       "inReplyTo": {"id": "n1", "objectType": "note", "author": person("alice", "social.example")}}
        });
        let a = c.activity_from_json(&v).unwrap();
        let note = a.note().unwrap();
        assert_eq!(note.visibility, Visibility::Private);
        assert!(note.audience.contains_oid("acct:alice@social.example"));
        assert_eq!(note.in_reply_to_note().map(|n| n.oid.as_str()), Some("n1"));

        let public = json!({
            "id": "a3", "verb": "post", "actor": person("bob", "social.example"),
            "to": [{"objectType": "collection", "id": PUBLIC_COLLECTION}],
            "object": {"objectType": "note", "id": "n3", "content": "hi"}
        });
        assert_eq!(
            c.activity_from_json(&public).unwrap().note().map(|n| n.visibility),
            Some(Visibility::Public)
        );
    }

    #[tokio::test]
    async fn follow_posts_to_feed() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(json!({
            "id": "a4", "verb": "follow", "actor": person("alice", "social.example"),
            "object": person("erin", "other.example")
        }));
        let c = conn(&exec);
        let a = c.follow("acct:erin@other.example", true).await.unwrap();
        assert_eq!(a.activity_type, ActivityType::Follow);
        assert_eq!(a.object_actor().map(|x| x.username.as_str()), Some("erin"));
        let sent = exec.recorded();
        assert_eq!(sent[0].uri, "https://social.example/api/user/alice/feed");
        let RequestBody::Json(body) = &sent[0].body else {
            panic!("expected json body");
        };
        assert_eq!(body["verb"], "follow");
        assert!(sent[0].headers.iter().any(|(k, v)| k == "authorization" && v.starts_with("OAuth ")));
    }

    #[tokio::test]
    async fn remote_actor_uses_its_own_host() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(json!({"items": [person("x", "other.example")]}));
        let c = conn(&exec);
        let mut erin = Actor::new(1, "acct:erin@other.example");
        erin.username = "erin".into();
        let friends = c.get_friends(&erin).await.unwrap();
        assert_eq!(friends.len(), 1);
        assert!(exec.recorded()[0].uri.starts_with("https://other.example/api/user/erin/following"));
        let err = c.search_notes("x", 10).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UnsupportedApi);
    }
}
