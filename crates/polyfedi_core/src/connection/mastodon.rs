/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use polyfedi_model::{Activity, ActivityType, Actor, ActorEndpointType, Attachment, Note, TimelinePosition, TriState, Visibility};
use serde_json::{json, Value};
use tracing::warn;

use super::{
    array_of, first_str, items_of, like_activity, opt_i64, parse_iso8601, str_of, tri_of, with_query, ApiRoutine,
    Connection, NoteDraft, TimelinePage,
};
use crate::error::{ConnResult, ConnectionError};
use crate::http::{HttpRequest, RequestBody};
use crate::http_connection::HttpConnection;
use crate::origin::OriginType;

fn api_path(routine: ApiRoutine) -> Option<&'static str> {
    use ApiRoutine::*;
    let path = match routine {
        VerifyCredentials => "v1/accounts/verify_credentials",
        HomeTimeline => "v1/timelines/home",
        PublicTimeline => "v1/timelines/public",
        NotificationsTimeline | MentionsTimeline => "v1/notifications",
        ActorTimeline => "v1/accounts/%id%/statuses",
        LikedTimeline => "v1/favourites",
        SearchNotes | SearchActors => "v2/search",
        GetNote => "v1/statuses/%id%",
        GetConversation => "v1/statuses/%id%/context",
        UpdateNote | UpdatePrivateNote => "v1/statuses",
        UploadMedia => "v1/media",
        DestroyNote => "v1/statuses/%id%",
        Announce => "v1/statuses/%id%/reblog",
        UndoAnnounce => "v1/statuses/%id%/unreblog",
        Like => "v1/statuses/%id%/favourite",
        UndoLike => "v1/statuses/%id%/unfavourite",
        Follow => "v1/accounts/%id%/follow",
        UndoFollow => "v1/accounts/%id%/unfollow",
        GetActor => "v1/accounts/%id%",
        GetFriends => "v1/accounts/%id%/following",
        GetFollowers => "v1/accounts/%id%/followers",
        PrivateNotes | GetFriendsIds | GetFollowersIds | DownloadFile => return None,
    };
    Some(path)
}

pub struct MastodonConnection {
    http: HttpConnection,
}

impl MastodonConnection {
    pub fn new(http: HttpConnection) -> Self {
        Self { http }
    }

    fn origin_id(&self) -> i64 {
        self.http.account().origin_id()
    }

    fn host(&self) -> &str {
        &self.http.account().origin.host
    }

    fn url(&self, routine: ApiRoutine) -> ConnResult<String> {
        api_path(routine)
            .map(|p| self.http.api_url(p))
            .ok_or_else(|| ConnectionError::unsupported(routine))
    }

    fn url_for(&self, routine: ApiRoutine, id: &str) -> ConnResult<String> {
        Ok(self.url(routine)?.replace("%id%", &urlencoding::encode(id)))
    }

    pub(crate) fn actor_from_json(&self, v: &Value) -> Actor {
        let mut a = Actor::new(self.origin_id(), str_of(v, "id"));
        a.username = str_of(v, "username");
        let acct = str_of(v, "acct");
        a.webfinger_id = if acct.contains('@') {
            acct.to_lowercase()
        } else if !acct.is_empty() {
            format!("{acct}@{}", self.host()).to_lowercase()
        } else {
            String::new()
        };
        a.real_name = str_of(v, "display_name");
        a.summary = str_of(v, "note");
        a.profile_url = str_of(v, "url");
        a.avatar_url = first_str(v, &["avatar", "avatar_static"]);
        a.banner_url = first_str(v, &["header", "header_static"]);
        a.notes_count = opt_i64(v, "statuses_count");
        a.following_count = opt_i64(v, "following_count");
        a.followers_count = opt_i64(v, "followers_count");
        a.created_date = self.parse_date(&str_of(v, "created_at"));
        a.set_endpoint(ActorEndpointType::Profile, a.profile_url.clone());
        a.fill_webfinger(self.host());
        a
    }

    fn attachment_from_json(v: &Value) -> Attachment {
        let mime = match str_of(v, "type").as_str() {
            "image" => "image/*",
            "gifv" => "video/mp4",
            "video" => "video/*",
            "audio" => "audio/*",
            _ => "",
        };
        let mut att = Attachment::new(first_str(v, &["url", "remote_url"]), "");
        if att.media_type == polyfedi_model::MediaType::Unknown && !mime.is_empty() {
            att = Attachment::new(att.uri, mime);
        }
        att
    }

    /// A status, or a reblog wrapping one.
    pub(crate) fn activity_from_status(&self, v: &Value) -> ConnResult<Activity> {
        let origin_id = self.origin_id();
        let oid = str_of(v, "id");
        if oid.is_empty() {
            return Err(ConnectionError::parse("status without id"));
        }
        let actor = self.actor_from_json(&v["account"]);
        let created = self.parse_date(&str_of(v, "created_at"));

        if let Some(reblogged) = v.get("reblog").filter(|r| r.is_object()) {
            let inner = self.activity_from_status(reblogged)?;
            let mut a = Activity::wrapping(origin_id, ActivityType::Announce, actor, inner);
            a.oid = oid.clone();
            a.updated_date = created;
            a.timeline_position = TimelinePosition::new(oid);
            return Ok(a);
        }

        let mut note = Note::new(origin_id, &oid);
        note.author = actor.clone();
        note.summary = str_of(v, "spoiler_text");
        note.sensitive = v.get("sensitive").and_then(Value::as_bool).unwrap_or(false);
        note.url = first_str(v, &["url", "uri"]);
        note.created_date = created;
        note.updated_date = match self.parse_date(&str_of(v, "edited_at")) {
            0 => created,
            edited => edited,
        };
        note.visibility = match str_of(v, "visibility").as_str() {
            "public" | "unlisted" => Visibility::Public,
            "private" | "direct" => Visibility::Private,
            _ => Visibility::Unknown,
        };
        note.audience.public = note.visibility == Visibility::Public;
        note.audience.followers = str_of(v, "visibility") == "private";
        for m in array_of(v, "mentions") {
            let mut mentioned = Actor::new(origin_id, str_of(m, "id"));
            mentioned.username = str_of(m, "username");
            mentioned.profile_url = str_of(m, "url");
            let acct = str_of(m, "acct");
            if acct.contains('@') {
                mentioned.webfinger_id = acct.to_lowercase();
            }
            mentioned.fill_webfinger(self.host());
            note.audience.add(mentioned);
        }
        note.attachments = array_of(v, "media_attachments")
            .iter()
            .map(Self::attachment_from_json)
            .filter(Attachment::is_valid)
            .collect();
        let reply_to = str_of(v, "in_reply_to_id");
        if !reply_to.is_empty() {
            let reply_author = Actor::new(origin_id, str_of(v, "in_reply_to_account_id"));
            note.set_in_reply_to(reply_author, reply_to);
        }
        note.favorited = tri_of(v, "favourited");
        note.reblogged = tri_of(v, "reblogged");
        note.likes_count = opt_i64(v, "favourites_count");
        note.reblogs_count = opt_i64(v, "reblogs_count");
        note.replies_count = opt_i64(v, "replies_count");
        note.set_content(str_of(v, "content"));
        Ok(Activity::from_note(actor, note))
    }

    /// Notifications are positioned by their own id, not the status id.
    fn activity_from_notification(&self, v: &Value) -> ConnResult<Option<Activity>> {
        let origin_id = self.origin_id();
        let id = str_of(v, "id");
        let actor = self.actor_from_json(&v["account"]);
        let status = v.get("status").filter(|s| s.is_object());
        let mut activity = match (str_of(v, "type").as_str(), status) {
            ("mention", Some(s)) | ("status", Some(s)) | ("update", Some(s)) => self.activity_from_status(s)?,
            ("reblog", Some(s)) => {
                let inner = self.activity_from_status(s)?;
                Activity::wrapping(origin_id, ActivityType::Announce, actor, inner)
            }
            ("favourite", Some(s)) => {
                let mut liked = like_activity(&actor, self.activity_from_status(s)?, true);
                if let Some(n) = liked.note_mut() {
                    // The like is someone else's, not ours.
                    n.favorited = TriState::Unknown;
                }
                liked
            }
            ("follow", _) => Activity::with_actor_object(
                origin_id,
                ActivityType::Follow,
                actor,
                self.http.account().actor.clone(),
            ),
            (other, _) => {
                warn!(kind = other, "ignoring notification");
                return Ok(None);
            }
        };
        activity.updated_date = self.parse_date(&str_of(v, "created_at"));
        activity.oid = id.clone();
        activity.timeline_position = TimelinePosition::new(id);
        Ok(Some(activity))
    }

    async fn upload_media(&self, draft: &NoteDraft) -> ConnResult<Option<String>> {
        let Some(file) = &draft.media else {
            return Ok(None);
        };
        let body = RequestBody::Multipart {
            fields: Vec::new(),
            file_field: "file".to_string(),
            file: file.clone(),
            content_type: draft.media_content_type(),
        };
        let v = self.http.post_file(ApiRoutine::UploadMedia, &self.url(ApiRoutine::UploadMedia)?, body).await?;
        let id = str_of(&v, "id");
        if id.is_empty() {
            return Err(ConnectionError::parse("media response without id"));
        }
        Ok(Some(id))
    }

    async fn post_status_action(&self, routine: ApiRoutine, oid: &str) -> ConnResult<Activity> {
        let url = self.url_for(routine, oid)?;
        let v = self.http.post_json(routine, &url, json!({})).await?.json()?;
        self.activity_from_status(&v)
    }

    async fn list_actors(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<Vec<Actor>> {
        let url = with_query(&self.url_for(routine, &actor.oid)?, &[("limit", "80".to_string())]);
        let v = self.http.get_json(routine, &url).await?;
        Ok(items_of(&v, &[])?.iter().map(|a| self.actor_from_json(a)).collect())
    }

    async fn search(&self, kind: &str, query: &str, limit: usize) -> ConnResult<Value> {
        let routine = if kind == "accounts" {
            ApiRoutine::SearchActors
        } else {
            ApiRoutine::SearchNotes
        };
        let url = with_query(
            &self.url(routine)?,
            &[
                ("q", query.to_string()),
                ("type", kind.to_string()),
                ("limit", limit.clamp(1, 40).to_string()),
                ("resolve", "true".to_string()),
            ],
        );
        self.http.get_json(routine, &url).await
    }
}

#[async_trait]
impl Connection for MastodonConnection {
    fn http(&self) -> &HttpConnection {
        &self.http
    }

    fn origin_type(&self) -> OriginType {
        OriginType::Mastodon
    }

    fn is_api_supported(&self, routine: ApiRoutine) -> bool {
        routine == ApiRoutine::DownloadFile || api_path(routine).is_some()
    }

    fn parse_date(&self, date: &str) -> i64 {
        parse_iso8601(date)
    }

    async fn verify_credentials(&self) -> ConnResult<Actor> {
        let v = self
            .http
            .get_json(ApiRoutine::VerifyCredentials, &self.url(ApiRoutine::VerifyCredentials)?)
            .await?;
        let actor = self.actor_from_json(&v);
        if actor.oid.is_empty() {
            return Err(ConnectionError::parse("credentials response without id"));
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
        let base = if routine == ApiRoutine::ActorTimeline {
            self.url_for(routine, &actor.oid)?
        } else {
            self.url(routine)?
        };
        let mut params: Vec<(&str, String)> = vec![
            ("limit", limit.clamp(1, 40).to_string()),
            ("since_id", youngest.as_str().to_string()),
            ("max_id", oldest.as_str().to_string()),
        ];
        if routine == ApiRoutine::MentionsTimeline {
            params.push(("types[]", "mention".to_string()));
        }
        let url = with_query(&base, &params);
        let v = self.http.get_json(routine, &url).await?;
        let items = items_of(&v, &[])?;
        let notifications = matches!(routine, ApiRoutine::NotificationsTimeline | ApiRoutine::MentionsTimeline);
        let mut activities = Vec::with_capacity(items.len());
        for item in items {
            let parsed = if notifications {
                self.activity_from_notification(item)
            } else {
                self.activity_from_status(item).map(Some)
            };
            match parsed {
                Ok(Some(a)) => activities.push(a),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping unparsable item"),
            }
        }
        Ok(TimelinePage::from_activities(activities, youngest, oldest))
    }

    async fn get_note(&self, oid: &str) -> ConnResult<Activity> {
        let v = self.http.get_json(ApiRoutine::GetNote, &self.url_for(ApiRoutine::GetNote, oid)?).await?;
        self.activity_from_status(&v)
    }

    /// Ancestors, the note itself, then descendants.
    async fn get_conversation(&self, conversation_oid: &str) -> ConnResult<Vec<Activity>> {
        let url = self.url_for(ApiRoutine::GetConversation, conversation_oid)?;
        let v = self.http.get_json(ApiRoutine::GetConversation, &url).await?;
        let mut out = Vec::new();
        for s in array_of(&v, "ancestors") {
            out.push(self.activity_from_status(s)?);
        }
        out.push(self.get_note(conversation_oid).await?);
        for s in array_of(&v, "descendants") {
            out.push(self.activity_from_status(s)?);
        }
        Ok(out)
    }

    async fn update_status(&self, draft: &NoteDraft) -> ConnResult<Activity> {
        let routine = if draft.is_private() {
            ApiRoutine::UpdatePrivateNote
        } else {
            ApiRoutine::UpdateNote
        };
        let mut text = draft.text.clone();
        let mut body = json!({ "status": "", "sensitive": draft.sensitive });
        if let Some(recipient) = &draft.recipient {
            let handle = format!("@{}", recipient.unique_name());
            if !text.contains(&handle) {
                text = format!("{handle} {text}");
            }
            body["visibility"] = json!("direct");
        }
        body["status"] = json!(text);
        if !draft.in_reply_to_oid.is_empty() {
            body["in_reply_to_id"] = json!(draft.in_reply_to_oid);
        }
        if !draft.summary.is_empty() {
            body["spoiler_text"] = json!(draft.summary);
        }
        if let Some(media_id) = self.upload_media(draft).await? {
            body["media_ids"] = json!([media_id]);
        }
        let v = self.http.post_json(routine, &self.url(routine)?, body).await?.json()?;
        self.activity_from_status(&v)
    }

    async fn destroy_status(&self, oid: &str) -> ConnResult<bool> {
        self.http
            .delete(ApiRoutine::DestroyNote, &self.url_for(ApiRoutine::DestroyNote, oid)?)
            .await?;
        Ok(true)
    }

    async fn post_reblog(&self, oid: &str) -> ConnResult<Activity> {
        self.post_status_action(ApiRoutine::Announce, oid).await
    }

    async fn undo_reblog(&self, oid: &str) -> ConnResult<Activity> {
        let mut note = self.post_status_action(ApiRoutine::UndoAnnounce, oid).await?;
        if let Some(n) = note.note_mut() {
            n.reblogged = TriState::False;
        }
        let me = self.http.account().actor.clone();
        let announce = Activity::wrapping(self.origin_id(), ActivityType::Announce, me.clone(), note);
        Ok(Activity::wrapping(self.origin_id(), ActivityType::Undo, me, announce))
    }

    async fn create_favorite(&self, oid: &str) -> ConnResult<Activity> {
        let note = self.post_status_action(ApiRoutine::Like, oid).await?;
        Ok(like_activity(&self.http.account().actor, note, true))
    }

    async fn destroy_favorite(&self, oid: &str) -> ConnResult<Activity> {
        let note = self.post_status_action(ApiRoutine::UndoLike, oid).await?;
        Ok(like_activity(&self.http.account().actor, note, false))
    }

    async fn follow(&self, actor_oid: &str, follow: bool) -> ConnResult<Activity> {
        let routine = if follow {
            ApiRoutine::Follow
        } else {
            ApiRoutine::UndoFollow
        };
        let url = self.url_for(routine, actor_oid)?;
        let relationship = self.http.post_json(routine, &url, json!({})).await?.json()?;
        let following = relationship.get("following").and_then(Value::as_bool);
        let requested = relationship.get("requested").and_then(Value::as_bool).unwrap_or(false);
        if follow && following == Some(false) && !requested {
            return Err(ConnectionError::parse("follow was not applied"));
        }
        let me = self.http.account().actor.clone();
        let target = Actor::new(self.origin_id(), actor_oid);
        let activity = Activity::with_actor_object(self.origin_id(), ActivityType::Follow, me.clone(), target);
        Ok(if follow {
            activity
        } else {
            Activity::wrapping(self.origin_id(), ActivityType::Undo, me, activity)
        })
    }

    async fn get_actor(&self, actor: &Actor) -> ConnResult<Actor> {
        let v = if actor.oid.is_empty() {
            let url = with_query(
                &self.http.api_url("v1/accounts/lookup"),
                &[("acct", actor.unique_name().to_string())],
            );
            self.http.get_json(ApiRoutine::GetActor, &url).await?
        } else {
            self.http
                .get_json(ApiRoutine::GetActor, &self.url_for(ApiRoutine::GetActor, &actor.oid)?)
                .await?
        };
        let found = self.actor_from_json(&v);
        if found.oid.is_empty() {
            return Err(ConnectionError::parse("account response without id"));
        }
        Ok(found)
    }

    async fn get_friends(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        self.list_actors(ApiRoutine::GetFriends, actor).await
    }

    async fn get_followers(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        self.list_actors(ApiRoutine::GetFollowers, actor).await
    }

    async fn search_notes(&self, query: &str, limit: usize) -> ConnResult<Vec<Activity>> {
        let v = self.search("statuses", query, limit).await?;
        array_of(&v, "statuses").iter().map(|s| self.activity_from_status(s)).collect()
    }

    async fn search_actors(&self, query: &str, limit: usize) -> ConnResult<Vec<Actor>> {
        let v = self.search("accounts", query, limit).await?;
        Ok(array_of(&v, "accounts").iter().map(|a| self.actor_from_json(a)).collect())
    }

    async fn download_file(&self, uri: &str, path: &std::path::Path) -> ConnResult<u64> {
        // Media on Mastodon is public; the token is only useful on the origin host.
        let same_host = reqwest::Url::parse(uri)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(self.host())))
            .unwrap_or(false);
        if same_host {
            return self.http.download_file(uri, path).await;
        }
        let mut req = HttpRequest::download(uri, path, self.http.settings().max_download_size);
        req.authenticate = false;
        Ok(self.http.execute(req).await?.file_len.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Credentials;
    use crate::http_connection::tests::{test_account, test_settings, ScriptedExecutor};
    use polyfedi_model::ObjectType;
    use std::sync::Arc;

    fn conn(exec: &Arc<ScriptedExecutor>) -> MastodonConnection {
        let account = test_account(
            OriginType::Mastodon,
            Credentials::OAuth2 {
                access_token: "tok".into(),
            },
        );
        MastodonConnection::new(HttpConnection::new(account, exec.clone(), test_settings()))
    }

    fn status(id: &str, account: Value, content: &str) -> Value {
        json!({
            "id": id, "created_at": "2023-05-01T10:00:00.000Z", "visibility": "public",
            "account": account, "content": content, "url": format!("https://social.example/@x/{id}"),
            "favourited": false, "reblogged": false, "favourites_count": 3,
            "mentions": [{"id": "5", "username": "dave", "acct": "dave@other.example"}],
            "media_attachments": [{"type": "image", "url": "https://files.example/a.png"}]
        })
    }

    fn account(id: &str, name: &str) -> Value {
        json!({"id": id, "username": name, "acct": name, "display_name": name.to_uppercase()})
    }

    #[test]
    fn reblog_parses_to_announce_of_activity() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(&exec);
        let content = "<p>Hello <a href=\"https://x.example\">world</a> &amp; more</p>";
        let mut outer = status("200", account("2", "bob"), "");
        outer["reblog"] = status("100", account("1", "alice"), content);
        let a = c.activity_from_status(&outer).unwrap();
        assert_eq!(a.activity_type, ActivityType::Announce);
        assert_eq!(a.object_type(), ObjectType::Activity);
        let author = a.author().unwrap();
        assert!(!author.is_empty());
        assert!(!author.is_same(&a.actor));
        assert_eq!(author.webfinger_id, "alice@social.example");
        assert_eq!(a.actor.username, "bob");
        let note = a.innermost_note().unwrap();
        assert_eq!(note.content, content);
        assert_eq!(note.audience.actors[0].webfinger_id, "dave@other.example");
        assert_eq!(note.attachments[0].media_type, polyfedi_model::MediaType::Image);
        assert_eq!(a.timeline_position.as_str(), "200");
    }

    #[tokio::test]
    async fn notifications_are_positioned_by_notification_id() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(json!([
            {"id": "n9", "type": "favourite", "created_at": "2023-05-01T10:00:00Z",
             "account": account("3", "carol"), "status": status("1", account("1", "alice"), "x")},
            {"id": "n8", "type": "follow", "created_at": "2023-05-01T09:00:00Z", "account": account("4", "erin")},
            {"id": "n7", "type": "poll", "created_at": "2023-05-01T08:00:00Z", "account": account("4", "erin")}
        ]));
        let c = conn(&exec);
        let page = c
            .get_timeline(
                ApiRoutine::NotificationsTimeline,
                &TimelinePosition::empty(),
                &TimelinePosition::empty(),
                20,
                &Actor::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.activities.len(), 2);
        assert_eq!(page.activities[0].activity_type, ActivityType::Like);
        assert_eq!(page.activities[1].activity_type, ActivityType::Follow);
        assert_eq!(page.youngest_position.as_str(), "n9");
        assert_eq!(page.oldest_position.as_str(), "n8");
        let sent = &exec.recorded()[0];
        assert!(sent.headers.iter().any(|(k, v)| k == "authorization" && v == "Bearer tok"));
    }

    #[tokio::test]
    async fn private_note_is_direct_and_addressed() {
        let exec = Arc::new(ScriptedExecutor::default());
        let mut reply = status("300", account("1", "alice"), "<p>@bob@b.example hi</p>");
        reply["visibility"] = json!("direct");
        exec.push_json(reply);
        let c = conn(&exec);
        let mut bob = Actor::new(1, "2");
        bob.webfinger_id = "bob@b.example".into();
        let draft = NoteDraft {
            text: "hi".into(),
            recipient: Some(bob),
            ..NoteDraft::default()
        };
        let a = c.update_status(&draft).await.unwrap();
        assert_eq!(a.note().map(|n| n.visibility), Some(Visibility::Private));
        let sent = exec.recorded();
        let RequestBody::Json(body) = &sent[0].body else {
            panic!("expected json body");
        };
        assert_eq!(body["visibility"], "direct");
        assert_eq!(body["status"], "@bob@b.example hi");
    }
}
