/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! ActivityPub client-to-server. Timelines are the actor's collections;
//! positions are collection page URLs.

use async_trait::async_trait;
use polyfedi_model::{
    html, Activity, ActivityType, Actor, ActorEndpointType, Attachment, Note, TimelinePosition, TriState, Visibility,
};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{
    array_of, first_str, like_activity, opt_i64, parse_iso8601, str_of, with_query, ApiRoutine, Connection, NoteDraft,
    TimelinePage,
};
use crate::error::{ConnResult, ConnectionError};
use crate::http::RequestBody;
use crate::http_connection::HttpConnection;
use crate::origin::OriginType;

const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

fn is_public(id: &str) -> bool {
    id == PUBLIC || id == "as:Public" || id == "Public"
}

fn is_url(s: &str) -> bool {
    s.starts_with("https://") || s.starts_with("http://")
}

/// A property that may be a bare id or an embedded object.
fn id_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Object(_) => first_str(v, &["id", "href"]),
        _ => String::new(),
    }
}

/// Values of a property that may be a single item or an array.
fn list_of(v: &Value, key: &str) -> Vec<Value> {
    match v.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(one) => vec![one.clone()],
    }
}

fn page_items(page: &Value) -> Vec<Value> {
    let ordered = list_of(page, "orderedItems");
    if ordered.is_empty() {
        list_of(page, "items")
    } else {
        ordered
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

fn routine_endpoint(routine: ApiRoutine) -> Option<ActorEndpointType> {
    use ApiRoutine::*;
    match routine {
        HomeTimeline | NotificationsTimeline | MentionsTimeline | PrivateNotes => Some(ActorEndpointType::Inbox),
        ActorTimeline => Some(ActorEndpointType::Outbox),
        LikedTimeline => Some(ActorEndpointType::Liked),
        GetFriends | GetFriendsIds => Some(ActorEndpointType::Following),
        GetFollowers | GetFollowersIds => Some(ActorEndpointType::Followers),
        UpdateNote | UpdatePrivateNote | DestroyNote | Announce | UndoAnnounce | Like | UndoLike | Follow
        | UndoFollow => Some(ActorEndpointType::Outbox),
        _ => None,
    }
}

pub struct ActivityPubConnection {
    http: HttpConnection,
    me: OnceCell<Actor>,
}

impl ActivityPubConnection {
    pub fn new(http: HttpConnection) -> Self {
        Self {
            http,
            me: OnceCell::new(),
        }
    }

    fn origin_id(&self) -> i64 {
        self.http.account().origin_id()
    }

    /// A reference to an actor known only by id; the nickname is guessed from the URL.
    fn actor_ref(&self, v: &Value) -> Actor {
        if v.is_object() {
            return self.actor_from_json(v);
        }
        let oid = id_of(v);
        let mut a = Actor::new(self.origin_id(), &oid);
        if let Some(last) = oid.trim_end_matches('/').rsplit('/').next() {
            if is_url(&oid) && !last.is_empty() {
                a.username = last.trim_start_matches('@').to_string();
            }
        }
        if let Some(host) = host_of(&oid) {
            a.fill_webfinger(&host);
        }
        a
    }

    pub(crate) fn actor_from_json(&self, v: &Value) -> Actor {
        let oid = str_of(v, "id");
        let mut a = Actor::new(self.origin_id(), &oid);
        a.username = str_of(v, "preferredUsername");
        a.real_name = str_of(v, "name");
        a.summary = str_of(v, "summary");
        a.profile_url = v.get("url").map(id_of).unwrap_or_default();
        a.avatar_url = v.get("icon").map(|i| first_str(i, &["url"])).unwrap_or_default();
        a.banner_url = v.get("image").map(|i| first_str(i, &["url"])).unwrap_or_default();
        a.created_date = parse_iso8601(&str_of(v, "published"));
        a.updated_date = parse_iso8601(&str_of(v, "updated"));
        if let Some(host) = host_of(&oid) {
            a.fill_webfinger(&host);
        }
        for (ty, key) in [
            (ActorEndpointType::Inbox, "inbox"),
            (ActorEndpointType::Outbox, "outbox"),
            (ActorEndpointType::Followers, "followers"),
            (ActorEndpointType::Following, "following"),
            (ActorEndpointType::Liked, "liked"),
        ] {
            a.set_endpoint(ty, v.get(key).map(id_of).unwrap_or_default());
        }
        a.set_endpoint(ActorEndpointType::SharedInbox, str_of(&v["endpoints"], "sharedInbox"));
        a.set_endpoint(ActorEndpointType::Profile, a.profile_url.clone());
        a.set_endpoint(ActorEndpointType::Banner, a.banner_url.clone());
        // Embedded collection summaries carry counts.
        a.followers_count = opt_i64(&v["followers"], "totalItems");
        a.following_count = opt_i64(&v["following"], "totalItems");
        a.notes_count = opt_i64(&v["outbox"], "totalItems");
        a
    }

    fn note_from_object(&self, v: &Value, fallback_author: &Actor) -> Note {
        let origin_id = self.origin_id();
        let mut note = Note::new(origin_id, id_of(v));
        if !v.is_object() {
            note.author = fallback_author.clone();
            return note;
        }
        note.author = match v.get("attributedTo") {
            Some(a) if !id_of(a).is_empty() || a.is_object() => self.actor_ref(a),
            _ => fallback_author.clone(),
        };
        note.name = str_of(v, "name");
        note.summary = str_of(v, "summary");
        note.sensitive = v.get("sensitive").and_then(Value::as_bool).unwrap_or(false);
        note.url = v.get("url").map(id_of).unwrap_or_default();
        note.conversation_oid = first_str(v, &["context", "conversation"]);
        note.created_date = parse_iso8601(&str_of(v, "published"));
        note.updated_date = parse_iso8601(&str_of(v, "updated"));
        if let Some(reply_to) = v.get("inReplyTo") {
            let reply_oid = id_of(reply_to);
            let reply_author = reply_to.get("attributedTo").map(|a| self.actor_ref(a)).unwrap_or_default();
            note.set_in_reply_to(reply_author, reply_oid);
        }
        self.audience_into(v, &mut note);
        for tag in list_of(v, "tag") {
            if str_of(&tag, "type") != "Mention" {
                continue;
            }
            let mut mentioned = Actor::new(origin_id, str_of(&tag, "href"));
            let name = str_of(&tag, "name");
            let name = name.trim_start_matches('@');
            match name.split_once('@') {
                Some((user, host)) => {
                    mentioned.username = user.to_string();
                    mentioned.webfinger_id = format!("{user}@{host}").to_lowercase();
                }
                None => mentioned.username = name.to_string(),
            }
            note.audience.add(mentioned);
        }
        note.attachments = list_of(v, "attachment")
            .iter()
            .map(|a| {
                let uri = a.get("url").map(id_of).unwrap_or_default();
                Attachment::new(uri, str_of(a, "mediaType"))
            })
            .filter(Attachment::is_valid)
            .collect();
        note.likes_count = opt_i64(&v["likes"], "totalItems");
        note.reblogs_count = opt_i64(&v["shares"], "totalItems");
        note.replies_count = opt_i64(&v["replies"], "totalItems");
        note.set_content(str_of(v, "content"));
        note
    }

    /// `to`/`cc` of an object or its activity.
    fn audience_into(&self, v: &Value, note: &mut Note) {
        let followers = note
            .author
            .endpoint(ActorEndpointType::Followers)
            .map(str::to_string);
        for key in ["to", "cc", "bto", "bcc", "audience"] {
            for r in list_of(v, key) {
                let id = id_of(&r);
                if id.is_empty() {
                    continue;
                }
                if is_public(&id) {
                    note.audience.public = true;
                } else if followers.as_deref() == Some(id.as_str()) || id.ends_with("/followers") {
                    note.audience.followers = true;
                } else {
                    note.audience.add(self.actor_ref(&r));
                }
            }
        }
        note.visibility = note.audience.visibility();
    }

    pub(crate) fn activity_from_json(&self, v: &Value) -> ConnResult<Activity> {
        if !v.is_object() {
            return Err(ConnectionError::parse(format!("expected an object, got {v}")));
        }
        let origin_id = self.origin_id();
        let ty = str_of(v, "type");
        let oid = str_of(v, "id");
        let activity_type = ActivityType::from_as_name(&ty);
        let actor = v.get("actor").map(|a| self.actor_ref(a)).unwrap_or_default();
        let object = v.get("object").cloned().unwrap_or(Value::Null);

        let mut activity = match activity_type {
            // A bare object, as found in outboxes of some servers and in liked collections.
            ActivityType::Empty => {
                let note = self.note_from_object(v, &Actor::default());
                if note.oid.is_empty() {
                    return Err(ConnectionError::parse(format!("unsupported object type '{ty}'")));
                }
                Activity::from_note(note.author.clone(), note)
            }
            ActivityType::Create | ActivityType::Update | ActivityType::Delete => {
                let mut note = self.note_from_object(&object, &actor);
                if !object.is_object() {
                    note.author = actor.clone();
                }
                // Recipients are often only on the activity.
                if note.audience.is_empty() {
                    self.audience_into(v, &mut note);
                }
                let mut a = Activity::from_note(actor, note);
                a.activity_type = activity_type;
                a
            }
            ActivityType::Announce => {
                let note = self.note_from_object(&object, &Actor::default());
                let inner = Activity::from_note(note.author.clone(), note);
                Activity::wrapping(origin_id, ActivityType::Announce, actor, inner)
            }
            ActivityType::Like => {
                let note = self.note_from_object(&object, &Actor::default());
                let liked = Activity::from_note(note.author.clone(), note);
                like_activity(&actor, liked, true)
            }
            ActivityType::Follow => {
                Activity::with_actor_object(origin_id, ActivityType::Follow, actor, self.actor_ref(&object))
            }
            ActivityType::Undo => {
                let inner = if object.is_object() && !str_of(&object, "type").is_empty() {
                    self.activity_from_json(&object)?
                } else {
                    let mut unknown = Activity::new(origin_id, ActivityType::Empty, actor.clone());
                    unknown.oid = id_of(&object);
                    unknown
                };
                Activity::wrapping(origin_id, ActivityType::Undo, actor, inner)
            }
        };
        if !oid.is_empty() {
            activity.oid = oid.clone();
            activity.timeline_position = TimelinePosition::new(oid);
        }
        let date = parse_iso8601(&first_str(v, &["updated", "published"]));
        if date > 0 {
            activity.updated_date = date;
        }
        Ok(activity)
    }

    /// Our own actor with its collections resolved, fetched once.
    async fn me(&self) -> ConnResult<&Actor> {
        self.me
            .get_or_try_init(|| async {
                let configured = &self.http.account().actor;
                if configured.endpoint(ActorEndpointType::Outbox).is_some() {
                    return Ok(configured.clone());
                }
                self.get_actor(configured).await
            })
            .await
    }

    async fn webfinger(&self, handle: &str) -> ConnResult<String> {
        let handle = handle.trim_start_matches('@');
        let host = match handle.split_once('@') {
            Some((_, h)) => h.to_string(),
            None => self.http.account().origin.host.clone(),
        };
        let resource = if handle.contains('@') {
            format!("acct:{handle}")
        } else {
            format!("acct:{handle}@{host}")
        };
        let url = with_query(&format!("https://{host}/.well-known/webfinger"), &[("resource", resource)]);
        let v = self.http.get_json(ApiRoutine::GetActor, &url).await?;
        array_of(&v, "links")
            .iter()
            .filter(|l| str_of(l, "rel") == "self")
            .filter(|l| {
                let t = str_of(l, "type");
                t.is_empty() || t.contains("activity+json") || t.contains("ld+json")
            })
            .map(|l| str_of(l, "href"))
            .find(|h| !h.is_empty())
            .ok_or_else(|| ConnectionError::parse(format!("no ActivityPub link for {handle}")))
    }

    async fn endpoint_of(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<String> {
        let ty = routine_endpoint(routine).ok_or_else(|| ConnectionError::unsupported(routine))?;
        if let Some(url) = actor.endpoint(ty) {
            return Ok(url.to_string());
        }
        let resolved = if actor.oid.is_empty() || actor.oid == self.http.account().actor.oid {
            self.me().await?.clone()
        } else {
            self.get_actor(actor).await?
        };
        resolved
            .endpoint(ty)
            .map(str::to_string)
            .ok_or_else(|| ConnectionError::unsupported(routine))
    }

    /// The first page of a collection, or the page itself.
    async fn first_page(&self, routine: ApiRoutine, url: &str) -> ConnResult<Value> {
        let v = self.http.get_activity_json(routine, url).await?;
        let ty = str_of(&v, "type");
        if !page_items(&v).is_empty() || ty.ends_with("Page") {
            return Ok(v);
        }
        match v.get("first") {
            Some(first) if first.is_object() && (first.get("orderedItems").is_some() || first.get("items").is_some()) => {
                Ok(first.clone())
            }
            Some(first) => {
                let first = id_of(first);
                if first.is_empty() {
                    Ok(v)
                } else {
                    self.http.get_activity_json(routine, &first).await
                }
            }
            None => Ok(v),
        }
    }

    async fn post_to_outbox(&self, routine: ApiRoutine, mut activity: Value) -> ConnResult<Activity> {
        let me = self.me().await?.clone();
        let outbox = self.endpoint_of(routine, &me).await?;
        activity["@context"] = json!(AS_CONTEXT);
        activity["actor"] = json!(me.oid);
        debug!(kind = %activity["type"], "posting to outbox");
        let result = self.http.post_json(routine, &outbox, activity.clone()).await?;
        let posted = if result.body.trim().is_empty() {
            // Servers may answer 201 with only a Location.
            match result.location() {
                Some(location) => self.http.get_activity_json(routine, location).await?,
                None => activity,
            }
        } else {
            result.json()?
        };
        self.activity_from_json(&posted)
    }

    async fn upload_media(&self, draft: &NoteDraft) -> ConnResult<Option<Value>> {
        let Some(file) = &draft.media else {
            return Ok(None);
        };
        let me = self.me().await?.clone();
        let doc = self.http.get_activity_json(ApiRoutine::UploadMedia, &me.oid).await?;
        let upload = str_of(&doc["endpoints"], "uploadMedia");
        if upload.is_empty() {
            return Err(ConnectionError::unsupported(ApiRoutine::UploadMedia));
        }
        let body = RequestBody::Multipart {
            fields: vec![("object".to_string(), json!({"type": "Document"}).to_string())],
            file_field: "file".to_string(),
            file: file.clone(),
            content_type: draft.media_content_type(),
        };
        let v = self.http.post_file(ApiRoutine::UploadMedia, &upload, body).await?;
        // Some servers wrap the uploaded object in a Create.
        let object = if v.get("object").is_some_and(Value::is_object) {
            v["object"].clone()
        } else {
            v
        };
        Ok(Some(object))
    }

    async fn collection_ids(&self, routine: ApiRoutine, actor: &Actor) -> ConnResult<Vec<Value>> {
        let url = self.endpoint_of(routine, actor).await?;
        let page = self.first_page(routine, &url).await?;
        Ok(page_items(&page))
    }

    async fn note_target(&self, oid: &str) -> Actor {
        match self.get_note(oid).await {
            Ok(a) => a.author().cloned().unwrap_or_default(),
            Err(e) => {
                debug!(oid, error = %e, "note author unknown");
                Actor::default()
            }
        }
    }
}

#[async_trait]
impl Connection for ActivityPubConnection {
    fn http(&self) -> &HttpConnection {
        &self.http
    }

    fn origin_type(&self) -> OriginType {
        OriginType::ActivityPub
    }

    fn is_api_supported(&self, routine: ApiRoutine) -> bool {
        use ApiRoutine::*;
        match routine {
            PublicTimeline | SearchNotes | SearchActors => false,
            VerifyCredentials | GetNote | GetConversation | GetActor | UploadMedia | DownloadFile => true,
            other => routine_endpoint(other).is_some(),
        }
    }

    fn parse_date(&self, date: &str) -> i64 {
        parse_iso8601(date)
    }

    async fn verify_credentials(&self) -> ConnResult<Actor> {
        let me = self.me().await?;
        if me.oid.is_empty() {
            return Err(ConnectionError::parse("actor document without id"));
        }
        Ok(me.clone())
    }

    async fn get_timeline(
        &self,
        routine: ApiRoutine,
        youngest: &TimelinePosition,
        oldest: &TimelinePosition,
        _limit: usize,
        actor: &Actor,
    ) -> ConnResult<TimelinePage> {
        if !self.is_api_supported(routine) || !routine.is_timeline() {
            return Err(ConnectionError::unsupported(routine));
        }
        let (url, from_root) = if is_url(oldest.as_str()) {
            (oldest.as_str().to_string(), false)
        } else if is_url(youngest.as_str()) {
            (youngest.as_str().to_string(), false)
        } else {
            let target = if routine == ApiRoutine::ActorTimeline { actor.clone() } else { self.me().await?.clone() };
            (self.endpoint_of(routine, &target).await?, true)
        };
        let page = if from_root {
            self.first_page(routine, &url).await?
        } else {
            self.http.get_activity_json(routine, &url).await?
        };
        let my_oid = self.http.account().actor.oid.clone();
        let mut activities = Vec::new();
        // Pages are sized by the server and the cursor moves past the whole
        // page, so every item on it is kept.
        for item in page_items(&page).iter() {
            if !item.is_object() {
                debug!(item = %item, "skipping collection link");
                continue;
            }
            let activity = match self.activity_from_json(item) {
                Ok(a) => a,
                Err(e) => {
                    warn!(error = %e, "skipping unparsable item");
                    continue;
                }
            };
            let note = activity.innermost_note();
            let keep = match routine {
                ApiRoutine::PrivateNotes => note.map(|n| n.visibility) == Some(Visibility::Private),
                ApiRoutine::MentionsTimeline => note.is_some_and(|n| n.audience.contains_oid(&my_oid)),
                _ => true,
            };
            if keep {
                activities.push(activity);
            }
        }
        let mut result = TimelinePage::from_activities(activities, youngest, oldest);
        let prev = page.get("prev").map(id_of).unwrap_or_default();
        let next = page.get("next").map(id_of).unwrap_or_default();
        let page_id = first_str(&page, &["id"]);
        result.youngest_position = if !prev.is_empty() {
            TimelinePosition::new(prev)
        } else if !youngest.is_empty() {
            youngest.clone()
        } else {
            TimelinePosition::new(page_id)
        };
        // No next page: the caller sees its own cursor again and stops.
        result.oldest_position = if next.is_empty() { oldest.clone() } else { TimelinePosition::new(next) };
        Ok(result)
    }

    async fn get_note(&self, oid: &str) -> ConnResult<Activity> {
        let v = self.http.get_activity_json(ApiRoutine::GetNote, oid).await?;
        let activity = self.activity_from_json(&v)?;
        if activity.innermost_note().is_none() {
            return Err(ConnectionError::parse(format!("{oid} is not a note")));
        }
        Ok(activity)
    }

    /// The note and the first page of its replies.
    async fn get_conversation(&self, conversation_oid: &str) -> ConnResult<Vec<Activity>> {
        let v = self.http.get_activity_json(ApiRoutine::GetConversation, conversation_oid).await?;
        let root = self.activity_from_json(&v)?;
        let mut out = vec![root];
        let replies = match v.get("replies") {
            Some(r) if r.is_object() && r.get("first").is_none() && !page_items(r).is_empty() => r.clone(),
            Some(r) if r.is_object() => match r.get("first") {
                Some(first) if first.is_object() => first.clone(),
                Some(first) => self.first_page(ApiRoutine::GetConversation, &id_of(first)).await?,
                None => Value::Null,
            },
            Some(r) if !id_of(r).is_empty() => self.first_page(ApiRoutine::GetConversation, &id_of(r)).await?,
            _ => Value::Null,
        };
        for item in page_items(&replies) {
            let reply = if item.is_object() {
                self.activity_from_json(&item)
            } else {
                self.get_note(&id_of(&item)).await
            };
            match reply {
                Ok(a) => out.push(a),
                Err(e) => warn!(error = %e, "skipping reply"),
            }
        }
        Ok(out)
    }

    async fn update_status(&self, draft: &NoteDraft) -> ConnResult<Activity> {
        let routine = if draft.is_private() {
            ApiRoutine::UpdatePrivateNote
        } else {
            ApiRoutine::UpdateNote
        };
        let me = self.me().await?.clone();
        let mut object = json!({
            "type": "Note",
            "attributedTo": me.oid,
            "content": html::text_to_html(&draft.text),
            "sensitive": draft.sensitive,
        });
        if !draft.name.is_empty() {
            object["name"] = json!(draft.name);
        }
        if !draft.summary.is_empty() {
            object["summary"] = json!(draft.summary);
        }
        if !draft.in_reply_to_oid.is_empty() {
            object["inReplyTo"] = json!(draft.in_reply_to_oid);
        }
        let (to, cc) = match &draft.recipient {
            Some(r) => (json!([r.oid]), json!([])),
            None => {
                let followers = me.endpoint(ActorEndpointType::Followers).unwrap_or_default();
                (json!([PUBLIC]), json!([followers]))
            }
        };
        if let Some(r) = &draft.recipient {
            object["tag"] = json!([{ "type": "Mention", "href": r.oid, "name": format!("@{}", r.unique_name()) }]);
        }
        object["to"] = to.clone();
        object["cc"] = cc.clone();
        if let Some(uploaded) = self.upload_media(draft).await? {
            object["attachment"] = json!([uploaded]);
        }
        let activity = json!({ "type": "Create", "to": to, "cc": cc, "object": object });
        self.post_to_outbox(routine, activity).await
    }

    async fn destroy_status(&self, oid: &str) -> ConnResult<bool> {
        self.post_to_outbox(ApiRoutine::DestroyNote, json!({ "type": "Delete", "object": oid, "to": [PUBLIC] }))
            .await?;
        Ok(true)
    }

    async fn post_reblog(&self, oid: &str) -> ConnResult<Activity> {
        let author = self.note_target(oid).await;
        let mut cc = vec![json!(self.me().await?.endpoint(ActorEndpointType::Followers).unwrap_or_default())];
        if !author.oid.is_empty() {
            cc.push(json!(author.oid));
        }
        self.post_to_outbox(
            ApiRoutine::Announce,
            json!({ "type": "Announce", "object": oid, "to": [PUBLIC], "cc": cc }),
        )
        .await
    }

    async fn undo_reblog(&self, oid: &str) -> ConnResult<Activity> {
        let me = self.me().await?.oid.clone();
        self.post_to_outbox(
            ApiRoutine::UndoAnnounce,
            json!({ "type": "Undo", "to": [PUBLIC], "object": { "type": "Announce", "actor": me, "object": oid } }),
        )
        .await
    }

    async fn create_favorite(&self, oid: &str) -> ConnResult<Activity> {
        let author = self.note_target(oid).await;
        let mut liked = self
            .post_to_outbox(ApiRoutine::Like, json!({ "type": "Like", "object": oid, "to": [author.oid] }))
            .await?;
        if let Some(n) = liked.note_mut() {
            n.favorited = TriState::True;
        }
        Ok(liked)
    }

    async fn destroy_favorite(&self, oid: &str) -> ConnResult<Activity> {
        let me = self.me().await?.oid.clone();
        self.post_to_outbox(
            ApiRoutine::UndoLike,
            json!({ "type": "Undo", "object": { "type": "Like", "actor": me, "object": oid } }),
        )
        .await
    }

    async fn follow(&self, actor_oid: &str, follow: bool) -> ConnResult<Activity> {
        let me = self.me().await?.oid.clone();
        let activity = if follow {
            json!({ "type": "Follow", "object": actor_oid, "to": [actor_oid] })
        } else {
            json!({ "type": "Undo", "to": [actor_oid], "object": { "type": "Follow", "actor": me, "object": actor_oid } })
        };
        let routine = if follow { ApiRoutine::Follow } else { ApiRoutine::UndoFollow };
        self.post_to_outbox(routine, activity).await
    }

    async fn get_actor(&self, actor: &Actor) -> ConnResult<Actor> {
        let url = if is_url(&actor.oid) {
            actor.oid.clone()
        } else {
            let handle = actor.unique_name().to_string();
            if handle.is_empty() {
                return Err(ConnectionError::parse("actor without id or username"));
            }
            self.webfinger(&handle).await?
        };
        let v = self.http.get_activity_json(ApiRoutine::GetActor, &url).await?;
        let found = self.actor_from_json(&v);
        if found.oid.is_empty() {
            return Err(ConnectionError::parse("actor document without id"));
        }
        Ok(found)
    }

    async fn get_friends(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        let items = self.collection_ids(ApiRoutine::GetFriends, actor).await?;
        Ok(items.iter().map(|a| self.actor_ref(a)).collect())
    }

    async fn get_followers(&self, actor: &Actor) -> ConnResult<Vec<Actor>> {
        let items = self.collection_ids(ApiRoutine::GetFollowers, actor).await?;
        Ok(items.iter().map(|a| self.actor_ref(a)).collect())
    }

    async fn get_friends_ids(&self, actor: &Actor) -> ConnResult<Vec<String>> {
        let items = self.collection_ids(ApiRoutine::GetFriendsIds, actor).await?;
        Ok(items.iter().map(id_of).filter(|id| !id.is_empty()).collect())
    }

    async fn get_followers_ids(&self, actor: &Actor) -> ConnResult<Vec<String>> {
        let items = self.collection_ids(ApiRoutine::GetFollowersIds, actor).await?;
        Ok(items.iter().map(id_of).filter(|id| !id.is_empty()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, Credentials};
    use crate::error::StatusCode;
    use crate::http::ReadResult;
    use crate::http_connection::tests::{test_settings, ScriptedExecutor};
    use crate::origin::Origin;
    use polyfedi_model::ObjectType;
    use std::sync::Arc;

    const ME: &str = "https://social.example/users/alice";

    fn conn(exec: &Arc<ScriptedExecutor>) -> ActivityPubConnection {
        let origin = Origin::new(1, "test", OriginType::ActivityPub, "social.example").into_shared();
        let credentials = Credentials::OAuth2 {
            access_token: "tok".into(),
        };
        let account = Arc::new(Account::new(origin, "alice", ME, credentials));
        ActivityPubConnection::new(HttpConnection::new(account, exec.clone(), test_settings()))
    }

    fn actor_doc() -> Value {
        json!({
            "id": ME, "type": "Person", "preferredUsername": "alice", "name": "Alice",
            "inbox": format!("{ME}/inbox"), "outbox": format!("{ME}/outbox"),
            "followers": format!("{ME}/followers"), "following": format!("{ME}/following"),
            "liked": format!("{ME}/liked"),
            "icon": {"type": "Image", "url": "https://social.example/a.png"}
        })
    }

    fn note(id: &str, author: &str) -> Value {
        json!({
            "id": id, "type": "Note", "attributedTo": author, "content": "<p>hi @alice</p>",
            "published": "2024-02-01T08:00:00Z", "to": [PUBLIC],
            "tag": [{"type": "Mention", "href": ME, "name": "@alice@social.example"}],
            "attachment": [{"type": "Document", "mediaType": "image/png", "url": "https://social.example/m/1.png"}]
        })
    }

    #[test]
    fn announce_of_remote_note() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(&exec);
        let v = json!({
            "id": "https://b.example/activities/1", "type": "Announce",
            "actor": "https://b.example/users/bob", "published": "2024-02-01T09:00:00Z",
            "object": note("https://c.example/notes/1", "https://c.example/users/carol")
        });
        let a = c.activity_from_json(&v).unwrap();
        assert_eq!(a.activity_type, ActivityType::Announce);
        assert_eq!(a.object_type(), ObjectType::Activity);
        assert_eq!(a.actor.webfinger_id, "bob@b.example");
        assert_eq!(a.author().map(|x| x.webfinger_id.as_str()), Some("carol@c.example"));
        let n = a.innermost_note().unwrap();
        assert_eq!(n.visibility, Visibility::Public);
        assert!(n.audience.contains_oid(ME));
        assert_eq!(n.attachments.len(), 1);
        assert_eq!(a.timeline_position.as_str(), "https://b.example/activities/1");
    }

    #[test]
    fn announce_of_link_is_forward_reference() {
        let exec = Arc::new(ScriptedExecutor::default());
        let c = conn(&exec);
        let v = json!({"id": "x1", "type": "Announce", "actor": "https://b.example/users/bob",
                       "object": "https://c.example/notes/2"});
        let a = c.activity_from_json(&v).unwrap();
        let n = a.innermost_note().unwrap();
        assert_eq!(n.oid, "https://c.example/notes/2");
        assert!(n.content.is_empty());
    }

    #[tokio::test]
    async fn inbox_pages_follow_next_links() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(actor_doc());
        exec.push_json(json!({"type": "OrderedCollection", "first": format!("{ME}/inbox?page=1")}));
        exec.push_json(json!({
            "type": "OrderedCollectionPage", "id": format!("{ME}/inbox?page=1"),
            "next": format!("{ME}/inbox?page=2"), "prev": format!("{ME}/inbox?min_id=9"),
            "orderedItems": [
                {"id": "act-9", "type": "Create", "actor": "https://b.example/users/bob",
                 "object": note("https://b.example/notes/9", "https://b.example/users/bob")},
                "https://b.example/activities/link-only"
            ]
        }));
        exec.push_json(json!({"type": "OrderedCollectionPage", "id": format!("{ME}/inbox?page=2"), "orderedItems": []}));
        let c = conn(&exec);
        let empty = TimelinePosition::empty();
        let page = c
            .get_timeline(ApiRoutine::HomeTimeline, &empty, &empty, 20, &Actor::default())
            .await
            .unwrap();
        assert_eq!(page.activities.len(), 1);
        assert_eq!(page.oldest_position.as_str(), format!("{ME}/inbox?page=2"));
        assert_eq!(page.youngest_position.as_str(), format!("{ME}/inbox?min_id=9"));

        let last = c
            .get_timeline(ApiRoutine::HomeTimeline, &empty, &page.oldest_position, 20, &Actor::default())
            .await
            .unwrap();
        assert!(last.is_empty());
        assert_eq!(last.oldest_position, page.oldest_position);
        let uris: Vec<String> = exec.recorded().into_iter().map(|r| r.uri).collect();
        assert_eq!(uris[0], ME);
        assert_eq!(uris[3], format!("{ME}/inbox?page=2"));
    }

    #[tokio::test]
    async fn page_larger_than_limit_is_kept_whole() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(json!({
            "type": "OrderedCollectionPage", "id": format!("{ME}/inbox?page=1"),
            "next": format!("{ME}/inbox?page=2"),
            "orderedItems": [
                {"id": "act-3", "type": "Create", "actor": "https://b.example/users/bob",
                 "object": note("https://b.example/notes/3", "https://b.example/users/bob")},
                {"id": "act-2", "type": "Create", "actor": "https://b.example/users/bob",
                 "object": note("https://b.example/notes/2", "https://b.example/users/bob")},
                {"id": "act-1", "type": "Create", "actor": "https://b.example/users/bob",
                 "object": note("https://b.example/notes/1", "https://b.example/users/bob")}
            ]
        }));
        let c = conn(&exec);
        let empty = TimelinePosition::empty();
        let page1 = TimelinePosition::new(format!("{ME}/inbox?page=1"));
        let page = c
            .get_timeline(ApiRoutine::HomeTimeline, &empty, &page1, 2, &Actor::default())
            .await
            .unwrap();
        assert_eq!(page.activities.len(), 3);
        assert_eq!(page.oldest_position.as_str(), format!("{ME}/inbox?page=2"));
    }

    #[tokio::test]
    async fn create_with_empty_body_reads_location() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(actor_doc());
        let mut created = ReadResult::new("");
        created.http_code = 201;
        created.status = StatusCode::Ok;
        created.headers = vec![("location".to_string(), "https://social.example/activities/77".to_string())];
        exec.push_result(created);
        exec.push_json(json!({
            "id": "https://social.example/activities/77", "type": "Create", "actor": ME,
            "object": {"id": "https://social.example/notes/77", "type": "Note", "attributedTo": ME,
                       "content": "<p>hello</p>", "to": [PUBLIC]}
        }));
        let c = conn(&exec);
        let draft = NoteDraft {
            text: "hello".into(),
            ..NoteDraft::default()
        };
        let a = c.update_status(&draft).await.unwrap();
        assert_eq!(a.activity_type, ActivityType::Create);
        assert_eq!(a.note().map(|n| n.oid.as_str()), Some("https://social.example/notes/77"));
        let sent = exec.recorded();
        assert_eq!(sent[1].uri, format!("{ME}/outbox"));
        let RequestBody::Json(body) = &sent[1].body else {
            panic!("expected json body");
        };
        assert_eq!(body["type"], "Create");
        assert_eq!(body["actor"], ME);
        assert_eq!(body["to"][0], PUBLIC);
        assert_eq!(body["cc"][0], format!("{ME}/followers"));
        assert_eq!(sent[2].uri, "https://social.example/activities/77");
    }

    #[tokio::test]
    async fn webfinger_resolves_handles() {
        let exec = Arc::new(ScriptedExecutor::default());
        exec.push_json(json!({"links": [
            {"rel": "http://webfinger.net/rel/profile-page", "href": "https://b.example/@bob"},
            {"rel": "self", "type": "application/activity+json", "href": "https://b.example/users/bob"}
        ]}));
        exec.push_json(json!({"id": "https://b.example/users/bob", "type": "Person", "preferredUsername": "bob"}));
        let c = conn(&exec);
        let bob = c.get_actor(&Actor::from_username(1, "bob@b.example")).await.unwrap();
        assert_eq!(bob.webfinger_id, "bob@b.example");
        assert_eq!(
            exec.recorded()[0].uri,
            "https://b.example/.well-known/webfinger?resource=acct%3Abob%40b.example"
        );
        assert!(!c.is_api_supported(ApiRoutine::SearchNotes));
    }
}
