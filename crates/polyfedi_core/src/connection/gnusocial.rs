/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Where GNU social departs from the Twitter-shaped API it imitates.

use polyfedi_model::{Actor, Attachment};
use serde_json::Value;

use super::{array_of, first_str, str_of, ApiRoutine};

pub(super) fn api_path(routine: ApiRoutine) -> Option<&'static str> {
    use ApiRoutine::*;
    let path = match routine {
        VerifyCredentials => "account/verify_credentials.json",
        HomeTimeline => "statuses/home_timeline.json",
        NotificationsTimeline | MentionsTimeline => "statuses/mentions.json",
        PrivateNotes => "direct_messages.json",
        ActorTimeline => "statuses/user_timeline.json",
        LikedTimeline => "favorites.json",
        PublicTimeline => "statuses/public_timeline.json",
        SearchNotes => "search.json",
        GetNote => "statuses/show.json",
        GetConversation => "statusnet/conversation/%id%.json",
        UpdateNote | UploadMedia => "statuses/update.json",
        UpdatePrivateNote => "direct_messages/new.json",
        DestroyNote => "statuses/destroy/%id%.json",
        Announce => "statuses/retweet/%id%.json",
        Like => "favorites/create/%id%.json",
        UndoLike => "favorites/destroy/%id%.json",
        Follow => "friendships/create.json",
        UndoFollow => "friendships/destroy.json",
        GetActor => "users/show.json",
        GetFriends => "statuses/friends.json",
        GetFriendsIds => "friends/ids.json",
        GetFollowers => "statuses/followers.json",
        GetFollowersIds => "followers/ids.json",
        SearchActors | UndoAnnounce | DownloadFile => return None,
    };
    Some(path)
}

pub(super) fn conversation_oid(v: &Value) -> String {
    first_str(v, &["statusnet_conversation_id", "conversation_id"])
}

pub(super) fn note_url(v: &Value) -> String {
    first_str(v, &["external_url", "url"])
}

pub(super) fn content(v: &Value) -> String {
    first_str(v, &["statusnet_html", "text"])
}

pub(super) fn attachments(v: &Value) -> Vec<Attachment> {
    array_of(v, "attachments")
        .iter()
        .map(|a| Attachment::new(str_of(a, "url"), str_of(a, "mimetype")))
        .filter(Attachment::is_valid)
        .collect()
}

/// Host part of a profile URL, used to build the webfinger id of remote users.
pub(super) fn profile_host(profile_url: &str) -> Option<String> {
    reqwest::Url::parse(profile_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// Users addressed by a notice, as GNU social lists them.
pub(super) fn attentions(v: &Value, origin_id: i64) -> Vec<Actor> {
    array_of(v, "attentions")
        .iter()
        .filter_map(|a| {
            let oid = str_of(a, "id");
            let username = str_of(a, "screen_name");
            if oid.is_empty() && username.is_empty() {
                return None;
            }
            let mut actor = Actor::new(origin_id, oid);
            actor.username = username;
            actor.real_name = str_of(a, "fullname");
            actor.profile_url = str_of(a, "profileurl");
            if let Some(host) = profile_host(&actor.profile_url) {
                actor.fill_webfinger(&host);
            }
            Some(actor)
        })
        .collect()
}
