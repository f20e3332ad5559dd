/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{merge_date, merge_str, Actor, Note, TimelinePosition};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    #[default]
    Empty,
    Create,
    Update,
    Announce,
    Like,
    Follow,
    Undo,
    Delete,
}

impl ActivityType {
    /// Maps ActivityStreams 1.0 verbs and ActivityPub types.
    pub fn from_as_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "post" | "create" => Self::Create,
            "update" => Self::Update,
            "share" | "announce" => Self::Announce,
            "favorite" | "like" => Self::Like,
            "follow" => Self::Follow,
            "undo" | "unfavorite" | "unshare" | "stop-following" | "unfollow" => Self::Undo,
            "delete" => Self::Delete,
            _ => Self::Empty,
        }
    }

    pub fn as_ap_name(self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Announce => "Announce",
            Self::Like => "Like",
            Self::Follow => "Follow",
            Self::Undo => "Undo",
            Self::Delete => "Delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    Empty,
    Note,
    Actor,
    Activity,
}

/// The object an activity acts upon; exactly one kind per activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityObject {
    #[default]
    Empty,
    Note(Box<Note>),
    Actor(Box<Actor>),
    Activity(Box<Activity>),
}

/// An action performed by `actor`, e.g. posting, reblogging or liking.
///
/// The actor of an activity is not necessarily the author of its note: for a
/// reblog the actor is the reblogger, see [`Activity::author`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub origin_id: i64,
    pub oid: String,
    pub activity_type: ActivityType,
    pub actor: Actor,
    pub object: ActivityObject,
    pub updated_date: i64,
    #[serde(default)]
    pub timeline_position: TimelinePosition,
}

impl Activity {
    pub fn new(origin_id: i64, activity_type: ActivityType, actor: Actor) -> Self {
        Self {
            origin_id,
            activity_type,
            actor,
            ..Self::default()
        }
    }

    /// A `Create` of `note` by `actor`, sharing the note's oid and dates.
    pub fn from_note(actor: Actor, note: Note) -> Self {
        let mut activity = Self::new(note.origin_id, ActivityType::Create, actor);
        activity.oid = note.oid.clone();
        activity.updated_date = note.updated_date.max(note.created_date);
        activity.timeline_position = TimelinePosition::new(note.oid.clone());
        activity.object = ActivityObject::Note(Box::new(note));
        activity
    }

    pub fn wrapping(origin_id: i64, activity_type: ActivityType, actor: Actor, inner: Activity) -> Self {
        let mut activity = Self::new(origin_id, activity_type, actor);
        activity.object = ActivityObject::Activity(Box::new(inner));
        activity
    }

    pub fn with_actor_object(origin_id: i64, activity_type: ActivityType, actor: Actor, object: Actor) -> Self {
        let mut activity = Self::new(origin_id, activity_type, actor);
        activity.object = ActivityObject::Actor(Box::new(object));
        activity
    }

    pub fn is_empty(&self) -> bool {
        self.activity_type == ActivityType::Empty || self.object_type() == ObjectType::Empty
    }

    pub fn object_type(&self) -> ObjectType {
        match &self.object {
            ActivityObject::Empty => ObjectType::Empty,
            ActivityObject::Note(_) => ObjectType::Note,
            ActivityObject::Actor(_) => ObjectType::Actor,
            ActivityObject::Activity(_) => ObjectType::Activity,
        }
    }

    pub fn note(&self) -> Option<&Note> {
        match &self.object {
            ActivityObject::Note(n) => Some(n.as_ref()),
            _ => None,
        }
    }

    pub fn note_mut(&mut self) -> Option<&mut Note> {
        match &mut self.object {
            ActivityObject::Note(n) => Some(n.as_mut()),
            _ => None,
        }
    }

    pub fn object_actor(&self) -> Option<&Actor> {
        match &self.object {
            ActivityObject::Actor(a) => Some(a.as_ref()),
            _ => None,
        }
    }

    pub fn inner_activity(&self) -> Option<&Activity> {
        match &self.object {
            ActivityObject::Activity(a) => Some(a.as_ref()),
            _ => None,
        }
    }

    /// The note at the bottom of any chain of nested activities.
    pub fn innermost_note(&self) -> Option<&Note> {
        match &self.object {
            ActivityObject::Note(n) => Some(n.as_ref()),
            ActivityObject::Activity(a) => a.innermost_note(),
            _ => None,
        }
    }

    /// Author of the underlying object; distinct from [`Activity::actor`] for reblogs.
    pub fn author(&self) -> Option<&Actor> {
        match &self.object {
            ActivityObject::Note(n) if !n.author.is_empty() => Some(&n.author),
            ActivityObject::Note(_) => Some(&self.actor),
            ActivityObject::Actor(a) => Some(a.as_ref()),
            ActivityObject::Activity(a) => a.author(),
            ActivityObject::Empty => None,
        }
    }

    /// Every actor referenced by this activity, outermost first.
    pub fn actors(&self) -> Vec<&Actor> {
        let mut out = Vec::new();
        if !self.actor.is_empty() {
            out.push(&self.actor);
        }
        match &self.object {
            ActivityObject::Note(n) => {
                if !n.author.is_empty() {
                    out.push(&n.author);
                }
                out.extend(n.audience.actors.iter());
            }
            ActivityObject::Actor(a) => out.push(a.as_ref()),
            ActivityObject::Activity(a) => out.extend(a.actors()),
            ActivityObject::Empty => {}
        }
        out
    }

    pub fn merge_from(&mut self, other: &Activity) {
        if self.origin_id == 0 {
            self.origin_id = other.origin_id;
        }
        merge_str(&mut self.oid, &other.oid);
        if other.activity_type != ActivityType::Empty {
            self.activity_type = other.activity_type;
        }
        self.actor.merge_from(&other.actor);
        match (&mut self.object, &other.object) {
            (ActivityObject::Note(mine), ActivityObject::Note(theirs)) => mine.merge_from(theirs),
            (ActivityObject::Actor(mine), ActivityObject::Actor(theirs)) => mine.merge_from(theirs),
            (ActivityObject::Activity(mine), ActivityObject::Activity(theirs)) => mine.merge_from(theirs),
            (_, ActivityObject::Empty) => {}
            (mine, theirs) => *mine = theirs.clone(),
        }
        merge_date(&mut self.updated_date, other.updated_date);
        if !other.timeline_position.is_empty() {
            self.timeline_position = other.timeline_position.clone();
        }
    }
}
