/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::{html, merge_count, merge_date, merge_str, Activity, Actor, Attachment, Audience, TriState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Unknown,
    Public,
    Private,
}

impl Visibility {
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

/// Where a note is in its download lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    #[default]
    Unknown,
    Loading,
    Loaded,
    HardError,
    SoftError,
}

/// A single post, status or message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub origin_id: i64,
    pub oid: String,
    pub author: Actor,
    pub name: String,
    pub summary: String,
    pub content: String,
    pub content_to_search: String,
    pub visibility: Visibility,
    /// May point at a note that has not been downloaded yet.
    pub in_reply_to: Option<Box<Activity>>,
    pub conversation_oid: String,
    pub url: String,
    pub audience: Audience,
    pub attachments: Vec<Attachment>,
    pub created_date: i64,
    pub updated_date: i64,
    pub status: DownloadStatus,
    pub favorited: TriState,
    pub reblogged: TriState,
    pub sensitive: bool,
    pub likes_count: Option<i64>,
    pub reblogs_count: Option<i64>,
    pub replies_count: Option<i64>,
}

impl Note {
    pub fn new(origin_id: i64, oid: impl Into<String>) -> Self {
        Self {
            origin_id,
            oid: oid.into().trim().to_string(),
            ..Self::default()
        }
    }

    /// A reference to a note known only by its oid.
    pub fn forward_reference(origin_id: i64, oid: impl Into<String>) -> Self {
        Self::new(origin_id, oid)
    }

    pub fn is_empty(&self) -> bool {
        self.oid.is_empty() && self.content.is_empty() && self.attachments.is_empty()
    }

    pub fn set_content(&mut self, raw: impl Into<String>) {
        self.content = raw.into();
        self.content_to_search = html::to_searchable(&format!("{} {} {}", self.name, self.summary, self.content));
        if !self.content.is_empty() || !self.attachments.is_empty() {
            self.status = DownloadStatus::Loaded;
        }
    }

    /// Content as plain text, HTML removed.
    pub fn sanitized(&self) -> String {
        html::to_plain_text(&self.content)
    }

    pub fn in_reply_to_note(&self) -> Option<&Note> {
        self.in_reply_to.as_deref().and_then(Activity::innermost_note)
    }

    pub fn set_in_reply_to(&mut self, actor: Actor, oid: impl Into<String>) {
        let oid = oid.into();
        if oid.trim().is_empty() {
            return;
        }
        let mut reply_to = Note::forward_reference(self.origin_id, oid);
        reply_to.author = actor.clone();
        self.in_reply_to = Some(Box::new(Activity::from_note(actor, reply_to)));
    }

    pub fn merge_from(&mut self, other: &Note) {
        if self.origin_id == 0 {
            self.origin_id = other.origin_id;
        }
        merge_str(&mut self.oid, &other.oid);
        self.author.merge_from(&other.author);
        merge_str(&mut self.name, &other.name);
        merge_str(&mut self.summary, &other.summary);
        merge_str(&mut self.content, &other.content);
        merge_str(&mut self.content_to_search, &other.content_to_search);
        if other.visibility.is_known() {
            self.visibility = other.visibility;
        }
        match (&mut self.in_reply_to, &other.in_reply_to) {
            (Some(mine), Some(theirs)) => mine.merge_from(theirs),
            (None, Some(theirs)) => self.in_reply_to = Some(theirs.clone()),
            _ => {}
        }
        merge_str(&mut self.conversation_oid, &other.conversation_oid);
        merge_str(&mut self.url, &other.url);
        self.audience.merge_from(&other.audience);
        if !other.attachments.is_empty() {
            let previous = std::mem::replace(&mut self.attachments, other.attachments.clone());
            for att in &mut self.attachments {
                if att.local_file.is_none() {
                    att.local_file = previous
                        .iter()
                        .find(|p| p.uri == att.uri)
                        .and_then(|p| p.local_file.clone());
                }
            }
        }
        if self.created_date == 0 {
            self.created_date = other.created_date;
        }
        merge_date(&mut self.updated_date, other.updated_date);
        self.status = match (self.status, other.status) {
            (mine, DownloadStatus::Unknown) => mine,
            (DownloadStatus::Loaded, DownloadStatus::Loading) => DownloadStatus::Loaded,
            (_, theirs) => theirs,
        };
        self.favorited.merge_from(other.favorited);
        self.reblogged.merge_from(other.reblogged);
        self.sensitive |= other.sensitive;
        merge_count(&mut self.likes_count, other.likes_count);
        merge_count(&mut self.reblogs_count, other.reblogs_count);
        merge_count(&mut self.replies_count, other.replies_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_note() -> Note {
        let mut note = Note::new(2, "n1");
        note.author = Actor::new(2, "a1");
        note.set_content("<p>Hello <b>World</b></p>");
        note.attachments.push(Attachment::new("https://x/p.png", "image/png"));
        note.favorited = TriState::True;
        note.updated_date = 10;
        note
    }

    #[test]
    fn set_content_marks_loaded_and_indexes() {
        let note = loaded_note();
        assert_eq!(note.status, DownloadStatus::Loaded);
        assert_eq!(note.content_to_search, "hello world");
        assert_eq!(note.sanitized(), "Hello World");
    }

    #[test]
    fn forward_reference_keeps_loaded_content() {
        let mut note = loaded_note();
        note.merge_from(&Note::forward_reference(2, "n1"));
        assert_eq!(note, loaded_note());
    }

    #[test]
    fn merge_keeps_downloaded_attachment_file() {
        let mut note = loaded_note();
        note.attachments[0].local_file = Some("/tmp/p.png".to_string());
        note.merge_from(&loaded_note());
        assert_eq!(note.attachments[0].local_file.as_deref(), Some("/tmp/p.png"));
    }

    #[test]
    fn reply_to_is_a_forward_reference() {
        let mut note = loaded_note();
        note.set_in_reply_to(Actor::new(2, "a9"), "n0");
        let parent = note.in_reply_to_note().map(|n| (n.oid.clone(), n.status));
        assert_eq!(parent, Some(("n0".to_string(), DownloadStatus::Unknown)));
    }
}
